use super::{DriverFactory, DriverKind};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// 메일 수신 프로토콜이다.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MailProtocol {
    /// IMAP4.
    Imap,
    /// POP3.
    Pop3,
}

impl MailProtocol {
    fn default_port(&self) -> u16 {
        match self {
            MailProtocol::Imap => 143,
            MailProtocol::Pop3 => 110,
        }
    }
}

/// 메일 드라이버 설정이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailDriverConfig {
    /// 메일 서버 호스트.
    pub host: String,
    /// 포트. 없으면 프로토콜 기본 포트를 사용한다.
    #[serde(default)]
    pub port: Option<u16>,
    /// 프로토콜.
    pub protocol: MailProtocol,
    /// 로그인 사용자명.
    #[serde(default)]
    pub user: Option<String>,
    /// 로그인 비밀번호.
    #[serde(default)]
    pub password: Option<String>,
    /// 접속/응답 제한 시간(초 단위).
    #[serde(default = "default_timeout")]
    pub timeout_sec: u64,
}

fn default_timeout() -> u64 {
    15
}

/// 시나리오에서 공유하는 메일 서버 세션이다.
pub struct EmailDriver {
    /// 사용 중인 프로토콜.
    protocol: MailProtocol,
    /// 서버 인사말.
    greeting: String,
    /// 응답 대기 시간.
    io_timeout: Duration,
    /// IMAP 태그 카운터.
    next_tag: AtomicU32,
    /// 서버 연결.
    stream: Mutex<BufReader<TcpStream>>,
}

impl EmailDriver {
    /// 서버 인사말을 반환한다.
    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// 사용 중인 프로토콜을 반환한다.
    pub fn protocol(&self) -> MailProtocol {
        self.protocol
    }

    /// 명령 한 줄을 보내고 응답 줄 목록을 반환한다.
    ///
    /// IMAP은 태그가 붙은 완료 응답까지, POP3는 상태 한 줄만 읽는다.
    /// 완료 응답이 실패를 나타내면 오류를 반환한다.
    pub async fn command(&self, line: &str) -> anyhow::Result<Vec<String>> {
        let mut stream = self.stream.lock().await;
        match self.protocol {
            MailProtocol::Imap => {
                let tag = format!("a{}", self.next_tag.fetch_add(1, Ordering::Relaxed));
                write_line(&mut stream, &format!("{tag} {line}")).await?;
                let mut lines = Vec::new();
                loop {
                    let reply = read_line(&mut stream, self.io_timeout).await?;
                    if let Some(status) = reply.strip_prefix(&format!("{tag} ")) {
                        let ok = status.starts_with("OK");
                        lines.push(reply.clone());
                        if !ok {
                            anyhow::bail!("IMAP 명령 실패: {reply}");
                        }
                        return Ok(lines);
                    }
                    lines.push(reply);
                }
            }
            MailProtocol::Pop3 => {
                write_line(&mut stream, line).await?;
                let reply = read_line(&mut stream, self.io_timeout).await?;
                if !reply.starts_with("+OK") {
                    anyhow::bail!("POP3 명령 실패: {reply}");
                }
                Ok(vec![reply])
            }
        }
    }
}

async fn write_line(stream: &mut BufReader<TcpStream>, line: &str) -> anyhow::Result<()> {
    stream
        .get_mut()
        .write_all(format!("{line}\r\n").as_bytes())
        .await
        .context("메일 서버 전송 실패")
}

async fn read_line(stream: &mut BufReader<TcpStream>, wait: Duration) -> anyhow::Result<String> {
    let mut line = String::new();
    let read = timeout(wait, stream.read_line(&mut line))
        .await
        .context("메일 서버 응답 시간 초과")?
        .context("메일 서버 응답 읽기 실패")?;
    if read == 0 {
        anyhow::bail!("메일 서버가 연결을 종료했습니다.");
    }
    Ok(line.trim_end().to_string())
}

/// EmailDriver를 생성하는 팩토리이다.
#[derive(Debug, Clone)]
pub struct EmailDriverFactory {
    /// 드라이버 설정.
    config: EmailDriverConfig,
}

impl EmailDriverFactory {
    /// 설정으로 팩토리를 생성한다.
    pub fn new(config: EmailDriverConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DriverFactory for EmailDriverFactory {
    type Driver = EmailDriver;

    fn kind(&self) -> DriverKind {
        DriverKind::Email
    }

    async fn construct(&self) -> anyhow::Result<EmailDriver> {
        let protocol = self.config.protocol;
        let port = self.config.port.unwrap_or_else(|| protocol.default_port());
        let address = format!("{}:{port}", self.config.host);
        let io_timeout = Duration::from_secs(self.config.timeout_sec.max(1));
        let socket = timeout(io_timeout, TcpStream::connect(&address))
            .await
            .with_context(|| format!("메일 서버 접속 시간 초과: {address}"))?
            .with_context(|| format!("메일 서버 접속 실패: {address}"))?;
        let mut stream = BufReader::new(socket);
        let greeting = read_line(&mut stream, io_timeout).await?;
        let expected = match protocol {
            MailProtocol::Imap => "* OK",
            MailProtocol::Pop3 => "+OK",
        };
        if !greeting.starts_with(expected) {
            anyhow::bail!("예상하지 못한 메일 서버 인사말: {greeting}");
        }
        let driver = EmailDriver {
            protocol,
            greeting,
            io_timeout,
            next_tag: AtomicU32::new(1),
            stream: Mutex::new(stream),
        };
        if let (Some(user), Some(password)) = (&self.config.user, &self.config.password) {
            match protocol {
                MailProtocol::Imap => {
                    driver
                        .command(&format!(
                            "LOGIN {} {}",
                            imap_quote(user),
                            imap_quote(password)
                        ))
                        .await
                        .context("IMAP 로그인 실패")?;
                }
                MailProtocol::Pop3 => {
                    driver.command(&format!("USER {user}")).await?;
                    driver
                        .command(&format!("PASS {password}"))
                        .await
                        .context("POP3 로그인 실패")?;
                }
            }
        }
        Ok(driver)
    }

    async fn dispose(&self, driver: &EmailDriver) -> anyhow::Result<()> {
        let command = match driver.protocol {
            MailProtocol::Imap => "LOGOUT",
            MailProtocol::Pop3 => "QUIT",
        };
        driver
            .command(command)
            .await
            .context("메일 세션 종료 실패")?;
        Ok(())
    }
}

/// IMAP quoted string으로 감싼다. 따옴표와 역슬래시는 이스케이프한다.
fn imap_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        if matches!(ch, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}
