use super::{DriverFactory, DriverKind};
use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thirtyfour::WebDriver;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

/// UI(WebDriver) 드라이버 설정이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiDriverConfig {
    /// 이미 떠 있는 WebDriver/Grid 주소. 지정하면 로컬 프로세스를 실행하지 않는다.
    #[serde(default)]
    pub remote_url: Option<String>,
    /// 로컬에서 실행할 WebDriver 프로그램이다.
    #[serde(default = "default_command")]
    pub command: String,
    /// WebDriver 프로그램 추가 인자 목록.
    #[serde(default)]
    pub args: Vec<String>,
    /// 사용할 포트. 없으면 빈 포트를 찾는다.
    #[serde(default)]
    pub port: Option<u16>,
    /// WebDriver 준비 대기 시간(초 단위).
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_sec: u64,
    /// 세션 생성 시 전달할 capabilities.
    #[serde(default = "default_capabilities")]
    pub capabilities: Value,
}

impl Default for UiDriverConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            command: default_command(),
            args: Vec::new(),
            port: None,
            startup_timeout_sec: default_startup_timeout(),
            capabilities: default_capabilities(),
        }
    }
}

fn default_command() -> String {
    "chromedriver".to_string()
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_capabilities() -> Value {
    json!({
        "browserName": "chrome",
        "goog:chromeOptions": { "args": ["--headless=new"] }
    })
}

/// 시나리오에서 공유하는 브라우저 세션이다.
pub struct UiDriver {
    /// WebDriver 엔드포인트 주소.
    endpoint: String,
    /// thirtyfour 세션 핸들.
    session: WebDriver,
    /// 로컬에서 실행한 WebDriver 프로세스. 원격 모드면 `None`이다.
    process: Mutex<Option<Child>>,
}

impl UiDriver {
    /// WebDriver 엔드포인트 주소를 반환한다.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// 세션 핸들을 반환한다. 기본 Step에 없는 조작은 이것으로 직접 수행한다.
    pub fn session(&self) -> &WebDriver {
        &self.session
    }

    /// 브라우저를 지정한 URL로 이동시킨다.
    pub async fn navigate(&self, url: &str) -> anyhow::Result<()> {
        self.session
            .goto(url)
            .await
            .with_context(|| format!("페이지 이동 실패: {url}"))
    }

    /// 현재 페이지 URL을 조회한다.
    pub async fn current_url(&self) -> anyhow::Result<String> {
        let url = self.session.current_url().await.context("현재 URL 조회 실패")?;
        Ok(url.to_string())
    }

    /// 현재 페이지 제목을 조회한다.
    pub async fn title(&self) -> anyhow::Result<String> {
        self.session.title().await.context("페이지 제목 조회 실패")
    }
}

/// UiDriver를 생성하는 팩토리이다.
#[derive(Debug, Clone)]
pub struct UiDriverFactory {
    /// 드라이버 설정.
    config: UiDriverConfig,
}

impl UiDriverFactory {
    /// 설정으로 팩토리를 생성한다.
    pub fn new(config: UiDriverConfig) -> Self {
        Self { config }
    }

    /// 설정의 capabilities를 세션 요청 형식으로 바꾼다.
    fn capabilities(&self) -> anyhow::Result<Map<String, Value>> {
        match &self.config.capabilities {
            Value::Object(map) => Ok(map.clone()),
            other => anyhow::bail!("capabilities는 객체여야 합니다: {other}"),
        }
    }

    /// 로컬 WebDriver 프로세스를 실행하고 엔드포인트를 반환한다.
    fn spawn_local(&self) -> anyhow::Result<(String, Child)> {
        let port = match self.config.port {
            Some(port) => port,
            None => find_free_port()?,
        };
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .arg(format!("--port={port}"))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .with_context(|| format!("WebDriver 실행 실패: {}", self.config.command))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, port));
        }
        info!(
            "WebDriver '{}' 실행 (pid: {:?}, port: {port})",
            self.config.command,
            child.id()
        );
        Ok((format!("http://127.0.0.1:{port}"), child))
    }

    /// 세션을 연다. 로컬 프로세스는 뜨는 중일 수 있으므로 제한 시간까지 다시 시도한다.
    async fn open_session(&self, endpoint: &str, local: bool) -> anyhow::Result<WebDriver> {
        let capabilities = self.capabilities()?;
        let timeout = Duration::from_secs(self.config.startup_timeout_sec.max(1));
        let start = Instant::now();
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            match WebDriver::new(endpoint, capabilities.clone()).await {
                Ok(session) => return Ok(session),
                Err(err) if local && start.elapsed() < timeout => {
                    debug!("WebDriver 세션 생성 재시도 ({attempts}회): {err}");
                    sleep(Duration::from_millis(200)).await;
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("WebDriver 세션 생성 실패 ({attempts}회 시도): {endpoint}")
                    });
                }
            }
        }
    }
}

/// WebDriver 프로세스의 stderr를 줄 단위로 읽어 debug 로그로 남긴다.
async fn forward_stderr(stderr: ChildStderr, port: u16) {
    let mut lines = FramedRead::new(stderr, LinesCodec::new());
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => debug!(port, "webdriver: {line}"),
            Err(err) => {
                warn!(port, "webdriver stderr 읽기 오류: {err}");
                break;
            }
        }
    }
}

#[async_trait]
impl DriverFactory for UiDriverFactory {
    type Driver = UiDriver;

    fn kind(&self) -> DriverKind {
        DriverKind::Ui
    }

    async fn construct(&self) -> anyhow::Result<UiDriver> {
        let (endpoint, mut process) = match &self.config.remote_url {
            Some(url) => (url.trim_end_matches('/').to_string(), None),
            None => {
                let (endpoint, child) = self.spawn_local()?;
                (endpoint, Some(child))
            }
        };
        let session = match self.open_session(&endpoint, process.is_some()).await {
            Ok(session) => session,
            Err(err) => {
                // 반쯤 만들어진 드라이버가 남지 않도록 프로세스를 먼저 종료한다.
                if let Some(child) = process.as_mut() {
                    let _ = child.kill().await;
                }
                return Err(err);
            }
        };
        Ok(UiDriver {
            endpoint,
            session,
            process: Mutex::new(process),
        })
    }

    async fn dispose(&self, driver: &UiDriver) -> anyhow::Result<()> {
        let session_result = driver
            .session
            .clone()
            .quit()
            .await
            .context("WebDriver 세션 종료 실패");
        let mut guard = driver.process.lock().await;
        if let Some(mut child) = guard.take() {
            debug!("WebDriver 프로세스 종료 (pid: {:?})", child.id());
            child.kill().await.context("WebDriver 프로세스 종료 실패")?;
        }
        session_result
    }
}

/// 사용 가능한 로컬 포트를 찾는다.
fn find_free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").context("빈 포트 탐색 실패")?;
    Ok(listener.local_addr()?.port())
}
