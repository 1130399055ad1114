use super::{DbExecutor, SharedExecutor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// OracleDbExecutor는 sqlplus 프로세스를 사용해 Oracle DB에 SQL을 실행하는 구현체이다.
///
/// 상주 연결이 없으므로 정리 단계에서 반환할 자원도 없다.
#[derive(Clone, Debug)]
pub struct OracleDbExecutor {
    /// `HOST:PORT/SERVICE_NAME` 형식의 DSN이다.
    dsn: String,
    /// 접속 사용자명이다.
    user: String,
    /// 접속 비밀번호이다.
    password: String,
}

impl OracleDbExecutor {
    /// sqlplus 호출에 필요한 접속 정보를 보관한다.
    pub fn new(
        dsn: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            dsn: dsn.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    fn connect_string(&self) -> String {
        format!("{}/{}@{}", self.user, self.password, self.dsn)
    }
}

#[async_trait]
impl DbExecutor for OracleDbExecutor {
    /// sqlplus 프로세스를 실행해 SQL을 stdin으로 전달한다.
    async fn execute_sql(&self, sql: &str) -> Result<()> {
        let mut command = Command::new("sqlplus");
        command.arg("-S");
        command.arg(self.connect_string());
        command.stdin(std::process::Stdio::piped());
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());

        let mut child = command.spawn().context("sqlplus 실행 실패")?;

        if let Some(mut stdin) = child.stdin.take() {
            let script = format!(
                "WHENEVER SQLERROR EXIT SQL.SQLCODE\nSET HEADING OFF\nSET FEEDBACK OFF\n{sql}\n/\nEXIT\n"
            );
            stdin
                .write_all(script.as_bytes())
                .await
                .context("sqlplus stdin 전송 실패")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("sqlplus 종료 대기 실패")?;
        if output.status.success() {
            Ok(())
        } else {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Err(anyhow::anyhow!(
                "sqlplus 종료 코드: {} ({})",
                output.status,
                stdout.trim()
            ))
        }
    }
}

/// OracleDbExecutor를 [`SharedExecutor`] 형태로 생성한다.
pub fn new_oracle_db_executor(
    dsn: impl Into<String>,
    user: impl Into<String>,
    password: impl Into<String>,
) -> SharedExecutor {
    Arc::new(OracleDbExecutor::new(dsn, user, password))
}
