use super::{DriverFactory, DriverKind};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod oracle;
mod postgres;

pub use oracle::{OracleDbExecutor, new_oracle_db_executor};
pub use postgres::{PostgresDbExecutor, new_postgres_db_executor};

/// DbExecutor는 SQL 실행을 위한 추상 계층을 정의한다.
#[async_trait]
pub trait DbExecutor: Send + Sync {
    /// SQL 문장을 실행한다.
    async fn execute_sql(&self, sql: &str) -> anyhow::Result<()>;

    /// 연결 자원을 반환한다. 기본 구현은 아무 것도 하지 않는다.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// DummyExecutor는 실제 DB 연결 없이 로그만 출력하는 기본 구현이다.
#[derive(Debug, Default, Clone)]
pub struct DummyExecutor;

#[async_trait]
impl DbExecutor for DummyExecutor {
    /// Dummy 구현으로 SQL을 로그로 출력한다.
    async fn execute_sql(&self, sql: &str) -> anyhow::Result<()> {
        tracing::info!("[DummyExecutor] SQL 실행: {sql}");
        Ok(())
    }
}

/// DbExecutor를 공유하기 위한 Arc 타입 별칭이다.
pub type SharedExecutor = Arc<dyn DbExecutor>;

/// 데이터베이스 연결 정의이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConnectionConfig {
    /// 연결 종류이다.
    pub kind: DbKind,
    /// 연결 문자열 또는 DSN이다.
    pub dsn: Option<String>,
    /// 사용자명이다.
    pub user: Option<String>,
    /// 비밀번호이다.
    pub password: Option<String>,
}

/// 지원하는 DB 종류를 표현한다.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DbKind {
    /// 더미 실행기.
    Dummy,
    /// PostgreSQL 연결.
    Postgres,
    /// Oracle sqlplus 기반 연결.
    Oracle,
}

/// 시나리오에서 공유하는 데이터베이스 드라이버이다.
#[derive(Clone)]
pub struct DatabaseDriver {
    /// 실제 SQL 실행기.
    executor: SharedExecutor,
}

impl DatabaseDriver {
    /// 실행기를 감싸 드라이버를 만든다.
    pub fn new(executor: SharedExecutor) -> Self {
        Self { executor }
    }

    /// SQL 문장을 실행한다.
    pub async fn execute_sql(&self, sql: &str) -> anyhow::Result<()> {
        self.executor.execute_sql(sql).await
    }

    /// 내부 실행기를 반환한다.
    pub fn executor(&self) -> SharedExecutor {
        self.executor.clone()
    }
}

/// 연결 설정으로 DatabaseDriver를 생성하는 팩토리이다.
#[derive(Debug, Clone)]
pub struct DatabaseDriverFactory {
    /// 연결 설정.
    config: DbConnectionConfig,
}

impl DatabaseDriverFactory {
    /// 연결 설정으로 팩토리를 생성한다. 플레이스홀더는 미리 치환되어 있어야 한다.
    pub fn new(config: DbConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DriverFactory for DatabaseDriverFactory {
    type Driver = DatabaseDriver;

    fn kind(&self) -> DriverKind {
        DriverKind::Database
    }

    async fn construct(&self) -> anyhow::Result<DatabaseDriver> {
        let executor = build_executor_from_config(&self.config).await?;
        Ok(DatabaseDriver::new(executor))
    }

    async fn dispose(&self, driver: &DatabaseDriver) -> anyhow::Result<()> {
        driver.executor.close().await
    }
}

/// 연결 설정에 맞는 실행기를 생성한다.
async fn build_executor_from_config(config: &DbConnectionConfig) -> anyhow::Result<SharedExecutor> {
    match config.kind {
        DbKind::Dummy => Ok(Arc::new(DummyExecutor) as SharedExecutor),
        DbKind::Postgres => {
            let dsn = required(config.dsn.clone(), "dsn")?;
            new_postgres_db_executor(dsn, config.user.clone(), config.password.clone())
                .await
                .context("PostgreSQL 실행기 생성 실패")
        }
        DbKind::Oracle => {
            let dsn = required(config.dsn.clone(), "dsn")?;
            let user = required(config.user.clone(), "user")?;
            let password = required(config.password.clone(), "password")?;
            Ok(new_oracle_db_executor(dsn, user, password))
        }
    }
}

fn required(value: Option<String>, field: &str) -> anyhow::Result<String> {
    value.ok_or_else(|| anyhow::anyhow!(format!("{field} 값이 누락되었습니다.")))
}
