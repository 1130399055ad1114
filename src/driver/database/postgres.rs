use super::{DbExecutor, SharedExecutor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::sync::Arc;
use tokio_postgres::NoTls;

/// PostgresDbExecutor는 PostgreSQL 연결 풀을 통해 SQL을 실행하는 구현체이다.
#[derive(Clone)]
pub struct PostgresDbExecutor {
    /// deadpool 기반 연결 풀이다.
    pool: Pool,
}

impl PostgresDbExecutor {
    /// 접속 정보로 연결 풀을 만들고 커넥션 하나를 획득해 접속 가능 여부를 확인한다.
    ///
    /// # 매개변수
    /// - `dsn`: `host`, `port`, `dbname` 등이 포함된 PostgreSQL DSN 문자열.
    /// - `user`: 데이터베이스 사용자명.
    /// - `password`: 해당 사용자 비밀번호.
    pub async fn connect(
        dsn: impl Into<String>,
        user: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        let mut config = PoolConfig::new();
        config.url = Some(dsn.into());
        config.user = user;
        config.password = password;
        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("PostgreSQL 커넥션 풀 생성 실패")?;
        // 풀 생성은 지연 연결이므로 시나리오 시작 시점에 접속 실패를 드러낸다.
        let _conn = pool.get().await.context("PostgreSQL 접속 확인 실패")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DbExecutor for PostgresDbExecutor {
    /// deadpool 풀에서 커넥션을 획득해 주어진 SQL을 실행한다.
    async fn execute_sql(&self, sql: &str) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .context("PostgreSQL 커넥션 획득 실패")?;
        client
            .batch_execute(sql)
            .await
            .context("PostgreSQL SQL 실행 실패")?;
        Ok(())
    }

    /// 풀을 닫아 남은 커넥션을 반환한다.
    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}

/// PostgresDbExecutor를 [`SharedExecutor`] 형태로 생성한다.
pub async fn new_postgres_db_executor(
    dsn: String,
    user: Option<String>,
    password: Option<String>,
) -> Result<SharedExecutor> {
    let executor = PostgresDbExecutor::connect(dsn, user, password).await?;
    Ok(Arc::new(executor) as SharedExecutor)
}
