use super::{StepHandler, StepLogger, StepRegistry, arg, slot_or};
use crate::driver::{DatabaseDriver, DriverKind};
use crate::error::SuiteError;
use crate::lifecycle::shared_driver;
use crate::store::ScenarioStore;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::fs;

/// SQL 문자열을 데이터베이스 드라이버로 실행한다.
struct ExecuteSql;

#[async_trait]
impl StepHandler for ExecuteSql {
    async fn run(
        &self,
        store: &mut ScenarioStore,
        args: &[String],
        log: &StepLogger,
    ) -> anyhow::Result<()> {
        let sql = arg(args, 0)?;
        let slot = slot_or(args.get(1), DriverKind::Database.as_str());
        let driver = shared_driver::<DatabaseDriver>(store, slot)?;
        log.line("SQL 실행 시작");
        driver.execute_sql(sql).await
    }
}

/// SQL 파일을 읽어 데이터베이스 드라이버로 실행한다.
struct ExecuteSqlFile;

#[async_trait]
impl StepHandler for ExecuteSqlFile {
    async fn run(
        &self,
        store: &mut ScenarioStore,
        args: &[String],
        log: &StepLogger,
    ) -> anyhow::Result<()> {
        let path = arg(args, 0)?;
        let slot = slot_or(args.get(1), DriverKind::Database.as_str());
        let driver = shared_driver::<DatabaseDriver>(store, slot)?;
        let sql = fs::read_to_string(path)
            .await
            .with_context(|| format!("SQL 파일 읽기 실패: {path}"))?;
        log.line(format!("SQL 파일 실행: {path}"));
        driver.execute_sql(&sql).await
    }
}

pub(super) fn register(registry: &mut StepRegistry) -> Result<(), SuiteError> {
    registry
        .register(
            r#"I execute SQL "(.*?)"(?: on "([\w.\-]+)")?"#,
            Arc::new(ExecuteSql),
        )?
        .register(
            r#"I execute the SQL file "(.*?)"(?: on "([\w.\-]+)")?"#,
            Arc::new(ExecuteSqlFile),
        )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DbExecutor, SharedExecutor};
    use crate::lifecycle::{ResourceState, driver_key, marker_key};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingExecutor {
        statements: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DbExecutor for RecordingExecutor {
        async fn execute_sql(&self, sql: &str) -> anyhow::Result<()> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(())
        }
    }

    fn ready_store(executor: Arc<RecordingExecutor>, slot: &str) -> ScenarioStore {
        let mut store = ScenarioStore::new("sql");
        let shared: SharedExecutor = executor;
        store.set_named(driver_key(slot), Arc::new(DatabaseDriver::new(shared)));
        store.set_named(marker_key(slot), ResourceState::Ready);
        store
    }

    #[tokio::test]
    async fn sql_runs_on_the_default_and_named_slots() {
        let mut registry = StepRegistry::new();
        register(&mut registry).unwrap();
        let executor = Arc::new(RecordingExecutor::default());
        let mut store = ready_store(executor.clone(), "database");
        store.set_named(
            driver_key("reporting"),
            Arc::new(DatabaseDriver::new(executor.clone())),
        );
        store.set_named(marker_key("reporting"), ResourceState::Ready);
        let log = StepLogger::detached();

        registry
            .execute(r#"When I execute SQL "DELETE FROM orders""#, &mut store, &log)
            .await
            .unwrap();
        registry
            .execute(
                r#"And I execute SQL "SELECT 1" on "reporting""#,
                &mut store,
                &log,
            )
            .await
            .unwrap();
        assert_eq!(
            *executor.statements.lock().unwrap(),
            vec!["DELETE FROM orders".to_string(), "SELECT 1".to_string()]
        );
    }

    #[tokio::test]
    async fn sql_file_is_read_before_execution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.sql");
        std::fs::write(&path, "INSERT INTO orders VALUES (1)").unwrap();
        let mut registry = StepRegistry::new();
        register(&mut registry).unwrap();
        let executor = Arc::new(RecordingExecutor::default());
        let mut store = ready_store(executor.clone(), "database");

        let text = format!(r#"Given I execute the SQL file "{}""#, path.display());
        registry
            .execute(&text, &mut store, &StepLogger::detached())
            .await
            .unwrap();
        assert_eq!(executor.statements.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sql_file_goes_to_the_named_slot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.sql");
        std::fs::write(&path, "SELECT count(*) FROM orders").unwrap();
        let mut registry = StepRegistry::new();
        register(&mut registry).unwrap();
        let default_db = Arc::new(RecordingExecutor::default());
        let reporting = Arc::new(RecordingExecutor::default());
        let mut store = ready_store(default_db.clone(), "database");
        store.set_named(
            driver_key("reporting"),
            Arc::new(DatabaseDriver::new(reporting.clone())),
        );
        store.set_named(marker_key("reporting"), ResourceState::Ready);

        let text = format!(
            r#"When I execute the SQL file "{}" on "reporting""#,
            path.display()
        );
        registry
            .execute(&text, &mut store, &StepLogger::detached())
            .await
            .unwrap();
        assert!(default_db.statements.lock().unwrap().is_empty());
        assert_eq!(
            *reporting.statements.lock().unwrap(),
            vec!["SELECT count(*) FROM orders".to_string()]
        );
    }

    #[tokio::test]
    async fn sql_without_database_driver_is_not_initialized() {
        let mut registry = StepRegistry::new();
        register(&mut registry).unwrap();
        let mut store = ScenarioStore::new("no driver");
        let err = registry
            .execute(r#"When I execute SQL "SELECT 1""#, &mut store, &StepLogger::detached())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("database"));
    }
}
