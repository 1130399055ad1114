use super::{StepLogger, StepRegistry, arg};
use crate::error::SuiteError;
use crate::lifecycle::{ResourceState, resource_state};
use crate::store::ScenarioStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Step에서 저장한 문자열 값의 저장소 키 접두사이다.
pub const VALUE_KEY_PREFIX: &str = "stepflow.value.";

/// 이름 있는 값의 저장소 키를 만든다.
pub fn value_key(name: &str) -> String {
    format!("{VALUE_KEY_PREFIX}{name}")
}

/// 대기 Step이다. 시간 초과와 중단은 러너가 처리한다.
struct WaitStep;

#[async_trait]
impl super::StepHandler for WaitStep {
    async fn run(
        &self,
        _store: &mut ScenarioStore,
        args: &[String],
        log: &StepLogger,
    ) -> anyhow::Result<()> {
        let amount: u64 = arg(args, 0)?.parse()?;
        let duration = match arg(args, 1)? {
            "ms" | "milliseconds" => Duration::from_millis(amount),
            _ => Duration::from_secs(amount),
        };
        log.line(format!("{}ms 대기", duration.as_millis()));
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

pub(super) fn register(registry: &mut StepRegistry) -> Result<(), SuiteError> {
    registry
        .register_fn(r#"I store "(.*?)" as "([\w.\-]+)""#, |store, args| {
            store.set_named(value_key(arg(args, 1)?), arg(args, 0)?.to_string());
            Ok(())
        })?
        .register_fn(
            r#"the value "([\w.\-]+)" (?:is|should be|equals) "(.*)""#,
            |store, args| {
                let name = arg(args, 0)?;
                let expected = arg(args, 1)?;
                let actual = store.get_named::<String>(&value_key(name))?;
                if actual != expected {
                    anyhow::bail!("값 '{name}' 불일치: 기대값 '{expected}', 실제값 '{actual}'");
                }
                Ok(())
            },
        )?
        .register(
            r"I wait (\d+) (ms|milliseconds|seconds?)",
            Arc::new(WaitStep),
        )?
        .register_fn(
            r#"the "([\w.\-]+)" driver (?:is|should be) (ready|torn down|not started)"#,
            |store, args| {
                let slot = arg(args, 0)?;
                let expected = match arg(args, 1)? {
                    "ready" => ResourceState::Ready,
                    "torn down" => ResourceState::TornDown,
                    _ => ResourceState::NotStarted,
                };
                let actual = resource_state(store, slot);
                if actual != expected {
                    anyhow::bail!(
                        "드라이버 '{slot}' 상태 불일치: 기대값 {expected:?}, 실제값 {actual:?}"
                    );
                }
                Ok(())
            },
        )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::marker_key;

    fn registry() -> StepRegistry {
        let mut registry = StepRegistry::new();
        register(&mut registry).unwrap();
        registry
    }

    #[tokio::test]
    async fn stored_values_can_be_asserted() {
        let registry = registry();
        let mut store = ScenarioStore::new("values");
        let log = StepLogger::detached();
        registry
            .execute(r#"Given I store "A-100" as "order.id""#, &mut store, &log)
            .await
            .unwrap();
        registry
            .execute(r#"Then the value "order.id" is "A-100""#, &mut store, &log)
            .await
            .unwrap();
        assert!(registry
            .execute(r#"Then the value "order.id" is "B-200""#, &mut store, &log)
            .await
            .is_err());
        assert!(registry
            .execute(r#"Then the value "missing" is "x""#, &mut store, &log)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn stored_value_may_contain_quotes() {
        let registry = registry();
        let mut store = ScenarioStore::new("quotes");
        registry
            .execute(
                r#"Given I store "say "hi" as "x"" as "greeting""#,
                &mut store,
                &StepLogger::detached(),
            )
            .await
            .unwrap();
        assert_eq!(
            store.get_named::<String>(&value_key("greeting")).unwrap(),
            r#"say "hi" as "x""#
        );
    }

    #[tokio::test]
    async fn driver_state_step_reads_the_marker() {
        let registry = registry();
        let mut store = ScenarioStore::new("state");
        let log = StepLogger::detached();
        registry
            .execute(r#"Then the "ui" driver is not started"#, &mut store, &log)
            .await
            .unwrap();
        store.set_named(marker_key("ui"), ResourceState::Ready);
        registry
            .execute(r#"Then the "ui" driver is ready"#, &mut store, &log)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_step_logs_its_duration() {
        let registry = registry();
        let mut store = ScenarioStore::new("wait");
        let log = StepLogger::detached();
        registry
            .execute("When I wait 5 ms", &mut store, &log)
            .await
            .unwrap();
        assert_eq!(log.lines(), vec!["5ms 대기".to_string()]);
    }
}
