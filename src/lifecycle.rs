use crate::driver::DriverFactory;
use crate::error::LifecycleError;
use crate::store::ScenarioStore;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 생성된 드라이버를 저장하는 키 접두사이다.
pub const DRIVER_KEY_PREFIX: &str = "stepflow.driver.";
/// 생성 완료 마커를 저장하는 키 접두사이다.
pub const SETUP_MARKER_PREFIX: &str = "stepflow.setup.";
/// 실패한 생성 시도 횟수를 저장하는 키 접두사이다.
pub const ATTEMPTS_KEY_PREFIX: &str = "stepflow.attempts.";

/// 드라이버 슬롯의 저장소 키를 만든다.
pub fn driver_key(slot: &str) -> String {
    format!("{DRIVER_KEY_PREFIX}{slot}")
}

/// 드라이버 슬롯의 생성 마커 키를 만든다.
pub fn marker_key(slot: &str) -> String {
    format!("{SETUP_MARKER_PREFIX}{slot}")
}

/// 드라이버 슬롯의 실패 횟수 키를 만든다.
pub fn attempts_key(slot: &str) -> String {
    format!("{ATTEMPTS_KEY_PREFIX}{slot}")
}

/// 시나리오 내 공유 드라이버의 상태이다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// 아직 생성되지 않았다. 마커가 없는 상태이다.
    NotStarted,
    /// 생성이 끝나 Step에서 사용할 수 있다.
    Ready,
    /// 정리가 끝났다. 종료 상태이다.
    TornDown,
}

/// 드라이버 생성 실패 후 다음 Step에서의 재시도 정책이다.
///
/// YAML에서는 `fail_fast`, `retry`, `{type: retry, max_attempts: 5}`,
/// `{retry: {max_attempts: 5}}` 형태를 모두 받는다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupPolicy {
    /// 한 번 실패하면 같은 시나리오에서 다시 생성하지 않는다.
    FailFast,
    /// 다음 Step의 훅에서 최대 `max_attempts`회까지 생성을 시도한다.
    Retry { max_attempts: u32 },
}

impl Default for SetupPolicy {
    /// 기본 정책은 최대 3회 시도이다.
    fn default() -> Self {
        SetupPolicy::Retry { max_attempts: 3 }
    }
}

impl SetupPolicy {
    /// 이미 `failed`번 실패한 상태에서 다시 시도할 수 있는지 판단한다.
    pub fn allows_attempt(&self, failed: u32) -> bool {
        match self {
            SetupPolicy::FailFast => failed == 0,
            SetupPolicy::Retry { max_attempts } => failed < (*max_attempts).max(1),
        }
    }

    /// 생성 실패 후에도 다음 Step이 재시도할 수 있는지 여부를 반환한다.
    pub fn retries(&self) -> bool {
        !matches!(self, SetupPolicy::FailFast)
    }
}

impl Serialize for SetupPolicy {
    /// `fail_fast`는 문자열로, `retry`는 `type`/`max_attempts` 구조체로 직렬화한다.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            SetupPolicy::FailFast => serializer.serialize_str("fail_fast"),
            SetupPolicy::Retry { max_attempts } => {
                let mut state = serializer.serialize_struct("SetupPolicy", 2)?;
                state.serialize_field("type", "retry")?;
                state.serialize_field("max_attempts", max_attempts)?;
                state.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for SetupPolicy {
    /// 문자열 또는 구조체 형태의 설정을 모두 지원하도록 역직렬화한다.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RetryOptions {
            #[serde(default)]
            max_attempts: Option<u32>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Helper {
            Simple(String),
            Detailed {
                #[serde(rename = "type")]
                policy_type: String,
                max_attempts: Option<u32>,
            },
            Nested {
                retry: RetryOptions,
            },
        }

        let (policy_type, max_attempts) = match Helper::deserialize(deserializer)? {
            Helper::Simple(value) => (value, None),
            Helper::Detailed {
                policy_type,
                max_attempts,
            } => (policy_type, max_attempts),
            Helper::Nested { retry } => ("retry".to_string(), retry.max_attempts),
        };
        match policy_type.as_str() {
            "fail_fast" => Ok(SetupPolicy::FailFast),
            "retry" => Ok(SetupPolicy::Retry {
                max_attempts: max_attempts.unwrap_or(3),
            }),
            other => Err(de::Error::custom(format!(
                "알 수 없는 setup policy: {other}"
            ))),
        }
    }
}

/// 저장소에 기록된 슬롯의 상태를 조회한다.
pub fn resource_state(store: &ScenarioStore, slot: &str) -> ResourceState {
    store
        .get_named::<ResourceState>(&marker_key(slot))
        .copied()
        .unwrap_or(ResourceState::NotStarted)
}

/// 저장소에서 공유 드라이버를 꺼낸다.
///
/// 생성 전이면 [`LifecycleError::NotInitialized`], 정리 후면
/// [`LifecycleError::TornDown`]을 반환한다. null 핸들을 돌려주는 경우는 없다.
pub fn shared_driver<D: Send + Sync + 'static>(
    store: &ScenarioStore,
    slot: &str,
) -> Result<Arc<D>, LifecycleError> {
    match resource_state(store, slot) {
        ResourceState::NotStarted => Err(LifecycleError::NotInitialized {
            slot: slot.to_string(),
        }),
        ResourceState::TornDown => Err(LifecycleError::TornDown {
            slot: slot.to_string(),
        }),
        ResourceState::Ready => Ok(store.get_named::<Arc<D>>(&driver_key(slot))?.clone()),
    }
}

/// 시나리오 단위 공유 드라이버의 생성과 정리를 조율한다.
///
/// 조율자는 팩토리와 정책만 가지며 시나리오 상태는 모두 [`ScenarioStore`]에
/// 기록한다. 따라서 Step 바인딩이 Step마다 새로 만들어져도 이전 생성 여부를
/// 저장소 마커로 확인할 수 있다.
///
/// 전제 조건: 한 시나리오의 Step은 순차적으로 실행된다. 같은 저장소에 대해
/// `ensure_setup`/`teardown_if_needed`를 동시에 호출하지 않으므로 별도 잠금은 없다.
/// `&mut ScenarioStore`를 요구하므로 이 전제는 컴파일 시점에 강제된다.
pub struct LifecycleCoordinator<F: DriverFactory> {
    /// 저장소 키에 사용하는 드라이버 슬롯 이름이다.
    slot: String,
    /// 드라이버 생성/정리 팩토리이다.
    factory: Arc<F>,
    /// 생성 실패 시 재시도 정책이다.
    policy: SetupPolicy,
}

impl<F: DriverFactory> Clone for LifecycleCoordinator<F> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            factory: self.factory.clone(),
            policy: self.policy,
        }
    }
}

impl<F: DriverFactory> LifecycleCoordinator<F> {
    /// 슬롯 이름과 팩토리로 조율자를 생성한다.
    pub fn new(slot: impl Into<String>, factory: Arc<F>) -> Self {
        Self {
            slot: slot.into(),
            factory,
            policy: SetupPolicy::default(),
        }
    }

    /// 재시도 정책을 지정한다.
    pub fn with_policy(mut self, policy: SetupPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 드라이버 슬롯 이름을 반환한다.
    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// 재시도 정책을 반환한다.
    pub fn policy(&self) -> SetupPolicy {
        self.policy
    }

    /// 현재 슬롯 상태를 반환한다.
    pub fn state(&self, store: &ScenarioStore) -> ResourceState {
        resource_state(store, &self.slot)
    }

    /// 이 시나리오에서 실패한 생성 시도 횟수를 반환한다.
    pub fn failed_attempts(&self, store: &ScenarioStore) -> u32 {
        store
            .get_named::<u32>(&attempts_key(&self.slot))
            .copied()
            .unwrap_or(0)
    }

    /// 드라이버가 준비되어 있음을 보장한다.
    ///
    /// 이미 준비된 경우 기존 드라이버를 그대로 반환한다. 처음 호출되면 팩토리로
    /// 드라이버를 만들고 저장소에 드라이버를 기록한 뒤 마지막에 마커를 기록한다.
    /// 생성이 실패하면 마커는 남지 않으며, 정책이 허용하는 한 다음 호출에서
    /// 다시 생성을 시도한다.
    pub async fn ensure_setup(
        &self,
        store: &mut ScenarioStore,
    ) -> Result<Arc<F::Driver>, LifecycleError> {
        match self.state(store) {
            ResourceState::Ready => return self.driver(store),
            ResourceState::TornDown => {
                return Err(LifecycleError::TornDown {
                    slot: self.slot.clone(),
                });
            }
            ResourceState::NotStarted => {}
        }
        let failed = self.failed_attempts(store);
        if !self.policy.allows_attempt(failed) {
            return Err(LifecycleError::SetupExhausted {
                slot: self.slot.clone(),
                attempts: failed,
            });
        }
        let attempt = failed + 1;
        info!(
            scenario = store.scenario_name(),
            driver = %self.slot,
            kind = %self.factory.kind(),
            attempt,
            "드라이버 생성 시작"
        );
        match self.factory.construct().await {
            Ok(driver) => {
                let driver = Arc::new(driver);
                store.set_named(driver_key(&self.slot), driver.clone());
                store.set_named(marker_key(&self.slot), ResourceState::Ready);
                info!(
                    scenario = store.scenario_name(),
                    driver = %self.slot,
                    "드라이버 준비 완료"
                );
                Ok(driver)
            }
            Err(source) => {
                store.set_named(attempts_key(&self.slot), attempt);
                warn!(
                    scenario = store.scenario_name(),
                    driver = %self.slot,
                    attempt,
                    retry = self.policy.allows_attempt(attempt),
                    "드라이버 생성 실패: {source:#}"
                );
                Err(LifecycleError::SetupFailure {
                    slot: self.slot.clone(),
                    attempt,
                    source,
                })
            }
        }
    }

    /// 생성된 드라이버가 있으면 정확히 한 번 정리한다.
    ///
    /// # 반환값
    /// 이번 호출에서 정리를 수행했으면 `true`, 생성된 적이 없거나 이미 정리되었으면
    /// `false`를 반환한다. 정리 실패 시에도 상태는 `TornDown`으로 남아 재정리하지 않는다.
    pub async fn teardown_if_needed(
        &self,
        store: &mut ScenarioStore,
    ) -> Result<bool, LifecycleError> {
        match self.state(store) {
            ResourceState::NotStarted => {
                debug!(
                    scenario = store.scenario_name(),
                    driver = %self.slot,
                    "생성되지 않은 드라이버는 정리하지 않음"
                );
                return Ok(false);
            }
            ResourceState::TornDown => return Ok(false),
            ResourceState::Ready => {}
        }
        store.set_named(marker_key(&self.slot), ResourceState::TornDown);
        let driver = store.take_named::<Arc<F::Driver>>(&driver_key(&self.slot))?;
        info!(
            scenario = store.scenario_name(),
            driver = %self.slot,
            "드라이버 정리 시작"
        );
        if let Err(source) = self.factory.dispose(&driver).await {
            error!(
                scenario = store.scenario_name(),
                driver = %self.slot,
                "드라이버 정리 실패: {source:#}"
            );
            return Err(LifecycleError::TeardownFailure {
                slot: self.slot.clone(),
                source,
            });
        }
        Ok(true)
    }

    /// 준비된 드라이버를 반환한다.
    pub fn driver(&self, store: &ScenarioStore) -> Result<Arc<F::Driver>, LifecycleError> {
        shared_driver::<F::Driver>(store, &self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverKind;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 생성/정리 호출 횟수를 기록하고 지정한 횟수만큼 생성을 실패시키는 팩토리이다.
    #[derive(Default)]
    struct CountingFactory {
        constructed: AtomicU32,
        disposed: AtomicU32,
        construct_failures: Mutex<VecDeque<&'static str>>,
        fail_dispose: bool,
    }

    impl CountingFactory {
        fn failing_first(times: usize) -> Self {
            let factory = Self::default();
            {
                let mut queue = factory.construct_failures.lock().unwrap();
                for _ in 0..times {
                    queue.push_back("브라우저 실행 실패");
                }
            }
            factory
        }
    }

    #[async_trait]
    impl DriverFactory for CountingFactory {
        type Driver = u32;

        fn kind(&self) -> DriverKind {
            DriverKind::Generic
        }

        async fn construct(&self) -> anyhow::Result<u32> {
            if let Some(reason) = self.construct_failures.lock().unwrap().pop_front() {
                anyhow::bail!(reason);
            }
            Ok(self.constructed.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn dispose(&self, _driver: &u32) -> anyhow::Result<()> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            if self.fail_dispose {
                anyhow::bail!("프로세스 종료 실패");
            }
            Ok(())
        }
    }

    fn coordinator(factory: &Arc<CountingFactory>) -> LifecycleCoordinator<CountingFactory> {
        LifecycleCoordinator::new("driver", factory.clone())
    }

    #[tokio::test]
    async fn ensure_setup_is_idempotent() {
        let factory = Arc::new(CountingFactory::default());
        let mut store = ScenarioStore::new("idempotent");
        let first = coordinator(&factory).ensure_setup(&mut store).await.unwrap();
        let second = coordinator(&factory).ensure_setup(&mut store).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator(&factory).state(&store), ResourceState::Ready);
    }

    #[tokio::test]
    async fn teardown_without_setup_is_a_no_op() {
        let factory = Arc::new(CountingFactory::default());
        let mut store = ScenarioStore::new("no setup");
        let torn = coordinator(&factory)
            .teardown_if_needed(&mut store)
            .await
            .unwrap();
        assert!(!torn);
        assert_eq!(factory.disposed.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator(&factory).state(&store), ResourceState::NotStarted);
    }

    #[tokio::test]
    async fn teardown_runs_once() {
        let factory = Arc::new(CountingFactory::default());
        let mut store = ScenarioStore::new("teardown once");
        coordinator(&factory).ensure_setup(&mut store).await.unwrap();
        assert!(coordinator(&factory).teardown_if_needed(&mut store).await.unwrap());
        assert!(!coordinator(&factory).teardown_if_needed(&mut store).await.unwrap());
        assert_eq!(factory.disposed.load(Ordering::SeqCst), 1);
        assert!(!store.contains_key(&driver_key("driver")));
    }

    #[tokio::test]
    async fn torn_down_resource_is_never_reused() {
        let factory = Arc::new(CountingFactory::default());
        let mut store = ScenarioStore::new("terminal");
        let coordinator = coordinator(&factory);
        coordinator.ensure_setup(&mut store).await.unwrap();
        coordinator.teardown_if_needed(&mut store).await.unwrap();
        assert!(matches!(
            coordinator.ensure_setup(&mut store).await,
            Err(LifecycleError::TornDown { .. })
        ));
        assert!(matches!(
            coordinator.driver(&store),
            Err(LifecycleError::TornDown { .. })
        ));
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn driver_access_before_setup_fails_fast() {
        let factory = Arc::new(CountingFactory::default());
        let store = ScenarioStore::new("not initialized");
        assert!(matches!(
            coordinator(&factory).driver(&store),
            Err(LifecycleError::NotInitialized { .. })
        ));
    }

    #[tokio::test]
    async fn failed_setup_leaves_no_marker_and_retries() {
        let factory = Arc::new(CountingFactory::failing_first(1));
        let mut store = ScenarioStore::new("retry");
        let coordinator = coordinator(&factory);
        let err = coordinator.ensure_setup(&mut store).await.unwrap_err();
        assert!(err.is_setup_failure());
        assert_eq!(coordinator.state(&store), ResourceState::NotStarted);
        assert!(!store.contains_key(&driver_key("driver")));
        assert_eq!(coordinator.failed_attempts(&store), 1);

        coordinator.ensure_setup(&mut store).await.unwrap();
        assert_eq!(coordinator.state(&store), ResourceState::Ready);
        coordinator.teardown_if_needed(&mut store).await.unwrap();
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 1);
        assert_eq!(factory.disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fail_fast_policy_never_reconstructs() {
        let factory = Arc::new(CountingFactory::failing_first(1));
        let mut store = ScenarioStore::new("fail fast");
        let coordinator = coordinator(&factory).with_policy(SetupPolicy::FailFast);
        assert!(coordinator.ensure_setup(&mut store).await.is_err());
        assert!(matches!(
            coordinator.ensure_setup(&mut store).await,
            Err(LifecycleError::SetupExhausted { attempts: 1, .. })
        ));
        assert_eq!(factory.constructed.load(Ordering::SeqCst), 0);
        assert!(!coordinator.teardown_if_needed(&mut store).await.unwrap());
        assert_eq!(factory.disposed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retry_policy_stops_at_limit() {
        let factory = Arc::new(CountingFactory::failing_first(5));
        let mut store = ScenarioStore::new("limit");
        let coordinator =
            coordinator(&factory).with_policy(SetupPolicy::Retry { max_attempts: 2 });
        assert!(coordinator.ensure_setup(&mut store).await.unwrap_err().is_setup_failure());
        assert!(coordinator.ensure_setup(&mut store).await.unwrap_err().is_setup_failure());
        assert!(matches!(
            coordinator.ensure_setup(&mut store).await,
            Err(LifecycleError::SetupExhausted { attempts: 2, .. })
        ));
        assert_eq!(factory.construct_failures.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_dispose_is_reported_and_not_repeated() {
        let factory = Arc::new(CountingFactory {
            fail_dispose: true,
            ..Default::default()
        });
        let mut store = ScenarioStore::new("dispose failure");
        let coordinator = coordinator(&factory);
        coordinator.ensure_setup(&mut store).await.unwrap();
        assert!(matches!(
            coordinator.teardown_if_needed(&mut store).await,
            Err(LifecycleError::TeardownFailure { .. })
        ));
        assert!(!coordinator.teardown_if_needed(&mut store).await.unwrap());
        assert_eq!(factory.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state(&store), ResourceState::TornDown);
    }

    #[test]
    fn setup_policy_accepts_string_and_struct_forms() {
        let simple: SetupPolicy = serde_yaml::from_str("fail_fast").unwrap();
        assert_eq!(simple, SetupPolicy::FailFast);
        let default_retry: SetupPolicy = serde_yaml::from_str("retry").unwrap();
        assert_eq!(default_retry, SetupPolicy::Retry { max_attempts: 3 });
        let detailed: SetupPolicy =
            serde_yaml::from_str("type: retry\nmax_attempts: 5\n").unwrap();
        assert_eq!(detailed, SetupPolicy::Retry { max_attempts: 5 });
        let nested: SetupPolicy = serde_yaml::from_str("retry:\n  max_attempts: 2\n").unwrap();
        assert_eq!(nested, SetupPolicy::Retry { max_attempts: 2 });
        assert!(serde_yaml::from_str::<SetupPolicy>("forever").is_err());
    }

    #[test]
    fn setup_policy_survives_a_yaml_round_trip() {
        for policy in [SetupPolicy::FailFast, SetupPolicy::Retry { max_attempts: 7 }] {
            let yaml = serde_yaml::to_string(&policy).unwrap();
            let parsed: SetupPolicy = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(parsed, policy, "{yaml}");
        }
    }
}
