use crate::driver::{
    DatabaseDriverFactory, DriverFactory, EmailDriverFactory, GenericDriverFactory,
    UiDriverFactory, WebServiceDriverFactory,
};
use crate::error::LifecycleError;
use crate::lifecycle::{LifecycleCoordinator, ResourceState, SetupPolicy};
use crate::store::ScenarioStore;
use async_trait::async_trait;
use std::sync::Arc;

/// 러너가 호출하는 시나리오 훅을 정의한다.
///
/// 구현체는 시나리오별 상태를 필드에 두지 않는다. 모든 상태는 인자로 전달되는
/// 저장소에 기록되므로 하나의 훅을 여러 병렬 시나리오가 공유해도 안전하다.
#[async_trait]
pub trait ScenarioHook: Send + Sync {
    /// 훅(바인딩 클래스) 이름이다.
    fn name(&self) -> &str;

    /// 시나리오 필터 태그이다. `None`이면 모든 시나리오에 적용된다.
    fn tag(&self) -> Option<&str>;

    /// 시나리오 태그 목록에 이 훅이 적용되는지 판단한다.
    fn applies_to(&self, scenario_tags: &[String]) -> bool {
        match self.tag() {
            None => true,
            Some(tag) => scenario_tags.iter().any(|candidate| tag_matches(tag, candidate)),
        }
    }

    /// 각 Step 실행 전에 호출된다.
    async fn before_step(&self, store: &mut ScenarioStore) -> Result<(), LifecycleError>;

    /// 시나리오 종료 후 한 번 호출된다. 정리를 수행했으면 `true`를 반환한다.
    async fn after_scenario(&self, store: &mut ScenarioStore) -> Result<bool, LifecycleError>;

    /// 생성 실패 후 다음 Step의 `before_step`에서 다시 생성을 시도할 수 있는지 판단한다.
    fn can_retry_setup(&self, _store: &ScenarioStore) -> bool {
        false
    }
}

/// 태그 비교 시 앞의 `@`와 대소문자를 무시한다.
pub fn tag_matches(expected: &str, candidate: &str) -> bool {
    let normalize = |tag: &str| tag.trim().trim_start_matches('@').to_ascii_lowercase();
    normalize(expected) == normalize(candidate)
}

/// 한 종류의 드라이버를 Step 정의에 노출하는 바인딩이다.
///
/// 같은 드라이버 슬롯을 참조하는 바인딩이 여러 개여도 드라이버는 시나리오당
/// 한 번만 생성되고, 먼저 실행된 바인딩의 훅이 생성을 담당한다.
pub struct StepBinding<F: DriverFactory> {
    /// 바인딩 이름이다.
    name: String,
    /// 시나리오 필터 태그이다.
    tag: Option<String>,
    /// 공유 드라이버 조율자이다.
    coordinator: LifecycleCoordinator<F>,
}

impl<F: DriverFactory> StepBinding<F> {
    /// 바인딩을 생성한다. 드라이버 슬롯 이름은 팩토리의 드라이버 종류 이름을 사용한다.
    pub fn new(name: impl Into<String>, factory: Arc<F>) -> Self {
        let slot = factory.kind().as_str();
        Self::with_slot(name, slot, factory)
    }

    /// 드라이버 슬롯 이름을 지정하여 바인딩을 생성한다.
    pub fn with_slot(name: impl Into<String>, slot: impl Into<String>, factory: Arc<F>) -> Self {
        Self {
            name: name.into(),
            tag: None,
            coordinator: LifecycleCoordinator::new(slot, factory),
        }
    }

    /// 시나리오 필터 태그를 지정한다.
    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// 드라이버 생성 재시도 정책을 지정한다.
    pub fn with_policy(mut self, policy: SetupPolicy) -> Self {
        self.coordinator = self.coordinator.with_policy(policy);
        self
    }

    /// 드라이버 슬롯 이름을 반환한다.
    pub fn slot(&self) -> &str {
        self.coordinator.slot()
    }

    /// 공유 드라이버를 반환한다. 생성 전이면 [`LifecycleError::NotInitialized`]이다.
    pub fn driver(&self, store: &ScenarioStore) -> Result<Arc<F::Driver>, LifecycleError> {
        self.coordinator.driver(store)
    }

    /// 내부 조율자를 반환한다.
    pub fn coordinator(&self) -> &LifecycleCoordinator<F> {
        &self.coordinator
    }
}

#[async_trait]
impl<F: DriverFactory> ScenarioHook for StepBinding<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    async fn before_step(&self, store: &mut ScenarioStore) -> Result<(), LifecycleError> {
        self.coordinator.ensure_setup(store).await.map(|_| ())
    }

    async fn after_scenario(&self, store: &mut ScenarioStore) -> Result<bool, LifecycleError> {
        self.coordinator.teardown_if_needed(store).await
    }

    fn can_retry_setup(&self, store: &ScenarioStore) -> bool {
        self.coordinator.state(store) == ResourceState::NotStarted
            && self
                .coordinator
                .policy()
                .allows_attempt(self.coordinator.failed_attempts(store))
    }
}

/// UI(WebDriver) 드라이버 바인딩이다.
pub type UiSteps = StepBinding<UiDriverFactory>;
/// 웹 서비스 드라이버 바인딩이다.
pub type WebServiceSteps = StepBinding<WebServiceDriverFactory>;
/// 데이터베이스 드라이버 바인딩이다.
pub type DatabaseSteps = StepBinding<DatabaseDriverFactory>;
/// 메일 드라이버 바인딩이다.
pub type EmailSteps = StepBinding<EmailDriverFactory>;
/// 외부 드라이버 없는 기본 바인딩이다.
pub type GenericSteps = StepBinding<GenericDriverFactory>;

/// 러너가 보관하는 훅 목록 타입이다.
pub type SharedHook = Arc<dyn ScenarioHook>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::GenericDriver;

    fn generic_binding(name: &str) -> GenericSteps {
        StepBinding::new(name, Arc::new(GenericDriverFactory::new("base")))
    }

    #[test]
    fn tag_matching_ignores_at_sign_and_case() {
        assert!(tag_matches("@ui", "UI"));
        assert!(tag_matches("database", "@Database"));
        assert!(!tag_matches("@ui", "email"));
    }

    #[test]
    fn untagged_binding_applies_everywhere() {
        let binding = generic_binding("Common");
        assert!(binding.applies_to(&[]));
        let tagged = generic_binding("Ui").tagged("@ui");
        assert!(!tagged.applies_to(&[]));
        assert!(tagged.applies_to(&["smoke".into(), "ui".into()]));
    }

    #[tokio::test]
    async fn bindings_on_the_same_slot_share_one_driver() {
        let factory = Arc::new(GenericDriverFactory::new("base"));
        let a = StepBinding::new("A", factory.clone());
        let b = StepBinding::new("B", factory);
        let mut store = ScenarioStore::new("shared");

        assert!(matches!(
            a.driver(&store),
            Err(LifecycleError::NotInitialized { .. })
        ));
        a.before_step(&mut store).await.unwrap();
        b.before_step(&mut store).await.unwrap();
        let from_a: Arc<GenericDriver> = a.driver(&store).unwrap();
        let from_b: Arc<GenericDriver> = b.driver(&store).unwrap();
        assert!(Arc::ptr_eq(&from_a, &from_b));

        assert!(b.after_scenario(&mut store).await.unwrap());
        assert!(!a.after_scenario(&mut store).await.unwrap());
    }

    #[test]
    fn retry_is_offered_only_before_setup_and_within_policy() {
        let binding = generic_binding("Ui").with_policy(SetupPolicy::FailFast);
        let mut store = ScenarioStore::new("retry check");
        assert!(binding.can_retry_setup(&store));
        store.set_named(crate::lifecycle::attempts_key("generic"), 1_u32);
        assert!(!binding.can_retry_setup(&store));
    }
}
