//! 시나리오 단위로 테스트 드라이버를 한 번 생성하고 한 번 정리하는 BDD 실행기이다.
//!
//! 시나리오마다 [`ScenarioStore`]가 만들어지고, 태그가 맞는 [`StepBinding`]의
//! 훅이 Step마다 호출된다. 첫 번째 훅이 드라이버를 생성해 저장소에 기록하면
//! 나머지 바인딩은 같은 드라이버를 공유하며, 시나리오가 끝나면 드라이버는
//! 생성된 경우에만 정확히 한 번 정리된다.

pub mod binding;
pub mod driver;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod store;
pub mod suite;

pub use binding::{
    DatabaseSteps, EmailSteps, GenericSteps, ScenarioHook, SharedHook, StepBinding, UiSteps,
    WebServiceSteps, tag_matches,
};
pub use driver::{DriverFactory, DriverKind};
pub use engine::{EngineEvent, ScenarioOutcome, StepRegistry, SuiteReport, SuiteRunner};
pub use error::{LifecycleError, StoreError, SuiteError};
pub use lifecycle::{LifecycleCoordinator, ResourceState, SetupPolicy, shared_driver};
pub use store::ScenarioStore;
pub use suite::{Suite, load_suite_from_file, load_suite_from_reader};
