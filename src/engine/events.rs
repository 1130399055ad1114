use super::state::{ScenarioOutcome, StepStatus};

/// 러너에서 CLI 등 소비자로 전달되는 주요 이벤트 모델이다.
///
/// 병렬 실행 중에는 여러 시나리오의 이벤트가 섞여 도착하므로 모든 이벤트에
/// 시나리오 이름이 포함된다.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// 시나리오 시작 알림.
    ScenarioStarted { scenario: String, tags: Vec<String> },
    /// Step 시작 알림.
    StepStarted {
        scenario: String,
        step: usize,
        text: String,
    },
    /// Step별 로그 라인.
    StepLog {
        scenario: String,
        step: usize,
        line: String,
    },
    /// Step 종료 알림.
    StepFinished {
        scenario: String,
        step: usize,
        status: StepStatus,
    },
    /// 시나리오 종료 알림. 드라이버 정리까지 끝난 뒤 전송된다.
    ScenarioFinished {
        scenario: String,
        outcome: ScenarioOutcome,
    },
    /// 전체 스위트 종료.
    SuiteFinished { passed: usize, failed: usize },
}
