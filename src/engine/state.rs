use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Step의 실행 상태를 표현한다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum StepStatus {
    /// 아직 실행 대기 상태.
    Pending,
    /// 실행 중.
    Running,
    /// 정상 종료.
    Passed,
    /// 실패와 함께 오류 메시지를 포함한다.
    Failed(String),
    /// 앞선 실패나 중단으로 실행하지 않았다.
    Skipped(String),
}

impl StepStatus {
    /// 실패 상태인지 여부를 반환한다.
    pub fn is_failed(&self) -> bool {
        matches!(self, StepStatus::Failed(_))
    }
}

/// Step 하나의 실행 결과이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    /// 치환이 끝난 Step 문장.
    pub text: String,
    /// 최종 상태.
    #[serde(flatten)]
    pub status: StepStatus,
    /// 실행 시간(밀리초).
    pub duration_ms: u64,
    /// Step 실행 중 남긴 로그.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

/// 시나리오 최종 결과이다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioOutcome {
    /// 모든 Step과 정리가 성공했다.
    Passed,
    /// Step 또는 드라이버 정리가 실패했다.
    Failed,
    /// 실행 도중 중단되었다.
    Cancelled,
}

/// 시나리오 하나의 실행 결과이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// 시나리오 이름.
    pub name: String,
    /// 시나리오 태그.
    pub tags: Vec<String>,
    /// 최종 결과.
    pub outcome: ScenarioOutcome,
    /// 시나리오를 실패로 만든 첫 번째 오류.
    pub error: Option<String>,
    /// Step별 결과.
    pub steps: Vec<StepReport>,
    /// 재시도 전에 실패한 드라이버 생성 시도. 복구된 경우에도 남는다.
    #[serde(default)]
    pub setup_failures: Vec<String>,
    /// 드라이버 정리 실패 목록.
    #[serde(default)]
    pub teardown_errors: Vec<String>,
    /// 시작 시각.
    pub started_at: DateTime<Utc>,
    /// 정리까지 포함한 실행 시간(밀리초).
    pub duration_ms: u64,
}

impl ScenarioReport {
    /// 통과 여부를 반환한다.
    pub fn passed(&self) -> bool {
        self.outcome == ScenarioOutcome::Passed
    }
}

/// 스위트 전체 실행 결과이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    /// 스위트 이름.
    pub suite: String,
    /// 시작 시각.
    pub started_at: DateTime<Utc>,
    /// 전체 실행 시간(밀리초).
    pub duration_ms: u64,
    /// 통과한 시나리오 수.
    pub passed: usize,
    /// 통과하지 못한 시나리오 수.
    pub failed: usize,
    /// 스위트에 정의된 순서대로 정렬된 시나리오 결과.
    pub scenarios: Vec<ScenarioReport>,
}

impl SuiteReport {
    /// 시나리오 결과로 보고서를 만든다.
    pub fn new(
        suite: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        scenarios: Vec<ScenarioReport>,
    ) -> Self {
        let passed = scenarios.iter().filter(|s| s.passed()).count();
        Self {
            suite: suite.into(),
            started_at,
            duration_ms,
            passed,
            failed: scenarios.len() - passed,
            scenarios,
        }
    }

    /// 모든 시나리오가 통과했는지 여부를 반환한다.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// 보고서를 JSON 파일로 기록한다.
pub async fn write_report(report: &SuiteReport, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("보고서 디렉터리 생성 실패: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report).context("보고서 직렬화 실패")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("보고서 쓰기 실패: {}", path.display()))?;
    Ok(())
}
