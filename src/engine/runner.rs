use super::context::ExecutionContext;
use super::events::EngineEvent;
use super::state::{ScenarioOutcome, ScenarioReport, StepReport, StepStatus, SuiteReport};
use super::steps::{StepLogger, StepRegistry, value_key};
use crate::binding::SharedHook;
use crate::error::SuiteError;
use crate::store::ScenarioStore;
use crate::suite::{ScenarioDef, Suite};
use chrono::Utc;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Step 하나의 실행 결과를 표현한다.
#[derive(Debug)]
enum StepRunResult {
    /// 실행 성공.
    Passed,
    /// 드라이버 생성 실패. `retryable`이면 다음 Step이 다시 생성을 시도한다.
    SetupFailed { message: String, retryable: bool },
    /// 오류 메시지와 함께 실패.
    Failed(String),
    /// 실행 도중 중단되었다.
    Cancelled,
}

/// 시나리오를 실행하고 드라이버 훅을 호출하는 러너이다.
///
/// 시나리오마다 새 [`ScenarioStore`]를 만들고, 태그가 맞는 훅에 대해 Step마다
/// `before_step`을, 마지막에 `after_scenario`를 호출한다. 훅은 상태를 갖지 않으므로
/// 병렬로 실행되는 시나리오가 같은 훅 목록을 공유한다.
#[derive(Clone)]
pub struct SuiteRunner {
    /// Step 정의 목록.
    registry: Arc<StepRegistry>,
    /// 드라이버 바인딩 훅. 시나리오 태그로 걸러서 사용한다.
    hooks: Vec<SharedHook>,
    /// `${VAR}` 치환에 쓰는 스위트 변수.
    context: ExecutionContext,
    /// 동시에 실행할 시나리오 수.
    parallelism: usize,
    /// Step 핸들러 하나의 제한 시간.
    step_timeout: Duration,
    /// 지정하면 이 태그가 있는 시나리오만 실행한다.
    tag_filter: Option<String>,
    /// 실행 이벤트를 받을 채널.
    sender: Option<UnboundedSender<EngineEvent>>,
    /// 실행 중단 신호.
    cancel: CancellationToken,
}

impl SuiteRunner {
    /// Step 레지스트리와 훅 목록으로 러너를 만든다.
    pub fn new(registry: impl Into<Arc<StepRegistry>>, hooks: Vec<SharedHook>) -> Self {
        Self {
            registry: registry.into(),
            hooks,
            context: ExecutionContext::new(),
            parallelism: 1,
            step_timeout: Duration::from_secs(60),
            tag_filter: None,
            sender: None,
            cancel: CancellationToken::new(),
        }
    }

    /// 스위트 설정으로 러너를 만든다. 바인딩이 잘못되면 오류를 반환한다.
    pub fn from_suite(
        suite: &Suite,
        registry: impl Into<Arc<StepRegistry>>,
    ) -> Result<Self, SuiteError> {
        let hooks = suite.build_hooks()?;
        Ok(Self::new(registry, hooks)
            .with_variables(suite.variables.clone())
            .with_parallelism(suite.settings.parallelism)
            .with_step_timeout(Duration::from_secs(suite.settings.step_timeout_sec.max(1))))
    }

    /// 훅을 추가한다.
    pub fn with_hook(mut self, hook: SharedHook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Step 문장의 `${VAR}` 치환에 사용할 변수를 지정한다.
    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.context = ExecutionContext::with_vars(variables);
        self
    }

    /// 동시에 실행할 시나리오 수를 지정한다. 0은 1로 취급한다.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Step 하나의 제한 시간을 지정한다.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// 지정한 태그가 있는 시나리오만 실행한다.
    pub fn with_tag_filter(mut self, tag: Option<String>) -> Self {
        self.tag_filter = tag;
        self
    }

    /// 이벤트 송신 채널을 지정한다.
    pub fn with_events(mut self, sender: UnboundedSender<EngineEvent>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// 중단 토큰을 지정한다.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 동시 실행 시나리오 수를 반환한다.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    /// 시나리오 목록을 실행하고 보고서를 만든다.
    ///
    /// 결과는 완료 순서와 관계없이 입력 순서대로 정렬된다.
    pub async fn run_suite(&self, suite_name: &str, scenarios: &[ScenarioDef]) -> SuiteReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let selected: Vec<(usize, ScenarioDef)> = scenarios
            .iter()
            .filter(|scenario| match &self.tag_filter {
                Some(tag) => scenario.has_tag(tag),
                None => true,
            })
            .cloned()
            .enumerate()
            .collect();
        info!(
            suite = suite_name,
            scenarios = selected.len(),
            parallelism = self.parallelism,
            "스위트 실행 시작"
        );

        let runner = Arc::new(self.clone());
        let mut pending = selected.into_iter();
        let mut running = FuturesUnordered::new();
        let mut finished: Vec<(usize, ScenarioReport)> = Vec::new();
        loop {
            while running.len() < self.parallelism {
                let Some((index, scenario)) = pending.next() else {
                    break;
                };
                let name = scenario.name.clone();
                let tags = scenario.tags.clone();
                let task_runner = runner.clone();
                let handle =
                    tokio::spawn(async move { task_runner.run_scenario(&scenario).await });
                running.push(async move { (index, name, tags, handle.await) });
            }
            let Some((index, name, tags, joined)) = running.next().await else {
                break;
            };
            let report = match joined {
                Ok(report) => report,
                Err(err) => {
                    error!(scenario = %name, "시나리오 작업 비정상 종료: {err}");
                    aborted_report(name, tags, format!("시나리오 작업 비정상 종료: {err}"))
                }
            };
            finished.push((index, report));
        }
        finished.sort_by_key(|(index, _)| *index);

        let report = SuiteReport::new(
            suite_name,
            started_at,
            clock.elapsed().as_millis() as u64,
            finished.into_iter().map(|(_, report)| report).collect(),
        );
        info!(
            suite = suite_name,
            passed = report.passed,
            failed = report.failed,
            "스위트 실행 종료"
        );
        self.emit(EngineEvent::SuiteFinished {
            passed: report.passed,
            failed: report.failed,
        });
        report
    }

    /// 시나리오 하나를 실행한다.
    ///
    /// Step이 실패하거나 중단되어도 `after_scenario`는 태그가 맞는 모든 훅에 대해
    /// 호출되므로 생성된 드라이버는 반드시 정리된다.
    pub async fn run_scenario(&self, scenario: &ScenarioDef) -> ScenarioReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut store = ScenarioStore::new(&scenario.name);
        let hooks: Vec<SharedHook> = self
            .hooks
            .iter()
            .filter(|hook| hook.applies_to(&scenario.tags))
            .cloned()
            .collect();
        info!(
            scenario = %scenario.name,
            scenario_id = %store.id(),
            hooks = hooks.len(),
            "시나리오 시작"
        );
        self.emit(EngineEvent::ScenarioStarted {
            scenario: scenario.name.clone(),
            tags: scenario.tags.clone(),
        });

        let mut steps = Vec::with_capacity(scenario.steps.len());
        let mut setup_failures = Vec::new();
        let mut first_error: Option<String> = None;
        let mut halted: Option<String> = None;
        let mut cancelled = false;

        for (index, raw_text) in scenario.steps.iter().enumerate() {
            if halted.is_none() && self.cancel.is_cancelled() {
                cancelled = true;
                halted = Some("실행이 중단되어 건너뜀".into());
            }
            if let Some(reason) = &halted {
                let status = StepStatus::Skipped(reason.clone());
                self.emit(EngineEvent::StepFinished {
                    scenario: scenario.name.clone(),
                    step: index,
                    status: status.clone(),
                });
                steps.push(StepReport {
                    text: raw_text.clone(),
                    status,
                    duration_ms: 0,
                    logs: Vec::new(),
                });
                continue;
            }

            let step_clock = Instant::now();
            let logger = StepLogger::new(&scenario.name, index, self.sender.clone());
            let expanded = self.expand_step(raw_text, &store);
            let text = expanded.as_ref().unwrap_or(raw_text).clone();
            self.emit(EngineEvent::StepStarted {
                scenario: scenario.name.clone(),
                step: index,
                text: text.clone(),
            });
            let result = match expanded {
                Ok(text) => self.run_step(&hooks, &text, &mut store, &logger).await,
                Err(err) => StepRunResult::Failed(format!("{err:#}")),
            };
            let status = match result {
                StepRunResult::Passed => StepStatus::Passed,
                StepRunResult::SetupFailed { message, retryable } => {
                    setup_failures.push(message.clone());
                    if !retryable {
                        halted = Some("드라이버 생성 실패로 건너뜀".into());
                    }
                    StepStatus::Failed(message)
                }
                StepRunResult::Failed(message) => {
                    halted = Some("앞선 Step 실패로 건너뜀".into());
                    StepStatus::Failed(message)
                }
                StepRunResult::Cancelled => {
                    cancelled = true;
                    halted = Some("실행이 중단되어 건너뜀".into());
                    StepStatus::Failed("사용자에 의해 실행이 중단되었습니다.".into())
                }
            };
            if let StepStatus::Failed(message) = &status {
                warn!(scenario = %scenario.name, step = index, "Step 실패: {message}");
                if first_error.is_none() {
                    first_error = Some(message.clone());
                }
            }
            self.emit(EngineEvent::StepFinished {
                scenario: scenario.name.clone(),
                step: index,
                status: status.clone(),
            });
            steps.push(StepReport {
                text,
                status,
                duration_ms: step_clock.elapsed().as_millis() as u64,
                logs: logger.lines(),
            });
        }

        let teardown_errors = self.teardown(&hooks, &mut store).await;
        let step_failed = steps.iter().any(|step| step.status.is_failed());
        let outcome = if cancelled {
            ScenarioOutcome::Cancelled
        } else if step_failed || !teardown_errors.is_empty() {
            ScenarioOutcome::Failed
        } else {
            ScenarioOutcome::Passed
        };
        let error = first_error.or_else(|| teardown_errors.first().cloned());
        info!(scenario = %scenario.name, ?outcome, "시나리오 종료");
        self.emit(EngineEvent::ScenarioFinished {
            scenario: scenario.name.clone(),
            outcome,
        });
        ScenarioReport {
            name: scenario.name.clone(),
            tags: scenario.tags.clone(),
            outcome,
            error,
            steps,
            setup_failures,
            teardown_errors,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
        }
    }

    /// Step 문장의 플레이스홀더를 저장된 값, 스위트 변수, 환경 변수 순으로 치환한다.
    fn expand_step(&self, text: &str, store: &ScenarioStore) -> anyhow::Result<String> {
        self.context.expand_with(text, |key| {
            store.get_named::<String>(&value_key(key)).ok().cloned()
        })
    }

    /// 훅과 Step 핸들러를 실행한다. 중단 신호가 오면 진행 중인 작업을 버린다.
    ///
    /// 핸들러나 훅이 패닉하면 Step 실패로 바꾼다. 시나리오 작업이 살아 있어야
    /// 이후 `after_scenario`가 호출된다.
    async fn run_step(
        &self,
        hooks: &[SharedHook],
        text: &str,
        store: &mut ScenarioStore,
        logger: &StepLogger,
    ) -> StepRunResult {
        let execution = async {
            for hook in hooks {
                if let Err(err) = hook.before_step(store).await {
                    let retryable = err.is_setup_failure() && hook.can_retry_setup(store);
                    return StepRunResult::SetupFailed {
                        message: format!("[{}] {err}", hook.name()),
                        retryable,
                    };
                }
            }
            let Some(matched) = self.registry.find(text) else {
                let err = SuiteError::UndefinedStep(text.to_string());
                return StepRunResult::Failed(err.to_string());
            };
            debug!(pattern = %matched.pattern, "Step 정의 매칭");
            let handler = matched.handler.run(store, &matched.args, logger);
            match tokio::time::timeout(self.step_timeout, handler).await {
                Ok(Ok(())) => StepRunResult::Passed,
                Ok(Err(err)) => StepRunResult::Failed(format!("실패: {err:#}")),
                Err(_) => StepRunResult::Failed(format!(
                    "시간 초과 ({}ms)",
                    self.step_timeout.as_millis()
                )),
            }
        };
        let guarded = AssertUnwindSafe(execution).catch_unwind();
        tokio::select! {
            _ = self.cancel.cancelled() => StepRunResult::Cancelled,
            result = guarded => result.unwrap_or_else(|payload| {
                let message = panic_message(&*payload);
                StepRunResult::Failed(format!("Step 실행 중 패닉: {message}"))
            }),
        }
    }

    /// 태그가 맞는 모든 훅의 `after_scenario`를 호출하고 정리 실패 목록을 반환한다.
    async fn teardown(&self, hooks: &[SharedHook], store: &mut ScenarioStore) -> Vec<String> {
        let mut errors = Vec::new();
        for hook in hooks.iter().rev() {
            match hook.after_scenario(store).await {
                Ok(true) => debug!(binding = hook.name(), "드라이버 정리 완료"),
                Ok(false) => {}
                Err(err) => {
                    error!(
                        scenario = store.scenario_name(),
                        binding = hook.name(),
                        "드라이버 정리 실패: {err}"
                    );
                    errors.push(format!("[{}] {err}", hook.name()));
                }
            }
        }
        errors
    }
}

/// 패닉 페이로드에서 메시지를 꺼낸다.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "알 수 없는 패닉".to_string()
    }
}

/// 작업이 비정상 종료된 시나리오의 보고서를 만든다.
fn aborted_report(name: String, tags: Vec<String>, message: String) -> ScenarioReport {
    ScenarioReport {
        name,
        tags,
        outcome: ScenarioOutcome::Failed,
        error: Some(message),
        steps: Vec::new(),
        setup_failures: Vec::new(),
        teardown_errors: Vec::new(),
        started_at: Utc::now(),
        duration_ms: 0,
    }
}
