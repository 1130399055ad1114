use super::events::EngineEvent;
use crate::error::SuiteError;
use crate::store::ScenarioStore;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

mod browser;
mod http;
mod mail;
mod sql;
mod values;

pub use values::value_key;

/// Step 문장 앞의 Gherkin 키워드 패턴이다.
static KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:given|when|then|and|but)\s+").expect("정규식 컴파일 실패"));

/// Step 실행 중 로그를 이벤트와 보고서로 전달한다.
#[derive(Debug, Clone)]
pub struct StepLogger {
    scenario: String,
    step: usize,
    sender: Option<UnboundedSender<EngineEvent>>,
    lines: Arc<Mutex<Vec<String>>>,
}

impl StepLogger {
    /// 시나리오 이름과 Step 순번으로 로거를 만든다.
    pub fn new(
        scenario: impl Into<String>,
        step: usize,
        sender: Option<UnboundedSender<EngineEvent>>,
    ) -> Self {
        Self {
            scenario: scenario.into(),
            step,
            sender,
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 이벤트를 보내지 않는 로거를 만든다.
    pub fn detached() -> Self {
        Self::new("", 0, None)
    }

    /// 로그 한 줄을 남긴다.
    pub fn line(&self, line: impl Into<String>) {
        let line = line.into();
        debug!(scenario = %self.scenario, step = self.step, "{line}");
        if let Some(sender) = &self.sender {
            let _ = sender.send(EngineEvent::StepLog {
                scenario: self.scenario.clone(),
                step: self.step,
                line: line.clone(),
            });
        }
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }

    /// 지금까지 남긴 로그를 반환한다.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

/// Step 정의의 실행 로직이다.
///
/// `args`에는 패턴의 캡처 그룹이 순서대로 들어간다. 매칭되지 않은 선택 그룹은
/// 빈 문자열이다.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(
        &self,
        store: &mut ScenarioStore,
        args: &[String],
        log: &StepLogger,
    ) -> anyhow::Result<()>;
}

/// 동기 함수를 Step 정의로 감싼다.
struct FnStep<F>(F);

#[async_trait]
impl<F> StepHandler for FnStep<F>
where
    F: Fn(&mut ScenarioStore, &[String]) -> anyhow::Result<()> + Send + Sync,
{
    async fn run(
        &self,
        store: &mut ScenarioStore,
        args: &[String],
        _log: &StepLogger,
    ) -> anyhow::Result<()> {
        (self.0)(store, args)
    }
}

/// 등록된 Step 정의 하나이다.
#[derive(Clone)]
struct StepDefinition {
    pattern: Regex,
    handler: Arc<dyn StepHandler>,
}

/// 매칭된 Step 정의와 캡처 인자이다.
pub struct MatchedStep {
    /// 실행할 핸들러.
    pub handler: Arc<dyn StepHandler>,
    /// 캡처 그룹 값.
    pub args: Vec<String>,
    /// 매칭된 패턴 문자열.
    pub pattern: String,
}

/// Step 문장을 정의와 연결하는 레지스트리이다.
///
/// 패턴은 전체 문장과 일치해야 하며, 먼저 등록된 정의가 우선한다.
#[derive(Clone, Default)]
pub struct StepRegistry {
    definitions: Vec<StepDefinition>,
}

impl StepRegistry {
    /// 빈 레지스트리를 생성한다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 기본 제공 Step이 등록된 레지스트리를 생성한다.
    pub fn with_builtin() -> Result<Self, SuiteError> {
        let mut registry = Self::new();
        values::register(&mut registry)?;
        sql::register(&mut registry)?;
        http::register(&mut registry)?;
        browser::register(&mut registry)?;
        mail::register(&mut registry)?;
        Ok(registry)
    }

    /// 정규식 패턴과 핸들러를 등록한다. 패턴은 앞뒤로 고정된다.
    pub fn register(
        &mut self,
        pattern: &str,
        handler: Arc<dyn StepHandler>,
    ) -> Result<&mut Self, SuiteError> {
        let anchored = format!(
            "^{}$",
            pattern.trim_start_matches('^').trim_end_matches('$')
        );
        let pattern = Regex::new(&anchored).map_err(|err| SuiteError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: err.to_string(),
        })?;
        self.definitions.push(StepDefinition { pattern, handler });
        Ok(self)
    }

    /// 동기 함수를 Step 정의로 등록한다.
    pub fn register_fn<F>(&mut self, pattern: &str, f: F) -> Result<&mut Self, SuiteError>
    where
        F: Fn(&mut ScenarioStore, &[String]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(pattern, Arc::new(FnStep(f)))
    }

    /// 등록된 정의 수를 반환한다.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// 등록된 정의가 없는지 여부를 반환한다.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Step 문장에 맞는 정의를 찾는다. Gherkin 키워드는 무시한다.
    pub fn find(&self, text: &str) -> Option<MatchedStep> {
        let body = strip_keyword(text);
        self.definitions.iter().find_map(|definition| {
            let caps = definition.pattern.captures(body)?;
            let args = caps
                .iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect();
            Some(MatchedStep {
                handler: definition.handler.clone(),
                args,
                pattern: definition.pattern.as_str().to_string(),
            })
        })
    }

    /// Step 문장을 찾아 실행한다. 정의가 없으면 오류를 반환한다.
    pub async fn execute(
        &self,
        text: &str,
        store: &mut ScenarioStore,
        log: &StepLogger,
    ) -> anyhow::Result<()> {
        let matched = self
            .find(text)
            .ok_or_else(|| SuiteError::UndefinedStep(text.to_string()))?;
        matched.handler.run(store, &matched.args, log).await
    }
}

/// Step 문장 앞의 Given/When/Then/And/But 키워드를 제거한다.
pub fn strip_keyword(text: &str) -> &str {
    let text = text.trim();
    match KEYWORD.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}

/// 선택 캡처 값이 비어 있으면 기본 슬롯 이름을 사용한다.
fn slot_or<'a>(arg: Option<&'a String>, default: &'a str) -> &'a str {
    match arg {
        Some(value) if !value.is_empty() => value.as_str(),
        _ => default,
    }
}

/// 위치 인자를 꺼낸다.
fn arg<'a>(args: &'a [String], index: usize) -> anyhow::Result<&'a str> {
    args.get(index)
        .map(|s| s.as_str())
        .ok_or_else(|| anyhow::anyhow!("Step 인자 {index}번이 없습니다."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_stripped_case_insensitively() {
        assert_eq!(strip_keyword("Given the user logs in"), "the user logs in");
        assert_eq!(strip_keyword("  and   it works "), "it works");
        assert_eq!(strip_keyword("Android is a word"), "Android is a word");
    }

    #[test]
    fn first_registered_definition_wins() {
        let mut registry = StepRegistry::new();
        registry
            .register_fn(r"I open (.*)", |store, args| {
                store.set_named("first", args[0].clone());
                Ok(())
            })
            .unwrap()
            .register_fn(r"I open the door", |store, _| {
                store.set_named("second", true);
                Ok(())
            })
            .unwrap();
        let matched = registry.find("When I open the door").unwrap();
        assert_eq!(matched.args, vec!["the door".to_string()]);
        assert_eq!(matched.pattern, "^I open (.*)$");
    }

    #[test]
    fn patterns_match_the_whole_sentence() {
        let mut registry = StepRegistry::new();
        registry.register_fn("I wait", |_, _| Ok(())).unwrap();
        assert!(registry.find("Given I wait").is_some());
        assert!(registry.find("Given I wait forever").is_none());
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let mut registry = StepRegistry::new();
        let err = registry.register_fn("I (open", |_, _| Ok(())).err().unwrap();
        assert!(matches!(err, SuiteError::InvalidPattern { .. }));
    }

    #[tokio::test]
    async fn execute_runs_the_handler_with_captures() {
        let mut registry = StepRegistry::new();
        registry
            .register_fn(r#"I remember "(.*)""#, |store, args| {
                store.set_named("remembered", args[0].clone());
                Ok(())
            })
            .unwrap();
        let mut store = ScenarioStore::new("execute");
        registry
            .execute(r#"Given I remember "kiwi""#, &mut store, &StepLogger::detached())
            .await
            .unwrap();
        assert_eq!(store.get_named::<String>("remembered").unwrap(), "kiwi");
        let err = registry
            .execute("Then nothing matches", &mut store, &StepLogger::detached())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nothing matches"));
    }

    #[test]
    fn builtin_registry_compiles() {
        let registry = StepRegistry::with_builtin().unwrap();
        assert!(!registry.is_empty());
        assert!(registry.find(r#"When I navigate to "https://example.test""#).is_some());
        assert!(registry.find(r#"Then the response status is 200"#).is_some());
    }
}
