use crate::binding::{SharedHook, StepBinding, tag_matches};
use crate::driver::{
    DatabaseDriverFactory, DbConnectionConfig, DriverFactory, EmailDriverConfig,
    EmailDriverFactory, GenericDriverFactory, UiDriverConfig, UiDriverFactory, WebServiceConfig,
    WebServiceDriverFactory,
};
use crate::engine::{ExecutionContext, StepRegistry};
use crate::error::SuiteError;
use crate::lifecycle::SetupPolicy;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// YAML로 정의되는 테스트 스위트이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suite {
    /// 스위트 이름.
    pub name: String,
    /// `${VAR}` 치환에 사용하는 변수.
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// 실행 설정.
    #[serde(default)]
    pub settings: RunSettings,
    /// 드라이버 슬롯 이름별 드라이버 정의.
    #[serde(default)]
    pub drivers: BTreeMap<String, DriverConfig>,
    /// 드라이버를 Step에 노출하는 바인딩 목록.
    #[serde(default)]
    pub bindings: Vec<BindingDef>,
    /// 시나리오 목록.
    pub scenarios: Vec<ScenarioDef>,
}

/// 스위트 실행 설정이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// 동시에 실행할 시나리오 수.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Step 하나의 제한 시간(초 단위).
    #[serde(default = "default_step_timeout")]
    pub step_timeout_sec: u64,
    /// 드라이버 생성 실패 시 재시도 정책.
    #[serde(default)]
    pub setup_policy: SetupPolicy,
    /// JSON 보고서 경로.
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

fn default_parallelism() -> usize {
    1
}

fn default_step_timeout() -> u64 {
    60
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            step_timeout_sec: default_step_timeout(),
            setup_policy: SetupPolicy::default(),
            report_path: None,
        }
    }
}

/// 드라이버 종류별 설정이다. `kind` 필드로 종류를 구분한다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriverConfig {
    /// WebDriver 브라우저 세션.
    Ui(UiDriverConfig),
    /// HTTP 웹 서비스 클라이언트.
    WebService(WebServiceConfig),
    /// 데이터베이스 연결.
    Database { connection: DbConnectionConfig },
    /// 메일 서버 세션.
    Email(EmailDriverConfig),
    /// 외부 자원이 없는 기본 테스트 객체.
    Generic {
        #[serde(default)]
        label: Option<String>,
    },
}

/// 드라이버를 사용하는 바인딩 정의이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingDef {
    /// 바인딩 이름.
    pub name: String,
    /// 참조하는 드라이버 슬롯 이름.
    pub driver: String,
    /// 시나리오 필터 태그. 없으면 모든 시나리오에 적용된다.
    #[serde(default)]
    pub tag: Option<String>,
}

/// 시나리오 정의이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDef {
    /// 시나리오 이름.
    pub name: String,
    /// 시나리오 태그.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Given/When/Then 문장 목록.
    #[serde(default)]
    pub steps: Vec<String>,
}

impl ScenarioDef {
    /// 태그 보유 여부를 판단한다. `@`와 대소문자는 무시한다.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|candidate| tag_matches(tag, candidate))
    }
}

impl Suite {
    /// 바인딩 정의를 실행 가능한 훅 목록으로 만든다.
    ///
    /// 바인딩이 하나도 없으면 드라이버마다 슬롯 이름을 태그로 쓰는 기본 바인딩을 만든다.
    /// 예를 들어 `browser` 드라이버는 `@browser` 시나리오에서만 생성된다.
    pub fn build_hooks(&self) -> Result<Vec<SharedHook>, SuiteError> {
        let bindings: Vec<BindingDef> = if self.bindings.is_empty() {
            self.drivers
                .keys()
                .map(|slot| BindingDef {
                    name: slot.clone(),
                    driver: slot.clone(),
                    tag: Some(format!("@{slot}")),
                })
                .collect()
        } else {
            self.bindings.clone()
        };
        let policy = self.settings.setup_policy;
        bindings
            .iter()
            .map(|binding| {
                let config = self.drivers.get(&binding.driver).ok_or_else(|| {
                    SuiteError::UnknownDriver {
                        binding: binding.name.clone(),
                        driver: binding.driver.clone(),
                    }
                })?;
                Ok(match config {
                    DriverConfig::Ui(config) => {
                        hook(binding, policy, UiDriverFactory::new(config.clone()))
                    }
                    DriverConfig::WebService(config) => {
                        hook(binding, policy, WebServiceDriverFactory::new(config.clone()))
                    }
                    DriverConfig::Database { connection } => {
                        hook(binding, policy, DatabaseDriverFactory::new(connection.clone()))
                    }
                    DriverConfig::Email(config) => {
                        hook(binding, policy, EmailDriverFactory::new(config.clone()))
                    }
                    DriverConfig::Generic { label } => hook(
                        binding,
                        policy,
                        GenericDriverFactory::new(label.as_deref().unwrap_or(&binding.driver)),
                    ),
                })
            })
            .collect()
    }

    /// 실행 전에 스위트를 검사하고 발견한 문제를 모두 반환한다.
    ///
    /// 바인딩의 드라이버 참조와 Step 정의 존재 여부를 확인한다. 실행 중에 저장되는
    /// 값을 참조하는 Step은 치환 없이 원문 그대로 검사한다.
    pub fn validate(&self, registry: &StepRegistry) -> Vec<SuiteError> {
        let mut problems = Vec::new();
        for binding in &self.bindings {
            if !self.drivers.contains_key(&binding.driver) {
                problems.push(SuiteError::UnknownDriver {
                    binding: binding.name.clone(),
                    driver: binding.driver.clone(),
                });
            }
        }
        let ctx = ExecutionContext::with_vars(self.variables.clone());
        for scenario in &self.scenarios {
            for step in &scenario.steps {
                let text = ctx.expand_placeholders(step).unwrap_or_else(|_| step.clone());
                if registry.find(&text).is_none() {
                    problems.push(SuiteError::UndefinedStep(format!(
                        "{} / {step}",
                        scenario.name
                    )));
                }
            }
        }
        problems
    }
}

fn hook<F: DriverFactory>(binding: &BindingDef, policy: SetupPolicy, factory: F) -> SharedHook {
    let mut step_binding =
        StepBinding::with_slot(&binding.name, &binding.driver, Arc::new(factory))
            .with_policy(policy);
    if let Some(tag) = &binding.tag {
        step_binding = step_binding.tagged(tag);
    }
    Arc::new(step_binding)
}

/// YAML 파일에서 스위트를 읽는다.
pub fn load_suite_from_file(path: &Path) -> Result<Suite, SuiteError> {
    let mut file = File::open(path)?;
    load_suite_from_reader(&mut file)
}

/// Reader에서 YAML을 읽어 스위트로 파싱한다.
///
/// `drivers` 아래 문자열의 `${VAR}`는 `variables`와 환경 변수로 치환된다.
pub fn load_suite_from_reader<R: Read>(reader: &mut R) -> Result<Suite, SuiteError> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    let mut raw: Value = serde_yaml::from_str(&buf)?;
    let variables: HashMap<String, String> = match raw.get("variables") {
        Some(value) => serde_yaml::from_value(value.clone())?,
        None => HashMap::new(),
    };
    let ctx = ExecutionContext::with_vars(variables);
    if let Some(drivers) = raw.get_mut("drivers") {
        expand_values(drivers, &ctx, "drivers")?;
    }
    Ok(serde_yaml::from_value(raw)?)
}

/// YAML 값 트리의 모든 문자열에 플레이스홀더 치환을 적용한다.
fn expand_values(value: &mut Value, ctx: &ExecutionContext, field: &str) -> Result<(), SuiteError> {
    match value {
        Value::String(text) => {
            let expanded =
                ctx.expand_placeholders(text)
                    .map_err(|_| SuiteError::Placeholder {
                        field: field.to_string(),
                        value: text.clone(),
                    })?;
            *text = expanded;
        }
        Value::Sequence(items) => {
            for (index, item) in items.iter_mut().enumerate() {
                expand_values(item, ctx, &format!("{field}[{index}]"))?;
            }
        }
        Value::Mapping(map) => {
            for (key, item) in map.iter_mut() {
                let key = key.as_str().unwrap_or("?");
                expand_values(item, ctx, &format!("{field}.{key}"))?;
            }
        }
        _ => {}
    }
    Ok(())
}
