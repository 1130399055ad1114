use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// `${VAR}` 형태의 플레이스홀더 패턴이다.
pub(crate) static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_.]+)\}").expect("정규식 컴파일 실패"));

/// 스위트 변수를 보관하고 문자열의 플레이스홀더를 치환하는 컨텍스트이다.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// 문자열 기반 변수 저장소이다.
    vars: HashMap<String, String>,
}

impl ExecutionContext {
    /// 비어 있는 실행 컨텍스트를 생성한다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 변수 맵으로 컨텍스트를 생성한다.
    pub fn with_vars(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    /// 컨텍스트 변수 값을 설정한다.
    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// 변수 값을 조회한다.
    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// 컨텍스트 또는 환경 변수에서 값을 조회한다.
    ///
    /// # 반환값
    /// 우선 컨텍스트에서 찾고 없으면 환경 변수에서 조회한 값을 반환한다.
    pub fn get_or_env(&self, key: &str) -> Option<String> {
        if let Some(value) = self.get_var(key) {
            return Some(value.to_string());
        }
        std::env::var(key).ok()
    }

    /// `${VAR}` 패턴을 실제 값으로 치환한다.
    ///
    /// `lookup`이 먼저 조회되고, 없으면 컨텍스트 변수와 환경 변수 순으로 찾는다.
    /// 값을 찾지 못한 플레이스홀더가 남으면 오류를 반환한다.
    pub fn expand_with<L>(&self, template: &str, lookup: L) -> anyhow::Result<String>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let result = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            match lookup(key).or_else(|| self.get_or_env(key)) {
                Some(value) => value,
                None => {
                    missing.push(key.to_string());
                    caps[0].to_string()
                }
            }
        });
        if !missing.is_empty() {
            anyhow::bail!("플레이스홀더 치환 실패: {} ({})", result, missing.join(", "));
        }
        Ok(result.into_owned())
    }

    /// 컨텍스트 변수와 환경 변수만으로 플레이스홀더를 치환한다.
    pub fn expand_placeholders(&self, template: &str) -> anyhow::Result<String> {
        self.expand_with(template, |_| None)
    }

    /// `template` 문자열을 치환하되 값이 없을 경우 필드 이름을 포함한 오류를 발생시킨다.
    pub fn expand_required(&self, template: &str, field: &str) -> anyhow::Result<String> {
        self.expand_placeholders(template)
            .with_context(|| format!("{field} 필드의 플레이스홀더를 치환할 수 없습니다."))
    }
}
