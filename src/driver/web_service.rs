use super::{DriverFactory, DriverKind};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// 웹 서비스 드라이버 설정이다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebServiceConfig {
    /// 요청 경로의 기준이 되는 주소.
    pub base_url: String,
    /// 요청 제한 시간(초 단위).
    #[serde(default = "default_timeout")]
    pub timeout_sec: u64,
    /// 모든 요청에 붙일 헤더.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// 생성 시 확인할 상태 점검 경로.
    #[serde(default)]
    pub health_path: Option<String>,
}

fn default_timeout() -> u64 {
    30
}

/// 웹 서비스 응답 요약이다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebResponse {
    /// HTTP 상태 코드.
    pub status: u16,
    /// 응답 본문.
    pub body: String,
}

/// 시나리오에서 공유하는 HTTP 클라이언트이다.
#[derive(Debug, Clone)]
pub struct WebServiceDriver {
    /// 기준 주소.
    base_url: String,
    /// 설정이 적용된 클라이언트.
    client: reqwest::Client,
}

impl WebServiceDriver {
    /// 기준 주소를 반환한다.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 내부 HTTP 클라이언트를 반환한다.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// 상대 경로를 기준 주소와 합친다. 절대 주소는 그대로 사용한다.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// 요청을 보내고 상태 코드와 본문을 반환한다.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> anyhow::Result<WebResponse> {
        let url = self.url(path);
        let mut builder = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }
        let response = builder
            .send()
            .await
            .with_context(|| format!("{method} {url} 요청 실패"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("{method} {url} 응답 본문 읽기 실패"))?;
        Ok(WebResponse { status, body })
    }
}

/// WebServiceDriver를 생성하는 팩토리이다.
#[derive(Debug, Clone)]
pub struct WebServiceDriverFactory {
    /// 드라이버 설정.
    config: WebServiceConfig,
}

impl WebServiceDriverFactory {
    /// 설정으로 팩토리를 생성한다.
    pub fn new(config: WebServiceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DriverFactory for WebServiceDriverFactory {
    type Driver = WebServiceDriver;

    fn kind(&self) -> DriverKind {
        DriverKind::WebService
    }

    async fn construct(&self) -> anyhow::Result<WebServiceDriver> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("잘못된 헤더 이름: {name}"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("잘못된 헤더 값: {name}"))?;
            headers.insert(name, value);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_sec.max(1)))
            .default_headers(headers)
            .build()
            .context("HTTP 클라이언트 생성 실패")?;
        let driver = WebServiceDriver {
            base_url: self.config.base_url.clone(),
            client,
        };
        if let Some(path) = &self.config.health_path {
            let response = driver.request(Method::GET, path, None).await?;
            if !(200..300).contains(&response.status) {
                anyhow::bail!(
                    "웹 서비스 상태 점검 실패: {} -> {}",
                    driver.url(path),
                    response.status
                );
            }
        }
        Ok(driver)
    }

    async fn dispose(&self, driver: &WebServiceDriver) -> anyhow::Result<()> {
        tracing::debug!("웹 서비스 클라이언트 종료: {}", driver.base_url);
        Ok(())
    }
}
