use super::{StepHandler, StepLogger, StepRegistry, arg, slot_or};
use crate::driver::{DriverKind, WebResponse, WebServiceDriver};
use crate::error::SuiteError;
use crate::lifecycle::shared_driver;
use crate::store::ScenarioStore;
use async_trait::async_trait;
use reqwest::Method;
use std::sync::Arc;

/// 웹 서비스 요청을 보내고 응답을 저장소에 남긴다.
struct SendRequest;

#[async_trait]
impl StepHandler for SendRequest {
    async fn run(
        &self,
        store: &mut ScenarioStore,
        args: &[String],
        log: &StepLogger,
    ) -> anyhow::Result<()> {
        let method = Method::from_bytes(arg(args, 0)?.as_bytes())?;
        let path = arg(args, 1)?;
        let body = args.get(2).filter(|b| !b.is_empty()).cloned();
        let slot = slot_or(args.get(3), DriverKind::WebService.as_str());
        let driver = shared_driver::<WebServiceDriver>(store, slot)?;
        let response = driver.request(method.clone(), path, body).await?;
        log.line(format!("{method} {} -> {}", driver.url(path), response.status));
        store.set(response);
        Ok(())
    }
}

fn last_response(store: &ScenarioStore) -> anyhow::Result<&WebResponse> {
    store
        .get::<WebResponse>()
        .map_err(|_| anyhow::anyhow!("아직 보낸 웹 서비스 요청이 없습니다."))
}

pub(super) fn register(registry: &mut StepRegistry) -> Result<(), SuiteError> {
    registry
        .register(
            r#"I send a (GET|POST|PUT|PATCH|DELETE) request to "(.*?)"(?: with body '(.*)')?(?: on "([\w.\-]+)")?"#,
            Arc::new(SendRequest),
        )?
        .register_fn(r"the response status (?:is|should be) (\d{3})", |store, args| {
            let expected: u16 = arg(args, 0)?.parse()?;
            let response = last_response(store)?;
            if response.status != expected {
                anyhow::bail!(
                    "응답 상태 불일치: 기대값 {expected}, 실제값 {} ({})",
                    response.status,
                    response.body
                );
            }
            Ok(())
        })?
        .register_fn(r#"the response body contains "(.*)""#, |store, args| {
            let needle = arg(args, 0)?;
            let response = last_response(store)?;
            if !response.body.contains(needle) {
                anyhow::bail!("응답 본문에 '{needle}'가 없습니다: {}", response.body);
            }
            Ok(())
        })?;
    Ok(())
}
