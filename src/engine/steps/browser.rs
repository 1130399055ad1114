use super::{StepHandler, StepLogger, StepRegistry, arg, slot_or};
use crate::driver::{DriverKind, UiDriver};
use crate::error::SuiteError;
use crate::lifecycle::shared_driver;
use crate::store::ScenarioStore;
use async_trait::async_trait;
use std::sync::Arc;

/// 브라우저 Step의 종류이다.
enum BrowserAction {
    Navigate,
    TitleIs,
    UrlContains,
}

/// UI 드라이버로 브라우저를 조작하거나 확인한다.
struct BrowserStep(BrowserAction);

#[async_trait]
impl StepHandler for BrowserStep {
    async fn run(
        &self,
        store: &mut ScenarioStore,
        args: &[String],
        log: &StepLogger,
    ) -> anyhow::Result<()> {
        let value = arg(args, 0)?;
        let slot = slot_or(args.get(1), DriverKind::Ui.as_str());
        let driver = shared_driver::<UiDriver>(store, slot)?;
        match self.0 {
            BrowserAction::Navigate => {
                log.line(format!("페이지 이동: {value}"));
                driver.navigate(value).await
            }
            BrowserAction::TitleIs => {
                let title = driver.title().await?;
                if title != value {
                    anyhow::bail!("페이지 제목 불일치: 기대값 '{value}', 실제값 '{title}'");
                }
                Ok(())
            }
            BrowserAction::UrlContains => {
                let url = driver.current_url().await?;
                if !url.contains(value) {
                    anyhow::bail!("현재 URL '{url}'에 '{value}'가 없습니다.");
                }
                Ok(())
            }
        }
    }
}

pub(super) fn register(registry: &mut StepRegistry) -> Result<(), SuiteError> {
    registry
        .register(
            r#"I navigate to "(.*?)"(?: on "([\w.\-]+)")?"#,
            Arc::new(BrowserStep(BrowserAction::Navigate)),
        )?
        .register(
            r#"the page title (?:is|should be) "(.*?)"(?: on "([\w.\-]+)")?"#,
            Arc::new(BrowserStep(BrowserAction::TitleIs)),
        )?
        .register(
            r#"the current url contains "(.*?)"(?: on "([\w.\-]+)")?"#,
            Arc::new(BrowserStep(BrowserAction::UrlContains)),
        )?;
    Ok(())
}
