use super::{StepHandler, StepLogger, StepRegistry, arg, slot_or};
use crate::driver::{DriverKind, EmailDriver};
use crate::error::SuiteError;
use crate::lifecycle::shared_driver;
use crate::store::ScenarioStore;
use async_trait::async_trait;
use std::sync::Arc;

/// 메일 서버에 명령을 보내고 응답을 로그로 남긴다.
struct MailCommand;

#[async_trait]
impl StepHandler for MailCommand {
    async fn run(
        &self,
        store: &mut ScenarioStore,
        args: &[String],
        log: &StepLogger,
    ) -> anyhow::Result<()> {
        let command = arg(args, 0)?;
        let slot = slot_or(args.get(1), DriverKind::Email.as_str());
        let driver = shared_driver::<EmailDriver>(store, slot)?;
        for line in driver.command(command).await? {
            log.line(line);
        }
        Ok(())
    }
}

pub(super) fn register(registry: &mut StepRegistry) -> Result<(), SuiteError> {
    registry
        .register(
            r#"I send the mail command "(.*?)"(?: on "([\w.\-]+)")?"#,
            Arc::new(MailCommand),
        )?
        .register_fn(
            r#"the mail server greeting contains "(.*?)"(?: on "([\w.\-]+)")?"#,
            |store, args| {
                let needle = arg(args, 0)?;
                let slot = slot_or(args.get(1), DriverKind::Email.as_str());
                let driver = shared_driver::<EmailDriver>(store, slot)?;
                if !driver.greeting().contains(needle) {
                    anyhow::bail!(
                        "메일 서버 인사말에 '{needle}'가 없습니다: {}",
                        driver.greeting()
                    );
                }
                Ok(())
            },
        )?;
    Ok(())
}
