use super::{DriverFactory, DriverKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 외부 시스템 없이 시나리오 공통 정보만 담는 기본 테스트 객체이다.
#[derive(Debug, Clone)]
pub struct GenericDriver {
    /// 테스트 객체 이름.
    pub name: String,
    /// 생성 시각.
    pub started_at: DateTime<Utc>,
}

/// GenericDriver를 생성하는 팩토리이다.
#[derive(Debug, Clone)]
pub struct GenericDriverFactory {
    /// 생성할 테스트 객체 이름.
    name: String,
}

impl GenericDriverFactory {
    /// 테스트 객체 이름으로 팩토리를 생성한다.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl DriverFactory for GenericDriverFactory {
    type Driver = GenericDriver;

    fn kind(&self) -> DriverKind {
        DriverKind::Generic
    }

    async fn construct(&self) -> anyhow::Result<GenericDriver> {
        Ok(GenericDriver {
            name: self.name.clone(),
            started_at: Utc::now(),
        })
    }

    async fn dispose(&self, driver: &GenericDriver) -> anyhow::Result<()> {
        tracing::debug!(
            "기본 테스트 객체 '{}' 종료 (수행 시간 {}ms)",
            driver.name,
            (Utc::now() - driver.started_at).num_milliseconds()
        );
        Ok(())
    }
}
