use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod database;
pub mod email;
pub mod generic;
pub mod ui;
pub mod web_service;

pub use database::{
    DatabaseDriver, DatabaseDriverFactory, DbConnectionConfig, DbExecutor, DbKind, DummyExecutor,
    SharedExecutor,
};
pub use email::{EmailDriver, EmailDriverConfig, EmailDriverFactory, MailProtocol};
pub use generic::{GenericDriver, GenericDriverFactory};
pub use ui::{UiDriver, UiDriverConfig, UiDriverFactory};
pub use web_service::{WebResponse, WebServiceConfig, WebServiceDriver, WebServiceDriverFactory};

/// 지원하는 드라이버 종류를 표현한다.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// 브라우저 세션(WebDriver) 드라이버.
    Ui,
    /// HTTP 기반 웹 서비스 클라이언트.
    WebService,
    /// 데이터베이스 연결 드라이버.
    Database,
    /// 메일 서버 세션 드라이버.
    Email,
    /// 외부 드라이버 없이 기본 테스트 객체만 사용하는 경우.
    Generic,
}

impl DriverKind {
    /// 설정 파일과 로그에서 사용하는 이름을 반환한다.
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Ui => "ui",
            DriverKind::WebService => "web_service",
            DriverKind::Database => "database",
            DriverKind::Email => "email",
            DriverKind::Generic => "generic",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DriverFactory는 시나리오별 드라이버를 생성하고 정리하는 추상 계층을 정의한다.
///
/// 생성은 네트워크 연결, 브라우저 실행 같은 I/O를 포함할 수 있다.
/// 생명주기 관리자는 시나리오당 최대 한 번 `construct`를 성공시키고,
/// 성공한 경우에만 정확히 한 번 `dispose`를 호출한다.
#[async_trait]
pub trait DriverFactory: Send + Sync + 'static {
    /// 생성되는 드라이버 타입이다.
    type Driver: Send + Sync + 'static;

    /// 드라이버 종류를 반환한다.
    fn kind(&self) -> DriverKind;

    /// 드라이버를 생성한다.
    async fn construct(&self) -> anyhow::Result<Self::Driver>;

    /// 생성된 드라이버를 정리한다.
    async fn dispose(&self, driver: &Self::Driver) -> anyhow::Result<()>;
}
