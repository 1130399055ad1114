/// ScenarioStore 접근 중 발생 가능한 오류를 표현한다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// 요청한 키가 저장소에 존재하지 않는 경우이다.
    #[error("시나리오 저장소에 키가 없습니다: {key}")]
    KeyNotFound { key: String },
    /// 저장된 값의 타입이 요청한 타입과 다른 경우이다.
    #[error("키 {key}의 값을 {expected} 타입으로 읽을 수 없습니다.")]
    TypeMismatch { key: String, expected: &'static str },
}

/// 드라이버 생명주기 관리 중 발생 가능한 오류를 표현한다.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// 드라이버 생성 팩토리가 실패한 경우이다. 마커는 기록되지 않는다.
    #[error("드라이버 '{slot}' 생성 실패 ({attempt}차 시도): {source:#}")]
    SetupFailure {
        slot: String,
        attempt: u32,
        #[source]
        source: anyhow::Error,
    },
    /// 설정된 재시도 횟수를 모두 소진한 경우이다.
    #[error("드라이버 '{slot}' 생성을 {attempts}회 실패하여 더 이상 시도하지 않습니다.")]
    SetupExhausted { slot: String, attempts: u32 },
    /// 드라이버 정리(dispose)가 실패한 경우이다.
    #[error("드라이버 '{slot}' 정리 실패: {source:#}")]
    TeardownFailure {
        slot: String,
        #[source]
        source: anyhow::Error,
    },
    /// 준비되지 않은 드라이버에 접근한 경우이다.
    #[error("드라이버 '{slot}'가 아직 준비되지 않았습니다. 시나리오 태그를 확인하세요.")]
    NotInitialized { slot: String },
    /// 이미 정리된 드라이버를 다시 사용하려는 경우이다.
    #[error("드라이버 '{slot}'는 이미 정리되어 재사용할 수 없습니다.")]
    TornDown { slot: String },
    /// 저장소 접근 오류이다.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    /// 다음 Step에서 재시도 가능한 생성 실패인지 여부를 반환한다.
    pub fn is_setup_failure(&self) -> bool {
        matches!(self, LifecycleError::SetupFailure { .. })
    }
}

/// Suite 로딩과 검증 중 발생 가능한 오류를 표현한다.
#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    /// 파일 입출력 오류이다.
    #[error("파일 입출력 오류: {0}")]
    Io(#[from] std::io::Error),
    /// YAML 파싱 오류이다.
    #[error("YAML 파싱 오류: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// JSON 직렬화 오류이다.
    #[error("JSON 직렬화 오류: {0}")]
    Json(#[from] serde_json::Error),
    /// 정의되지 않은 Step 문장이다.
    #[error("정의되지 않은 Step입니다: {0}")]
    UndefinedStep(String),
    /// Step 패턴 정규식이 잘못된 경우이다.
    #[error("잘못된 Step 패턴입니다: {pattern} ({reason})")]
    InvalidPattern { pattern: String, reason: String },
    /// 바인딩이 선언되지 않은 드라이버를 참조하는 경우이다.
    #[error("바인딩 '{binding}'가 정의되지 않은 드라이버를 참조합니다: {driver}")]
    UnknownDriver { binding: String, driver: String },
    /// 플레이스홀더 치환에 실패한 경우이다.
    #[error("플레이스홀더 치환 실패 ({field}): {value}")]
    Placeholder { field: String, value: String },
}
