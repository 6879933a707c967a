use thiserror::Error;

#[derive(Debug, Error)]
pub enum AirwatchError {
    #[error("llm error ({provider}): {message}")]
    Llm { provider: String, message: String },
    #[error("http error ({status}): {body}")]
    Http { status: u16, body: String },
    #[error("config error: {0}")]
    Config(String),
    #[error("sensor store error: {0}")]
    SensorStore(String),
    #[error("retrieval error: {0}")]
    Retrieval(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("실내 센서 데이터를 찾을 수 없습니다.")]
    NoSensorData,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AirwatchError {
    /// Render the error and its `source()` chain, outermost first.
    pub fn traceback(&self) -> String {
        let mut lines = vec![format!("{self:?}")];
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            lines.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        lines.join("\n")
    }
}

pub type Result<T> = std::result::Result<T, AirwatchError>;
