use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeframeParseError {
    #[error("Unknown candle timeframe `{0}`")]
    Unknown(String),
}
