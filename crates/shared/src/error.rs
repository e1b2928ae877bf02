#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SharedError {
    #[error("Unknown {kind} value: {value}")]
    UnknownState { kind: &'static str, value: String },
}
