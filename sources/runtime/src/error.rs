use thiserror::Error;

/// Contract violations observed by the frame protocol at runtime. None of
/// these are recoverable; they terminate the affected flow and leave every
/// other flow untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("illegal monitor state: {held} monitors held at a suspension point")]
    IllegalMonitorState { held: i32 },

    #[error("illegal return value: method returns '{expected}', '{given}' given")]
    IllegalReturnValue { expected: char, given: char },

    #[error("corrupted frame: {0}")]
    CorruptedFrame(String),

    #[error("resume mismatch: expected {expected}, entered {found}")]
    ResumeMismatch { expected: String, found: String },

    #[error("no frame is active on this flow")]
    NoActiveFrame,
}
