use thiserror::Error;

/// The transformer's error taxonomy. Nothing here is retriable: the caller
/// keeps its input bytes on every variant and decides how to catalog the
/// failure.
#[derive(Error, Debug)]
pub enum WeaveError {
    /// The input is not a well formed class container. The bytes are
    /// preserved untouched.
    #[error("input error: {0}")]
    Input(#[source] anyhow::Error),

    /// The rewrite itself went wrong: the post-pass analysis failed, a save
    /// count disagreed with its descriptor, or the method holds a shape the
    /// rewriter cannot represent.
    #[error("transform error in {class}.{method}: {reason}")]
    Transform {
        class: String,
        method: String,
        reason: String,
    },

    /// The resource provider answered "not found" for a class whose summary
    /// was strictly required.
    #[error("class resolution error: {0} could not be resolved")]
    ClassResolution(String),
}

impl WeaveError {
    pub fn transform(class: &str, method: &str, reason: impl Into<String>) -> Self {
        WeaveError::Transform {
            class: class.to_string(),
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

pub type WeaveResult<T> = std::result::Result<T, WeaveError>;
