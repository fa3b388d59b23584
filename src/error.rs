/// Errors surfaced synchronously to callers of the service layer.
///
/// Upstream sensor-source failures are deliberately absent: they are recorded
/// per device in collection results (see `source::FetchError`) and never
/// escalate to this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed input; the caller's fault.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The device is already bound to another system.
    #[error("device {0:?} is already registered")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn system_not_found(id: i64) -> Self {
        Self::NotFound(format!("system {id}"))
    }
}
