/// Convenience result type used across tripreel.
pub type TripResult<T> = Result<T, TripError>;

/// Top-level error taxonomy used by the library APIs.
///
/// Every variant renders as a human-readable message: the player forwards the text of these
/// errors to the notice channel unchanged, so the prefix is the only thing that tells kinds
/// apart.
#[derive(thiserror::Error, Debug)]
pub enum TripError {
    /// Invalid user input (empty names, too few resolved locations, malformed projects).
    #[error("input error: {0}")]
    Input(String),

    /// An operation was requested in a state that does not allow it.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// An external service (geocoder, router, tile server) failed.
    #[error("service error: {0}")]
    Service(String),

    /// A local resource (encoder, output file, surface) could not be used.
    #[error("resource error: {0}")]
    Resource(String),

    /// Invalid configuration or internal data.
    #[error("validation error: {0}")]
    Validation(String),

    /// Errors when serializing or deserializing data structures.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TripError {
    /// Build a [`TripError::Input`] value.
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Build a [`TripError::Precondition`] value.
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Build a [`TripError::Service`] value.
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    /// Build a [`TripError::Resource`] value.
    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    /// Build a [`TripError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`TripError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

impl From<serde_json::Error> for TripError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err.to_string())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
