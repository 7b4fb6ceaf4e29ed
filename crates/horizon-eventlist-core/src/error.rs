/// Errors reported by [`Signal`](crate::Signal).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    /// The id was never issued by this signal or was already disconnected.
    #[error("unknown connection id")]
    InvalidConnection,
}

/// Result alias for signal operations.
pub type Result<T> = std::result::Result<T, SignalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_connection_message() {
        assert_eq!(
            SignalError::InvalidConnection.to_string(),
            "unknown connection id"
        );
    }
}
