//! Error types for lists and views.

/// Result type alias for list operations.
pub type ListResult<T> = std::result::Result<T, ListError>;

/// Errors returned by list, view, stack and table operations.
///
/// All of these describe a broken contract on the caller's side. None of
/// them leave the list or view partially mutated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListError {
    /// An index was outside the list.
    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// A half-open range was reversed or reached past the end of the list.
    #[error("range {start}..{end} out of bounds for list of length {len}")]
    InvalidRange { start: usize, end: usize, len: usize },

    /// An item does not provide the property source capability.
    #[error("item at position {index} does not provide the property source capability")]
    MissingCapability { index: usize },

    /// The view has been detached from its source.
    #[error("view has been detached from its source")]
    Detached,

    /// A structural mutation was attempted from inside a change notification
    /// of the same list.
    #[error("structural mutation attempted while the list is notifying its listeners")]
    ReentrantMutation,

    /// A view parameter was rejected before any change was applied.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl ListError {
    /// Create an index error.
    pub fn out_of_range(index: usize, len: usize) -> Self {
        Self::IndexOutOfRange { index, len }
    }

    /// Create a range error.
    pub fn invalid_range(start: usize, end: usize, len: usize) -> Self {
        Self::InvalidRange { start, end, len }
    }

    /// Create a parameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }
}
