//! Per-instance configuration for ranged views and table renderers.
//!
//! Configuration is built once and handed to the component that uses it;
//! nothing is looked up globally. Both types deserialize from partial
//! documents, with missing fields taking their defaults.
//!
//! ```
//! use horizon_eventlist::{RangeConfig, TableConfig};
//!
//! let range = RangeConfig::new(20, 10).with_steady(true);
//! assert!(range.validate().is_ok());
//!
//! let table = TableConfig::default().with_name("contacts").with_footer(false);
//! assert!(table.render_header);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ListError, ListResult};

/// Default window size of a [`RangeConfig`].
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// Window parameters of a ranged view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeConfig {
    /// Source index of the first item shown.
    pub start: usize,
    /// Maximum number of items shown.
    pub max_size: usize,
    /// Keep `start` as a fixed position instead of following the content
    /// when items are added or removed before the window.
    pub steady: bool,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            start: 0,
            max_size: DEFAULT_PAGE_SIZE,
            steady: false,
        }
    }
}

impl RangeConfig {
    /// A content-following window.
    pub fn new(start: usize, max_size: usize) -> Self {
        Self {
            start,
            max_size,
            steady: false,
        }
    }

    /// Sets the steady flag.
    pub fn with_steady(mut self, steady: bool) -> Self {
        self.steady = steady;
        self
    }

    /// Rejects windows that can never show anything.
    pub fn validate(&self) -> ListResult<()> {
        if self.max_size == 0 {
            return Err(ListError::invalid_parameter("max_size must be at least 1"));
        }
        Ok(())
    }
}

/// Options of a table renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Name used in log records.
    pub name: String,
    /// Ask the row renderer for a header.
    pub render_header: bool,
    /// Ask the row renderer for a footer.
    pub render_footer: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: "table".to_string(),
            render_header: true,
            render_footer: true,
        }
    }
}

impl TableConfig {
    /// Sets the name used in log records.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enables or disables the header.
    pub fn with_header(mut self, enabled: bool) -> Self {
        self.render_header = enabled;
        self
    }

    /// Enables or disables the footer.
    pub fn with_footer(mut self, enabled: bool) -> Self {
        self.render_footer = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_validation() {
        assert!(RangeConfig::default().validate().is_ok());
        assert_eq!(
            RangeConfig::new(0, 0).validate(),
            Err(ListError::invalid_parameter("max_size must be at least 1"))
        );
    }

    #[test]
    fn test_range_from_partial_json() {
        let config: RangeConfig = serde_json::from_str(r#"{ "start": 40, "steady": true }"#).unwrap();
        assert_eq!(config.start, 40);
        assert_eq!(config.max_size, DEFAULT_PAGE_SIZE);
        assert!(config.steady);
    }

    #[test]
    fn test_table_config_round_trip() {
        let config = TableConfig::default()
            .with_name("orders")
            .with_header(false);
        let json = serde_json::to_string(&config).unwrap();
        let back: TableConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        assert!(!back.render_header);
        assert!(back.render_footer);
    }
}
