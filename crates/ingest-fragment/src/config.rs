//! Fragment sizing options.

use ingest_types::TenantOverrides;
use serde::{Deserialize, Serialize};

use crate::error::FragmentError;

/// Sizing for one document's fragmentation.
///
/// Resolved per tenant: global defaults merged with tenant overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentOptions {
    /// Maximum words per fragment
    pub max_words: usize,

    /// Words from the end of one fragment repeated at the start of the next
    pub overlap_words: usize,
}

impl Default for FragmentOptions {
    fn default() -> Self {
        Self {
            max_words: 200,
            overlap_words: 20,
        }
    }
}

impl FragmentOptions {
    pub fn new(max_words: usize, overlap_words: usize) -> Self {
        Self {
            max_words,
            overlap_words,
        }
    }

    pub fn validate(&self) -> Result<(), FragmentError> {
        if self.max_words == 0 {
            return Err(FragmentError::InvalidOptions(
                "max_words must be > 0".to_string(),
            ));
        }
        if self.overlap_words >= self.max_words {
            return Err(FragmentError::InvalidOptions(format!(
                "overlap_words ({}) must be smaller than max_words ({})",
                self.overlap_words, self.max_words
            )));
        }
        Ok(())
    }
}

impl From<&TenantOverrides> for FragmentOptions {
    fn from(overrides: &TenantOverrides) -> Self {
        Self::new(overrides.max_fragment_words, overrides.overlap_words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_default_options_are_valid() {
        assert!(FragmentOptions::default().validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller() {
        assert!(FragmentOptions::new(10, 10).validate().is_err());
        assert!(FragmentOptions::new(0, 0).validate().is_err());
        assert!(FragmentOptions::new(10, 0).validate().is_ok());
    }

    #[test]
    fn test_from_tenant_overrides() {
        let overrides = TenantOverrides {
            max_fragment_words: 50,
            overlap_words: 5,
            metadata: BTreeMap::new(),
        };
        assert_eq!(FragmentOptions::from(&overrides), FragmentOptions::new(50, 5));
    }
}
