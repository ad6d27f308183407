//! Configuration builder trait
//!
//! A common shape for configuration structures: defaults, validation,
//! environment loading and merging of several sources.

use crate::error::Result;

/// Configuration structures that support validation, environment loading and merging
///
/// Merge strategy:
/// - `Option` fields: `other` wins when `Some`
/// - scalar fields: `other` wins when it differs from the default
pub trait ConfigBuilder: Default + Clone {
    /// Reject out-of-range or inconsistent values
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Defaults overlaid with `{prefix}{FIELD}` environment variables
    fn from_env(prefix: &str) -> Result<Self>;

    /// Overlay `other` onto `self`; returns `self` for chaining
    fn merge(&mut self, other: Self) -> &mut Self;

    /// Validated defaults
    fn build() -> Result<Self> {
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load from the environment and validate
    fn from_env_validated(prefix: &str) -> Result<Self> {
        let config = Self::from_env(prefix)?;
        config.validate()?;
        Ok(config)
    }
}
