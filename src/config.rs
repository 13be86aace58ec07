//! Configuration for signature processing.

/// Environment variable consulted by [`SignatureConfig::from_env`].
pub const TEST_MODE_ENV: &str = "DOCSIG_TEST_MODE";

/// Signature processing configuration.
///
/// The core never reads the process environment; hosts build a config and
/// hand it to [`crate::signatures::DocumentSignatureManager::new`].
#[derive(Debug, Clone, Default)]
pub struct SignatureConfig {
    /// Test mode: every entry classifies as XML and XAdES signed properties
    /// are not emitted.
    pub test_mode: bool,

    /// Keep the buffering node spliced into the SAX chain for the whole mission.
    pub sticky: bool,
}

impl SignatureConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the test-mode switch from the environment once.
    ///
    /// Meant for binaries; library code takes the config explicitly.
    pub fn from_env() -> Self {
        Self::new().with_test_mode(std::env::var_os(TEST_MODE_ENV).is_some())
    }

    /// Enable test mode.
    pub fn with_test_mode(mut self, enable: bool) -> Self {
        self.test_mode = enable;
        self
    }

    /// Pin the buffering node into the chain.
    pub fn with_sticky(mut self, enable: bool) -> Self {
        self.sticky = enable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SignatureConfig::default();
        assert!(!config.test_mode);
        assert!(!config.sticky);
    }

    #[test]
    fn test_config_builder() {
        let config = SignatureConfig::new().with_test_mode(true).with_sticky(true);
        assert!(config.test_mode);
        assert!(config.sticky);
    }
}
