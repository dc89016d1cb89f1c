use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Orchestrator-wide tuning knobs.
///
/// Everything is optional: unset concurrency means unbounded fan-out
/// within a layer, unset timeouts fall through to the lifecycle default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Cap on concurrently executing lifecycle hooks per layer, applied
    /// uniformly to every layer in every phase.
    pub concurrency: Option<usize>,
    /// Default hook timeout where a registration has no per-phase
    /// override. Falls back to [`crate::lifecycle::DEFAULT_HOOK_TIMEOUT`].
    pub default_hook_timeout: Option<Duration>,
    /// Shared deadline applied to each layer batch. Layers get a fresh
    /// budget each; there is no cross-layer deadline.
    pub layer_deadline: Option<Duration>,
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == Some(0) {
            return Err(OrchestratorError::InvalidConfiguration(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.default_hook_timeout == Some(Duration::ZERO) {
            return Err(OrchestratorError::InvalidConfiguration(
                "default_hook_timeout must be non-zero".into(),
            ));
        }
        if self.layer_deadline == Some(Duration::ZERO) {
            return Err(OrchestratorError::InvalidConfiguration(
                "layer_deadline must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = Some(concurrency);
        self
    }

    pub fn default_hook_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_hook_timeout = Some(timeout);
        self
    }

    pub fn layer_deadline(mut self, deadline: Duration) -> Self {
        self.config.layer_deadline = Some(deadline);
        self
    }

    pub fn build(self) -> Result<OrchestratorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        OrchestratorConfig::default().validate().unwrap();
    }

    #[test]
    fn builder_round_trip() {
        let config = OrchestratorConfig::builder()
            .concurrency(4)
            .default_hook_timeout(Duration::from_secs(2))
            .layer_deadline(Duration::from_secs(30))
            .build()
            .unwrap();
        assert_eq!(config.concurrency, Some(4));
        assert_eq!(config.default_hook_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn zero_values_rejected() {
        let err = OrchestratorConfig::builder().concurrency(0).build().unwrap_err();
        assert_eq!(err.code(), "invalid-configuration");

        let err = OrchestratorConfig::builder()
            .default_hook_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "invalid-configuration");
    }
}
