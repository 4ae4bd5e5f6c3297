//! Token budget configuration for conversation history windowing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a [`BudgetConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The configuration could not be parsed.
    #[error("could not parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How many tokens of prior conversation may accompany a new prompt.
///
/// The model's context window is shared by the history, the new prompt and
/// the answer; `reserve` is held back for the answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BudgetConfig {
    /// Total tokens the model accepts per request.
    pub context_window: usize,
    /// Tokens kept free for the model's answer.
    pub reserve: usize,
    /// Maximum number of past exchanges considered, newest first.
    pub max_exchanges: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            context_window: 4096,
            reserve: 512,
            max_exchanges: 20,
        }
    }
}

impl BudgetConfig {
    /// Returns a builder initialised with [`BudgetConfig::default`].
    #[must_use]
    pub fn builder() -> BudgetBuilder {
        BudgetBuilder::default()
    }

    /// Parse and validate a configuration from JSON. Missing fields take defaults.
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks that the reserve leaves room for history in the context window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context_window == 0 {
            return Err(ConfigError::Invalid(
                "context_window must be greater than zero".into(),
            ));
        }
        if self.reserve >= self.context_window {
            return Err(ConfigError::Invalid(format!(
                "reserve ({}) must be smaller than context_window ({})",
                self.reserve, self.context_window
            )));
        }
        Ok(())
    }

    /// Tokens available for history once the reserve and the current prompt
    /// are accounted for. Saturates at zero.
    pub fn history_budget(&self, prompt_tokens: usize) -> usize {
        self.context_window
            .saturating_sub(self.reserve)
            .saturating_sub(prompt_tokens)
    }
}

/// Builder for [`BudgetConfig`].
#[derive(Debug, Clone, Default)]
pub struct BudgetBuilder {
    config: BudgetConfig,
}

impl BudgetBuilder {
    #[must_use]
    pub fn context_window(mut self, tokens: usize) -> Self {
        self.config.context_window = tokens;
        self
    }

    #[must_use]
    pub fn reserve(mut self, tokens: usize) -> Self {
        self.config.reserve = tokens;
        self
    }

    #[must_use]
    pub fn max_exchanges(mut self, count: usize) -> Self {
        self.config.max_exchanges = count;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<BudgetConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_chat_model_window() {
        let cfg = BudgetConfig::default();
        assert_eq!(cfg.context_window, 4096);
        assert_eq!(cfg.reserve, 512);
        assert_eq!(cfg.max_exchanges, 20);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.history_budget(0), 3584);
        assert_eq!(cfg.history_budget(84), 3500);
        assert_eq!(cfg.history_budget(10_000), 0);
    }

    #[test]
    fn builder_validates() {
        let cfg = BudgetConfig::builder()
            .context_window(8192)
            .reserve(1024)
            .max_exchanges(5)
            .build()
            .unwrap();
        assert_eq!(cfg.history_budget(0), 7168);

        assert!(BudgetConfig::builder().reserve(4096).build().is_err());
        assert!(BudgetConfig::builder().context_window(0).build().is_err());
    }

    #[test]
    fn from_json_fills_defaults() {
        let cfg = BudgetConfig::from_json(r#"{"reserve": 256}"#).unwrap();
        assert_eq!(cfg.reserve, 256);
        assert_eq!(cfg.context_window, 4096);

        assert!(matches!(
            BudgetConfig::from_json(r#"{"reserve": 5000}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BudgetConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
