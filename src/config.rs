//! Runtime configuration
//!
//! [`RuntimeConfig`] holds every knob of the run loop. It can be built
//! programmatically with [`ConfigBuilder`], read from the environment with
//! [`RuntimeConfig::from_env`] or loaded from a TOML file with
//! [`RuntimeConfig::from_file`]. Durations are expressed in milliseconds in
//! TOML (`model_timeout_ms = 30000`).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Bearer credential handed to providers.
///
/// Issued out of band; the runtime only passes it through.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// How a guardrail that exceeds its timeout is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailTimeoutPolicy {
    /// Treat the guardrail as not triggered.
    #[default]
    Pass,
    /// Treat the guardrail as triggered with a timeout rationale.
    FailClosed,
}

/// Runtime configuration for runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on agent turns per run (handoffs included)
    pub max_turns: usize,

    /// Default model when an agent does not override it
    pub model: String,

    #[serde(rename = "model_timeout_ms", with = "duration_ms")]
    pub model_timeout: Duration,

    #[serde(rename = "tool_timeout_ms", with = "duration_ms")]
    pub tool_timeout: Duration,

    /// Default per-guardrail timeout
    #[serde(rename = "guardrail_timeout_ms", with = "duration_ms")]
    pub guardrail_timeout: Duration,

    pub guardrail_timeout_policy: GuardrailTimeoutPolicy,

    /// Dispatch the tool calls of one turn concurrently
    pub parallel_tools: bool,

    /// Optional bound on concurrently running tool calls
    pub max_concurrency: Option<usize>,

    pub retry: RetryConfig,

    /// Override of the provider base URL
    pub api_base: Option<String>,

    pub credential: Option<Credential>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            model: "gpt-4o".to_string(),
            model_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(30),
            guardrail_timeout: Duration::from_secs(30),
            guardrail_timeout_policy: GuardrailTimeoutPolicy::Pass,
            parallel_tools: true,
            max_concurrency: None,
            retry: RetryConfig::default(),
            api_base: None,
            credential: None,
        }
    }
}

/// Retry configuration for model calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: usize,

    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,

    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f32,

    /// Add up to 30% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with environment variables.
    ///
    /// Recognised: `AGENT_RELAY_MAX_TURNS`, `AGENT_RELAY_MODEL`,
    /// `AGENT_RELAY_MODEL_TIMEOUT_MS`, `AGENT_RELAY_TOOL_TIMEOUT_MS`,
    /// `AGENT_RELAY_GUARDRAIL_TIMEOUT_MS`, `AGENT_RELAY_GUARDRAIL_TIMEOUT_POLICY`
    /// (`pass` or `fail_closed`), `AGENT_RELAY_PARALLEL_TOOLS`,
    /// `AGENT_RELAY_MAX_CONCURRENCY`, `AGENT_RELAY_MAX_RETRIES`,
    /// `OPENAI_API_KEY` and `OPENAI_BASE_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    /// `self` with the variables recognised by [`RuntimeConfig::from_env`] applied on top.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.overlay_env(|key| std::env::var(key).ok())
    }

    /// Load from a TOML file; missing keys take their defaults.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn overlay_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AGENT_RELAY_MAX_TURNS") {
            self.max_turns = parse_env("AGENT_RELAY_MAX_TURNS", &v)?;
        }
        if let Some(v) = lookup("AGENT_RELAY_MODEL") {
            self.model = v;
        }
        if let Some(v) = lookup("AGENT_RELAY_MODEL_TIMEOUT_MS") {
            self.model_timeout =
                Duration::from_millis(parse_env("AGENT_RELAY_MODEL_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("AGENT_RELAY_TOOL_TIMEOUT_MS") {
            self.tool_timeout =
                Duration::from_millis(parse_env("AGENT_RELAY_TOOL_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("AGENT_RELAY_GUARDRAIL_TIMEOUT_MS") {
            self.guardrail_timeout =
                Duration::from_millis(parse_env("AGENT_RELAY_GUARDRAIL_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = lookup("AGENT_RELAY_GUARDRAIL_TIMEOUT_POLICY") {
            self.guardrail_timeout_policy = match v.to_lowercase().as_str() {
                "pass" => GuardrailTimeoutPolicy::Pass,
                "fail_closed" | "fail-closed" => GuardrailTimeoutPolicy::FailClosed,
                other => {
                    return Err(ConfigError::Invalid {
                        key: "AGENT_RELAY_GUARDRAIL_TIMEOUT_POLICY".into(),
                        message: format!("unknown policy '{}'", other),
                    })
                }
            };
        }
        if let Some(v) = lookup("AGENT_RELAY_PARALLEL_TOOLS") {
            self.parallel_tools = v.to_lowercase() == "true" || v == "1";
        }
        if let Some(v) = lookup("AGENT_RELAY_MAX_CONCURRENCY") {
            self.max_concurrency = Some(parse_env("AGENT_RELAY_MAX_CONCURRENCY", &v)?);
        }
        if let Some(v) = lookup("AGENT_RELAY_MAX_RETRIES") {
            self.retry.max_retries = parse_env("AGENT_RELAY_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.credential = Some(Credential::new(v));
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            self.api_base = Some(v);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_turns == 0 {
            return Err(ConfigError::Invalid {
                key: "max_turns".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.max_concurrency == Some(0) {
            return Err(ConfigError::Invalid {
                key: "max_concurrency".into(),
                message: "must be at least 1 when set".into(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Configuration builder
pub struct ConfigBuilder {
    config: RuntimeConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    pub fn max_turns(mut self, max_turns: usize) -> Self {
        self.config.max_turns = max_turns;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn model_timeout(mut self, timeout: Duration) -> Self {
        self.config.model_timeout = timeout;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn guardrail_timeout(mut self, timeout: Duration) -> Self {
        self.config.guardrail_timeout = timeout;
        self
    }

    pub fn guardrail_timeout_policy(mut self, policy: GuardrailTimeoutPolicy) -> Self {
        self.config.guardrail_timeout_policy = policy;
        self
    }

    pub fn parallel_tools(mut self, enabled: bool) -> Self {
        self.config.parallel_tools = enabled;
        self
    }

    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_concurrency = Some(limit);
        self
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api_base = Some(base.into());
        self
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.config.credential = Some(credential);
        self
    }

    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_turns, 10);
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.guardrail_timeout_policy, GuardrailTimeoutPolicy::Pass);
        assert!(config.parallel_tools);
        assert_eq!(config.retry.max_retries, 0);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .max_turns(4)
            .model("gpt-4o-mini")
            .max_concurrency(2)
            .guardrail_timeout_policy(GuardrailTimeoutPolicy::FailClosed)
            .build()
            .unwrap();

        assert_eq!(config.max_turns, 4);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.max_concurrency, Some(2));
        assert_eq!(
            config.guardrail_timeout_policy,
            GuardrailTimeoutPolicy::FailClosed
        );
    }

    #[test]
    fn test_zero_turns_rejected() {
        assert!(ConfigBuilder::new().max_turns(0).build().is_err());
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let config = ConfigBuilder::new()
            .credential(Credential::new("sk-secret"))
            .build()
            .unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("Credential(***)"));
    }

    #[test]
    fn test_from_toml() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            max_turns = 6
            tool_timeout_ms = 1500
            guardrail_timeout_policy = "fail_closed"

            [retry]
            max_retries = 2
            jitter = false
            "#,
        )
        .unwrap();

        assert_eq!(config.max_turns, 6);
        assert_eq!(config.tool_timeout, Duration::from_millis(1500));
        assert_eq!(
            config.guardrail_timeout_policy,
            GuardrailTimeoutPolicy::FailClosed
        );
        assert_eq!(config.retry.max_retries, 2);
        assert!(!config.retry.jitter);
        // untouched keys keep defaults
        assert_eq!(config.model, "gpt-4o");
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            ("AGENT_RELAY_MAX_TURNS", "3"),
            ("AGENT_RELAY_GUARDRAIL_TIMEOUT_POLICY", "fail_closed"),
            ("AGENT_RELAY_PARALLEL_TOOLS", "false"),
            ("OPENAI_API_KEY", "sk-test"),
        ]
        .into_iter()
        .collect();

        let config = RuntimeConfig::default()
            .overlay_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.max_turns, 3);
        assert!(!config.parallel_tools);
        assert_eq!(config.credential.unwrap().expose(), "sk-test");
    }

    #[test]
    fn test_env_overlay_rejects_garbage() {
        let result = RuntimeConfig::default().overlay_env(|k| {
            (k == "AGENT_RELAY_MAX_TURNS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
