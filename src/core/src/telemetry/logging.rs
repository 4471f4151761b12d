//! Structured logging with JSON/pretty/compact formats and key-material redaction.
//!
//! Identity files hold ed25519 secret keys and seeds. Anything that might end up
//! in a log line goes through [`SensitiveFieldRedactor`] first.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static REDACTOR: OnceLock<SensitiveFieldRedactor> = OnceLock::new();

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,

    /// Per-module log levels, e.g. `swarmlink_core::gossip = "debug"`
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Whether to include file/line information
    #[serde(default)]
    pub include_location: bool,

    /// Whether to include target (module path)
    #[serde(default = "default_include_target")]
    pub include_target: bool,

    #[serde(default)]
    pub redaction: RedactionConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            include_location: false,
            include_target: default_include_target(),
            redaction: RedactionConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines
    Json,
    /// Multi-line human readable
    Pretty,
    /// Single-line human readable
    #[default]
    Compact,
}

/// Configuration for sensitive data redaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    #[serde(default = "default_redaction_enabled")]
    pub enabled: bool,

    #[serde(default = "default_redaction_patterns")]
    pub patterns: Vec<RedactionPattern>,

    /// Replacement text for redacted values
    #[serde(default = "default_redaction_replacement")]
    pub replacement: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: default_redaction_enabled(),
            patterns: default_redaction_patterns(),
            replacement: default_redaction_replacement(),
        }
    }
}

/// A pattern for identifying sensitive data to redact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionPattern {
    /// Name of this pattern (for debugging)
    pub name: String,

    /// Field names to match (case-insensitive, substring)
    #[serde(default)]
    pub field_names: Vec<String>,

    /// Regex pattern to match in values
    #[serde(default)]
    pub value_pattern: Option<String>,
}

/// Redactor for sensitive fields in log output.
#[derive(Debug, Clone)]
pub struct SensitiveFieldRedactor {
    patterns: Vec<CompiledRedactionPattern>,
    replacement: String,
    enabled: bool,
}

#[derive(Debug, Clone)]
struct CompiledRedactionPattern {
    field_names: Vec<String>,
    value_regex: Option<regex::Regex>,
}

impl SensitiveFieldRedactor {
    /// Create a new redactor from configuration. Invalid regexes are skipped.
    pub fn new(config: &RedactionConfig) -> Self {
        let patterns = config
            .patterns
            .iter()
            .map(|p| CompiledRedactionPattern {
                field_names: p.field_names.iter().map(|s| s.to_lowercase()).collect(),
                value_regex: p
                    .value_pattern
                    .as_ref()
                    .and_then(|pat| regex::Regex::new(pat).ok()),
            })
            .collect();

        Self {
            patterns,
            replacement: config.replacement.clone(),
            enabled: config.enabled,
        }
    }

    /// Check if a field name should be redacted.
    pub fn should_redact_field(&self, field_name: &str) -> bool {
        if !self.enabled {
            return false;
        }

        let lower = field_name.to_lowercase();
        self.patterns
            .iter()
            .any(|p| p.field_names.iter().any(|f| lower.contains(f)))
    }

    /// Redact a value if it matches any pattern.
    pub fn redact_value(&self, value: &str) -> String {
        if !self.enabled {
            return value.to_string();
        }

        let mut result = value.to_string();
        for pattern in &self.patterns {
            if let Some(regex) = &pattern.value_regex {
                result = regex.replace_all(&result, &self.replacement).to_string();
            }
        }
        result
    }

    /// Redact a field value, checking both field name and value patterns.
    pub fn redact(&self, field_name: &str, value: &str) -> String {
        if !self.enabled {
            return value.to_string();
        }

        if self.should_redact_field(field_name) {
            return self.replacement.clone();
        }

        self.redact_value(value)
    }

    /// The replacement marker.
    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    /// Get the global redactor instance.
    pub fn global() -> &'static SensitiveFieldRedactor {
        REDACTOR.get_or_init(|| SensitiveFieldRedactor::new(&RedactionConfig::default()))
    }
}

fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn default_include_target() -> bool {
    true
}

fn default_redaction_enabled() -> bool {
    true
}

fn default_redaction_replacement() -> String {
    "[REDACTED]".to_string()
}

fn default_redaction_patterns() -> Vec<RedactionPattern> {
    vec![
        RedactionPattern {
            name: "key_material".to_string(),
            field_names: vec![
                "secret_key".to_string(),
                "private_key".to_string(),
                "signing_key".to_string(),
                "seed".to_string(),
            ],
            value_pattern: None,
        },
        RedactionPattern {
            // Only whole quoted hex strings. Identifiers are also 64 hex chars and
            // are logged in their short form, so bare tokens are left alone.
            name: "quoted_hex_secret".to_string(),
            field_names: vec![],
            value_pattern: Some(r#""secret_key"\s*:\s*"[0-9a-fA-F]{64}""#.to_string()),
        },
    ]
}

/// Initialize the logging subsystem.
///
/// # Errors
///
/// Returns an error if the filter directives are malformed or a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let _ = REDACTOR.set(SensitiveFieldRedactor::new(&config.redaction));

    let mut filter = EnvFilter::try_new(&config.level)?;
    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(directive.parse()?);
    }

    match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction_field_names() {
        let redactor = SensitiveFieldRedactor::new(&RedactionConfig::default());

        assert!(redactor.should_redact_field("secret_key"));
        assert!(redactor.should_redact_field("SECRET_KEY"));
        assert!(redactor.should_redact_field("agent_seed"));
        assert!(!redactor.should_redact_field("machine_id"));
        assert_eq!(redactor.redact("seed", "0011"), "[REDACTED]");
    }

    #[test]
    fn test_redaction_key_file_contents() {
        let redactor = SensitiveFieldRedactor::new(&RedactionConfig::default());
        let secret = "ab".repeat(32);
        let line = format!(r#"{{"version":1,"secret_key":"{}"}}"#, secret);

        let redacted = redactor.redact_value(&line);
        assert!(!redacted.contains(&secret));
        assert!(redacted.contains("[REDACTED]"));

        let id = "cd".repeat(32);
        assert_eq!(redactor.redact_value(&id), id);
    }

    #[test]
    fn test_redaction_disabled() {
        let config = RedactionConfig {
            enabled: false,
            ..Default::default()
        };
        let redactor = SensitiveFieldRedactor::new(&config);
        assert_eq!(redactor.redact("secret_key", "value"), "value");
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.redaction.enabled);
    }
}
