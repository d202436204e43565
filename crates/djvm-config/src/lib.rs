#![warn(missing_docs)]

//! # djvm-config
//!
//! Configuration loading for the DJVM class rewriter.
//!
//! Supports TOML settings files with environment variable expansion. Only the
//! file-friendly inputs live here; the hierarchical sandbox configuration
//! (rules, emitters, caches) is assembled programmatically in `djvm-rewrite`
//! from these settings.
//!
//! ## Example
//!
//! ```toml
//! [rewriter]
//! minimum_severity = "warning"
//! user_sources = ["app.jar", "lib/util.jar"]
//! bootstrap_source = "${DJVM_HOME}/deterministic-rt.jar"
//! visible_annotations = ["Ljavax/annotation/Nonnull;"]
//!
//! [profile]
//! allocations = 1024
//! invocations = 1000000
//! jumps = 1000000
//! throws = 100
//! ```

use std::path::{Path, PathBuf};

use djvm_error::Severity;
use serde::Deserialize;
use thiserror::Error;

/// Errors from settings parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the settings file.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid settings value.
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Budgets enforced by the injected instrumentation counters.
///
/// Each budget is the number of events a single sandboxed task may perform
/// before `sandbox/RuntimeCostAccounter` traps. A value of `i64::MAX`
/// disables the corresponding trap without removing the instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionProfile {
    /// Maximum object and array allocations.
    #[serde(default = "ExecutionProfile::default_allocations")]
    pub allocations: i64,
    /// Maximum method invocations.
    #[serde(default = "ExecutionProfile::default_invocations")]
    pub invocations: i64,
    /// Maximum branch instructions taken.
    #[serde(default = "ExecutionProfile::default_jumps")]
    pub jumps: i64,
    /// Maximum throwables raised.
    #[serde(default = "ExecutionProfile::default_throws")]
    pub throws: i64,
}

impl ExecutionProfile {
    fn default_allocations() -> i64 {
        1024 * 1024
    }

    fn default_invocations() -> i64 {
        1_000_000
    }

    fn default_jumps() -> i64 {
        1_000_000
    }

    fn default_throws() -> i64 {
        1_000
    }

    /// A profile that instruments every event but never traps.
    pub fn unlimited() -> Self {
        Self {
            allocations: i64::MAX,
            invocations: i64::MAX,
            jumps: i64::MAX,
            throws: i64::MAX,
        }
    }

    /// True when every budget is non-positive-trapping (i.e. unlimited).
    pub fn is_unlimited(&self) -> bool {
        self.allocations == i64::MAX
            && self.invocations == i64::MAX
            && self.jumps == i64::MAX
            && self.throws == i64::MAX
    }
}

impl Default for ExecutionProfile {
    fn default() -> Self {
        Self {
            allocations: Self::default_allocations(),
            invocations: Self::default_invocations(),
            jumps: Self::default_jumps(),
            throws: Self::default_throws(),
        }
    }
}

/// The file-friendly rewriter inputs.
#[derive(Debug, Clone, Deserialize)]
pub struct RewriterSettings {
    /// Diagnostics below this severity are dropped from aggregation.
    #[serde(default = "RewriterSettings::default_severity")]
    pub minimum_severity: Severity,

    /// Archives and directories searched for user classes, in order.
    #[serde(default)]
    pub user_sources: Vec<PathBuf>,

    /// The archive holding the deterministic runtime's own classes.
    #[serde(default)]
    pub bootstrap_source: Option<PathBuf>,

    /// Annotation type descriptors passed through the rewrite unchanged.
    #[serde(default)]
    pub visible_annotations: Vec<String>,

    /// Additional class names pinned to the host namespace.
    #[serde(default)]
    pub pinned_classes: Vec<String>,
}

impl RewriterSettings {
    fn default_severity() -> Severity {
        Severity::Warning
    }
}

impl Default for RewriterSettings {
    fn default() -> Self {
        Self {
            minimum_severity: Self::default_severity(),
            user_sources: Vec::new(),
            bootstrap_source: None,
            visible_annotations: Vec::new(),
            pinned_classes: Vec::new(),
        }
    }
}

/// Top-level settings file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Rewriter inputs.
    #[serde(default)]
    pub rewriter: RewriterSettings,

    /// Optional execution profile. When absent, no instrumentation is
    /// injected and the trace emitters are left out of the pipeline.
    #[serde(default)]
    pub profile: Option<ExecutionProfile>,
}

impl Settings {
    /// Parse settings from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(toml_str)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str);
        Self::from_toml(&expanded)
    }

    /// Load settings from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(profile) = &self.profile {
            for (label, value) in [
                ("allocations", profile.allocations),
                ("invocations", profile.invocations),
                ("jumps", profile.jumps),
                ("throws", profile.throws),
            ] {
                if value <= 0 {
                    return Err(ConfigError::Invalid(format!(
                        "profile budget '{label}' must be positive, got {value}"
                    )));
                }
            }
        }
        for annotation in &self.rewriter.visible_annotations {
            if !annotation.starts_with('L') || !annotation.ends_with(';') {
                return Err(ConfigError::Invalid(format!(
                    "visible annotation '{annotation}' is not a type descriptor (expected L<name>;)"
                )));
            }
        }
        for pin in &self.rewriter.pinned_classes {
            if pin.contains('.') {
                return Err(ConfigError::Invalid(format!(
                    "pinned class '{pin}' must be an internal name (use '/' separators)"
                )));
            }
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string using environment variables.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                Err(_) => {
                    // Leave the placeholder if env var not found
                    result.push_str(&format!("${{{var_name}}}"));
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}
