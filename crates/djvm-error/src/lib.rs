#![warn(missing_docs)]

//! # djvm-error
//!
//! Typed errors and diagnostics for the DJVM class rewriter.
//!
//! Three error kinds cross crate boundaries:
//!
//! - [`RuleViolationError`]: raised when sandboxed code reaches a forbidden
//!   API. Inside rewritten bytecode this is thrown by injected instructions;
//!   on the host side it is raised directly at the sandbox boundary.
//! - [`SandboxClassLoadingError`]: raised at rewrite time when analysis
//!   diagnostics exceed the severity threshold. Aggregates every collected
//!   violation so a single rewrite reports all of them at once.
//! - [`ClassResolutionError`]: raised by the source layer when a referenced
//!   class cannot be located.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity of an analysis diagnostic.
///
/// Ordered so that thresholds can be expressed as `severity >= minimum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Purely informational; never blocks a class load.
    Informational,
    /// Suspicious but tolerated; reported when at or above the threshold.
    Warning,
    /// A rule violation. Any error-severity diagnostic aborts the load.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Informational => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(label)
    }
}

/// A single analysis finding, located as precisely as the pipeline knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// How serious the finding is.
    pub severity: Severity,
    /// Human-readable description, e.g.
    /// `Disallowed reference to API; java.lang.Class.getDeclaredClasses()`.
    pub message: String,
    /// Internal name of the class under analysis.
    pub class_name: String,
    /// Member being analyzed when the finding was made, as `name:descriptor`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
}

impl Diagnostic {
    /// Create a diagnostic for a class-level finding.
    pub fn class_level(severity: Severity, class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            class_name: class_name.into(),
            member: None,
        }
    }

    /// Create a diagnostic for a member-level finding.
    pub fn member_level(
        severity: Severity,
        class_name: impl Into<String>,
        member: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            message: message.into(),
            class_name: class_name.into(),
            member: Some(member.into()),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.member {
            Some(member) => write!(f, "[{}] {}::{}: {}", self.severity, self.class_name, member, self.message),
            None => write!(f, "[{}] {}: {}", self.severity, self.class_name, self.message),
        }
    }
}

/// Raised when sandboxed code reaches a forbidden API, or when a forbidden
/// value is passed across the sandbox boundary.
///
/// The message formats are part of the external contract:
/// `Disallowed reference to API; <owner>.<member>(<arg types>)` for forbidden
/// calls and `Cannot sandbox <type> <value>` for forbidden boundary values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RuleViolationError {
    /// The formatted violation message.
    pub message: String,
}

impl RuleViolationError {
    /// Wrap an already-formatted violation message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// The `Disallowed reference to API; ...` form for a member reference.
    ///
    /// `member` is the dotted display form, e.g.
    /// `java.lang.reflect.Constructor.newInstance(Object[])`.
    pub fn disallowed_reference(member: impl fmt::Display) -> Self {
        Self {
            message: format!("Disallowed reference to API; {member}"),
        }
    }

    /// The `Cannot sandbox <type> <value>` form for a boundary violation.
    pub fn cannot_sandbox(kind: &str, value: impl fmt::Display) -> Self {
        Self {
            message: format!("Cannot sandbox {kind} {value}"),
        }
    }
}

/// Raised when a rewrite collects diagnostics at or above the configured
/// threshold. Carries every diagnostic so callers see the complete picture.
#[derive(Debug, Clone, Error)]
pub struct SandboxClassLoadingError {
    /// Internal name of the class whose load failed.
    pub class_name: String,
    /// Every diagnostic of severity >= the configured minimum, in the order
    /// the analysis produced them.
    pub diagnostics: Vec<Diagnostic>,
}

impl SandboxClassLoadingError {
    /// Build the aggregate from the diagnostics the analysis retained.
    pub fn new(class_name: impl Into<String>, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            class_name: class_name.into(),
            diagnostics,
        }
    }

    /// True when any retained diagnostic is error severity.
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }
}

impl fmt::Display for SandboxClassLoadingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "failed to load class {}:", self.class_name)?;
        for diagnostic in &self.diagnostics {
            writeln!(f, "  {diagnostic}")?;
        }
        Ok(())
    }
}

/// Raised by the source layer when a referenced class cannot be located.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ClassResolutionError {
    /// The named class was not found in any configured source.
    #[error("class not found: {0}")]
    ClassNotFound(String),

    /// A class required to complete a definition was missing.
    #[error("no class definition found for: {0}")]
    NoClassDefFound(String),
}

impl ClassResolutionError {
    /// The internal name of the class that could not be located.
    pub fn class_name(&self) -> &str {
        match self {
            Self::ClassNotFound(name) | Self::NoClassDefFound(name) => name,
        }
    }
}

// Compile-time assertion: every cross-crate error must be Send + Sync + 'static.
const _: fn() = || {
    fn assert_bounds<T: Send + Sync + 'static>() {}
    assert_bounds::<RuleViolationError>();
    assert_bounds::<SandboxClassLoadingError>();
    assert_bounds::<ClassResolutionError>();
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_supports_thresholds() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Informational);
        assert!(Severity::Warning >= Severity::Warning);
    }

    #[test]
    fn display_disallowed_reference() {
        let err = RuleViolationError::disallowed_reference(
            "java.lang.reflect.Constructor.newInstance(Object[])",
        );
        assert_eq!(
            err.to_string(),
            "Disallowed reference to API; java.lang.reflect.Constructor.newInstance(Object[])"
        );
    }

    #[test]
    fn display_cannot_sandbox() {
        let err = RuleViolationError::cannot_sandbox("class", "java.lang.String");
        assert_eq!(err.to_string(), "Cannot sandbox class java.lang.String");
    }

    #[test]
    fn loading_error_enumerates_every_diagnostic() {
        let err = SandboxClassLoadingError::new(
            "sandbox/com/example/Evil",
            vec![
                Diagnostic::member_level(
                    Severity::Error,
                    "sandbox/com/example/Evil",
                    "toDJVMString:()Ljava/lang/String;",
                    "Class is not allowed to implement toDJVMString()",
                ),
                Diagnostic::class_level(
                    Severity::Warning,
                    "sandbox/com/example/Evil",
                    "Stripped unsupported attribute",
                ),
            ],
        );
        let rendered = err.to_string();
        assert!(rendered.contains("failed to load class sandbox/com/example/Evil"));
        assert!(rendered.contains("Class is not allowed to implement toDJVMString()"));
        assert!(rendered.contains("Stripped unsupported attribute"));
        assert!(err.has_errors());
    }

    #[test]
    fn loading_error_without_errors() {
        let err = SandboxClassLoadingError::new(
            "sandbox/com/example/Benign",
            vec![Diagnostic::class_level(
                Severity::Warning,
                "sandbox/com/example/Benign",
                "something mildly odd",
            )],
        );
        assert!(!err.has_errors());
    }

    #[test]
    fn resolution_error_exposes_class_name() {
        let err = ClassResolutionError::ClassNotFound("com/example/Missing".into());
        assert_eq!(err.class_name(), "com/example/Missing");
        assert_eq!(err.to_string(), "class not found: com/example/Missing");
    }

    #[test]
    fn severity_display_labels() {
        assert_eq!(Severity::Informational.to_string(), "info");
        assert_eq!(Severity::Warning.to_string(), "warning");
        assert_eq!(Severity::Error.to_string(), "error");
    }
}
