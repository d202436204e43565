//! Per-class analysis records and the diagnostic-aggregating context.

use std::collections::HashSet;

use djvm_classfile::{AccessFlags, Annotation, ConstantValue, MethodBody};
use djvm_error::{Diagnostic, SandboxClassLoadingError, Severity};

/// Invocation kinds an emitter can pattern-match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    /// `invokevirtual`.
    Virtual,
    /// `invokestatic`.
    Static,
    /// `invokespecial`.
    Special,
    /// `invokeinterface`.
    Interface,
    /// `invokedynamic`.
    Dynamic,
}

/// A symbolic member reference: `(owner, name, descriptor)` plus the
/// invocation kind at the reference site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Internal name of the owner.
    pub owner: String,
    /// Member name.
    pub name: String,
    /// Member descriptor.
    pub descriptor: String,
    /// How the site invokes the member.
    pub kind: InvokeKind,
}

/// The immutable summary of the class under analysis. Definition providers
/// receive and return records; they never mutate shared state.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassRecord {
    /// The class's name in the host namespace.
    pub host_name: String,
    /// The class's name after relocation.
    pub sandbox_name: String,
    /// Class access flags.
    pub access: AccessFlags,
    /// Superclass host name.
    pub super_name: Option<String>,
    /// Implemented interfaces, host names.
    pub interfaces: Vec<String>,
    /// The `SourceFile` attribute.
    pub source_file: Option<String>,
    /// Declared class file major version.
    pub major_version: u16,
}

/// One declared member (field or method) under analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberRecord {
    /// Host internal name of the declaring class.
    pub owner: String,
    /// Member name.
    pub name: String,
    /// Member descriptor. Methods start with `(`.
    pub descriptor: String,
    /// Access flags.
    pub access: AccessFlags,
    /// Field initial value, when declared.
    pub constant_value: Option<ConstantValue>,
    /// Declared thrown exceptions (methods).
    pub exceptions: Vec<String>,
    /// The method body; `None` for fields and bodiless methods.
    pub body: Option<MethodBody>,
    /// Runtime-visible annotations.
    pub annotations: Vec<Annotation>,
}

impl MemberRecord {
    /// True when the record describes a method.
    pub fn is_method(&self) -> bool {
        self.descriptor.starts_with('(')
    }

    /// The `name:descriptor` display form used in diagnostics.
    pub fn display_name(&self) -> String {
        format!("{}:{}", self.name, self.descriptor)
    }
}

/// Analysis thresholds and pass-through sets.
#[derive(Debug, Clone)]
pub struct AnalysisConfiguration {
    /// Diagnostics below this severity are dropped from aggregation.
    pub minimum_severity: Severity,
    /// Annotation type descriptors passed through the rewrite unchanged.
    pub visible_annotations: HashSet<String>,
    /// Highest accepted class file major version.
    pub version_ceiling: u16,
}

impl Default for AnalysisConfiguration {
    fn default() -> Self {
        Self {
            minimum_severity: Severity::Warning,
            visible_annotations: HashSet::new(),
            // Major version 52: the newest format the deterministic runtime
            // understands.
            version_ceiling: 52,
        }
    }
}

/// Walks one class, aggregating diagnostics and deferred work.
///
/// Diagnostics are accumulated rather than thrown eagerly so one rewrite
/// reports every violation at once.
#[derive(Debug)]
pub struct AnalysisContext {
    /// The class under analysis.
    pub class: ClassRecord,
    /// Thresholds and pass-through sets.
    pub config: AnalysisConfiguration,
    current_member: Option<String>,
    diagnostics: Vec<Diagnostic>,
    pending_string_fields: Vec<(String, String)>,
}

impl AnalysisContext {
    /// Begin analysis of one class.
    pub fn new(class: ClassRecord, config: AnalysisConfiguration) -> Self {
        Self {
            class,
            config,
            current_member: None,
            diagnostics: Vec::new(),
            pending_string_fields: Vec::new(),
        }
    }

    /// Set the member subsequent diagnostics attach to.
    pub fn enter_member(&mut self, member: Option<String>) {
        self.current_member = member;
    }

    /// Record a diagnostic against the current member (or the class when no
    /// member is active).
    pub fn record(&mut self, severity: Severity, message: impl Into<String>) {
        let diagnostic = match &self.current_member {
            Some(member) => Diagnostic::member_level(
                severity,
                self.class.sandbox_name.as_str(),
                member.clone(),
                message,
            ),
            None => Diagnostic::class_level(severity, self.class.sandbox_name.as_str(), message),
        };
        self.diagnostics.push(diagnostic);
    }

    /// Defer a synthetic static-initializer store for a stripped `String`
    /// constant field.
    pub fn defer_string_field(&mut self, field_name: String, value: String) {
        self.pending_string_fields.push((field_name, value));
    }

    /// Deferred `(field, value)` pairs, draining them.
    pub(crate) fn take_pending_string_fields(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.pending_string_fields)
    }

    /// Every recorded diagnostic, unfiltered.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Diagnostics at or above the configured minimum severity.
    pub fn retained(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity >= self.config.minimum_severity)
            .cloned()
            .collect()
    }

    /// True when any error-severity diagnostic was recorded.
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    /// The aggregate failure for this class, enumerating every retained
    /// diagnostic.
    pub fn into_failure(self) -> SandboxClassLoadingError {
        let retained = self.retained();
        SandboxClassLoadingError::new(self.class.sandbox_name, retained)
    }
}
