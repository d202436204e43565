//! Audit logging for class rewrites.
//!
//! Every rewrite emits a [`RewriteAuditEntry`] containing:
//! - The sandbox and host names of the class
//! - SHA-256 digests of the input and output bytes (never raw bytes)
//! - The number of retained diagnostics
//! - The outcome
//!
//! The [`AuditLogger`] trait allows pluggable backends.
//! [`JsonLinesAuditLogger`] writes newline-delimited JSON to any
//! `std::io::Write`; the rewrite pipeline is synchronous, so the sink is
//! too.

use std::io::Write;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The outcome of one rewrite.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AuditOutcome {
    /// The class was rewritten and published.
    Rewritten,
    /// The class was served from a cache.
    CacheHit,
    /// Analysis failed the class.
    Failed,
}

/// A complete audit record for a single class rewrite.
#[derive(Debug, Clone, Serialize)]
pub struct RewriteAuditEntry {
    /// The sandbox internal name.
    pub class_name: String,
    /// The host internal name the bytes came from.
    pub host_name: String,
    /// ISO-8601 timestamp of the rewrite.
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the input bytes, hex-encoded.
    pub source_digest: String,
    /// SHA-256 of the rewritten bytes; absent on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewritten_digest: Option<String>,
    /// Number of diagnostics at or above the configured severity.
    pub diagnostics: usize,
    /// What happened.
    pub outcome: AuditOutcome,
}

/// Pluggable audit sink.
pub trait AuditLogger: Send + Sync {
    /// Record one rewrite.
    fn log(&self, entry: &RewriteAuditEntry);
}

/// Discards every entry.
pub struct NoopAuditLogger;

impl AuditLogger for NoopAuditLogger {
    fn log(&self, _entry: &RewriteAuditEntry) {}
}

/// Writes newline-delimited JSON entries to a writer.
pub struct JsonLinesAuditLogger<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesAuditLogger<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> AuditLogger for JsonLinesAuditLogger<W> {
    fn log(&self, entry: &RewriteAuditEntry) {
        let Ok(line) = serde_json::to_string(entry) else {
            return;
        };
        let mut writer = self.writer.lock().expect("audit lock poisoned");
        if writeln!(writer, "{line}").is_err() {
            tracing::warn!(class = %entry.class_name, "failed to write audit entry");
        }
    }
}
