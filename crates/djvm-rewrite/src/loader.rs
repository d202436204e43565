//! The sandbox class loader: drives the rewrite pipeline through the cache
//! and tracks definitions.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::Utc;
use djvm_error::{ClassResolutionError, RuleViolationError, SandboxClassLoadingError};
use thiserror::Error;

use crate::audit::{AuditOutcome, RewriteAuditEntry};
use crate::cache::{hex_digest, CacheEntry};
use crate::config::SandboxConfiguration;
use crate::driver::{RewriteDriver, RewriteError};
use crate::runtime;
use crate::source::SourceError;

/// Where a loaded class is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassOrigin {
    /// A pinned or whitelisted type served by the host namespace.
    Host,
    /// A rewritten type defined by this loader.
    Sandbox,
}

/// A class definition handle. During a load the handle exists with its
/// names resolved but no bytes; recursive requests for the same name
/// observe this in-progress state, which breaks constant-pool
/// self-reference cycles.
#[derive(Debug)]
pub struct SandboxClass {
    sandbox_name: String,
    host_name: String,
    origin: ClassOrigin,
    cell: OnceLock<Arc<CacheEntry>>,
}

impl SandboxClass {
    fn sandboxed(sandbox_name: String, host_name: String) -> Arc<Self> {
        Arc::new(Self {
            sandbox_name,
            host_name,
            origin: ClassOrigin::Sandbox,
            cell: OnceLock::new(),
        })
    }

    fn host(name: &str) -> Arc<Self> {
        Arc::new(Self {
            sandbox_name: name.to_owned(),
            host_name: name.to_owned(),
            origin: ClassOrigin::Host,
            cell: OnceLock::new(),
        })
    }

    /// The sandbox internal name.
    pub fn name(&self) -> &str {
        &self.sandbox_name
    }

    /// The host internal name the definition came from.
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Where the class is defined.
    pub fn origin(&self) -> ClassOrigin {
        self.origin
    }

    /// The rewritten bytes; `None` while the class is still loading or when
    /// it is host-defined.
    pub fn bytes(&self) -> Option<&[u8]> {
        self.cell.get().map(|entry| entry.bytes.as_slice())
    }

    /// Sandbox names the rewritten class refers to.
    pub fn references(&self) -> Option<&BTreeSet<String>> {
        self.cell.get().map(|entry| &entry.references)
    }

    /// True once the definition is complete.
    pub fn is_defined(&self) -> bool {
        self.origin == ClassOrigin::Host || self.cell.get().is_some()
    }
}

/// Errors from [`SandboxClassLoader::load_sandbox_class`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SandboxLoadError {
    /// A forbidden value reached the sandbox boundary.
    #[error(transparent)]
    Rule(#[from] RuleViolationError),

    /// The rewrite failed analysis; terminally cached for the class.
    #[error("{0}")]
    Loading(Arc<SandboxClassLoadingError>),

    /// The source layer could not locate or read the class.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Rewritten or cached bytes failed the codec.
    #[error(transparent)]
    Format(#[from] djvm_classfile::ClassFormatError),

    /// The external cache failed.
    #[error("external cache failure: {0}")]
    External(#[source] anyhow::Error),
}

enum LoadState {
    Loading(Arc<SandboxClass>),
    Defined(Arc<SandboxClass>),
    Failed(Arc<SandboxClassLoadingError>),
}

/// Loads sandbox classes, rewriting on cache misses and defining each class
/// at most once.
pub struct SandboxClassLoader {
    config: Arc<SandboxConfiguration>,
    parent: Option<Arc<SandboxClassLoader>>,
    classes: Mutex<HashMap<String, LoadState>>,
}

impl SandboxClassLoader {
    /// A root loader over a configuration.
    pub fn new(config: Arc<SandboxConfiguration>) -> Arc<Self> {
        Arc::new(Self {
            config,
            parent: None,
            classes: Mutex::new(HashMap::new()),
        })
    }

    /// A child loader. User code that walks `getParent()` only ever sees
    /// sandbox loaders; there is no path up to the host application loader.
    pub fn with_parent(parent: Arc<SandboxClassLoader>, config: Arc<SandboxConfiguration>) -> Arc<Self> {
        Arc::new(Self {
            config,
            parent: Some(parent),
            classes: Mutex::new(HashMap::new()),
        })
    }

    /// The parent sandbox loader, when present.
    pub fn parent(&self) -> Option<&Arc<SandboxClassLoader>> {
        self.parent.as_ref()
    }

    /// The configuration this loader rewrites under.
    pub fn configuration(&self) -> &Arc<SandboxConfiguration> {
        &self.config
    }

    /// Load (and define, at most once) the class named `name`.
    ///
    /// Non-sandbox names fall through to the host namespace when pinned or
    /// whitelisted and fail otherwise. Recursive requests for a name whose
    /// load is in progress return the in-progress handle. A rewrite failure
    /// is terminally cached; later requests observe the same error.
    pub fn load_sandbox_class(&self, name: &str) -> Result<Arc<SandboxClass>, SandboxLoadError> {
        if !name.starts_with(runtime::SANDBOX_PREFIX) {
            let resolver = self.config.resolver();
            if resolver.is_pinned(name) || self.config.whitelist().contains(name) {
                return Ok(self.intern_host_class(name));
            }
            return Err(SourceError::from(ClassResolutionError::ClassNotFound(name.to_owned())).into());
        }

        let handle = {
            let mut classes = self.classes.lock().expect("class table poisoned");
            match classes.get(name) {
                Some(LoadState::Defined(class)) | Some(LoadState::Loading(class)) => {
                    return Ok(Arc::clone(class))
                }
                Some(LoadState::Failed(error)) => {
                    return Err(SandboxLoadError::Loading(Arc::clone(error)))
                }
                None => {}
            }
            let host_name = self.config.resolver().reverse(name);
            let handle = SandboxClass::sandboxed(name.to_owned(), host_name);
            classes.insert(name.to_owned(), LoadState::Loading(Arc::clone(&handle)));
            handle
        };

        match self.define(name, &handle) {
            Ok(()) => {
                let mut classes = self.classes.lock().expect("class table poisoned");
                classes.insert(name.to_owned(), LoadState::Defined(Arc::clone(&handle)));
                Ok(handle)
            }
            Err(SandboxLoadError::Loading(error)) => {
                let mut classes = self.classes.lock().expect("class table poisoned");
                classes.insert(name.to_owned(), LoadState::Failed(Arc::clone(&error)));
                Err(SandboxLoadError::Loading(error))
            }
            Err(other) => {
                // Transient failures unwind the loading marker entirely.
                let mut classes = self.classes.lock().expect("class table poisoned");
                classes.remove(name);
                Err(other)
            }
        }
    }

    /// Load every referenced class to its transitive closure.
    pub fn resolve_references(&self, references: &BTreeSet<String>) -> Result<usize, SandboxLoadError> {
        let mut pending: Vec<String> = references.iter().cloned().collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut defined = 0;
        while let Some(name) = pending.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let class = self.load_sandbox_class(&name)?;
            defined += 1;
            if let Some(next) = class.references() {
                pending.extend(next.iter().cloned());
            }
        }
        Ok(defined)
    }

    /// Validate a value crossing into the sandbox. Host reflection objects
    /// and classloaders may not cross; the check recurses into arrays.
    pub fn sandbox_argument(&self, value: &BoundaryValue) -> Result<(), RuleViolationError> {
        validate_argument(value)
    }

    fn intern_host_class(&self, name: &str) -> Arc<SandboxClass> {
        let mut classes = self.classes.lock().expect("class table poisoned");
        if let Some(LoadState::Defined(class)) = classes.get(name) {
            return Arc::clone(class);
        }
        let class = SandboxClass::host(name);
        classes.insert(name.to_owned(), LoadState::Defined(Arc::clone(&class)));
        class
    }

    fn define(&self, name: &str, handle: &Arc<SandboxClass>) -> Result<(), SandboxLoadError> {
        // The external cache is a pure side-channel consulted first.
        if let Some(external) = self.config.external_cache() {
            match external.get(name) {
                Ok(Some(bytes)) => {
                    let references = sandbox_references(&bytes)?;
                    let entry = self
                        .config
                        .cache()
                        .put_if_absent(name, CacheEntry::new(bytes, references));
                    self.audit_hit(handle, &entry);
                    let _ = handle.cell.set(entry);
                    return Ok(());
                }
                Ok(None) => {}
                Err(error) => return Err(SandboxLoadError::External(error)),
            }
        }

        if let Some(entry) = self.config.cache().get(name) {
            tracing::debug!(class = %name, "bytecode cache hit");
            self.audit_hit(handle, &entry);
            let _ = handle.cell.set(entry);
            return Ok(());
        }

        // The deterministic runtime's own classes live in the bootstrap
        // archive under their sandbox names already; fall back to the
        // unreversed name for those.
        let host_bytes = match self.config.source().load_class_bytes(&handle.host_name) {
            Ok(bytes) => bytes,
            Err(SourceError::Resolution(_)) if handle.host_name != name => {
                self.config.source().load_class_bytes(name)?
            }
            Err(error) => return Err(error.into()),
        };
        let source_digest = hex_digest(&host_bytes);
        let driver = RewriteDriver::new(&self.config);
        match driver.rewrite(&host_bytes) {
            Ok(rewritten) => {
                let diagnostics = rewritten.diagnostics.len();
                let entry = CacheEntry::new(rewritten.bytes, rewritten.references);
                if let Some(external) = self.config.external_cache() {
                    if let Err(error) = external.put(name, &entry.bytes) {
                        tracing::warn!(class = %name, %error, "external cache write failed");
                    }
                }
                let entry = self.config.cache().put_if_absent(name, entry);
                self.config.audit_logger().log(&RewriteAuditEntry {
                    class_name: name.to_owned(),
                    host_name: handle.host_name.clone(),
                    timestamp: Utc::now(),
                    source_digest,
                    rewritten_digest: Some(entry.digest.clone()),
                    diagnostics,
                    outcome: AuditOutcome::Rewritten,
                });
                let _ = handle.cell.set(entry);
                Ok(())
            }
            Err(RewriteError::Loading(error)) => {
                self.config.audit_logger().log(&RewriteAuditEntry {
                    class_name: name.to_owned(),
                    host_name: handle.host_name.clone(),
                    timestamp: Utc::now(),
                    source_digest,
                    rewritten_digest: None,
                    diagnostics: error.diagnostics.len(),
                    outcome: AuditOutcome::Failed,
                });
                Err(SandboxLoadError::Loading(Arc::new(error)))
            }
            Err(RewriteError::Format(error)) => Err(error.into()),
        }
    }

    fn audit_hit(&self, handle: &Arc<SandboxClass>, entry: &CacheEntry) {
        self.config.audit_logger().log(&RewriteAuditEntry {
            class_name: handle.sandbox_name.clone(),
            host_name: handle.host_name.clone(),
            timestamp: Utc::now(),
            source_digest: entry.digest.clone(),
            rewritten_digest: Some(entry.digest.clone()),
            diagnostics: 0,
            outcome: AuditOutcome::CacheHit,
        });
    }
}

fn sandbox_references(bytes: &[u8]) -> Result<BTreeSet<String>, djvm_classfile::ClassFormatError> {
    Ok(djvm_classfile::referenced_class_names(bytes)?
        .into_iter()
        .filter(|name| {
            name.starts_with(runtime::SANDBOX_PREFIX) && !runtime::is_platform_shadow(name)
        })
        .collect())
}

/// A value offered to the sandbox boundary entry point.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryValue {
    /// The null reference.
    Null,
    /// A boolean.
    Boolean(bool),
    /// A 32-bit integer (covers byte, short, char, int).
    Int(i32),
    /// A 64-bit integer.
    Long(i64),
    /// A 64-bit float (covers float, double).
    Double(f64),
    /// A string; interned on entry.
    Str(String),
    /// An array; every element is validated.
    Array(Vec<BoundaryValue>),
    /// A host `Class` value, by dotted name.
    Class(String),
    /// A host `Constructor` value, by display form.
    Constructor(String),
    /// A host `Method` value, by display form.
    Method(String),
    /// A host `Field` value, by display form.
    Field(String),
    /// A host `ClassLoader` value, by display form.
    ClassLoader(String),
}

/// Reject host reflection objects and classloaders at the boundary.
pub fn validate_argument(value: &BoundaryValue) -> Result<(), RuleViolationError> {
    match value {
        BoundaryValue::Class(name) => Err(RuleViolationError::cannot_sandbox("class", name)),
        BoundaryValue::Constructor(display) => {
            Err(RuleViolationError::cannot_sandbox("constructor", display))
        }
        BoundaryValue::Method(display) => Err(RuleViolationError::cannot_sandbox("method", display)),
        BoundaryValue::Field(display) => Err(RuleViolationError::cannot_sandbox("field", display)),
        BoundaryValue::ClassLoader(display) => {
            Err(RuleViolationError::cannot_sandbox("classloader", display))
        }
        BoundaryValue::Array(elements) => {
            for element in elements {
                validate_argument(element)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
