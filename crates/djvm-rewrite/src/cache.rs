//! Hierarchical bytecode caching and the external cache seam.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};

/// One immutable cache entry: final rewritten bytes plus the sandbox names
/// the class refers to (for reachability) and a content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The final rewritten class bytes.
    pub bytes: Vec<u8>,
    /// Sandbox names the rewritten class refers to.
    pub references: BTreeSet<String>,
    /// SHA-256 of `bytes`, hex-encoded.
    pub digest: String,
}

impl CacheEntry {
    /// Build an entry, computing the content digest.
    pub fn new(bytes: Vec<u8>, references: BTreeSet<String>) -> Self {
        let digest = hex_digest(&bytes);
        Self {
            bytes,
            references,
            digest,
        }
    }
}

/// Hex-encoded SHA-256 of a byte sequence.
pub(crate) fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// A hierarchical cache of rewritten classes, keyed by sandbox internal
/// name. Reads consult the parent chain first, so a parent entry shadows
/// anything a child might insert under the same key; writes stay local.
#[derive(Debug, Default)]
pub struct ByteCodeCache {
    parent: Option<Arc<ByteCodeCache>>,
    local: RwLock<HashMap<String, Arc<CacheEntry>>>,
}

impl ByteCodeCache {
    /// A root cache.
    pub fn root() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A cache chained under `parent`.
    pub fn child_of(parent: Arc<ByteCodeCache>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(parent),
            local: RwLock::new(HashMap::new()),
        })
    }

    /// Look `name` up, parent chain first.
    pub fn get(&self, name: &str) -> Option<Arc<CacheEntry>> {
        if let Some(parent) = &self.parent {
            if let Some(entry) = parent.get(name) {
                return Some(entry);
            }
        }
        self.local.read().expect("cache lock poisoned").get(name).cloned()
    }

    /// Publish an entry locally unless one already exists anywhere in the
    /// chain; the surviving entry is returned.
    pub fn put_if_absent(&self, name: &str, entry: CacheEntry) -> Arc<CacheEntry> {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        let mut local = self.local.write().expect("cache lock poisoned");
        Arc::clone(
            local
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(entry)),
        )
    }

    /// Number of locally held entries (excludes the parent chain).
    pub fn local_len(&self) -> usize {
        self.local.read().expect("cache lock poisoned").len()
    }
}

/// A caller-provided shared store of rewritten bytes, keyed by sandbox
/// name. Consulted before the local chain on read and updated on write. It
/// is a pure side-channel: it only ever sees fully rewritten, validated
/// bytes, and identical keys always carry identical bytes by construction,
/// so last-writer-wins is safe. Implementations fronting asynchronous
/// stores must resolve before returning.
pub trait ExternalCache: Send + Sync {
    /// Fetch previously published bytes for `name`.
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, anyhow::Error>;

    /// Publish rewritten bytes for `name`.
    fn put(&self, name: &str, bytes: &[u8]) -> Result<(), anyhow::Error>;
}
