//! Locating raw class bytes: archives, directories, and the parent chain.
//!
//! A source loader is parent-first: if the parent can satisfy a request it
//! wins, otherwise the local archives and directories are searched in
//! insertion order. Archive handles live as long as the loader and are
//! released when it drops.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use djvm_classfile::ClassHeader;
use djvm_error::ClassResolutionError;
use thiserror::Error;
use zip::ZipArchive;

use crate::runtime;

/// Errors from the source layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceError {
    /// The class was not found in any configured source.
    #[error(transparent)]
    Resolution(#[from] ClassResolutionError),

    /// An archive or directory could not be read.
    #[error("failed to read class source: {0}")]
    Io(#[from] std::io::Error),

    /// An archive was malformed.
    #[error("failed to read archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Located bytes did not parse as a class header.
    #[error(transparent)]
    Format(#[from] djvm_classfile::ClassFormatError),
}

enum SourceEntry {
    Archive {
        path: PathBuf,
        archive: Mutex<ZipArchive<BufReader<File>>>,
        has_preload_manifest: bool,
    },
    Directory(PathBuf),
}

/// Locates raw class bytes across a parent chain of archives and
/// directories.
pub struct SourceClassLoader {
    parent: Option<Arc<SourceClassLoader>>,
    entries: Vec<SourceEntry>,
    headers: Mutex<HashMap<String, Arc<ClassHeader>>>,
}

impl SourceClassLoader {
    /// A root loader over the given archive and directory paths.
    pub fn from_paths(paths: &[PathBuf]) -> Result<Self, SourceError> {
        Self::with_parent(None, paths)
    }

    /// A child loader; the parent wins every lookup it can satisfy.
    pub fn with_parent(
        parent: Option<Arc<SourceClassLoader>>,
        paths: &[PathBuf],
    ) -> Result<Self, SourceError> {
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            if path.is_dir() {
                entries.push(SourceEntry::Directory(path.clone()));
            } else {
                let file = BufReader::new(File::open(path)?);
                let mut archive = ZipArchive::new(file)?;
                let has_preload_manifest = archive.by_name(runtime::PRELOAD_MANIFEST).is_ok();
                tracing::debug!(
                    archive = %path.display(),
                    preload = has_preload_manifest,
                    "opened class source archive"
                );
                entries.push(SourceEntry::Archive {
                    path: path.clone(),
                    archive: Mutex::new(archive),
                    has_preload_manifest,
                });
            }
        }
        Ok(Self {
            parent,
            entries,
            headers: Mutex::new(HashMap::new()),
        })
    }

    /// The raw bytes of `name` (a host internal name), parent-first.
    pub fn load_class_bytes(&self, name: &str) -> Result<Vec<u8>, SourceError> {
        if let Some(parent) = &self.parent {
            match parent.load_class_bytes(name) {
                Err(SourceError::Resolution(_)) => {}
                other => return other,
            }
        }
        let resource = format!("{name}.class");
        for entry in &self.entries {
            match entry {
                SourceEntry::Archive { archive, .. } => {
                    let mut archive = archive.lock().expect("archive lock poisoned");
                    let lookup = archive.by_name(&resource);
                    match lookup {
                        Ok(mut file) => {
                            let mut bytes = Vec::with_capacity(file.size() as usize);
                            file.read_to_end(&mut bytes)?;
                            return Ok(bytes);
                        }
                        Err(zip::result::ZipError::FileNotFound) => continue,
                        Err(err) => return Err(err.into()),
                    }
                }
                SourceEntry::Directory(dir) => {
                    let candidate = dir.join(&resource);
                    if candidate.is_file() {
                        return Ok(std::fs::read(candidate)?);
                    }
                }
            }
        }
        Err(ClassResolutionError::ClassNotFound(name.to_owned()).into())
    }

    /// The parsed header of `name`, cached.
    pub fn load_class_header(&self, name: &str) -> Result<Arc<ClassHeader>, SourceError> {
        if let Some(header) = self.headers.lock().expect("header lock poisoned").get(name) {
            return Ok(Arc::clone(header));
        }
        let bytes = self.load_class_bytes(name)?;
        let header = Arc::new(ClassHeader::parse(&bytes)?);
        self.headers
            .lock()
            .expect("header lock poisoned")
            .insert(name.to_owned(), Arc::clone(&header));
        Ok(header)
    }

    /// True when `name` extends `java/lang/Throwable`, walking the super
    /// chain. A chain that leaves the configured sources resolves to false.
    pub fn is_throwable(&self, name: &str) -> bool {
        self.is_assignable_from("java/lang/Throwable", name)
    }

    /// True when `sub` is `sup` or transitively extends or implements it.
    pub fn is_assignable_from(&self, sup: &str, sub: &str) -> bool {
        if sup == sub {
            return true;
        }
        let mut current = sub.to_owned();
        // Bounded walk to stay robust against cyclic inputs.
        for _ in 0..64 {
            if current == sup {
                return true;
            }
            let Ok(header) = self.load_class_header(&current) else {
                // Well-known roots that need no class bytes to answer.
                return matches!(
                    (sup, current.as_str()),
                    ("java/lang/Throwable", "java/lang/Error" | "java/lang/Exception" | "java/lang/RuntimeException")
                );
            };
            if header.interfaces.iter().any(|i| self.is_assignable_from(sup, i)) {
                return true;
            }
            match &header.super_name {
                Some(super_name) => current = super_name.clone(),
                None => return false,
            }
        }
        false
    }

    /// Paths of local archives that carry the preload manifest.
    pub fn preload_archives(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                SourceEntry::Archive {
                    path,
                    has_preload_manifest: true,
                    ..
                } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// The class entries (internal names) of one local archive.
    pub fn archive_class_names(&self, archive_path: &Path) -> Result<Vec<String>, SourceError> {
        for entry in &self.entries {
            if let SourceEntry::Archive { path, archive, .. } = entry {
                if path != archive_path {
                    continue;
                }
                let archive = archive.lock().expect("archive lock poisoned");
                let names = archive
                    .file_names()
                    .filter_map(|n| n.strip_suffix(".class"))
                    .map(str::to_owned)
                    .collect();
                return Ok(names);
            }
        }
        Err(SourceError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("not a configured archive: {}", archive_path.display()),
        )))
    }
}

impl std::fmt::Debug for SourceClassLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let paths: Vec<&Path> = self
            .entries
            .iter()
            .map(|e| match e {
                SourceEntry::Archive { path, .. } => path.as_path(),
                SourceEntry::Directory(path) => path.as_path(),
            })
            .collect();
        f.debug_struct("SourceClassLoader")
            .field("paths", &paths)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
