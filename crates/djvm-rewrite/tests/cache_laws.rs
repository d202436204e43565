//! Cache behavior through the loader: hierarchy, the external side-channel,
//! and failure isolation.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use common::{class_with_run, config_over, write_class};
use djvm_classfile::{opcode, CodeElement, Insn};
use djvm_rewrite::{ExternalCache, SandboxClassLoader, SandboxConfiguration};
use tempfile::TempDir;

/// An in-memory external cache that counts its traffic.
#[derive(Default)]
struct MapCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    gets: Mutex<usize>,
    puts: Mutex<usize>,
}

impl ExternalCache for MapCache {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, anyhow::Error> {
        *self.gets.lock().unwrap() += 1;
        Ok(self.entries.lock().unwrap().get(name).cloned())
    }

    fn put(&self, name: &str, bytes: &[u8]) -> Result<(), anyhow::Error> {
        *self.puts.lock().unwrap() += 1;
        self.entries.lock().unwrap().insert(name.to_owned(), bytes.to_vec());
        Ok(())
    }
}

fn plain_class(name: &str) -> djvm_classfile::ClassFile {
    class_with_run(name, vec![CodeElement::Insn(Insn::Simple(opcode::RETURN))])
}

#[test]
fn second_load_is_served_from_the_local_cache() {
    let dir = TempDir::new().unwrap();
    write_class(dir.path(), &plain_class("com/example/Cached"));
    let config = config_over(dir.path());
    let loader = SandboxClassLoader::new(Arc::clone(&config));

    let first = loader.load_sandbox_class("sandbox/com/example/Cached").unwrap();
    let second = loader.load_sandbox_class("sandbox/com/example/Cached").unwrap();
    assert!(Arc::ptr_eq(&first, &second), "one definition per loader");
    assert_eq!(config.cache().local_len(), 1);
}

#[test]
fn child_configuration_reads_the_parent_cache() {
    let dir = TempDir::new().unwrap();
    write_class(dir.path(), &plain_class("com/example/Shared"));
    let root_config = config_over(dir.path());
    let root_loader = SandboxClassLoader::new(Arc::clone(&root_config));
    let parent_bytes = root_loader
        .load_sandbox_class("sandbox/com/example/Shared")
        .unwrap()
        .bytes()
        .unwrap()
        .to_vec();

    let child_config = root_config.create_child(&[]).unwrap();
    let child_loader =
        SandboxClassLoader::with_parent(root_loader, Arc::clone(&child_config));
    let child_class = child_loader
        .load_sandbox_class("sandbox/com/example/Shared")
        .unwrap();
    assert_eq!(child_class.bytes().unwrap(), parent_bytes.as_slice());
    assert_eq!(child_config.cache().local_len(), 0, "hit must come from the parent");
}

#[test]
fn external_cache_is_written_through_and_consulted_first() {
    let dir = TempDir::new().unwrap();
    write_class(dir.path(), &plain_class("com/example/Published"));
    let external = Arc::new(MapCache::default());

    let first_config = Arc::new(
        SandboxConfiguration::builder()
            .user_source([dir.path().to_path_buf()])
            .external_cache(Arc::clone(&external) as Arc<dyn ExternalCache>)
            .build()
            .unwrap(),
    );
    let bytes = SandboxClassLoader::new(first_config)
        .load_sandbox_class("sandbox/com/example/Published")
        .unwrap()
        .bytes()
        .unwrap()
        .to_vec();
    assert_eq!(*external.puts.lock().unwrap(), 1);

    // A fresh configuration (empty local cache) over an empty source dir:
    // only the external cache can satisfy the load.
    let empty = TempDir::new().unwrap();
    let second_config = Arc::new(
        SandboxConfiguration::builder()
            .user_source([empty.path().to_path_buf()])
            .external_cache(Arc::clone(&external) as Arc<dyn ExternalCache>)
            .build()
            .unwrap(),
    );
    let served = SandboxClassLoader::new(second_config)
        .load_sandbox_class("sandbox/com/example/Published")
        .unwrap();
    assert_eq!(served.bytes().unwrap(), bytes.as_slice());
    assert!(*external.gets.lock().unwrap() >= 2);
}

#[test]
fn failed_rewrites_are_not_published() {
    let dir = TempDir::new().unwrap();
    let class = common::class_with_method(
        "com/example/Broken",
        "fromDJVM",
        "()Ljava/lang/String;",
        vec![
            CodeElement::Insn(Insn::Simple(opcode::ACONST_NULL)),
            CodeElement::Insn(Insn::Simple(opcode::ARETURN)),
        ],
    );
    write_class(dir.path(), &class);

    let external = Arc::new(MapCache::default());
    let config = Arc::new(
        SandboxConfiguration::builder()
            .user_source([dir.path().to_path_buf()])
            .external_cache(Arc::clone(&external) as Arc<dyn ExternalCache>)
            .build()
            .unwrap(),
    );
    let loader = SandboxClassLoader::new(Arc::clone(&config));
    assert!(loader.load_sandbox_class("sandbox/com/example/Broken").is_err());
    assert_eq!(config.cache().local_len(), 0, "failed entries must not be cached");
    assert_eq!(*external.puts.lock().unwrap(), 0, "failed entries must not reach the external cache");
}

#[test]
fn pinned_and_whitelisted_names_fall_through_to_the_host() {
    let dir = TempDir::new().unwrap();
    let loader = SandboxClassLoader::new(config_over(dir.path()));

    let pinned = loader.load_sandbox_class("java/lang/String").unwrap();
    assert_eq!(pinned.origin(), djvm_rewrite::ClassOrigin::Host);
    assert!(pinned.bytes().is_none());

    let whitelisted = loader.load_sandbox_class("java/lang/Object").unwrap();
    assert_eq!(whitelisted.origin(), djvm_rewrite::ClassOrigin::Host);

    let unknown = loader.load_sandbox_class("com/example/Loose");
    assert!(unknown.is_err(), "non-sandbox, non-permitted names must fail");
}
