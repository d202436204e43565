//! Source layer behavior over real archives, plus the preload manifest.

mod common;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use common::{class_with_run, write_class};
use djvm_classfile::{opcode, CodeElement, Insn};
use djvm_rewrite::preload::preload;
use djvm_rewrite::source::{SourceClassLoader, SourceError};
use djvm_rewrite::{SandboxClassLoader, SandboxConfiguration};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

/// Build a jar-like archive holding the given classes, optionally flagged
/// for preloading.
fn build_archive(
    dir: &TempDir,
    file_name: &str,
    classes: &[djvm_classfile::ClassFile],
    preload_manifest: bool,
) -> PathBuf {
    let path = dir.path().join(file_name);
    let file = std::fs::File::create(&path).unwrap();
    let mut archive = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for class in classes {
        archive
            .start_file(format!("{}.class", class.name), options)
            .unwrap();
        archive.write_all(&class.to_bytes().unwrap()).unwrap();
    }
    if preload_manifest {
        archive.start_file("META-INF/DJVM-preload", options).unwrap();
        archive.write_all(b"").unwrap();
    }
    archive.finish().unwrap();
    path
}

fn return_only(name: &str) -> djvm_classfile::ClassFile {
    class_with_run(name, vec![CodeElement::Insn(Insn::Simple(opcode::RETURN))])
}

#[test]
fn archives_serve_class_bytes() {
    let dir = TempDir::new().unwrap();
    let archive = build_archive(&dir, "app.jar", &[return_only("com/example/FromJar")], false);
    let source = SourceClassLoader::from_paths(&[archive]).unwrap();
    let bytes = source.load_class_bytes("com/example/FromJar").unwrap();
    assert_eq!(
        djvm_classfile::ClassHeader::parse(&bytes).unwrap().name,
        "com/example/FromJar"
    );
    let missing = source.load_class_bytes("com/example/Absent");
    assert!(matches!(missing, Err(SourceError::Resolution(_))));
}

#[test]
fn parents_win_over_local_archives() {
    let dir = TempDir::new().unwrap();
    // Same class name in both archives; the SourceFile attribute tells the
    // copies apart.
    let mut parent_class = return_only("com/example/Shadowed");
    parent_class.source_file = Some("Parent.java".into());
    let mut child_class = return_only("com/example/Shadowed");
    child_class.source_file = Some("Child.java".into());

    let parent_archive = build_archive(&dir, "parent.jar", &[parent_class], false);
    let child_archive = build_archive(&dir, "child.jar", &[child_class], false);

    let parent = Arc::new(SourceClassLoader::from_paths(&[parent_archive]).unwrap());
    let child = SourceClassLoader::with_parent(Some(parent), &[child_archive]).unwrap();

    let bytes = child.load_class_bytes("com/example/Shadowed").unwrap();
    let parsed = djvm_classfile::ClassFile::parse(&bytes).unwrap();
    assert_eq!(parsed.source_file.as_deref(), Some("Parent.java"));
}

#[test]
fn headers_answer_hierarchy_questions() {
    let dir = TempDir::new().unwrap();
    let mut error_class = return_only("com/example/AppError");
    error_class.super_name = Some("java/lang/Error".into());
    let plain_class = return_only("com/example/Plain");
    let archive = build_archive(&dir, "app.jar", &[error_class, plain_class], false);
    let source = SourceClassLoader::from_paths(&[archive]).unwrap();

    let header = source.load_class_header("com/example/AppError").unwrap();
    assert_eq!(header.super_name.as_deref(), Some("java/lang/Error"));

    assert!(source.is_throwable("com/example/AppError"));
    assert!(!source.is_throwable("com/example/Plain"));
    assert!(source.is_assignable_from("java/lang/Error", "com/example/AppError"));
    assert!(!source.is_assignable_from("com/example/AppError", "com/example/Plain"));
}

#[test]
fn directories_and_archives_mix() {
    let dir = TempDir::new().unwrap();
    let class_dir = TempDir::new().unwrap();
    write_class(class_dir.path(), &return_only("com/example/FromDir"));
    let archive = build_archive(&dir, "app.jar", &[return_only("com/example/FromJar")], false);

    let source =
        SourceClassLoader::from_paths(&[archive, class_dir.path().to_path_buf()]).unwrap();
    assert!(source.load_class_bytes("com/example/FromDir").is_ok());
    assert!(source.load_class_bytes("com/example/FromJar").is_ok());
}

#[test]
fn preload_manifest_rewrites_the_whole_archive() {
    let dir = TempDir::new().unwrap();
    // Worker references Helper, so the closure chase must define both even
    // though Helper lives outside the preload archive.
    let worker = class_with_run(
        "com/example/Worker",
        vec![
            CodeElement::Insn(Insn::Type {
                opcode: opcode::NEW,
                name: "com/example/Helper".into(),
            }),
            CodeElement::Insn(Insn::Simple(opcode::POP)),
            CodeElement::Insn(Insn::Simple(opcode::RETURN)),
        ],
    );
    let archive = build_archive(&dir, "preload.jar", &[worker], true);
    let helper_dir = TempDir::new().unwrap();
    write_class(helper_dir.path(), &return_only("com/example/Helper"));

    let config = Arc::new(
        SandboxConfiguration::builder()
            .user_source([archive, helper_dir.path().to_path_buf()])
            .build()
            .unwrap(),
    );
    let loader = SandboxClassLoader::new(Arc::clone(&config));
    let summary = preload(&loader).unwrap();

    assert_eq!(summary.archives, 1);
    assert_eq!(summary.classes, 1);
    assert!(summary.chased >= 1, "the referenced helper must be chased");
    assert!(config.cache().get("sandbox/com/example/Worker").is_some());
    assert!(config.cache().get("sandbox/com/example/Helper").is_some());
}

#[test]
fn archives_without_the_manifest_are_not_preloaded() {
    let dir = TempDir::new().unwrap();
    let archive = build_archive(&dir, "plain.jar", &[return_only("com/example/Lazy")], false);
    let config = Arc::new(
        SandboxConfiguration::builder()
            .user_source([archive])
            .build()
            .unwrap(),
    );
    let loader = SandboxClassLoader::new(Arc::clone(&config));
    let summary = preload(&loader).unwrap();
    assert_eq!(summary.archives, 0);
    assert_eq!(summary.classes, 0);
    assert!(config.cache().get("sandbox/com/example/Lazy").is_none());
}
