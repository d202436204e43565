//! Shared fixtures: classes are built with the codec's own model and laid
//! out as `.class` files under a temporary source directory.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use djvm_classfile::{AccessFlags, ClassFile, CodeElement, Insn, Method, MethodBody};
use djvm_rewrite::SandboxConfiguration;

/// A public class with a single static `run()V` method holding `elements`.
pub fn class_with_run(name: &str, elements: Vec<CodeElement>) -> ClassFile {
    class_with_method(name, "run", "()V", elements)
}

/// A public class with one static method holding `elements`.
pub fn class_with_method(
    name: &str,
    method_name: &str,
    descriptor: &str,
    elements: Vec<CodeElement>,
) -> ClassFile {
    let mut body = MethodBody::new();
    body.elements = elements;
    ClassFile {
        minor_version: 0,
        major_version: 52,
        access: AccessFlags::PUBLIC | AccessFlags::SUPER,
        name: name.into(),
        super_name: Some("java/lang/Object".into()),
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: vec![
            constructor(),
            Method {
                access: AccessFlags::PUBLIC | AccessFlags::STATIC,
                name: method_name.into(),
                descriptor: descriptor.into(),
                exceptions: Vec::new(),
                body: Some(body),
                annotations: Vec::new(),
            },
        ],
        source_file: Some("Fixture.java".into()),
        inner_classes: Vec::new(),
        enclosing_method: None,
        annotations: Vec::new(),
        bootstrap_methods: Vec::new(),
    }
}

/// The canonical no-op instance constructor.
pub fn constructor() -> Method {
    let mut body = MethodBody::new();
    body.elements = vec![
        CodeElement::Insn(Insn::Var {
            opcode: djvm_classfile::opcode::ALOAD,
            index: 0,
        }),
        CodeElement::Insn(Insn::invoke_special("java/lang/Object", "<init>", "()V")),
        CodeElement::Insn(Insn::Simple(djvm_classfile::opcode::RETURN)),
    ];
    Method {
        access: AccessFlags::PUBLIC,
        name: "<init>".into(),
        descriptor: "()V".into(),
        exceptions: Vec::new(),
        body: Some(body),
        annotations: Vec::new(),
    }
}

/// Write a class under `dir` at its internal-name path.
pub fn write_class(dir: &Path, class: &ClassFile) {
    let path = dir.join(format!("{}.class", class.name));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, class.to_bytes().unwrap()).unwrap();
}

/// Route tracing output to the test harness when `DJVM_TEST_LOG` is set.
pub fn init_tracing() {
    if std::env::var_os("DJVM_TEST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// A root configuration over one source directory.
pub fn config_over(dir: &Path) -> Arc<SandboxConfiguration> {
    init_tracing();
    Arc::new(
        SandboxConfiguration::builder()
            .user_source([dir.to_path_buf()])
            .build()
            .unwrap(),
    )
}

/// Decode rewritten bytes back into the model.
pub fn decode(bytes: &[u8]) -> ClassFile {
    ClassFile::parse(bytes).unwrap()
}

/// All instructions of the named method.
pub fn instructions_of(class: &ClassFile, method_name: &str) -> Vec<Insn> {
    class
        .methods
        .iter()
        .find(|m| m.name == method_name)
        .and_then(|m| m.body.as_ref())
        .map(|b| b.instructions().cloned().collect())
        .unwrap_or_default()
}
