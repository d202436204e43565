//! End-to-end rewrite scenarios through the full loader pipeline.

mod common;

use common::{class_with_method, class_with_run, config_over, decode, instructions_of, write_class};

use djvm_classfile::{
    opcode, AccessFlags, CodeElement, ConstantValue, Field, Insn, LdcConst, Method, MethodBody,
};
use djvm_rewrite::loader::validate_argument;
use djvm_rewrite::{BoundaryValue, SandboxClassLoader, SandboxLoadError};
use tempfile::TempDir;

fn invoke(opcode_value: u8, owner: &str, name: &str, descriptor: &str) -> CodeElement {
    CodeElement::Insn(Insn::Invoke {
        opcode: opcode_value,
        owner: owner.into(),
        name: name.into(),
        descriptor: descriptor.into(),
        interface: false,
    })
}

fn load(dir: &TempDir, sandbox_name: &str) -> Result<Vec<Insn>, SandboxLoadError> {
    let loader = SandboxClassLoader::new(config_over(dir.path()));
    let class = loader.load_sandbox_class(sandbox_name)?;
    let rewritten = decode(class.bytes().expect("defined class has bytes"));
    Ok(instructions_of(&rewritten, "run"))
}

// --- Scenario: forbidden constructor call --------------------------------

#[test]
fn forbidden_constructor_call_injects_rule_violation() {
    let dir = TempDir::new().unwrap();
    write_class(
        dir.path(),
        &class_with_run(
            "com/example/InvokeConstructor",
            vec![
                CodeElement::Insn(Insn::Simple(opcode::ACONST_NULL)),
                CodeElement::Insn(Insn::Simple(opcode::ACONST_NULL)),
                invoke(
                    opcode::INVOKEVIRTUAL,
                    "java/lang/reflect/Constructor",
                    "newInstance",
                    "([Ljava/lang/Object;)Ljava/lang/Object;",
                ),
                CodeElement::Insn(Insn::Simple(opcode::POP)),
                CodeElement::Insn(Insn::Simple(opcode::RETURN)),
            ],
        ),
    );

    let insns = load(&dir, "sandbox/com/example/InvokeConstructor").unwrap();
    let message = "Disallowed reference to API; java.lang.reflect.Constructor.newInstance(Object[])";
    let ldc_at = insns
        .iter()
        .position(|i| matches!(i, Insn::Ldc(LdcConst::Str(s)) if s == message))
        .expect("violation message constant");
    assert!(matches!(
        &insns[ldc_at + 1],
        Insn::Invoke { owner, name, .. }
            if owner == "sandbox/java/lang/DJVM" && name == "fail"
    ));
    assert_eq!(insns[ldc_at + 2], Insn::Simple(opcode::ATHROW));
    assert!(
        !insns.iter().any(|i| matches!(
            i,
            Insn::Invoke { name, .. } if name == "newInstance"
        )),
        "the forbidden invocation must be consumed"
    );
}

// --- Scenario: custom classloader with null parent -----------------------

#[test]
fn parented_class_loader_constructor_is_forbidden() {
    let dir = TempDir::new().unwrap();
    write_class(
        dir.path(),
        &class_with_run(
            "com/example/EvilParent",
            vec![
                CodeElement::Insn(Insn::Type {
                    opcode: opcode::NEW,
                    name: "com/example/EvilLoader".into(),
                }),
                CodeElement::Insn(Insn::Simple(opcode::DUP)),
                CodeElement::Insn(Insn::Simple(opcode::ACONST_NULL)),
                invoke(
                    opcode::INVOKESPECIAL,
                    "java/lang/ClassLoader",
                    "<init>",
                    "(Ljava/lang/ClassLoader;)V",
                ),
                CodeElement::Insn(Insn::Simple(opcode::POP)),
                CodeElement::Insn(Insn::Simple(opcode::RETURN)),
            ],
        ),
    );

    let insns = load(&dir, "sandbox/com/example/EvilParent").unwrap();
    assert!(insns.iter().any(|i| matches!(
        i,
        Insn::Ldc(LdcConst::Str(s))
            if s == "Disallowed reference to API; java.lang.ClassLoader(ClassLoader)"
    )));
}

#[test]
fn no_arg_class_loader_constructor_is_thunked() {
    let dir = TempDir::new().unwrap();
    write_class(
        dir.path(),
        &class_with_run(
            "com/example/PlainLoader",
            vec![
                CodeElement::Insn(Insn::Type {
                    opcode: opcode::NEW,
                    name: "com/example/MyLoader".into(),
                }),
                CodeElement::Insn(Insn::Simple(opcode::DUP)),
                invoke(opcode::INVOKESPECIAL, "java/lang/ClassLoader", "<init>", "()V"),
                CodeElement::Insn(Insn::Simple(opcode::POP)),
                CodeElement::Insn(Insn::Simple(opcode::RETURN)),
            ],
        ),
    );

    let insns = load(&dir, "sandbox/com/example/PlainLoader").unwrap();
    let thunk_at = insns
        .iter()
        .position(|i| matches!(
            i,
            Insn::Invoke { owner, name, .. }
                if owner == "sandbox/java/lang/DJVM" && name == "getSystemClassLoader"
        ))
        .expect("system classloader thunk");
    assert!(matches!(
        &insns[thunk_at + 1],
        Insn::Invoke { opcode: o, owner, descriptor, .. }
            if *o == opcode::INVOKESPECIAL
                && owner == "java/lang/ClassLoader"
                && descriptor == "(Ljava/lang/ClassLoader;)V"
    ));
}

// --- Scenario: parent classloader walk stays inside the sandbox ----------

#[test]
fn loader_parent_chain_never_reaches_the_host() {
    let dir = TempDir::new().unwrap();
    let root_config = config_over(dir.path());
    let root = SandboxClassLoader::new(std::sync::Arc::clone(&root_config));
    let child_config = root_config.create_child(&[]).unwrap();
    let child = SandboxClassLoader::with_parent(std::sync::Arc::clone(&root), child_config);

    let mut hops = 0;
    let mut current = Some(&child);
    let mut last = None;
    while let Some(loader) = current {
        last = Some(loader);
        current = loader.parent();
        hops += 1;
        assert!(hops <= 2, "walk must terminate");
    }
    assert_eq!(hops, 2);
    assert!(last.unwrap().parent().is_none(), "the top loader has no parent");
}

// --- Scenario: reserved member names -------------------------------------

#[test]
fn reserved_member_name_fails_the_load() {
    let dir = TempDir::new().unwrap();
    write_class(
        dir.path(),
        &class_with_method(
            "com/example/Imposter",
            "toDJVMString",
            "()Ljava/lang/String;",
            vec![
                CodeElement::Insn(Insn::Simple(opcode::ACONST_NULL)),
                CodeElement::Insn(Insn::Simple(opcode::ARETURN)),
            ],
        ),
    );

    let loader = SandboxClassLoader::new(config_over(dir.path()));
    let error = loader
        .load_sandbox_class("sandbox/com/example/Imposter")
        .unwrap_err();
    let failure = match error {
        SandboxLoadError::Loading(failure) => failure,
        other => panic!("expected an analysis failure, got {other}"),
    };
    assert!(failure
        .to_string()
        .contains("Class is not allowed to implement toDJVMString()"));

    // The failure is terminal: the next request observes the same error.
    let again = loader
        .load_sandbox_class("sandbox/com/example/Imposter")
        .unwrap_err();
    assert!(matches!(again, SandboxLoadError::Loading(_)));
}

// --- Scenario: forbidden boundary arguments ------------------------------

#[test]
fn host_class_cannot_cross_the_boundary() {
    let err = validate_argument(&BoundaryValue::Class("java.lang.String".into())).unwrap_err();
    assert_eq!(err.to_string(), "Cannot sandbox class java.lang.String");

    let dir = TempDir::new().unwrap();
    let loader = SandboxClassLoader::new(config_over(dir.path()));
    assert!(loader
        .sandbox_argument(&BoundaryValue::ClassLoader("jdk.internal.loader.ClassLoaders$AppClassLoader".into()))
        .is_err());
    assert!(loader.sandbox_argument(&BoundaryValue::Str("fine".into())).is_ok());
}

// --- Scenario: enclosing-constructor reflection stays allowed ------------

#[test]
fn enclosing_constructor_lookup_survives_the_rewrite() {
    let dir = TempDir::new().unwrap();
    write_class(
        dir.path(),
        &class_with_run(
            "com/example/WithEnclosing",
            vec![
                CodeElement::Insn(Insn::Simple(opcode::ACONST_NULL)),
                invoke(
                    opcode::INVOKEVIRTUAL,
                    "java/lang/Class",
                    "getEnclosingConstructor",
                    "()Ljava/lang/reflect/Constructor;",
                ),
                CodeElement::Insn(Insn::Simple(opcode::POP)),
                CodeElement::Insn(Insn::Simple(opcode::RETURN)),
            ],
        ),
    );

    let insns = load(&dir, "sandbox/com/example/WithEnclosing").unwrap();
    assert!(
        insns.iter().any(|i| matches!(
            i,
            Insn::Invoke { owner, name, descriptor, .. }
                if owner == "java/lang/Class"
                    && name == "getEnclosingConstructor"
                    && descriptor == "()Lsandbox/java/lang/reflect/Constructor;"
        )),
        "the whitelisted accessor must survive with a relocated result type"
    );
}

// --- Structural invariants ------------------------------------------------

#[test]
fn object_super_becomes_the_sandbox_object() {
    let dir = TempDir::new().unwrap();
    write_class(
        dir.path(),
        &class_with_run(
            "com/example/Plain",
            vec![CodeElement::Insn(Insn::Simple(opcode::RETURN))],
        ),
    );
    let loader = SandboxClassLoader::new(config_over(dir.path()));
    let class = loader.load_sandbox_class("sandbox/com/example/Plain").unwrap();
    let rewritten = decode(class.bytes().unwrap());
    assert_eq!(rewritten.name, "sandbox/com/example/Plain");
    assert_eq!(rewritten.super_name.as_deref(), Some("sandbox/java/lang/Object"));

    // The constructor's super call follows the rewritten hierarchy.
    let ctor = instructions_of(&rewritten, "<init>");
    assert!(ctor.iter().any(|i| matches!(
        i,
        Insn::Invoke { opcode: o, owner, name, .. }
            if *o == opcode::INVOKESPECIAL
                && owner == "sandbox/java/lang/Object"
                && name == "<init>"
    )));
}

#[test]
fn synchronized_methods_lose_the_flag_and_gain_strictfp() {
    let dir = TempDir::new().unwrap();
    let mut class = class_with_run(
        "com/example/Locked",
        vec![CodeElement::Insn(Insn::Simple(opcode::RETURN))],
    );
    class.methods[1].access |= AccessFlags::SYNCHRONIZED;
    write_class(dir.path(), &class);

    let loader = SandboxClassLoader::new(config_over(dir.path()));
    let loaded = loader.load_sandbox_class("sandbox/com/example/Locked").unwrap();
    let rewritten = decode(loaded.bytes().unwrap());
    for method in &rewritten.methods {
        assert!(!method.access.contains(AccessFlags::SYNCHRONIZED), "{}", method.name);
        assert!(method.access.contains(AccessFlags::STRICT), "{}", method.name);
    }
}

#[test]
fn monitor_instructions_are_elided() {
    let dir = TempDir::new().unwrap();
    write_class(
        dir.path(),
        &class_with_run(
            "com/example/Monitors",
            vec![
                CodeElement::Insn(Insn::Simple(opcode::ACONST_NULL)),
                CodeElement::Insn(Insn::Simple(opcode::MONITORENTER)),
                CodeElement::Insn(Insn::Simple(opcode::ACONST_NULL)),
                CodeElement::Insn(Insn::Simple(opcode::MONITOREXIT)),
                CodeElement::Insn(Insn::Simple(opcode::RETURN)),
            ],
        ),
    );
    let insns = load(&dir, "sandbox/com/example/Monitors").unwrap();
    assert!(!insns
        .iter()
        .any(|i| matches!(i, Insn::Simple(opcode::MONITORENTER) | Insn::Simple(opcode::MONITOREXIT))));
    assert_eq!(
        insns.iter().filter(|i| matches!(i, Insn::Simple(opcode::POP))).count(),
        2,
        "each elided monitor discards its object reference"
    );
}

#[test]
fn string_constants_are_interned() {
    let dir = TempDir::new().unwrap();
    write_class(
        dir.path(),
        &class_with_run(
            "com/example/Greeter",
            vec![
                CodeElement::Insn(Insn::ldc_string("hello")),
                CodeElement::Insn(Insn::Simple(opcode::POP)),
                CodeElement::Insn(Insn::Simple(opcode::RETURN)),
            ],
        ),
    );
    let insns = load(&dir, "sandbox/com/example/Greeter").unwrap();
    let ldc_at = insns
        .iter()
        .position(|i| matches!(i, Insn::Ldc(LdcConst::Str(s)) if s == "hello"))
        .unwrap();
    assert!(matches!(
        &insns[ldc_at + 1],
        Insn::Invoke { owner, name, descriptor, .. }
            if owner == "sandbox/java/lang/DJVM"
                && name == "intern"
                && descriptor == "(Ljava/lang/String;)Lsandbox/java/lang/String;"
    ));
}

#[test]
fn every_reference_is_pinned_whitelisted_or_sandboxed() {
    let dir = TempDir::new().unwrap();
    write_class(
        dir.path(),
        &class_with_run(
            "com/example/Mixed",
            vec![
                CodeElement::Insn(Insn::Type {
                    opcode: opcode::NEW,
                    name: "com/example/Helper".into(),
                }),
                CodeElement::Insn(Insn::Simple(opcode::POP)),
                CodeElement::Insn(Insn::Simple(opcode::ACONST_NULL)),
                invoke(opcode::INVOKEVIRTUAL, "java/lang/String", "length", "()I"),
                CodeElement::Insn(Insn::Simple(opcode::POP)),
                CodeElement::Insn(Insn::Simple(opcode::RETURN)),
            ],
        ),
    );

    let dir_config = config_over(dir.path());
    let loader = SandboxClassLoader::new(std::sync::Arc::clone(&dir_config));
    let class = loader.load_sandbox_class("sandbox/com/example/Mixed").unwrap();
    let referenced = djvm_classfile::referenced_class_names(class.bytes().unwrap()).unwrap();
    let resolver = dir_config.resolver();
    for name in &referenced {
        let permitted = resolver.is_pinned(name)
            || dir_config.whitelist().contains(name)
            || name.starts_with("sandbox/");
        assert!(permitted, "unexpected host reference to {name}");
    }
    assert!(class.references().unwrap().contains("sandbox/com/example/Helper"));
}

#[test]
fn native_methods_become_throwing_stubs() {
    let dir = TempDir::new().unwrap();
    let mut class = class_with_run(
        "com/example/Native",
        vec![CodeElement::Insn(Insn::Simple(opcode::RETURN))],
    );
    class.methods.push(Method {
        access: AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::NATIVE,
        name: "currentTime".into(),
        descriptor: "()J".into(),
        exceptions: Vec::new(),
        body: None,
        annotations: Vec::new(),
    });
    write_class(dir.path(), &class);

    let loader = SandboxClassLoader::new(config_over(dir.path()));
    let loaded = loader.load_sandbox_class("sandbox/com/example/Native").unwrap();
    let rewritten = decode(loaded.bytes().unwrap());
    let stub = rewritten.method("currentTime", "()J").unwrap();
    assert!(!stub.access.contains(AccessFlags::NATIVE));
    let insns: Vec<_> = stub.body.as_ref().unwrap().instructions().cloned().collect();
    assert!(matches!(insns.last(), Some(Insn::Simple(opcode::ATHROW))));
}

#[test]
fn static_string_constants_move_into_a_synthetic_initializer() {
    let dir = TempDir::new().unwrap();
    let mut class = class_with_run(
        "com/example/Constants",
        vec![CodeElement::Insn(Insn::Simple(opcode::RETURN))],
    );
    class.fields.push(Field {
        access: AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL,
        name: "GREETING".into(),
        descriptor: "Ljava/lang/String;".into(),
        constant_value: Some(ConstantValue::Str("hi there".into())),
        annotations: Vec::new(),
    });
    write_class(dir.path(), &class);

    let loader = SandboxClassLoader::new(config_over(dir.path()));
    let loaded = loader.load_sandbox_class("sandbox/com/example/Constants").unwrap();
    let rewritten = decode(loaded.bytes().unwrap());

    let field = &rewritten.fields[0];
    assert_eq!(field.descriptor, "Lsandbox/java/lang/String;");
    assert!(field.constant_value.is_none());

    let clinit = rewritten.method("<clinit>", "()V").expect("synthesized initializer");
    let insns: Vec<_> = clinit.body.as_ref().unwrap().instructions().cloned().collect();
    assert!(matches!(&insns[0], Insn::Ldc(LdcConst::Str(s)) if s == "hi there"));
    assert!(matches!(&insns[1], Insn::Invoke { name, .. } if name == "intern"));
    assert!(matches!(
        &insns[2],
        Insn::Field { opcode: o, owner, name, descriptor }
            if *o == opcode::PUTSTATIC
                && owner == "sandbox/com/example/Constants"
                && name == "GREETING"
                && descriptor == "Lsandbox/java/lang/String;"
    ));
    assert!(matches!(insns.last(), Some(Insn::Simple(opcode::RETURN))));
}

#[test]
fn execution_profile_injects_instrumentation() {
    let dir = TempDir::new().unwrap();
    write_class(
        dir.path(),
        &class_with_run(
            "com/example/Busy",
            vec![
                CodeElement::Insn(Insn::Simple(opcode::ACONST_NULL)),
                invoke(opcode::INVOKEVIRTUAL, "com/example/Helper", "step", "()V"),
                CodeElement::Insn(Insn::Simple(opcode::RETURN)),
            ],
        ),
    );

    let config = std::sync::Arc::new(
        djvm_rewrite::SandboxConfiguration::builder()
            .user_source([dir.path().to_path_buf()])
            .execution_profile(djvm_config::ExecutionProfile::default())
            .build()
            .unwrap(),
    );
    let loader = SandboxClassLoader::new(config);
    let class = loader.load_sandbox_class("sandbox/com/example/Busy").unwrap();
    let rewritten = decode(class.bytes().unwrap());
    let insns = instructions_of(&rewritten, "run");
    assert!(insns.iter().any(|i| matches!(
        i,
        Insn::Invoke { owner, name, .. }
            if owner == "sandbox/RuntimeCostAccounter" && name == "recordInvocation"
    )));
}

#[test]
fn exception_handlers_are_translated() {
    let dir = TempDir::new().unwrap();
    let mut body = MethodBody::new();
    let start = body.new_label();
    let end = body.new_label();
    let handler = body.new_label();
    let done = body.new_label();
    body.elements = vec![
        CodeElement::Label(start),
        CodeElement::Insn(Insn::Simple(opcode::ACONST_NULL)),
        CodeElement::Insn(Insn::Simple(opcode::POP)),
        CodeElement::Label(end),
        CodeElement::Insn(Insn::Branch {
            opcode: opcode::GOTO,
            target: done,
        }),
        CodeElement::Label(handler),
        CodeElement::Insn(Insn::Simple(opcode::ATHROW)),
        CodeElement::Label(done),
        CodeElement::Insn(Insn::Simple(opcode::RETURN)),
    ];
    body.try_catch.push(djvm_classfile::TryCatch {
        start,
        end,
        handler,
        catch_type: Some("java/lang/Throwable".into()),
    });

    let mut class = class_with_run("com/example/Catcher", Vec::new());
    class.methods[1].body = Some(body);
    write_class(dir.path(), &class);

    let insns = load(&dir, "sandbox/com/example/Catcher").unwrap();
    let check_at = insns
        .iter()
        .position(|i| matches!(i, Insn::Invoke { name, .. } if name == "checkCatch"))
        .expect("blacklist guard at handler entry");
    assert!(matches!(
        &insns[check_at + 1],
        Insn::Invoke { name, .. } if name == "doCatch"
    ));
    // The rethrow wraps back into a host throwable before athrow.
    let throw_at = insns
        .iter()
        .position(|i| matches!(i, Insn::Simple(opcode::ATHROW)))
        .unwrap();
    assert!(matches!(
        &insns[throw_at - 1],
        Insn::Invoke { name, .. } if name == "fromDJVM"
    ));
}
