//! Definition providers: pure functions over class and member metadata.
//!
//! Providers run in list order during analysis; each receives a record and
//! returns either the same record or a new one. They never see instruction
//! streams (that is the emitters' job) but may install whole replacement
//! bodies.

use djvm_classfile::{opcode, AccessFlags, CodeElement, ConstantValue, Insn, MethodBody};

use crate::analysis::{AnalysisContext, ClassRecord, MemberRecord};
use crate::runtime;

/// Rewrites class or member metadata before emission.
pub trait DefinitionProvider: Send + Sync {
    /// Rewrite the class record.
    fn rewrite_class(&self, _ctx: &mut AnalysisContext, class: ClassRecord) -> ClassRecord {
        class
    }

    /// Rewrite one member record.
    fn rewrite_member(&self, _ctx: &mut AnalysisContext, member: MemberRecord) -> MemberRecord {
        member
    }
}

/// The default provider list, in application order.
pub fn standard_providers() -> Vec<Box<dyn DefinitionProvider>> {
    vec![
        Box::new(AlwaysInheritFromSandboxedObject),
        Box::new(AlwaysUseNonSynchronizedMethods),
        Box::new(AlwaysUseStrictFloatingPointArithmetic),
        Box::new(ConstantFieldRemover),
        Box::new(StubOutFinalizerMethods),
        Box::new(StubOutNativeMethods),
        Box::new(StubOutIntrospectiveMethods),
    ]
}

/// Rewrites the super of any class whose host super is `Object` to the
/// sandbox `Object`, rooting the whole sandbox hierarchy there.
pub struct AlwaysInheritFromSandboxedObject;

impl DefinitionProvider for AlwaysInheritFromSandboxedObject {
    fn rewrite_class(&self, _ctx: &mut AnalysisContext, mut class: ClassRecord) -> ClassRecord {
        if class.super_name.as_deref() == Some("java/lang/Object")
            && !class.host_name.starts_with(runtime::SANDBOX_PREFIX)
        {
            class.super_name = Some(runtime::SANDBOX_OBJECT.to_owned());
        }
        class
    }
}

/// Clears the synchronized flag bit on method access.
pub struct AlwaysUseNonSynchronizedMethods;

impl DefinitionProvider for AlwaysUseNonSynchronizedMethods {
    fn rewrite_member(&self, _ctx: &mut AnalysisContext, mut member: MemberRecord) -> MemberRecord {
        if member.is_method() {
            member.access -= AccessFlags::SYNCHRONIZED;
        }
        member
    }
}

/// Sets the strict-fp bit on every method.
pub struct AlwaysUseStrictFloatingPointArithmetic;

impl DefinitionProvider for AlwaysUseStrictFloatingPointArithmetic {
    fn rewrite_member(&self, _ctx: &mut AnalysisContext, mut member: MemberRecord) -> MemberRecord {
        if member.is_method() {
            member.access |= AccessFlags::STRICT;
        }
        member
    }
}

/// Strips constant-pool initial values from `String` fields and retargets
/// the field to the sandbox string type. For static fields the original
/// constant is deferred; the driver synthesizes a static-initializer
/// prologue that loads it, interns it through the deterministic runtime,
/// and stores the sandbox string into the field.
pub struct ConstantFieldRemover;

impl DefinitionProvider for ConstantFieldRemover {
    fn rewrite_member(&self, ctx: &mut AnalysisContext, mut member: MemberRecord) -> MemberRecord {
        if member.is_method() || member.descriptor != "Ljava/lang/String;" {
            return member;
        }
        if let Some(ConstantValue::Str(value)) = member.constant_value.take() {
            member.descriptor = format!("L{};", runtime::SANDBOX_STRING);
            if member.access.contains(AccessFlags::STATIC) {
                ctx.defer_string_field(member.name.clone(), value);
            }
        }
        member
    }
}

/// Replaces finalizer bodies with a bare `return`.
pub struct StubOutFinalizerMethods;

impl DefinitionProvider for StubOutFinalizerMethods {
    fn rewrite_member(&self, _ctx: &mut AnalysisContext, mut member: MemberRecord) -> MemberRecord {
        if member.name == "finalize" && member.descriptor == "()V" && member.body.is_some() {
            member.body = Some(return_body());
        }
        member
    }
}

/// Removes the native flag and installs a body that raises a deterministic
/// error when the method is reached.
///
/// The stub constructs the exception in the host namespace; the emitter
/// chain then interns the message, the remapper relocates the exception
/// type, and the throw wrapper converts back to a host throwable. The
/// constructor descriptor names the sandbox string explicitly because that
/// is what interning leaves on the stack.
pub struct StubOutNativeMethods;

impl DefinitionProvider for StubOutNativeMethods {
    fn rewrite_member(&self, _ctx: &mut AnalysisContext, mut member: MemberRecord) -> MemberRecord {
        if !member.is_method() || !member.access.contains(AccessFlags::NATIVE) {
            return member;
        }
        member.access -= AccessFlags::NATIVE;
        let mut body = MethodBody::new();
        body.elements = vec![
            CodeElement::Insn(Insn::Type {
                opcode: opcode::NEW,
                name: "java/lang/UnsupportedOperationException".into(),
            }),
            CodeElement::Insn(Insn::Simple(opcode::DUP)),
            CodeElement::Insn(Insn::ldc_string(format!(
                "Native method has been deleted; {}.{}{}",
                member.owner.replace('/', "."),
                member.name,
                member.descriptor
            ))),
            CodeElement::Insn(Insn::invoke_special(
                "java/lang/UnsupportedOperationException",
                "<init>",
                &format!("(L{};)V", runtime::SANDBOX_STRING),
            )),
            CodeElement::Insn(Insn::Simple(opcode::ATHROW)),
        ];
        member.body = Some(body);
        member
    }
}

/// Platform introspection hooks become deterministic no-ops.
pub struct StubOutIntrospectiveMethods;

/// Reflection-registry hooks the host runtime calls during class
/// initialization.
const INTROSPECTIVE_METHODS: &[&str] = &["registerNatives", "initIDs"];

impl DefinitionProvider for StubOutIntrospectiveMethods {
    fn rewrite_member(&self, _ctx: &mut AnalysisContext, mut member: MemberRecord) -> MemberRecord {
        if member.is_method()
            && member.descriptor == "()V"
            && INTROSPECTIVE_METHODS.contains(&member.name.as_str())
            && member.body.is_some()
        {
            member.body = Some(return_body());
        }
        member
    }
}

fn return_body() -> MethodBody {
    let mut body = MethodBody::new();
    body.elements = vec![CodeElement::Insn(Insn::Simple(opcode::RETURN))];
    body
}
