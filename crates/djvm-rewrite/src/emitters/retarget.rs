//! Retargeting emitters: virtual calls on `ClassLoader`, `Class`, and
//! `Object` become static calls into the deterministic runtime.

use djvm_classfile::{opcode, Insn};

use crate::policy;
use crate::runtime;

use super::{EmitContext, Emission, Emitter};

fn thunked(owner: &str, name: &str, member_descriptor: &str) -> Option<Emission> {
    policy::static_thunk(owner, name, member_descriptor).map(|thunk| {
        Emission::replace(vec![Insn::invoke_static(
            &thunk.owner,
            &thunk.name,
            &thunk.descriptor,
        )])
    })
}

/// Thunks `ClassLoader` construction and loading into the deterministic
/// runtime. The no-arg constructor loads the sandbox system classloader and
/// delegates to the parented constructor; that injected delegation never
/// re-enters the rule catalog.
pub struct RewriteClassLoaderMethods;

impl Emitter for RewriteClassLoaderMethods {
    fn emit(&self, _ctx: &mut EmitContext<'_>, insn: &Insn) -> Emission {
        let Insn::Invoke {
            opcode: invoke_opcode,
            owner,
            name,
            descriptor: member_descriptor,
            ..
        } = insn
        else {
            return Emission::pass();
        };
        if owner != "java/lang/ClassLoader" {
            return Emission::pass();
        }
        if *invoke_opcode == opcode::INVOKESPECIAL && name == "<init>" && member_descriptor == "()V" {
            return Emission::replace(vec![
                Insn::invoke_static(
                    runtime::DJVM,
                    "getSystemClassLoader",
                    "()Ljava/lang/ClassLoader;",
                ),
                Insn::invoke_special(
                    "java/lang/ClassLoader",
                    "<init>",
                    "(Ljava/lang/ClassLoader;)V",
                ),
            ]);
        }
        thunked(owner, name, member_descriptor).unwrap_or_else(Emission::pass)
    }
}

/// Retargets `Class` accessors that must return sandbox strings.
pub struct RewriteClassMethods;

impl Emitter for RewriteClassMethods {
    fn emit(&self, _ctx: &mut EmitContext<'_>, insn: &Insn) -> Emission {
        let Insn::Invoke {
            owner,
            name,
            descriptor: member_descriptor,
            ..
        } = insn
        else {
            return Emission::pass();
        };
        if owner != "java/lang/Class" {
            return Emission::pass();
        }
        thunked(owner, name, member_descriptor).unwrap_or_else(Emission::pass)
    }
}

/// Retargets `Object` methods. `toString()` is special: it becomes a
/// virtual call to `toDJVMString()` so the sandbox can return a sandbox
/// string from user overrides. Constructors whose class now extends the
/// sandbox `Object` get their super call retargeted to match.
pub struct RewriteObjectMethods;

impl Emitter for RewriteObjectMethods {
    fn emit(&self, ctx: &mut EmitContext<'_>, insn: &Insn) -> Emission {
        let Insn::Invoke {
            opcode: invoke_opcode,
            owner,
            name,
            descriptor: member_descriptor,
            ..
        } = insn
        else {
            return Emission::pass();
        };
        if owner != "java/lang/Object" {
            return Emission::pass();
        }
        if *invoke_opcode == opcode::INVOKESPECIAL
            && name == "<init>"
            && member_descriptor == "()V"
            && ctx.member_name == "<init>"
            && ctx.analysis.class.super_name.as_deref() == Some(runtime::SANDBOX_OBJECT)
        {
            return Emission::replace(vec![Insn::invoke_special(
                runtime::SANDBOX_OBJECT,
                "<init>",
                "()V",
            )]);
        }
        if *invoke_opcode == opcode::INVOKEVIRTUAL
            && name == "toString"
            && member_descriptor == "()Ljava/lang/String;"
        {
            return Emission::replace(vec![Insn::invoke_virtual(
                runtime::SANDBOX_OBJECT,
                "toDJVMString",
                "()Lsandbox/java/lang/String;",
            )]);
        }
        if name == "hashCode" && member_descriptor == "()I" {
            return thunked(owner, name, member_descriptor).unwrap_or_else(Emission::pass);
        }
        Emission::pass()
    }
}
