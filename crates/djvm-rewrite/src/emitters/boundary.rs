//! String wrapping at the host API boundary.
//!
//! Calls into pinned host types cross the namespace boundary: their
//! parameters expect host strings and their results produce host strings,
//! while the surrounding sandbox code traffics exclusively in
//! `sandbox/java/lang/String`. These emitters convert at the call site.
//! Unwrapping is limited to single-parameter signatures, where the value to
//! convert is on top of the operand stack; wider host signatures are either
//! covered by the retargeting emitters or unreachable through the catalog.

use djvm_classfile::{descriptor, Insn};

use crate::runtime;

use super::{EmitContext, Emission, Emitter};

const HOST_STRING: &str = "Ljava/lang/String;";

fn is_boundary_owner(ctx: &EmitContext<'_>, owner: &str) -> bool {
    !owner.starts_with('[')
        && ctx.resolver.is_pinned(owner)
        && !ctx.resolver.is_template(owner)
}

/// Unwraps a sandbox string argument into a host string before a call into
/// a pinned host API.
pub struct ArgumentUnwrapper;

impl Emitter for ArgumentUnwrapper {
    fn emit(&self, ctx: &mut EmitContext<'_>, insn: &Insn) -> Emission {
        let Insn::Invoke {
            owner,
            descriptor: member_descriptor,
            ..
        } = insn
        else {
            return Emission::pass();
        };
        if !is_boundary_owner(ctx, owner) {
            return Emission::pass();
        }
        let Ok((params, _)) = descriptor::method_parts(member_descriptor) else {
            return Emission::pass();
        };
        if params.len() == 1 && params[0] == HOST_STRING {
            return Emission::with_prelude(vec![Insn::invoke_static(
                runtime::DJVM,
                "fromDJVM",
                "(Lsandbox/java/lang/String;)Ljava/lang/String;",
            )]);
        }
        Emission::pass()
    }
}

/// Wraps a host string result into a sandbox string after a call into a
/// pinned host API.
pub struct ReturnTypeWrapper;

impl Emitter for ReturnTypeWrapper {
    fn emit(&self, ctx: &mut EmitContext<'_>, insn: &Insn) -> Emission {
        let Insn::Invoke {
            owner,
            descriptor: member_descriptor,
            ..
        } = insn
        else {
            return Emission::pass();
        };
        if !is_boundary_owner(ctx, owner) {
            return Emission::pass();
        }
        let Ok((_, ret)) = descriptor::method_parts(member_descriptor) else {
            return Emission::pass();
        };
        if ret == HOST_STRING {
            return Emission::with_postlude(vec![Insn::invoke_static(
                runtime::SANDBOX_STRING,
                "toDJVM",
                "(Ljava/lang/String;)Lsandbox/java/lang/String;",
            )]);
        }
        Emission::pass()
    }
}
