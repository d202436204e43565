//! Exception translation between the sandbox and host namespaces.
//!
//! Sandboxed code works with `sandbox/java/lang/Throwable` values, but the
//! host VM can only throw and catch host throwables. Every `athrow` wraps
//! its operand back into a host throwable, and every handler entry unwraps
//! the caught host throwable into the sandbox hierarchy. Handlers broad
//! enough to intercept the rewriter's own control-flow errors additionally
//! pass the throwable through a guard that rethrows anything blacklisted.

use djvm_classfile::{opcode, Insn, TryCatch};

use crate::runtime;

use super::{EmitContext, Emission, Emitter};

/// Catch types broad enough to capture the internal control-flow errors
/// used to signal rule violations.
const BLACKLIST_CAPABLE: &[&str] = &["java/lang/Throwable", "java/lang/Error", "java/lang/ThreadDeath"];

/// Prevents user handlers from swallowing rule violations: handlers with a
/// broad or absent catch type re-throw blacklisted errors before user code
/// sees them.
pub struct DisallowCatchingBlacklistedExceptions;

impl Emitter for DisallowCatchingBlacklistedExceptions {
    fn emit_handler(&self, _ctx: &mut EmitContext<'_>, handler: &TryCatch) -> Vec<Insn> {
        let broad = match &handler.catch_type {
            None => true,
            Some(name) => BLACKLIST_CAPABLE.contains(&name.as_str()),
        };
        if broad {
            vec![Insn::invoke_static(
                runtime::DJVM,
                "checkCatch",
                "(Ljava/lang/Throwable;)Ljava/lang/Throwable;",
            )]
        } else {
            Vec::new()
        }
    }
}

/// Unwraps the caught host throwable into its sandbox counterpart at every
/// handler entry.
pub struct HandleExceptionUnwrapper;

impl Emitter for HandleExceptionUnwrapper {
    fn emit_handler(&self, _ctx: &mut EmitContext<'_>, _handler: &TryCatch) -> Vec<Insn> {
        vec![Insn::invoke_static(
            runtime::DJVM,
            "doCatch",
            "(Ljava/lang/Throwable;)Lsandbox/java/lang/Throwable;",
        )]
    }
}

/// Wraps the sandbox throwable on the stack back into a host throwable
/// immediately before every `athrow`.
pub struct ThrowExceptionWrapper;

impl Emitter for ThrowExceptionWrapper {
    fn emit(&self, _ctx: &mut EmitContext<'_>, insn: &Insn) -> Emission {
        match insn {
            Insn::Simple(opcode::ATHROW) => Emission::with_prelude(vec![Insn::invoke_static(
                runtime::DJVM,
                "fromDJVM",
                "(Lsandbox/java/lang/Throwable;)Ljava/lang/Throwable;",
            )]),
            _ => Emission::pass(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitters::tests_support::{context, emit_ctx};

    fn handler(catch_type: Option<&str>) -> TryCatch {
        TryCatch {
            start: 0,
            end: 1,
            handler: 2,
            catch_type: catch_type.map(str::to_owned),
        }
    }

    #[test]
    fn broad_handlers_get_the_blacklist_guard() {
        let (mut analysis, resolver, catalog) = context();
        let mut ctx = emit_ctx(&mut analysis, &resolver, &catalog);
        for catch_type in [None, Some("java/lang/Throwable"), Some("java/lang/Error")] {
            let injected =
                DisallowCatchingBlacklistedExceptions.emit_handler(&mut ctx, &handler(catch_type));
            assert_eq!(injected.len(), 1, "guard expected for {catch_type:?}");
            assert!(matches!(
                &injected[0],
                Insn::Invoke { name, .. } if name == "checkCatch"
            ));
        }
    }

    #[test]
    fn narrow_handlers_are_unguarded() {
        let (mut analysis, resolver, catalog) = context();
        let mut ctx = emit_ctx(&mut analysis, &resolver, &catalog);
        let injected = DisallowCatchingBlacklistedExceptions
            .emit_handler(&mut ctx, &handler(Some("com/example/AppException")));
        assert!(injected.is_empty());
    }

    #[test]
    fn every_handler_unwraps() {
        let (mut analysis, resolver, catalog) = context();
        let mut ctx = emit_ctx(&mut analysis, &resolver, &catalog);
        let injected =
            HandleExceptionUnwrapper.emit_handler(&mut ctx, &handler(Some("com/example/AppException")));
        assert!(matches!(
            &injected[0],
            Insn::Invoke { name, descriptor, .. }
                if name == "doCatch" && descriptor.ends_with(")Lsandbox/java/lang/Throwable;")
        ));
    }

    #[test]
    fn athrow_gets_a_wrapping_prelude() {
        let (mut analysis, resolver, catalog) = context();
        let mut ctx = emit_ctx(&mut analysis, &resolver, &catalog);
        let emission = ThrowExceptionWrapper.emit(&mut ctx, &Insn::Simple(opcode::ATHROW));
        assert!(emission.replacement.is_none());
        assert!(matches!(
            &emission.prelude[0],
            Insn::Invoke { name, .. } if name == "fromDJVM"
        ));
    }
}
