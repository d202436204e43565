//! String constant interning.

use djvm_classfile::{Insn, LdcConst};

use crate::runtime;

use super::{EmitContext, Emission, Emitter};

/// Routes every `ldc` of a string constant through the deterministic intern
/// helper, so sandboxed code only ever observes sandbox strings with
/// deterministic identity.
pub struct StringConstantWrapper;

impl Emitter for StringConstantWrapper {
    fn emit(&self, _ctx: &mut EmitContext<'_>, insn: &Insn) -> Emission {
        match insn {
            Insn::Ldc(LdcConst::Str(value)) => Emission::replace(vec![
                Insn::Ldc(LdcConst::Str(value.clone())),
                Insn::invoke_static(
                    runtime::DJVM,
                    "intern",
                    "(Ljava/lang/String;)Lsandbox/java/lang/String;",
                ),
            ]),
            _ => Emission::pass(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitters::tests_support::{context, emit_ctx};

    #[test]
    fn string_constants_are_interned() {
        let (mut analysis, resolver, catalog) = context();
        let mut ctx = emit_ctx(&mut analysis, &resolver, &catalog);
        let emission = StringConstantWrapper.emit(&mut ctx, &Insn::ldc_string("greeting"));
        let replacement = emission.replacement.unwrap();
        assert_eq!(replacement.len(), 2);
        assert!(matches!(
            &replacement[1],
            Insn::Invoke { owner, name, .. } if owner == runtime::DJVM && name == "intern"
        ));
    }

    #[test]
    fn non_string_constants_pass() {
        let (mut analysis, resolver, catalog) = context();
        let mut ctx = emit_ctx(&mut analysis, &resolver, &catalog);
        assert!(StringConstantWrapper
            .emit(&mut ctx, &Insn::Ldc(LdcConst::Integer(7)))
            .is_pass());
    }
}
