//! The non-determinism enforcer: one catalog decision per invocation.

use djvm_classfile::{descriptor, opcode, Insn};
use djvm_error::Severity;

use crate::analysis::{InvokeKind, MemberRef};
use crate::policy::{MemberAction, StubKind};
use crate::runtime;

use super::{EmitContext, Emission, Emitter};

/// Applies the member rule catalog to every invocation: forbidden members
/// become injected rule-violation throws, stubbed members become inert
/// results. Thunked members are handled by the retargeting emitters.
pub struct DisallowNonDeterministicMethods;

impl Emitter for DisallowNonDeterministicMethods {
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
        let kind = match *invoke_opcode {
            opcode::INVOKESTATIC => InvokeKind::Static,
            opcode::INVOKESPECIAL => InvokeKind::Special,
            opcode::INVOKEINTERFACE => InvokeKind::Interface,
            _ => InvokeKind::Virtual,
        };
        let reference = MemberRef {
            owner: owner.clone(),
            name: name.clone(),
            descriptor: member_descriptor.clone(),
            kind,
        };
        match ctx.catalog.decide(&ctx.analysis.class.host_name, &reference) {
            MemberAction::Allow => Emission::pass(),
            MemberAction::Forbid { display } => {
                let message = format!("Disallowed reference to API; {display}");
                ctx.analysis.record(
                    Severity::Informational,
                    format!("replaced reference to {display} with a runtime rule violation"),
                );
                Emission::replace(vec![
                    discard_stack(&reference),
                    vec![
                        Insn::ldc_string(message),
                        // Pinned return type so the reference survives the
                        // remapper untouched.
                        Insn::invoke_static(
                            runtime::DJVM,
                            "fail",
                            "(Ljava/lang/String;)Ljava/lang/Throwable;",
                        ),
                        Insn::Simple(opcode::ATHROW),
                    ],
                ]
                .concat())
            }
            MemberAction::Stub(stub) => {
                let mut replacement = discard_stack(&reference);
                match stub {
                    StubKind::Null => replacement.push(Insn::Simple(opcode::ACONST_NULL)),
                    StubKind::EmptyEnumeration => replacement.push(Insn::invoke_static(
                        runtime::DJVM,
                        "emptyEnumeration",
                        "()Ljava/util/Enumeration;",
                    )),
                }
                Emission::replace(replacement)
            }
        }
    }
}

/// Pops every argument (and the receiver of instance invocations) that the
/// replaced invocation would have consumed.
fn discard_stack(reference: &MemberRef) -> Vec<Insn> {
    let mut pops = Vec::new();
    if let Ok((params, _)) = descriptor::method_parts(&reference.descriptor) {
        for token in params.iter().rev() {
            let pop = if descriptor::type_slots(token) == 2 {
                opcode::POP2
            } else {
                opcode::POP
            };
            pops.push(Insn::Simple(pop));
        }
    }
    if reference.kind != InvokeKind::Static {
        pops.push(Insn::Simple(opcode::POP));
    }
    pops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitters::tests_support::{context, emit_ctx};
    use djvm_classfile::LdcConst;

    fn invoke(opcode_value: u8, owner: &str, name: &str, descriptor: &str) -> Insn {
        Insn::Invoke {
            opcode: opcode_value,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            interface: false,
        }
    }

    #[test]
    fn forbidden_invocation_becomes_a_throw() {
        let (mut analysis, resolver, catalog) = context();
        let mut ctx = emit_ctx(&mut analysis, &resolver, &catalog);
        let emission = DisallowNonDeterministicMethods.emit(
            &mut ctx,
            &invoke(
                opcode::INVOKEVIRTUAL,
                "java/lang/reflect/Constructor",
                "newInstance",
                "([Ljava/lang/Object;)Ljava/lang/Object;",
            ),
        );
        let replacement = emission.replacement.unwrap();
        // argument pop, receiver pop, message, fail, athrow
        assert_eq!(replacement.len(), 5);
        assert_eq!(
            replacement[2],
            Insn::Ldc(LdcConst::Str(
                "Disallowed reference to API; java.lang.reflect.Constructor.newInstance(Object[])"
                    .into()
            ))
        );
        assert_eq!(replacement[4], Insn::Simple(opcode::ATHROW));
    }

    #[test]
    fn stubbed_get_parent_pushes_null() {
        let (mut analysis, resolver, catalog) = context();
        let mut ctx = emit_ctx(&mut analysis, &resolver, &catalog);
        let emission = DisallowNonDeterministicMethods.emit(
            &mut ctx,
            &invoke(
                opcode::INVOKEVIRTUAL,
                "java/lang/ClassLoader",
                "getParent",
                "()Ljava/lang/ClassLoader;",
            ),
        );
        assert_eq!(
            emission.replacement,
            Some(vec![
                Insn::Simple(opcode::POP),
                Insn::Simple(opcode::ACONST_NULL)
            ])
        );
    }

    #[test]
    fn static_resource_lookup_discards_only_arguments() {
        let (mut analysis, resolver, catalog) = context();
        let mut ctx = emit_ctx(&mut analysis, &resolver, &catalog);
        let emission = DisallowNonDeterministicMethods.emit(
            &mut ctx,
            &invoke(
                opcode::INVOKESTATIC,
                "java/lang/ClassLoader",
                "getSystemResources",
                "(Ljava/lang/String;)Ljava/util/Enumeration;",
            ),
        );
        let replacement = emission.replacement.unwrap();
        assert_eq!(replacement[0], Insn::Simple(opcode::POP));
        assert!(matches!(
            &replacement[1],
            Insn::Invoke { name, .. } if name == "emptyEnumeration"
        ));
    }

    #[test]
    fn ordinary_invocations_pass() {
        let (mut analysis, resolver, catalog) = context();
        let mut ctx = emit_ctx(&mut analysis, &resolver, &catalog);
        let emission = DisallowNonDeterministicMethods.emit(
            &mut ctx,
            &invoke(opcode::INVOKEVIRTUAL, "com/example/Helper", "run", "()V"),
        );
        assert!(emission.is_pass());
    }
}
