//! Exact-variant integer arithmetic.

use djvm_classfile::{opcode, Insn};

use super::{EmitContext, Emission, Emitter};

/// Rewrites overflowing integer arithmetic into exact-variant helpers that
/// trap on overflow instead of wrapping. The `java/lang/Math` owner is
/// relocated into the sandbox by the remapper like any other reference.
pub struct AlwaysUseExactMath;

impl Emitter for AlwaysUseExactMath {
    fn emit(&self, _ctx: &mut EmitContext<'_>, insn: &Insn) -> Emission {
        let (name, descriptor) = match insn {
            Insn::Simple(opcode::IADD) => ("addExact", "(II)I"),
            Insn::Simple(opcode::ISUB) => ("subtractExact", "(II)I"),
            Insn::Simple(opcode::IMUL) => ("multiplyExact", "(II)I"),
            Insn::Simple(opcode::INEG) => ("negateExact", "(I)I"),
            Insn::Simple(opcode::LADD) => ("addExact", "(JJ)J"),
            Insn::Simple(opcode::LSUB) => ("subtractExact", "(JJ)J"),
            Insn::Simple(opcode::LMUL) => ("multiplyExact", "(JJ)J"),
            Insn::Simple(opcode::LNEG) => ("negateExact", "(J)J"),
            _ => return Emission::pass(),
        };
        Emission::replace(vec![Insn::invoke_static("java/lang/Math", name, descriptor)])
    }
}
