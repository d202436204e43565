//! Emitters that drop debugger traps and monitor instructions.

use djvm_classfile::{opcode, Insn};

use super::{EmitContext, Emission, Emitter};

/// Drops `breakpoint` instructions.
pub struct IgnoreBreakpoints;

impl Emitter for IgnoreBreakpoints {
    fn emit(&self, _ctx: &mut EmitContext<'_>, insn: &Insn) -> Emission {
        match insn {
            Insn::Simple(opcode::BREAKPOINT) => Emission::elide(),
            _ => Emission::pass(),
        }
    }
}

/// Elides `monitorenter` / `monitorexit`, discarding the object reference
/// they would have consumed.
pub struct IgnoreSynchronizedBlocks;

impl Emitter for IgnoreSynchronizedBlocks {
    fn emit(&self, _ctx: &mut EmitContext<'_>, insn: &Insn) -> Emission {
        match insn {
            Insn::Simple(opcode::MONITORENTER) | Insn::Simple(opcode::MONITOREXIT) => {
                Emission::replace(vec![Insn::Simple(opcode::POP)])
            }
            _ => Emission::pass(),
        }
    }
}
