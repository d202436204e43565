//! Instrumentation emitters: purely additive budget debits.
//!
//! Present in the pipeline iff an execution profile was configured at
//! construction time. Each prepends a call that debits the per-thread
//! budget in `sandbox/RuntimeCostAccounter` and traps when it is exhausted.

use djvm_classfile::{opcode, Insn};

use crate::runtime;

use super::{EmitContext, Emission, Emitter};

fn debit(event: &str) -> Emission {
    Emission::with_prelude(vec![Insn::invoke_static(runtime::COST_ACCOUNTER, event, "()V")])
}

/// Debits the allocation budget before every object or array allocation.
pub struct TraceAllocations;

impl Emitter for TraceAllocations {
    fn emit(&self, _ctx: &mut EmitContext<'_>, insn: &Insn) -> Emission {
        match insn {
            Insn::Type { opcode: opcode::NEW | opcode::ANEWARRAY, .. }
            | Insn::NewArray(_)
            | Insn::MultiANewArray { .. } => debit("recordAllocation"),
            _ => Emission::pass(),
        }
    }
}

/// Debits the invocation budget before every call.
pub struct TraceInvocations;

impl Emitter for TraceInvocations {
    fn emit(&self, _ctx: &mut EmitContext<'_>, insn: &Insn) -> Emission {
        match insn {
            Insn::Invoke { .. } | Insn::InvokeDynamic { .. } => debit("recordInvocation"),
            _ => Emission::pass(),
        }
    }
}

/// Debits the jump budget before every branch and switch.
pub struct TraceJumps;

impl Emitter for TraceJumps {
    fn emit(&self, _ctx: &mut EmitContext<'_>, insn: &Insn) -> Emission {
        match insn {
            Insn::Branch { .. } | Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
                debit("recordJump")
            }
            _ => Emission::pass(),
        }
    }
}

/// Debits the throw budget before every `athrow`.
pub struct TraceThrows;

impl Emitter for TraceThrows {
    fn emit(&self, _ctx: &mut EmitContext<'_>, insn: &Insn) -> Emission {
        match insn {
            Insn::Simple(opcode::ATHROW) => debit("recordThrow"),
            _ => Emission::pass(),
        }
    }
}
