//! Instruction-level rewriters.
//!
//! Each emitter sees one instruction and returns an [`Emission`]: additive
//! prelude/postlude instructions plus an optional replacement that claims
//! the instruction. The driver consults emitters in list order; the first
//! claim wins and later emitters are not consulted for that instruction.
//! Replacement sequences are emitter-generated and are not re-processed.
//!
//! Exception-translation emitters additionally hook exception handler
//! entries through [`Emitter::emit_handler`]; the driver injects whatever
//! they return immediately after the handler label.

mod arithmetic;
mod boundary;
mod enforcer;
mod exceptions;
mod ignore;
mod retarget;
mod strings;
mod trace;

pub use arithmetic::AlwaysUseExactMath;
pub use boundary::{ArgumentUnwrapper, ReturnTypeWrapper};
pub use enforcer::DisallowNonDeterministicMethods;
pub use exceptions::{
    DisallowCatchingBlacklistedExceptions, HandleExceptionUnwrapper, ThrowExceptionWrapper,
};
pub use ignore::{IgnoreBreakpoints, IgnoreSynchronizedBlocks};
pub use retarget::{RewriteClassLoaderMethods, RewriteClassMethods, RewriteObjectMethods};
pub use strings::StringConstantWrapper;
pub use trace::{TraceAllocations, TraceInvocations, TraceJumps, TraceThrows};

use djvm_classfile::{Insn, TryCatch};

use crate::analysis::AnalysisContext;
use crate::policy::RuleCatalog;
use crate::resolver::ClassResolver;

/// What one emitter contributes for one instruction.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Emission {
    /// Instructions inserted before the (possibly replaced) instruction.
    pub prelude: Vec<Insn>,
    /// When set, consumes the original instruction and emits these instead.
    /// An empty vector elides the instruction entirely.
    pub replacement: Option<Vec<Insn>>,
    /// Instructions inserted after the (possibly replaced) instruction.
    pub postlude: Vec<Insn>,
}

impl Emission {
    /// Contribute nothing; the instruction flows on to later emitters and
    /// then the remapper.
    pub fn pass() -> Self {
        Self::default()
    }

    /// Claim the instruction and emit `instructions` in its place.
    pub fn replace(instructions: Vec<Insn>) -> Self {
        Self {
            replacement: Some(instructions),
            ..Self::default()
        }
    }

    /// Claim the instruction and emit nothing.
    pub fn elide() -> Self {
        Self::replace(Vec::new())
    }

    /// Insert `instructions` before the instruction without claiming it.
    pub fn with_prelude(instructions: Vec<Insn>) -> Self {
        Self {
            prelude: instructions,
            ..Self::default()
        }
    }

    /// Insert `instructions` after the instruction without claiming it.
    pub fn with_postlude(instructions: Vec<Insn>) -> Self {
        Self {
            postlude: instructions,
            ..Self::default()
        }
    }

    /// True when the emission contributes nothing at all.
    pub fn is_pass(&self) -> bool {
        self.prelude.is_empty() && self.replacement.is_none() && self.postlude.is_empty()
    }
}

/// Everything an emitter may consult while deciding.
pub struct EmitContext<'a> {
    /// The class-level analysis walk, for records and diagnostics.
    pub analysis: &'a mut AnalysisContext,
    /// The namespace resolver.
    pub resolver: &'a ClassResolver,
    /// The member rule catalog.
    pub catalog: &'a RuleCatalog,
    /// Name of the method being rewritten.
    pub member_name: &'a str,
    /// Descriptor of the method being rewritten.
    pub member_descriptor: &'a str,
}

/// A pure per-instruction rewriter.
pub trait Emitter: Send + Sync {
    /// Inspect one instruction.
    fn emit(&self, _ctx: &mut EmitContext<'_>, _insn: &Insn) -> Emission {
        Emission::pass()
    }

    /// Contribute instructions injected at an exception handler entry.
    fn emit_handler(&self, _ctx: &mut EmitContext<'_>, _handler: &TryCatch) -> Vec<Insn> {
        Vec::new()
    }
}


/// The standard emitter list in priority order. The four trace emitters are
/// present iff an execution profile was configured; this is decided at
/// construction time so emission stays deterministic and cache keys remain
/// profile-agnostic.
pub fn standard_emitters(with_profile: bool) -> Vec<Box<dyn Emitter>> {
    let mut emitters: Vec<Box<dyn Emitter>> = Vec::new();
    if with_profile {
        emitters.push(Box::new(TraceAllocations));
        emitters.push(Box::new(TraceInvocations));
        emitters.push(Box::new(TraceJumps));
        emitters.push(Box::new(TraceThrows));
    }
    emitters.push(Box::new(IgnoreBreakpoints));
    emitters.push(Box::new(IgnoreSynchronizedBlocks));
    emitters.push(Box::new(DisallowCatchingBlacklistedExceptions));
    emitters.push(Box::new(HandleExceptionUnwrapper));
    emitters.push(Box::new(DisallowNonDeterministicMethods));
    emitters.push(Box::new(RewriteClassLoaderMethods));
    emitters.push(Box::new(RewriteClassMethods));
    emitters.push(Box::new(RewriteObjectMethods));
    emitters.push(Box::new(AlwaysUseExactMath));
    emitters.push(Box::new(StringConstantWrapper));
    emitters.push(Box::new(ThrowExceptionWrapper));
    emitters.push(Box::new(ArgumentUnwrapper));
    emitters.push(Box::new(ReturnTypeWrapper));
    emitters
}
