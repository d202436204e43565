#![warn(missing_docs)]

//! # djvm-rewrite
//!
//! A deterministic sandbox class rewriter. Every class destined for the
//! sandbox is intercepted, analyzed, and rewritten so that it executes
//! inside a parallel `sandbox/` namespace whose APIs are deterministic.
//!
//! ## Security model
//!
//! - **Namespace relocation**: every symbolic reference is remapped into the
//!   sandbox namespace unless the type is pinned or whitelisted
//! - **Rule catalog**: non-deterministic APIs (classloading, reflection,
//!   monitors) are forbidden, stubbed, or thunked to deterministic helpers
//! - **Injected throws**: a forbidden API reached at runtime raises
//!   [`djvm_error::RuleViolationError`] from rewriter-injected bytecode,
//!   and user code cannot catch it
//! - **Inert stubs**: native and finalizer methods lose their bodies
//! - **No monitors**: `synchronized` flags are cleared and monitor
//!   instructions elided
//! - **Instrumentation**: with an execution profile configured, allocation,
//!   invocation, jump, and throw counters are injected
//! - **Hierarchical caching**: rewritten bytes are cached per configuration,
//!   chained parent-first, with an optional shared external cache
//!
//! The deterministic runtime library supplying the `sandbox.*` replacement
//! bodies is a sibling artifact; this crate only emits references to it.

pub mod analysis;
pub mod audit;
pub mod cache;
pub mod config;
pub mod driver;
pub mod emitters;
pub mod loader;
pub mod policy;
pub mod preload;
pub mod providers;
pub mod remapper;
pub mod resolver;
pub mod rules;
pub mod source;
pub mod whitelist;

pub use analysis::{AnalysisConfiguration, AnalysisContext, ClassRecord, InvokeKind, MemberRecord, MemberRef};
pub use cache::{ByteCodeCache, CacheEntry, ExternalCache};
pub use config::{SandboxConfiguration, SandboxConfigurationBuilder};
pub use driver::{RewriteDriver, RewriteError, RewrittenClass};
pub use loader::{BoundaryValue, ClassOrigin, SandboxClass, SandboxClassLoader, SandboxLoadError};
pub use resolver::ClassResolver;
pub use whitelist::Whitelist;

/// Names supplied by the deterministic runtime that the rewriter emits
/// references to.
pub mod runtime {
    /// The namespace prefix prepended to relocated internal names.
    pub const SANDBOX_PREFIX: &str = "sandbox/";

    /// The static helper class backing thunks, interning, and exception
    /// translation.
    pub const DJVM: &str = "sandbox/java/lang/DJVM";

    /// The per-thread budget accounter called by the trace emitters.
    pub const COST_ACCOUNTER: &str = "sandbox/RuntimeCostAccounter";

    /// The sandbox root object every relocated class ultimately extends.
    pub const SANDBOX_OBJECT: &str = "sandbox/java/lang/Object";

    /// The sandbox string type.
    pub const SANDBOX_STRING: &str = "sandbox/java/lang/String";

    /// The sandbox throwable root.
    pub const SANDBOX_THROWABLE: &str = "sandbox/java/lang/Throwable";

    /// Member names reserved for the deterministic runtime. User classes may
    /// not declare them.
    pub const RESERVED_MEMBER_NAMES: &[&str] = &["toDJVMString", "fromDJVM", "toDJVM"];

    /// The archive resource whose presence requests eager rewriting of the
    /// whole archive at configuration time.
    pub const PRELOAD_MANIFEST: &str = "META-INF/DJVM-preload";

    /// True for sandbox names that shadow the platform library
    /// (`sandbox/java/...` and friends). Their definitions come from the
    /// deterministic runtime artifact, so reference chasing never follows
    /// them into user sources.
    pub fn is_platform_shadow(sandbox_name: &str) -> bool {
        let Some(host) = sandbox_name.strip_prefix(SANDBOX_PREFIX) else {
            return false;
        };
        ["java/", "javax/", "jdk/", "sun/"]
            .iter()
            .any(|prefix| host.starts_with(prefix))
    }
}
