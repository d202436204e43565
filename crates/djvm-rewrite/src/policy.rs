//! The member rule catalog: which host APIs are allowed, forbidden,
//! stubbed, or thunked.
//!
//! The catalog is a configuration value handed to the emitter pipeline, not
//! a process-wide singleton, so test variants can override entries without
//! global mutation. One decision is produced per instruction; the
//! instrumentation emitters stay orthogonal and purely additive.

use std::collections::HashSet;

use djvm_classfile::descriptor;

use crate::analysis::MemberRef;
use crate::runtime;

/// How a stubbed invocation replaces its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubKind {
    /// Discard receiver and arguments, push `null`.
    Null,
    /// Discard receiver and arguments, push an empty enumeration.
    EmptyEnumeration,
}

/// The catalog's decision for one member reference.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberAction {
    /// Not a catalog member; the remapper handles the reference.
    Allow,
    /// Replace the invocation with an injected rule violation throw.
    Forbid {
        /// The dotted display form used in the violation message.
        display: String,
    },
    /// Replace the invocation with an inert result.
    Stub(StubKind),
}

/// A static thunk target: the deterministic helper a virtual or static host
/// call is retargeted to. The helper descriptor prepends the original
/// receiver type for instance methods.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticThunk {
    /// Internal name of the helper owner.
    pub owner: String,
    /// Helper method name.
    pub name: String,
    /// Helper method descriptor.
    pub descriptor: String,
}

/// Reflection accessors on `java/lang/Class` that stay callable in-sandbox.
const ALLOWED_CLASS_ACCESSORS: &[&str] = &[
    "getClasses",
    "getConstructor",
    "getConstructors",
    "getEnclosingConstructor",
    "getEnclosingMethod",
    "getMethod",
    "getMethods",
];

/// Return-type owners that mark a `Class` accessor as reflective.
const REFLECTION_TYPES: &[&str] = &[
    "java/lang/reflect/Constructor",
    "java/lang/reflect/Method",
    "java/lang/reflect/Field",
    "java/lang/Package",
    "java/security/ProtectionDomain",
];

/// The member rule catalog.
#[derive(Debug)]
pub struct RuleCatalog {
    /// Classes exempt from the `Constructor.newInstance` prohibition.
    new_instance_exempt: HashSet<String>,
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl RuleCatalog {
    /// The standard catalog.
    pub fn standard() -> Self {
        Self {
            new_instance_exempt: [runtime::DJVM.to_owned()].into_iter().collect(),
        }
    }

    /// Exempt additional deterministic-runtime internals from the
    /// `Constructor.newInstance` prohibition.
    pub fn with_new_instance_exemptions(mut self, owners: impl IntoIterator<Item = String>) -> Self {
        self.new_instance_exempt.extend(owners);
        self
    }

    /// Decide the action for one member reference made from `caller`.
    pub fn decide(&self, caller: &str, reference: &MemberRef) -> MemberAction {
        match reference.owner.as_str() {
            "java/lang/ClassLoader" => self.decide_class_loader(reference),
            "java/lang/Class" => self.decide_class(reference),
            "java/lang/Object" => decide_object(reference),
            "java/lang/reflect/Constructor" => self.decide_constructor(caller, reference),
            "java/lang/reflect/Method" if reference.name == "invoke" => forbid_with(
                "java.lang.reflect.Method.invoke(Object, Object...)",
            ),
            "java/lang/reflect/Field" if matches!(reference.name.as_str(), "get" | "set") => {
                forbid(reference)
            }
            owner if owner.starts_with("sun/security/") && reference.name == "<init>" => {
                MemberAction::Allow
            }
            _ => MemberAction::Allow,
        }
    }

    fn decide_class_loader(&self, reference: &MemberRef) -> MemberAction {
        match (reference.name.as_str(), reference.descriptor.as_str()) {
            // The no-arg constructor is thunked (see `static_thunk`); the
            // delegation it injects is emitter-generated and never
            // re-enters this catalog. Direct user calls to any other
            // constructor are forbidden.
            ("<init>", "()V") => MemberAction::Allow,
            ("<init>", _) => forbid(reference),
            ("loadClass", "(Ljava/lang/String;)Ljava/lang/Class;") => MemberAction::Allow,
            ("loadClass", _) | ("findClass", _) => forbid(reference),
            (name, _) if name.starts_with("defineClass") => forbid(reference),
            ("getParent", _) => MemberAction::Stub(StubKind::Null),
            ("getResources", _) | ("getSystemResources", _) => {
                MemberAction::Stub(StubKind::EmptyEnumeration)
            }
            (name, _) if name.starts_with("getResource") || name.starts_with("getSystemResource") => {
                MemberAction::Stub(StubKind::Null)
            }
            ("getSystemClassLoader", _) => MemberAction::Allow, // thunked
            _ => MemberAction::Allow,
        }
    }

    fn decide_class(&self, reference: &MemberRef) -> MemberAction {
        if ALLOWED_CLASS_ACCESSORS.contains(&reference.name.as_str()) {
            return MemberAction::Allow;
        }
        match reference.name.as_str() {
            "getProtectionDomain" | "getDeclaredClasses" => forbid(reference),
            "getPackage" => MemberAction::Stub(StubKind::Null),
            _ => {
                if returns_reflection_type(&reference.descriptor) {
                    forbid(reference)
                } else {
                    MemberAction::Allow
                }
            }
        }
    }

    fn decide_constructor(&self, caller: &str, reference: &MemberRef) -> MemberAction {
        if reference.name == "newInstance" {
            if self.new_instance_exempt.contains(caller) {
                return MemberAction::Allow;
            }
            return forbid(reference);
        }
        MemberAction::Allow
    }
}

fn decide_object(reference: &MemberRef) -> MemberAction {
    match reference.name.as_str() {
        "wait" | "notify" | "notifyAll" => forbid(reference),
        _ => MemberAction::Allow,
    }
}

fn forbid(reference: &MemberRef) -> MemberAction {
    MemberAction::Forbid {
        display: descriptor::display_member(&reference.owner, &reference.name, &reference.descriptor),
    }
}

fn forbid_with(display: &str) -> MemberAction {
    MemberAction::Forbid {
        display: display.to_owned(),
    }
}

fn returns_reflection_type(method_descriptor: &str) -> bool {
    let Ok((_, ret)) = descriptor::method_parts(method_descriptor) else {
        return false;
    };
    let element = ret.trim_start_matches('[');
    let Some(name) = element.strip_prefix('L').and_then(|n| n.strip_suffix(';')) else {
        return false;
    };
    REFLECTION_TYPES.contains(&name)
}

/// The static thunk table: virtual and static host calls retargeted to
/// deterministic helpers. Consulted both by the call-site emitters and by
/// the remapper when rewriting method handles.
pub fn static_thunk(owner: &str, name: &str, descriptor: &str) -> Option<StaticThunk> {
    let thunk = |helper: &str, helper_descriptor: &str| {
        Some(StaticThunk {
            owner: runtime::DJVM.to_owned(),
            name: helper.to_owned(),
            descriptor: helper_descriptor.to_owned(),
        })
    };
    match (owner, name, descriptor) {
        ("java/lang/ClassLoader", "loadClass", "(Ljava/lang/String;)Ljava/lang/Class;") => thunk(
            "loadClass",
            "(Ljava/lang/ClassLoader;Ljava/lang/String;)Ljava/lang/Class;",
        ),
        ("java/lang/ClassLoader", "getSystemClassLoader", "()Ljava/lang/ClassLoader;") => {
            thunk("getSystemClassLoader", "()Ljava/lang/ClassLoader;")
        }
        ("java/lang/Class", "getName", "()Ljava/lang/String;") => {
            thunk("getName", "(Ljava/lang/Class;)Ljava/lang/String;")
        }
        ("java/lang/Class", "getSimpleName", "()Ljava/lang/String;") => {
            thunk("getSimpleName", "(Ljava/lang/Class;)Ljava/lang/String;")
        }
        ("java/lang/Class", "getCanonicalName", "()Ljava/lang/String;") => {
            thunk("getCanonicalName", "(Ljava/lang/Class;)Ljava/lang/String;")
        }
        ("java/lang/Class", "toString", "()Ljava/lang/String;") => {
            thunk("toString", "(Ljava/lang/Object;)Ljava/lang/String;")
        }
        ("java/lang/Object", "hashCode", "()I") => thunk("hashCode", "(Ljava/lang/Object;)I"),
        ("java/lang/Object", "toString", "()Ljava/lang/String;") => {
            thunk("toString", "(Ljava/lang/Object;)Ljava/lang/String;")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::InvokeKind;

    fn reference(owner: &str, name: &str, descriptor: &str, kind: InvokeKind) -> MemberRef {
        MemberRef {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            kind,
        }
    }

    #[test]
    fn forbids_constructor_new_instance_with_exact_message() {
        let catalog = RuleCatalog::standard();
        let action = catalog.decide(
            "com/example/Task",
            &reference(
                "java/lang/reflect/Constructor",
                "newInstance",
                "([Ljava/lang/Object;)Ljava/lang/Object;",
                InvokeKind::Virtual,
            ),
        );
        assert_eq!(
            action,
            MemberAction::Forbid {
                display: "java.lang.reflect.Constructor.newInstance(Object[])".into()
            }
        );
    }

    #[test]
    fn exempts_runtime_internals_from_new_instance() {
        let catalog = RuleCatalog::standard();
        let action = catalog.decide(
            runtime::DJVM,
            &reference(
                "java/lang/reflect/Constructor",
                "newInstance",
                "([Ljava/lang/Object;)Ljava/lang/Object;",
                InvokeKind::Virtual,
            ),
        );
        assert_eq!(action, MemberAction::Allow);
    }

    #[test]
    fn forbids_parented_class_loader_constructor() {
        let catalog = RuleCatalog::standard();
        let action = catalog.decide(
            "com/example/Evil",
            &reference(
                "java/lang/ClassLoader",
                "<init>",
                "(Ljava/lang/ClassLoader;)V",
                InvokeKind::Special,
            ),
        );
        assert_eq!(
            action,
            MemberAction::Forbid {
                display: "java.lang.ClassLoader(ClassLoader)".into()
            }
        );
    }

    #[test]
    fn method_invoke_uses_the_varargs_display_form() {
        let catalog = RuleCatalog::standard();
        let action = catalog.decide(
            "com/example/Task",
            &reference(
                "java/lang/reflect/Method",
                "invoke",
                "(Ljava/lang/Object;[Ljava/lang/Object;)Ljava/lang/Object;",
                InvokeKind::Virtual,
            ),
        );
        assert_eq!(
            action,
            MemberAction::Forbid {
                display: "java.lang.reflect.Method.invoke(Object, Object...)".into()
            }
        );
    }

    #[test]
    fn enclosing_constructor_accessor_is_allowed() {
        let catalog = RuleCatalog::standard();
        let action = catalog.decide(
            "com/example/Task",
            &reference(
                "java/lang/Class",
                "getEnclosingConstructor",
                "()Ljava/lang/reflect/Constructor;",
                InvokeKind::Virtual,
            ),
        );
        assert_eq!(action, MemberAction::Allow);
    }

    #[test]
    fn declared_reflection_accessors_are_forbidden() {
        let catalog = RuleCatalog::standard();
        for (name, descriptor, display) in [
            (
                "getDeclaredMethod",
                "(Ljava/lang/String;[Ljava/lang/Class;)Ljava/lang/reflect/Method;",
                "java.lang.Class.getDeclaredMethod(String, Class[])",
            ),
            (
                "getDeclaredFields",
                "()[Ljava/lang/reflect/Field;",
                "java.lang.Class.getDeclaredFields()",
            ),
            (
                "getField",
                "(Ljava/lang/String;)Ljava/lang/reflect/Field;",
                "java.lang.Class.getField(String)",
            ),
        ] {
            let action = catalog.decide(
                "com/example/Task",
                &reference("java/lang/Class", name, descriptor, InvokeKind::Virtual),
            );
            assert_eq!(
                action,
                MemberAction::Forbid {
                    display: display.into()
                },
                "wrong action for {name}"
            );
        }
    }

    #[test]
    fn declared_classes_forbidden_with_exact_message() {
        let catalog = RuleCatalog::standard();
        let action = catalog.decide(
            "com/example/Task",
            &reference(
                "java/lang/Class",
                "getDeclaredClasses",
                "()[Ljava/lang/Class;",
                InvokeKind::Virtual,
            ),
        );
        assert_eq!(
            action,
            MemberAction::Forbid {
                display: "java.lang.Class.getDeclaredClasses()".into()
            }
        );
    }

    #[test]
    fn monitor_methods_are_forbidden() {
        let catalog = RuleCatalog::standard();
        for (name, descriptor) in [("wait", "()V"), ("wait", "(J)V"), ("notify", "()V"), ("notifyAll", "()V")] {
            let action = catalog.decide(
                "com/example/Task",
                &reference("java/lang/Object", name, descriptor, InvokeKind::Virtual),
            );
            assert!(
                matches!(action, MemberAction::Forbid { .. }),
                "{name}{descriptor} must be forbidden"
            );
        }
    }

    #[test]
    fn class_loader_resource_lookups_are_stubbed() {
        let catalog = RuleCatalog::standard();
        let stub = |name: &str, descriptor: &str| {
            catalog.decide(
                "com/example/Task",
                &reference("java/lang/ClassLoader", name, descriptor, InvokeKind::Virtual),
            )
        };
        assert_eq!(
            stub("getParent", "()Ljava/lang/ClassLoader;"),
            MemberAction::Stub(StubKind::Null)
        );
        assert_eq!(
            stub("getResources", "(Ljava/lang/String;)Ljava/util/Enumeration;"),
            MemberAction::Stub(StubKind::EmptyEnumeration)
        );
        assert_eq!(
            stub("getResourceAsStream", "(Ljava/lang/String;)Ljava/io/InputStream;"),
            MemberAction::Stub(StubKind::Null)
        );
    }

    #[test]
    fn sun_security_constructors_are_allow_listed() {
        let catalog = RuleCatalog::standard();
        let action = catalog.decide(
            "com/example/Task",
            &reference(
                "sun/security/provider/Sun",
                "<init>",
                "()V",
                InvokeKind::Special,
            ),
        );
        assert_eq!(action, MemberAction::Allow);
    }

    #[test]
    fn thunk_table_prepends_the_receiver() {
        let thunk = static_thunk(
            "java/lang/ClassLoader",
            "loadClass",
            "(Ljava/lang/String;)Ljava/lang/Class;",
        )
        .unwrap();
        assert_eq!(thunk.owner, runtime::DJVM);
        assert_eq!(
            thunk.descriptor,
            "(Ljava/lang/ClassLoader;Ljava/lang/String;)Ljava/lang/Class;"
        );
        assert!(static_thunk("java/lang/Object", "equals", "(Ljava/lang/Object;)Z").is_none());
    }
}
