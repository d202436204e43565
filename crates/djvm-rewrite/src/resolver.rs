//! Bidirectional name mapping between the host and sandbox namespaces.

use std::collections::HashSet;
use std::sync::Arc;

use djvm_classfile::descriptor;

use crate::runtime;
use crate::whitelist::Whitelist;

/// Default pin set: types whose name is shared between host and sandbox.
/// Their bodies may still be rewritten; only the *name* is preserved.
const DEFAULT_PINNED: &[&str] = &[
    "java/lang/Boolean",
    "java/lang/Byte",
    "java/lang/Character",
    "java/lang/Short",
    "java/lang/Integer",
    "java/lang/Long",
    "java/lang/Float",
    "java/lang/Double",
    "java/lang/Void",
    "java/lang/Object",
    "java/lang/Throwable",
    "java/lang/String",
    "java/lang/Class",
    "java/lang/ClassLoader",
];

/// Types defined by the deterministic runtime whose sandbox name equals
/// their host name; `reverse` must not strip their prefix.
const DEFAULT_TEMPLATES: &[&str] = &[runtime::DJVM, runtime::COST_ACCOUNTER];

/// Maps internal names and descriptors between the host namespace and the
/// sandbox namespace, honoring the pin set, template set, and whitelist.
#[derive(Debug)]
pub struct ClassResolver {
    pinned: HashSet<String>,
    templates: HashSet<String>,
    whitelist: Arc<Whitelist>,
}

impl ClassResolver {
    /// A resolver over the default pin and template sets plus `extra_pins`.
    pub fn new(whitelist: Arc<Whitelist>, extra_pins: impl IntoIterator<Item = String>) -> Self {
        let mut pinned: HashSet<String> = DEFAULT_PINNED.iter().map(|s| (*s).to_owned()).collect();
        pinned.extend(extra_pins);
        Self {
            pinned,
            templates: DEFAULT_TEMPLATES.iter().map(|s| (*s).to_owned()).collect(),
            whitelist,
        }
    }

    /// True when `name` keeps its host spelling in the sandbox.
    pub fn is_pinned(&self, name: &str) -> bool {
        self.pinned.contains(name)
    }

    /// True when `name` is defined by the deterministic runtime itself.
    pub fn is_template(&self, name: &str) -> bool {
        self.templates.contains(name)
    }

    /// Map one internal name (or array descriptor) into the sandbox
    /// namespace.
    pub fn resolve_type(&self, name: &str) -> String {
        // Array descriptors: strip brackets, recurse on the element.
        if let Some(element) = name.strip_prefix('[') {
            return format!("[{}", self.resolve_type(element));
        }
        // Inside array descriptors the element carries L;-framing.
        if let Some(inner) = name.strip_prefix('L').and_then(|n| n.strip_suffix(';')) {
            return format!("L{};", self.resolve_type(inner));
        }
        // Primitive descriptors are identity.
        if name.len() == 1 {
            return name.to_owned();
        }
        if self.is_pinned(name) || self.is_template(name) || self.whitelist.contains(name) {
            return name.to_owned();
        }
        if name.starts_with(runtime::SANDBOX_PREFIX) {
            return name.to_owned();
        }
        format!("{}{name}", runtime::SANDBOX_PREFIX)
    }

    /// Map every object type token in a field or method descriptor.
    pub fn resolve_descriptor(&self, desc: &str) -> String {
        descriptor::map_types(desc, &|name| self.resolve_type(name))
    }

    /// Map a sandbox name back to its host spelling. Templates and names
    /// outside the sandbox namespace are identity.
    pub fn reverse(&self, name: &str) -> String {
        if let Some(element) = name.strip_prefix('[') {
            return format!("[{}", self.reverse(element));
        }
        if let Some(inner) = name.strip_prefix('L').and_then(|n| n.strip_suffix(';')) {
            return format!("L{};", self.reverse(inner));
        }
        if self.is_template(name) {
            return name.to_owned();
        }
        match name.strip_prefix(runtime::SANDBOX_PREFIX) {
            Some(host) => host.to_owned(),
            None => name.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ClassResolver {
        ClassResolver::new(Arc::new(Whitelist::minimal()), Vec::new())
    }

    #[test]
    fn relocates_ordinary_names() {
        assert_eq!(resolver().resolve_type("com/example/Task"), "sandbox/com/example/Task");
    }

    #[test]
    fn pinned_names_are_identity() {
        let resolver = resolver();
        assert_eq!(resolver.resolve_type("java/lang/String"), "java/lang/String");
        assert_eq!(resolver.resolve_type("java/lang/Class"), "java/lang/Class");
        assert!(resolver.is_pinned("java/lang/ClassLoader"));
    }

    #[test]
    fn templates_are_identity_both_ways() {
        let resolver = resolver();
        assert_eq!(resolver.resolve_type(crate::runtime::DJVM), crate::runtime::DJVM);
        assert_eq!(resolver.reverse(crate::runtime::DJVM), crate::runtime::DJVM);
    }

    #[test]
    fn already_prefixed_names_are_identity() {
        assert_eq!(
            resolver().resolve_type("sandbox/com/example/Task"),
            "sandbox/com/example/Task"
        );
    }

    #[test]
    fn arrays_recurse_on_the_element() {
        let resolver = resolver();
        assert_eq!(
            resolver.resolve_type("[Lcom/example/Task;"),
            "[Lsandbox/com/example/Task;"
        );
        assert_eq!(resolver.resolve_type("[[I"), "[[I");
    }

    #[test]
    fn descriptors_map_each_token() {
        assert_eq!(
            resolver().resolve_descriptor("(Lcom/example/Task;I)Ljava/lang/String;"),
            "(Lsandbox/com/example/Task;I)Ljava/lang/String;"
        );
    }

    #[test]
    fn reverse_strips_the_prefix() {
        let resolver = resolver();
        assert_eq!(resolver.reverse("sandbox/com/example/Task"), "com/example/Task");
        assert_eq!(resolver.reverse("java/lang/String"), "java/lang/String");
        assert_eq!(
            resolver.reverse("[Lsandbox/com/example/Task;"),
            "[Lcom/example/Task;"
        );
    }

    #[test]
    fn extra_pins_are_honored() {
        let resolver = ClassResolver::new(
            Arc::new(Whitelist::minimal()),
            vec!["com/example/Pinned".to_owned()],
        );
        assert_eq!(resolver.resolve_type("com/example/Pinned"), "com/example/Pinned");
    }
}
