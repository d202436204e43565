//! Applies the resolver to every symbolic name in the rewritten class and
//! collects the set of referenced sandbox names.

use std::collections::{BTreeSet, HashSet};

use djvm_classfile::{
    Annotation, ClassFile, CodeElement, Handle, HandleKind, Insn, LdcConst, MethodBody,
};

use crate::policy;
use crate::resolver::ClassResolver;
use crate::runtime;

/// Rewrites names in place over a decoded class, remembering every sandbox
/// name the output refers to (for cache reachability and preloading).
pub struct Remapper<'a> {
    resolver: &'a ClassResolver,
    visible_annotations: &'a HashSet<String>,
    references: BTreeSet<String>,
}

impl<'a> Remapper<'a> {
    /// A remapper over one resolver and annotation pass-through set.
    pub fn new(resolver: &'a ClassResolver, visible_annotations: &'a HashSet<String>) -> Self {
        Self {
            resolver,
            visible_annotations,
            references: BTreeSet::new(),
        }
    }

    /// The sandbox names the remapped class refers to.
    pub fn into_references(mut self, own_name: &str) -> BTreeSet<String> {
        self.references.remove(own_name);
        self.references
    }

    fn record(&mut self, mapped: &str) {
        let element = mapped.trim_start_matches('[');
        let element = element
            .strip_prefix('L')
            .and_then(|n| n.strip_suffix(';'))
            .unwrap_or(element);
        if element.starts_with(runtime::SANDBOX_PREFIX)
            && !self.resolver.is_template(element)
            && !runtime::is_platform_shadow(element)
        {
            self.references.insert(element.to_owned());
        }
    }

    fn map_type(&mut self, name: &str) -> String {
        let mapped = self.resolver.resolve_type(name);
        self.record(&mapped);
        mapped
    }

    fn map_descriptor(&mut self, descriptor: &str) -> String {
        let mapped = self.resolver.resolve_descriptor(descriptor);
        // Record each object token of the mapped descriptor.
        let mut rest = mapped.as_str();
        while let Some(start) = rest.find('L') {
            let Some(end) = rest[start..].find(';') else { break };
            self.record(&rest[start + 1..start + end]);
            rest = &rest[start + end + 1..];
        }
        mapped
    }

    fn map_handle(&mut self, handle: Handle) -> Handle {
        // Thunked Class / Object / ClassLoader methods become static
        // handles whose descriptor prepends the original receiver type.
        if !handle.kind.is_field() {
            if let Some(thunk) = policy::static_thunk(&handle.owner, &handle.name, &handle.descriptor) {
                return Handle {
                    kind: HandleKind::InvokeStatic,
                    owner: thunk.owner,
                    name: thunk.name,
                    descriptor: self.map_descriptor(&thunk.descriptor),
                    interface: false,
                };
            }
        }
        Handle {
            kind: handle.kind,
            owner: self.map_type(&handle.owner),
            name: handle.name,
            descriptor: self.map_descriptor(&handle.descriptor),
            interface: handle.interface,
        }
    }

    fn map_loadable(&mut self, constant: LdcConst) -> LdcConst {
        match constant {
            LdcConst::Class(name) => LdcConst::Class(self.map_type(&name)),
            LdcConst::MethodType(descriptor) => LdcConst::MethodType(self.map_descriptor(&descriptor)),
            LdcConst::MethodHandle(handle) => LdcConst::MethodHandle(self.map_handle(handle)),
            LdcConst::Dynamic { name, descriptor, bootstrap } => LdcConst::Dynamic {
                name,
                descriptor: self.map_descriptor(&descriptor),
                bootstrap,
            },
            other => other,
        }
    }

    fn map_body(&mut self, body: &mut MethodBody) {
        for element in &mut body.elements {
            let CodeElement::Insn(insn) = element else { continue };
            match insn {
                Insn::Field { owner, descriptor, .. } => {
                    *owner = self.map_type(owner);
                    *descriptor = self.map_descriptor(descriptor);
                }
                Insn::Invoke { owner, descriptor, .. } => {
                    *owner = self.map_type(owner);
                    *descriptor = self.map_descriptor(descriptor);
                }
                Insn::InvokeDynamic { descriptor, .. } => {
                    *descriptor = self.map_descriptor(descriptor);
                }
                Insn::Type { name, .. } => {
                    *name = self.map_type(name);
                }
                Insn::MultiANewArray { descriptor, .. } => {
                    *descriptor = self.map_type(descriptor);
                }
                Insn::Ldc(constant) => {
                    *constant = self.map_loadable(constant.clone());
                }
                _ => {}
            }
        }
        for handler in &mut body.try_catch {
            if let Some(catch_type) = &handler.catch_type {
                handler.catch_type = Some(self.map_type(catch_type));
            }
        }
        for local in &mut body.local_variables {
            local.descriptor = self.map_descriptor(&local.descriptor);
        }
    }

    fn filter_annotations(&self, annotations: &mut Vec<Annotation>) {
        annotations.retain(|a| self.visible_annotations.contains(&a.type_descriptor));
    }

    /// Remap every name in `class`.
    pub fn remap_class(&mut self, class: &mut ClassFile) {
        class.name = self.resolver.resolve_type(&class.name);
        if let Some(super_name) = &class.super_name {
            class.super_name = Some(self.map_type(super_name));
        }
        for interface in &mut class.interfaces {
            *interface = self.map_type(interface);
        }
        for field in &mut class.fields {
            field.descriptor = self.map_descriptor(&field.descriptor);
            self.filter_annotations(&mut field.annotations);
        }
        for method in &mut class.methods {
            method.descriptor = self.map_descriptor(&method.descriptor);
            for exception in &mut method.exceptions {
                *exception = self.map_type(exception);
            }
            if let Some(body) = &mut method.body {
                self.map_body(body);
            }
            self.filter_annotations(&mut method.annotations);
        }
        for inner in &mut class.inner_classes {
            inner.inner = self.map_type(&inner.inner);
            if let Some(outer) = &inner.outer {
                inner.outer = Some(self.map_type(outer));
            }
        }
        if let Some(enclosing) = &mut class.enclosing_method {
            enclosing.class = self.map_type(&enclosing.class);
            if let Some((_, descriptor)) = &mut enclosing.method {
                *descriptor = self.map_descriptor(descriptor);
            }
        }
        for bootstrap in &mut class.bootstrap_methods {
            bootstrap.handle = self.map_handle(bootstrap.handle.clone());
            for argument in &mut bootstrap.arguments {
                *argument = self.map_loadable(argument.clone());
            }
        }
        self.filter_annotations(&mut class.annotations);
    }
}
