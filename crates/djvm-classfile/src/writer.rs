//! Class file emission: a deduplicating constant pool builder and the
//! bytecode encoder.
//!
//! The encoder lays code out with short branch forms first and widens
//! branches whose displacement overflows, iterating because switch padding
//! and branch widths feed back into every later offset. Conditional
//! branches widen to an inverted condition over a `goto_w` trampoline.

use std::collections::{HashMap, HashSet};

use crate::annotation::{Annotation, ElementValue};
use crate::bytes::Writer;
use crate::class::{BootstrapMethod, ClassFile, Field, Method};
use crate::code::{CodeElement, Insn, LabelId, MethodBody};
use crate::constant_pool::{ConstantValue, Handle, HandleKind, LdcConst};
use crate::opcode as op;
use crate::stack;
use crate::ClassFormatError;

/// Deduplicating constant pool builder. Index 0 is reserved by the format,
/// so slot allocation starts at 1.
pub(crate) struct PoolBuilder {
    /// Serialized entries in insertion order; wide entries carry two slots.
    entries: Vec<(Vec<u8>, bool)>,
    index: HashMap<Key, u16>,
    next_slot: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    Str(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
}

impl PoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            next_slot: 1,
        }
    }

    fn add(&mut self, key: Key, bytes: Vec<u8>, wide: bool) -> Result<u16, ClassFormatError> {
        if let Some(existing) = self.index.get(&key) {
            return Ok(*existing);
        }
        let slot = self.next_slot;
        let width = if wide { 2 } else { 1 };
        if slot + width > u16::MAX as u32 {
            return Err(ClassFormatError::PoolOverflow);
        }
        self.next_slot += width;
        self.entries.push((bytes, wide));
        self.index.insert(key, slot as u16);
        Ok(slot as u16)
    }

    pub(crate) fn utf8(&mut self, text: &str) -> Result<u16, ClassFormatError> {
        if let Some(existing) = self.index.get(&Key::Utf8(text.to_owned())) {
            return Ok(*existing);
        }
        let encoded = cesu8::to_java_cesu8(text);
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&encoded);
        self.add(Key::Utf8(text.to_owned()), bytes, false)
    }

    pub(crate) fn integer(&mut self, value: i32) -> Result<u16, ClassFormatError> {
        let mut bytes = vec![3u8];
        bytes.extend_from_slice(&value.to_be_bytes());
        self.add(Key::Integer(value), bytes, false)
    }

    pub(crate) fn float(&mut self, value: f32) -> Result<u16, ClassFormatError> {
        let bits = value.to_bits();
        let mut bytes = vec![4u8];
        bytes.extend_from_slice(&bits.to_be_bytes());
        self.add(Key::Float(bits), bytes, false)
    }

    pub(crate) fn long(&mut self, value: i64) -> Result<u16, ClassFormatError> {
        let mut bytes = vec![5u8];
        bytes.extend_from_slice(&value.to_be_bytes());
        self.add(Key::Long(value), bytes, true)
    }

    pub(crate) fn double(&mut self, value: f64) -> Result<u16, ClassFormatError> {
        let bits = value.to_bits();
        let mut bytes = vec![6u8];
        bytes.extend_from_slice(&bits.to_be_bytes());
        self.add(Key::Double(bits), bytes, true)
    }

    pub(crate) fn class(&mut self, name: &str) -> Result<u16, ClassFormatError> {
        let name_index = self.utf8(name)?;
        let mut bytes = vec![7u8];
        bytes.extend_from_slice(&name_index.to_be_bytes());
        self.add(Key::Class(name_index), bytes, false)
    }

    pub(crate) fn string(&mut self, text: &str) -> Result<u16, ClassFormatError> {
        let utf8 = self.utf8(text)?;
        let mut bytes = vec![8u8];
        bytes.extend_from_slice(&utf8.to_be_bytes());
        self.add(Key::Str(utf8), bytes, false)
    }

    pub(crate) fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, ClassFormatError> {
        let name_index = self.utf8(name)?;
        let descriptor_index = self.utf8(descriptor)?;
        let mut bytes = vec![12u8];
        bytes.extend_from_slice(&name_index.to_be_bytes());
        bytes.extend_from_slice(&descriptor_index.to_be_bytes());
        self.add(Key::NameAndType(name_index, descriptor_index), bytes, false)
    }

    pub(crate) fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16, ClassFormatError> {
        let class = self.class(owner)?;
        let nat = self.name_and_type(name, descriptor)?;
        let mut bytes = vec![9u8];
        bytes.extend_from_slice(&class.to_be_bytes());
        bytes.extend_from_slice(&nat.to_be_bytes());
        self.add(Key::FieldRef(class, nat), bytes, false)
    }

    pub(crate) fn method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<u16, ClassFormatError> {
        let class = self.class(owner)?;
        let nat = self.name_and_type(name, descriptor)?;
        let (tag, key) = if interface {
            (11u8, Key::InterfaceMethodRef(class, nat))
        } else {
            (10u8, Key::MethodRef(class, nat))
        };
        let mut bytes = vec![tag];
        bytes.extend_from_slice(&class.to_be_bytes());
        bytes.extend_from_slice(&nat.to_be_bytes());
        self.add(key, bytes, false)
    }

    pub(crate) fn method_type(&mut self, descriptor: &str) -> Result<u16, ClassFormatError> {
        let utf8 = self.utf8(descriptor)?;
        let mut bytes = vec![16u8];
        bytes.extend_from_slice(&utf8.to_be_bytes());
        self.add(Key::MethodType(utf8), bytes, false)
    }

    pub(crate) fn method_handle(&mut self, handle: &Handle) -> Result<u16, ClassFormatError> {
        let reference = if handle.kind.is_field() {
            self.field_ref(&handle.owner, &handle.name, &handle.descriptor)?
        } else {
            let interface = handle.interface || handle.kind == HandleKind::InvokeInterface;
            self.method_ref(&handle.owner, &handle.name, &handle.descriptor, interface)?
        };
        let kind = handle.kind as u8;
        let mut bytes = vec![15u8, kind];
        bytes.extend_from_slice(&reference.to_be_bytes());
        self.add(Key::MethodHandle(kind, reference), bytes, false)
    }

    pub(crate) fn dynamic(&mut self, bootstrap: u16, name: &str, descriptor: &str) -> Result<u16, ClassFormatError> {
        let nat = self.name_and_type(name, descriptor)?;
        let mut bytes = vec![17u8];
        bytes.extend_from_slice(&bootstrap.to_be_bytes());
        bytes.extend_from_slice(&nat.to_be_bytes());
        self.add(Key::Dynamic(bootstrap, nat), bytes, false)
    }

    pub(crate) fn invoke_dynamic(&mut self, bootstrap: u16, name: &str, descriptor: &str) -> Result<u16, ClassFormatError> {
        let nat = self.name_and_type(name, descriptor)?;
        let mut bytes = vec![18u8];
        bytes.extend_from_slice(&bootstrap.to_be_bytes());
        bytes.extend_from_slice(&nat.to_be_bytes());
        self.add(Key::InvokeDynamic(bootstrap, nat), bytes, false)
    }

    /// Intern any loadable constant and report `(index, is_wide)`.
    pub(crate) fn loadable(&mut self, constant: &LdcConst) -> Result<(u16, bool), ClassFormatError> {
        let index = match constant {
            LdcConst::Integer(v) => self.integer(*v)?,
            LdcConst::Float(v) => self.float(*v)?,
            LdcConst::Long(v) => self.long(*v)?,
            LdcConst::Double(v) => self.double(*v)?,
            LdcConst::Str(v) => self.string(v)?,
            LdcConst::Class(v) => self.class(v)?,
            LdcConst::MethodType(v) => self.method_type(v)?,
            LdcConst::MethodHandle(handle) => self.method_handle(handle)?,
            LdcConst::Dynamic { name, descriptor, bootstrap } => {
                self.dynamic(*bootstrap, name, descriptor)?
            }
        };
        Ok((index, constant.is_wide()))
    }

    pub(crate) fn constant_value(&mut self, value: &ConstantValue) -> Result<u16, ClassFormatError> {
        match value {
            ConstantValue::Integer(v) => self.integer(*v),
            ConstantValue::Float(v) => self.float(*v),
            ConstantValue::Long(v) => self.long(*v),
            ConstantValue::Double(v) => self.double(*v),
            ConstantValue::Str(v) => self.string(v),
        }
    }

    pub(crate) fn write_to(&self, out: &mut Writer) {
        out.u2(self.next_slot as u16);
        for (bytes, _) in &self.entries {
            out.raw(bytes);
        }
    }
}

/// An attribute under construction: name index plus payload.
struct Attr {
    name: u16,
    payload: Vec<u8>,
}

fn write_attrs(out: &mut Writer, attrs: &[Attr]) {
    out.u2(attrs.len() as u16);
    for attr in attrs {
        out.u2(attr.name);
        out.u4(attr.payload.len() as u32);
        out.raw(&attr.payload);
    }
}

impl ClassFile {
    /// Encode the class file.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ClassFormatError> {
        let mut pool = PoolBuilder::new();

        // Intern bootstrap methods first so invokedynamic table indices are
        // stable regardless of instruction order.
        let mut bootstrap_payload = Writer::new();
        bootstrap_payload.u2(self.bootstrap_methods.len() as u16);
        for BootstrapMethod { handle, arguments } in &self.bootstrap_methods {
            let handle_index = pool.method_handle(handle)?;
            bootstrap_payload.u2(handle_index);
            bootstrap_payload.u2(arguments.len() as u16);
            for argument in arguments {
                let (index, _) = pool.loadable(argument)?;
                bootstrap_payload.u2(index);
            }
        }

        let this_class = pool.class(&self.name)?;
        let super_class = match &self.super_name {
            Some(name) => pool.class(name)?,
            None => 0,
        };
        let interface_indices: Vec<u16> = self
            .interfaces
            .iter()
            .map(|name| pool.class(name))
            .collect::<Result<_, _>>()?;

        let mut field_blobs = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            field_blobs.push(encode_field(field, &mut pool)?);
        }
        let mut method_blobs = Vec::with_capacity(self.methods.len());
        for method in &self.methods {
            method_blobs.push(encode_method(method, &mut pool)?);
        }

        let mut class_attrs = Vec::new();
        if let Some(source_file) = &self.source_file {
            let name = pool.utf8("SourceFile")?;
            let index = pool.utf8(source_file)?;
            let mut payload = Writer::new();
            payload.u2(index);
            class_attrs.push(Attr {
                name,
                payload: payload.into_bytes(),
            });
        }
        if !self.inner_classes.is_empty() {
            let name = pool.utf8("InnerClasses")?;
            let mut payload = Writer::new();
            payload.u2(self.inner_classes.len() as u16);
            for entry in &self.inner_classes {
                let inner = pool.class(&entry.inner)?;
                let outer = match &entry.outer {
                    Some(outer) => pool.class(outer)?,
                    None => 0,
                };
                let inner_name = match &entry.inner_name {
                    Some(simple) => pool.utf8(simple)?,
                    None => 0,
                };
                payload.u2(inner);
                payload.u2(outer);
                payload.u2(inner_name);
                payload.u2(entry.access.raw());
            }
            class_attrs.push(Attr {
                name,
                payload: payload.into_bytes(),
            });
        }
        if let Some(enclosing) = &self.enclosing_method {
            let name = pool.utf8("EnclosingMethod")?;
            let class_index = pool.class(&enclosing.class)?;
            let method_index = match &enclosing.method {
                Some((method_name, descriptor)) => pool.name_and_type(method_name, descriptor)?,
                None => 0,
            };
            let mut payload = Writer::new();
            payload.u2(class_index);
            payload.u2(method_index);
            class_attrs.push(Attr {
                name,
                payload: payload.into_bytes(),
            });
        }
        if !self.annotations.is_empty() {
            class_attrs.push(encode_annotations(&self.annotations, &mut pool)?);
        }
        if !self.bootstrap_methods.is_empty() {
            let name = pool.utf8("BootstrapMethods")?;
            class_attrs.push(Attr {
                name,
                payload: bootstrap_payload.into_bytes(),
            });
        }

        let mut out = Writer::new();
        out.u4(0xCAFE_BABE);
        out.u2(self.minor_version);
        out.u2(self.major_version);
        pool.write_to(&mut out);
        out.u2(self.access.raw());
        out.u2(this_class);
        out.u2(super_class);
        out.u2(interface_indices.len() as u16);
        for index in interface_indices {
            out.u2(index);
        }
        out.u2(field_blobs.len() as u16);
        for blob in field_blobs {
            out.raw(&blob);
        }
        out.u2(method_blobs.len() as u16);
        for blob in method_blobs {
            out.raw(&blob);
        }
        write_attrs(&mut out, &class_attrs);
        Ok(out.into_bytes())
    }
}

fn encode_field(field: &Field, pool: &mut PoolBuilder) -> Result<Vec<u8>, ClassFormatError> {
    let name = pool.utf8(&field.name)?;
    let descriptor = pool.utf8(&field.descriptor)?;
    let mut attrs = Vec::new();
    if let Some(value) = &field.constant_value {
        let attr_name = pool.utf8("ConstantValue")?;
        let index = pool.constant_value(value)?;
        let mut payload = Writer::new();
        payload.u2(index);
        attrs.push(Attr {
            name: attr_name,
            payload: payload.into_bytes(),
        });
    }
    if !field.annotations.is_empty() {
        attrs.push(encode_annotations(&field.annotations, pool)?);
    }
    let mut out = Writer::new();
    out.u2(field.access.raw());
    out.u2(name);
    out.u2(descriptor);
    write_attrs(&mut out, &attrs);
    Ok(out.into_bytes())
}

fn encode_method(method: &Method, pool: &mut PoolBuilder) -> Result<Vec<u8>, ClassFormatError> {
    let name = pool.utf8(&method.name)?;
    let descriptor = pool.utf8(&method.descriptor)?;
    let mut attrs = Vec::new();
    if let Some(body) = &method.body {
        let attr_name = pool.utf8("Code")?;
        let payload = encode_body(body, pool, method)?;
        attrs.push(Attr {
            name: attr_name,
            payload,
        });
    }
    if !method.exceptions.is_empty() {
        let attr_name = pool.utf8("Exceptions")?;
        let mut payload = Writer::new();
        payload.u2(method.exceptions.len() as u16);
        for exception in &method.exceptions {
            let index = pool.class(exception)?;
            payload.u2(index);
        }
        attrs.push(Attr {
            name: attr_name,
            payload: payload.into_bytes(),
        });
    }
    if !method.annotations.is_empty() {
        attrs.push(encode_annotations(&method.annotations, pool)?);
    }
    let mut out = Writer::new();
    out.u2(method.access.raw());
    out.u2(name);
    out.u2(descriptor);
    write_attrs(&mut out, &attrs);
    Ok(out.into_bytes())
}

fn encode_annotations(annotations: &[Annotation], pool: &mut PoolBuilder) -> Result<Attr, ClassFormatError> {
    let name = pool.utf8("RuntimeVisibleAnnotations")?;
    let mut payload = Writer::new();
    payload.u2(annotations.len() as u16);
    for annotation in annotations {
        encode_annotation(annotation, pool, &mut payload)?;
    }
    Ok(Attr {
        name,
        payload: payload.into_bytes(),
    })
}

fn encode_annotation(
    annotation: &Annotation,
    pool: &mut PoolBuilder,
    out: &mut Writer,
) -> Result<(), ClassFormatError> {
    let type_index = pool.utf8(&annotation.type_descriptor)?;
    out.u2(type_index);
    out.u2(annotation.elements.len() as u16);
    for (element_name, value) in &annotation.elements {
        let name_index = pool.utf8(element_name)?;
        out.u2(name_index);
        encode_element_value(value, pool, out)?;
    }
    Ok(())
}

fn encode_element_value(
    value: &ElementValue,
    pool: &mut PoolBuilder,
    out: &mut Writer,
) -> Result<(), ClassFormatError> {
    match value {
        ElementValue::Const { tag, value } => {
            out.u1(*tag);
            let index = match (tag, value) {
                (b's', ConstantValue::Str(text)) => pool.utf8(text)?,
                (_, other) => pool.constant_value(other)?,
            };
            out.u2(index);
        }
        ElementValue::Enum {
            type_descriptor,
            const_name,
        } => {
            out.u1(b'e');
            let type_index = pool.utf8(type_descriptor)?;
            let name_index = pool.utf8(const_name)?;
            out.u2(type_index);
            out.u2(name_index);
        }
        ElementValue::ClassInfo(descriptor) => {
            out.u1(b'c');
            let index = pool.utf8(descriptor)?;
            out.u2(index);
        }
        ElementValue::Nested(annotation) => {
            out.u1(b'@');
            encode_annotation(annotation, pool, out)?;
        }
        ElementValue::Array(values) => {
            out.u1(b'[');
            out.u2(values.len() as u16);
            for nested in values {
                encode_element_value(nested, pool, out)?;
            }
        }
    }
    Ok(())
}

/// Per-instruction encoding facts resolved before layout.
enum Resolved {
    None,
    Pool(u16),
    /// ldc operand: `(index, wide)`.
    Loadable(u16, bool),
    /// invokeinterface: `(index, argument slot count + 1)`.
    Interface(u16, u8),
}

fn encode_body(body: &MethodBody, pool: &mut PoolBuilder, method: &Method) -> Result<Vec<u8>, ClassFormatError> {
    // Pre-pass: intern every pool entry the instructions need, so sizes
    // depending on pool indices are known during layout.
    let mut resolved = Vec::with_capacity(body.elements.len());
    for element in &body.elements {
        let entry = match element {
            CodeElement::Insn(insn) => match insn {
                Insn::Ldc(constant) => {
                    let (index, wide) = pool.loadable(constant)?;
                    Resolved::Loadable(index, wide)
                }
                Insn::Field { owner, name, descriptor, .. } => {
                    Resolved::Pool(pool.field_ref(owner, name, descriptor)?)
                }
                Insn::Invoke {
                    opcode,
                    owner,
                    name,
                    descriptor,
                    interface,
                } => {
                    let index = pool.method_ref(owner, name, descriptor, *interface)?;
                    if *opcode == op::INVOKEINTERFACE {
                        let slots = crate::descriptor::argument_slots(descriptor)? + 1;
                        Resolved::Interface(index, slots as u8)
                    } else {
                        Resolved::Pool(index)
                    }
                }
                Insn::InvokeDynamic { name, descriptor, bootstrap } => {
                    Resolved::Pool(pool.invoke_dynamic(*bootstrap, name, descriptor)?)
                }
                Insn::Type { name, .. } => Resolved::Pool(pool.class(name)?),
                Insn::MultiANewArray { descriptor, .. } => Resolved::Pool(pool.class(descriptor)?),
                _ => Resolved::None,
            },
            _ => Resolved::None,
        };
        resolved.push(entry);
    }

    // Layout: compute instruction offsets, widening branches that overflow.
    let mut wide_branches: HashSet<usize> = HashSet::new();
    let (offsets, labels, code_length) = loop {
        let mut offsets = Vec::with_capacity(body.elements.len());
        let mut labels: HashMap<LabelId, u32> = HashMap::new();
        let mut at: u32 = 0;
        for (i, element) in body.elements.iter().enumerate() {
            offsets.push(at);
            match element {
                CodeElement::Label(label) => {
                    labels.insert(*label, at);
                }
                CodeElement::LineNumber(_) => {}
                CodeElement::Insn(insn) => {
                    at += insn_size(insn, at, &resolved[i], wide_branches.contains(&i)) as u32;
                }
            }
        }

        // Find branches whose short form no longer reaches.
        let mut widened = false;
        for (i, element) in body.elements.iter().enumerate() {
            if let CodeElement::Insn(Insn::Branch { target, .. }) = element {
                if wide_branches.contains(&i) {
                    continue;
                }
                let target_at = *labels.get(target).ok_or_else(|| {
                    ClassFormatError::Inconsistent(format!("branch to undefined label {target}"))
                })? as i64;
                let displacement = target_at - offsets[i] as i64;
                if !(i16::MIN as i64..=i16::MAX as i64).contains(&displacement) {
                    wide_branches.insert(i);
                    widened = true;
                }
            }
        }
        if !widened {
            break (offsets, labels, at);
        }
    };

    if code_length > u16::MAX as u32 {
        return Err(ClassFormatError::CodeOverflow(method.display_name()));
    }
    let label_at = |label: LabelId| -> Result<u32, ClassFormatError> {
        labels
            .get(&label)
            .copied()
            .ok_or_else(|| ClassFormatError::Inconsistent(format!("undefined label {label}")))
    };

    // Emission.
    let mut code = Writer::new();
    let mut line_numbers: Vec<(u32, u16)> = Vec::new();
    let mut pending_lines: Vec<u16> = Vec::new();
    for (i, element) in body.elements.iter().enumerate() {
        match element {
            CodeElement::Label(_) => {}
            CodeElement::LineNumber(line) => pending_lines.push(*line),
            CodeElement::Insn(insn) => {
                let at = offsets[i];
                for line in pending_lines.drain(..) {
                    line_numbers.push((at, line));
                }
                emit_insn(
                    &mut code,
                    insn,
                    at,
                    &resolved[i],
                    wide_branches.contains(&i),
                    &label_at,
                )?;
            }
        }
    }
    debug_assert_eq!(code.len() as u32, code_length);

    let is_static = method.access.contains(crate::AccessFlags::STATIC);
    let (max_stack, max_locals) = stack::compute_limits(body, is_static, &method.descriptor)?;

    let mut payload = Writer::new();
    payload.u2(max_stack);
    payload.u2(max_locals);
    payload.u4(code_length);
    payload.raw(&code.into_bytes());

    payload.u2(body.try_catch.len() as u16);
    for entry in &body.try_catch {
        payload.u2(label_at(entry.start)? as u16);
        payload.u2(label_at(entry.end)? as u16);
        payload.u2(label_at(entry.handler)? as u16);
        match &entry.catch_type {
            Some(name) => {
                let index = pool.class(name)?;
                payload.u2(index);
            }
            None => payload.u2(0),
        }
    }

    let mut code_attrs = Vec::new();
    if !line_numbers.is_empty() {
        let name = pool.utf8("LineNumberTable")?;
        let mut table = Writer::new();
        table.u2(line_numbers.len() as u16);
        for (pc, line) in &line_numbers {
            table.u2(*pc as u16);
            table.u2(*line);
        }
        code_attrs.push(Attr {
            name,
            payload: table.into_bytes(),
        });
    }
    if !body.local_variables.is_empty() {
        let name = pool.utf8("LocalVariableTable")?;
        let mut table = Writer::new();
        table.u2(body.local_variables.len() as u16);
        for local in &body.local_variables {
            let start = label_at(local.start)?;
            let end = label_at(local.end)?;
            let name_index = pool.utf8(&local.name)?;
            let descriptor_index = pool.utf8(&local.descriptor)?;
            table.u2(start as u16);
            table.u2(end.saturating_sub(start) as u16);
            table.u2(name_index);
            table.u2(descriptor_index);
            table.u2(local.index);
        }
        code_attrs.push(Attr {
            name,
            payload: table.into_bytes(),
        });
    }
    write_attrs(&mut payload, &code_attrs);
    Ok(payload.into_bytes())
}

/// The encoded size of `insn` when it starts at `at`.
fn insn_size(insn: &Insn, at: u32, resolved: &Resolved, wide_branch: bool) -> usize {
    match insn {
        Insn::Simple(_) => 1,
        Insn::Push(value) => {
            if i8::try_from(*value).is_ok() {
                2
            } else {
                3
            }
        }
        Insn::Ldc(_) => match resolved {
            Resolved::Loadable(_, true) => 3,
            Resolved::Loadable(index, false) => {
                if *index <= u8::MAX as u16 {
                    2
                } else {
                    3
                }
            }
            _ => unreachable!("ldc without a resolved constant"),
        },
        Insn::Var { opcode, index } => {
            if *opcode != op::RET && *index <= 3 {
                1
            } else if *index <= u8::MAX as u16 {
                2
            } else {
                4
            }
        }
        Insn::Iinc { index, delta } => {
            if *index <= u8::MAX as u16 && i8::try_from(*delta).is_ok() {
                3
            } else {
                6
            }
        }
        Insn::Branch { opcode, .. } => {
            if !wide_branch {
                3
            } else if *opcode == op::GOTO || *opcode == op::JSR {
                5
            } else {
                // inverted condition + goto_w trampoline
                8
            }
        }
        Insn::TableSwitch { targets, .. } => {
            let pad = switch_padding(at);
            1 + pad + 12 + 4 * targets.len()
        }
        Insn::LookupSwitch { pairs, .. } => {
            let pad = switch_padding(at);
            1 + pad + 8 + 8 * pairs.len()
        }
        Insn::Field { .. } => 3,
        Insn::Invoke { opcode, .. } => {
            if *opcode == op::INVOKEINTERFACE {
                5
            } else {
                3
            }
        }
        Insn::InvokeDynamic { .. } => 5,
        Insn::Type { .. } => 3,
        Insn::NewArray(_) => 2,
        Insn::MultiANewArray { .. } => 4,
    }
}

fn switch_padding(at: u32) -> usize {
    (3 - (at as usize % 4) + 4) % 4
}

fn emit_insn(
    code: &mut Writer,
    insn: &Insn,
    at: u32,
    resolved: &Resolved,
    wide_branch: bool,
    label_at: &dyn Fn(LabelId) -> Result<u32, ClassFormatError>,
) -> Result<(), ClassFormatError> {
    match insn {
        Insn::Simple(opcode) => code.u1(*opcode),
        Insn::Push(value) => {
            if let Ok(byte) = i8::try_from(*value) {
                code.u1(op::BIPUSH);
                code.i1(byte);
            } else {
                code.u1(op::SIPUSH);
                code.i2(*value as i16);
            }
        }
        Insn::Ldc(_) => match resolved {
            Resolved::Loadable(index, true) => {
                code.u1(op::LDC2_W);
                code.u2(*index);
            }
            Resolved::Loadable(index, false) => {
                if *index <= u8::MAX as u16 {
                    code.u1(op::LDC);
                    code.u1(*index as u8);
                } else {
                    code.u1(op::LDC_W);
                    code.u2(*index);
                }
            }
            _ => unreachable!("ldc without a resolved constant"),
        },
        Insn::Var { opcode, index } => {
            if *opcode != op::RET && *index <= 3 {
                let base = if op::is_var_load(*opcode) {
                    0x1a + (*opcode - op::ILOAD) * 4
                } else {
                    0x3b + (*opcode - op::ISTORE) * 4
                };
                code.u1(base + *index as u8);
            } else if *index <= u8::MAX as u16 {
                code.u1(*opcode);
                code.u1(*index as u8);
            } else {
                code.u1(op::WIDE);
                code.u1(*opcode);
                code.u2(*index);
            }
        }
        Insn::Iinc { index, delta } => {
            if *index <= u8::MAX as u16 && i8::try_from(*delta).is_ok() {
                code.u1(op::IINC);
                code.u1(*index as u8);
                code.i1(*delta as i8);
            } else {
                code.u1(op::WIDE);
                code.u1(op::IINC);
                code.u2(*index);
                code.i2(*delta);
            }
        }
        Insn::Branch { opcode, target } => {
            let target_at = label_at(*target)? as i64;
            if !wide_branch {
                code.u1(*opcode);
                code.i2((target_at - at as i64) as i16);
            } else if *opcode == op::GOTO || *opcode == op::JSR {
                code.u1(if *opcode == op::GOTO { op::GOTO_W } else { op::JSR_W });
                code.i4((target_at - at as i64) as i32);
            } else {
                let inverted = op::invert_condition(*opcode).ok_or_else(|| {
                    ClassFormatError::Inconsistent(format!("cannot widen branch opcode {opcode:#04x}"))
                })?;
                // Skip over the 5-byte goto_w that follows.
                code.u1(inverted);
                code.i2(8);
                code.u1(op::GOTO_W);
                code.i4((target_at - (at as i64 + 3)) as i32);
            }
        }
        Insn::TableSwitch { default, low, targets } => {
            code.u1(op::TABLESWITCH);
            for _ in 0..switch_padding(at) {
                code.u1(0);
            }
            code.i4((label_at(*default)? as i64 - at as i64) as i32);
            code.i4(*low);
            code.i4(*low + targets.len() as i32 - 1);
            for target in targets {
                code.i4((label_at(*target)? as i64 - at as i64) as i32);
            }
        }
        Insn::LookupSwitch { default, pairs } => {
            code.u1(op::LOOKUPSWITCH);
            for _ in 0..switch_padding(at) {
                code.u1(0);
            }
            code.i4((label_at(*default)? as i64 - at as i64) as i32);
            code.i4(pairs.len() as i32);
            for (matched, target) in pairs {
                code.i4(*matched);
                code.i4((label_at(*target)? as i64 - at as i64) as i32);
            }
        }
        Insn::Field { opcode, .. } => {
            let Resolved::Pool(index) = resolved else {
                unreachable!("field access without a resolved reference")
            };
            code.u1(*opcode);
            code.u2(*index);
        }
        Insn::Invoke { opcode, .. } => match resolved {
            Resolved::Interface(index, count) => {
                code.u1(op::INVOKEINTERFACE);
                code.u2(*index);
                code.u1(*count);
                code.u1(0);
            }
            Resolved::Pool(index) => {
                code.u1(*opcode);
                code.u2(*index);
            }
            _ => unreachable!("invoke without a resolved reference"),
        },
        Insn::InvokeDynamic { .. } => {
            let Resolved::Pool(index) = resolved else {
                unreachable!("invokedynamic without a resolved reference")
            };
            code.u1(op::INVOKEDYNAMIC);
            code.u2(*index);
            code.u2(0);
        }
        Insn::Type { opcode, .. } => {
            let Resolved::Pool(index) = resolved else {
                unreachable!("type instruction without a resolved reference")
            };
            code.u1(*opcode);
            code.u2(*index);
        }
        Insn::NewArray(kind) => {
            code.u1(op::NEWARRAY);
            code.u1(*kind);
        }
        Insn::MultiANewArray { dimensions, .. } => {
            let Resolved::Pool(index) = resolved else {
                unreachable!("multianewarray without a resolved reference")
            };
            code.u1(op::MULTIANEWARRAY);
            code.u2(*index);
            code.u1(*dimensions);
        }
    }
    Ok(())
}
