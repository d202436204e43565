//! Label-based method body model and the bytecode decoder.
//!
//! Branch targets, exception ranges, line numbers, and local variable ranges
//! are all expressed through [`LabelId`]s so rewriting passes can insert and
//! replace instructions freely; byte offsets exist only inside the codec.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::bytes::Cursor;
use crate::constant_pool::{ConstantPool, LdcConst};
use crate::opcode as op;
use crate::ClassFormatError;

/// Identifies a position in a method body.
pub type LabelId = u32;

/// One instruction in the resolved model.
///
/// Opcodes without operands that the rewriter treats opaquely travel as
/// [`Insn::Simple`]; everything a rewriting pass pattern-matches on is
/// resolved to names and values.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// An operand-free opcode.
    Simple(u8),
    /// `bipush` / `sipush`; the encoder picks the smallest form.
    Push(i32),
    /// `ldc` / `ldc_w` / `ldc2_w`.
    Ldc(LdcConst),
    /// Canonical local variable access (`iload` … `astore`, `ret`); the
    /// encoder picks shorthand and wide forms.
    Var {
        /// Canonical base opcode, e.g. [`op::ILOAD`].
        opcode: u8,
        /// Local variable index.
        index: u16,
    },
    /// `iinc`, wide-aware.
    Iinc {
        /// Local variable index.
        index: u16,
        /// Signed increment.
        delta: i16,
    },
    /// Any branch; `goto_w`/`jsr_w` decode to their canonical opcodes.
    Branch {
        /// Canonical branch opcode.
        opcode: u8,
        /// Target label.
        target: LabelId,
    },
    /// `tableswitch`.
    TableSwitch {
        /// Fallthrough target.
        default: LabelId,
        /// Lowest case value.
        low: i32,
        /// Case targets for `low..=low + targets.len() - 1`.
        targets: Vec<LabelId>,
    },
    /// `lookupswitch`.
    LookupSwitch {
        /// Fallthrough target.
        default: LabelId,
        /// Sorted `(match, target)` pairs.
        pairs: Vec<(i32, LabelId)>,
    },
    /// `getstatic` / `putstatic` / `getfield` / `putfield`.
    Field {
        /// The field access opcode.
        opcode: u8,
        /// Internal name of the owner.
        owner: String,
        /// Field name.
        name: String,
        /// Field descriptor.
        descriptor: String,
    },
    /// `invokevirtual` / `invokespecial` / `invokestatic` / `invokeinterface`.
    Invoke {
        /// The invocation opcode.
        opcode: u8,
        /// Internal name of the owner.
        owner: String,
        /// Method name.
        name: String,
        /// Method descriptor.
        descriptor: String,
        /// True when the owner is an interface.
        interface: bool,
    },
    /// `invokedynamic`.
    InvokeDynamic {
        /// Call site name.
        name: String,
        /// Call site descriptor.
        descriptor: String,
        /// Index into the class's bootstrap method table.
        bootstrap: u16,
    },
    /// `new` / `anewarray` / `checkcast` / `instanceof`.
    Type {
        /// The type opcode.
        opcode: u8,
        /// Internal name, or an array descriptor for array types.
        name: String,
    },
    /// `newarray` with a primitive array type code.
    NewArray(u8),
    /// `multianewarray`.
    MultiANewArray {
        /// The array class descriptor.
        descriptor: String,
        /// Number of dimensions to allocate.
        dimensions: u8,
    },
}

impl Insn {
    /// Shorthand for an `invokestatic` on a non-interface owner.
    pub fn invoke_static(owner: &str, name: &str, descriptor: &str) -> Self {
        Insn::Invoke {
            opcode: op::INVOKESTATIC,
            owner: owner.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            interface: false,
        }
    }

    /// Shorthand for an `invokevirtual`.
    pub fn invoke_virtual(owner: &str, name: &str, descriptor: &str) -> Self {
        Insn::Invoke {
            opcode: op::INVOKEVIRTUAL,
            owner: owner.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            interface: false,
        }
    }

    /// Shorthand for an `invokespecial` on a non-interface owner.
    pub fn invoke_special(owner: &str, name: &str, descriptor: &str) -> Self {
        Insn::Invoke {
            opcode: op::INVOKESPECIAL,
            owner: owner.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            interface: false,
        }
    }

    /// Shorthand for an `ldc` of a string literal.
    pub fn ldc_string(value: impl Into<String>) -> Self {
        Insn::Ldc(LdcConst::Str(value.into()))
    }

    /// Apply `f` to every label the instruction references.
    pub fn for_each_target_mut(&mut self, f: &mut dyn FnMut(&mut LabelId)) {
        match self {
            Insn::Branch { target, .. } => f(target),
            Insn::TableSwitch { default, targets, .. } => {
                f(default);
                for t in targets {
                    f(t);
                }
            }
            Insn::LookupSwitch { default, pairs } => {
                f(default);
                for (_, t) in pairs {
                    f(t);
                }
            }
            _ => {}
        }
    }
}

/// One element of a method body, in file order.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeElement {
    /// A position referenced by branches, ranges, or tables.
    Label(LabelId),
    /// A source line marker for the next instruction.
    LineNumber(u16),
    /// An instruction.
    Insn(Insn),
}

/// One exception handler range.
#[derive(Debug, Clone, PartialEq)]
pub struct TryCatch {
    /// Start of the protected range (inclusive).
    pub start: LabelId,
    /// End of the protected range (exclusive).
    pub end: LabelId,
    /// Handler entry point.
    pub handler: LabelId,
    /// Caught type's internal name; `None` is a catch-all.
    pub catch_type: Option<String>,
}

/// One `LocalVariableTable` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariable {
    /// Variable name.
    pub name: String,
    /// Variable descriptor.
    pub descriptor: String,
    /// Start of the live range.
    pub start: LabelId,
    /// End of the live range.
    pub end: LabelId,
    /// Local variable slot.
    pub index: u16,
}

/// A decoded method body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodBody {
    /// Labels, line numbers, and instructions in order.
    pub elements: Vec<CodeElement>,
    /// Exception handler table, in declaration order.
    pub try_catch: Vec<TryCatch>,
    /// Local variable debug table.
    pub local_variables: Vec<LocalVariable>,
    next_label: LabelId,
}

impl MethodBody {
    /// An empty body ready for synthesized instructions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh label, unused anywhere in the body.
    pub fn new_label(&mut self) -> LabelId {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    /// Replace the element list, keeping the exception table, the local
    /// variable table, and the label allocator.
    pub fn with_elements(mut self, elements: Vec<CodeElement>) -> Self {
        self.elements = elements;
        self
    }

    /// Iterate the instructions, ignoring labels and line numbers.
    pub fn instructions(&self) -> impl Iterator<Item = &Insn> {
        self.elements.iter().filter_map(|e| match e {
            CodeElement::Insn(insn) => Some(insn),
            _ => None,
        })
    }

    /// The labels at which exception handlers begin.
    pub fn handler_labels(&self) -> BTreeSet<LabelId> {
        self.try_catch.iter().map(|t| t.handler).collect()
    }

    /// Decode a `Code` attribute payload.
    pub(crate) fn parse(data: &[u8], pool: &ConstantPool) -> Result<Self, ClassFormatError> {
        let mut cursor = Cursor::new(data);
        let _max_stack = cursor.u2("max_stack")?;
        let _max_locals = cursor.u2("max_locals")?;
        let code_length = cursor.u4("code length")? as usize;
        let code = cursor.take(code_length, "bytecode")?;

        // First pass: decode instructions with raw byte-offset targets.
        let mut decoded: Vec<(u32, Insn)> = Vec::new();
        let mut target_offsets: BTreeSet<u32> = BTreeSet::new();
        let mut code_cursor = Cursor::new(code);
        while code_cursor.remaining() > 0 {
            let at = code_cursor.position() as u32;
            let insn = decode_insn(&mut code_cursor, at, pool)?;
            let mut probe = insn.clone();
            probe.for_each_target_mut(&mut |t| {
                target_offsets.insert(*t);
            });
            decoded.push((at, insn));
        }

        let mut try_catch_raw = Vec::new();
        let handler_count = cursor.u2("exception table length")?;
        for _ in 0..handler_count {
            let start = cursor.u2("handler start")? as u32;
            let end = cursor.u2("handler end")? as u32;
            let handler = cursor.u2("handler pc")? as u32;
            let catch_index = cursor.u2("handler catch type")?;
            let catch_type = if catch_index == 0 {
                None
            } else {
                Some(pool.class_name(catch_index)?.to_owned())
            };
            target_offsets.extend([start, end, handler]);
            try_catch_raw.push((start, end, handler, catch_type));
        }

        // Code sub-attributes: keep line numbers and local variables.
        let mut lines: BTreeMap<u32, Vec<u16>> = BTreeMap::new();
        let mut locals_raw = Vec::new();
        let attr_count = cursor.u2("code attribute count")?;
        for _ in 0..attr_count {
            let name_index = cursor.u2("code attribute name")?;
            let length = cursor.u4("code attribute length")? as usize;
            match pool.utf8(name_index)? {
                "LineNumberTable" => {
                    let mut attr = Cursor::new(cursor.take(length, "LineNumberTable")?);
                    let entries = attr.u2("line number count")?;
                    for _ in 0..entries {
                        let pc = attr.u2("line number pc")? as u32;
                        let line = attr.u2("line number")?;
                        lines.entry(pc).or_default().push(line);
                    }
                }
                "LocalVariableTable" => {
                    let mut attr = Cursor::new(cursor.take(length, "LocalVariableTable")?);
                    let entries = attr.u2("local variable count")?;
                    for _ in 0..entries {
                        let start = attr.u2("local variable start")? as u32;
                        let end = start + attr.u2("local variable length")? as u32;
                        let name = pool.utf8(attr.u2("local variable name")?)?.to_owned();
                        let descriptor = pool.utf8(attr.u2("local variable descriptor")?)?.to_owned();
                        let index = attr.u2("local variable index")?;
                        target_offsets.extend([start, end]);
                        locals_raw.push((name, descriptor, start, end, index));
                    }
                }
                // StackMapTable and other code attributes are dropped; the
                // writer recomputes stack shape from scratch.
                _ => cursor.skip(length, "code attribute payload")?,
            }
        }

        // Second pass: assign labels in offset order and build the elements.
        let mut labels: HashMap<u32, LabelId> = HashMap::new();
        for (next, offset) in target_offsets.iter().enumerate() {
            labels.insert(*offset, next as LabelId);
        }
        let resolve = |offset: u32| -> Result<LabelId, ClassFormatError> {
            labels
                .get(&offset)
                .copied()
                .ok_or(ClassFormatError::BadBranchTarget(offset as i64))
        };

        let mut body = MethodBody {
            next_label: labels.len() as LabelId,
            ..MethodBody::default()
        };
        for (offset, mut insn) in decoded {
            if let Some(label) = labels.get(&offset) {
                body.elements.push(CodeElement::Label(*label));
            }
            if let Some(line_list) = lines.get(&offset) {
                for line in line_list {
                    body.elements.push(CodeElement::LineNumber(*line));
                }
            }
            let mut bad = None;
            insn.for_each_target_mut(&mut |t| match labels.get(t) {
                Some(label) => *t = *label,
                None => bad = Some(*t as i64),
            });
            if let Some(offset) = bad {
                return Err(ClassFormatError::BadBranchTarget(offset));
            }
            body.elements.push(CodeElement::Insn(insn));
        }
        // A label exactly at code length marks the end of a range.
        if let Some(label) = labels.get(&(code_length as u32)) {
            body.elements.push(CodeElement::Label(*label));
        }

        for (start, end, handler, catch_type) in try_catch_raw {
            body.try_catch.push(TryCatch {
                start: resolve(start)?,
                end: resolve(end)?,
                handler: resolve(handler)?,
                catch_type,
            });
        }
        for (name, descriptor, start, end, index) in locals_raw {
            body.local_variables.push(LocalVariable {
                name,
                descriptor,
                start: resolve(start)?,
                end: resolve(end)?,
                index,
            });
        }
        Ok(body)
    }
}

fn decode_insn(cursor: &mut Cursor<'_>, at: u32, pool: &ConstantPool) -> Result<Insn, ClassFormatError> {
    let opcode = cursor.u1("opcode")?;
    let insn = match opcode {
        0x00..=0x0f => Insn::Simple(opcode),
        op::BIPUSH => Insn::Push(cursor.i1("bipush operand")? as i32),
        op::SIPUSH => Insn::Push(cursor.i2("sipush operand")? as i32),
        op::LDC => Insn::Ldc(pool.loadable(cursor.u1("ldc index")? as u16)?),
        op::LDC_W | op::LDC2_W => Insn::Ldc(pool.loadable(cursor.u2("ldc_w index")?)?),
        op::ILOAD..=op::ALOAD => Insn::Var {
            opcode,
            index: cursor.u1("load index")? as u16,
        },
        0x1a..=0x2d => {
            let shorthand = opcode - 0x1a;
            Insn::Var {
                opcode: op::ILOAD + shorthand / 4,
                index: (shorthand % 4) as u16,
            }
        }
        op::IALOAD..=op::SALOAD => Insn::Simple(opcode),
        op::ISTORE..=op::ASTORE => Insn::Var {
            opcode,
            index: cursor.u1("store index")? as u16,
        },
        0x3b..=0x4e => {
            let shorthand = opcode - 0x3b;
            Insn::Var {
                opcode: op::ISTORE + shorthand / 4,
                index: (shorthand % 4) as u16,
            }
        }
        op::IASTORE..=op::SASTORE => Insn::Simple(opcode),
        op::POP..=op::SWAP => Insn::Simple(opcode),
        op::IADD..=op::LXOR => Insn::Simple(opcode),
        op::IINC => Insn::Iinc {
            index: cursor.u1("iinc index")? as u16,
            delta: cursor.i1("iinc delta")? as i16,
        },
        op::I2L..=op::DCMPG => Insn::Simple(opcode),
        op::IFEQ..=op::JSR => Insn::Branch {
            opcode,
            target: offset_target(at, cursor.i2("branch offset")? as i64)?,
        },
        op::RET => Insn::Var {
            opcode,
            index: cursor.u1("ret index")? as u16,
        },
        op::TABLESWITCH => {
            skip_switch_padding(cursor, at)?;
            let default = offset_target(at, cursor.i4("tableswitch default")? as i64)?;
            let low = cursor.i4("tableswitch low")?;
            let high = cursor.i4("tableswitch high")?;
            if high < low {
                return Err(ClassFormatError::Inconsistent(format!(
                    "tableswitch high {high} below low {low}"
                )));
            }
            let count = (high - low) as usize + 1;
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(offset_target(at, cursor.i4("tableswitch target")? as i64)?);
            }
            Insn::TableSwitch { default, low, targets }
        }
        op::LOOKUPSWITCH => {
            skip_switch_padding(cursor, at)?;
            let default = offset_target(at, cursor.i4("lookupswitch default")? as i64)?;
            let npairs = cursor.i4("lookupswitch npairs")?;
            if npairs < 0 {
                return Err(ClassFormatError::Inconsistent(format!(
                    "lookupswitch pair count {npairs}"
                )));
            }
            let mut pairs = Vec::with_capacity(npairs as usize);
            for _ in 0..npairs {
                let matched = cursor.i4("lookupswitch match")?;
                let target = offset_target(at, cursor.i4("lookupswitch target")? as i64)?;
                pairs.push((matched, target));
            }
            Insn::LookupSwitch { default, pairs }
        }
        op::IRETURN..=op::RETURN => Insn::Simple(opcode),
        op::GETSTATIC..=op::PUTFIELD => {
            let (owner, name, descriptor, _) = pool.member_ref(cursor.u2("field ref")?)?;
            Insn::Field {
                opcode,
                owner,
                name,
                descriptor,
            }
        }
        op::INVOKEVIRTUAL..=op::INVOKESTATIC => {
            let (owner, name, descriptor, interface) = pool.member_ref(cursor.u2("method ref")?)?;
            Insn::Invoke {
                opcode,
                owner,
                name,
                descriptor,
                interface,
            }
        }
        op::INVOKEINTERFACE => {
            let (owner, name, descriptor, _) = pool.member_ref(cursor.u2("interface method ref")?)?;
            cursor.u1("invokeinterface count")?;
            cursor.u1("invokeinterface zero")?;
            Insn::Invoke {
                opcode,
                owner,
                name,
                descriptor,
                interface: true,
            }
        }
        op::INVOKEDYNAMIC => {
            let index = cursor.u2("invokedynamic ref")?;
            cursor.u2("invokedynamic zero")?;
            let (name, descriptor, bootstrap) = pool.invoke_dynamic(index)?;
            Insn::InvokeDynamic {
                name,
                descriptor,
                bootstrap,
            }
        }
        op::NEW | op::ANEWARRAY | op::CHECKCAST | op::INSTANCEOF => Insn::Type {
            opcode,
            name: pool.class_name(cursor.u2("type ref")?)?.to_owned(),
        },
        op::NEWARRAY => Insn::NewArray(cursor.u1("newarray type")?),
        op::ARRAYLENGTH | op::ATHROW | op::MONITORENTER | op::MONITOREXIT => Insn::Simple(opcode),
        op::WIDE => {
            let wide_opcode = cursor.u1("wide opcode")?;
            match wide_opcode {
                op::IINC => Insn::Iinc {
                    index: cursor.u2("wide iinc index")?,
                    delta: cursor.i2("wide iinc delta")?,
                },
                _ if op::is_var(wide_opcode) => Insn::Var {
                    opcode: wide_opcode,
                    index: cursor.u2("wide var index")?,
                },
                other => {
                    return Err(ClassFormatError::UnknownOpcode {
                        opcode: other,
                        offset: at as usize,
                    })
                }
            }
        }
        op::MULTIANEWARRAY => Insn::MultiANewArray {
            descriptor: pool.class_name(cursor.u2("multianewarray ref")?)?.to_owned(),
            dimensions: cursor.u1("multianewarray dimensions")?,
        },
        op::IFNULL | op::IFNONNULL => Insn::Branch {
            opcode,
            target: offset_target(at, cursor.i2("branch offset")? as i64)?,
        },
        op::GOTO_W => Insn::Branch {
            opcode: op::GOTO,
            target: offset_target(at, cursor.i4("goto_w offset")? as i64)?,
        },
        op::JSR_W => Insn::Branch {
            opcode: op::JSR,
            target: offset_target(at, cursor.i4("jsr_w offset")? as i64)?,
        },
        op::BREAKPOINT => Insn::Simple(opcode),
        other => {
            return Err(ClassFormatError::UnknownOpcode {
                opcode: other,
                offset: at as usize,
            })
        }
    };
    Ok(insn)
}

/// A branch target expressed as an absolute byte offset, stored in the
/// label field until the second decoding pass assigns real labels.
fn offset_target(at: u32, relative: i64) -> Result<LabelId, ClassFormatError> {
    let absolute = at as i64 + relative;
    if !(0..=u32::MAX as i64).contains(&absolute) {
        return Err(ClassFormatError::BadBranchTarget(absolute));
    }
    Ok(absolute as u32)
}

fn skip_switch_padding(cursor: &mut Cursor<'_>, at: u32) -> Result<(), ClassFormatError> {
    let pad = (3 - (at as usize % 4) + 4) % 4;
    cursor.skip(pad, "switch padding")
}
