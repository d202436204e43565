//! Operand stack depth and local variable sizing.
//!
//! The writer drops any incoming frame metadata, so stack and local sizes
//! are recomputed here by abstract interpretation over depths (not types).
//! Depths converge in a handful of passes because labels acquire entry
//! depths from whichever path reaches them first.

use std::collections::HashMap;

use crate::code::{CodeElement, Insn, LabelId, MethodBody};
use crate::descriptor;
use crate::opcode as op;
use crate::ClassFormatError;

/// Compute `(max_stack, max_locals)` for a method body.
pub(crate) fn compute_limits(
    body: &MethodBody,
    is_static: bool,
    descriptor: &str,
) -> Result<(u16, u16), ClassFormatError> {
    let mut max_locals = descriptor::argument_slots(descriptor)? + usize::from(!is_static);
    for element in &body.elements {
        if let CodeElement::Insn(insn) = element {
            let needed = match insn {
                Insn::Var { opcode, index } => Some(*index as usize + op::var_width(*opcode).max(1)),
                Insn::Iinc { index, .. } => Some(*index as usize + 1),
                _ => None,
            };
            if let Some(needed) = needed {
                max_locals = max_locals.max(needed);
            }
        }
    }

    let mut entry_depths: HashMap<LabelId, i32> = HashMap::new();
    for handler in body.handler_labels() {
        entry_depths.insert(handler, 1);
    }

    let mut max_stack: i32 = 0;
    // Iterate to a fixpoint: a pass may discover entry depths for labels
    // whose bodies appear earlier in file order than the jump that reaches
    // them.
    for _pass in 0..64 {
        let mut changed = false;
        let mut depth: Option<i32> = Some(0);
        fn first_record(
            entry_depths: &mut HashMap<LabelId, i32>,
            label: LabelId,
            value: i32,
            changed: &mut bool,
        ) {
            match entry_depths.get(&label) {
                Some(existing) if *existing >= value => {}
                _ => {
                    entry_depths.insert(label, value);
                    *changed = true;
                }
            }
        }

        for element in &body.elements {
            match element {
                CodeElement::Label(label) => {
                    let entry = entry_depths.get(label).copied();
                    depth = match (depth, entry) {
                        (Some(current), Some(entry)) => Some(current.max(entry)),
                        (Some(current), None) => {
                            first_record(&mut entry_depths, *label, current, &mut changed);
                            Some(current)
                        }
                        (None, Some(entry)) => Some(entry),
                        (None, None) => None,
                    };
                }
                CodeElement::LineNumber(_) => {}
                CodeElement::Insn(insn) => {
                    let Some(current) = depth else { continue };
                    let after = apply(insn, current)?;
                    max_stack = max_stack.max(current).max(after);
                    match insn {
                        Insn::Branch { opcode, target } => {
                            if *opcode == op::JSR {
                                first_record(&mut entry_depths, *target, after + 1, &mut changed);
                                depth = None;
                            } else {
                                first_record(&mut entry_depths, *target, after, &mut changed);
                                depth = if *opcode == op::GOTO { None } else { Some(after) };
                            }
                            max_stack = max_stack.max(after + i32::from(*opcode == op::JSR));
                        }
                        Insn::TableSwitch { default, targets, .. } => {
                            first_record(&mut entry_depths, *default, after, &mut changed);
                            for target in targets {
                                first_record(&mut entry_depths, *target, after, &mut changed);
                            }
                            depth = None;
                        }
                        Insn::LookupSwitch { default, pairs } => {
                            first_record(&mut entry_depths, *default, after, &mut changed);
                            for (_, target) in pairs {
                                first_record(&mut entry_depths, *target, after, &mut changed);
                            }
                            depth = None;
                        }
                        Insn::Simple(opcode) if op::ends_flow(*opcode) => depth = None,
                        Insn::Var { opcode, .. } if *opcode == op::RET => depth = None,
                        _ => depth = Some(after),
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    if max_locals > u16::MAX as usize || max_stack > u16::MAX as i32 {
        return Err(ClassFormatError::Inconsistent(
            "method frame exceeds the u16 limits".into(),
        ));
    }
    Ok((max_stack as u16, max_locals as u16))
}

/// Depth after executing `insn` from `depth`, clamped at zero.
fn apply(insn: &Insn, depth: i32) -> Result<i32, ClassFormatError> {
    let delta = match insn {
        Insn::Simple(opcode) => simple_delta(*opcode),
        Insn::Push(_) => 1,
        Insn::Ldc(constant) => {
            if constant.is_wide() {
                2
            } else {
                1
            }
        }
        Insn::Var { opcode, .. } => {
            let width = op::var_width(*opcode) as i32;
            if op::is_var_load(*opcode) {
                width
            } else {
                -width
            }
        }
        Insn::Iinc { .. } => 0,
        Insn::Branch { opcode, .. } => match *opcode {
            op::GOTO | op::JSR => 0,
            o if matches!(o, op::IF_ICMPEQ..=op::IF_ACMPNE) => -2,
            _ => -1,
        },
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => -1,
        Insn::Field { opcode, descriptor, .. } => {
            let slots = descriptor::type_slots(descriptor) as i32;
            match *opcode {
                op::GETSTATIC => slots,
                op::GETFIELD => slots - 1,
                op::PUTSTATIC => -slots,
                _ => -slots - 1,
            }
        }
        Insn::Invoke { opcode, descriptor, .. } => {
            let args = descriptor::argument_slots(descriptor)? as i32;
            let ret = descriptor::return_slots(descriptor)? as i32;
            let receiver = i32::from(*opcode != op::INVOKESTATIC);
            ret - args - receiver
        }
        Insn::InvokeDynamic { descriptor, .. } => {
            let args = descriptor::argument_slots(descriptor)? as i32;
            let ret = descriptor::return_slots(descriptor)? as i32;
            ret - args
        }
        Insn::Type { opcode, .. } => {
            if *opcode == op::NEW {
                1
            } else {
                0
            }
        }
        Insn::NewArray(_) => 0,
        Insn::MultiANewArray { dimensions, .. } => 1 - *dimensions as i32,
    };
    Ok((depth + delta).max(0))
}

fn simple_delta(opcode: u8) -> i32 {
    match opcode {
        op::NOP => 0,
        op::ACONST_NULL => 1,
        op::ICONST_M1..=op::ICONST_5 => 1,
        op::LCONST_0 | op::LCONST_1 => 2,
        op::FCONST_0..=op::FCONST_2 => 1,
        op::DCONST_0 | op::DCONST_1 => 2,
        // array loads: arrayref, index -> value
        0x2e | 0x30 | 0x32 | 0x33 | 0x34 | 0x35 => -1,
        0x2f | 0x31 => 0,
        // array stores
        0x4f | 0x51 | 0x53 | 0x54 | 0x55 | 0x56 => -3,
        0x50 | 0x52 => -4,
        op::POP => -1,
        op::POP2 => -2,
        op::DUP | op::DUP_X1 | op::DUP_X2 => 1,
        op::DUP2 | op::DUP2_X1 | op::DUP2_X2 => 2,
        op::SWAP => 0,
        op::IADD | op::ISUB | op::IMUL | op::IDIV | op::IREM => -1,
        op::LADD | op::LSUB | op::LMUL | op::LDIV | op::LREM => -2,
        op::FADD | op::FSUB | op::FMUL | op::FDIV | op::FREM => -1,
        op::DADD | op::DSUB | op::DMUL | op::DDIV | op::DREM => -2,
        op::INEG | op::LNEG | op::FNEG | op::DNEG => 0,
        op::ISHL | op::ISHR | op::IUSHR => -1,
        op::LSHL | op::LSHR | op::LUSHR => -1,
        op::IAND | op::IOR | op::IXOR => -1,
        op::LAND | op::LOR | op::LXOR => -2,
        // conversions
        0x85 | 0x87 | 0x8c | 0x8d => 1, // i2l i2d f2l f2d
        0x86 | 0x8b => 0,               // i2f f2i
        0x88 | 0x89 | 0x8e | 0x90 => -1, // l2i l2f d2i d2f
        0x8a | 0x8f => 0,               // l2d d2l
        0x91..=0x93 => 0,               // i2b i2c i2s
        op::LCMP => -3,
        op::FCMPL | op::FCMPG => -1,
        op::DCMPL | op::DCMPG => -3,
        op::IRETURN | op::FRETURN | 0xb0 => -1,
        op::LRETURN | op::DRETURN => -2,
        op::RETURN => 0,
        op::ARRAYLENGTH => 0,
        op::ATHROW => -1,
        op::MONITORENTER | op::MONITOREXIT => -1,
        op::BREAKPOINT => 0,
        _ => 0,
    }
}
