#![warn(missing_docs)]

//! # djvm-classfile
//!
//! A class file codec for the DJVM class rewriter.
//!
//! The reader decodes a class file into an owned, name-resolved model: all
//! constant pool indices are chased to strings at parse time, and method
//! bodies become label-based instruction lists so that rewriting passes can
//! insert and replace instructions without tracking byte offsets. The writer
//! rebuilds a deduplicated constant pool from scratch, re-encodes branches
//! (widening them where displacements overflow), and recomputes operand
//! stack and local variable sizes.
//!
//! Attributes carried through a decode/encode round trip: `Code`,
//! `ConstantValue`, `Exceptions`, `SourceFile`, `InnerClasses`,
//! `EnclosingMethod`, `BootstrapMethods`, `LineNumberTable`,
//! `LocalVariableTable`, and `RuntimeVisibleAnnotations`. Everything else
//! (including `StackMapTable` and `Signature`) is dropped; the constant
//! pool is rebuilt, so raw attribute payloads holding pool indices cannot
//! be carried safely.

mod annotation;
mod bytes;
mod class;
mod code;
mod constant_pool;
pub mod descriptor;
mod flags;
pub mod opcode;
mod stack;
mod writer;

pub use annotation::{Annotation, ElementValue};
pub use class::{
    referenced_class_names, BootstrapMethod, ClassFile, ClassHeader, EnclosingMethod, Field,
    InnerClass, Method,
};
pub use code::{CodeElement, Insn, LabelId, LocalVariable, MethodBody, TryCatch};
pub use constant_pool::{Constant, ConstantPool, ConstantValue, Handle, HandleKind, LdcConst};
pub use flags::AccessFlags;

use thiserror::Error;

/// Errors raised while decoding or encoding a class file.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ClassFormatError {
    /// The input did not start with the `0xCAFEBABE` magic number.
    #[error("not a class file: bad magic {0:#010x}")]
    BadMagic(u32),

    /// The input ended before a complete item could be read.
    #[error("unexpected end of class file reading {what} at offset {offset}")]
    Truncated {
        /// The item being read.
        what: &'static str,
        /// Byte offset at which input ran out.
        offset: usize,
    },

    /// A constant pool index pointed at a missing or mismatched entry.
    #[error("bad constant pool reference: index {index} is not a {expected}")]
    BadPoolRef {
        /// The offending 1-based pool index.
        index: u16,
        /// The entry kind the referent should have been.
        expected: &'static str,
    },

    /// A constant pool entry used a tag this codec does not know.
    #[error("unknown constant pool tag {0}")]
    UnknownPoolTag(u8),

    /// An opcode this codec does not know.
    #[error("unknown opcode {opcode:#04x} at bytecode offset {offset}")]
    UnknownOpcode {
        /// The unrecognized opcode byte.
        opcode: u8,
        /// Offset within the method's bytecode.
        offset: usize,
    },

    /// A branch or table entry referred to an offset outside the method.
    #[error("branch to invalid bytecode offset {0}")]
    BadBranchTarget(i64),

    /// Modified UTF-8 data failed to decode.
    #[error("malformed modified UTF-8 in constant pool")]
    BadUtf8,

    /// The constant pool grew past the u16 index space while encoding.
    #[error("constant pool overflow: more than 65534 entries required")]
    PoolOverflow,

    /// A method body grew past the format's code size limit while encoding.
    #[error("method {0} exceeds the 65535-byte code limit")]
    CodeOverflow(String),

    /// Structural inconsistency in the in-memory model, e.g. an undefined
    /// label referenced by a branch.
    #[error("inconsistent class model: {0}")]
    Inconsistent(String),
}
