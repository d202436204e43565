//! `RuntimeVisibleAnnotations` model and decoding.

use crate::bytes::Cursor;
use crate::constant_pool::{ConstantPool, ConstantValue};
use crate::ClassFormatError;

/// One annotation on a class, field, or method.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// The annotation interface, as a field descriptor (`Lcom/x/Anno;`).
    pub type_descriptor: String,
    /// Named element values, in declaration order.
    pub elements: Vec<(String, ElementValue)>,
}

/// An annotation element value.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    /// A primitive or string constant, with the original value tag.
    Const {
        /// The element tag byte (`B C D F I J S Z s`).
        tag: u8,
        /// The resolved constant.
        value: ConstantValue,
    },
    /// An enum constant.
    Enum {
        /// Enum type descriptor.
        type_descriptor: String,
        /// Enum constant name.
        const_name: String,
    },
    /// A class literal, as a return descriptor.
    ClassInfo(String),
    /// A nested annotation.
    Nested(Box<Annotation>),
    /// An array of element values.
    Array(Vec<ElementValue>),
}

impl Annotation {
    /// Decode a `RuntimeVisibleAnnotations` attribute payload.
    pub(crate) fn parse_table(data: &[u8], pool: &ConstantPool) -> Result<Vec<Annotation>, ClassFormatError> {
        let mut cursor = Cursor::new(data);
        let count = cursor.u2("annotation count")?;
        let mut annotations = Vec::with_capacity(count as usize);
        for _ in 0..count {
            annotations.push(Self::parse(&mut cursor, pool)?);
        }
        Ok(annotations)
    }

    fn parse(cursor: &mut Cursor<'_>, pool: &ConstantPool) -> Result<Annotation, ClassFormatError> {
        let type_descriptor = pool.utf8(cursor.u2("annotation type")?)?.to_owned();
        let pair_count = cursor.u2("annotation element count")?;
        let mut elements = Vec::with_capacity(pair_count as usize);
        for _ in 0..pair_count {
            let name = pool.utf8(cursor.u2("annotation element name")?)?.to_owned();
            let value = ElementValue::parse(cursor, pool)?;
            elements.push((name, value));
        }
        Ok(Annotation {
            type_descriptor,
            elements,
        })
    }
}

impl ElementValue {
    fn parse(cursor: &mut Cursor<'_>, pool: &ConstantPool) -> Result<ElementValue, ClassFormatError> {
        let tag = cursor.u1("element value tag")?;
        let value = match tag {
            b'B' | b'C' | b'I' | b'S' | b'Z' => {
                let index = cursor.u2("element value index")?;
                match pool.loadable(index)? {
                    crate::constant_pool::LdcConst::Integer(v) => ElementValue::Const {
                        tag,
                        value: ConstantValue::Integer(v),
                    },
                    _ => {
                        return Err(ClassFormatError::BadPoolRef {
                            index,
                            expected: "Integer",
                        })
                    }
                }
            }
            b'D' => {
                let index = cursor.u2("element value index")?;
                match pool.loadable(index)? {
                    crate::constant_pool::LdcConst::Double(v) => ElementValue::Const {
                        tag,
                        value: ConstantValue::Double(v),
                    },
                    _ => {
                        return Err(ClassFormatError::BadPoolRef {
                            index,
                            expected: "Double",
                        })
                    }
                }
            }
            b'F' => {
                let index = cursor.u2("element value index")?;
                match pool.loadable(index)? {
                    crate::constant_pool::LdcConst::Float(v) => ElementValue::Const {
                        tag,
                        value: ConstantValue::Float(v),
                    },
                    _ => {
                        return Err(ClassFormatError::BadPoolRef {
                            index,
                            expected: "Float",
                        })
                    }
                }
            }
            b'J' => {
                let index = cursor.u2("element value index")?;
                match pool.loadable(index)? {
                    crate::constant_pool::LdcConst::Long(v) => ElementValue::Const {
                        tag,
                        value: ConstantValue::Long(v),
                    },
                    _ => {
                        return Err(ClassFormatError::BadPoolRef {
                            index,
                            expected: "Long",
                        })
                    }
                }
            }
            b's' => {
                let index = cursor.u2("element value index")?;
                ElementValue::Const {
                    tag,
                    value: ConstantValue::Str(pool.utf8(index)?.to_owned()),
                }
            }
            b'e' => ElementValue::Enum {
                type_descriptor: pool.utf8(cursor.u2("enum type")?)?.to_owned(),
                const_name: pool.utf8(cursor.u2("enum constant")?)?.to_owned(),
            },
            b'c' => ElementValue::ClassInfo(pool.utf8(cursor.u2("class info")?)?.to_owned()),
            b'@' => ElementValue::Nested(Box::new(Annotation::parse(cursor, pool)?)),
            b'[' => {
                let count = cursor.u2("array element count")?;
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    values.push(ElementValue::parse(cursor, pool)?);
                }
                ElementValue::Array(values)
            }
            other => {
                return Err(ClassFormatError::Inconsistent(format!(
                    "unknown annotation element tag {}",
                    other as char
                )))
            }
        };
        Ok(value)
    }
}
