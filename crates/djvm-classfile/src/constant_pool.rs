//! Constant pool decoding and the resolved constant value types.

use crate::bytes::Cursor;
use crate::ClassFormatError;

/// Constant pool tags.
pub(crate) mod tag {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELD_REF: u8 = 9;
    pub const METHOD_REF: u8 = 10;
    pub const INTERFACE_METHOD_REF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// A raw constant pool entry; indices are unresolved 1-based pool refs.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Modified UTF-8 text, decoded.
    Utf8(String),
    /// 32-bit integer.
    Integer(i32),
    /// 32-bit float.
    Float(f32),
    /// 64-bit integer; occupies two slots.
    Long(i64),
    /// 64-bit float; occupies two slots.
    Double(f64),
    /// Class reference; index of a Utf8 internal name.
    Class(u16),
    /// String literal; index of a Utf8 entry.
    Str(u16),
    /// Field reference.
    FieldRef {
        /// Index of the owner Class entry.
        class: u16,
        /// Index of the NameAndType entry.
        name_and_type: u16,
    },
    /// Method reference.
    MethodRef {
        /// Index of the owner Class entry.
        class: u16,
        /// Index of the NameAndType entry.
        name_and_type: u16,
    },
    /// Interface method reference.
    InterfaceMethodRef {
        /// Index of the owner Class entry.
        class: u16,
        /// Index of the NameAndType entry.
        name_and_type: u16,
    },
    /// Name and descriptor pair.
    NameAndType {
        /// Index of the name Utf8.
        name: u16,
        /// Index of the descriptor Utf8.
        descriptor: u16,
    },
    /// Method handle.
    MethodHandle {
        /// Reference kind, 1-9.
        kind: u8,
        /// Index of the member reference entry.
        reference: u16,
    },
    /// Method type; index of a descriptor Utf8.
    MethodType(u16),
    /// Dynamically-computed constant.
    Dynamic {
        /// Index into the BootstrapMethods attribute.
        bootstrap: u16,
        /// Index of the NameAndType entry.
        name_and_type: u16,
    },
    /// Dynamically-computed call site.
    InvokeDynamic {
        /// Index into the BootstrapMethods attribute.
        bootstrap: u16,
        /// Index of the NameAndType entry.
        name_and_type: u16,
    },
    /// Module reference; index of a Utf8 name.
    Module(u16),
    /// Package reference; index of a Utf8 name.
    Package(u16),
    /// Index 0 and the phantom slot after a Long or Double.
    Unused,
}

/// The decoded constant pool of one class file.
#[derive(Debug)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    /// Decode the pool from a cursor positioned at `constant_pool_count`.
    pub(crate) fn parse(cursor: &mut Cursor<'_>) -> Result<Self, ClassFormatError> {
        let count = cursor.u2("constant pool count")?;
        let mut entries = vec![Constant::Unused];
        while entries.len() < count as usize {
            let tag = cursor.u1("constant pool tag")?;
            let entry = match tag {
                tag::UTF8 => {
                    let len = cursor.u2("utf8 length")? as usize;
                    let raw = cursor.take(len, "utf8 bytes")?;
                    let text = cesu8::from_java_cesu8(raw).map_err(|_| ClassFormatError::BadUtf8)?;
                    Constant::Utf8(text.into_owned())
                }
                tag::INTEGER => Constant::Integer(cursor.i4("integer constant")?),
                tag::FLOAT => Constant::Float(f32::from_bits(cursor.u4("float constant")?)),
                tag::LONG => {
                    let hi = cursor.u4("long constant")? as u64;
                    let lo = cursor.u4("long constant")? as u64;
                    Constant::Long(((hi << 32) | lo) as i64)
                }
                tag::DOUBLE => {
                    let hi = cursor.u4("double constant")? as u64;
                    let lo = cursor.u4("double constant")? as u64;
                    Constant::Double(f64::from_bits((hi << 32) | lo))
                }
                tag::CLASS => Constant::Class(cursor.u2("class name index")?),
                tag::STRING => Constant::Str(cursor.u2("string index")?),
                tag::FIELD_REF => Constant::FieldRef {
                    class: cursor.u2("fieldref class")?,
                    name_and_type: cursor.u2("fieldref name-and-type")?,
                },
                tag::METHOD_REF => Constant::MethodRef {
                    class: cursor.u2("methodref class")?,
                    name_and_type: cursor.u2("methodref name-and-type")?,
                },
                tag::INTERFACE_METHOD_REF => Constant::InterfaceMethodRef {
                    class: cursor.u2("interface methodref class")?,
                    name_and_type: cursor.u2("interface methodref name-and-type")?,
                },
                tag::NAME_AND_TYPE => Constant::NameAndType {
                    name: cursor.u2("name-and-type name")?,
                    descriptor: cursor.u2("name-and-type descriptor")?,
                },
                tag::METHOD_HANDLE => Constant::MethodHandle {
                    kind: cursor.u1("method handle kind")?,
                    reference: cursor.u2("method handle reference")?,
                },
                tag::METHOD_TYPE => Constant::MethodType(cursor.u2("method type descriptor")?),
                tag::DYNAMIC => Constant::Dynamic {
                    bootstrap: cursor.u2("dynamic bootstrap index")?,
                    name_and_type: cursor.u2("dynamic name-and-type")?,
                },
                tag::INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap: cursor.u2("invokedynamic bootstrap index")?,
                    name_and_type: cursor.u2("invokedynamic name-and-type")?,
                },
                tag::MODULE => Constant::Module(cursor.u2("module name index")?),
                tag::PACKAGE => Constant::Package(cursor.u2("package name index")?),
                other => return Err(ClassFormatError::UnknownPoolTag(other)),
            };
            let two_slots = matches!(entry, Constant::Long(_) | Constant::Double(_));
            entries.push(entry);
            if two_slots {
                entries.push(Constant::Unused);
            }
        }
        Ok(Self { entries })
    }

    fn entry(&self, index: u16, expected: &'static str) -> Result<&Constant, ClassFormatError> {
        self.entries
            .get(index as usize)
            .ok_or(ClassFormatError::BadPoolRef { index, expected })
    }

    /// The Utf8 text at `index`.
    pub fn utf8(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.entry(index, "Utf8")? {
            Constant::Utf8(text) => Ok(text),
            _ => Err(ClassFormatError::BadPoolRef { index, expected: "Utf8" }),
        }
    }

    /// The internal class name at a Class entry.
    pub fn class_name(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.entry(index, "Class")? {
            Constant::Class(name) => self.utf8(*name),
            _ => Err(ClassFormatError::BadPoolRef { index, expected: "Class" }),
        }
    }

    /// The (name, descriptor) pair at a NameAndType entry.
    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ClassFormatError> {
        match self.entry(index, "NameAndType")? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(ClassFormatError::BadPoolRef {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Resolve a Fieldref / Methodref / InterfaceMethodref entry to
    /// `(owner, name, descriptor, is_interface)`.
    pub fn member_ref(&self, index: u16) -> Result<(String, String, String, bool), ClassFormatError> {
        let (class, name_and_type, interface) = match self.entry(index, "member reference")? {
            Constant::FieldRef { class, name_and_type }
            | Constant::MethodRef { class, name_and_type } => (*class, *name_and_type, false),
            Constant::InterfaceMethodRef { class, name_and_type } => (*class, *name_and_type, true),
            _ => {
                return Err(ClassFormatError::BadPoolRef {
                    index,
                    expected: "member reference",
                })
            }
        };
        let owner = self.class_name(class)?.to_owned();
        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Ok((owner, name.to_owned(), descriptor.to_owned(), interface))
    }

    /// Resolve a MethodHandle entry.
    pub fn method_handle(&self, index: u16) -> Result<Handle, ClassFormatError> {
        match self.entry(index, "MethodHandle")? {
            Constant::MethodHandle { kind, reference } => {
                let kind = HandleKind::from_raw(*kind).ok_or(ClassFormatError::BadPoolRef {
                    index,
                    expected: "MethodHandle kind",
                })?;
                let (owner, name, descriptor, interface) = self.member_ref(*reference)?;
                Ok(Handle {
                    kind,
                    owner,
                    name,
                    descriptor,
                    interface,
                })
            }
            _ => Err(ClassFormatError::BadPoolRef {
                index,
                expected: "MethodHandle",
            }),
        }
    }

    /// Every class name the pool mentions through Class entries. Array
    /// entries contribute their element class.
    pub fn class_names(&self) -> Result<std::collections::BTreeSet<String>, ClassFormatError> {
        let mut names = std::collections::BTreeSet::new();
        for entry in &self.entries {
            if let Constant::Class(utf8) = entry {
                let name = self.utf8(*utf8)?;
                let element = name.trim_start_matches('[');
                let element = element
                    .strip_prefix('L')
                    .and_then(|n| n.strip_suffix(';'))
                    .unwrap_or(element);
                if element.len() > 1 {
                    names.insert(element.to_owned());
                }
            }
        }
        Ok(names)
    }

    /// Resolve an InvokeDynamic entry to `(name, descriptor, bootstrap)`.
    pub fn invoke_dynamic(&self, index: u16) -> Result<(String, String, u16), ClassFormatError> {
        match self.entry(index, "InvokeDynamic")? {
            Constant::InvokeDynamic { bootstrap, name_and_type } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok((name.to_owned(), descriptor.to_owned(), *bootstrap))
            }
            _ => Err(ClassFormatError::BadPoolRef {
                index,
                expected: "InvokeDynamic",
            }),
        }
    }

    /// Resolve any entry loadable by `ldc`/`ldc_w`/`ldc2_w` or usable as a
    /// bootstrap method argument.
    pub fn loadable(&self, index: u16) -> Result<LdcConst, ClassFormatError> {
        match self.entry(index, "loadable constant")? {
            Constant::Integer(v) => Ok(LdcConst::Integer(*v)),
            Constant::Float(v) => Ok(LdcConst::Float(*v)),
            Constant::Long(v) => Ok(LdcConst::Long(*v)),
            Constant::Double(v) => Ok(LdcConst::Double(*v)),
            Constant::Str(utf8) => Ok(LdcConst::Str(self.utf8(*utf8)?.to_owned())),
            Constant::Class(name) => Ok(LdcConst::Class(self.utf8(*name)?.to_owned())),
            Constant::MethodType(desc) => Ok(LdcConst::MethodType(self.utf8(*desc)?.to_owned())),
            Constant::MethodHandle { .. } => Ok(LdcConst::MethodHandle(self.method_handle(index)?)),
            Constant::Dynamic { bootstrap, name_and_type } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(LdcConst::Dynamic {
                    name: name.to_owned(),
                    descriptor: descriptor.to_owned(),
                    bootstrap: *bootstrap,
                })
            }
            _ => Err(ClassFormatError::BadPoolRef {
                index,
                expected: "loadable constant",
            }),
        }
    }
}

/// Method handle reference kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HandleKind {
    /// `getfield`.
    GetField = 1,
    /// `getstatic`.
    GetStatic = 2,
    /// `putfield`.
    PutField = 3,
    /// `putstatic`.
    PutStatic = 4,
    /// `invokevirtual`.
    InvokeVirtual = 5,
    /// `invokestatic`.
    InvokeStatic = 6,
    /// `invokespecial`.
    InvokeSpecial = 7,
    /// `invokespecial` of a constructor via `new`.
    NewInvokeSpecial = 8,
    /// `invokeinterface`.
    InvokeInterface = 9,
}

impl HandleKind {
    /// Decode the raw reference kind.
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            1 => Self::GetField,
            2 => Self::GetStatic,
            3 => Self::PutField,
            4 => Self::PutStatic,
            5 => Self::InvokeVirtual,
            6 => Self::InvokeStatic,
            7 => Self::InvokeSpecial,
            8 => Self::NewInvokeSpecial,
            9 => Self::InvokeInterface,
            _ => return None,
        })
    }

    /// True for the field access kinds.
    pub fn is_field(&self) -> bool {
        matches!(
            self,
            Self::GetField | Self::GetStatic | Self::PutField | Self::PutStatic
        )
    }
}

/// A resolved method handle.
#[derive(Debug, Clone, PartialEq)]
pub struct Handle {
    /// What the handle does when invoked.
    pub kind: HandleKind,
    /// Internal name of the member's owner.
    pub owner: String,
    /// Member name.
    pub name: String,
    /// Member descriptor.
    pub descriptor: String,
    /// True when the member reference is an interface method reference.
    pub interface: bool,
}

/// A resolved loadable constant: `ldc` operands and bootstrap arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum LdcConst {
    /// 32-bit integer.
    Integer(i32),
    /// 32-bit float.
    Float(f32),
    /// 64-bit integer.
    Long(i64),
    /// 64-bit float.
    Double(f64),
    /// String literal.
    Str(String),
    /// Class literal; internal name or array descriptor.
    Class(String),
    /// Method type descriptor.
    MethodType(String),
    /// Method handle.
    MethodHandle(Handle),
    /// Dynamically-computed constant.
    Dynamic {
        /// Constant name.
        name: String,
        /// Constant field descriptor.
        descriptor: String,
        /// Index into the class's bootstrap method table.
        bootstrap: u16,
    },
}

impl LdcConst {
    /// True for constants occupying two operand stack slots.
    pub fn is_wide(&self) -> bool {
        match self {
            LdcConst::Long(_) | LdcConst::Double(_) => true,
            LdcConst::Dynamic { descriptor, .. } => descriptor == "J" || descriptor == "D",
            _ => false,
        }
    }
}

/// A field `ConstantValue` attribute payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    /// int, short, char, byte, boolean.
    Integer(i32),
    /// float.
    Float(f32),
    /// long.
    Long(i64),
    /// double.
    Double(f64),
    /// String.
    Str(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_from(bytes: &[u8]) -> ConstantPool {
        let mut cursor = Cursor::new(bytes);
        ConstantPool::parse(&mut cursor).unwrap()
    }

    #[test]
    fn parses_utf8_class_and_member_chain() {
        // count=6: Utf8 "a/B", Class #1, Utf8 "f", Utf8 "()V", NameAndType #3 #4
        let mut bytes = vec![0, 6];
        bytes.extend_from_slice(&[1, 0, 3]);
        bytes.extend_from_slice(b"a/B");
        bytes.extend_from_slice(&[7, 0, 1]);
        bytes.extend_from_slice(&[1, 0, 1]);
        bytes.extend_from_slice(b"f");
        bytes.extend_from_slice(&[1, 0, 3]);
        bytes.extend_from_slice(b"()V");
        bytes.extend_from_slice(&[12, 0, 3, 0, 4]);

        let pool = pool_from(&bytes);
        assert_eq!(pool.class_name(2).unwrap(), "a/B");
        assert_eq!(pool.name_and_type(5).unwrap(), ("f", "()V"));
    }

    #[test]
    fn long_occupies_two_slots() {
        // count=4: Long 7, then Utf8 "x" must land at index 3.
        let mut bytes = vec![0, 4];
        bytes.push(5);
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&7u32.to_be_bytes());
        bytes.extend_from_slice(&[1, 0, 1]);
        bytes.extend_from_slice(b"x");

        let pool = pool_from(&bytes);
        assert_eq!(pool.loadable(1).unwrap(), LdcConst::Long(7));
        assert_eq!(pool.utf8(3).unwrap(), "x");
    }

    #[test]
    fn rejects_mismatched_reference() {
        let mut bytes = vec![0, 2];
        bytes.extend_from_slice(&[1, 0, 1]);
        bytes.extend_from_slice(b"x");
        let pool = pool_from(&bytes);
        assert!(pool.class_name(1).is_err());
    }
}
