//! The class-level model and whole-file reader.

use crate::annotation::Annotation;
use crate::bytes::Cursor;
use crate::code::MethodBody;
use crate::constant_pool::{ConstantPool, ConstantValue, Handle, LdcConst};
use crate::flags::AccessFlags;
use crate::ClassFormatError;

const MAGIC: u32 = 0xCAFE_BABE;

/// One `InnerClasses` table entry.
#[derive(Debug, Clone, PartialEq)]
pub struct InnerClass {
    /// The nested class.
    pub inner: String,
    /// The enclosing class, when the nesting is a member relationship.
    pub outer: Option<String>,
    /// The simple source name; `None` for anonymous classes.
    pub inner_name: Option<String>,
    /// The nested class's declared access flags.
    pub access: AccessFlags,
}

/// The `EnclosingMethod` attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct EnclosingMethod {
    /// Immediately enclosing class.
    pub class: String,
    /// Enclosing method `(name, descriptor)`, absent when the class is
    /// enclosed by an initializer or field.
    pub method: Option<(String, String)>,
}

/// One bootstrap method table entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapMethod {
    /// The bootstrap method handle.
    pub handle: Handle,
    /// Static bootstrap arguments.
    pub arguments: Vec<LdcConst>,
}

/// A declared field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Access flags.
    pub access: AccessFlags,
    /// Field name.
    pub name: String,
    /// Field descriptor.
    pub descriptor: String,
    /// The `ConstantValue` attribute, when present.
    pub constant_value: Option<ConstantValue>,
    /// Runtime-visible annotations.
    pub annotations: Vec<Annotation>,
}

/// A declared method.
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    /// Access flags.
    pub access: AccessFlags,
    /// Method name.
    pub name: String,
    /// Method descriptor.
    pub descriptor: String,
    /// Declared thrown exception class names.
    pub exceptions: Vec<String>,
    /// The decoded body; `None` for abstract and native methods.
    pub body: Option<MethodBody>,
    /// Runtime-visible annotations.
    pub annotations: Vec<Annotation>,
}

impl Method {
    /// The `name:descriptor` display form used in diagnostics.
    pub fn display_name(&self) -> String {
        format!("{}:{}", self.name, self.descriptor)
    }
}

/// A fully decoded class file.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    /// Class file minor version.
    pub minor_version: u16,
    /// Class file major version.
    pub major_version: u16,
    /// Class access flags.
    pub access: AccessFlags,
    /// This class's internal name.
    pub name: String,
    /// Superclass internal name; `None` only for `java/lang/Object`.
    pub super_name: Option<String>,
    /// Directly implemented interfaces.
    pub interfaces: Vec<String>,
    /// Declared fields, in file order.
    pub fields: Vec<Field>,
    /// Declared methods, in file order.
    pub methods: Vec<Method>,
    /// The `SourceFile` attribute.
    pub source_file: Option<String>,
    /// The `InnerClasses` table.
    pub inner_classes: Vec<InnerClass>,
    /// The `EnclosingMethod` attribute.
    pub enclosing_method: Option<EnclosingMethod>,
    /// Runtime-visible class annotations.
    pub annotations: Vec<Annotation>,
    /// The bootstrap method table backing `invokedynamic` and dynamic
    /// constants.
    pub bootstrap_methods: Vec<BootstrapMethod>,
}

impl ClassFile {
    /// Decode a class file.
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFormatError> {
        let mut cursor = Cursor::new(bytes);
        let magic = cursor.u4("magic")?;
        if magic != MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let minor_version = cursor.u2("minor version")?;
        let major_version = cursor.u2("major version")?;
        let pool = ConstantPool::parse(&mut cursor)?;
        let access = AccessFlags::from_raw(cursor.u2("class access flags")?);
        let name = pool.class_name(cursor.u2("this class")?)?.to_owned();
        let super_index = cursor.u2("super class")?;
        let super_name = if super_index == 0 {
            None
        } else {
            Some(pool.class_name(super_index)?.to_owned())
        };
        let interface_count = cursor.u2("interface count")?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(pool.class_name(cursor.u2("interface")?)?.to_owned());
        }

        let field_count = cursor.u2("field count")?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(Self::parse_field(&mut cursor, &pool)?);
        }

        let method_count = cursor.u2("method count")?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(Self::parse_method(&mut cursor, &pool)?);
        }

        let mut class = ClassFile {
            minor_version,
            major_version,
            access,
            name,
            super_name,
            interfaces,
            fields,
            methods,
            source_file: None,
            inner_classes: Vec::new(),
            enclosing_method: None,
            annotations: Vec::new(),
            bootstrap_methods: Vec::new(),
        };

        let attr_count = cursor.u2("class attribute count")?;
        for _ in 0..attr_count {
            let attr_name = pool.utf8(cursor.u2("class attribute name")?)?.to_owned();
            let length = cursor.u4("class attribute length")? as usize;
            match attr_name.as_str() {
                "SourceFile" => {
                    let mut attr = Cursor::new(cursor.take(length, "SourceFile")?);
                    class.source_file = Some(pool.utf8(attr.u2("source file")?)?.to_owned());
                }
                "InnerClasses" => {
                    let mut attr = Cursor::new(cursor.take(length, "InnerClasses")?);
                    let entries = attr.u2("inner class count")?;
                    for _ in 0..entries {
                        let inner_index = attr.u2("inner class")?;
                        let outer_index = attr.u2("outer class")?;
                        let name_index = attr.u2("inner name")?;
                        let inner_access = AccessFlags::from_raw(attr.u2("inner access")?);
                        class.inner_classes.push(InnerClass {
                            inner: pool.class_name(inner_index)?.to_owned(),
                            outer: if outer_index == 0 {
                                None
                            } else {
                                Some(pool.class_name(outer_index)?.to_owned())
                            },
                            inner_name: if name_index == 0 {
                                None
                            } else {
                                Some(pool.utf8(name_index)?.to_owned())
                            },
                            access: inner_access,
                        });
                    }
                }
                "EnclosingMethod" => {
                    let mut attr = Cursor::new(cursor.take(length, "EnclosingMethod")?);
                    let class_index = attr.u2("enclosing class")?;
                    let method_index = attr.u2("enclosing method")?;
                    class.enclosing_method = Some(EnclosingMethod {
                        class: pool.class_name(class_index)?.to_owned(),
                        method: if method_index == 0 {
                            None
                        } else {
                            let (name, descriptor) = pool.name_and_type(method_index)?;
                            Some((name.to_owned(), descriptor.to_owned()))
                        },
                    });
                }
                "RuntimeVisibleAnnotations" => {
                    let data = cursor.take(length, "RuntimeVisibleAnnotations")?;
                    class.annotations = Annotation::parse_table(data, &pool)?;
                }
                "BootstrapMethods" => {
                    let mut attr = Cursor::new(cursor.take(length, "BootstrapMethods")?);
                    let entries = attr.u2("bootstrap method count")?;
                    for _ in 0..entries {
                        let handle = pool.method_handle(attr.u2("bootstrap handle")?)?;
                        let arg_count = attr.u2("bootstrap argument count")?;
                        let mut arguments = Vec::with_capacity(arg_count as usize);
                        for _ in 0..arg_count {
                            arguments.push(pool.loadable(attr.u2("bootstrap argument")?)?);
                        }
                        class.bootstrap_methods.push(BootstrapMethod { handle, arguments });
                    }
                }
                // Signature, StackMapTable, SourceDebugExtension, etc. are
                // dropped; the pool is rebuilt on write.
                _ => cursor.skip(length, "class attribute payload")?,
            }
        }

        Ok(class)
    }

    fn parse_field(cursor: &mut Cursor<'_>, pool: &ConstantPool) -> Result<Field, ClassFormatError> {
        let access = AccessFlags::from_raw(cursor.u2("field access flags")?);
        let name = pool.utf8(cursor.u2("field name")?)?.to_owned();
        let descriptor = pool.utf8(cursor.u2("field descriptor")?)?.to_owned();
        let mut field = Field {
            access,
            name,
            descriptor,
            constant_value: None,
            annotations: Vec::new(),
        };
        let attr_count = cursor.u2("field attribute count")?;
        for _ in 0..attr_count {
            let attr_name = pool.utf8(cursor.u2("field attribute name")?)?.to_owned();
            let length = cursor.u4("field attribute length")? as usize;
            match attr_name.as_str() {
                "ConstantValue" => {
                    let mut attr = Cursor::new(cursor.take(length, "ConstantValue")?);
                    let index = attr.u2("constant value index")?;
                    field.constant_value = Some(match pool.loadable(index)? {
                        LdcConst::Integer(v) => ConstantValue::Integer(v),
                        LdcConst::Float(v) => ConstantValue::Float(v),
                        LdcConst::Long(v) => ConstantValue::Long(v),
                        LdcConst::Double(v) => ConstantValue::Double(v),
                        LdcConst::Str(v) => ConstantValue::Str(v),
                        _ => {
                            return Err(ClassFormatError::BadPoolRef {
                                index,
                                expected: "ConstantValue",
                            })
                        }
                    });
                }
                "RuntimeVisibleAnnotations" => {
                    let data = cursor.take(length, "RuntimeVisibleAnnotations")?;
                    field.annotations = Annotation::parse_table(data, pool)?;
                }
                _ => cursor.skip(length, "field attribute payload")?,
            }
        }
        Ok(field)
    }

    fn parse_method(cursor: &mut Cursor<'_>, pool: &ConstantPool) -> Result<Method, ClassFormatError> {
        let access = AccessFlags::from_raw(cursor.u2("method access flags")?);
        let name = pool.utf8(cursor.u2("method name")?)?.to_owned();
        let descriptor = pool.utf8(cursor.u2("method descriptor")?)?.to_owned();
        let mut method = Method {
            access,
            name,
            descriptor,
            exceptions: Vec::new(),
            body: None,
            annotations: Vec::new(),
        };
        let attr_count = cursor.u2("method attribute count")?;
        for _ in 0..attr_count {
            let attr_name = pool.utf8(cursor.u2("method attribute name")?)?.to_owned();
            let length = cursor.u4("method attribute length")? as usize;
            match attr_name.as_str() {
                "Code" => {
                    let data = cursor.take(length, "Code")?;
                    method.body = Some(MethodBody::parse(data, pool)?);
                }
                "Exceptions" => {
                    let mut attr = Cursor::new(cursor.take(length, "Exceptions")?);
                    let entries = attr.u2("exception count")?;
                    for _ in 0..entries {
                        method
                            .exceptions
                            .push(pool.class_name(attr.u2("exception class")?)?.to_owned());
                    }
                }
                "RuntimeVisibleAnnotations" => {
                    let data = cursor.take(length, "RuntimeVisibleAnnotations")?;
                    method.annotations = Annotation::parse_table(data, pool)?;
                }
                _ => cursor.skip(length, "method attribute payload")?,
            }
        }
        Ok(method)
    }

    /// Find a declared method by name and descriptor.
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }
}

/// Every class name the constant pool of `bytes` mentions, excluding the
/// class's own name. Cheap: stops after the interface table.
pub fn referenced_class_names(bytes: &[u8]) -> Result<std::collections::BTreeSet<String>, ClassFormatError> {
    let mut cursor = Cursor::new(bytes);
    let magic = cursor.u4("magic")?;
    if magic != MAGIC {
        return Err(ClassFormatError::BadMagic(magic));
    }
    cursor.skip(4, "version")?;
    let pool = ConstantPool::parse(&mut cursor)?;
    cursor.u2("class access flags")?;
    let own_name = pool.class_name(cursor.u2("this class")?)?.to_owned();
    let mut names = pool.class_names()?;
    names.remove(&own_name);
    Ok(names)
}

/// The header of a class file: everything before the field table, parsed
/// without touching method bodies. Used by the source layer to answer
/// hierarchy questions cheaply.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassHeader {
    /// Class file major version.
    pub major_version: u16,
    /// Class access flags.
    pub access: AccessFlags,
    /// This class's internal name.
    pub name: String,
    /// Superclass internal name.
    pub super_name: Option<String>,
    /// Directly implemented interfaces.
    pub interfaces: Vec<String>,
}

impl ClassHeader {
    /// Decode just the header of a class file.
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFormatError> {
        let mut cursor = Cursor::new(bytes);
        let magic = cursor.u4("magic")?;
        if magic != MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let _minor = cursor.u2("minor version")?;
        let major_version = cursor.u2("major version")?;
        let pool = ConstantPool::parse(&mut cursor)?;
        let access = AccessFlags::from_raw(cursor.u2("class access flags")?);
        let name = pool.class_name(cursor.u2("this class")?)?.to_owned();
        let super_index = cursor.u2("super class")?;
        let super_name = if super_index == 0 {
            None
        } else {
            Some(pool.class_name(super_index)?.to_owned())
        };
        let interface_count = cursor.u2("interface count")?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(pool.class_name(cursor.u2("interface")?)?.to_owned());
        }
        Ok(ClassHeader {
            major_version,
            access,
            name,
            super_name,
            interfaces,
        })
    }
}
