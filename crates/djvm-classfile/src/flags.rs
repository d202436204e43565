//! Access flag bits shared by classes, fields, and methods.

use bitflags::bitflags;

bitflags! {
    /// Class, field, and method access flags.
    ///
    /// The class file format overloads several bit positions by context
    /// (`SUPER`/`SYNCHRONIZED`, `VOLATILE`/`BRIDGE`, `TRANSIENT`/`VARARGS`);
    /// callers pick the alias that matches the declaration site.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u16 {
        /// Declared public.
        const PUBLIC = 0x0001;
        /// Declared private.
        const PRIVATE = 0x0002;
        /// Declared protected.
        const PROTECTED = 0x0004;
        /// Declared static.
        const STATIC = 0x0008;
        /// Declared final.
        const FINAL = 0x0010;
        /// Class: invokespecial semantics marker.
        const SUPER = 0x0020;
        /// Method: declared synchronized.
        const SYNCHRONIZED = 0x0020;
        /// Field: declared volatile.
        const VOLATILE = 0x0040;
        /// Method: compiler-generated bridge.
        const BRIDGE = 0x0040;
        /// Field: declared transient.
        const TRANSIENT = 0x0080;
        /// Method: declared with a variable-arity parameter.
        const VARARGS = 0x0080;
        /// Method: implemented in native code.
        const NATIVE = 0x0100;
        /// Class: an interface.
        const INTERFACE = 0x0200;
        /// Declared abstract.
        const ABSTRACT = 0x0400;
        /// Method: strict floating-point arithmetic.
        const STRICT = 0x0800;
        /// Compiler-generated and absent from source.
        const SYNTHETIC = 0x1000;
        /// Class: an annotation interface.
        const ANNOTATION = 0x2000;
        /// Class or field: an enum.
        const ENUM = 0x4000;
    }
}

impl AccessFlags {
    /// Decode flags, preserving any bits this codec does not name.
    pub fn from_raw(raw: u16) -> Self {
        AccessFlags::from_bits_retain(raw)
    }

    /// The raw u16 as stored in a class file.
    pub fn raw(&self) -> u16 {
        self.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bits_survive_a_round_trip() {
        let flags = AccessFlags::from_raw(0x8011);
        assert!(flags.contains(AccessFlags::PUBLIC));
        assert!(flags.contains(AccessFlags::FINAL));
        assert_eq!(flags.raw(), 0x8011);
    }

    #[test]
    fn synchronized_clears_without_touching_neighbours() {
        let flags = AccessFlags::PUBLIC | AccessFlags::SYNCHRONIZED | AccessFlags::STATIC;
        let cleared = flags.difference(AccessFlags::SYNCHRONIZED);
        assert!(!cleared.contains(AccessFlags::SYNCHRONIZED));
        assert!(cleared.contains(AccessFlags::PUBLIC));
        assert!(cleared.contains(AccessFlags::STATIC));
    }
}
