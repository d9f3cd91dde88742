//! Flag types for `MethodDef` and `Param` rows.

use bitflags::bitflags;

bitflags! {
    /// `MethodAttributes` from the `MethodDef` table (ECMA-335 II.23.1.10).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAttributes: u16 {
        const PRIVATE = 0x0001;
        const FAM_AND_ASSEM = 0x0002;
        const ASSEMBLY = 0x0003;
        const FAMILY = 0x0004;
        const FAM_OR_ASSEM = 0x0005;
        const PUBLIC = 0x0006;
        const STATIC = 0x0010;
        const FINAL = 0x0020;
        const VIRTUAL = 0x0040;
        const HIDE_BY_SIG = 0x0080;
        const NEW_SLOT = 0x0100;
        const ABSTRACT = 0x0400;
        const SPECIAL_NAME = 0x0800;
        const PINVOKE_IMPL = 0x2000;
        const RT_SPECIAL_NAME = 0x1000;
    }
}

impl MethodAttributes {
    /// Mask covering the member access bits.
    pub const ACCESS_MASK: u16 = 0x0007;

    /// Whether the access bits encode anything other than compiler-controlled.
    #[must_use]
    pub fn access(raw: u16) -> u16 {
        raw & Self::ACCESS_MASK
    }
}

bitflags! {
    /// `MethodImplAttributes` from the `MethodDef` table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodImplAttributes: u16 {
        const IL = 0x0000;
        const NATIVE = 0x0001;
        const RUNTIME = 0x0003;
        const MANAGED_MASK = 0x0004;
        const NO_INLINING = 0x0008;
        const INTERNAL_CALL = 0x1000;
    }
}

bitflags! {
    /// `ParamAttributes` from the `Param` table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ParamAttributes: u16 {
        const IN = 0x0001;
        const OUT = 0x0002;
        const OPTIONAL = 0x0010;
        const HAS_DEFAULT = 0x1000;
        const HAS_FIELD_MARSHAL = 0x2000;
    }
}
