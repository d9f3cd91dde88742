use strum::{EnumCount, EnumIter};

/// Identifiers for the metadata tables defined in ECMA-335.
///
/// The numeric values correspond to the table IDs as defined in the CLI specification
/// (Partition II, Section 22) and to the high byte of metadata tokens referring into
/// the respective table.
#[derive(Clone, Copy, PartialEq, Debug, EnumIter, EnumCount, Eq, Hash, PartialOrd, Ord)]
pub enum TableId {
    /// `Module` table (0x00) - Information about the current module.
    Module = 0x00,
    /// `TypeRef` table (0x01) - References to types defined in external assemblies.
    TypeRef = 0x01,
    /// `TypeDef` table (0x02) - Definitions of types within this assembly.
    TypeDef = 0x02,
    /// `FieldPtr` table (0x03) - Indirection table for `Field` rows.
    FieldPtr = 0x03,
    /// `Field` table (0x04) - Field definitions within types.
    Field = 0x04,
    /// `MethodPtr` table (0x05) - Indirection table for `MethodDef` rows.
    MethodPtr = 0x05,
    /// `MethodDef` table (0x06) - Method definitions within types.
    MethodDef = 0x06,
    /// `ParamPtr` table (0x07) - Indirection table for `Param` rows.
    ParamPtr = 0x07,
    /// `Param` table (0x08) - Parameter definitions for methods.
    Param = 0x08,
    /// `InterfaceImpl` table (0x09) - Interface implementations by types.
    InterfaceImpl = 0x09,
    /// `MemberRef` table (0x0A) - References to members of external types.
    MemberRef = 0x0A,
    /// `Constant` table (0x0B) - Compile-time constant values.
    Constant = 0x0B,
    /// `CustomAttribute` table (0x0C) - Custom attribute applications.
    CustomAttribute = 0x0C,
    /// `FieldMarshal` table (0x0D) - Marshalling information for fields and parameters.
    FieldMarshal = 0x0D,
    /// `DeclSecurity` table (0x0E) - Declarative security permissions.
    DeclSecurity = 0x0E,
    /// `ClassLayout` table (0x0F) - Memory layout information for types.
    ClassLayout = 0x0F,
    /// `FieldLayout` table (0x10) - Explicit field offsets within types.
    FieldLayout = 0x10,
    /// `StandAloneSig` table (0x11) - Standalone signatures (locals, indirect calls).
    StandAloneSig = 0x11,
    /// `EventMap` table (0x12) - Type-to-event mappings.
    EventMap = 0x12,
    /// `EventPtr` table (0x13) - Indirection table for `Event` rows.
    EventPtr = 0x13,
    /// `Event` table (0x14) - Event definitions.
    Event = 0x14,
    /// `PropertyMap` table (0x15) - Type-to-property mappings.
    PropertyMap = 0x15,
    /// `PropertyPtr` table (0x16) - Indirection table for `Property` rows.
    PropertyPtr = 0x16,
    /// `Property` table (0x17) - Property definitions.
    Property = 0x17,
    /// `MethodSemantics` table (0x18) - Property/event accessor mappings.
    MethodSemantics = 0x18,
    /// `MethodImpl` table (0x19) - Explicit method implementation mappings.
    MethodImpl = 0x19,
    /// `ModuleRef` table (0x1A) - External module references.
    ModuleRef = 0x1A,
    /// `TypeSpec` table (0x1B) - Instantiated or constructed type signatures.
    TypeSpec = 0x1B,
    /// `ImplMap` table (0x1C) - P/Invoke implementation mappings.
    ImplMap = 0x1C,
    /// `FieldRVA` table (0x1D) - Field relative virtual addresses for initialized data.
    FieldRVA = 0x1D,
    /// `EncLog` table (0x1E) - Edit-and-continue log.
    EncLog = 0x1E,
    /// `EncMap` table (0x1F) - Edit-and-continue map.
    EncMap = 0x1F,
    /// `Assembly` table (0x20) - Current assembly metadata.
    Assembly = 0x20,
    /// `AssemblyProcessor` table (0x21) - Processor-specific assembly info.
    AssemblyProcessor = 0x21,
    /// `AssemblyOS` table (0x22) - OS-specific assembly info.
    AssemblyOS = 0x22,
    /// `AssemblyRef` table (0x23) - External assembly references.
    AssemblyRef = 0x23,
    /// `AssemblyRefProcessor` table (0x24) - External assembly processor info.
    AssemblyRefProcessor = 0x24,
    /// `AssemblyRefOS` table (0x25) - External assembly OS info.
    AssemblyRefOS = 0x25,
    /// `File` table (0x26) - File references in the assembly manifest.
    File = 0x26,
    /// `ExportedType` table (0x27) - Types exported from this assembly.
    ExportedType = 0x27,
    /// `ManifestResource` table (0x28) - Embedded or linked resources.
    ManifestResource = 0x28,
    /// `NestedClass` table (0x29) - Nested class relationships.
    NestedClass = 0x29,
    /// `GenericParam` table (0x2A) - Generic parameter definitions.
    GenericParam = 0x2A,
    /// `MethodSpec` table (0x2B) - Generic method instantiations.
    MethodSpec = 0x2B,
    /// `GenericParamConstraint` table (0x2C) - Generic parameter constraints.
    GenericParamConstraint = 0x2C,
}

/// Number of table slots addressed by the `Valid` bitmask this crate understands.
pub const TABLE_SLOT_COUNT: usize = 0x2D;

impl TableId {
    /// Maps a raw table number (token high byte or `Valid` bit position) to a `TableId`.
    #[must_use]
    pub fn from_number(value: u8) -> Option<TableId> {
        match value {
            0x00 => Some(TableId::Module),
            0x01 => Some(TableId::TypeRef),
            0x02 => Some(TableId::TypeDef),
            0x03 => Some(TableId::FieldPtr),
            0x04 => Some(TableId::Field),
            0x05 => Some(TableId::MethodPtr),
            0x06 => Some(TableId::MethodDef),
            0x07 => Some(TableId::ParamPtr),
            0x08 => Some(TableId::Param),
            0x09 => Some(TableId::InterfaceImpl),
            0x0A => Some(TableId::MemberRef),
            0x0B => Some(TableId::Constant),
            0x0C => Some(TableId::CustomAttribute),
            0x0D => Some(TableId::FieldMarshal),
            0x0E => Some(TableId::DeclSecurity),
            0x0F => Some(TableId::ClassLayout),
            0x10 => Some(TableId::FieldLayout),
            0x11 => Some(TableId::StandAloneSig),
            0x12 => Some(TableId::EventMap),
            0x13 => Some(TableId::EventPtr),
            0x14 => Some(TableId::Event),
            0x15 => Some(TableId::PropertyMap),
            0x16 => Some(TableId::PropertyPtr),
            0x17 => Some(TableId::Property),
            0x18 => Some(TableId::MethodSemantics),
            0x19 => Some(TableId::MethodImpl),
            0x1A => Some(TableId::ModuleRef),
            0x1B => Some(TableId::TypeSpec),
            0x1C => Some(TableId::ImplMap),
            0x1D => Some(TableId::FieldRVA),
            0x1E => Some(TableId::EncLog),
            0x1F => Some(TableId::EncMap),
            0x20 => Some(TableId::Assembly),
            0x21 => Some(TableId::AssemblyProcessor),
            0x22 => Some(TableId::AssemblyOS),
            0x23 => Some(TableId::AssemblyRef),
            0x24 => Some(TableId::AssemblyRefProcessor),
            0x25 => Some(TableId::AssemblyRefOS),
            0x26 => Some(TableId::File),
            0x27 => Some(TableId::ExportedType),
            0x28 => Some(TableId::ManifestResource),
            0x29 => Some(TableId::NestedClass),
            0x2A => Some(TableId::GenericParam),
            0x2B => Some(TableId::MethodSpec),
            0x2C => Some(TableId::GenericParamConstraint),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn from_number_roundtrip() {
        for id in TableId::iter() {
            assert_eq!(TableId::from_number(id as u8), Some(id));
        }
        assert_eq!(TableId::from_number(0x2D), None);
        assert_eq!(TableId::from_number(0xFF), None);
    }

    #[test]
    fn token_table_bytes() {
        assert_eq!(TableId::MethodDef as u8, 0x06);
        assert_eq!(TableId::MemberRef as u8, 0x0A);
        assert_eq!(TableId::AssemblyRef as u8, 0x23);
    }
}
