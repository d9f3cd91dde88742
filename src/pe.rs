//! Owned PE header summary and CLR runtime header access.
//!
//! The patcher rewrites PE headers in place (section count, image size, CLR metadata
//! directory), so instead of holding goblin's borrowed view, the fields and file offsets
//! needed for surgery are extracted into [`PeInfo`] at load time. goblin still does the
//! envelope validation and section table parsing.

use goblin::pe::PE;

use crate::{file::File, Result};

/// Byte offset of `NumberOfSections` inside the COFF header.
const COFF_NUMBER_OF_SECTIONS: usize = 2;
/// Byte offset of `SizeOfImage` inside the optional header (same for PE32 and PE32+).
const OPT_SIZE_OF_IMAGE: usize = 56;
/// Byte offset of `CheckSum` inside the optional header.
const OPT_CHECKSUM: usize = 64;
/// Size of one section table entry.
pub const SECTION_HEADER_SIZE: usize = 40;
/// Size of the COR20 (CLI) header.
pub const COR20_HEADER_SIZE: usize = 72;

/// One entry of the PE section table.
#[derive(Debug, Clone)]
pub struct SectionInfo {
    /// Section name, NUL padded.
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub characteristics: u32,
}

/// Owned summary of the PE headers of a loaded assembly.
///
/// Carries every field and file offset the metadata reader and the patch writer need,
/// decoupled from the raw file bytes.
#[derive(Debug, Clone)]
pub struct PeInfo {
    /// File offset of the `PE\0\0` signature.
    pub pe_pointer: u32,
    pub number_of_sections: u16,
    pub size_of_optional_header: u16,
    /// File offset of the optional header.
    pub optional_header_offset: usize,
    /// File offset of the first section table entry.
    pub section_table_offset: usize,
    pub file_alignment: u32,
    pub section_alignment: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    /// RVA of the CLR runtime (COR20) header.
    pub clr_rva: u32,
    /// Size of the CLR runtime header directory.
    pub clr_size: u32,
    pub sections: Vec<SectionInfo>,
}

impl PeInfo {
    /// Parse the PE headers of `data` and validate that a CLR runtime header is present.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GoblinErr`] for an invalid PE envelope, or
    /// [`crate::Error::Malformed`] when the optional header or the CLR directory is missing.
    pub fn parse(data: &[u8]) -> Result<PeInfo> {
        let pe = PE::parse(data)?;

        let Some(optional_header) = pe.header.optional_header else {
            return Err(malformed_error!("File does not have an OptionalHeader"));
        };

        let Some(clr_dir) = optional_header.data_directories.get_clr_runtime_header() else {
            return Err(malformed_error!(
                "File does not have a CLR runtime header directory"
            ));
        };

        let pe_pointer = pe.header.dos_header.pe_pointer;
        let optional_header_offset = pe_pointer as usize + 24;
        let section_table_offset =
            optional_header_offset + pe.header.coff_header.size_of_optional_header as usize;

        let sections = pe
            .sections
            .iter()
            .map(|section| SectionInfo {
                name: section.name,
                virtual_size: section.virtual_size,
                virtual_address: section.virtual_address,
                size_of_raw_data: section.size_of_raw_data,
                pointer_to_raw_data: section.pointer_to_raw_data,
                characteristics: section.characteristics,
            })
            .collect();

        Ok(PeInfo {
            pe_pointer,
            number_of_sections: pe.header.coff_header.number_of_sections,
            size_of_optional_header: pe.header.coff_header.size_of_optional_header,
            optional_header_offset,
            section_table_offset,
            file_alignment: optional_header.windows_fields.file_alignment,
            section_alignment: optional_header.windows_fields.section_alignment,
            size_of_image: optional_header.windows_fields.size_of_image,
            size_of_headers: optional_header.windows_fields.size_of_headers,
            clr_rva: clr_dir.virtual_address,
            clr_size: clr_dir.size,
            sections,
        })
    }

    /// Converts a relative virtual address into a file offset.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the RVA does not fall into the raw data of
    /// any section.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        for section in &self.sections {
            let span = section.virtual_size.max(section.size_of_raw_data);
            let Some(section_max) = section.virtual_address.checked_add(span) else {
                return Err(malformed_error!(
                    "Section malformed, causing integer overflow - {} + {}",
                    section.virtual_address,
                    span
                ));
            };

            if section.virtual_address <= rva && rva < section_max {
                let delta = rva - section.virtual_address;
                if delta >= section.size_of_raw_data {
                    return Err(malformed_error!(
                        "RVA {:#x} points into zero-fill past the raw data of its section",
                        rva
                    ));
                }

                return Ok(delta as usize + section.pointer_to_raw_data as usize);
            }
        }

        Err(malformed_error!(
            "RVA could not be converted to offset - {:#x}",
            rva
        ))
    }

    /// File offset of the COFF `NumberOfSections` field.
    #[must_use]
    pub fn number_of_sections_offset(&self) -> usize {
        self.pe_pointer as usize + 4 + COFF_NUMBER_OF_SECTIONS
    }

    /// File offset of the optional header `SizeOfImage` field.
    #[must_use]
    pub fn size_of_image_offset(&self) -> usize {
        self.optional_header_offset + OPT_SIZE_OF_IMAGE
    }

    /// File offset of the optional header `CheckSum` field.
    #[must_use]
    pub fn checksum_offset(&self) -> usize {
        self.optional_header_offset + OPT_CHECKSUM
    }

    /// Highest end RVA across all sections, aligned to the section alignment.
    #[must_use]
    pub fn next_free_rva(&self) -> u32 {
        let end = self
            .sections
            .iter()
            .map(|s| s.virtual_address + s.virtual_size.max(s.size_of_raw_data))
            .max()
            .unwrap_or(self.size_of_headers);

        align_up(end, self.section_alignment)
    }

    /// Highest end of raw data across all sections, aligned to the file alignment.
    #[must_use]
    pub fn next_free_file_offset(&self, file_len: usize) -> u32 {
        let end = self
            .sections
            .iter()
            .map(|s| s.pointer_to_raw_data + s.size_of_raw_data)
            .max()
            .unwrap_or(0)
            .max(u32::try_from(file_len).unwrap_or(u32::MAX));

        align_up(end, self.file_alignment)
    }
}

/// The COR20 (CLI) header of a .NET assembly.
#[derive(Debug, Clone)]
pub struct Cor20 {
    /// File offset of the COR20 header itself.
    pub offset: usize,
    pub major_runtime_version: u16,
    pub minor_runtime_version: u16,
    /// RVA of the physical metadata (BSJB root).
    pub metadata_rva: u32,
    pub metadata_size: u32,
    pub flags: u32,
    /// `MethodDef` or `File` token of the managed entry point, 0 if none.
    pub entry_point_token: u32,
}

impl Cor20 {
    /// Parse the COR20 header the CLR data directory of `file` points at.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the header is truncated or its declared
    /// size is smaller than the fixed layout requires.
    pub fn parse(file: &File) -> Result<Cor20> {
        let (clr_rva, clr_size) = file.clr();
        if (clr_size as usize) < COR20_HEADER_SIZE {
            return Err(malformed_error!(
                "CLR runtime header directory too small - {}",
                clr_size
            ));
        }

        let offset = file.rva_to_offset(clr_rva)?;
        let data = file.data_slice(offset, COR20_HEADER_SIZE)?;

        let cb = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if (cb as usize) < COR20_HEADER_SIZE {
            return Err(malformed_error!("COR20 header cb field too small - {}", cb));
        }

        Ok(Cor20 {
            offset,
            major_runtime_version: u16::from_le_bytes([data[4], data[5]]),
            minor_runtime_version: u16::from_le_bytes([data[6], data[7]]),
            metadata_rva: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            metadata_size: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            flags: u32::from_le_bytes([data[16], data[17], data[18], data[19]]),
            entry_point_token: u32::from_le_bytes([data[20], data[21], data[22], data[23]]),
        })
    }

    /// File offset of the `MetaData` directory RVA/size pair inside the COR20 header.
    #[must_use]
    pub fn metadata_directory_offset(&self) -> usize {
        self.offset + 8
    }

    /// File offset of the `EntryPointToken` field.
    #[must_use]
    pub fn entry_point_offset(&self) -> usize {
        self.offset + 20
    }
}

/// Round `value` up to the next multiple of `align` (which must be a power of two or
/// any non-zero alignment).
#[must_use]
pub fn align_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        return value;
    }

    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 0x200), 0);
        assert_eq!(align_up(1, 0x200), 0x200);
        assert_eq!(align_up(0x200, 0x200), 0x200);
        assert_eq!(align_up(0x201, 0x200), 0x400);
    }

    #[test]
    fn test_rva_to_offset() {
        let info = PeInfo {
            pe_pointer: 0x80,
            number_of_sections: 1,
            size_of_optional_header: 0xE0,
            optional_header_offset: 0x98,
            section_table_offset: 0x178,
            file_alignment: 0x200,
            section_alignment: 0x1000,
            size_of_image: 0x4000,
            size_of_headers: 0x200,
            clr_rva: 0x2000,
            clr_size: 72,
            sections: vec![SectionInfo {
                name: *b".text\0\0\0",
                virtual_size: 0x1800,
                virtual_address: 0x2000,
                size_of_raw_data: 0x1800,
                pointer_to_raw_data: 0x200,
                characteristics: 0x6000_0020,
            }],
        };

        assert_eq!(info.rva_to_offset(0x2000).unwrap(), 0x200);
        assert_eq!(info.rva_to_offset(0x2010).unwrap(), 0x210);
        assert!(info.rva_to_offset(0x1000).is_err());
        assert!(info.rva_to_offset(0x3800).is_err());
        assert_eq!(info.next_free_rva(), 0x4000);
    }
}
