//! CIL method body parsing, token patching, and synthesis.
//!
//! Inserting rows into the `MethodDef` table renumbers methods, so every inline
//! `MethodDef` token inside existing IL streams has to be rewritten. The walker here
//! decodes just enough of each instruction (its operand size) to find those tokens
//! without disturbing anything else, leaving body sizes unchanged.

use std::collections::HashMap;

use crate::{
    file::io::{read_le_at, write_le_at},
    metadata::{tables::TableId, token::Token},
    Result,
};

/// Tiny body format flag (low 2 bits of the first header byte).
pub const BODY_FORMAT_TINY: u8 = 0x2;
/// Fat body format flag.
pub const BODY_FORMAT_FAT: u8 = 0x3;
/// Fat header flag indicating extra data sections follow the code.
pub const BODY_FLAG_MORE_SECTS: u16 = 0x8;

/// Decoded method body header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodBody {
    /// Bytes occupied by the header itself.
    pub header_size: u32,
    /// Bytes of IL code following the header.
    pub code_size: u32,
    pub max_stack: u16,
    /// `StandAloneSig` token for locals, 0 when none.
    pub local_var_sig: u32,
    pub more_sections: bool,
}

impl MethodBody {
    /// Parse a body header at `offset` within `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for truncated headers or an unknown format,
    /// and [`crate::Error::OutOfBounds`] when the declared code overruns `data`.
    pub fn parse(data: &[u8], offset: usize) -> Result<MethodBody> {
        let first = *data
            .get(offset)
            .ok_or_else(|| malformed_error!("Method body offset out of range - {}", offset))?;

        let body = match first & 0x3 {
            BODY_FORMAT_TINY => MethodBody {
                header_size: 1,
                code_size: u32::from(first >> 2),
                max_stack: 8,
                local_var_sig: 0,
                more_sections: false,
            },
            BODY_FORMAT_FAT => {
                let flags_and_size = read_le_at::<u16>(data, &mut { offset })?;
                let header_size = u32::from(flags_and_size >> 12) * 4;
                if header_size < 12 {
                    return Err(malformed_error!(
                        "Fat method header declares size {} dwords",
                        flags_and_size >> 12
                    ));
                }

                MethodBody {
                    header_size,
                    code_size: read_le_at::<u32>(data, &mut (offset + 4))?,
                    max_stack: read_le_at::<u16>(data, &mut (offset + 2))?,
                    local_var_sig: read_le_at::<u32>(data, &mut (offset + 8))?,
                    more_sections: flags_and_size & BODY_FLAG_MORE_SECTS != 0,
                }
            }
            other => {
                return Err(malformed_error!(
                    "Unknown method body format - {:#x}",
                    other
                ))
            }
        };

        let end = offset
            .checked_add((body.header_size + body.code_size) as usize)
            .ok_or(crate::Error::OutOfBounds)?;
        if end > data.len() {
            return Err(crate::Error::OutOfBounds);
        }

        Ok(body)
    }

    /// Total size of header plus code, excluding trailing data sections.
    #[must_use]
    pub fn total_size(&self) -> u32 {
        self.header_size + self.code_size
    }
}

/// Operand shape of a decoded opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand {
    None,
    Byte,
    Word,
    Dword,
    Qword,
    /// Metadata token, subject to rewriting.
    InlineToken,
    /// `switch`: a dword count followed by that many dword targets.
    Switch,
}

fn operand_shape(op: u8) -> Result<Operand> {
    let shape = match op {
        // nop/break, ldarg.0-3, ldloc.0-3, stloc.0-3
        0x00..=0x0D => Operand::None,
        // short-form variable access
        0x0E..=0x13 => Operand::Byte,
        // ldnull, ldc.i4.m1 through ldc.i4.8
        0x14..=0x1E => Operand::None,
        0x1F => Operand::Byte,  // ldc.i4.s
        0x20 => Operand::Dword, // ldc.i4
        0x21 => Operand::Qword, // ldc.i8
        0x22 => Operand::Dword, // ldc.r4
        0x23 => Operand::Qword, // ldc.r8
        0x25 | 0x26 => Operand::None, // dup, pop
        0x27..=0x29 => Operand::InlineToken, // jmp, call, calli
        0x2A => Operand::None,  // ret
        // short branches
        0x2B..=0x37 => Operand::Byte,
        // long branches
        0x38..=0x44 => Operand::Dword,
        0x45 => Operand::Switch,
        // ldind/stind, arithmetic, conversions
        0x46..=0x6E => Operand::None,
        0x6F..=0x75 => Operand::InlineToken, // callvirt..isinst
        0x76 => Operand::None,               // conv.r.un
        0x79 => Operand::InlineToken,        // unbox
        0x7A => Operand::None,               // throw
        0x7B..=0x81 => Operand::InlineToken, // ldfld..stobj
        0x82..=0x8B => Operand::None,        // conv.ovf.*.un
        0x8C | 0x8D => Operand::InlineToken, // box, newarr
        0x8E => Operand::None,               // ldlen
        0x8F => Operand::InlineToken,        // ldelema
        0x90..=0xA2 => Operand::None,        // ldelem.*, stelem.*
        0xA3..=0xA5 => Operand::InlineToken, // ldelem, stelem, unbox.any
        0xB3..=0xBA => Operand::None,        // conv.ovf.*
        0xC2 => Operand::InlineToken,        // refanyval
        0xC3 => Operand::None,               // ckfinite
        0xC6 => Operand::InlineToken,        // mkrefany
        0xD0 => Operand::InlineToken,        // ldtoken
        0xD1..=0xDC => Operand::None,        // conversions, overflow arithmetic, endfinally
        0xDD => Operand::Dword,              // leave
        0xDE => Operand::Byte,               // leave.s
        0xDF | 0xE0 => Operand::None,        // stind.i, conv.u
        _ => return Err(malformed_error!("Unknown IL opcode - {:#x}", op)),
    };

    Ok(shape)
}

fn operand_shape_fe(op: u8) -> Result<Operand> {
    let shape = match op {
        0x00..=0x05 => Operand::None, // arglist, ceq..clt.un
        0x06 | 0x07 => Operand::InlineToken, // ldftn, ldvirtftn
        0x09..=0x0E => Operand::Word, // long-form variable access
        0x0F => Operand::None,        // localloc
        0x11 => Operand::None,        // endfilter
        0x12 => Operand::Byte,        // unaligned.
        0x13 | 0x14 => Operand::None, // volatile., tail.
        0x15 | 0x16 => Operand::InlineToken, // initobj, constrained.
        0x17 | 0x18 => Operand::None, // cpblk, initblk
        0x19 => Operand::Byte,        // no.
        0x1A => Operand::None,        // rethrow
        0x1C => Operand::InlineToken, // sizeof
        0x1D | 0x1E => Operand::None, // refanytype, readonly.
        _ => return Err(malformed_error!("Unknown IL opcode - 0xFE {:#x}", op)),
    };

    Ok(shape)
}

/// Rewrite every inline `MethodDef` token in `code` through `rid_map`.
///
/// Tokens referring to other tables and rids absent from the map pass through
/// untouched. Returns the number of tokens rewritten.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on an undecodable instruction stream.
pub fn patch_methoddef_tokens(code: &mut [u8], rid_map: &HashMap<u32, u32>) -> Result<usize> {
    let mut pos = 0;
    let mut patched = 0;

    while pos < code.len() {
        let op = code[pos];
        pos += 1;

        let shape = if op == 0xFE {
            let second = *code
                .get(pos)
                .ok_or_else(|| malformed_error!("Truncated two-byte opcode at {}", pos - 1))?;
            pos += 1;
            operand_shape_fe(second)?
        } else {
            operand_shape(op)?
        };

        match shape {
            Operand::None => {}
            Operand::Byte => pos += 1,
            Operand::Word => pos += 2,
            Operand::Dword => pos += 4,
            Operand::Qword => pos += 8,
            Operand::Switch => {
                let count = read_le_at::<u32>(code, &mut { pos })? as usize;
                pos += 4 + count * 4;
            }
            Operand::InlineToken => {
                let token = Token::new(read_le_at::<u32>(code, &mut { pos })?);
                if token.table() == TableId::MethodDef as u8 {
                    if let Some(new_rid) = rid_map.get(&token.row()) {
                        let new_token = Token::from_parts(TableId::MethodDef, *new_rid);
                        write_le_at::<u32>(code, &mut { pos }, new_token.value())?;
                        patched += 1;
                    }
                }
                pos += 4;
            }
        }
    }

    if pos != code.len() {
        return Err(malformed_error!(
            "Instruction stream overran code size at {}",
            pos
        ));
    }

    Ok(patched)
}

/// Build a pass-through body: load `this` and every parameter, call `target`, return.
///
/// Uses the tiny format when it fits, the fat format otherwise. Fat bodies must be
/// placed on a 4-byte boundary by the caller.
///
/// # Errors
/// Returns [`crate::Error::NotSupported`] for more than 255 parameters, which the
/// short-form `ldarg.s` cannot express.
pub fn build_passthrough_body(target: Token, param_count: u32) -> Result<Vec<u8>> {
    if param_count > 255 {
        return Err(crate::Error::NotSupported);
    }

    let mut code = Vec::with_capacity(8 + param_count as usize * 2);
    code.push(0x02); // ldarg.0
    for i in 1..=param_count {
        match i {
            1..=3 => code.push(0x02 + i as u8), // ldarg.1-3
            _ => {
                code.push(0x0E); // ldarg.s
                code.push(i as u8);
            }
        }
    }
    code.push(0x28); // call
    code.extend_from_slice(&target.value().to_le_bytes());
    code.push(0x2A); // ret

    let max_stack = 1 + param_count;
    let mut body = Vec::with_capacity(code.len() + 12);
    if code.len() < 64 && max_stack <= 8 {
        body.push(((code.len() as u8) << 2) | BODY_FORMAT_TINY);
    } else {
        // Fat header: format 0x3, header size 3 dwords, no locals, no extra sections.
        body.extend_from_slice(&0x3003u16.to_le_bytes());
        body.extend_from_slice(&(max_stack as u16).to_le_bytes());
        body.extend_from_slice(&(code.len() as u32).to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
    }
    body.extend_from_slice(&code);

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tiny_body() {
        // 3 bytes of code: ldarg.0, ldarg.1, ret
        let data = [0x03 << 2 | 0x2, 0x02, 0x03, 0x2A];
        let body = MethodBody::parse(&data, 0).unwrap();

        assert_eq!(body.header_size, 1);
        assert_eq!(body.code_size, 3);
        assert_eq!(body.max_stack, 8);
        assert!(!body.more_sections);
    }

    #[test]
    fn parse_fat_body() {
        let mut data = vec![0u8; 16];
        data[0..2].copy_from_slice(&0x3003u16.to_le_bytes());
        data[2..4].copy_from_slice(&4u16.to_le_bytes());
        data[4..8].copy_from_slice(&4u32.to_le_bytes());
        data[8..12].copy_from_slice(&0x1100_0001u32.to_le_bytes());

        let body = MethodBody::parse(&data, 0).unwrap();
        assert_eq!(body.header_size, 12);
        assert_eq!(body.code_size, 4);
        assert_eq!(body.max_stack, 4);
        assert_eq!(body.local_var_sig, 0x1100_0001);
    }

    #[test]
    fn truncated_body_rejected() {
        // Tiny header declares 10 bytes of code, only 2 present.
        let data = [0x0A << 2 | 0x2, 0x00, 0x00];
        assert!(MethodBody::parse(&data, 0).is_err());
    }

    #[test]
    fn patch_rewrites_only_mapped_methoddef_tokens() {
        let mut code = Vec::new();
        code.push(0x02); // ldarg.0
        code.push(0x28); // call MethodDef rid 2
        code.extend_from_slice(&0x0600_0002u32.to_le_bytes());
        code.push(0x28); // call MethodDef rid 7 (unmapped)
        code.extend_from_slice(&0x0600_0007u32.to_le_bytes());
        code.push(0x6F); // callvirt MemberRef rid 2 (different table)
        code.extend_from_slice(&0x0A00_0002u32.to_le_bytes());
        code.push(0x2A); // ret

        let map = HashMap::from([(2u32, 5u32)]);
        let patched = patch_methoddef_tokens(&mut code, &map).unwrap();

        assert_eq!(patched, 1);
        assert_eq!(&code[2..6], &0x0600_0005u32.to_le_bytes());
        assert_eq!(&code[7..11], &0x0600_0007u32.to_le_bytes());
        assert_eq!(&code[12..16], &0x0A00_0002u32.to_le_bytes());
    }

    #[test]
    fn patch_walks_switch_and_prefixed_opcodes() {
        let mut code = Vec::new();
        code.push(0x45); // switch, 2 targets
        code.extend_from_slice(&2u32.to_le_bytes());
        code.extend_from_slice(&0u32.to_le_bytes());
        code.extend_from_slice(&0u32.to_le_bytes());
        code.push(0xFE); // constrained. TypeRef rid 1
        code.push(0x16);
        code.extend_from_slice(&0x0100_0001u32.to_le_bytes());
        code.push(0x28); // call MethodDef rid 1
        code.extend_from_slice(&0x0600_0001u32.to_le_bytes());
        code.push(0x2A);

        let map = HashMap::from([(1u32, 9u32)]);
        assert_eq!(patch_methoddef_tokens(&mut code, &map).unwrap(), 1);

        let token_at = code.len() - 5;
        assert_eq!(&code[token_at..token_at + 4], &0x0600_0009u32.to_le_bytes());
    }

    #[test]
    fn unknown_opcode_rejected() {
        let mut code = vec![0xF0];
        assert!(patch_methoddef_tokens(&mut code, &HashMap::new()).is_err());
    }

    #[test]
    fn passthrough_body_tiny_form() {
        let body = build_passthrough_body(Token::new(0x0A00_0003), 2).unwrap();

        // ldarg.0, ldarg.1, ldarg.2, call, ret
        assert_eq!(body[0] & 0x3, BODY_FORMAT_TINY);
        assert_eq!(body[0] >> 2, 9);
        assert_eq!(&body[1..4], &[0x02, 0x03, 0x04]);
        assert_eq!(body[4], 0x28);
        assert_eq!(&body[5..9], &0x0A00_0003u32.to_le_bytes());
        assert_eq!(body[9], 0x2A);
    }

    #[test]
    fn passthrough_body_fat_form_for_deep_stack() {
        // 9 parameters pushes max_stack to 10 which the tiny form cannot hold.
        let body = build_passthrough_body(Token::new(0x0600_0001), 9).unwrap();

        let parsed = MethodBody::parse(&body, 0).unwrap();
        assert_eq!(parsed.header_size, 12);
        assert_eq!(parsed.max_stack, 10);
        assert_eq!(parsed.local_var_sig, 0);
        // ldarg.s used beyond the third parameter
        assert_eq!(body[12 + 4], 0x0E);
        assert_eq!(body[12 + 5], 4);
    }
}
