//! Method signature blob parsing and encoding.
//!
//! Signature blobs (ECMA-335 II.23.2) describe calling convention, return type, and
//! parameter types. Copying a method signature from one assembly into another requires
//! decoding it, rewriting every embedded `TypeDefOrRef` token for the target assembly,
//! and encoding it back; [`TypeSig::map_tokens`] and [`MethodSig::map_tokens`] carry
//! that rewrite.

use crate::{
    file::parser::Parser,
    metadata::{token::Token, write_compressed_uint},
    Error::UnsupportedSignature,
    Result,
};

/// `HASTHIS` calling convention flag.
pub const SIG_HAS_THIS: u8 = 0x20;
/// `EXPLICITTHIS` calling convention flag.
pub const SIG_EXPLICIT_THIS: u8 = 0x40;
/// `GENERIC` calling convention.
pub const SIG_GENERIC: u8 = 0x10;
/// `VARARG` calling convention.
pub const SIG_VARARG: u8 = 0x05;

// ELEMENT_TYPE constants (ECMA-335 II.23.1.16), limited to what signatures use.
const ELEMENT_TYPE_VOID: u8 = 0x01;
const ELEMENT_TYPE_BOOLEAN: u8 = 0x02;
const ELEMENT_TYPE_CHAR: u8 = 0x03;
const ELEMENT_TYPE_I1: u8 = 0x04;
const ELEMENT_TYPE_U1: u8 = 0x05;
const ELEMENT_TYPE_I2: u8 = 0x06;
const ELEMENT_TYPE_U2: u8 = 0x07;
const ELEMENT_TYPE_I4: u8 = 0x08;
const ELEMENT_TYPE_U4: u8 = 0x09;
const ELEMENT_TYPE_I8: u8 = 0x0A;
const ELEMENT_TYPE_U8: u8 = 0x0B;
const ELEMENT_TYPE_R4: u8 = 0x0C;
const ELEMENT_TYPE_R8: u8 = 0x0D;
const ELEMENT_TYPE_STRING: u8 = 0x0E;
const ELEMENT_TYPE_PTR: u8 = 0x0F;
const ELEMENT_TYPE_BYREF: u8 = 0x10;
const ELEMENT_TYPE_VALUETYPE: u8 = 0x11;
const ELEMENT_TYPE_CLASS: u8 = 0x12;
const ELEMENT_TYPE_VAR: u8 = 0x13;
const ELEMENT_TYPE_ARRAY: u8 = 0x14;
const ELEMENT_TYPE_GENERICINST: u8 = 0x15;
const ELEMENT_TYPE_TYPEDBYREF: u8 = 0x16;
const ELEMENT_TYPE_I: u8 = 0x18;
const ELEMENT_TYPE_U: u8 = 0x19;
const ELEMENT_TYPE_FNPTR: u8 = 0x1B;
const ELEMENT_TYPE_OBJECT: u8 = 0x1C;
const ELEMENT_TYPE_SZARRAY: u8 = 0x1D;
const ELEMENT_TYPE_MVAR: u8 = 0x1E;
const ELEMENT_TYPE_CMOD_REQD: u8 = 0x1F;
const ELEMENT_TYPE_CMOD_OPT: u8 = 0x20;
const ELEMENT_TYPE_SENTINEL: u8 = 0x41;

/// A decoded type from a signature blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSig {
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    Object,
    /// `native int`
    IntPtr,
    /// `native unsigned int`
    UIntPtr,
    TypedByRef,
    /// Reference type named by a `TypeDefOrRef` token.
    Class(Token),
    /// Value type named by a `TypeDefOrRef` token.
    ValueType(Token),
    /// Single-dimensional zero-based array.
    SzArray(Box<TypeSig>),
    /// General array with explicit shape. Bounds are kept in their raw compressed
    /// form; they round-trip without interpretation.
    Array {
        element: Box<TypeSig>,
        rank: u32,
        sizes: Vec<u32>,
        lo_bounds: Vec<u32>,
    },
    ByRef(Box<TypeSig>),
    Ptr(Box<TypeSig>),
    /// Instantiated generic type.
    GenericInst {
        value_type: bool,
        definition: Token,
        arguments: Vec<TypeSig>,
    },
    /// Generic parameter of the enclosing type (`!n`).
    Var(u32),
    /// Generic parameter of the enclosing method (`!!n`).
    MVar(u32),
    /// Required custom modifier.
    ModReq(Token, Box<TypeSig>),
    /// Optional custom modifier.
    ModOpt(Token, Box<TypeSig>),
}

impl TypeSig {
    /// Parse one type from the current position of `parser`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedSignature`] for constructs the patcher does
    /// not copy across assemblies (function pointers, vararg sentinels), or
    /// [`crate::Error::Malformed`] for an unknown element type.
    pub fn parse(parser: &mut Parser<'_>) -> Result<TypeSig> {
        let element = parser.read_le::<u8>()?;

        let sig = match element {
            ELEMENT_TYPE_VOID => TypeSig::Void,
            ELEMENT_TYPE_BOOLEAN => TypeSig::Boolean,
            ELEMENT_TYPE_CHAR => TypeSig::Char,
            ELEMENT_TYPE_I1 => TypeSig::I1,
            ELEMENT_TYPE_U1 => TypeSig::U1,
            ELEMENT_TYPE_I2 => TypeSig::I2,
            ELEMENT_TYPE_U2 => TypeSig::U2,
            ELEMENT_TYPE_I4 => TypeSig::I4,
            ELEMENT_TYPE_U4 => TypeSig::U4,
            ELEMENT_TYPE_I8 => TypeSig::I8,
            ELEMENT_TYPE_U8 => TypeSig::U8,
            ELEMENT_TYPE_R4 => TypeSig::R4,
            ELEMENT_TYPE_R8 => TypeSig::R8,
            ELEMENT_TYPE_STRING => TypeSig::String,
            ELEMENT_TYPE_OBJECT => TypeSig::Object,
            ELEMENT_TYPE_I => TypeSig::IntPtr,
            ELEMENT_TYPE_U => TypeSig::UIntPtr,
            ELEMENT_TYPE_TYPEDBYREF => TypeSig::TypedByRef,
            ELEMENT_TYPE_CLASS => TypeSig::Class(parser.read_compressed_token()?),
            ELEMENT_TYPE_VALUETYPE => TypeSig::ValueType(parser.read_compressed_token()?),
            ELEMENT_TYPE_SZARRAY => TypeSig::SzArray(Box::new(TypeSig::parse(parser)?)),
            ELEMENT_TYPE_BYREF => TypeSig::ByRef(Box::new(TypeSig::parse(parser)?)),
            ELEMENT_TYPE_PTR => TypeSig::Ptr(Box::new(TypeSig::parse(parser)?)),
            ELEMENT_TYPE_VAR => TypeSig::Var(parser.read_compressed_uint()?),
            ELEMENT_TYPE_MVAR => TypeSig::MVar(parser.read_compressed_uint()?),
            ELEMENT_TYPE_CMOD_REQD => {
                let token = parser.read_compressed_token()?;
                TypeSig::ModReq(token, Box::new(TypeSig::parse(parser)?))
            }
            ELEMENT_TYPE_CMOD_OPT => {
                let token = parser.read_compressed_token()?;
                TypeSig::ModOpt(token, Box::new(TypeSig::parse(parser)?))
            }
            ELEMENT_TYPE_GENERICINST => {
                let kind = parser.read_le::<u8>()?;
                let value_type = match kind {
                    ELEMENT_TYPE_CLASS => false,
                    ELEMENT_TYPE_VALUETYPE => true,
                    _ => {
                        return Err(malformed_error!(
                            "Invalid GENERICINST kind byte - {:#x}",
                            kind
                        ))
                    }
                };
                let definition = parser.read_compressed_token()?;
                let count = parser.read_compressed_uint()?;
                let mut arguments = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    arguments.push(TypeSig::parse(parser)?);
                }
                TypeSig::GenericInst {
                    value_type,
                    definition,
                    arguments,
                }
            }
            ELEMENT_TYPE_ARRAY => {
                let element = Box::new(TypeSig::parse(parser)?);
                let rank = parser.read_compressed_uint()?;
                let size_count = parser.read_compressed_uint()?;
                let mut sizes = Vec::with_capacity(size_count as usize);
                for _ in 0..size_count {
                    sizes.push(parser.read_compressed_uint()?);
                }
                let bound_count = parser.read_compressed_uint()?;
                let mut lo_bounds = Vec::with_capacity(bound_count as usize);
                for _ in 0..bound_count {
                    lo_bounds.push(parser.read_compressed_uint()?);
                }
                TypeSig::Array {
                    element,
                    rank,
                    sizes,
                    lo_bounds,
                }
            }
            ELEMENT_TYPE_FNPTR => {
                return Err(UnsupportedSignature("function pointer".to_string()))
            }
            ELEMENT_TYPE_SENTINEL => {
                return Err(UnsupportedSignature("vararg sentinel".to_string()))
            }
            _ => {
                return Err(malformed_error!(
                    "Unknown element type in signature - {:#x}",
                    element
                ))
            }
        };

        Ok(sig)
    }

    /// Append the encoded form of this type to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            TypeSig::Void => out.push(ELEMENT_TYPE_VOID),
            TypeSig::Boolean => out.push(ELEMENT_TYPE_BOOLEAN),
            TypeSig::Char => out.push(ELEMENT_TYPE_CHAR),
            TypeSig::I1 => out.push(ELEMENT_TYPE_I1),
            TypeSig::U1 => out.push(ELEMENT_TYPE_U1),
            TypeSig::I2 => out.push(ELEMENT_TYPE_I2),
            TypeSig::U2 => out.push(ELEMENT_TYPE_U2),
            TypeSig::I4 => out.push(ELEMENT_TYPE_I4),
            TypeSig::U4 => out.push(ELEMENT_TYPE_U4),
            TypeSig::I8 => out.push(ELEMENT_TYPE_I8),
            TypeSig::U8 => out.push(ELEMENT_TYPE_U8),
            TypeSig::R4 => out.push(ELEMENT_TYPE_R4),
            TypeSig::R8 => out.push(ELEMENT_TYPE_R8),
            TypeSig::String => out.push(ELEMENT_TYPE_STRING),
            TypeSig::Object => out.push(ELEMENT_TYPE_OBJECT),
            TypeSig::IntPtr => out.push(ELEMENT_TYPE_I),
            TypeSig::UIntPtr => out.push(ELEMENT_TYPE_U),
            TypeSig::TypedByRef => out.push(ELEMENT_TYPE_TYPEDBYREF),
            TypeSig::Class(token) => {
                out.push(ELEMENT_TYPE_CLASS);
                write_compressed_token(out, *token);
            }
            TypeSig::ValueType(token) => {
                out.push(ELEMENT_TYPE_VALUETYPE);
                write_compressed_token(out, *token);
            }
            TypeSig::SzArray(element) => {
                out.push(ELEMENT_TYPE_SZARRAY);
                element.encode(out);
            }
            TypeSig::ByRef(inner) => {
                out.push(ELEMENT_TYPE_BYREF);
                inner.encode(out);
            }
            TypeSig::Ptr(inner) => {
                out.push(ELEMENT_TYPE_PTR);
                inner.encode(out);
            }
            TypeSig::Var(number) => {
                out.push(ELEMENT_TYPE_VAR);
                write_compressed_uint(out, *number);
            }
            TypeSig::MVar(number) => {
                out.push(ELEMENT_TYPE_MVAR);
                write_compressed_uint(out, *number);
            }
            TypeSig::ModReq(token, inner) => {
                out.push(ELEMENT_TYPE_CMOD_REQD);
                write_compressed_token(out, *token);
                inner.encode(out);
            }
            TypeSig::ModOpt(token, inner) => {
                out.push(ELEMENT_TYPE_CMOD_OPT);
                write_compressed_token(out, *token);
                inner.encode(out);
            }
            TypeSig::GenericInst {
                value_type,
                definition,
                arguments,
            } => {
                out.push(ELEMENT_TYPE_GENERICINST);
                out.push(if *value_type {
                    ELEMENT_TYPE_VALUETYPE
                } else {
                    ELEMENT_TYPE_CLASS
                });
                write_compressed_token(out, *definition);
                write_compressed_uint(out, u32::try_from(arguments.len()).unwrap_or(0));
                for argument in arguments {
                    argument.encode(out);
                }
            }
            TypeSig::Array {
                element,
                rank,
                sizes,
                lo_bounds,
            } => {
                out.push(ELEMENT_TYPE_ARRAY);
                element.encode(out);
                write_compressed_uint(out, *rank);
                write_compressed_uint(out, u32::try_from(sizes.len()).unwrap_or(0));
                for size in sizes {
                    write_compressed_uint(out, *size);
                }
                write_compressed_uint(out, u32::try_from(lo_bounds.len()).unwrap_or(0));
                for bound in lo_bounds {
                    write_compressed_uint(out, *bound);
                }
            }
        }
    }

    /// Rebuild this type with every embedded `TypeDefOrRef` token passed through `f`.
    ///
    /// # Errors
    /// Propagates errors from `f`.
    pub fn map_tokens<F>(&self, f: &mut F) -> Result<TypeSig>
    where
        F: FnMut(Token) -> Result<Token>,
    {
        let mapped = match self {
            TypeSig::Class(token) => TypeSig::Class(f(*token)?),
            TypeSig::ValueType(token) => TypeSig::ValueType(f(*token)?),
            TypeSig::SzArray(element) => TypeSig::SzArray(Box::new(element.map_tokens(f)?)),
            TypeSig::ByRef(inner) => TypeSig::ByRef(Box::new(inner.map_tokens(f)?)),
            TypeSig::Ptr(inner) => TypeSig::Ptr(Box::new(inner.map_tokens(f)?)),
            TypeSig::ModReq(token, inner) => {
                TypeSig::ModReq(f(*token)?, Box::new(inner.map_tokens(f)?))
            }
            TypeSig::ModOpt(token, inner) => {
                TypeSig::ModOpt(f(*token)?, Box::new(inner.map_tokens(f)?))
            }
            TypeSig::GenericInst {
                value_type,
                definition,
                arguments,
            } => {
                let mut mapped_arguments = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    mapped_arguments.push(argument.map_tokens(f)?);
                }
                TypeSig::GenericInst {
                    value_type: *value_type,
                    definition: f(*definition)?,
                    arguments: mapped_arguments,
                }
            }
            TypeSig::Array {
                element,
                rank,
                sizes,
                lo_bounds,
            } => TypeSig::Array {
                element: Box::new(element.map_tokens(f)?),
                rank: *rank,
                sizes: sizes.clone(),
                lo_bounds: lo_bounds.clone(),
            },
            // A generic variable is only meaningful inside its declaring generic
            // context, which does not travel with the signature.
            TypeSig::Var(_) | TypeSig::MVar(_) => {
                return Err(UnsupportedSignature("generic variable".to_string()))
            }
            other => other.clone(),
        };

        Ok(mapped)
    }
}

/// A decoded `MethodDefSig` / `MethodRefSig` blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSig {
    pub has_this: bool,
    pub explicit_this: bool,
    /// Calling convention byte with `HASTHIS`/`EXPLICITTHIS` stripped; the `GENERIC`
    /// bit stays in place.
    pub calling_convention: u8,
    /// Generic parameter count when the `GENERIC` convention is set.
    pub generic_param_count: u32,
    pub return_type: TypeSig,
    pub params: Vec<TypeSig>,
}

impl MethodSig {
    /// Parse a method signature blob.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for truncated or invalid blobs and
    /// [`crate::Error::UnsupportedSignature`] for constructs this crate does not copy.
    pub fn parse(blob: &[u8]) -> Result<MethodSig> {
        let mut parser = Parser::new(blob);

        let convention = parser.read_le::<u8>()?;
        let has_this = convention & SIG_HAS_THIS != 0;
        let explicit_this = convention & SIG_EXPLICIT_THIS != 0;
        let calling_convention = convention & !(SIG_HAS_THIS | SIG_EXPLICIT_THIS);

        let generic_param_count = if calling_convention & SIG_GENERIC != 0 {
            parser.read_compressed_uint()?
        } else {
            0
        };

        let param_count = parser.read_compressed_uint()?;
        let return_type = TypeSig::parse(&mut parser)?;

        let mut params = Vec::with_capacity(param_count as usize);
        for _ in 0..param_count {
            params.push(TypeSig::parse(&mut parser)?);
        }

        Ok(MethodSig {
            has_this,
            explicit_this,
            calling_convention,
            generic_param_count,
            return_type,
            params,
        })
    }

    /// Encode this signature as a blob.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.params.len() * 2);

        let mut convention = self.calling_convention;
        if self.has_this {
            convention |= SIG_HAS_THIS;
        }
        if self.explicit_this {
            convention |= SIG_EXPLICIT_THIS;
        }
        out.push(convention);

        if self.calling_convention & SIG_GENERIC != 0 {
            write_compressed_uint(&mut out, self.generic_param_count);
        }

        write_compressed_uint(&mut out, u32::try_from(self.params.len()).unwrap_or(0));
        self.return_type.encode(&mut out);
        for param in &self.params {
            param.encode(&mut out);
        }

        out
    }

    /// Rebuild this signature with every embedded token passed through `f`.
    ///
    /// # Errors
    /// Propagates errors from `f`.
    pub fn map_tokens<F>(&self, f: &mut F) -> Result<MethodSig>
    where
        F: FnMut(Token) -> Result<Token>,
    {
        let mut params = Vec::with_capacity(self.params.len());
        for param in &self.params {
            params.push(param.map_tokens(f)?);
        }

        Ok(MethodSig {
            has_this: self.has_this,
            explicit_this: self.explicit_this,
            calling_convention: self.calling_convention,
            generic_param_count: self.generic_param_count,
            return_type: self.return_type.map_tokens(f)?,
            params,
        })
    }
}

/// Append a compressed `TypeDefOrRef` token (ECMA-335 II.23.2.8) to `out`.
fn write_compressed_token(out: &mut Vec<u8>, token: Token) {
    let tag = match token.table() {
        0x02 => 0, // TypeDef
        0x01 => 1, // TypeRef
        _ => 2,    // TypeSpec
    };

    write_compressed_uint(out, (token.row() << 2) | tag);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_instance_void_no_params() {
        // HASTHIS, 0 params, void
        let blob = [0x20, 0x00, 0x01];
        let sig = MethodSig::parse(&blob).unwrap();

        assert!(sig.has_this);
        assert_eq!(sig.calling_convention, 0);
        assert_eq!(sig.return_type, TypeSig::Void);
        assert!(sig.params.is_empty());
        assert_eq!(sig.encode(), blob);
    }

    #[test]
    fn parse_instance_with_class_param() {
        // HASTHIS, 2 params, void, int32, class TypeRef row 3
        let blob = [0x20, 0x02, 0x01, 0x08, 0x12, 0x0D];
        let sig = MethodSig::parse(&blob).unwrap();

        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.params[0], TypeSig::I4);
        assert_eq!(sig.params[1], TypeSig::Class(Token::new(0x0100_0003)));
        assert_eq!(sig.encode(), blob);
    }

    #[test]
    fn parse_szarray_and_generic_inst() {
        // HASTHIS, 1 param, void, List<int32> (TypeRef row 1)
        let blob = [0x20, 0x01, 0x01, 0x15, 0x12, 0x05, 0x01, 0x08];
        let sig = MethodSig::parse(&blob).unwrap();

        match &sig.params[0] {
            TypeSig::GenericInst {
                value_type,
                definition,
                arguments,
            } => {
                assert!(!value_type);
                assert_eq!(*definition, Token::new(0x0100_0001));
                assert_eq!(arguments, &vec![TypeSig::I4]);
            }
            other => panic!("unexpected param: {:?}", other),
        }
        assert_eq!(sig.encode(), blob);

        // byte[]
        let array_blob = [0x20, 0x01, 0x01, 0x1D, 0x05];
        let array_sig = MethodSig::parse(&array_blob).unwrap();
        assert_eq!(
            array_sig.params[0],
            TypeSig::SzArray(Box::new(TypeSig::U1))
        );
        assert_eq!(array_sig.encode(), array_blob);
    }

    #[test]
    fn map_tokens_rewrites_nested_references() {
        let blob = [0x20, 0x01, 0x01, 0x1D, 0x12, 0x05];
        let sig = MethodSig::parse(&blob).unwrap();

        let mapped = sig
            .map_tokens(&mut |token| {
                assert_eq!(token, Token::new(0x0100_0001));
                Ok(Token::new(0x0100_0009))
            })
            .unwrap();

        assert_eq!(
            mapped.params[0],
            TypeSig::SzArray(Box::new(TypeSig::Class(Token::new(0x0100_0009))))
        );
    }

    #[test]
    fn function_pointers_rejected() {
        let blob = [0x20, 0x01, 0x01, 0x1B];
        assert!(matches!(
            MethodSig::parse(&blob),
            Err(crate::Error::UnsupportedSignature(_))
        ));
    }

    #[test]
    fn generic_variables_do_not_cross_assemblies() {
        // HASTHIS, 1 param, void, !!0
        let blob = [0x20, 0x01, 0x01, 0x1E, 0x00];
        let sig = MethodSig::parse(&blob).unwrap();

        assert!(matches!(
            sig.map_tokens(&mut |token| Ok(token)),
            Err(crate::Error::UnsupportedSignature(_))
        ));
    }

    #[test]
    fn generic_method_sig_keeps_count() {
        // GENERIC, 1 generic param, 1 param, void, !!0
        let blob = [0x30, 0x01, 0x01, 0x01, 0x1E, 0x00];
        let sig = MethodSig::parse(&blob).unwrap();
        assert_eq!(sig.generic_param_count, 1);
        assert_eq!(sig.params[0], TypeSig::MVar(0));
        assert_eq!(sig.encode(), blob);
    }
}
