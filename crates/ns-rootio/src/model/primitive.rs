//! Fixed-width numeric leaf types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::error::Result;
use crate::model::Value;

/// A big-endian fixed-width value as streamed by ROOT.
///
/// Serializes to the Awkward primitive name (`"int32"`, `"float64"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    /// One byte, non-zero is `true`.
    Bool,
    /// `Char_t`
    Int8,
    /// `Short_t`
    Int16,
    /// `Int_t`
    Int32,
    /// `Long64_t`
    Int64,
    /// `UChar_t`
    Uint8,
    /// `UShort_t`
    Uint16,
    /// `UInt_t`
    Uint32,
    /// `ULong64_t`
    Uint64,
    /// `Float_t`
    Float32,
    /// `Double_t`
    Float64,
}

impl Primitive {
    /// Size in bytes of one element.
    pub fn byte_size(self) -> usize {
        match self {
            Primitive::Bool | Primitive::Int8 | Primitive::Uint8 => 1,
            Primitive::Int16 | Primitive::Uint16 => 2,
            Primitive::Int32 | Primitive::Uint32 | Primitive::Float32 => 4,
            Primitive::Int64 | Primitive::Uint64 | Primitive::Float64 => 8,
        }
    }

    /// Struct-style code used by `stream !X->` instructions.
    pub fn code(self) -> char {
        match self {
            Primitive::Bool => '?',
            Primitive::Int8 => 'b',
            Primitive::Int16 => 'h',
            Primitive::Int32 => 'i',
            Primitive::Int64 => 'q',
            Primitive::Uint8 => 'B',
            Primitive::Uint16 => 'H',
            Primitive::Uint32 => 'I',
            Primitive::Uint64 => 'Q',
            Primitive::Float32 => 'f',
            Primitive::Float64 => 'd',
        }
    }

    /// Element type name of an `output` declaration and of the form.
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Int8 => "int8",
            Primitive::Int16 => "int16",
            Primitive::Int32 => "int32",
            Primitive::Int64 => "int64",
            Primitive::Uint8 => "uint8",
            Primitive::Uint16 => "uint16",
            Primitive::Uint32 => "uint32",
            Primitive::Uint64 => "uint64",
            Primitive::Float32 => "float32",
            Primitive::Float64 => "float64",
        }
    }

    /// C++ spelling, as it appears in type signatures.
    pub fn cpp_name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Int8 => "char",
            Primitive::Int16 => "short",
            Primitive::Int32 => "int",
            Primitive::Int64 => "long long",
            Primitive::Uint8 => "unsigned char",
            Primitive::Uint16 => "unsigned short",
            Primitive::Uint32 => "unsigned int",
            Primitive::Uint64 => "unsigned long long",
            Primitive::Float32 => "float",
            Primitive::Float64 => "double",
        }
    }

    /// Read one value.
    pub fn read(self, cursor: &mut Cursor) -> Result<Value> {
        Ok(match self {
            Primitive::Bool => Value::Bool(cursor.read_bool()?),
            Primitive::Int8 => Value::Int(i64::from(cursor.read_i8()?)),
            Primitive::Int16 => Value::Int(i64::from(cursor.read_i16()?)),
            Primitive::Int32 => Value::Int(i64::from(cursor.read_i32()?)),
            Primitive::Int64 => Value::Int(cursor.read_i64()?),
            Primitive::Uint8 => Value::UInt(u64::from(cursor.read_u8()?)),
            Primitive::Uint16 => Value::UInt(u64::from(cursor.read_u16()?)),
            Primitive::Uint32 => Value::UInt(u64::from(cursor.read_u32()?)),
            Primitive::Uint64 => Value::UInt(cursor.read_u64()?),
            Primitive::Float32 => Value::Float(f64::from(cursor.read_f32()?)),
            Primitive::Float64 => Value::Float(cursor.read_f64()?),
        })
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
