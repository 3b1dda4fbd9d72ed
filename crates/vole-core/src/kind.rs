use std::fmt;

use crate::error::{Error, Result};

// Kind: element types of engine tensors
//
// Every tensor has a Kind that fixes its element size and numeric behavior.
// Kinds cross the engine boundary as the engine's own scalar-type codes:
//
//   Uint8    0    unsigned byte, images and masks
//   Int8     1
//   Int16    2
//   Int      3    32-bit signed
//   Int64    4    indices and labels
//   Half     5    IEEE half float
//   Float    6    the default workhorse
//   Double   7
//   Bool    11
//   BFloat16 15   brain float

/// Enum of all element kinds the engine stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Uint8,
    Int8,
    Int16,
    Int,
    Int64,
    Half,
    Float,
    Double,
    Bool,
    BFloat16,
}

impl Kind {
    /// The engine's scalar-type code.
    pub fn c_int(self) -> i32 {
        match self {
            Kind::Uint8 => 0,
            Kind::Int8 => 1,
            Kind::Int16 => 2,
            Kind::Int => 3,
            Kind::Int64 => 4,
            Kind::Half => 5,
            Kind::Float => 6,
            Kind::Double => 7,
            Kind::Bool => 11,
            Kind::BFloat16 => 15,
        }
    }

    pub fn from_c_int(v: i32) -> Result<Kind> {
        match v {
            0 => Ok(Kind::Uint8),
            1 => Ok(Kind::Int8),
            2 => Ok(Kind::Int16),
            3 => Ok(Kind::Int),
            4 => Ok(Kind::Int64),
            5 => Ok(Kind::Half),
            6 => Ok(Kind::Float),
            7 => Ok(Kind::Double),
            11 => Ok(Kind::Bool),
            15 => Ok(Kind::BFloat16),
            _ => Err(Error::msg(format!("unknown scalar type code {v}"))),
        }
    }

    /// Size of one element in bytes.
    pub fn elt_size_in_bytes(self) -> usize {
        match self {
            Kind::Uint8 | Kind::Int8 | Kind::Bool => 1,
            Kind::Int16 | Kind::Half | Kind::BFloat16 => 2,
            Kind::Int | Kind::Float => 4,
            Kind::Int64 | Kind::Double => 8,
        }
    }

    /// Whether tensors of this kind can require gradients.
    pub fn is_float(self) -> bool {
        matches!(self, Kind::Half | Kind::Float | Kind::Double | Kind::BFloat16)
    }

    /// Whether tensors of this kind are accepted as gather indices.
    pub fn is_index(self) -> bool {
        matches!(self, Kind::Int8 | Kind::Int16 | Kind::Int | Kind::Int64)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Uint8 => "u8",
            Kind::Int8 => "i8",
            Kind::Int16 => "i16",
            Kind::Int => "i32",
            Kind::Int64 => "i64",
            Kind::Half => "f16",
            Kind::Float => "f32",
            Kind::Double => "f64",
            Kind::Bool => "bool",
            Kind::BFloat16 => "bf16",
        };
        write!(f, "{}", s)
    }
}

// Element: bridge between Rust scalar types and Kind
//
// Implemented for every Rust type that has a matching engine kind, so that
// generic code such as
//
//   fn from_slice<T: Element>(data: &[T]) -> Result<Tensor>
//
// picks the kind from T and moves the values as little-endian bytes.

/// Trait implemented by Rust types that can be stored in a tensor.
pub trait Element: Copy + Send + Sync + 'static + fmt::Debug {
    /// The corresponding engine kind.
    const KIND: Kind;

    /// Append the little-endian encoding of `self`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Decode from the first `KIND.elt_size_in_bytes()` bytes.
    fn read_le(bytes: &[u8]) -> Self;

    fn to_f64(self) -> f64;
}

macro_rules! numeric_element {
    ($t:ty, $kind:expr, $n:literal) => {
        impl Element for $t {
            const KIND: Kind = $kind;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $n];
                buf.copy_from_slice(&bytes[..$n]);
                <$t>::from_le_bytes(buf)
            }

            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

numeric_element!(u8, Kind::Uint8, 1);
numeric_element!(i8, Kind::Int8, 1);
numeric_element!(i16, Kind::Int16, 2);
numeric_element!(i32, Kind::Int, 4);
numeric_element!(i64, Kind::Int64, 8);
numeric_element!(f32, Kind::Float, 4);
numeric_element!(f64, Kind::Double, 8);

impl Element for half::f16 {
    const KIND: Kind = Kind::Half;
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn read_le(bytes: &[u8]) -> Self {
        half::f16::from_le_bytes([bytes[0], bytes[1]])
    }
    fn to_f64(self) -> f64 {
        self.to_f64()
    }
}

impl Element for half::bf16 {
    const KIND: Kind = Kind::BFloat16;
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn read_le(bytes: &[u8]) -> Self {
        half::bf16::from_le_bytes([bytes[0], bytes[1]])
    }
    fn to_f64(self) -> f64 {
        self.to_f64()
    }
}

impl Element for bool {
    const KIND: Kind = Kind::Bool;
    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }
    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip() {
        for kind in [
            Kind::Uint8,
            Kind::Int8,
            Kind::Int16,
            Kind::Int,
            Kind::Int64,
            Kind::Half,
            Kind::Float,
            Kind::Double,
            Kind::Bool,
            Kind::BFloat16,
        ] {
            assert_eq!(Kind::from_c_int(kind.c_int()).unwrap(), kind);
        }
        assert!(Kind::from_c_int(42).is_err());
    }

    #[test]
    fn test_element_bytes() {
        let mut buf = Vec::new();
        (-3i16).write_le(&mut buf);
        2.5f32.write_le(&mut buf);
        assert_eq!(buf.len(), 6);
        assert_eq!(i16::read_le(&buf[..2]), -3);
        assert_eq!(f32::read_le(&buf[2..]), 2.5);
        assert_eq!(<half::f16 as Element>::KIND.elt_size_in_bytes(), 2);
    }
}
