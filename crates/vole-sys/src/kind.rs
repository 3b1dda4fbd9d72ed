use libc::c_int;

// ElemKind: element types understood by the engine
//
// Kinds cross the C ABI as integer codes. The numbering follows the scalar
// type enumeration of the native engine so that codes written by one side are
// read back unchanged by the other:
//
//   0 U8   1 I8   2 I16   3 I32   4 I64
//   5 F16  6 F32  7 F64  11 Bool  15 BF16
//
// Element values move between kinds through `Elem`, a tagged scalar that keeps
// integers exact and floats as f64.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ElemKind {
    U8,
    I8,
    I16,
    I32,
    I64,
    F16,
    F32,
    F64,
    Bool,
    BF16,
}

impl ElemKind {
    pub(crate) fn from_code(code: c_int) -> Result<Self, String> {
        match code {
            0 => Ok(ElemKind::U8),
            1 => Ok(ElemKind::I8),
            2 => Ok(ElemKind::I16),
            3 => Ok(ElemKind::I32),
            4 => Ok(ElemKind::I64),
            5 => Ok(ElemKind::F16),
            6 => Ok(ElemKind::F32),
            7 => Ok(ElemKind::F64),
            11 => Ok(ElemKind::Bool),
            15 => Ok(ElemKind::BF16),
            _ => Err(format!("unsupported scalar type code {code}")),
        }
    }

    pub(crate) fn code(self) -> c_int {
        match self {
            ElemKind::U8 => 0,
            ElemKind::I8 => 1,
            ElemKind::I16 => 2,
            ElemKind::I32 => 3,
            ElemKind::I64 => 4,
            ElemKind::F16 => 5,
            ElemKind::F32 => 6,
            ElemKind::F64 => 7,
            ElemKind::Bool => 11,
            ElemKind::BF16 => 15,
        }
    }

    /// Size of one element in bytes.
    pub(crate) fn size(self) -> usize {
        match self {
            ElemKind::U8 | ElemKind::I8 | ElemKind::Bool => 1,
            ElemKind::I16 | ElemKind::F16 | ElemKind::BF16 => 2,
            ElemKind::I32 | ElemKind::F32 => 4,
            ElemKind::I64 | ElemKind::F64 => 8,
        }
    }

    pub(crate) fn is_float(self) -> bool {
        matches!(
            self,
            ElemKind::F16 | ElemKind::F32 | ElemKind::F64 | ElemKind::BF16
        )
    }

    /// Tag used in the multi-tensor file header.
    pub(crate) fn tag(self) -> &'static str {
        match self {
            ElemKind::U8 => "U8",
            ElemKind::I8 => "I8",
            ElemKind::I16 => "I16",
            ElemKind::I32 => "I32",
            ElemKind::I64 => "I64",
            ElemKind::F16 => "F16",
            ElemKind::F32 => "F32",
            ElemKind::F64 => "F64",
            ElemKind::Bool => "BOOL",
            ElemKind::BF16 => "BF16",
        }
    }

    pub(crate) fn from_tag(tag: &str) -> Result<Self, String> {
        match tag {
            "U8" => Ok(ElemKind::U8),
            "I8" => Ok(ElemKind::I8),
            "I16" => Ok(ElemKind::I16),
            "I32" => Ok(ElemKind::I32),
            "I64" => Ok(ElemKind::I64),
            "F16" => Ok(ElemKind::F16),
            "F32" => Ok(ElemKind::F32),
            "F64" => Ok(ElemKind::F64),
            "BOOL" => Ok(ElemKind::Bool),
            "BF16" => Ok(ElemKind::BF16),
            _ => Err(format!("unknown dtype tag `{tag}`")),
        }
    }
}

/// One element, detached from its storage representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Elem {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Elem {
    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Elem::Int(v) => v as f64,
            Elem::Float(v) => v,
            Elem::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub(crate) fn as_i64(self) -> i64 {
        match self {
            Elem::Int(v) => v,
            Elem::Float(v) => v as i64,
            Elem::Bool(v) => v as i64,
        }
    }

    pub(crate) fn as_bool(self) -> bool {
        match self {
            Elem::Int(v) => v != 0,
            Elem::Float(v) => v != 0.0,
            Elem::Bool(v) => v,
        }
    }
}

/// Decode the element stored little-endian at the start of `bytes`.
pub(crate) fn read_elem(kind: ElemKind, bytes: &[u8]) -> Elem {
    match kind {
        ElemKind::U8 => Elem::Int(bytes[0] as i64),
        ElemKind::I8 => Elem::Int(bytes[0] as i8 as i64),
        ElemKind::I16 => Elem::Int(i16::from_le_bytes([bytes[0], bytes[1]]) as i64),
        ElemKind::I32 => Elem::Int(
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        ),
        ElemKind::I64 => Elem::Int(i64::from_le_bytes(first8(bytes))),
        ElemKind::F16 => Elem::Float(half::f16::from_le_bytes([bytes[0], bytes[1]]).to_f64()),
        ElemKind::BF16 => Elem::Float(half::bf16::from_le_bytes([bytes[0], bytes[1]]).to_f64()),
        ElemKind::F32 => Elem::Float(
            f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        ),
        ElemKind::F64 => Elem::Float(f64::from_le_bytes(first8(bytes))),
        ElemKind::Bool => Elem::Bool(bytes[0] != 0),
    }
}

/// Encode `value` as `kind` into the start of `bytes`. Floats written to
/// integer kinds truncate toward zero, as the native engine's casts do.
pub(crate) fn write_elem(kind: ElemKind, bytes: &mut [u8], value: Elem) {
    match kind {
        ElemKind::U8 => bytes[0] = value.as_i64() as u8,
        ElemKind::I8 => bytes[0] = value.as_i64() as i8 as u8,
        ElemKind::I16 => bytes[..2].copy_from_slice(&(value.as_i64() as i16).to_le_bytes()),
        ElemKind::I32 => bytes[..4].copy_from_slice(&(value.as_i64() as i32).to_le_bytes()),
        ElemKind::I64 => bytes[..8].copy_from_slice(&value.as_i64().to_le_bytes()),
        ElemKind::F16 => {
            bytes[..2].copy_from_slice(&half::f16::from_f64(value.as_f64()).to_le_bytes())
        }
        ElemKind::BF16 => {
            bytes[..2].copy_from_slice(&half::bf16::from_f64(value.as_f64()).to_le_bytes())
        }
        ElemKind::F32 => bytes[..4].copy_from_slice(&(value.as_f64() as f32).to_le_bytes()),
        ElemKind::F64 => bytes[..8].copy_from_slice(&value.as_f64().to_le_bytes()),
        ElemKind::Bool => bytes[0] = value.as_bool() as u8,
    }
}

fn first8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}
