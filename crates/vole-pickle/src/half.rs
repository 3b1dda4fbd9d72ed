use once_cell::sync::Lazy;

// Half-precision storage decoding
//
// Checkpoint storages hold raw little-endian element bytes. Half storages are
// widened on the host before they reach the engine, with the three-table
// method: the 6 high bits of a half (sign and exponent) select an exponent
// entry and an offset into the mantissa table, and the sum of the two entries
// is the f32 bit pattern.
//
//   f32_bits = MANTISSA[OFFSET[h >> 10] + (h & 0x3ff)] + EXPONENT[h >> 10]
//
// Subnormal halves are normalised by the first 1024 mantissa entries, normal
// ones use the last 1024. NaN payloads are carried over unchanged.

struct HalfTables {
    mantissa: [u32; 2048],
    exponent: [u32; 64],
    offset: [u16; 64],
}

fn convert_mantissa(i: u32) -> u32 {
    let mut m = i << 13;
    let mut e: u32 = 0;
    while m & 0x0080_0000 == 0 {
        e = e.wrapping_sub(0x0080_0000);
        m <<= 1;
    }
    m &= !0x0080_0000;
    e = e.wrapping_add(0x3880_0000);
    m | e
}

static TABLES: Lazy<Box<HalfTables>> = Lazy::new(|| {
    let mut t = Box::new(HalfTables {
        mantissa: [0; 2048],
        exponent: [0; 64],
        offset: [1024; 64],
    });
    for i in 1..1024 {
        t.mantissa[i] = convert_mantissa(i as u32);
    }
    for i in 1024..2048 {
        t.mantissa[i] = 0x3800_0000 + ((i as u32 - 1024) << 13);
    }
    for i in 1..31 {
        t.exponent[i] = (i as u32) << 23;
    }
    t.exponent[31] = 0x4780_0000;
    t.exponent[32] = 0x8000_0000;
    for i in 33..63 {
        t.exponent[i] = 0x8000_0000 + ((i as u32 - 32) << 23);
    }
    t.exponent[63] = 0xC780_0000;
    t.offset[0] = 0;
    t.offset[32] = 0;
    t
});

/// Widen one IEEE half to the bits of the equal f32.
pub fn f16_bits_to_f32_bits(h: u16) -> u32 {
    let t = &**TABLES;
    let hi = (h >> 10) as usize;
    t.mantissa[t.offset[hi] as usize + (h & 0x3ff) as usize].wrapping_add(t.exponent[hi])
}

pub fn f16_to_f32(h: u16) -> f32 {
    f32::from_bits(f16_bits_to_f32_bits(h))
}

/// bfloat16 is the high half of an f32.
pub fn bf16_to_f32(h: u16) -> f32 {
    f32::from_bits((h as u32) << 16)
}

/// Widen little-endian 16-bit elements to little-endian f32 bytes.
pub(crate) fn widen_le(bytes: &[u8], convert: fn(u16) -> f32) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    for pair in bytes.chunks_exact(2) {
        let v = convert(u16::from_le_bytes([pair[0], pair[1]]));
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}
