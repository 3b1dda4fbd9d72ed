use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use vole_core::{Error, Kind, Result, Tensor};

use crate::container::zip_error;

// NumPy .npy / .npz
//
// .npy layout:
//
//   \x93NUMPY  major  minor  header_len  header  data
//
// header_len is a u16 for version 1 and a u32 for versions 2 and 3. The
// header is a Python dict literal padded with spaces and ended by '\n' so
// that the data starts on a 64-byte boundary:
//
//   {'descr': '<f4', 'fortran_order': False, 'shape': (2, 3), }
//
// Data is little-endian, C order. An .npz file is a zip archive of .npy
// files; the entry name minus its ".npy" suffix names the array.

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_SUFFIX: &str = ".npy";

/// The structured part of an `.npy` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    pub descr: String,
    pub fortran_order: bool,
    pub shape: Vec<i64>,
}

fn header_error(msg: impl Into<String>) -> Error {
    Error::UnsupportedFormat(format!("npy header: {}", msg.into()))
}

/// Values that occur in an npy header dict.
#[derive(Debug)]
enum HeaderValue {
    Str(String),
    Bool(bool),
    Tuple(Vec<i64>),
}

struct HeaderParser<'s> {
    s: &'s [u8],
    pos: usize,
}

impl<'s> HeaderParser<'s> {
    fn skip_ws(&mut self) {
        while self.pos < self.s.len() && self.s[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.s.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        if self.peek() != Some(c) {
            return Err(header_error(format!("expected '{}'", c as char)));
        }
        self.pos += 1;
        Ok(())
    }

    /// Consume `c` if it is next.
    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn string(&mut self) -> Result<String> {
        let quote = match self.peek() {
            Some(q @ (b'\'' | b'"')) => q,
            _ => return Err(header_error("expected a quoted string")),
        };
        self.pos += 1;
        let start = self.pos;
        while self.pos < self.s.len() && self.s[self.pos] != quote {
            self.pos += 1;
        }
        if self.pos == self.s.len() {
            return Err(header_error("unterminated string"));
        }
        let out = String::from_utf8_lossy(&self.s[start..self.pos]).into_owned();
        self.pos += 1;
        Ok(out)
    }

    fn integer(&mut self) -> Result<i64> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.s.len() && self.s[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        // Python 2 era writers append L to longs.
        let digits = std::str::from_utf8(&self.s[start..self.pos]).unwrap_or("");
        let v = digits
            .parse::<i64>()
            .map_err(|_| header_error("expected a dimension"))?;
        self.eat(b'L');
        Ok(v)
    }

    fn value(&mut self) -> Result<HeaderValue> {
        match self.peek() {
            Some(b'\'' | b'"') => Ok(HeaderValue::Str(self.string()?)),
            Some(b'(') => {
                self.pos += 1;
                let mut dims = Vec::new();
                while !self.eat(b')') {
                    dims.push(self.integer()?);
                    if !self.eat(b',') {
                        self.expect(b')')?;
                        break;
                    }
                }
                Ok(HeaderValue::Tuple(dims))
            }
            _ => {
                let rest = &self.s[self.pos..];
                if rest.starts_with(b"True") {
                    self.pos += 4;
                    Ok(HeaderValue::Bool(true))
                } else if rest.starts_with(b"False") {
                    self.pos += 5;
                    Ok(HeaderValue::Bool(false))
                } else {
                    Err(header_error("unexpected value"))
                }
            }
        }
    }
}

impl NpyHeader {
    pub fn parse(header: &str) -> Result<NpyHeader> {
        let mut p = HeaderParser {
            s: header.as_bytes(),
            pos: 0,
        };
        let mut descr = None;
        let mut fortran_order = None;
        let mut shape = None;
        p.expect(b'{')?;
        while !p.eat(b'}') {
            let key = p.string()?;
            p.expect(b':')?;
            match (key.as_str(), p.value()?) {
                ("descr", HeaderValue::Str(s)) => descr = Some(s),
                ("fortran_order", HeaderValue::Bool(b)) => fortran_order = Some(b),
                ("shape", HeaderValue::Tuple(t)) => shape = Some(t),
                (k, v) => return Err(header_error(format!("unexpected entry {k}: {v:?}"))),
            }
            if !p.eat(b',') {
                p.expect(b'}')?;
                break;
            }
        }
        Ok(NpyHeader {
            descr: descr.ok_or_else(|| header_error("missing descr"))?,
            fortran_order: fortran_order.ok_or_else(|| header_error("missing fortran_order"))?,
            shape: shape.ok_or_else(|| header_error("missing shape"))?,
        })
    }

    pub fn kind(&self) -> Result<Kind> {
        let kind = match self.descr.as_str() {
            "|b1" => Kind::Bool,
            "|u1" | "<u1" => Kind::Uint8,
            "|i1" | "<i1" => Kind::Int8,
            "<i2" => Kind::Int16,
            "<i4" => Kind::Int,
            "<i8" => Kind::Int64,
            "<f2" => Kind::Half,
            "<f4" => Kind::Float,
            "<f8" => Kind::Double,
            d => return Err(header_error(format!("unsupported descr {d}"))),
        };
        Ok(kind)
    }

    pub fn for_tensor(kind: Kind, shape: Vec<i64>) -> Result<NpyHeader> {
        let descr = match kind {
            Kind::Bool => "|b1",
            Kind::Uint8 => "|u1",
            Kind::Int8 => "|i1",
            Kind::Int16 => "<i2",
            Kind::Int => "<i4",
            Kind::Int64 => "<i8",
            Kind::Half => "<f2",
            Kind::Float => "<f4",
            Kind::Double => "<f8",
            Kind::BFloat16 => {
                return Err(Error::UnsupportedFormat(
                    "npy has no bfloat16 element type".to_string(),
                ))
            }
        };
        Ok(NpyHeader {
            descr: descr.to_string(),
            fortran_order: false,
            shape,
        })
    }
}

impl fmt::Display for NpyHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fortran_order = if self.fortran_order { "True" } else { "False" };
        let shape = match self.shape.as_slice() {
            [d] => format!("({d},)"),
            dims => format!(
                "({})",
                dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
            ),
        };
        write!(
            f,
            "{{'descr': '{}', 'fortran_order': {fortran_order}, 'shape': {shape}, }}",
            self.descr
        )
    }
}

fn read_header<R: Read>(r: &mut R) -> Result<NpyHeader> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic[..6] != NPY_MAGIC {
        return Err(Error::UnsupportedFormat("not an npy file".to_string()));
    }
    let header_len = match magic[6] {
        1 => {
            let mut b = [0u8; 2];
            r.read_exact(&mut b)?;
            u16::from_le_bytes(b) as usize
        }
        2 | 3 => {
            let mut b = [0u8; 4];
            r.read_exact(&mut b)?;
            u32::from_le_bytes(b) as usize
        }
        v => return Err(Error::UnsupportedFormat(format!("npy version {v}"))),
    };
    let mut header = vec![0u8; header_len];
    r.read_exact(&mut header)?;
    let header = String::from_utf8(header).map_err(|_| header_error("not valid UTF-8"))?;
    NpyHeader::parse(&header)
}

/// Read one array from an `.npy` stream.
pub fn read_npy_from<R: Read>(r: &mut R) -> Result<Tensor> {
    let header = read_header(r)?;
    if header.fortran_order {
        return Err(Error::UnsupportedFormat(
            "fortran-ordered npy arrays".to_string(),
        ));
    }
    let kind = header.kind()?;
    let numel: i64 = header.shape.iter().product();
    let nbytes = numel as usize * kind.elt_size_in_bytes();
    let mut data = Vec::new();
    r.take(nbytes as u64).read_to_end(&mut data)?;
    if data.len() != nbytes {
        return Err(Error::UnsupportedFormat(format!(
            "npy data holds {} bytes, expected {nbytes}",
            data.len()
        )));
    }
    Tensor::from_data_size(&data, &header.shape, kind)
}

pub fn read_npy(path: impl AsRef<Path>) -> Result<Tensor> {
    let mut r = BufReader::new(File::open(path.as_ref())?);
    read_npy_from(&mut r)
}

/// Write one tensor as a version 1 `.npy` stream.
pub fn write_npy_to<W: Write>(w: &mut W, tensor: &Tensor) -> Result<()> {
    let header = NpyHeader::for_tensor(tensor.kind()?, tensor.size()?)?.to_string();
    // magic + version + u16 length + header + '\n', padded to 64 bytes
    let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    let header_len = header.len() + padding + 1;
    let header_len = u16::try_from(header_len)
        .map_err(|_| Error::UnsupportedFormat("npy header too long".to_string()))?;
    w.write_all(NPY_MAGIC)?;
    w.write_all(&[1, 0])?;
    w.write_all(&header_len.to_le_bytes())?;
    w.write_all(header.as_bytes())?;
    w.write_all(&vec![b' '; padding])?;
    w.write_all(b"\n")?;
    w.write_all(&tensor.to_bytes()?)?;
    Ok(())
}

pub fn write_npy(path: impl AsRef<Path>, tensor: &Tensor) -> Result<()> {
    let mut w = BufWriter::new(File::create(path.as_ref())?);
    write_npy_to(&mut w, tensor)?;
    w.flush()?;
    Ok(())
}

/// Read every array of an `.npz` archive, in archive order.
pub fn read_npz_from<R: Read + Seek>(r: R) -> Result<Vec<(String, Tensor)>> {
    let mut archive = zip::ZipArchive::new(r).map_err(zip_error)?;
    let mut out = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(zip_error)?;
        let name = file.name().to_string();
        let name = name.strip_suffix(NPY_SUFFIX).unwrap_or(&name).to_string();
        let tensor = read_npy_from(&mut file)?;
        out.push((name, tensor));
    }
    Ok(out)
}

pub fn read_npz(path: impl AsRef<Path>) -> Result<Vec<(String, Tensor)>> {
    read_npz_from(BufReader::new(File::open(path.as_ref())?))
}

/// Write named tensors as an uncompressed `.npz` archive.
pub fn write_npz<S: AsRef<str>, T: AsRef<Tensor>>(
    path: impl AsRef<Path>,
    tensors: &[(S, T)],
) -> Result<()> {
    let mut zip = zip::ZipWriter::new(File::create(path.as_ref())?);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, tensor) in tensors {
        zip.start_file(format!("{}{NPY_SUFFIX}", name.as_ref()), options)
            .map_err(zip_error)?;
        write_npy_to(&mut zip, tensor.as_ref())?;
    }
    zip.finish().map_err(zip_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_core::Device;

    #[test]
    fn test_header_parse_format_parse() {
        let text = "{'descr': '<f4', 'fortran_order': False, 'shape': (2, 3), }";
        let h = NpyHeader::parse(text).unwrap();
        assert_eq!(h.descr, "<f4");
        assert!(!h.fortran_order);
        assert_eq!(h.shape, vec![2, 3]);
        assert_eq!(NpyHeader::parse(&h.to_string()).unwrap(), h);
    }

    #[test]
    fn test_header_shapes() {
        for shape in [vec![], vec![5], vec![1, 2, 3]] {
            let h = NpyHeader::for_tensor(Kind::Int64, shape.clone()).unwrap();
            assert_eq!(NpyHeader::parse(&h.to_string()).unwrap().shape, shape);
        }
        let h = NpyHeader::parse("{\"shape\": (4L,), \"fortran_order\": True, \"descr\": \"|u1\"}")
            .unwrap();
        assert_eq!(h.shape, vec![4]);
        assert!(h.fortran_order);
        assert_eq!(h.kind().unwrap(), Kind::Uint8);
    }

    #[test]
    fn test_header_errors() {
        assert!(NpyHeader::parse("{'descr': '<f4'}").is_err());
        assert!(NpyHeader::parse("{'descr': '<f4', 'shape': (2,), 'x': 1}").is_err());
        let h = NpyHeader::parse("{'descr': '>f4', 'fortran_order': False, 'shape': ()}").unwrap();
        assert!(h.kind().is_err());
    }

    #[test]
    fn test_npy_roundtrip() {
        let t = Tensor::arange(0.0, 6.0, 1.0, (Kind::Float, Device::Cpu))
            .unwrap()
            .as_strided(&[2, 3], &[3, 1], 0)
            .unwrap();
        let mut buf = Vec::new();
        write_npy_to(&mut buf, &t).unwrap();
        assert_eq!(&buf[..6], NPY_MAGIC);
        let data_start = buf.len() - 24;
        assert_eq!(data_start % 64, 0);

        let back = read_npy_from(&mut &buf[..]).unwrap();
        assert_eq!(back.size().unwrap(), vec![2, 3]);
        assert_eq!(back.to_vec::<f32>().unwrap(), t.to_vec::<f32>().unwrap());
    }

    #[test]
    fn test_fortran_order_rejected() {
        let header = "{'descr': '<f4', 'fortran_order': True, 'shape': (1,), }";
        let mut buf = NPY_MAGIC.to_vec();
        buf.extend_from_slice(&[1, 0]);
        buf.extend_from_slice(&(header.len() as u16).to_le_bytes());
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&1.0f32.to_le_bytes());
        assert!(matches!(
            read_npy_from(&mut &buf[..]),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_npz_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arrays.npz");
        let a = Tensor::from_slice(&[1i64, 2, 3]).unwrap();
        let b = Tensor::from_slice(&[true, false]).unwrap();
        write_npz(&path, &[("a", &a), ("b", &b)]).unwrap();

        let back = read_npz(&path).unwrap();
        let names: Vec<_> = back.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(back[0].1.to_vec::<i64>().unwrap(), vec![1, 2, 3]);
        assert_eq!(back[1].1.to_vec::<bool>().unwrap(), vec![true, false]);
    }
}
