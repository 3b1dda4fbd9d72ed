use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use num_bigint::BigInt;
use vole_core::{Device, Error, Kind, Result, Tensor};
use zip::ZipArchive;

use crate::half::{bf16_to_f32, f16_to_f32, widen_le};
use crate::persistent::{LegacyStorageLoader, ZipStorageLoader};
use crate::unpickler::Unpickler;
use crate::value::{Dict, StorageTensor, Value};

// Checkpoint containers
//
// Two layouts are read:
//
//   zip      <prefix>data.pkl        the pickle
//            <prefix>data/<key>      one record per storage
//            <prefix>constants.pkl   only in script-compiled modules: refused
//
//   legacy   [tar wrapper whose first regular file holds the rest]
//            pickle  magic number 0x1950a86a20f9469cfc6c
//            pickle  protocol version 1001
//            pickle  sys info (ignored)
//            pickle  the object, storages as persistent ids
//            pickle  list of storage keys
//            per key: u64 LE element count, then the element bytes
//
// Decoding yields the root Value with every storage filled. The tensor pass
// then walks the root dictionary (nested dictionaries give dotted names) and
// turns each reconstructed tensor into an engine tensor:
//
//   storage bytes -> 1-D base tensor -> as_strided(shape, stride, offset)
//                 -> to_kind(storage kind) -> to_device -> requires_grad
//
// Half and bfloat16 storages are widened to f32 for the base tensor and cast
// back by the to_kind step.

const LEGACY_MAGIC: u128 = 0x1950a86a20f9469cfc6c;
const LEGACY_PROTOCOL: i64 = 1001;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";

pub(crate) fn zip_error(e: zip::result::ZipError) -> Error {
    match e {
        zip::result::ZipError::Io(e) => Error::Io(e),
        e => Error::UnsupportedFormat(e.to_string()),
    }
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn read_zip<R: Read + Seek>(reader: R) -> Result<Value> {
    let mut archive = ZipArchive::new(reader).map_err(zip_error)?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    if let Some(name) = names.iter().find(|n| basename(n) == "constants.pkl") {
        return Err(Error::UnsupportedFormat(format!(
            "{name}: script-compiled modules cannot be read as a checkpoint"
        )));
    }
    let data_pkl = names
        .iter()
        .find(|n| basename(n) == "data.pkl")
        .ok_or_else(|| Error::UnsupportedFormat("zip archive has no data.pkl".to_string()))?;
    let prefix = &data_pkl[..data_pkl.len() - "data.pkl".len()];

    let mut pickle = Vec::new();
    archive
        .by_name(data_pkl)
        .map_err(zip_error)?
        .read_to_end(&mut pickle)?;
    let loader = ZipStorageLoader::new(&mut archive, prefix);
    let root = Unpickler::new(&pickle[..])
        .with_persistent_loader(loader)
        .load()?;
    Ok(root)
}

fn read_legacy<R: Read>(reader: &mut R) -> Result<Value> {
    match Unpickler::new(&mut *reader).load() {
        Ok(Value::BigInt(m)) if m == BigInt::from(LEGACY_MAGIC) => {}
        _ => return Err(Error::BadMagic),
    }
    match Unpickler::new(&mut *reader).load()? {
        Value::Int(LEGACY_PROTOCOL) => {}
        Value::Int(v) => return Err(Error::BadProtocol(v)),
        other => {
            return Err(Error::UnsupportedFormat(format!(
                "protocol version record is a {}",
                other.type_name()
            )))
        }
    }
    let sys_info = Unpickler::new(&mut *reader).load()?;
    log::debug!("legacy checkpoint sys info: {sys_info:?}");

    let mut loader = LegacyStorageLoader::default();
    let root = Unpickler::new(&mut *reader)
        .with_persistent_loader(&mut loader)
        .load()?;

    let keys = Unpickler::new(&mut *reader).load()?;
    let keys = keys
        .sequence()
        .ok_or_else(|| Error::UnsupportedFormat("storage key list is not a list".to_string()))?;
    for key in keys {
        let key = key.key_string();
        let storage = loader.loaded.get(&key).ok_or_else(|| {
            Error::UnsupportedFormat(format!("storage {key} is listed but never referenced"))
        })?;
        let mut count = [0u8; 8];
        reader.read_exact(&mut count)?;
        let count = u64::from_le_bytes(count);
        if count != storage.size as u64 {
            return Err(Error::UnsupportedFormat(format!(
                "storage {key} holds {count} elements, expected {}",
                storage.size
            )));
        }
        let nbytes = storage.nbytes();
        let mut data = Vec::new();
        (&mut *reader).take(nbytes as u64).read_to_end(&mut data)?;
        if data.len() < nbytes {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("storage {key} is truncated"),
            )));
        }
        *storage.data.borrow_mut() = data;
    }
    Ok(root)
}

fn read_tar<R: Read>(reader: R) -> Result<Value> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let entry = entry?;
        if entry.header().entry_type().is_file() {
            let mut entry = BufReader::new(entry);
            return read_legacy(&mut entry);
        }
    }
    Err(Error::UnsupportedFormat(
        "tar archive holds no regular file".to_string(),
    ))
}

/// Decode a checkpoint from a seekable reader, detecting the layout.
pub fn read_value_from_reader<R: Read + Seek>(mut reader: R) -> Result<Value> {
    let mut head = Vec::new();
    (&mut reader)
        .take((TAR_MAGIC_OFFSET + TAR_MAGIC.len()) as u64)
        .read_to_end(&mut head)?;
    reader.seek(SeekFrom::Start(0))?;
    if head.starts_with(ZIP_MAGIC) {
        read_zip(reader)
    } else if head.get(TAR_MAGIC_OFFSET..) == Some(TAR_MAGIC) {
        read_tar(reader)
    } else {
        read_legacy(&mut reader)
    }
}

/// The decoded root value of a checkpoint, storages loaded, no tensors
/// created.
pub fn inspect_pt(path: impl AsRef<Path>) -> Result<Value> {
    read_value_from_reader(BufReader::new(File::open(path.as_ref())?))
}

/// Named tensors of a checkpoint, in file order, each on the device its
/// storage was saved from.
pub fn read_pt(path: impl AsRef<Path>) -> Result<Vec<(String, Tensor)>> {
    tensors_from_value(&inspect_pt(path)?, None)
}

/// Named tensors of a checkpoint, in file order, all moved to `device`.
pub fn read_pt_with_device(path: impl AsRef<Path>, device: Device) -> Result<Vec<(String, Tensor)>> {
    tensors_from_value(&inspect_pt(path)?, Some(device))
}

/// Named tensors of an in-memory or otherwise seekable checkpoint.
pub fn read_pt_from_reader<R: Read + Seek>(
    reader: R,
    device: Option<Device>,
) -> Result<Vec<(String, Tensor)>> {
    tensors_from_value(&read_value_from_reader(reader)?, device)
}

/// Engine tensors for every tensor reachable through the root dictionary.
pub fn tensors_from_value(root: &Value, device: Option<Device>) -> Result<Vec<(String, Tensor)>> {
    let dict = match root {
        Value::Dict(d) => d,
        other => {
            return Err(Error::UnsupportedFormat(format!(
                "expected a dictionary of tensors at the root, found a {}",
                other.type_name()
            )))
        }
    };
    let mut out = Vec::new();
    collect(&dict.borrow(), "", device, &mut out)?;
    Ok(out)
}

fn collect(
    dict: &Dict,
    prefix: &str,
    device: Option<Device>,
    out: &mut Vec<(String, Tensor)>,
) -> Result<()> {
    for (key, value) in dict.iter() {
        let name = if prefix.is_empty() {
            key.key_string()
        } else {
            format!("{prefix}.{}", key.key_string())
        };
        match value {
            Value::StorageTensor(st) => {
                if let Some(t) = to_tensor(&name, st, device)? {
                    out.push((name, t));
                }
            }
            Value::Dict(inner) => collect(&inner.borrow(), &name, device, out)?,
            other => log::debug!("skipping {name}: {} is not a tensor", other.type_name()),
        }
    }
    Ok(())
}

fn to_tensor(name: &str, st: &StorageTensor, device: Option<Device>) -> Result<Option<Tensor>> {
    let storage = &st.storage;
    let data = storage.data.borrow();
    if data.is_empty() {
        log::debug!("skipping {name}: zero-length storage {}", storage.key);
        return Ok(None);
    }
    let kind = storage.kind();
    let widened;
    let (bytes, base_kind): (&[u8], Kind) = match kind {
        Kind::Half => {
            widened = widen_le(&data, f16_to_f32);
            (widened.as_slice(), Kind::Float)
        }
        Kind::BFloat16 => {
            widened = widen_le(&data, bf16_to_f32);
            (widened.as_slice(), Kind::Float)
        }
        k => (data.as_slice(), k),
    };
    let numel = (bytes.len() / base_kind.elt_size_in_bytes()) as i64;
    let (shape, stride) = if st.shape.is_empty() && numel == 1 {
        (vec![1], vec![1])
    } else {
        (st.shape.clone(), st.stride.clone())
    };
    let base = Tensor::from_data_size(bytes, &[numel], base_kind)?;
    let t = base
        .as_strided(&shape, &stride, st.offset)?
        .to_kind(kind)?
        .to_device(device.unwrap_or_else(|| storage.device()))?;
    let t = if st.requires_grad && kind.is_float() {
        t.set_requires_grad(true)?
    } else {
        t
    };
    Ok(Some(t.renamed(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename() {
        assert_eq!(basename("archive/data.pkl"), "data.pkl");
        assert_eq!(basename("data.pkl"), "data.pkl");
    }

    #[test]
    fn test_garbage_is_bad_magic() {
        let r = read_value_from_reader(std::io::Cursor::new(b"not a checkpoint".to_vec()));
        assert!(matches!(r, Err(Error::BadMagic)));
    }

    #[test]
    fn test_root_must_be_a_dict() {
        let r = tensors_from_value(&Value::Int(1), None);
        assert!(matches!(r, Err(Error::UnsupportedFormat(_))));
    }
}
