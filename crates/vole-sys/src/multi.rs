// Multi-tensor files: the engine's named-tensor container
//
// One flat file holds an ordered list of named tensors:
//
//   ┌──────────────┬──────────────────────┬───────────────────────┐
//   │ 8 bytes      │ N bytes              │ raw data bytes        │
//   │ header size  │ JSON header (UTF-8)  │ (contiguous, LE)      │
//   │ (u64 LE)     │                      │                       │
//   └──────────────┴──────────────────────┴───────────────────────┘
//
// Header example:
//   {
//     "format": "vole",
//     "tensors": [
//       { "name": "layer.weight", "dtype": "F32",
//         "shape": [64, 128], "data_offsets": [0, 32768] }
//     ]
//   }
//
// The tensor list is an array rather than a map so that load returns tensors
// in the order they were saved. Every element kind the engine knows is
// stored in its own representation; nothing is widened on disk.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use libc::c_int;
use serde::{Deserialize, Serialize};

use crate::kind::ElemKind;
use crate::tensor::{EngineResult, TensorImpl};

const FORMAT: &str = "vole";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    format: String,
    tensors: Vec<Entry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    name: String,
    dtype: String,
    shape: Vec<i64>,
    data_offsets: [usize; 2],
}

fn io_err(context: &str, e: std::io::Error) -> String {
    format!("{context}: {e}")
}

/// Write `tensors` to `writer`, each as a contiguous copy of its elements.
pub(crate) fn write_multi(
    writer: &mut impl Write,
    tensors: &[(String, Arc<TensorImpl>)],
) -> EngineResult<()> {
    let mut data: Vec<u8> = Vec::new();
    let mut entries = Vec::with_capacity(tensors.len());
    for (name, tensor) in tensors {
        let bytes = tensor.contiguous_bytes()?;
        let start = data.len();
        data.extend_from_slice(&bytes);
        entries.push(Entry {
            name: name.clone(),
            dtype: tensor.kind().tag().to_string(),
            shape: tensor.shape().to_vec(),
            data_offsets: [start, data.len()],
        });
    }

    let header = Header {
        format: FORMAT.to_string(),
        tensors: entries,
    };
    let header_bytes =
        serde_json::to_vec(&header).map_err(|e| format!("cannot encode header: {e}"))?;
    writer
        .write_all(&(header_bytes.len() as u64).to_le_bytes())
        .map_err(|e| io_err("write", e))?;
    writer
        .write_all(&header_bytes)
        .map_err(|e| io_err("write", e))?;
    writer.write_all(&data).map_err(|e| io_err("write", e))?;
    Ok(())
}

/// Read every tensor of a multi-tensor stream, placing them on `device`.
pub(crate) fn read_multi(
    reader: &mut impl Read,
    device: c_int,
) -> EngineResult<Vec<(String, Arc<TensorImpl>)>> {
    let mut size_buf = [0u8; 8];
    reader
        .read_exact(&mut size_buf)
        .map_err(|e| io_err("cannot read header size", e))?;
    let header_size = u64::from_le_bytes(size_buf) as usize;
    if header_size > 100_000_000 {
        return Err(format!(
            "header size {header_size} bytes is unreasonably large"
        ));
    }

    let mut header_bytes = vec![0u8; header_size];
    reader
        .read_exact(&mut header_bytes)
        .map_err(|e| io_err("cannot read header", e))?;
    let header: Header = serde_json::from_slice(&header_bytes)
        .map_err(|e| format!("invalid multi-tensor header: {e}"))?;
    if header.format != FORMAT {
        return Err(format!("unknown multi-tensor format `{}`", header.format));
    }

    let data_len = header
        .tensors
        .iter()
        .map(|e| e.data_offsets[1])
        .max()
        .unwrap_or(0);
    let mut data = vec![0u8; data_len];
    reader
        .read_exact(&mut data)
        .map_err(|e| io_err("truncated tensor data", e))?;

    header
        .tensors
        .into_iter()
        .map(|entry| {
            let kind = ElemKind::from_tag(&entry.dtype)?;
            let [start, end] = entry.data_offsets;
            if start > end || end > data.len() {
                return Err(format!(
                    "invalid data offsets [{start}, {end}] for `{}`",
                    entry.name
                ));
            }
            let tensor =
                TensorImpl::from_bytes(data[start..end].to_vec(), &entry.shape, kind, device)?;
            Ok((entry.name, tensor))
        })
        .collect()
}

pub(crate) fn save_file(
    path: &Path,
    tensors: &[(String, Arc<TensorImpl>)],
) -> EngineResult<()> {
    let file = File::create(path).map_err(|e| io_err(&path.display().to_string(), e))?;
    let mut writer = BufWriter::new(file);
    write_multi(&mut writer, tensors)?;
    writer
        .flush()
        .map_err(|e| io_err(&path.display().to_string(), e))
}

pub(crate) fn load_file(
    path: &Path,
    device: c_int,
) -> EngineResult<Vec<(String, Arc<TensorImpl>)>> {
    let file = File::open(path).map_err(|e| io_err(&path.display().to_string(), e))?;
    read_multi(&mut BufReader::new(file), device)
}
