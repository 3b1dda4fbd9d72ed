// Builders for checkpoint files used by the integration tests.
//
// PickleWriter emits pickle opcodes one by one; the helpers on top write the
// state-dict shape a training framework produces:
//
//   OrderedDict((name, _rebuild_tensor_v2(persid(storage), offset, shape,
//                                         stride, requires_grad, hooks)), ...)

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

pub struct PickleWriter {
    buf: Vec<u8>,
}

impl PickleWriter {
    pub fn new(proto: u8) -> Self {
        PickleWriter {
            buf: vec![0x80, proto],
        }
    }

    pub fn op(&mut self, op: u8) -> &mut Self {
        self.buf.push(op);
        self
    }

    pub fn mark(&mut self) -> &mut Self {
        self.op(b'(')
    }

    pub fn tuple(&mut self) -> &mut Self {
        self.op(b't')
    }

    pub fn empty_tuple(&mut self) -> &mut Self {
        self.op(b')')
    }

    pub fn reduce(&mut self) -> &mut Self {
        self.op(b'R')
    }

    pub fn global(&mut self, module: &str, name: &str) -> &mut Self {
        self.buf.push(b'c');
        self.buf.extend_from_slice(module.as_bytes());
        self.buf.push(b'\n');
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(b'\n');
        self
    }

    pub fn unicode(&mut self, s: &str) -> &mut Self {
        self.buf.push(b'X');
        self.buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn int(&mut self, v: i32) -> &mut Self {
        self.buf.push(b'J');
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.op(if v { 0x88 } else { 0x89 })
    }

    /// LONG1 with a little-endian two's complement payload.
    pub fn long1(&mut self, le_bytes: &[u8]) -> &mut Self {
        self.buf.push(0x8a);
        self.buf.push(le_bytes.len() as u8);
        self.buf.extend_from_slice(le_bytes);
        self
    }

    pub fn int_tuple(&mut self, values: &[i64]) -> &mut Self {
        self.mark();
        for v in values {
            self.int(*v as i32);
        }
        self.tuple()
    }

    pub fn binput(&mut self, slot: u8) -> &mut Self {
        self.buf.push(b'q');
        self.buf.push(slot);
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        self.op(b'.');
        std::mem::take(&mut self.buf)
    }
}

/// One tensor of a state dict and the storage record behind it.
pub struct TensorEntry {
    pub name: &'static str,
    pub key: &'static str,
    pub storage: &'static str,
    pub shape: Vec<i64>,
    pub stride: Vec<i64>,
    pub offset: i64,
    pub requires_grad: bool,
    pub data: Vec<u8>,
    pub elt_size: usize,
}

impl TensorEntry {
    pub fn f32(name: &'static str, key: &'static str, values: &[f32], shape: &[i64]) -> Self {
        TensorEntry {
            name,
            key,
            storage: "FloatStorage",
            shape: shape.to_vec(),
            stride: contiguous_stride(shape),
            offset: 0,
            requires_grad: false,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            elt_size: 4,
        }
    }

    pub fn numel(&self) -> usize {
        self.data.len() / self.elt_size
    }
}

pub fn contiguous_stride(shape: &[i64]) -> Vec<i64> {
    let mut stride = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        stride[i] = stride[i + 1] * shape[i + 1];
    }
    stride
}

/// The state-dict pickle. `legacy` adds the trailing view slot of the
/// legacy persistent id.
pub fn state_dict_pickle(entries: &[TensorEntry], legacy: bool) -> Vec<u8> {
    let mut w = PickleWriter::new(2);
    write_state_dict(&mut w, entries, legacy);
    w.finish()
}

/// Pushes the state dict without terminating the stream.
pub fn write_state_dict(w: &mut PickleWriter, entries: &[TensorEntry], legacy: bool) {
    w.global("collections", "OrderedDict").empty_tuple().reduce();
    w.binput(0);
    for e in entries {
        w.unicode(e.name);
        w.global("torch._utils", "_rebuild_tensor_v2");
        w.mark();
        {
            w.mark();
            w.unicode("storage")
                .global("torch", e.storage)
                .unicode(e.key)
                .unicode("cpu")
                .int(e.numel() as i32);
            if legacy {
                w.op(b'N');
            }
            w.tuple().op(b'Q');
        }
        w.int(e.offset as i32)
            .int_tuple(&e.shape)
            .int_tuple(&e.stride)
            .bool(e.requires_grad);
        w.global("collections", "OrderedDict").empty_tuple().reduce();
        w.tuple().reduce();
        w.op(b's');
    }
}

/// A zip checkpoint: `{prefix}data.pkl` plus one `{prefix}data/{key}` record
/// per storage.
pub fn write_zip_checkpoint(path: &Path, prefix: &str, pickle: &[u8], records: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    zip.start_file(format!("{prefix}data.pkl"), options).unwrap();
    zip.write_all(pickle).unwrap();
    for (key, data) in records {
        zip.start_file(format!("{prefix}data/{key}"), options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// A zip checkpoint holding `entries`, one record per distinct key.
pub fn zip_state_dict(path: &Path, entries: &[TensorEntry]) {
    let pickle = state_dict_pickle(entries, false);
    let records: Vec<(&str, &[u8])> = entries.iter().map(|e| (e.key, e.data.as_slice())).collect();
    write_zip_checkpoint(path, "archive/", &pickle, &records);
}

/// The legacy magic number as a LONG1 payload.
pub fn legacy_magic_le() -> Vec<u8> {
    num_bigint::BigInt::parse_bytes(b"1950a86a20f9469cfc6c", 16)
        .unwrap()
        .to_signed_bytes_le()
}

/// A legacy checkpoint stream: magic, protocol, sys info, object, keys,
/// then each storage as a u64 element count followed by its bytes.
pub fn legacy_state_dict(entries: &[TensorEntry], protocol: i32) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(PickleWriter::new(2).long1(&legacy_magic_le()).finish());
    out.extend(PickleWriter::new(2).int(protocol).finish());
    out.extend(
        PickleWriter::new(2)
            .op(b'}')
            .unicode("little_endian")
            .bool(true)
            .op(b's')
            .finish(),
    );
    out.extend(state_dict_pickle(entries, true));
    let mut keys = PickleWriter::new(2);
    keys.op(b']').mark();
    for e in entries {
        keys.unicode(e.key);
    }
    keys.op(b'e');
    out.extend(keys.finish());
    for e in entries {
        out.extend_from_slice(&(e.numel() as u64).to_le_bytes());
        out.extend_from_slice(&e.data);
    }
    out
}
