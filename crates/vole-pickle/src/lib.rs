//! # vole-pickle
//!
//! Reads engine checkpoints without the engine's host language.
//!
//! This crate provides:
//! - [`Unpickler`]: a pickle virtual machine for protocols 0 to 5
//! - [`read_pt`] / [`inspect_pt`]: zip and legacy checkpoint containers
//! - [`npy`]: NumPy `.npy` and `.npz` import and export
//! - [`half`]: host-side half and bfloat16 widening
// - value: the decoded object model, shared containers behind Rc<RefCell>
// - class: (module, name) resolution and the tensor reconstructors
// - persistent: storage records behind PERSID/BINPERSID
// - reader: protocol-4 frame handling

pub mod class;
pub mod container;
pub mod half;
pub mod npy;
pub mod opcode;
pub mod persistent;
mod reader;
pub mod unpickler;
pub mod value;

pub use class::{Class, ClassResolver, StorageClass};
pub use container::{
    inspect_pt, read_pt, read_pt_from_reader, read_pt_with_device, read_value_from_reader,
    tensors_from_value,
};
pub use npy::{read_npy, read_npz, write_npy, write_npz, NpyHeader};
pub use persistent::{FnLoader, PersistentLoader};
pub use unpickler::Unpickler;
pub use value::{Dict, Object, Storage, StorageTensor, Value};
