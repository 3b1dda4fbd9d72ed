//! # vole-core
//!
//! Owning handles over the vole tensor engine.
//!
//! This crate provides:
//! - [`Tensor`], [`Scalar`], [`COptimizer`]: handles with checked release
//! - [`registry`]: the live-handle registry used for leak diagnostics
//! - [`IndexOp`]: the `t.i((.., 1..3, NewAxis))` indexing algebra
//! - [`no_grad`] / [`NoGradGuard`]: scoped grad-mode switching
//! - [`Kind`] / [`Device`]: element kinds and placement
// - error: typed errors, engine failures arrive as Error::Engine
// - utils: the engine call wrapper that drains the engine's error slot

pub mod device;
pub mod error;
pub mod index;
pub mod kind;
pub mod no_grad;
pub mod optimizer;
pub mod registry;
pub mod scalar;
pub mod tensor;
mod utils;

pub use device::{cuda_device_count, Device};
pub use error::{Error, PickleError, Result};
pub use index::{IndexOp, NewAxis, TensorIndexer};
pub use kind::{Element, Kind};
pub use no_grad::{grad_enabled, no_grad, set_grad_enabled, NoGradGuard};
pub use optimizer::COptimizer;
pub use registry::{is_debug, is_live, live_bytes, live_handle_count, live_handles, set_debug};
pub use scalar::Scalar;
pub use tensor::Tensor;

/// Seed the engine's random generator.
pub fn manual_seed(seed: u64) {
    vole_sys::vole_manual_seed(seed)
}
