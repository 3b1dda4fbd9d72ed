//! # Vole
//!
//! Safe Rust bindings to the vole tensor engine.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use vole::prelude::*;
//!
//! # fn main() -> vole::Result<()> {
//! let vs = VarStore::new(Device::Cpu);
//! let w = vs.root().sub("linear").kaiming_uniform("weight", &[4, 3])?;
//! let row = w.i((0, ..))?;
//! assert_eq!(row.size()?, vec![3]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `vole-sys` | Engine C ABI and the reference CPU engine behind it |
//! | `vole-core` | Tensor/Scalar/optimizer handles, live-handle registry, indexing, no-grad scopes |
//! | `vole-pickle` | Pickle virtual machine, `.pt` checkpoint containers, `.npy`/`.npz` |
//! | `vole-nn` | VarStore, paths and entries, initializers, optimizers, LR schedulers |
//!
//! ## Modules
//!
//! - [`nn`]: variable store and training helpers
//! - [`pickle`]: checkpoint decoding

/// Re-export core types.
pub use vole_core::{
    cuda_device_count, grad_enabled, manual_seed, no_grad, registry, set_grad_enabled,
    COptimizer, Device, Element, Error, IndexOp, Kind, NewAxis, NoGradGuard, PickleError, Result,
    Scalar, Tensor, TensorIndexer,
};

/// Re-export the variable store, initializers, optimizers and schedulers.
pub mod nn {
    pub use vole_nn::*;
}

/// Re-export the pickle decoder and checkpoint readers.
pub mod pickle {
    pub use vole_pickle::*;
}

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::nn::{
        Adam, CosineAnnealingLr, ExponentialLr, Init, LrScheduler, MultiStepLr, Optimizer,
        OptimizerConfig, Path, Sgd, StepLr, VarStore,
    };
    pub use crate::pickle::{read_npy, read_npz, read_pt, read_pt_with_device, write_npy, write_npz};
    pub use crate::{
        no_grad, Device, IndexOp, Kind, NewAxis, NoGradGuard, Scalar, Tensor, TensorIndexer,
    };
}
