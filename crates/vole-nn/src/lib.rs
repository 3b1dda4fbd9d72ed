//! # vole-nn
//!
//! Model parameters for vole.
//!
//! A [`VarStore`] owns the variables of a model under dotted names and
//! mediates their persistence:
//!
//! 1. **Paths**: `vs.root().sub("encoder").zeros("bias", &[16])` creates the
//!    trainable variable `encoder.bias`
//! 2. **Entries**: `path.entry("w").or_randn(...)` returns the existing
//!    variable if one was already created, for shared weights
//! 3. **Init**: constant, uniform, normal, Kaiming and orthogonal fills
//! 4. **Persistence**: `save`/`load` in the engine's multi-tensor format, and
//!    `load_pt` for pickle-based checkpoints
//! 5. **Training**: [`Sgd`]/[`Adam`] optimizers over the trainable set, and
//!    learning-rate schedulers

pub mod init;
pub mod optimizer;
pub mod scheduler;
pub mod var_store;

pub use init::{f_init, init, Init, DEFAULT_KAIMING_UNIFORM};
pub use optimizer::{Adam, Optimizer, OptimizerConfig, Sgd};
pub use scheduler::{CosineAnnealingLr, ExponentialLr, LrScheduler, MultiStepLr, StepLr};
pub use var_store::{Entry, Path, VarStore, Variables};
