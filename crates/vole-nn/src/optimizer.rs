// Optimizers over a variable store
//
// An OptimizerConfig holds hyper-parameters and builds the engine optimizer.
// `config.build(&vs, lr)` registers the store's trainable variables; later
// additions to the store are registered at the start of the next step, so a
// model may keep creating variables after its optimizer exists.
//
// Registrations are keyed by name and storage address. A variable removed
// from the store stays registered with the engine optimizer, which keeps its
// own reference to it, and a new variable added under the same name is
// registered again on the next step.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use vole_core::{COptimizer, Result, Tensor};

use crate::var_store::{VarStore, Variables};

/// Hyper-parameters of an optimizer.
pub trait OptimizerConfig
where
    Self: Sized,
{
    /// The engine optimizer with learning rate `lr` and no parameters.
    fn build_copt(&self, lr: f64) -> Result<COptimizer>;

    /// An optimizer over the trainable variables of `vs`.
    fn build(self, vs: &VarStore, lr: f64) -> Result<Optimizer> {
        let mut optimizer = Optimizer {
            opt: self.build_copt(lr)?,
            variables: vs.variables_.clone(),
            registered: HashMap::new(),
        };
        optimizer.add_missing_variables()?;
        Ok(optimizer)
    }
}

/// Stochastic gradient descent.
#[derive(Debug, Clone, Copy)]
pub struct Sgd {
    pub momentum: f64,
    pub dampening: f64,
    pub wd: f64,
    pub nesterov: bool,
}

impl Default for Sgd {
    fn default() -> Self {
        Sgd {
            momentum: 0.,
            dampening: 0.,
            wd: 0.,
            nesterov: false,
        }
    }
}

impl OptimizerConfig for Sgd {
    fn build_copt(&self, lr: f64) -> Result<COptimizer> {
        COptimizer::sgd(lr, self.momentum, self.dampening, self.wd, self.nesterov)
    }
}

/// Adam.
#[derive(Debug, Clone, Copy)]
pub struct Adam {
    pub beta1: f64,
    pub beta2: f64,
    pub wd: f64,
    pub eps: f64,
}

impl Default for Adam {
    fn default() -> Self {
        Adam {
            beta1: 0.9,
            beta2: 0.999,
            wd: 0.,
            eps: 1e-8,
        }
    }
}

impl OptimizerConfig for Adam {
    fn build_copt(&self, lr: f64) -> Result<COptimizer> {
        COptimizer::adam(lr, self.beta1, self.beta2, self.wd, self.eps)
    }
}

/// An engine optimizer bound to the trainable variables of a store.
#[derive(Debug)]
pub struct Optimizer {
    opt: COptimizer,
    variables: Arc<Mutex<Variables>>,
    /// Store name to the storage address registered under it.
    registered: HashMap<String, usize>,
}

impl Optimizer {
    fn add_missing_variables(&mut self) -> Result<()> {
        let variables = self.variables.lock().unwrap_or_else(|e| e.into_inner());
        let mut fresh: Vec<(&str, usize, &Tensor)> = Vec::new();
        for (name, tensor) in variables.trainable_variables.iter() {
            let storage = tensor.storage_ptr()? as usize;
            if self.registered.get(name) != Some(&storage) {
                fresh.push((name, storage, tensor));
            }
        }
        if fresh.is_empty() {
            return Ok(());
        }
        let tensors: Vec<&Tensor> = fresh.iter().map(|(_, _, t)| *t).collect();
        self.opt.add_parameters(&tensors)?;
        log::debug!("optimizer {}: registered {} variables", self.opt.name(), fresh.len());
        for (name, storage, _) in fresh {
            self.registered.insert(name.to_string(), storage);
        }
        Ok(())
    }

    /// Register extra tensors that do not live in the store.
    pub fn add_parameters(&mut self, tensors: &[&Tensor]) -> Result<()> {
        self.opt.add_parameters(tensors)
    }

    pub fn zero_grad(&mut self) -> Result<()> {
        self.add_missing_variables()?;
        self.opt.zero_grad()
    }

    /// Apply one update from the current gradients.
    pub fn step(&mut self) -> Result<()> {
        self.add_missing_variables()?;
        self.opt.step()
    }

    pub fn set_lr(&mut self, lr: f64) -> Result<()> {
        self.opt.set_learning_rate(lr)
    }

    pub fn lr(&self) -> Result<f64> {
        self.opt.learning_rate()
    }

    /// Number of store names with a registered variable.
    pub fn registered_len(&self) -> usize {
        self.registered.len()
    }
}
