use vole_sys::C_optimizer;

use crate::error::{Error, Result};
use crate::registry;
use crate::tensor::Tensor;
use crate::utils::unsafe_engine;

/// Owning handle over an engine optimizer.
///
/// The engine keeps its own references to the registered parameters, so the
/// tensors passed to [`COptimizer::add_parameters`] may be dropped on the
/// host side without affecting later steps.
#[derive(Debug)]
pub struct COptimizer {
    c_optimizer: *mut C_optimizer,
    name: String,
}

unsafe impl Send for COptimizer {}

impl COptimizer {
    fn wrap(c_optimizer: *mut C_optimizer) -> Result<COptimizer> {
        if c_optimizer.is_null() {
            return Err(Error::Engine("engine returned a null optimizer".to_string()));
        }
        let name = registry::register(None, "optimizer", 0);
        Ok(COptimizer { c_optimizer, name })
    }

    pub fn sgd(
        lr: f64,
        momentum: f64,
        dampening: f64,
        weight_decay: f64,
        nesterov: bool,
    ) -> Result<COptimizer> {
        COptimizer::wrap(unsafe_engine!(vole_sys::vole_optimizer_sgd(
            lr,
            momentum,
            dampening,
            weight_decay,
            nesterov as i32
        )))
    }

    pub fn adam(lr: f64, beta1: f64, beta2: f64, weight_decay: f64, eps: f64) -> Result<COptimizer> {
        COptimizer::wrap(unsafe_engine!(vole_sys::vole_optimizer_adam(
            lr,
            beta1,
            beta2,
            weight_decay,
            eps
        )))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn as_ptr(&self) -> Result<*mut C_optimizer> {
        if self.c_optimizer.is_null() {
            return Err(Error::Released(self.name.clone()));
        }
        Ok(self.c_optimizer)
    }

    pub fn add_parameters(&mut self, tensors: &[&Tensor]) -> Result<()> {
        let c = self.as_ptr()?;
        let ptrs = tensors
            .iter()
            .map(|t| t.as_ptr())
            .collect::<Result<Vec<_>>>()?;
        unsafe_engine!(vole_sys::vole_optimizer_add_parameters(
            c,
            ptrs.as_ptr(),
            ptrs.len()
        ));
        Ok(())
    }

    pub fn set_learning_rate(&mut self, lr: f64) -> Result<()> {
        let c = self.as_ptr()?;
        unsafe_engine!(vole_sys::vole_optimizer_set_lr(c, lr));
        Ok(())
    }

    pub fn learning_rate(&self) -> Result<f64> {
        let c = self.as_ptr()?;
        Ok(unsafe_engine!(vole_sys::vole_optimizer_get_lr(c)))
    }

    pub fn zero_grad(&mut self) -> Result<()> {
        let c = self.as_ptr()?;
        unsafe_engine!(vole_sys::vole_optimizer_zero_grad(c));
        Ok(())
    }

    /// Update every registered parameter that has a gradient.
    pub fn step(&mut self) -> Result<()> {
        let c = self.as_ptr()?;
        unsafe_engine!(vole_sys::vole_optimizer_step(c));
        Ok(())
    }

    /// Release the engine optimizer now; `DoubleFree` on repeat.
    pub fn free(&mut self) -> Result<()> {
        if self.c_optimizer.is_null() {
            return Err(Error::DoubleFree(self.name.clone()));
        }
        let c = std::mem::replace(&mut self.c_optimizer, std::ptr::null_mut());
        unsafe { vole_sys::vole_optimizer_free(c) };
        registry::unregister(&self.name);
        crate::utils::read_and_clean_error()
    }
}

impl Drop for COptimizer {
    fn drop(&mut self) {
        if self.c_optimizer.is_null() {
            return;
        }
        log::debug!("finalizing {}", self.name);
        if let Err(e) = self.free() {
            log::warn!("error while finalizing {}: {e}", self.name);
        }
    }
}
