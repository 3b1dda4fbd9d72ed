use std::ffi::CStr;
use std::path::Path;

use libc::{c_char, c_void};
use vole_sys::C_tensor;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::kind::{Element, Kind};
use crate::registry;
use crate::utils::{path_to_cstring, str_to_cstring, unsafe_engine};

// Tensor: the owning handle over one engine tensor
//
// A Tensor owns exactly one `*mut C_tensor`. Creating a Tensor enters it in
// the live-handle registry; releasing it removes the entry and frees the
// engine reference. There are three ways a Tensor is released:
//
//   free()       checked: a second call fails with DoubleFree, no engine call
//   must_free()  unchecked: panics instead of returning an error
//   Drop         the safety net; logs and swallows engine errors
//
// OWNERSHIP:
//
//   Tensor does not implement Clone. Two kinds of copies exist:
//
//   - shallow_clone(): a second owner of the *same* engine tensor. Storage,
//     requires_grad and the gradient are shared; writes through one are
//     visible through the other. Each owner is released independently.
//   - deep_clone(): a fresh engine tensor with its own contiguous storage.
//
//   Views (select, narrow, unsqueeze, as_strided) are new owners over the
//   source's storage; index_select copies.
//
// Every method that reaches the engine returns Result and checks the engine's
// error slot after the call.

/// Owning handle over one engine tensor.
#[derive(Debug)]
pub struct Tensor {
    c_tensor: *mut C_tensor,
    name: String,
}

// The engine synchronises access to tensor storage internally.
unsafe impl Send for Tensor {}
unsafe impl Sync for Tensor {}

extern "C" fn add_callback(data: *mut c_void, name: *const c_char, c_tensor: *mut C_tensor) {
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    let out = unsafe { &mut *(data as *mut Vec<(String, *mut C_tensor)>) };
    out.push((name, c_tensor));
}

impl Tensor {
    /// Take ownership of an engine pointer that was just returned.
    ///
    /// # Safety
    /// `c_tensor` must be a fresh pointer produced by the engine and not owned
    /// by any other handle.
    pub unsafe fn from_ptr(c_tensor: *mut C_tensor, name: Option<&str>) -> Result<Tensor> {
        if c_tensor.is_null() {
            return Err(Error::Engine("engine returned a null tensor".to_string()));
        }
        let bytes = if registry::is_debug() {
            vole_sys::vole_tensor_nbytes(c_tensor)
        } else {
            0
        };
        let name = registry::register(name, "tensor", bytes);
        Ok(Tensor { c_tensor, name })
    }

    fn wrap(c_tensor: *mut C_tensor) -> Result<Tensor> {
        unsafe { Tensor::from_ptr(c_tensor, None) }
    }

    /// The engine pointer, or `Released` once the handle was freed.
    pub fn as_ptr(&self) -> Result<*mut C_tensor> {
        if self.c_tensor.is_null() {
            return Err(Error::Released(self.name.clone()));
        }
        Ok(self.c_tensor)
    }

    /// The handle's unique diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Re-register this handle under a name derived from `name`.
    pub fn renamed(mut self, name: &str) -> Tensor {
        if !self.c_tensor.is_null() {
            self.name = registry::rename(&self.name, name);
        }
        self
    }

    /// An already-released handle carrying `name`. Every engine call on it
    /// fails with `Released(name)`.
    pub(crate) fn released(name: &str) -> Tensor {
        Tensor {
            c_tensor: std::ptr::null_mut(),
            name: name.to_string(),
        }
    }

    /// Whether the handle has been released.
    pub fn is_freed(&self) -> bool {
        self.c_tensor.is_null()
    }

    // Factories

    /// A null tensor, the engine's sentinel for "no value".
    pub fn undefined() -> Result<Tensor> {
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_new_undefined()))
    }

    pub fn zeros(size: &[i64], options: (Kind, Device)) -> Result<Tensor> {
        let (kind, device) = options;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_zeros(
            size.as_ptr(),
            size.len(),
            kind.c_int(),
            device.c_int()
        )))
    }

    pub fn ones(size: &[i64], options: (Kind, Device)) -> Result<Tensor> {
        let (kind, device) = options;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_ones(
            size.as_ptr(),
            size.len(),
            kind.c_int(),
            device.c_int()
        )))
    }

    pub fn empty(size: &[i64], options: (Kind, Device)) -> Result<Tensor> {
        let (kind, device) = options;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_empty(
            size.as_ptr(),
            size.len(),
            kind.c_int(),
            device.c_int()
        )))
    }

    pub fn full(size: &[i64], value: f64, options: (Kind, Device)) -> Result<Tensor> {
        let (kind, device) = options;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_full(
            size.as_ptr(),
            size.len(),
            value,
            kind.c_int(),
            device.c_int()
        )))
    }

    /// Values `start, start + step, ...` below `end`.
    pub fn arange(start: f64, end: f64, step: f64, options: (Kind, Device)) -> Result<Tensor> {
        let (kind, device) = options;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_arange(
            start,
            end,
            step,
            kind.c_int(),
            device.c_int()
        )))
    }

    /// `steps` evenly spaced values from `start` to `end` inclusive.
    pub fn linspace(start: f64, end: f64, steps: i64, options: (Kind, Device)) -> Result<Tensor> {
        let (kind, device) = options;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_linspace(
            start,
            end,
            steps,
            kind.c_int(),
            device.c_int()
        )))
    }

    /// Standard normal samples.
    pub fn randn(size: &[i64], options: (Kind, Device)) -> Result<Tensor> {
        let (kind, device) = options;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_randn(
            size.as_ptr(),
            size.len(),
            kind.c_int(),
            device.c_int()
        )))
    }

    /// Uniform samples in `[0, 1)`.
    pub fn rand(size: &[i64], options: (Kind, Device)) -> Result<Tensor> {
        let (kind, device) = options;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_rand(
            size.as_ptr(),
            size.len(),
            kind.c_int(),
            device.c_int()
        )))
    }

    /// Integers uniformly drawn from `[low, high)`.
    pub fn randint(low: i64, high: i64, size: &[i64], options: (Kind, Device)) -> Result<Tensor> {
        let (kind, device) = options;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_randint(
            low,
            high,
            size.as_ptr(),
            size.len(),
            kind.c_int(),
            device.c_int()
        )))
    }

    /// 1-D CPU tensor holding a copy of `data`.
    pub fn from_slice<T: Element>(data: &[T]) -> Result<Tensor> {
        let mut bytes = Vec::with_capacity(data.len() * T::KIND.elt_size_in_bytes());
        for &v in data {
            v.write_le(&mut bytes);
        }
        Tensor::from_data_size(&bytes, &[data.len() as i64], T::KIND)
    }

    /// CPU tensor of `size` built from raw little-endian element bytes.
    pub fn from_data_size(data: &[u8], size: &[i64], kind: Kind) -> Result<Tensor> {
        let numel: i64 = size.iter().product();
        let expected = numel.max(0) as usize * kind.elt_size_in_bytes();
        if data.len() != expected {
            return Err(Error::msg(format!(
                "{} bytes do not fill a {kind} tensor of shape {size:?} ({expected} bytes)",
                data.len()
            )));
        }
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_of_data(
            data.as_ptr() as *const c_void,
            size.as_ptr(),
            size.len(),
            kind.elt_size_in_bytes(),
            kind.c_int()
        )))
    }

    // Queries

    pub fn dim(&self) -> Result<usize> {
        let c = self.as_ptr()?;
        Ok(unsafe_engine!(vole_sys::vole_tensor_dim(c)))
    }

    pub fn size(&self) -> Result<Vec<i64>> {
        let c = self.as_ptr()?;
        let dim = self.dim()?;
        let mut out = vec![0i64; dim];
        unsafe_engine!(vole_sys::vole_tensor_shape(c, out.as_mut_ptr()));
        Ok(out)
    }

    pub fn stride(&self) -> Result<Vec<i64>> {
        let c = self.as_ptr()?;
        let dim = self.dim()?;
        let mut out = vec![0i64; dim];
        unsafe_engine!(vole_sys::vole_tensor_stride(c, out.as_mut_ptr()));
        Ok(out)
    }

    pub fn numel(&self) -> Result<usize> {
        Ok(self.size()?.iter().product::<i64>() as usize)
    }

    pub fn kind(&self) -> Result<Kind> {
        let c = self.as_ptr()?;
        Kind::from_c_int(unsafe_engine!(vole_sys::vole_tensor_kind(c)))
    }

    pub fn device(&self) -> Result<Device> {
        let c = self.as_ptr()?;
        Device::from_c_int(unsafe_engine!(vole_sys::vole_tensor_device(c)))
    }

    pub fn requires_grad(&self) -> Result<bool> {
        let c = self.as_ptr()?;
        Ok(unsafe_engine!(vole_sys::vole_tensor_requires_grad(c)) != 0)
    }

    /// False for the engine's null tensors.
    pub fn defined(&self) -> Result<bool> {
        let c = self.as_ptr()?;
        Ok(unsafe_engine!(vole_sys::vole_tensor_defined(c)) != 0)
    }

    pub fn is_contiguous(&self) -> Result<bool> {
        let c = self.as_ptr()?;
        Ok(unsafe_engine!(vole_sys::vole_tensor_is_contiguous(c)) != 0)
    }

    /// Address of the first element of this tensor.
    pub fn data_ptr(&self) -> Result<*mut c_void> {
        let c = self.as_ptr()?;
        Ok(unsafe_engine!(vole_sys::vole_tensor_data_ptr(c)))
    }

    /// Address of the start of the underlying storage. Equal for tensors
    /// that share storage.
    pub fn storage_ptr(&self) -> Result<*mut c_void> {
        let c = self.as_ptr()?;
        Ok(unsafe_engine!(vole_sys::vole_tensor_storage_ptr(c)))
    }

    /// Element offset of this tensor into its storage.
    pub fn storage_offset(&self) -> Result<i64> {
        let c = self.as_ptr()?;
        Ok(unsafe_engine!(vole_sys::vole_tensor_storage_offset(c)))
    }

    // Views and copies

    /// Pick `index` along `dim`, dropping the dimension. Shares storage.
    pub fn select(&self, dim: i64, index: i64) -> Result<Tensor> {
        let c = self.as_ptr()?;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_select(c, dim, index)))
    }

    /// Keep `length` entries of `dim` from `start`. Shares storage.
    pub fn narrow(&self, dim: i64, start: i64, length: i64) -> Result<Tensor> {
        let c = self.as_ptr()?;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_narrow(
            c, dim, start, length
        )))
    }

    /// Insert a length-1 dimension at `dim`. Shares storage.
    pub fn unsqueeze(&self, dim: i64) -> Result<Tensor> {
        let c = self.as_ptr()?;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_unsqueeze(c, dim)))
    }

    /// Gather along `dim` with a 1-D integer index. Copies.
    pub fn index_select(&self, dim: i64, index: &Tensor) -> Result<Tensor> {
        let c = self.as_ptr()?;
        let i = index.as_ptr()?;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_index_select(c, dim, i)))
    }

    /// Arbitrary strided view over this tensor's storage.
    pub fn as_strided(&self, size: &[i64], stride: &[i64], storage_offset: i64) -> Result<Tensor> {
        let c = self.as_ptr()?;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_as_strided(
            c,
            size.as_ptr(),
            size.len(),
            stride.as_ptr(),
            stride.len(),
            storage_offset
        )))
    }

    /// Copy `src` into this tensor, broadcasting and converting kinds.
    ///
    /// Fails when this tensor requires grad and grad mode is enabled; wrap
    /// the call in [`crate::no_grad`] to write into parameters.
    pub fn copy_(&mut self, src: &Tensor) -> Result<()> {
        let c = self.as_ptr()?;
        let s = src.as_ptr()?;
        unsafe_engine!(vole_sys::vole_tensor_copy_(c, s));
        Ok(())
    }

    pub fn fill_(&mut self, value: f64) -> Result<()> {
        let c = self.as_ptr()?;
        unsafe_engine!(vole_sys::vole_tensor_fill_(c, value));
        Ok(())
    }

    pub fn uniform_(&mut self, lo: f64, hi: f64) -> Result<()> {
        let c = self.as_ptr()?;
        unsafe_engine!(vole_sys::vole_tensor_uniform_(c, lo, hi));
        Ok(())
    }

    pub fn normal_(&mut self, mean: f64, std: f64) -> Result<()> {
        let c = self.as_ptr()?;
        unsafe_engine!(vole_sys::vole_tensor_normal_(c, mean, std));
        Ok(())
    }

    /// Fresh tensor with its own contiguous storage.
    pub fn deep_clone(&self) -> Result<Tensor> {
        let c = self.as_ptr()?;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_clone(c)))
    }

    /// Second owner of the same engine tensor.
    pub fn shallow_clone(&self) -> Result<Tensor> {
        let c = self.as_ptr()?;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_shallow_clone(c)))
    }

    pub fn to_device(&self, device: Device) -> Result<Tensor> {
        let c = self.as_ptr()?;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_to_device(
            c,
            device.c_int()
        )))
    }

    pub fn to_kind(&self, kind: Kind) -> Result<Tensor> {
        let c = self.as_ptr()?;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_to_kind(c, kind.c_int())))
    }

    // Gradients

    /// Set the grad flag in place; returns the same handle for chaining.
    pub fn set_requires_grad(self, requires_grad: bool) -> Result<Tensor> {
        let c = self.as_ptr()?;
        unsafe_engine!(vole_sys::vole_tensor_requires_grad_(c, requires_grad as i32));
        Ok(self)
    }

    /// The gradient, which is undefined until one is set.
    pub fn grad(&self) -> Result<Tensor> {
        let c = self.as_ptr()?;
        Tensor::wrap(unsafe_engine!(vole_sys::vole_tensor_grad(c)))
    }

    /// Replace the gradient; an undefined `grad` clears it.
    pub fn set_grad(&mut self, grad: &Tensor) -> Result<()> {
        let c = self.as_ptr()?;
        let g = grad.as_ptr()?;
        unsafe_engine!(vole_sys::vole_tensor_set_grad(c, g));
        Ok(())
    }

    pub fn zero_grad(&mut self) -> Result<()> {
        let c = self.as_ptr()?;
        unsafe_engine!(vole_sys::vole_tensor_zero_grad(c));
        Ok(())
    }

    // Element access

    /// Element at a full multi-index, as f64.
    pub fn double_value(&self, index: &[i64]) -> Result<f64> {
        let c = self.as_ptr()?;
        Ok(unsafe_engine!(vole_sys::vole_tensor_double_value_at(
            c,
            index.as_ptr(),
            index.len()
        )))
    }

    /// Element at a full multi-index, as i64.
    pub fn int64_value(&self, index: &[i64]) -> Result<i64> {
        let c = self.as_ptr()?;
        Ok(unsafe_engine!(vole_sys::vole_tensor_int64_value_at(
            c,
            index.as_ptr(),
            index.len()
        )))
    }

    /// All elements in row-major order. `T` must match the tensor's kind.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        let kind = self.kind()?;
        if kind != T::KIND {
            return Err(Error::msg(format!(
                "cannot read a {kind} tensor as {}",
                T::KIND
            )));
        }
        let bytes = self.to_bytes()?;
        Ok(bytes
            .chunks_exact(kind.elt_size_in_bytes())
            .map(T::read_le)
            .collect())
    }

    /// The elements' little-endian bytes in row-major order.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let c = self.as_ptr()?;
        let numel = self.numel()?;
        let elt = self.kind()?.elt_size_in_bytes();
        let mut bytes = vec![0u8; numel * elt];
        unsafe_engine!(vole_sys::vole_tensor_copy_data(
            c,
            bytes.as_mut_ptr() as *mut c_void,
            numel,
            elt
        ));
        Ok(bytes)
    }

    /// All elements converted to f64.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        self.to_kind(Kind::Double)?.to_vec::<f64>()
    }

    /// Mean of all elements; NaN for empty tensors.
    pub fn mean_f64(&self) -> Result<f64> {
        let values = self.to_f64_vec()?;
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    // Multi-tensor files

    /// Write named tensors to one file in the engine's multi-tensor format.
    pub fn save_multi<S: AsRef<str>, T: AsRef<Tensor>>(
        named_tensors: &[(S, T)],
        path: impl AsRef<Path>,
    ) -> Result<()> {
        let path = path_to_cstring(path.as_ref())?;
        let names = named_tensors
            .iter()
            .map(|(n, _)| str_to_cstring(n.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let name_ptrs: Vec<*const c_char> = names.iter().map(|n| n.as_ptr()).collect();
        let tensor_ptrs = named_tensors
            .iter()
            .map(|(_, t)| t.as_ref().as_ptr())
            .collect::<Result<Vec<_>>>()?;
        unsafe_engine!(vole_sys::vole_tensor_save_multi(
            tensor_ptrs.as_ptr(),
            name_ptrs.as_ptr(),
            tensor_ptrs.len(),
            path.as_ptr()
        ));
        Ok(())
    }

    /// Read every tensor of a multi-tensor file onto the CPU, in file order.
    pub fn load_multi(path: impl AsRef<Path>) -> Result<Vec<(String, Tensor)>> {
        Tensor::load_multi_with_device(path, Device::Cpu)
    }

    /// Read every tensor of a multi-tensor file onto `device`, in file order.
    pub fn load_multi_with_device(
        path: impl AsRef<Path>,
        device: Device,
    ) -> Result<Vec<(String, Tensor)>> {
        let path = path_to_cstring(path.as_ref())?;
        let mut raw: Vec<(String, *mut C_tensor)> = Vec::new();
        unsafe {
            vole_sys::vole_tensor_load_multi(
                path.as_ptr(),
                device.c_int(),
                &mut raw as *mut _ as *mut c_void,
                add_callback,
            )
        };
        if let Err(e) = crate::utils::read_and_clean_error() {
            for (_, c) in raw {
                unsafe { vole_sys::vole_tensor_free(c) };
            }
            return Err(e);
        }
        let mut out = Vec::with_capacity(raw.len());
        let mut pending = raw.into_iter();
        while let Some((name, c)) = pending.next() {
            match unsafe { Tensor::from_ptr(c, None) } {
                Ok(t) => out.push((name, t)),
                Err(e) => {
                    for (_, c) in pending {
                        unsafe { vole_sys::vole_tensor_free(c) };
                    }
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    // Release

    fn release(&mut self) -> Result<()> {
        let c = std::mem::replace(&mut self.c_tensor, std::ptr::null_mut());
        unsafe { vole_sys::vole_tensor_free(c) };
        registry::unregister(&self.name);
        crate::utils::read_and_clean_error()
    }

    /// Release the engine tensor now. A second call fails with `DoubleFree`
    /// and does not reach the engine.
    pub fn free(&mut self) -> Result<()> {
        if self.c_tensor.is_null() {
            return Err(Error::DoubleFree(self.name.clone()));
        }
        self.release()
    }

    /// Release the engine tensor now, panicking on double free.
    ///
    /// For cleanup paths that cannot propagate errors.
    pub fn must_free(&mut self) {
        if let Err(e) = self.free() {
            panic!("must_free failed for {}: {e}", self.name);
        }
    }
}

impl AsRef<Tensor> for Tensor {
    fn as_ref(&self) -> &Tensor {
        self
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        if self.c_tensor.is_null() {
            return;
        }
        log::debug!("finalizing {}", self.name);
        if let Err(e) = self.release() {
            log::warn!("error while finalizing {}: {e}", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const F32_CPU: (Kind, Device) = (Kind::Float, Device::Cpu);

    #[test]
    fn test_factory_registers_once() {
        let t = Tensor::zeros(&[2, 3], F32_CPU).unwrap();
        let name = t.name().to_string();
        assert!(registry::is_live(&name));
        assert_eq!(
            registry::live_handles().iter().filter(|n| **n == name).count(),
            1
        );
        drop(t);
        assert!(!registry::is_live(&name));
    }

    #[test]
    fn test_double_free_is_checked() {
        let mut t = Tensor::ones(&[4], F32_CPU).unwrap();
        t.free().unwrap();
        assert!(!registry::is_live(t.name()));
        assert!(matches!(t.free(), Err(Error::DoubleFree(_))));
        assert!(matches!(t.size(), Err(Error::Released(_))));
    }

    #[test]
    #[should_panic(expected = "must_free")]
    fn test_must_free_panics_on_repeat() {
        let mut t = Tensor::ones(&[1], F32_CPU).unwrap();
        t.must_free();
        t.must_free();
    }

    struct FinalizerLog;

    static FINALIZED: std::sync::Mutex<Vec<String>> = std::sync::Mutex::new(Vec::new());

    impl log::Log for FinalizerLog {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            let msg = record.args().to_string();
            if let Some(name) = msg.strip_prefix("finalizing ") {
                FINALIZED.lock().unwrap().push(name.to_string());
            }
        }

        fn flush(&self) {}
    }

    static FINALIZER_LOG: FinalizerLog = FinalizerLog;

    #[test]
    fn test_finalizer_logs_without_debug_flag() {
        let _ = log::set_logger(&FINALIZER_LOG);
        log::set_max_level(log::LevelFilter::Debug);
        registry::set_debug(false);
        let t = Tensor::zeros(&[1], F32_CPU).unwrap();
        let name = t.name().to_string();
        drop(t);
        assert!(FINALIZED.lock().unwrap().contains(&name));
    }

    #[test]
    fn test_failed_factory_surfaces_engine_message() {
        let r = Tensor::randint(5, 1, &[3], (Kind::Int64, Device::Cpu));
        match r {
            Err(Error::Engine(msg)) => assert!(msg.contains("low < high"), "{msg}"),
            other => panic!("expected an engine error, got {other:?}"),
        }
    }

    #[test]
    fn test_from_slice_roundtrip() {
        let t = Tensor::from_slice(&[1i64, -2, 3]).unwrap();
        assert_eq!(t.kind().unwrap(), Kind::Int64);
        assert_eq!(t.size().unwrap(), vec![3]);
        assert_eq!(t.to_vec::<i64>().unwrap(), vec![1, -2, 3]);
        assert!(t.to_vec::<f32>().is_err());
    }

    #[test]
    fn test_shallow_clone_shares_storage() {
        let t = Tensor::zeros(&[3], F32_CPU).unwrap();
        let mut c = t.shallow_clone().unwrap();
        assert_ne!(t.name(), c.name());
        c.fill_(2.0).unwrap();
        assert_eq!(t.to_f64_vec().unwrap(), vec![2.0, 2.0, 2.0]);
        assert_eq!(t.data_ptr().unwrap(), c.data_ptr().unwrap());
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let t = Tensor::zeros(&[3], F32_CPU).unwrap();
        let mut c = t.deep_clone().unwrap();
        c.fill_(1.0).unwrap();
        assert_eq!(t.mean_f64().unwrap(), 0.0);
        assert_eq!(c.mean_f64().unwrap(), 1.0);
    }

    #[test]
    fn test_copy_into_grad_leaf_needs_no_grad() {
        let mut t = Tensor::zeros(&[2], F32_CPU)
            .unwrap()
            .set_requires_grad(true)
            .unwrap();
        let src = Tensor::ones(&[2], F32_CPU).unwrap();
        assert!(matches!(t.copy_(&src), Err(Error::Engine(_))));
        crate::no_grad(|| t.copy_(&src)).unwrap();
        assert_eq!(t.to_f64_vec().unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_integer_tensor_cannot_require_grad() {
        let t = Tensor::zeros(&[2], (Kind::Int64, Device::Cpu)).unwrap();
        assert!(t.set_requires_grad(true).is_err());
    }

    #[test]
    fn test_cuda_move_is_an_engine_error() {
        let t = Tensor::zeros(&[2], F32_CPU).unwrap();
        assert!(matches!(t.to_device(Device::Cuda(0)), Err(Error::Engine(_))));
    }

    #[test]
    fn test_save_and_load_multi() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tensors.bin");
        let a = Tensor::arange(0.0, 6.0, 1.0, F32_CPU).unwrap();
        let b = Tensor::from_slice(&[7i32, 8]).unwrap();
        Tensor::save_multi(&[("a", &a), ("b", &b)], &path).unwrap();

        let loaded = Tensor::load_multi(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].0, "a");
        assert_eq!(loaded[0].1.to_vec::<f32>().unwrap(), vec![0., 1., 2., 3., 4., 5.]);
        assert_eq!(loaded[1].0, "b");
        assert_eq!(loaded[1].1.kind().unwrap(), Kind::Int);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let r = Tensor::load_multi(dir.path().join("absent.bin"));
        assert!(matches!(r, Err(Error::Engine(_))));
    }
}
