// vole-sys: C ABI of the vole tensor engine
//
// Everything above this crate talks to the engine exclusively through the
// `extern "C"` functions below, over three opaque handle types:
//
//   *mut C_tensor     one tensor reference (possibly undefined)
//   *mut C_scalar     one 0-dim value
//   *mut C_optimizer  one optimizer with its registered parameters
//
// ERROR PROTOCOL:
//
//   Every entry point clears the calling thread's error slot, runs, and on
//   failure stores a message there and returns a neutral value (null pointer,
//   zero, false). Callers drain the slot with `vole_last_error` after every
//   call; the returned string is owned by the caller and released with
//   `vole_string_free`. Panics never cross the boundary: they are caught and
//   turned into error messages.
//
// The engine implementation behind the ABI is a reference CPU engine (see
// `tensor.rs`): strided views over shared storage, kind conversions, random
// factories, gradients as plain slots, and SGD/Adam updates. It performs no
// automatic differentiation.

#![allow(non_camel_case_types)]
#![allow(clippy::missing_safety_doc)]

mod kind;
mod layout;
mod multi;
mod optim;
mod scalar;
mod tensor;

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use libc::{c_char, c_int, c_void};

use kind::{Elem, ElemKind};
use optim::{Algorithm, Optimizer};
use scalar::ScalarImpl;
use tensor::{EngineResult, TensorImpl};

/// Opaque engine tensor. `inner` is `None` for undefined tensors.
pub struct C_tensor {
    inner: Option<Arc<TensorImpl>>,
}

/// Opaque engine scalar.
pub struct C_scalar {
    inner: ScalarImpl,
}

/// Opaque engine optimizer.
pub struct C_optimizer {
    inner: Optimizer,
}

// Error slot

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_error(message: impl Into<String>) {
    let msg = message.into();
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = Some(msg);
    });
}

fn clear_error() {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = None;
    });
}

fn ffi_guard<T, F>(default: T, f: F) -> T
where
    F: FnOnce() -> T,
{
    clear_error();
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(v) => v,
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                *s
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.as_str()
            } else {
                "panic across FFI boundary"
            };
            set_error(format!("panic: {msg}"));
            default
        }
    }
}

/// Unwrap an engine result, recording the error and yielding `default`.
fn value_out<T>(default: T, r: EngineResult<T>) -> T {
    match r {
        Ok(v) => v,
        Err(e) => {
            set_error(e);
            default
        }
    }
}

fn tensor_out(r: EngineResult<Arc<TensorImpl>>) -> *mut C_tensor {
    match r {
        Ok(t) => Box::into_raw(Box::new(C_tensor { inner: Some(t) })),
        Err(e) => {
            set_error(e);
            ptr::null_mut()
        }
    }
}

unsafe fn tensor_ref<'a>(t: *mut C_tensor) -> EngineResult<&'a Arc<TensorImpl>> {
    if t.is_null() {
        return Err("null tensor pointer".to_string());
    }
    (*t).inner
        .as_ref()
        .ok_or_else(|| "undefined tensor".to_string())
}

unsafe fn int_slice<'a>(ptr: *const i64, len: usize) -> EngineResult<&'a [i64]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err("null dimension pointer".to_string());
    }
    Ok(std::slice::from_raw_parts(ptr, len))
}

unsafe fn c_str<'a>(ptr: *const c_char) -> EngineResult<&'a str> {
    if ptr.is_null() {
        return Err("null string pointer".to_string());
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| "invalid UTF-8 string".to_string())
}

fn string_out(s: String) -> *mut c_char {
    let bytes: Vec<u8> = s.into_bytes().into_iter().filter(|&b| b != 0).collect();
    match CString::new(bytes) {
        Ok(c) => c.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn elem_of(kind: ElemKind, value: f64) -> Elem {
    if kind.is_float() {
        Elem::Float(value)
    } else if kind == ElemKind::Bool {
        Elem::Bool(value != 0.0)
    } else {
        Elem::Int(value as i64)
    }
}

// Global state

/// Take the calling thread's pending error, or null when there is none.
#[no_mangle]
pub extern "C" fn vole_last_error() -> *mut c_char {
    LAST_ERROR.with(|cell| match cell.borrow_mut().take() {
        Some(msg) => string_out(msg),
        None => ptr::null_mut(),
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Set grad mode for the calling thread; returns the previous mode.
#[no_mangle]
pub extern "C" fn vole_grad_set_enabled(enabled: c_int) -> c_int {
    ffi_guard(0, || tensor::set_grad_enabled(enabled != 0) as c_int)
}

#[no_mangle]
pub extern "C" fn vole_grad_is_enabled() -> c_int {
    ffi_guard(0, || tensor::grad_enabled() as c_int)
}

#[no_mangle]
pub extern "C" fn vole_cuda_device_count() -> c_int {
    0
}

#[no_mangle]
pub extern "C" fn vole_manual_seed(seed: u64) {
    ffi_guard((), || tensor::manual_seed(seed))
}

// Tensor lifetime

#[no_mangle]
pub extern "C" fn vole_tensor_new_undefined() -> *mut C_tensor {
    Box::into_raw(Box::new(C_tensor { inner: None }))
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_free(t: *mut C_tensor) {
    ffi_guard((), || {
        if !t.is_null() {
            drop(Box::from_raw(t));
        }
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_defined(t: *mut C_tensor) -> c_int {
    ffi_guard(0, || (!t.is_null() && (*t).inner.is_some()) as c_int)
}

// Factories

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_zeros(
    dims: *const i64,
    ndims: usize,
    kind: c_int,
    device: c_int,
) -> *mut C_tensor {
    vole_tensor_full(dims, ndims, 0.0, kind, device)
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_ones(
    dims: *const i64,
    ndims: usize,
    kind: c_int,
    device: c_int,
) -> *mut C_tensor {
    vole_tensor_full(dims, ndims, 1.0, kind, device)
}

/// Uninitialised memory is never exposed; `empty` is zero-filled.
#[no_mangle]
pub unsafe extern "C" fn vole_tensor_empty(
    dims: *const i64,
    ndims: usize,
    kind: c_int,
    device: c_int,
) -> *mut C_tensor {
    vole_tensor_full(dims, ndims, 0.0, kind, device)
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_full(
    dims: *const i64,
    ndims: usize,
    value: f64,
    kind: c_int,
    device: c_int,
) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out((|| {
            let kind = ElemKind::from_code(kind)?;
            let shape = int_slice(dims, ndims)?;
            TensorImpl::full(shape, elem_of(kind, value), kind, device)
        })())
    })
}

#[no_mangle]
pub extern "C" fn vole_tensor_arange(
    start: f64,
    end: f64,
    step: f64,
    kind: c_int,
    device: c_int,
) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out(
            ElemKind::from_code(kind)
                .and_then(|kind| TensorImpl::arange(start, end, step, kind, device)),
        )
    })
}

#[no_mangle]
pub extern "C" fn vole_tensor_linspace(
    start: f64,
    end: f64,
    steps: i64,
    kind: c_int,
    device: c_int,
) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out(
            ElemKind::from_code(kind)
                .and_then(|kind| TensorImpl::linspace(start, end, steps, kind, device)),
        )
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_randn(
    dims: *const i64,
    ndims: usize,
    kind: c_int,
    device: c_int,
) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out((|| {
            let kind = ElemKind::from_code(kind)?;
            TensorImpl::randn(int_slice(dims, ndims)?, kind, device)
        })())
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_rand(
    dims: *const i64,
    ndims: usize,
    kind: c_int,
    device: c_int,
) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out((|| {
            let kind = ElemKind::from_code(kind)?;
            TensorImpl::rand(int_slice(dims, ndims)?, kind, device)
        })())
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_randint(
    low: i64,
    high: i64,
    dims: *const i64,
    ndims: usize,
    kind: c_int,
    device: c_int,
) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out((|| {
            let kind = ElemKind::from_code(kind)?;
            TensorImpl::randint(low, high, int_slice(dims, ndims)?, kind, device)
        })())
    })
}

/// Copy `numel × elt_size` bytes from `data` into a new contiguous CPU tensor.
#[no_mangle]
pub unsafe extern "C" fn vole_tensor_of_data(
    data: *const c_void,
    dims: *const i64,
    ndims: usize,
    elt_size: usize,
    kind: c_int,
) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out((|| {
            let kind = ElemKind::from_code(kind)?;
            if kind.size() != elt_size {
                return Err(format!(
                    "element size {elt_size} does not match kind {kind:?} ({} bytes)",
                    kind.size()
                ));
            }
            let shape = int_slice(dims, ndims)?;
            if shape.iter().any(|&d| d < 0) {
                return Err(format!("negative dimension in shape {shape:?}"));
            }
            let nbytes = shape.iter().product::<i64>() as usize * elt_size;
            let bytes = if nbytes == 0 {
                Vec::new()
            } else if data.is_null() {
                return Err("null data pointer".to_string());
            } else {
                std::slice::from_raw_parts(data as *const u8, nbytes).to_vec()
            };
            TensorImpl::from_bytes(bytes, shape, kind, tensor::CPU)
        })())
    })
}

// Queries

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_dim(t: *mut C_tensor) -> usize {
    ffi_guard(0, || value_out(0, tensor_ref(t).map(|t| t.dim())))
}

/// Write `dim` sizes into `out`.
#[no_mangle]
pub unsafe extern "C" fn vole_tensor_shape(t: *mut C_tensor, out: *mut i64) {
    ffi_guard((), || {
        value_out(
            (),
            tensor_ref(t).map(|t| {
                for (i, &d) in t.shape().iter().enumerate() {
                    *out.add(i) = d;
                }
            }),
        )
    })
}

/// Write `dim` strides into `out`.
#[no_mangle]
pub unsafe extern "C" fn vole_tensor_stride(t: *mut C_tensor, out: *mut i64) {
    ffi_guard((), || {
        value_out(
            (),
            tensor_ref(t).map(|t| {
                for (i, &s) in t.strides().iter().enumerate() {
                    *out.add(i) = s;
                }
            }),
        )
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_kind(t: *mut C_tensor) -> c_int {
    ffi_guard(-1, || value_out(-1, tensor_ref(t).map(|t| t.kind().code())))
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_device(t: *mut C_tensor) -> c_int {
    ffi_guard(-1, || value_out(-1, tensor_ref(t).map(|t| t.device())))
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_requires_grad(t: *mut C_tensor) -> c_int {
    ffi_guard(0, || {
        value_out(0, tensor_ref(t).map(|t| t.requires_grad() as c_int))
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_is_contiguous(t: *mut C_tensor) -> c_int {
    ffi_guard(0, || {
        value_out(0, tensor_ref(t).map(|t| t.is_contiguous() as c_int))
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_data_ptr(t: *mut C_tensor) -> *mut c_void {
    ffi_guard(ptr::null_mut(), || {
        value_out(
            ptr::null_mut(),
            tensor_ref(t).and_then(|t| t.data_ptr()).map(|p| p as *mut c_void),
        )
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_storage_ptr(t: *mut C_tensor) -> *mut c_void {
    ffi_guard(ptr::null_mut(), || {
        value_out(
            ptr::null_mut(),
            tensor_ref(t)
                .and_then(|t| t.storage_ptr())
                .map(|p| p as *mut c_void),
        )
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_storage_offset(t: *mut C_tensor) -> i64 {
    ffi_guard(0, || value_out(0, tensor_ref(t).map(|t| t.storage_offset())))
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_nbytes(t: *mut C_tensor) -> usize {
    ffi_guard(0, || value_out(0, tensor_ref(t).map(|t| t.nbytes())))
}

// Views and copies

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_select(t: *mut C_tensor, dim: i64, index: i64) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out(tensor_ref(t).and_then(|t| t.select(dim, index)))
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_narrow(
    t: *mut C_tensor,
    dim: i64,
    start: i64,
    length: i64,
) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out(tensor_ref(t).and_then(|t| t.narrow(dim, start, length)))
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_unsqueeze(t: *mut C_tensor, dim: i64) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out(tensor_ref(t).and_then(|t| t.unsqueeze(dim)))
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_index_select(
    t: *mut C_tensor,
    dim: i64,
    index: *mut C_tensor,
) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out((|| {
            let t = tensor_ref(t)?;
            let index = tensor_ref(index)?;
            t.index_select(dim, index)
        })())
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_as_strided(
    t: *mut C_tensor,
    sizes: *const i64,
    nsizes: usize,
    strides: *const i64,
    nstrides: usize,
    offset: i64,
) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out((|| {
            let t = tensor_ref(t)?;
            t.as_strided(int_slice(sizes, nsizes)?, int_slice(strides, nstrides)?, offset)
        })())
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_copy_(dst: *mut C_tensor, src: *mut C_tensor) {
    ffi_guard((), || {
        value_out(
            (),
            tensor_ref(dst).and_then(|dst| dst.copy_from(tensor_ref(src)?)),
        )
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_fill_(t: *mut C_tensor, value: f64) {
    ffi_guard((), || {
        value_out(
            (),
            tensor_ref(t).and_then(|t| t.fill(elem_of(t.kind(), value))),
        )
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_uniform_(t: *mut C_tensor, lo: f64, hi: f64) {
    ffi_guard((), || {
        value_out((), tensor_ref(t).and_then(|t| t.uniform(lo, hi)))
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_normal_(t: *mut C_tensor, mean: f64, std: f64) {
    ffi_guard((), || {
        value_out((), tensor_ref(t).and_then(|t| t.normal(mean, std)))
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_clone(t: *mut C_tensor) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out(tensor_ref(t).and_then(|t| t.deep_clone()))
    })
}

/// A second reference to the same tensor: shared storage, grad flag and grad.
/// Shallow clones of undefined tensors are undefined.
#[no_mangle]
pub unsafe extern "C" fn vole_tensor_shallow_clone(t: *mut C_tensor) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        if t.is_null() {
            set_error("null tensor pointer");
            return ptr::null_mut();
        }
        Box::into_raw(Box::new(C_tensor {
            inner: (*t).inner.as_ref().map(Arc::clone),
        }))
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_to_device(t: *mut C_tensor, device: c_int) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out(tensor_ref(t).and_then(|t| t.to_device(device)))
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_to_kind(t: *mut C_tensor, kind: c_int) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || {
        tensor_out((|| {
            let kind = ElemKind::from_code(kind)?;
            tensor_ref(t)?.to_kind(kind)
        })())
    })
}

// Gradients

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_requires_grad_(t: *mut C_tensor, requires_grad: c_int) {
    ffi_guard((), || {
        value_out(
            (),
            tensor_ref(t).and_then(|t| t.set_requires_grad(requires_grad != 0)),
        )
    })
}

/// The accumulated gradient, or an undefined tensor when there is none.
#[no_mangle]
pub unsafe extern "C" fn vole_tensor_grad(t: *mut C_tensor) -> *mut C_tensor {
    ffi_guard(ptr::null_mut(), || match tensor_ref(t) {
        Ok(t) => Box::into_raw(Box::new(C_tensor { inner: t.grad() })),
        Err(e) => {
            set_error(e);
            ptr::null_mut()
        }
    })
}

/// Replace the gradient slot; an undefined `grad` clears it.
#[no_mangle]
pub unsafe extern "C" fn vole_tensor_set_grad(t: *mut C_tensor, grad: *mut C_tensor) {
    ffi_guard((), || {
        value_out(
            (),
            tensor_ref(t).and_then(|t| {
                let g = if grad.is_null() {
                    None
                } else {
                    (*grad).inner.as_ref().map(Arc::clone)
                };
                t.set_grad(g)
            }),
        )
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_zero_grad(t: *mut C_tensor) {
    ffi_guard((), || value_out((), tensor_ref(t).and_then(|t| t.zero_grad())))
}

// Element access

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_double_value_at(
    t: *mut C_tensor,
    index: *const i64,
    nindex: usize,
) -> f64 {
    ffi_guard(0.0, || {
        value_out(
            0.0,
            (|| -> EngineResult<f64> {
                Ok(tensor_ref(t)?.value_at(int_slice(index, nindex)?)?.as_f64())
            })(),
        )
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_int64_value_at(
    t: *mut C_tensor,
    index: *const i64,
    nindex: usize,
) -> i64 {
    ffi_guard(0, || {
        value_out(
            0,
            (|| -> EngineResult<i64> {
                Ok(tensor_ref(t)?.value_at(int_slice(index, nindex)?)?.as_i64())
            })(),
        )
    })
}

/// Copy the first `numel` elements, in row-major order, into `dst`.
#[no_mangle]
pub unsafe extern "C" fn vole_tensor_copy_data(
    t: *mut C_tensor,
    dst: *mut c_void,
    numel: usize,
    elt_size: usize,
) {
    ffi_guard((), || {
        value_out(
            (),
            (|| {
                let t = tensor_ref(t)?;
                if t.kind().size() != elt_size {
                    return Err(format!(
                        "element size {elt_size} does not match kind {:?}",
                        t.kind()
                    ));
                }
                if numel > t.numel() {
                    return Err(format!(
                        "cannot copy {numel} elements from a tensor of {}",
                        t.numel()
                    ));
                }
                if numel == 0 {
                    return Ok(());
                }
                if dst.is_null() {
                    return Err("null destination pointer".to_string());
                }
                let bytes = t.contiguous_bytes()?;
                ptr::copy_nonoverlapping(bytes.as_ptr(), dst as *mut u8, numel * elt_size);
                Ok(())
            })(),
        )
    })
}

// Multi-tensor files

#[no_mangle]
pub unsafe extern "C" fn vole_tensor_save_multi(
    tensors: *const *mut C_tensor,
    names: *const *const c_char,
    ntensors: usize,
    filename: *const c_char,
) {
    ffi_guard((), || {
        value_out(
            (),
            (|| {
                let path = c_str(filename)?;
                let mut named = Vec::with_capacity(ntensors);
                for i in 0..ntensors {
                    let name = c_str(*names.add(i))?.to_string();
                    let t = Arc::clone(tensor_ref(*tensors.add(i))?);
                    named.push((name, t));
                }
                multi::save_file(Path::new(path), &named)
            })(),
        )
    })
}

/// Load every tensor of a multi-tensor file onto `device`, handing each one
/// to `f` in file order. Ownership of the tensor passes to the callback.
#[no_mangle]
pub unsafe extern "C" fn vole_tensor_load_multi(
    filename: *const c_char,
    device: c_int,
    data: *mut c_void,
    f: extern "C" fn(*mut c_void, *const c_char, *mut C_tensor),
) {
    ffi_guard((), || {
        value_out(
            (),
            (|| {
                let path = c_str(filename)?;
                let loaded = multi::load_file(Path::new(path), device)?;
                for (name, t) in loaded {
                    let name = CString::new(name).map_err(|e| e.to_string())?;
                    let t = Box::into_raw(Box::new(C_tensor { inner: Some(t) }));
                    f(data, name.as_ptr(), t);
                }
                Ok(())
            })(),
        )
    })
}

// Scalars

#[no_mangle]
pub extern "C" fn vole_scalar_int(v: i64) -> *mut C_scalar {
    Box::into_raw(Box::new(C_scalar {
        inner: ScalarImpl(Elem::Int(v)),
    }))
}

#[no_mangle]
pub extern "C" fn vole_scalar_float(v: f64) -> *mut C_scalar {
    Box::into_raw(Box::new(C_scalar {
        inner: ScalarImpl(Elem::Float(v)),
    }))
}

unsafe fn scalar_ref<'a>(s: *mut C_scalar) -> EngineResult<&'a ScalarImpl> {
    if s.is_null() {
        return Err("null scalar pointer".to_string());
    }
    Ok(&(*s).inner)
}

#[no_mangle]
pub unsafe extern "C" fn vole_scalar_to_int(s: *mut C_scalar) -> i64 {
    ffi_guard(0, || value_out(0, scalar_ref(s).map(|s| s.to_int())))
}

#[no_mangle]
pub unsafe extern "C" fn vole_scalar_to_float(s: *mut C_scalar) -> f64 {
    ffi_guard(0.0, || value_out(0.0, scalar_ref(s).map(|s| s.to_float())))
}

/// Owned string, released with `vole_string_free`.
#[no_mangle]
pub unsafe extern "C" fn vole_scalar_to_string(s: *mut C_scalar) -> *mut c_char {
    ffi_guard(ptr::null_mut(), || {
        value_out(ptr::null_mut(), scalar_ref(s).map(|s| string_out(s.render())))
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_scalar_free(s: *mut C_scalar) {
    ffi_guard((), || {
        if !s.is_null() {
            drop(Box::from_raw(s));
        }
    })
}

// Optimizers

fn optimizer_out(r: EngineResult<Optimizer>) -> *mut C_optimizer {
    match r {
        Ok(o) => Box::into_raw(Box::new(C_optimizer { inner: o })),
        Err(e) => {
            set_error(e);
            ptr::null_mut()
        }
    }
}

unsafe fn optimizer_mut<'a>(o: *mut C_optimizer) -> EngineResult<&'a mut Optimizer> {
    if o.is_null() {
        return Err("null optimizer pointer".to_string());
    }
    Ok(&mut (*o).inner)
}

#[no_mangle]
pub extern "C" fn vole_optimizer_sgd(
    lr: f64,
    momentum: f64,
    dampening: f64,
    weight_decay: f64,
    nesterov: c_int,
) -> *mut C_optimizer {
    ffi_guard(ptr::null_mut(), || {
        optimizer_out(Optimizer::new(
            lr,
            Algorithm::Sgd {
                momentum,
                dampening,
                weight_decay,
                nesterov: nesterov != 0,
            },
        ))
    })
}

#[no_mangle]
pub extern "C" fn vole_optimizer_adam(
    lr: f64,
    beta1: f64,
    beta2: f64,
    weight_decay: f64,
    eps: f64,
) -> *mut C_optimizer {
    ffi_guard(ptr::null_mut(), || {
        optimizer_out(Optimizer::new(
            lr,
            Algorithm::Adam {
                beta1,
                beta2,
                weight_decay,
                eps,
            },
        ))
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_optimizer_add_parameters(
    o: *mut C_optimizer,
    tensors: *const *mut C_tensor,
    ntensors: usize,
) {
    ffi_guard((), || {
        value_out(
            (),
            (|| {
                let o = optimizer_mut(o)?;
                let mut params = Vec::with_capacity(ntensors);
                for i in 0..ntensors {
                    params.push(Arc::clone(tensor_ref(*tensors.add(i))?));
                }
                o.add_parameters(params)
            })(),
        )
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_optimizer_set_lr(o: *mut C_optimizer, lr: f64) {
    ffi_guard((), || value_out((), optimizer_mut(o).map(|o| o.set_lr(lr))))
}

#[no_mangle]
pub unsafe extern "C" fn vole_optimizer_get_lr(o: *mut C_optimizer) -> f64 {
    ffi_guard(0.0, || value_out(0.0, optimizer_mut(o).map(|o| o.lr())))
}

#[no_mangle]
pub unsafe extern "C" fn vole_optimizer_zero_grad(o: *mut C_optimizer) {
    ffi_guard((), || {
        value_out((), optimizer_mut(o).and_then(|o| o.zero_grad()))
    })
}

#[no_mangle]
pub unsafe extern "C" fn vole_optimizer_step(o: *mut C_optimizer) {
    ffi_guard((), || value_out((), optimizer_mut(o).and_then(|o| o.step())))
}

#[no_mangle]
pub unsafe extern "C" fn vole_optimizer_free(o: *mut C_optimizer) {
    ffi_guard((), || {
        if !o.is_null() {
            drop(Box::from_raw(o));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take_error() -> Option<String> {
        let p = vole_last_error();
        if p.is_null() {
            return None;
        }
        let s = unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned();
        unsafe { vole_string_free(p) };
        Some(s)
    }

    #[test]
    fn test_error_slot_is_drained() {
        unsafe {
            let t = vole_tensor_zeros([2i64, 3].as_ptr(), 2, 99, -1);
            assert!(t.is_null());
            let err = take_error().unwrap();
            assert!(err.contains("99"), "{err}");
            assert!(take_error().is_none());
        }
    }

    #[test]
    fn test_shallow_clone_shares_grad_flag() {
        unsafe {
            let t = vole_tensor_zeros([3i64].as_ptr(), 1, 6, -1);
            let c = vole_tensor_shallow_clone(t);
            vole_tensor_requires_grad_(t, 1);
            assert_eq!(vole_tensor_requires_grad(c), 1);
            assert_eq!(vole_tensor_data_ptr(t), vole_tensor_data_ptr(c));
            vole_tensor_free(t);
            assert_eq!(vole_tensor_nbytes(c), 12);
            vole_tensor_free(c);
            assert!(take_error().is_none());
        }
    }

    #[test]
    fn test_grad_of_fresh_tensor_is_undefined() {
        unsafe {
            let t = vole_tensor_ones([2i64].as_ptr(), 1, 6, -1);
            let g = vole_tensor_grad(t);
            assert!(!g.is_null());
            assert_eq!(vole_tensor_defined(g), 0);
            vole_tensor_free(g);
            vole_tensor_free(t);
        }
    }

    #[test]
    fn test_grad_mode_returns_previous() {
        let prev = vole_grad_set_enabled(0);
        assert_eq!(prev, 1);
        assert_eq!(vole_grad_is_enabled(), 0);
        assert_eq!(vole_grad_set_enabled(prev), 0);
    }

    #[test]
    fn test_scalar_to_string() {
        unsafe {
            let s = vole_scalar_int(45);
            let p = vole_scalar_to_string(s);
            assert_eq!(CStr::from_ptr(p).to_str().unwrap(), "45");
            vole_string_free(p);
            vole_scalar_free(s);
        }
    }

    extern "C" fn collect(data: *mut c_void, name: *const c_char, t: *mut C_tensor) {
        let out = unsafe { &mut *(data as *mut Vec<(String, *mut C_tensor)>) };
        let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
        out.push((name, t));
    }

    #[test]
    fn test_save_and_load_multi() {
        let dir = tempfile::tempdir().unwrap();
        let path = CString::new(dir.path().join("w.bin").to_str().unwrap()).unwrap();
        unsafe {
            let a = vole_tensor_arange(0.0, 4.0, 1.0, 7, -1);
            let name = CString::new("a").unwrap();
            vole_tensor_save_multi([a].as_ptr(), [name.as_ptr()].as_ptr(), 1, path.as_ptr());
            assert!(take_error().is_none());

            let mut out: Vec<(String, *mut C_tensor)> = Vec::new();
            vole_tensor_load_multi(
                path.as_ptr(),
                -1,
                &mut out as *mut _ as *mut c_void,
                collect,
            );
            assert!(take_error().is_none());
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].0, "a");
            assert_eq!(vole_tensor_double_value_at(out[0].1, [3i64].as_ptr(), 1), 3.0);
            vole_tensor_free(out[0].1);
            vole_tensor_free(a);
        }
    }
}
