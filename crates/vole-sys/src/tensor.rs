use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use libc::c_int;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::kind::{read_elem, write_elem, Elem, ElemKind};
use crate::layout::{wrap_dim, Layout};

// TensorImpl: the reference CPU engine behind the C ABI
//
// A tensor implementation is a layout laid over a shared byte storage:
//
//   storage: Arc<RwLock<Vec<u8>>>   raw little-endian elements
//   layout:  shape + strides + offset (in elements)
//   kind:    element type of every element in the storage
//
// The C ABI hands out `C_tensor` boxes holding an Arc<TensorImpl>. Two boxes
// holding the same Arc are shallow clones: they share storage, the grad flag
// and the accumulated gradient. Views (select, narrow, unsqueeze, as_strided)
// build a new TensorImpl over the same storage; writes through one view are
// visible through every other.
//
// There is no autograd here. `requires_grad` is a flag, gradients are set
// explicitly, and the in-place rule of the native engine is enforced: a tensor
// that requires grad cannot be written in place while grad mode is on.

pub(crate) type EngineResult<T> = std::result::Result<T, String>;

pub(crate) const CPU: c_int = -1;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Current grad mode of the calling thread.
pub(crate) fn grad_enabled() -> bool {
    GRAD_ENABLED.with(|g| g.get())
}

/// Set grad mode for the calling thread, returning the previous mode.
pub(crate) fn set_grad_enabled(enabled: bool) -> bool {
    GRAD_ENABLED.with(|g| g.replace(enabled))
}

static RNG: Lazy<Mutex<StdRng>> = Lazy::new(|| Mutex::new(StdRng::from_entropy()));

pub(crate) fn manual_seed(seed: u64) {
    *RNG.lock().unwrap_or_else(|e| e.into_inner()) = StdRng::seed_from_u64(seed);
}

fn with_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> T {
    let mut rng = RNG.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut rng)
}

/// Box-Muller transform; one standard normal sample per call.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

pub(crate) fn check_device(device: c_int) -> EngineResult<c_int> {
    if device == CPU {
        Ok(CPU)
    } else if device >= 0 {
        Err(format!(
            "Cannot access cuda:{device}: CUDA is not available in this build"
        ))
    } else {
        Err(format!("invalid device code {device}"))
    }
}

fn check_shape(shape: &[i64]) -> EngineResult<()> {
    if let Some(d) = shape.iter().find(|&&d| d < 0) {
        return Err(format!("negative dimension {d} in shape {shape:?}"));
    }
    Ok(())
}

pub(crate) struct TensorImpl {
    storage: Arc<RwLock<Vec<u8>>>,
    layout: Layout,
    kind: ElemKind,
    device: c_int,
    requires_grad: AtomicBool,
    grad: Mutex<Option<Arc<TensorImpl>>>,
}

impl std::fmt::Debug for TensorImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorImpl")
            .field("shape", &self.layout.shape())
            .field("kind", &self.kind)
            .field("requires_grad", &self.requires_grad())
            .finish()
    }
}

impl TensorImpl {
    fn with_layout(
        storage: Arc<RwLock<Vec<u8>>>,
        layout: Layout,
        kind: ElemKind,
        device: c_int,
        requires_grad: bool,
    ) -> Arc<Self> {
        Arc::new(TensorImpl {
            storage,
            layout,
            kind,
            device,
            requires_grad: AtomicBool::new(requires_grad),
            grad: Mutex::new(None),
        })
    }

    /// Contiguous tensor owning `bytes`.
    pub(crate) fn from_bytes(
        bytes: Vec<u8>,
        shape: &[i64],
        kind: ElemKind,
        device: c_int,
    ) -> EngineResult<Arc<Self>> {
        check_shape(shape)?;
        let device = check_device(device)?;
        let layout = Layout::contiguous(shape);
        let expected = layout.numel() * kind.size();
        if bytes.len() != expected {
            return Err(format!(
                "expected {expected} bytes for shape {shape:?} of kind {:?}, got {}",
                kind,
                bytes.len()
            ));
        }
        Ok(Self::with_layout(
            Arc::new(RwLock::new(bytes)),
            layout,
            kind,
            device,
            false,
        ))
    }

    fn from_elems(
        elems: impl Iterator<Item = Elem>,
        shape: &[i64],
        kind: ElemKind,
        device: c_int,
    ) -> EngineResult<Arc<Self>> {
        check_shape(shape)?;
        let numel = Layout::contiguous(shape).numel();
        let mut bytes = vec![0u8; numel * kind.size()];
        for (chunk, e) in bytes.chunks_exact_mut(kind.size()).zip(elems) {
            write_elem(kind, chunk, e);
        }
        Self::from_bytes(bytes, shape, kind, device)
    }

    pub(crate) fn full(
        shape: &[i64],
        value: Elem,
        kind: ElemKind,
        device: c_int,
    ) -> EngineResult<Arc<Self>> {
        Self::from_elems(std::iter::repeat(value), shape, kind, device)
    }

    pub(crate) fn arange(
        start: f64,
        end: f64,
        step: f64,
        kind: ElemKind,
        device: c_int,
    ) -> EngineResult<Arc<Self>> {
        if step == 0.0 {
            return Err("arange: step must be nonzero".to_string());
        }
        if (end - start) / step < 0.0 {
            return Err(format!(
                "arange: upper bound and larger bound inconsistent with step sign (start {start}, end {end}, step {step})"
            ));
        }
        let n = ((end - start) / step).ceil() as i64;
        let values = (0..n).map(|i| elem_for(kind, start + i as f64 * step));
        Self::from_elems(values, &[n], kind, device)
    }

    pub(crate) fn linspace(
        start: f64,
        end: f64,
        steps: i64,
        kind: ElemKind,
        device: c_int,
    ) -> EngineResult<Arc<Self>> {
        if steps < 0 {
            return Err(format!("linspace: number of steps must be non-negative, got {steps}"));
        }
        let delta = if steps > 1 {
            (end - start) / (steps - 1) as f64
        } else {
            0.0
        };
        let values = (0..steps).map(|i| elem_for(kind, start + i as f64 * delta));
        Self::from_elems(values, &[steps], kind, device)
    }

    pub(crate) fn randn(shape: &[i64], kind: ElemKind, device: c_int) -> EngineResult<Arc<Self>> {
        if !kind.is_float() {
            return Err(format!("randn: expected a floating point kind, got {kind:?}"));
        }
        check_shape(shape)?;
        let numel = Layout::contiguous(shape).numel();
        let values: Vec<Elem> =
            with_rng(|rng| (0..numel).map(|_| Elem::Float(standard_normal(rng))).collect());
        Self::from_elems(values.into_iter(), shape, kind, device)
    }

    pub(crate) fn rand(shape: &[i64], kind: ElemKind, device: c_int) -> EngineResult<Arc<Self>> {
        if !kind.is_float() {
            return Err(format!("rand: expected a floating point kind, got {kind:?}"));
        }
        check_shape(shape)?;
        let numel = Layout::contiguous(shape).numel();
        let values: Vec<Elem> =
            with_rng(|rng| (0..numel).map(|_| Elem::Float(rng.gen::<f64>())).collect());
        Self::from_elems(values.into_iter(), shape, kind, device)
    }

    pub(crate) fn randint(
        low: i64,
        high: i64,
        shape: &[i64],
        kind: ElemKind,
        device: c_int,
    ) -> EngineResult<Arc<Self>> {
        if low >= high {
            return Err(format!("randint: expected low < high, got low={low} high={high}"));
        }
        check_shape(shape)?;
        let numel = Layout::contiguous(shape).numel();
        let values: Vec<Elem> =
            with_rng(|rng| (0..numel).map(|_| Elem::Int(rng.gen_range(low..high))).collect());
        Self::from_elems(values.into_iter(), shape, kind, device)
    }

    // Queries

    pub(crate) fn shape(&self) -> &[i64] {
        self.layout.shape()
    }

    pub(crate) fn strides(&self) -> &[i64] {
        self.layout.strides()
    }

    pub(crate) fn dim(&self) -> usize {
        self.layout.rank()
    }

    pub(crate) fn numel(&self) -> usize {
        self.layout.numel()
    }

    pub(crate) fn kind(&self) -> ElemKind {
        self.kind
    }

    pub(crate) fn device(&self) -> c_int {
        self.device
    }

    pub(crate) fn storage_offset(&self) -> i64 {
        self.layout.offset()
    }

    pub(crate) fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    pub(crate) fn requires_grad(&self) -> bool {
        self.requires_grad.load(Ordering::SeqCst)
    }

    pub(crate) fn nbytes(&self) -> usize {
        self.numel() * self.kind.size()
    }

    fn read_storage(&self) -> EngineResult<RwLockReadGuard<'_, Vec<u8>>> {
        self.storage
            .read()
            .map_err(|_| "storage lock poisoned".to_string())
    }

    fn write_storage(&self) -> EngineResult<RwLockWriteGuard<'_, Vec<u8>>> {
        self.storage
            .write()
            .map_err(|_| "storage lock poisoned".to_string())
    }

    /// Address of the first element of the storage.
    pub(crate) fn storage_ptr(&self) -> EngineResult<*mut u8> {
        let guard = self.read_storage()?;
        Ok(guard.as_ptr() as *mut u8)
    }

    /// Address of the element at this tensor's storage offset.
    pub(crate) fn data_ptr(&self) -> EngineResult<*mut u8> {
        let base = self.storage_ptr()?;
        let byte_offset = self.layout.offset() as usize * self.kind.size();
        Ok(base.wrapping_add(byte_offset))
    }

    /// All elements in row-major logical order.
    pub(crate) fn elems(&self) -> EngineResult<Vec<Elem>> {
        let guard = self.read_storage()?;
        let size = self.kind.size();
        Ok(self
            .layout
            .strided_indices()
            .map(|i| read_elem(self.kind, &guard[i * size..]))
            .collect())
    }

    /// Row-major copy of the element bytes.
    pub(crate) fn contiguous_bytes(&self) -> EngineResult<Vec<u8>> {
        let guard = self.read_storage()?;
        let size = self.kind.size();
        let mut out = Vec::with_capacity(self.nbytes());
        for i in self.layout.strided_indices() {
            out.extend_from_slice(&guard[i * size..(i + 1) * size]);
        }
        Ok(out)
    }

    // Views

    fn view(self: &Arc<Self>, layout: Layout) -> Arc<Self> {
        Self::with_layout(
            Arc::clone(&self.storage),
            layout,
            self.kind,
            self.device,
            self.requires_grad(),
        )
    }

    pub(crate) fn select(self: &Arc<Self>, dim: i64, index: i64) -> EngineResult<Arc<Self>> {
        Ok(self.view(self.layout.select(dim, index)?))
    }

    pub(crate) fn narrow(
        self: &Arc<Self>,
        dim: i64,
        start: i64,
        length: i64,
    ) -> EngineResult<Arc<Self>> {
        Ok(self.view(self.layout.narrow(dim, start, length)?))
    }

    pub(crate) fn unsqueeze(self: &Arc<Self>, dim: i64) -> EngineResult<Arc<Self>> {
        Ok(self.view(self.layout.unsqueeze(dim)?))
    }

    pub(crate) fn as_strided(
        self: &Arc<Self>,
        shape: &[i64],
        strides: &[i64],
        offset: i64,
    ) -> EngineResult<Arc<Self>> {
        if shape.len() != strides.len() {
            return Err(format!(
                "mismatch in length of strides and shape ({} vs {})",
                strides.len(),
                shape.len()
            ));
        }
        check_shape(shape)?;
        if offset < 0 {
            return Err(format!("as_strided: negative storage offset {offset}"));
        }
        let layout = Layout::new(shape.to_vec(), strides.to_vec(), offset);
        let storage_len = (self.read_storage()?.len() / self.kind.size()) as i64;
        if let Some(hi) = layout.max_offset() {
            if layout.min_offset() < 0 || hi >= storage_len {
                return Err(format!(
                    "setStorage: sizes {shape:?}, strides {strides:?}, storage offset {offset} \
                     are out of bounds for storage of {storage_len} elements"
                ));
            }
        }
        Ok(self.view(layout))
    }

    /// Gather along `dim`; the result owns fresh storage.
    pub(crate) fn index_select(
        self: &Arc<Self>,
        dim: i64,
        index: &TensorImpl,
    ) -> EngineResult<Arc<Self>> {
        if !matches!(
            index.kind,
            ElemKind::I8 | ElemKind::I16 | ElemKind::I32 | ElemKind::I64
        ) {
            return Err(format!(
                "index_select(): Expected dtype int32 or int64 for index, got {:?}",
                index.kind
            ));
        }
        if index.dim() > 1 {
            return Err("index_select(): Index is supposed to be a vector".to_string());
        }
        if self.dim() == 0 {
            return Err("index_select(): cannot be applied to a 0-dim tensor".to_string());
        }
        let d = wrap_dim(dim, self.dim())?;
        let size = self.shape()[d];
        let positions = index
            .elems()?
            .into_iter()
            .map(|e| {
                let i = e.as_i64();
                if i < 0 || i >= size {
                    Err(format!("index out of range in self: {i} for size {size}"))
                } else {
                    Ok(i)
                }
            })
            .collect::<EngineResult<Vec<i64>>>()?;

        let mut out_shape = self.shape().to_vec();
        out_shape[d] = positions.len() as i64;
        let out_layout = Layout::contiguous(&out_shape);
        let size_of = self.kind.size();
        let guard = self.read_storage()?;
        let mut bytes = Vec::with_capacity(out_layout.numel() * size_of);
        let mut coords = vec![0i64; out_shape.len()];
        for _ in 0..out_layout.numel() {
            let mut src = self.layout.offset();
            for (axis, &c) in coords.iter().enumerate() {
                let c = if axis == d { positions[c as usize] } else { c };
                src += c * self.strides()[axis];
            }
            let src = src as usize * size_of;
            bytes.extend_from_slice(&guard[src..src + size_of]);
            for axis in (0..coords.len()).rev() {
                coords[axis] += 1;
                if coords[axis] < out_shape[axis] {
                    break;
                }
                coords[axis] = 0;
            }
        }
        drop(guard);
        let out = Self::from_bytes(bytes, &out_shape, self.kind, self.device)?;
        out.requires_grad.store(self.requires_grad(), Ordering::SeqCst);
        Ok(out)
    }

    // In-place writes

    fn check_inplace(&self) -> EngineResult<()> {
        if self.requires_grad() && grad_enabled() {
            return Err(
                "a leaf Variable that requires grad is being used in an in-place operation."
                    .to_string(),
            );
        }
        Ok(())
    }

    fn write_elems(&self, values: impl Iterator<Item = Elem>) -> EngineResult<()> {
        let mut guard = self.write_storage()?;
        let size = self.kind.size();
        for (i, v) in self.layout.strided_indices().zip(values) {
            write_elem(self.kind, &mut guard[i * size..], v);
        }
        Ok(())
    }

    /// Copy `src` into `self`, broadcasting `src` and converting its kind.
    pub(crate) fn copy_from(&self, src: &TensorImpl) -> EngineResult<()> {
        self.check_inplace()?;
        let src_layout = broadcast_layout(&src.layout, self.shape())?;
        let values: Vec<Elem> = {
            let guard = src.read_storage()?;
            let size = src.kind.size();
            src_layout
                .strided_indices()
                .map(|i| read_elem(src.kind, &guard[i * size..]))
                .collect()
        };
        self.write_elems(values.into_iter())
    }

    pub(crate) fn fill(&self, value: Elem) -> EngineResult<()> {
        self.check_inplace()?;
        self.write_elems(std::iter::repeat(value))
    }

    pub(crate) fn uniform(&self, lo: f64, hi: f64) -> EngineResult<()> {
        self.check_inplace()?;
        if lo > hi {
            return Err(format!("uniform_ expects from <= to, but got from={lo} to={hi}"));
        }
        let values: Vec<Elem> = with_rng(|rng| {
            (0..self.numel())
                .map(|_| Elem::Float(lo + (hi - lo) * rng.gen::<f64>()))
                .collect()
        });
        self.write_elems(values.into_iter())
    }

    pub(crate) fn normal(&self, mean: f64, std: f64) -> EngineResult<()> {
        self.check_inplace()?;
        if std < 0.0 {
            return Err(format!("normal_ expects std >= 0.0, but found std {std}"));
        }
        let values: Vec<Elem> = with_rng(|rng| {
            (0..self.numel())
                .map(|_| Elem::Float(mean + std * standard_normal(rng)))
                .collect()
        });
        self.write_elems(values.into_iter())
    }

    // Copies and conversions

    /// Contiguous deep copy; keeps the grad flag.
    pub(crate) fn deep_clone(&self) -> EngineResult<Arc<Self>> {
        let bytes = self.contiguous_bytes()?;
        let out = Self::from_bytes(bytes, self.shape(), self.kind, self.device)?;
        out.requires_grad.store(self.requires_grad(), Ordering::SeqCst);
        Ok(out)
    }

    /// Same tensor when `kind` already matches, otherwise a converted copy.
    pub(crate) fn to_kind(self: &Arc<Self>, kind: ElemKind) -> EngineResult<Arc<Self>> {
        if kind == self.kind {
            return Ok(Arc::clone(self));
        }
        let values = self.elems()?;
        let out = Self::from_elems(values.into_iter(), self.shape(), kind, self.device)?;
        if kind.is_float() {
            out.requires_grad.store(self.requires_grad(), Ordering::SeqCst);
        }
        Ok(out)
    }

    pub(crate) fn to_device(self: &Arc<Self>, device: c_int) -> EngineResult<Arc<Self>> {
        let device = check_device(device)?;
        if device == self.device {
            return Ok(Arc::clone(self));
        }
        Err(format!("cannot move tensor to device {device}"))
    }

    pub(crate) fn set_requires_grad(&self, requires_grad: bool) -> EngineResult<()> {
        if requires_grad && !self.kind.is_float() {
            return Err(format!(
                "only Tensors of floating point dtype can require gradients, got {:?}",
                self.kind
            ));
        }
        self.requires_grad.store(requires_grad, Ordering::SeqCst);
        Ok(())
    }

    // Gradients

    pub(crate) fn grad(&self) -> Option<Arc<TensorImpl>> {
        self.grad
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(Arc::clone)
    }

    pub(crate) fn set_grad(&self, grad: Option<Arc<TensorImpl>>) -> EngineResult<()> {
        if let Some(g) = &grad {
            if g.shape() != self.shape() {
                return Err(format!(
                    "assigned grad has data of a different size: {:?} vs {:?}",
                    g.shape(),
                    self.shape()
                ));
            }
        }
        *self.grad.lock().unwrap_or_else(|e| e.into_inner()) = grad;
        Ok(())
    }

    pub(crate) fn zero_grad(&self) -> EngineResult<()> {
        if let Some(g) = self.grad() {
            g.write_elems(std::iter::repeat(Elem::Float(0.0)))?;
        }
        Ok(())
    }

    /// Element at a full multi-index (negative coordinates wrap).
    pub(crate) fn value_at(&self, index: &[i64]) -> EngineResult<Elem> {
        if index.len() != self.dim() {
            return Err(format!(
                "expected {} indexes for a tensor of rank {}, got {}",
                self.dim(),
                self.dim(),
                index.len()
            ));
        }
        let mut pos = self.layout.offset();
        for (axis, (&i, &size)) in index.iter().zip(self.shape()).enumerate() {
            let i = if i < 0 { i + size } else { i };
            if i < 0 || i >= size {
                return Err(format!(
                    "index {i} is out of bounds for dimension {axis} with size {size}"
                ));
            }
            pos += i * self.strides()[axis];
        }
        let guard = self.read_storage()?;
        let size = self.kind.size();
        Ok(read_elem(self.kind, &guard[pos as usize * size..]))
    }

    /// Float view of the elements, used by the optimizers.
    pub(crate) fn to_f64s(&self) -> EngineResult<Vec<f64>> {
        Ok(self.elems()?.into_iter().map(Elem::as_f64).collect())
    }

    /// Overwrite every element regardless of grad mode.
    pub(crate) fn assign_f64s(&self, values: &[f64]) -> EngineResult<()> {
        if values.len() != self.numel() {
            return Err(format!(
                "expected {} values, got {}",
                self.numel(),
                values.len()
            ));
        }
        self.write_elems(values.iter().map(|&v| Elem::Float(v)))
    }
}

fn elem_for(kind: ElemKind, value: f64) -> Elem {
    if kind.is_float() {
        Elem::Float(value)
    } else {
        Elem::Int(value as i64)
    }
}

/// Layout reading `src` as if expanded to `target` shape.
fn broadcast_layout(src: &Layout, target: &[i64]) -> EngineResult<Layout> {
    if src.rank() > target.len() {
        return Err(format!(
            "the size of tensor a ({:?}) must match the size of tensor b ({:?})",
            target,
            src.shape()
        ));
    }
    let lead = target.len() - src.rank();
    let mut strides = vec![0i64; target.len()];
    for (i, (&s, &st)) in src.shape().iter().zip(src.strides()).enumerate() {
        let t = target[lead + i];
        if s == t {
            strides[lead + i] = st;
        } else if s == 1 {
            strides[lead + i] = 0;
        } else {
            return Err(format!(
                "The size of tensor a ({t}) must match the size of tensor b ({s}) at non-singleton dimension {}",
                lead + i
            ));
        }
    }
    Ok(Layout::new(target.to_vec(), strides, src.offset()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(n: i64, kind: ElemKind) -> Arc<TensorImpl> {
        TensorImpl::arange(0.0, n as f64, 1.0, kind, CPU).unwrap()
    }

    #[test]
    fn test_views_share_storage() {
        let t = range(6, ElemKind::F32).as_strided(&[2, 3], &[3, 1], 0).unwrap();
        let row = t.select(0, 1).unwrap();
        assert_eq!(row.storage_ptr().unwrap(), t.storage_ptr().unwrap());
        row.fill(Elem::Float(9.0)).unwrap();
        let values: Vec<f64> = t.to_f64s().unwrap();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 9.0, 9.0, 9.0]);
    }

    #[test]
    fn test_index_select_copies() {
        let t = range(6, ElemKind::I64).as_strided(&[2, 3], &[3, 1], 0).unwrap();
        let idx = TensorImpl::from_elems(
            [Elem::Int(2), Elem::Int(0)].into_iter(),
            &[2],
            ElemKind::I64,
            CPU,
        )
        .unwrap();
        let g = t.index_select(1, &idx).unwrap();
        assert_eq!(g.shape(), &[2, 2]);
        assert_ne!(g.storage_ptr().unwrap(), t.storage_ptr().unwrap());
        let values: Vec<i64> = g.elems().unwrap().into_iter().map(Elem::as_i64).collect();
        assert_eq!(values, vec![2, 0, 5, 3]);
    }

    #[test]
    fn test_inplace_on_leaf_requires_no_grad() {
        let t = TensorImpl::full(&[2], Elem::Float(0.0), ElemKind::F32, CPU).unwrap();
        t.set_requires_grad(true).unwrap();
        assert!(t.fill(Elem::Float(1.0)).is_err());
        let prev = set_grad_enabled(false);
        assert!(t.fill(Elem::Float(1.0)).is_ok());
        set_grad_enabled(prev);
        assert_eq!(t.to_f64s().unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_copy_broadcasts_and_converts() {
        let dst = TensorImpl::full(&[2, 2], Elem::Int(0), ElemKind::I32, CPU).unwrap();
        let src = TensorImpl::arange(1.0, 3.0, 1.0, ElemKind::F64, CPU).unwrap();
        dst.copy_from(&src).unwrap();
        let values: Vec<i64> = dst.elems().unwrap().into_iter().map(Elem::as_i64).collect();
        assert_eq!(values, vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_self_copy_does_not_deadlock() {
        let t = range(4, ElemKind::F32);
        t.copy_from(&t).unwrap();
        assert_eq!(t.to_f64s().unwrap(), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_requires_grad_needs_float() {
        let t = range(3, ElemKind::I64);
        assert!(t.set_requires_grad(true).is_err());
        assert!(t.set_requires_grad(false).is_ok());
    }

    #[test]
    fn test_as_strided_bounds() {
        let t = range(6, ElemKind::F32);
        assert!(t.as_strided(&[2, 2], &[2, 1], 2).is_ok());
        assert!(t.as_strided(&[2, 3], &[3, 1], 1).is_err());
    }

    #[test]
    fn test_seeded_randn_is_reproducible() {
        manual_seed(42);
        let a = TensorImpl::randn(&[8], ElemKind::F64, CPU).unwrap().to_f64s().unwrap();
        manual_seed(42);
        let b = TensorImpl::randn(&[8], ElemKind::F64, CPU).unwrap().to_f64s().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_cuda_is_unavailable() {
        let t = range(2, ElemKind::F32);
        assert!(t.to_device(0).is_err());
        assert!(t.to_device(CPU).is_ok());
    }
}
