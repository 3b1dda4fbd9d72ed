// Variable initialization
//
// An Init describes how a new variable is filled. The variable store calls
// f_init when a path creates a variable; Init::set re-fills an existing
// tensor in place.
//
//   Const(v)               every element = v
//   Uniform { lo, up }     U(lo, up)
//   Randn { mean, stdev }  N(mean, stdev)
//   KaimingUniform         U(-b, b), b = sqrt(3 * gain^2 / fan_in), gain^2 = 2
//   Orthogonal { gain }    gain * Q, Q from the QR decomposition of a N(0, 1)
//                          matrix with rows = dims[0], cols = prod(dims[1..])
//
// Orthogonal matrices are built on the host in f64 and then converted to the
// requested kind and device.

use vole_core::{no_grad, Device, Error, Kind, Result, Tensor};

/// How a variable is filled at creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    /// Every element set to the same value.
    Const(f64),

    /// Uniform distribution on `[lo, up)`.
    Uniform { lo: f64, up: f64 },

    /// Normal distribution.
    Randn { mean: f64, stdev: f64 },

    /// He uniform initialization for layers followed by a ReLU.
    KaimingUniform,

    /// Semi-orthogonal matrix scaled by `gain`. Needs at least two dimensions.
    Orthogonal { gain: f64 },
}

pub const DEFAULT_KAIMING_UNIFORM: Init = Init::KaimingUniform;

/// Compute (fan_in, fan_out) from a shape.
///
/// - For 1-D: fan_in = fan_out = dims[0]
/// - For 2-D: fan_in = dims[1], fan_out = dims[0]
/// - For 3-D+: fan_in = dims[1] * product(dims[2..]),
///   fan_out = dims[0] * product(dims[2..])
pub(crate) fn compute_fans(dims: &[i64]) -> (f64, f64) {
    match dims.len() {
        0 => (1.0, 1.0),
        1 => (dims[0] as f64, dims[0] as f64),
        2 => (dims[1] as f64, dims[0] as f64),
        _ => {
            let receptive_field: i64 = dims[2..].iter().product();
            let fan_in = dims[1] as f64 * receptive_field as f64;
            let fan_out = dims[0] as f64 * receptive_field as f64;
            (fan_in, fan_out)
        }
    }
}

fn kaiming_bound(dims: &[i64]) -> f64 {
    let (fan_in, _) = compute_fans(dims);
    let gain_sq = 2.0;
    (3.0 * gain_sq / fan_in.max(1.0)).sqrt()
}

/// Row-major `rows x cols` matrix with orthonormal rows (rows <= cols) or
/// orthonormal columns (rows > cols), scaled by `gain`.
fn orthogonal_matrix(rows: usize, cols: usize, gain: f64) -> Result<Vec<f64>> {
    // Gram-Schmidt runs over the columns of a tall n x m matrix.
    let transposed = rows < cols;
    let (n, m) = if transposed { (cols, rows) } else { (rows, cols) };
    let normal = Tensor::randn(&[n as i64, m as i64], (Kind::Double, Device::Cpu))?;
    let mut a = normal.to_vec::<f64>()?;

    for j in 0..m {
        for k in 0..j {
            let dot: f64 = (0..n).map(|i| a[i * m + j] * a[i * m + k]).sum();
            for i in 0..n {
                a[i * m + j] -= dot * a[i * m + k];
            }
        }
        let norm = (0..n).map(|i| a[i * m + j] * a[i * m + j]).sum::<f64>().sqrt();
        if norm < f64::EPSILON {
            return Err(Error::msg("orthogonal init: rank-deficient random matrix"));
        }
        for i in 0..n {
            a[i * m + j] /= norm;
        }
    }

    let mut out = vec![0.0; rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            let v = if transposed { a[c * m + r] } else { a[r * m + c] };
            out[r * cols + c] = gain * v;
        }
    }
    Ok(out)
}

fn orthogonal(dims: &[i64], gain: f64, options: (Kind, Device)) -> Result<Tensor> {
    if dims.len() < 2 {
        return Err(Error::msg(format!(
            "orthogonal init needs at least 2 dimensions, got {dims:?}"
        )));
    }
    let rows = dims[0] as usize;
    let cols = dims[1..].iter().product::<i64>() as usize;
    let values = orthogonal_matrix(rows, cols, gain)?;
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    let t = Tensor::from_data_size(&bytes, dims, Kind::Double)?;
    let (kind, device) = options;
    let t = t.to_kind(kind)?.to_device(device)?;
    Ok(t)
}

/// A fresh tensor of shape `dims` filled according to `i`.
pub fn f_init(i: Init, dims: &[i64], device: Device, kind: Kind) -> Result<Tensor> {
    let options = (kind, device);
    match i {
        Init::Const(v) if v == 0.0 => Tensor::zeros(dims, options),
        Init::Const(v) if v == 1.0 => Tensor::ones(dims, options),
        Init::Const(v) => Tensor::full(dims, v, options),
        Init::Uniform { lo, up } => {
            let mut t = Tensor::empty(dims, options)?;
            t.uniform_(lo, up)?;
            Ok(t)
        }
        Init::Randn { mean, stdev } => {
            let mut t = Tensor::empty(dims, options)?;
            t.normal_(mean, stdev)?;
            Ok(t)
        }
        Init::KaimingUniform => {
            let bound = kaiming_bound(dims);
            let mut t = Tensor::empty(dims, options)?;
            t.uniform_(-bound, bound)?;
            Ok(t)
        }
        Init::Orthogonal { gain } => orthogonal(dims, gain, options),
    }
}

/// [`f_init`] for `f32` tensors.
pub fn init(i: Init, dims: &[i64], device: Device) -> Result<Tensor> {
    f_init(i, dims, device, Kind::Float)
}

impl Init {
    /// Re-initialize `tensor` in place, keeping its shape, kind and device.
    ///
    /// Runs with grad mode off, so parameters that require grad can be
    /// re-initialized.
    pub fn set(self, tensor: &mut Tensor) -> Result<()> {
        no_grad(|| match self {
            Init::Const(v) => tensor.fill_(v),
            Init::Uniform { lo, up } => tensor.uniform_(lo, up),
            Init::Randn { mean, stdev } => tensor.normal_(mean, stdev),
            Init::KaimingUniform => {
                let bound = kaiming_bound(&tensor.size()?);
                tensor.uniform_(-bound, bound)
            }
            Init::Orthogonal { gain } => {
                let src = orthogonal(&tensor.size()?, gain, (Kind::Double, Device::Cpu))?;
                tensor.copy_(&src)
            }
        })
    }
}
