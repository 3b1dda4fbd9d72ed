// Engine optimizers: SGD and Adam over registered parameter tensors
//
// An optimizer holds shallow references to its parameters together with
// per-parameter state (momentum buffers, Adam moments). `step` reads each
// parameter's gradient and writes the updated values straight into the
// parameter storage, bypassing the in-place grad check the way the native
// engine's fused kernels do. Parameters without a gradient are skipped and
// keep their state untouched.

use std::sync::Arc;

use crate::tensor::{EngineResult, TensorImpl};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Algorithm {
    Sgd {
        momentum: f64,
        dampening: f64,
        weight_decay: f64,
        nesterov: bool,
    },
    Adam {
        beta1: f64,
        beta2: f64,
        weight_decay: f64,
        eps: f64,
    },
}

#[derive(Debug, Default)]
struct ParamState {
    momentum: Option<Vec<f64>>,
    exp_avg: Option<Vec<f64>>,
    exp_avg_sq: Option<Vec<f64>>,
    steps: i32,
}

#[derive(Debug)]
pub(crate) struct Optimizer {
    lr: f64,
    algorithm: Algorithm,
    params: Vec<Arc<TensorImpl>>,
    state: Vec<ParamState>,
}

impl Optimizer {
    pub(crate) fn new(lr: f64, algorithm: Algorithm) -> EngineResult<Self> {
        if lr < 0.0 {
            return Err(format!("Invalid learning rate: {lr}"));
        }
        match algorithm {
            Algorithm::Sgd {
                momentum,
                dampening,
                nesterov,
                ..
            } => {
                if momentum < 0.0 {
                    return Err(format!("Invalid momentum value: {momentum}"));
                }
                if nesterov && (momentum <= 0.0 || dampening != 0.0) {
                    return Err(
                        "Nesterov momentum requires a momentum and zero dampening".to_string()
                    );
                }
            }
            Algorithm::Adam { beta1, beta2, eps, .. } => {
                if !(0.0..1.0).contains(&beta1) || !(0.0..1.0).contains(&beta2) {
                    return Err(format!("Invalid beta parameters: ({beta1}, {beta2})"));
                }
                if eps < 0.0 {
                    return Err(format!("Invalid epsilon value: {eps}"));
                }
            }
        }
        Ok(Optimizer {
            lr,
            algorithm,
            params: Vec::new(),
            state: Vec::new(),
        })
    }

    pub(crate) fn add_parameters(&mut self, params: Vec<Arc<TensorImpl>>) -> EngineResult<()> {
        for p in params {
            if !p.kind().is_float() {
                return Err(format!(
                    "optimizer can only optimize floating point tensors, got {:?}",
                    p.kind()
                ));
            }
            self.params.push(p);
            self.state.push(ParamState::default());
        }
        Ok(())
    }

    pub(crate) fn lr(&self) -> f64 {
        self.lr
    }

    pub(crate) fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    pub(crate) fn zero_grad(&self) -> EngineResult<()> {
        for p in &self.params {
            p.zero_grad()?;
        }
        Ok(())
    }

    pub(crate) fn step(&mut self) -> EngineResult<()> {
        for (param, state) in self.params.iter().zip(self.state.iter_mut()) {
            let grad = match param.grad() {
                Some(g) => g.to_f64s()?,
                None => continue,
            };
            let mut values = param.to_f64s()?;
            if grad.len() != values.len() {
                return Err(format!(
                    "gradient has {} elements but parameter has {}",
                    grad.len(),
                    values.len()
                ));
            }
            match self.algorithm {
                Algorithm::Sgd {
                    momentum,
                    dampening,
                    weight_decay,
                    nesterov,
                } => sgd_update(
                    &mut values,
                    grad,
                    state,
                    self.lr,
                    momentum,
                    dampening,
                    weight_decay,
                    nesterov,
                ),
                Algorithm::Adam {
                    beta1,
                    beta2,
                    weight_decay,
                    eps,
                } => adam_update(
                    &mut values,
                    grad,
                    state,
                    self.lr,
                    beta1,
                    beta2,
                    weight_decay,
                    eps,
                ),
            }
            param.assign_f64s(&values)?;
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn sgd_update(
    values: &mut [f64],
    mut grad: Vec<f64>,
    state: &mut ParamState,
    lr: f64,
    momentum: f64,
    dampening: f64,
    weight_decay: f64,
    nesterov: bool,
) {
    if weight_decay != 0.0 {
        for (g, p) in grad.iter_mut().zip(values.iter()) {
            *g += weight_decay * p;
        }
    }
    if momentum != 0.0 {
        match state.momentum.as_mut() {
            Some(buf) => {
                for (b, g) in buf.iter_mut().zip(grad.iter()) {
                    *b = momentum * *b + (1.0 - dampening) * g;
                }
            }
            None => state.momentum = Some(grad.clone()),
        }
        if let Some(buf) = &state.momentum {
            if nesterov {
                for (g, b) in grad.iter_mut().zip(buf.iter()) {
                    *g += momentum * b;
                }
            } else {
                grad.copy_from_slice(buf);
            }
        }
    }
    for (p, g) in values.iter_mut().zip(grad.iter()) {
        *p -= lr * g;
    }
}

#[allow(clippy::too_many_arguments)]
fn adam_update(
    values: &mut [f64],
    mut grad: Vec<f64>,
    state: &mut ParamState,
    lr: f64,
    beta1: f64,
    beta2: f64,
    weight_decay: f64,
    eps: f64,
) {
    if weight_decay != 0.0 {
        for (g, p) in grad.iter_mut().zip(values.iter()) {
            *g += weight_decay * p;
        }
    }
    state.steps += 1;
    let n = grad.len();
    let m = state.exp_avg.get_or_insert_with(|| vec![0.0; n]);
    for (m, g) in m.iter_mut().zip(grad.iter()) {
        *m = beta1 * *m + (1.0 - beta1) * g;
    }
    let v = state.exp_avg_sq.get_or_insert_with(|| vec![0.0; n]);
    for (v, g) in v.iter_mut().zip(grad.iter()) {
        *v = beta2 * *v + (1.0 - beta2) * g * g;
    }
    let bias1 = 1.0 - beta1.powi(state.steps);
    let bias2 = 1.0 - beta2.powi(state.steps);
    let (m, v) = match (&state.exp_avg, &state.exp_avg_sq) {
        (Some(m), Some(v)) => (m, v),
        _ => return,
    };
    for ((p, m), v) in values.iter_mut().zip(m.iter()).zip(v.iter()) {
        let m_hat = m / bias1;
        let v_hat = v / bias2;
        *p -= lr * m_hat / (v_hat.sqrt() + eps);
    }
}
