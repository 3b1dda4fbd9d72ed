// Learning-rate schedulers
//
// Each scheduler captures the optimizer's learning rate when created (the
// base rate) and, on every `step`, computes the rate for the next epoch in
// closed form and writes it to the optimizer.
//
//   StepLr             base * gamma^(epoch / step_size)
//   MultiStepLr        base * gamma^(milestones passed)
//   ExponentialLr      base * gamma^epoch
//   CosineAnnealingLr  eta_min + (base - eta_min) * (1 + cos(pi * epoch / t_max)) / 2

use std::f64::consts::PI;

use vole_core::{Error, Result};

use crate::optimizer::Optimizer;

/// Adjusts the learning rate of an [`Optimizer`] once per epoch.
pub trait LrScheduler {
    /// The rate for `epoch`, where epoch 0 is the base rate.
    fn lr_at(&self, epoch: usize) -> f64;

    /// Epochs stepped so far.
    fn epoch(&self) -> usize;

    fn set_epoch(&mut self, epoch: usize);

    /// Advance one epoch and update the optimizer.
    fn step(&mut self, opt: &mut Optimizer) -> Result<()> {
        let epoch = self.epoch() + 1;
        self.set_epoch(epoch);
        opt.set_lr(self.lr_at(epoch))
    }

    /// The rate most recently applied.
    fn last_lr(&self) -> f64 {
        self.lr_at(self.epoch())
    }
}

macro_rules! epoch_accessors {
    () => {
        fn epoch(&self) -> usize {
            self.epoch
        }

        fn set_epoch(&mut self, epoch: usize) {
            self.epoch = epoch;
        }
    };
}

/// Decay by `gamma` every `step_size` epochs.
#[derive(Debug, Clone)]
pub struct StepLr {
    base_lr: f64,
    step_size: usize,
    gamma: f64,
    epoch: usize,
}

impl StepLr {
    pub fn new(opt: &Optimizer, step_size: usize, gamma: f64) -> Result<StepLr> {
        if step_size == 0 {
            return Err(Error::msg("StepLr: step_size must be positive"));
        }
        Ok(StepLr {
            base_lr: opt.lr()?,
            step_size,
            gamma,
            epoch: 0,
        })
    }
}

impl LrScheduler for StepLr {
    fn lr_at(&self, epoch: usize) -> f64 {
        self.base_lr * self.gamma.powi((epoch / self.step_size) as i32)
    }

    epoch_accessors!();
}

/// Decay by `gamma` at each milestone epoch.
#[derive(Debug, Clone)]
pub struct MultiStepLr {
    base_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
    epoch: usize,
}

impl MultiStepLr {
    pub fn new(opt: &Optimizer, milestones: &[usize], gamma: f64) -> Result<MultiStepLr> {
        let mut milestones = milestones.to_vec();
        milestones.sort_unstable();
        Ok(MultiStepLr {
            base_lr: opt.lr()?,
            milestones,
            gamma,
            epoch: 0,
        })
    }
}

impl LrScheduler for MultiStepLr {
    fn lr_at(&self, epoch: usize) -> f64 {
        let passed = self.milestones.iter().filter(|&&m| m <= epoch).count();
        self.base_lr * self.gamma.powi(passed as i32)
    }

    epoch_accessors!();
}

/// Decay by `gamma` every epoch.
#[derive(Debug, Clone)]
pub struct ExponentialLr {
    base_lr: f64,
    gamma: f64,
    epoch: usize,
}

impl ExponentialLr {
    pub fn new(opt: &Optimizer, gamma: f64) -> Result<ExponentialLr> {
        Ok(ExponentialLr {
            base_lr: opt.lr()?,
            gamma,
            epoch: 0,
        })
    }
}

impl LrScheduler for ExponentialLr {
    fn lr_at(&self, epoch: usize) -> f64 {
        self.base_lr * self.gamma.powi(epoch as i32)
    }

    epoch_accessors!();
}

/// Half-cosine from the base rate down to `eta_min` over `t_max` epochs.
///
/// Past `t_max` the rate climbs back up, following the same cosine.
#[derive(Debug, Clone)]
pub struct CosineAnnealingLr {
    base_lr: f64,
    t_max: usize,
    eta_min: f64,
    epoch: usize,
}

impl CosineAnnealingLr {
    pub fn new(opt: &Optimizer, t_max: usize, eta_min: f64) -> Result<CosineAnnealingLr> {
        if t_max == 0 {
            return Err(Error::msg("CosineAnnealingLr: t_max must be positive"));
        }
        Ok(CosineAnnealingLr {
            base_lr: opt.lr()?,
            t_max,
            eta_min,
            epoch: 0,
        })
    }
}

impl LrScheduler for CosineAnnealingLr {
    fn lr_at(&self, epoch: usize) -> f64 {
        let progress = epoch as f64 / self.t_max as f64;
        self.eta_min + (self.base_lr - self.eta_min) * (1.0 + (PI * progress).cos()) / 2.0
    }

    epoch_accessors!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{OptimizerConfig, Sgd};
    use crate::var_store::VarStore;
    use vole_core::Device;

    fn optimizer(vs: &VarStore, lr: f64) -> Optimizer {
        Sgd::default().build(vs, lr).unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_step_lr() {
        let vs = VarStore::new(Device::Cpu);
        let mut opt = optimizer(&vs, 1.0);
        let mut s = StepLr::new(&opt, 2, 0.5).unwrap();
        let mut seen = vec![];
        for _ in 0..5 {
            s.step(&mut opt).unwrap();
            seen.push(opt.lr().unwrap());
        }
        assert_eq!(seen, vec![1.0, 0.5, 0.5, 0.25, 0.25]);
        assert_eq!(s.last_lr(), 0.25);
    }

    #[test]
    fn test_multi_step_lr() {
        let vs = VarStore::new(Device::Cpu);
        let mut opt = optimizer(&vs, 1.0);
        let mut s = MultiStepLr::new(&opt, &[3, 1], 0.1).unwrap();
        s.step(&mut opt).unwrap();
        assert!(close(opt.lr().unwrap(), 0.1));
        s.step(&mut opt).unwrap();
        assert!(close(opt.lr().unwrap(), 0.1));
        s.step(&mut opt).unwrap();
        assert!(close(opt.lr().unwrap(), 0.01));
    }

    #[test]
    fn test_exponential_lr() {
        let vs = VarStore::new(Device::Cpu);
        let mut opt = optimizer(&vs, 2.0);
        let mut s = ExponentialLr::new(&opt, 0.5).unwrap();
        s.step(&mut opt).unwrap();
        s.step(&mut opt).unwrap();
        assert!(close(opt.lr().unwrap(), 0.5));
    }

    #[test]
    fn test_cosine_annealing() {
        let vs = VarStore::new(Device::Cpu);
        let mut opt = optimizer(&vs, 1.0);
        let mut s = CosineAnnealingLr::new(&opt, 4, 0.0).unwrap();
        assert!(close(s.last_lr(), 1.0));
        s.step(&mut opt).unwrap();
        s.step(&mut opt).unwrap();
        assert!(close(opt.lr().unwrap(), 0.5));
        s.step(&mut opt).unwrap();
        s.step(&mut opt).unwrap();
        assert!(close(opt.lr().unwrap(), 0.0));
    }

    #[test]
    fn test_rejects_zero_periods() {
        let vs = VarStore::new(Device::Cpu);
        let opt = optimizer(&vs, 1.0);
        assert!(StepLr::new(&opt, 0, 0.5).is_err());
        assert!(CosineAnnealingLr::new(&opt, 0, 0.0).is_err());
    }
}
