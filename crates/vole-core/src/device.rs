use std::fmt;

use crate::error::{Error, Result};

/// Where a tensor's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    /// GPU by ordinal.
    Cuda(usize),
}

impl Device {
    /// The engine's device code: -1 for the CPU, the ordinal for a GPU.
    pub fn c_int(self) -> i32 {
        match self {
            Device::Cpu => -1,
            Device::Cuda(n) => n as i32,
        }
    }

    pub fn from_c_int(v: i32) -> Result<Device> {
        match v {
            -1 => Ok(Device::Cpu),
            n if n >= 0 => Ok(Device::Cuda(n as usize)),
            _ => Err(Error::msg(format!("unknown device code {v}"))),
        }
    }

    /// First GPU when the engine reports one, the CPU otherwise.
    pub fn cuda_if_available() -> Device {
        if cuda_device_count() > 0 {
            Device::Cuda(0)
        } else {
            Device::Cpu
        }
    }

    pub fn is_cuda(self) -> bool {
        matches!(self, Device::Cuda(_))
    }

    /// Parse a pickle storage location such as `cpu` or `cuda:1`.
    pub fn from_location(location: &str) -> Result<Device> {
        match location {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda(0)),
            _ => location
                .strip_prefix("cuda:")
                .and_then(|n| n.parse::<usize>().ok())
                .map(Device::Cuda)
                .ok_or_else(|| Error::msg(format!("unknown storage location {location:?}"))),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(n) => write!(f, "cuda:{n}"),
        }
    }
}

/// Number of GPUs the engine can use.
pub fn cuda_device_count() -> usize {
    vole_sys::vole_cuda_device_count().max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(Device::from_c_int(-1).unwrap(), Device::Cpu);
        assert_eq!(Device::from_c_int(2).unwrap(), Device::Cuda(2));
        assert_eq!(Device::Cuda(1).c_int(), 1);
        assert!(Device::from_c_int(-5).is_err());
    }

    #[test]
    fn test_locations() {
        assert_eq!(Device::from_location("cpu").unwrap(), Device::Cpu);
        assert_eq!(Device::from_location("cuda:3").unwrap(), Device::Cuda(3));
        assert!(Device::from_location("tpu").is_err());
    }

    #[test]
    fn test_cpu_only_engine() {
        assert_eq!(Device::cuda_if_available(), Device::Cpu);
        assert_eq!(Device::Cuda(0).to_string(), "cuda:0");
    }
}
