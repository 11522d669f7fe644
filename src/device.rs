//! # Device Selection
//!
//! Picks the compute device the Whisper backend is loaded on. GPU backends only
//! succeed when candle was built with the matching feature; everything else
//! falls back to the CPU.

use candle_core::Device;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Cached result of automatic detection
static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

/// Device preference from `models.device`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Best available device
    #[default]
    Auto,
    Cpu,
    /// CUDA GPU, CPU if unavailable
    Cuda,
    /// Metal GPU, CPU if unavailable
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

pub struct DeviceManager;

impl DeviceManager {
    /// Resolve a configured preference string, treating unknown values as `auto`.
    pub fn from_preference(preference: &str) -> Device {
        match preference.parse::<DevicePreference>() {
            Ok(preference) => Self::get_device(preference),
            Err(e) => {
                warn!(error = %e, "Falling back to automatic device selection");
                Self::best_device()
            }
        }
    }

    pub fn get_device(preference: DevicePreference) -> Device {
        match preference {
            DevicePreference::Auto => Self::best_device(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Self::cuda().unwrap_or(Device::Cpu),
            DevicePreference::Metal => Self::metal().unwrap_or(Device::Cpu),
        }
    }

    fn best_device() -> Device {
        BEST_DEVICE
            .get_or_init(|| {
                let device = Self::cuda().or_else(Self::metal).unwrap_or(Device::Cpu);
                info!(device = Self::describe(&device), "Selected inference device");
                device
            })
            .clone()
    }

    fn cuda() -> Option<Device> {
        Device::new_cuda(0)
            .map_err(|e| debug!(error = %e, "CUDA not available"))
            .ok()
    }

    fn metal() -> Option<Device> {
        Device::new_metal(0)
            .map_err(|e| debug!(error = %e, "Metal not available"))
            .ok()
    }

    pub fn describe(device: &Device) -> &'static str {
        match device {
            Device::Cpu => "cpu",
            Device::Cuda(_) => "cuda",
            Device::Metal(_) => "metal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("metal".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_cpu_preference_is_cpu() {
        let device = DeviceManager::from_preference("cpu");
        assert!(matches!(device, Device::Cpu));
        assert_eq!(DeviceManager::describe(&device), "cpu");
    }

    #[test]
    fn test_unknown_preference_still_yields_device() {
        let device = DeviceManager::from_preference("quantum");
        assert!(!DeviceManager::describe(&device).is_empty());
    }
}
