//! Compute devices and device tokens
//!
//! A [`Device`] is enumerated fresh on every probe. Only the user's *choice*
//! (a device token such as `cuda:1`) is ever persisted.

use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StemwerkError};

/// Token the worker understands as "pick the best device yourself".
pub const AUTO_TOKEN: &str = "auto";

/// Compute backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Cpu,
    Cuda,
    Rocm,
    DirectMl,
    Mps,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Cpu => "cpu",
            Backend::Cuda => "cuda",
            Backend::Rocm => "rocm",
            Backend::DirectMl => "directml",
            Backend::Mps => "mps",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Some(Backend::Cpu),
            "cuda" | "nvidia" => Some(Backend::Cuda),
            "rocm" | "hip" => Some(Backend::Rocm),
            "directml" | "dml" => Some(Backend::DirectMl),
            "mps" | "metal" => Some(Backend::Mps),
            _ => None,
        }
    }

    /// Returns true for GPU-class backends.
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, Backend::Cpu)
    }

    /// Whether the backend addresses devices by index.
    fn is_indexed(&self) -> bool {
        matches!(self, Backend::Cuda | Backend::Rocm | Backend::DirectMl)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One compute target found by a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub backend: Backend,
    pub index: u32,
    pub display_name: String,
    pub available: bool,
}

impl Device {
    /// The CPU device. Always present, always available.
    pub fn cpu() -> Self {
        Self {
            backend: Backend::Cpu,
            index: 0,
            display_name: "CPU".to_string(),
            available: true,
        }
    }

    pub fn new(backend: Backend, index: u32, display_name: impl Into<String>) -> Self {
        Self {
            backend,
            index,
            display_name: display_name.into(),
            available: true,
        }
    }

    /// A backend entry that was detected but cannot be used.
    pub fn unavailable(backend: Backend, index: u32, reason: impl Into<String>) -> Self {
        Self {
            backend,
            index,
            display_name: reason.into(),
            available: false,
        }
    }

    /// Identity of this device, independent of how the worker addresses it.
    pub fn id(&self) -> String {
        if self.backend.is_indexed() {
            format!("{}:{}", self.backend, self.index)
        } else {
            self.backend.to_string()
        }
    }

    /// Token passed to the worker via `--device`.
    ///
    /// ROCm builds of torch expose AMD GPUs through the CUDA interface.
    pub fn worker_token(&self) -> String {
        match self.backend {
            Backend::Cpu => "cpu".to_string(),
            Backend::Mps => "mps".to_string(),
            Backend::Cuda | Backend::Rocm => format!("cuda:{}", self.index),
            Backend::DirectMl => format!("directml:{}", self.index),
        }
    }

    /// Label shown in device pickers, e.g. `cuda:0 (NVIDIA GeForce RTX 4090)`.
    pub fn label(&self) -> String {
        if self.backend == Backend::Cpu {
            self.display_name.clone()
        } else {
            format!("{} ({})", self.id(), self.display_name)
        }
    }
}

/// Parse a device token into its backend and index.
///
/// Accepts `cpu`, `mps`, `cuda:N`, `rocm:N`, `directml` and `directml:N`.
/// Whitespace after the colon is tolerated (`cuda: 1`). `auto` is not a
/// concrete device and is rejected here; see [`select_device`].
pub fn parse_device_token(token: &str) -> Result<(Backend, u32)> {
    let invalid = || StemwerkError::InvalidDeviceToken {
        token: token.to_string(),
    };

    let trimmed = token.trim();
    let (name, index) = match trimmed.split_once(':') {
        Some((name, index)) => {
            let index: u32 = index.trim().parse().map_err(|_| invalid())?;
            (name.trim(), Some(index))
        }
        None => (trimmed, None),
    };

    let backend = Backend::parse(name).ok_or_else(invalid)?;
    match (backend.is_indexed(), index) {
        (true, index) => Ok((backend, index.unwrap_or(0))),
        (false, None) | (false, Some(0)) => Ok((backend, 0)),
        (false, Some(_)) => Err(invalid()),
    }
}

/// Choose the device for a job from a probe result and the requested token.
///
/// Never fails: whatever was requested, the worst case is the CPU.
pub fn select_device(devices: &[Device], requested: &str) -> Device {
    let usable = || devices.iter().filter(|d| d.available);
    let requested = requested.trim();

    if requested.is_empty() || requested.eq_ignore_ascii_case(AUTO_TOKEN) {
        return usable()
            .find(|d| d.backend.is_accelerator())
            .cloned()
            .unwrap_or_else(Device::cpu);
    }

    let (backend, index) = match parse_device_token(requested) {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!("Unrecognised device '{}', using CPU", requested);
            return Device::cpu();
        }
    };

    if backend == Backend::Cpu {
        return Device::cpu();
    }

    if let Some(exact) = usable().find(|d| d.backend == backend && d.index == index) {
        return exact.clone();
    }

    // ROCm GPUs are requested as cuda:N
    if backend == Backend::Cuda {
        if let Some(rocm) = usable().find(|d| d.backend == Backend::Rocm && d.index == index) {
            return rocm.clone();
        }
        if let Some(fallback) =
            usable().find(|d| matches!(d.backend, Backend::Cuda | Backend::Rocm))
        {
            warn!(
                "Requested device '{}' not available; falling back to {}",
                requested,
                fallback.id()
            );
            return fallback.clone();
        }
    }

    warn!("Requested device '{}' not available, using CPU", requested);
    Device::cpu()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_gpu_machine() -> Vec<Device> {
        vec![
            Device::cpu(),
            Device::new(Backend::Cuda, 0, "RX 9070"),
            Device::new(Backend::Cuda, 1, "780M"),
        ]
    }

    #[test]
    fn test_parse_device_tokens() {
        assert_eq!(parse_device_token("cpu").unwrap(), (Backend::Cpu, 0));
        assert_eq!(parse_device_token("cuda:1").unwrap(), (Backend::Cuda, 1));
        assert_eq!(parse_device_token("cuda: 1").unwrap(), (Backend::Cuda, 1));
        assert_eq!(parse_device_token("directml").unwrap(), (Backend::DirectMl, 0));
        assert_eq!(parse_device_token("directml:2").unwrap(), (Backend::DirectMl, 2));
        assert_eq!(parse_device_token("MPS").unwrap(), (Backend::Mps, 0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_device_token("tpu:0").is_err());
        assert!(parse_device_token("cuda:x").is_err());
        assert!(parse_device_token("mps:3").is_err());
        assert!(parse_device_token("auto").is_err());
    }

    #[test]
    fn test_worker_tokens() {
        assert_eq!(Device::cpu().worker_token(), "cpu");
        assert_eq!(Device::new(Backend::Rocm, 1, "gfx1103").worker_token(), "cuda:1");
        assert_eq!(Device::new(Backend::DirectMl, 0, "DirectML GPU 0").worker_token(), "directml:0");
        assert_eq!(Device::new(Backend::Mps, 0, "Apple MPS").worker_token(), "mps");
    }

    #[test]
    fn test_select_auto_prefers_accelerator() {
        let selected = select_device(&two_gpu_machine(), "auto");
        assert_eq!(selected.id(), "cuda:0");
    }

    #[test]
    fn test_select_auto_on_cpu_only_machine() {
        let selected = select_device(&[Device::cpu()], "auto");
        assert_eq!(selected.backend, Backend::Cpu);
    }

    #[test]
    fn test_select_exact_match() {
        let selected = select_device(&two_gpu_machine(), "cuda:1");
        assert_eq!(selected.display_name, "780M");
    }

    #[test]
    fn test_select_missing_cuda_index_falls_back_to_first_cuda() {
        let selected = select_device(&two_gpu_machine(), "cuda:7");
        assert_eq!(selected.id(), "cuda:0");
    }

    #[test]
    fn test_select_skips_unavailable_devices() {
        let devices = vec![
            Device::cpu(),
            Device::unavailable(Backend::Cuda, 0, "rocBLAS missing gfx1103"),
        ];
        assert_eq!(select_device(&devices, "cuda:0").backend, Backend::Cpu);
        assert_eq!(select_device(&devices, "auto").backend, Backend::Cpu);
    }

    #[test]
    fn test_select_unknown_token_uses_cpu() {
        assert_eq!(select_device(&two_gpu_machine(), "quantum").backend, Backend::Cpu);
    }
}
