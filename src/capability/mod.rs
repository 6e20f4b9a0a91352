//! Compute device and interpreter discovery
//!
//! Nothing here depends on a running job; probes can be repeated at any time.

pub mod device;
pub mod interpreter;
pub mod probe;

pub use device::{parse_device_token, select_device, Backend, Device, AUTO_TOKEN};
pub use interpreter::{
    InterpreterCandidate, InterpreterOrigin, InterpreterResolver, UserPathPolicy,
};
pub use probe::{
    parse_device_listing, BackendProbe, CapabilityProbe, CapabilityReport, DeviceListing,
    MpsProbe, NvidiaSmiProbe, ProbeConfig, ProbeFailure, RocmInfoProbe,
};
