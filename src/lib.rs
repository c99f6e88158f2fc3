//! Loopback probe for compute accelerators.
//!
//! Generates a host dataset, slices it into fixed-size blocks, and pushes
//! each block through a loopback kernel on the device: bind host memory,
//! dispatch, wait, map the result back, and compare it byte-for-byte with
//! the reference. The run stops at the first bad block.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌──────────────┐
//! │   Dataset    │────▶│  DeviceBinding   │────▶│  Accelerator │
//! │ ref / output │     │  (one block)     │     │  loopback    │
//! └──────────────┘     └──────────────────┘     └──────┬───────┘
//!        ▲                                             │
//!        └──────────── map back + compare ◀────────────┘
//! ```
//!
//! The device backend is pluggable through [`accelerator::Accelerator`].
//! [`host::HostAccelerator`] emulates the device on host memory; the
//! OpenCL backend is only available with the `opencl` feature:
//! ```bash
//! cargo build --features opencl
//! ```

pub mod accelerator;
pub mod binding;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod host;
pub mod logging;
pub mod timer;

#[cfg(feature = "opencl")]
pub mod opencl;

use std::path::PathBuf;

use thiserror::Error;

/// Error types for probe operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProbeError {
    /// The device type string is not one of `gpu`, `cpu` or `acc`.
    #[error("incorrect platform specified: {0:?}")]
    InvalidDeviceType(String),
    /// A configuration or dataset precondition does not hold.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Host memory for the dataset could not be reserved.
    #[error("failed to allocate {bytes} bytes of host memory")]
    Allocation { bytes: usize },
    /// No device of the requested type could provide a command queue.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    /// The kernel source file could not be read.
    #[error("failed to read kernel source {path:?}")]
    KernelSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Program build or kernel lookup failed.
    #[error("kernel build failed: {0}")]
    KernelBuild(String),
    /// The accelerator runtime returned a non-success status.
    #[error("{op} failed: {status}")]
    Runtime { op: &'static str, status: String },
    /// The data mapped back from the device differs from the reference.
    #[error("incorrect data from kernel in block {block}")]
    DataMismatch {
        block: usize,
        output: Vec<u8>,
        reference: Vec<u8>,
    },
}

impl ProbeError {
    /// Shorthand for a runtime failure of operation `op`.
    pub fn runtime(op: &'static str, status: impl std::fmt::Display) -> Self {
        Self::Runtime {
            op,
            status: status.to_string(),
        }
    }

    /// Process exit code for this failure.
    ///
    /// Device acquisition failures exit with 255 before any dispatch; every
    /// other failure is a failed run and exits with 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::DeviceUnavailable(_) => 255,
            _ => 1,
        }
    }
}

pub type ProbeResult<T> = Result<T, ProbeError>;
