//! Run configuration and derived sizes.

use std::path::PathBuf;

use crate::accelerator::{DeviceType, WorkSize};
use crate::{ProbeError, ProbeResult};

/// Name of the kernel entry point looked up in the program.
pub const KERNEL_NAME: &str = "loopback";

/// Default kernel source file.
pub const DEFAULT_KERNEL_FILE: &str = "kernel.cl";

/// Default number of blocks.
pub const DEFAULT_BLOCK_COUNT: usize = 1600;

/// Default work-items per dispatch. Also the work-group size on
/// accelerator devices.
pub const DEFAULT_WORK_GROUP_SIZE: usize = 128;

/// Bytes each work-item copies (must match the kernel).
pub const DEFAULT_BYTES_PER_WORK_ITEM: usize = 64;

/// Options for one probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Which class of device to run on.
    pub device_type: DeviceType,
    /// Path of the kernel source file.
    pub kernel_file: PathBuf,
    /// Kernel entry point.
    pub kernel_name: String,
    /// Options passed to the program build.
    pub compile_options: String,
    /// Accepted for compatibility; the dispatch loop does not use it.
    pub iterations: u32,
    /// Number of blocks to push through the kernel.
    pub block_count: usize,
    /// Work-items per dispatch.
    pub work_group_size: usize,
    /// Bytes copied by each work-item.
    pub bytes_per_work_item: usize,
    /// Accepted for compatibility; the dispatch loop does not use it.
    pub verbose: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            device_type: DeviceType::default(),
            kernel_file: PathBuf::from(DEFAULT_KERNEL_FILE),
            kernel_name: KERNEL_NAME.to_string(),
            compile_options: String::new(),
            iterations: 5,
            block_count: DEFAULT_BLOCK_COUNT,
            work_group_size: DEFAULT_WORK_GROUP_SIZE,
            bytes_per_work_item: DEFAULT_BYTES_PER_WORK_ITEM,
            verbose: false,
        }
    }
}

impl ProbeConfig {
    /// Check that the derived sizes are usable.
    pub fn validate(&self) -> ProbeResult<()> {
        if self.kernel_name.is_empty() {
            return Err(ProbeError::InvalidConfig("kernel name is empty".into()));
        }
        if self.work_group_size == 0 || self.bytes_per_work_item == 0 {
            return Err(ProbeError::InvalidConfig(
                "work-group size and bytes per work-item must be non-zero".into(),
            ));
        }
        self.dataset_len().map(|_| ())
    }

    /// Bytes per block: one dispatch's worth of work-items.
    pub fn block_len(&self) -> usize {
        self.bytes_per_work_item.saturating_mul(self.work_group_size)
    }

    /// Total bytes in each dataset buffer.
    pub fn dataset_len(&self) -> ProbeResult<usize> {
        self.bytes_per_work_item
            .checked_mul(self.work_group_size)
            .and_then(|block| block.checked_mul(self.block_count))
            .ok_or_else(|| {
                ProbeError::InvalidConfig(format!(
                    "{} blocks of {} x {} bytes overflow the address space",
                    self.block_count, self.work_group_size, self.bytes_per_work_item
                ))
            })
    }

    /// NDRange used for every block.
    ///
    /// Accelerators get an explicit work-group size; other device types let
    /// the runtime choose.
    pub fn work_size(&self) -> WorkSize {
        WorkSize {
            global: self.work_group_size,
            local: (self.device_type == DeviceType::Accelerator).then_some(self.work_group_size),
        }
    }
}
