//! Interface to the device that executes the loopback kernel.
//!
//! Device discovery, context and queue creation, and program build all
//! happen when a backend is constructed. The driver only needs the narrow
//! per-block surface below.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::str::FromStr;

use crate::{ProbeError, ProbeResult};

/// Coarse device classifier used to pick a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceType {
    /// Dedicated accelerator card (`acc`).
    #[default]
    Accelerator,
    /// Graphics processor (`gpu`).
    Gpu,
    /// Host CPU exposed as a compute device (`cpu`).
    Cpu,
}

impl FromStr for DeviceType {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acc" => Ok(DeviceType::Accelerator),
            "gpu" => Ok(DeviceType::Gpu),
            "cpu" => Ok(DeviceType::Cpu),
            other => Err(ProbeError::InvalidDeviceType(other.to_string())),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceType::Accelerator => "acc",
            DeviceType::Gpu => "gpu",
            DeviceType::Cpu => "cpu",
        })
    }
}

/// Access the device has to an imported buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAccess {
    /// The kernel reads it.
    ReadOnly,
    /// The kernel writes it.
    WriteOnly,
}

/// A span of host memory handed to the device without a copy.
///
/// The region only describes memory; it does not keep it alive. Whoever
/// imports it must keep the backing slice borrowed until the device buffer
/// has been released (see [`crate::binding::DeviceBinding`]).
#[derive(Debug, Clone, Copy)]
pub struct HostRegion<'a> {
    ptr: NonNull<u8>,
    len: usize,
    access: MemAccess,
    _borrow: PhantomData<&'a [u8]>,
}

impl<'a> HostRegion<'a> {
    /// Region the device may write through.
    pub fn writable(slice: &'a mut [u8]) -> Self {
        let len = slice.len();
        HostRegion {
            ptr: NonNull::from(slice).cast(),
            len,
            access: MemAccess::WriteOnly,
            _borrow: PhantomData,
        }
    }

    /// Region the device may only read.
    pub fn readable(slice: &'a [u8]) -> Self {
        HostRegion {
            ptr: NonNull::from(slice).cast(),
            len: slice.len(),
            access: MemAccess::ReadOnly,
            _borrow: PhantomData,
        }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn access(&self) -> MemAccess {
        self.access
    }
}

/// NDRange shape of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    /// Total work-items.
    pub global: usize,
    /// Work-group size, or `None` to let the runtime choose.
    pub local: Option<usize>,
}

/// Device-side operations needed to run one block through the kernel.
///
/// Calls are made from a single thread in a fixed order per block:
/// import both buffers, set arguments 0 and 1, enqueue, finish, map the
/// write target, then release both buffers.
pub trait Accelerator {
    /// Handle to one device-visible buffer.
    type Buffer;

    /// Create a device buffer backed directly by `region`.
    ///
    /// # Safety
    ///
    /// The memory behind `region` must stay valid, and must not be accessed
    /// through any other path while the device may write it, until the
    /// returned buffer is passed to [`release_buffer`](Self::release_buffer).
    unsafe fn import_buffer(&self, region: HostRegion<'_>) -> ProbeResult<Self::Buffer>;

    /// Bind `buffer` as kernel argument `index`.
    fn set_buffer_arg(&self, index: u32, buffer: &Self::Buffer) -> ProbeResult<()>;

    /// Submit one kernel dispatch.
    fn enqueue(&self, work: WorkSize) -> ProbeResult<()>;

    /// Block until all submitted work has completed.
    fn finish(&self) -> ProbeResult<()>;

    /// Make the device's writes to `buffer` visible in its host memory.
    fn map_read(&self, buffer: &Self::Buffer) -> ProbeResult<()>;

    /// Release a buffer created by [`import_buffer`](Self::import_buffer).
    fn release_buffer(&self, buffer: Self::Buffer) -> ProbeResult<()>;
}
