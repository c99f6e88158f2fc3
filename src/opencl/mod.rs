//! OpenCL backend for the loopback probe.
//!
//! Implements [`Accelerator`] on top of `opencl3`. Each block's host ranges
//! are wrapped with `CL_MEM_USE_HOST_PTR`, so the device reads and writes
//! the dataset in place and no explicit transfers are issued.
//!
//! # Feature Gate
//!
//! This module is only available when compiled with the `opencl` feature:
//! ```bash
//! cargo build --features opencl
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! # #[cfg(feature = "opencl")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use clprobe::config::ProbeConfig;
//! use clprobe::dataset::Dataset;
//! use clprobe::driver::PipelineDriver;
//! use clprobe::opencl::OpenClAccelerator;
//!
//! let config = ProbeConfig::default();
//! let accel = OpenClAccelerator::from_config(&config)?;
//! println!("Using device: {}", accel.device_name());
//!
//! let mut data = Dataset::new(config.dataset_len()?, config.block_len())?;
//! data.generate_time_seeded();
//! let report = PipelineDriver::new(&accel, config.work_size()).run(&mut data)?;
//! println!("{} s", report.total_secs());
//! # Ok(())
//! # }
//! ```

use crate::accelerator::{Accelerator, DeviceType, HostRegion, MemAccess, WorkSize};
use crate::config::ProbeConfig;
use crate::{ProbeError, ProbeResult};

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{
    get_all_devices, Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU,
};
use opencl3::kernel::Kernel;
use opencl3::memory::{
    release_mem_object, Buffer, ClMem, CL_MAP_READ, CL_MEM_READ_ONLY, CL_MEM_USE_HOST_PTR,
    CL_MEM_WRITE_ONLY,
};
use opencl3::program::Program;
use opencl3::types::{cl_device_type, cl_mem, CL_BLOCKING};

use std::ptr;

/// Embedded reference loopback kernel, 64 bytes per work-item.
pub const LOOPBACK_KERNEL_SOURCE: &str = include_str!("../../kernels/loopback.cl");

/// OpenCL device-type bitfield for a [`DeviceType`].
fn cl_device_type_of(device_type: DeviceType) -> cl_device_type {
    match device_type {
        DeviceType::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
        DeviceType::Gpu => CL_DEVICE_TYPE_GPU,
        DeviceType::Cpu => CL_DEVICE_TYPE_CPU,
    }
}

/// Device buffer wrapping a host range.
pub struct OpenClBuffer {
    mem: Buffer<u8>,
    len: usize,
}

impl std::fmt::Debug for OpenClBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClBuffer")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Device, context, queue and compiled loopback kernel.
///
/// Note: `Debug` is implemented manually because the OpenCL handle
/// types from `opencl3` don't implement `Debug`.
pub struct OpenClAccelerator {
    _device: Device,
    context: Context,
    queue: CommandQueue,
    _program: Program,
    kernel: Kernel,
    /// Device name for diagnostics.
    device_name: String,
}

impl std::fmt::Debug for OpenClAccelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClAccelerator")
            .field("device_name", &self.device_name)
            .finish_non_exhaustive()
    }
}

impl OpenClAccelerator {
    /// Acquire a device of the configured type and build the kernel from
    /// the configured source file.
    pub fn from_config(config: &ProbeConfig) -> ProbeResult<Self> {
        let source =
            std::fs::read_to_string(&config.kernel_file).map_err(|source| {
                ProbeError::KernelSource {
                    path: config.kernel_file.clone(),
                    source,
                }
            })?;
        Self::with_source(
            config.device_type,
            &source,
            &config.kernel_name,
            &config.compile_options,
        )
    }

    /// Acquire the first device of `device_type` and build `kernel_name`
    /// from `source`.
    ///
    /// Returns [`ProbeError::DeviceUnavailable`] when no such device exists
    /// or it cannot provide a context and queue.
    pub fn with_source(
        device_type: DeviceType,
        source: &str,
        kernel_name: &str,
        compile_options: &str,
    ) -> ProbeResult<Self> {
        let ids = get_all_devices(cl_device_type_of(device_type)).map_err(|e| {
            ProbeError::DeviceUnavailable(format!("no {device_type} device: {e}"))
        })?;
        let id = ids
            .first()
            .copied()
            .ok_or_else(|| ProbeError::DeviceUnavailable(format!("no {device_type} device")))?;

        let device = Device::new(id);
        let device_name = device.name().unwrap_or_default().trim().to_string();
        tracing::info!(device = %device_name, %device_type, "selected OpenCL device");

        let context = Context::from_device(&device).map_err(|e| {
            ProbeError::DeviceUnavailable(format!("context creation failed: {e}"))
        })?;
        // Use the OpenCL 1.2 API so older accelerator runtimes work too.
        #[allow(deprecated)]
        let queue = CommandQueue::create_default(&context, 0).map_err(|e| {
            ProbeError::DeviceUnavailable(format!("command queue creation failed: {e}"))
        })?;

        let program = Program::create_and_build_from_source(&context, source, compile_options)
            .map_err(ProbeError::KernelBuild)?;
        let kernel = Kernel::create(&program, kernel_name)
            .map_err(|e| ProbeError::KernelBuild(format!("kernel {kernel_name:?}: {e}")))?;

        Ok(OpenClAccelerator {
            _device: device,
            context,
            queue,
            _program: program,
            kernel,
            device_name,
        })
    }

    /// Return the name of the selected compute device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl Accelerator for OpenClAccelerator {
    type Buffer = OpenClBuffer;

    unsafe fn import_buffer(&self, region: HostRegion<'_>) -> ProbeResult<OpenClBuffer> {
        let access = match region.access() {
            MemAccess::WriteOnly => CL_MEM_WRITE_ONLY,
            MemAccess::ReadOnly => CL_MEM_READ_ONLY,
        };
        let mem = Buffer::<u8>::create(
            &self.context,
            access | CL_MEM_USE_HOST_PTR,
            region.len(),
            region.as_ptr().cast(),
        )
        .map_err(|e| ProbeError::runtime("clCreateBuffer", e))?;
        Ok(OpenClBuffer {
            mem,
            len: region.len(),
        })
    }

    fn set_buffer_arg(&self, index: u32, buffer: &OpenClBuffer) -> ProbeResult<()> {
        let mem: cl_mem = buffer.mem.get();
        // SAFETY: the argument is a live cl_mem handle, matching the
        // kernel's `__global` pointer parameters.
        unsafe { self.kernel.set_arg(index, &mem) }
            .map_err(|e| ProbeError::runtime("clSetKernelArg", e))
    }

    fn enqueue(&self, work: WorkSize) -> ProbeResult<()> {
        let global = [work.global];
        let local = work.local.map(|l| [l]);
        let local_ptr = local.as_ref().map_or(ptr::null(), |l| l.as_ptr());
        // SAFETY: the size arrays outlive the call and have work_dim = 1
        // entries each.
        unsafe {
            self.queue.enqueue_nd_range_kernel(
                self.kernel.get(),
                1,
                ptr::null(),
                global.as_ptr(),
                local_ptr,
                &[],
            )
        }
        .map_err(|e| ProbeError::runtime("clEnqueueNDRangeKernel", e))?;
        Ok(())
    }

    fn finish(&self) -> ProbeResult<()> {
        self.queue
            .finish()
            .map_err(|e| ProbeError::runtime("clFinish", e))
    }

    fn map_read(&self, buffer: &OpenClBuffer) -> ProbeResult<()> {
        let mut mapped: cl_mem = ptr::null_mut();
        // SAFETY: blocking map of the whole buffer; the mapping is undone
        // below before the handle can be released.
        unsafe {
            self.queue
                .enqueue_map_buffer(
                    &buffer.mem,
                    CL_BLOCKING,
                    CL_MAP_READ,
                    0,
                    buffer.len,
                    &mut mapped,
                    &[],
                )
                .map_err(|e| ProbeError::runtime("clEnqueueMapBuffer", e))?;
            let event = self
                .queue
                .enqueue_unmap_mem_object(buffer.mem.get(), mapped, &[])
                .map_err(|e| ProbeError::runtime("clEnqueueUnmapMemObject", e))?;
            event
                .wait()
                .map_err(|e| ProbeError::runtime("clEnqueueUnmapMemObject", e))?;
        }
        Ok(())
    }

    fn release_buffer(&self, buffer: OpenClBuffer) -> ProbeResult<()> {
        // Dropping a Buffer panics if clReleaseMemObject fails, so take the
        // handle out and release it here instead.
        let raw: cl_mem = buffer.mem.get();
        std::mem::forget(buffer.mem);
        // SAFETY: `raw` was created by `import_buffer`, is released exactly
        // once, and the Buffer owning it has been forgotten.
        unsafe { release_mem_object(raw) }
            .map_err(|e| ProbeError::runtime("clReleaseMemObject", e))
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
