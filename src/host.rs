//! Host-memory emulation of a loopback device.
//!
//! [`HostAccelerator`] runs the loopback kernel on the CPU: `finish()`
//! copies each pending dispatch's read source (argument 1) into its write
//! target (argument 0). It counts every call so tests can check buffer
//! lifetimes, and can inject a single [`Fault`] to exercise failure paths.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr;

use crate::accelerator::{Accelerator, HostRegion, MemAccess, WorkSize};
use crate::{ProbeError, ProbeResult};

/// A failure to inject into an otherwise well-behaved device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Flip one byte of the output written for `block`.
    CorruptOutput { block: usize, offset: usize },
    /// Fail the wait that completes `block`'s dispatch.
    WaitFailure { block: usize },
    /// Fail the `nth` buffer import (0 = write target, 1 = read source)
    /// for `block`.
    ImportFailure { block: usize, nth: usize },
    /// Fail releasing `block`'s write target.
    ReleaseFailure { block: usize },
}

/// Call counters, read with [`HostAccelerator::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub imports: usize,
    pub releases: usize,
    pub live_buffers: usize,
    pub peak_live_buffers: usize,
    pub dispatches: usize,
    pub waits: usize,
    pub maps: usize,
}

/// Device buffer handle backed by host memory.
#[derive(Debug)]
pub struct HostBuffer {
    id: usize,
    ptr: *mut u8,
    len: usize,
    access: MemAccess,
}

#[derive(Debug, Clone, Copy)]
struct ArgSlot {
    id: usize,
    ptr: *mut u8,
    len: usize,
}

#[derive(Debug)]
struct Dispatch {
    index: usize,
    target: ArgSlot,
    source: ArgSlot,
}

#[derive(Debug, Default)]
struct State {
    next_id: usize,
    live: HashMap<usize, MemAccess>,
    args: [Option<ArgSlot>; 2],
    pending: Vec<Dispatch>,
    stats: HostStats,
}

/// CPU stand-in for a device running the loopback kernel.
#[derive(Debug, Default)]
pub struct HostAccelerator {
    state: RefCell<State>,
    fault: Option<Fault>,
}

impl HostAccelerator {
    /// A device that always copies correctly.
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that misbehaves once as described by `fault`.
    pub fn with_fault(fault: Fault) -> Self {
        HostAccelerator {
            state: RefCell::default(),
            fault: Some(fault),
        }
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> HostStats {
        self.state.borrow().stats
    }
}

/// Runtime failure in the style of an OpenCL status code.
fn status(op: &'static str, code: &str) -> ProbeError {
    ProbeError::runtime(op, code)
}

impl Accelerator for HostAccelerator {
    type Buffer = HostBuffer;

    unsafe fn import_buffer(&self, region: HostRegion<'_>) -> ProbeResult<HostBuffer> {
        let mut state = self.state.borrow_mut();
        let imports = state.stats.imports;
        if let Some(Fault::ImportFailure { block, nth }) = self.fault {
            if imports == block * 2 + nth {
                return Err(status("clCreateBuffer", "CL_MEM_OBJECT_ALLOCATION_FAILURE"));
            }
        }

        let id = state.next_id;
        state.next_id += 1;
        state.live.insert(id, region.access());
        let live = state.live.len();
        state.stats.imports += 1;
        state.stats.live_buffers = live;
        state.stats.peak_live_buffers = state.stats.peak_live_buffers.max(live);

        Ok(HostBuffer {
            id,
            ptr: region.as_ptr(),
            len: region.len(),
            access: region.access(),
        })
    }

    fn set_buffer_arg(&self, index: u32, buffer: &HostBuffer) -> ProbeResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.live.contains_key(&buffer.id) {
            return Err(status("clSetKernelArg", "CL_INVALID_MEM_OBJECT"));
        }
        let expected = match index {
            0 => MemAccess::WriteOnly,
            1 => MemAccess::ReadOnly,
            _ => return Err(status("clSetKernelArg", "CL_INVALID_ARG_INDEX")),
        };
        if buffer.access != expected {
            return Err(status("clSetKernelArg", "CL_INVALID_ARG_VALUE"));
        }
        state.args[index as usize] = Some(ArgSlot {
            id: buffer.id,
            ptr: buffer.ptr,
            len: buffer.len,
        });
        Ok(())
    }

    fn enqueue(&self, work: WorkSize) -> ProbeResult<()> {
        let mut state = self.state.borrow_mut();
        if work.global == 0 {
            return Err(status("clEnqueueNDRangeKernel", "CL_INVALID_GLOBAL_WORK_SIZE"));
        }
        if let Some(local) = work.local {
            if local == 0 || work.global % local != 0 {
                return Err(status("clEnqueueNDRangeKernel", "CL_INVALID_WORK_GROUP_SIZE"));
            }
        }
        let (Some(target), Some(source)) = (state.args[0], state.args[1]) else {
            return Err(status("clEnqueueNDRangeKernel", "CL_INVALID_KERNEL_ARGS"));
        };
        let index = state.stats.dispatches;
        state.pending.push(Dispatch {
            index,
            target,
            source,
        });
        state.stats.dispatches += 1;
        Ok(())
    }

    fn finish(&self) -> ProbeResult<()> {
        let mut state = self.state.borrow_mut();
        state.stats.waits += 1;
        let pending = std::mem::take(&mut state.pending);
        for dispatch in pending {
            if self.fault == Some(Fault::WaitFailure { block: dispatch.index }) {
                return Err(status("clFinish", "CL_OUT_OF_RESOURCES"));
            }
            if !state.live.contains_key(&dispatch.target.id)
                || !state.live.contains_key(&dispatch.source.id)
            {
                return Err(status("clFinish", "CL_INVALID_MEM_OBJECT"));
            }

            let len = dispatch.target.len.min(dispatch.source.len);
            // SAFETY: both buffers are still live, so their host regions are
            // still borrowed by the binding that imported them. Target and
            // source come from distinct allocations.
            unsafe {
                ptr::copy_nonoverlapping(dispatch.source.ptr, dispatch.target.ptr, len);
                if let Some(Fault::CorruptOutput { block, offset }) = self.fault {
                    if block == dispatch.index && offset < len {
                        let byte = dispatch.target.ptr.add(offset);
                        *byte = !*byte;
                    }
                }
            }
        }
        Ok(())
    }

    fn map_read(&self, buffer: &HostBuffer) -> ProbeResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.live.contains_key(&buffer.id) {
            return Err(status("clEnqueueMapBuffer", "CL_INVALID_MEM_OBJECT"));
        }
        state.stats.maps += 1;
        Ok(())
    }

    fn release_buffer(&self, buffer: HostBuffer) -> ProbeResult<()> {
        let mut state = self.state.borrow_mut();
        let releases = state.stats.releases;
        if let Some(Fault::ReleaseFailure { block }) = self.fault {
            if releases == block * 2 {
                state.stats.releases += 1;
                return Err(status("clReleaseMemObject", "CL_INVALID_MEM_OBJECT"));
            }
        }
        if state.live.remove(&buffer.id).is_none() {
            return Err(status("clReleaseMemObject", "CL_INVALID_MEM_OBJECT"));
        }
        for slot in state.args.iter_mut() {
            if slot.is_some_and(|arg| arg.id == buffer.id) {
                *slot = None;
            }
        }
        let live = state.live.len();
        state.stats.releases += 1;
        state.stats.live_buffers = live;
        Ok(())
    }
}
