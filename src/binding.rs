//! Scoped device buffers for one block.
//!
//! A [`DeviceBinding`] imports a block's output and reference ranges as two
//! device buffers and holds the dataset borrowed until both are released.
//! Dropping the binding on an error path releases whatever it still holds.

use std::cmp::Ordering;
use std::mem::ManuallyDrop;

use crate::accelerator::{Accelerator, HostRegion};
use crate::dataset::Dataset;
use crate::{ProbeError, ProbeResult};

/// Write-target and read-source device buffers for one dataset block.
pub struct DeviceBinding<'a, A: Accelerator> {
    accelerator: &'a A,
    dataset: &'a mut Dataset,
    block: usize,
    write_target: ManuallyDrop<A::Buffer>,
    read_source: ManuallyDrop<A::Buffer>,
}

impl<'a, A: Accelerator> DeviceBinding<'a, A> {
    /// Import block `block` of `dataset` into two device buffers.
    ///
    /// The output range becomes a write-only buffer, the reference range a
    /// read-only one. If the second import fails the first buffer is
    /// released before the error is returned.
    pub fn bind(accelerator: &'a A, dataset: &'a mut Dataset, block: usize) -> ProbeResult<Self> {
        let (output, reference) = dataset.block_pair_mut(block);
        let output = HostRegion::writable(output);
        let reference = HostRegion::readable(reference);

        // SAFETY: both regions point into `dataset`, which stays mutably
        // borrowed by the binding until the buffers are released.
        let write_target = unsafe { accelerator.import_buffer(output)? };
        let read_source = match unsafe { accelerator.import_buffer(reference) } {
            Ok(buffer) => buffer,
            Err(err) => {
                if let Err(release_err) = accelerator.release_buffer(write_target) {
                    tracing::warn!(block, error = %release_err, "failed to release write target");
                }
                return Err(err);
            }
        };

        tracing::trace!(block, "bound device buffers");
        Ok(DeviceBinding {
            accelerator,
            dataset,
            block,
            write_target: ManuallyDrop::new(write_target),
            read_source: ManuallyDrop::new(read_source),
        })
    }

    /// Index of the bound block.
    pub fn block(&self) -> usize {
        self.block
    }

    /// Buffer the kernel writes (kernel argument 0).
    pub fn write_target(&self) -> &A::Buffer {
        &self.write_target
    }

    /// Buffer the kernel reads (kernel argument 1).
    pub fn read_source(&self) -> &A::Buffer {
        &self.read_source
    }

    /// Compare the block's output with its reference.
    ///
    /// Only meaningful after the write target has been mapped back.
    pub fn verify(&self) -> ProbeResult<()> {
        let block = self.block;
        if self.dataset.compare(block) == Ordering::Equal {
            return Ok(());
        }
        tracing::debug!(
            block,
            offset = ?self.dataset.first_difference(block),
            "output differs from reference"
        );
        Err(ProbeError::DataMismatch {
            block,
            output: self.dataset.output_block(block).to_vec(),
            reference: self.dataset.reference_block(block).to_vec(),
        })
    }

    /// Release both device buffers.
    ///
    /// Both releases are attempted; the first failure is returned.
    pub fn release(self) -> ProbeResult<()> {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so each buffer is taken exactly once.
        let (write_target, read_source) = unsafe {
            (
                ManuallyDrop::take(&mut this.write_target),
                ManuallyDrop::take(&mut this.read_source),
            )
        };
        let first = this.accelerator.release_buffer(write_target);
        let second = this.accelerator.release_buffer(read_source);
        tracing::trace!(block = this.block, "released device buffers");
        first.and(second)
    }
}

impl<A: Accelerator> Drop for DeviceBinding<'_, A> {
    fn drop(&mut self) {
        // SAFETY: `drop` runs at most once and `release` bypasses it.
        let (write_target, read_source) = unsafe {
            (
                ManuallyDrop::take(&mut self.write_target),
                ManuallyDrop::take(&mut self.read_source),
            )
        };
        for buffer in [write_target, read_source] {
            if let Err(err) = self.accelerator.release_buffer(buffer) {
                tracing::warn!(block = self.block, error = %err, "failed to release device buffer");
            }
        }
    }
}
