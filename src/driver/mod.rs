//! Serial block pipeline.
//!
//! For each block in index order the driver binds device buffers,
//! dispatches the kernel, waits for it, maps the result back, verifies it
//! and releases the binding. The next block starts only after the previous
//! one is fully released, so at most one binding is ever live.
//!
//! The first error of any kind, including a data mismatch, ends the run.

use crate::accelerator::{Accelerator, WorkSize};
use crate::binding::DeviceBinding;
use crate::dataset::Dataset;
use crate::timer::Timer;
use crate::ProbeResult;

/// Timing of a run in which every block verified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    block_secs: Vec<u64>,
}

impl RunReport {
    fn record(&mut self, secs: u64) {
        self.block_secs.push(secs);
    }

    /// Number of blocks processed.
    pub fn blocks(&self) -> usize {
        self.block_secs.len()
    }

    /// Per-block elapsed seconds, in block order.
    pub fn block_secs(&self) -> &[u64] {
        &self.block_secs
    }

    /// Sum of all per-block times.
    pub fn total_secs(&self) -> u64 {
        self.block_secs.iter().sum()
    }
}

/// Runs every block of a dataset through the loopback kernel.
pub struct PipelineDriver<'a, A: Accelerator> {
    accelerator: &'a A,
    work: WorkSize,
}

impl<'a, A: Accelerator> PipelineDriver<'a, A> {
    /// Driver dispatching with the same `work` shape for every block.
    pub fn new(accelerator: &'a A, work: WorkSize) -> Self {
        PipelineDriver { accelerator, work }
    }

    /// Process all blocks of `dataset`, stopping at the first failure.
    pub fn run(&self, dataset: &mut Dataset) -> ProbeResult<RunReport> {
        let block_count = dataset.block_count();
        tracing::info!(
            block_count,
            block_len = dataset.block_len(),
            global = self.work.global,
            local = ?self.work.local,
            "starting loopback run"
        );

        let mut report = RunReport::default();
        for block in 0..block_count {
            let secs = self.run_block(dataset, block)?;
            report.record(secs);
        }

        tracing::info!(
            blocks = report.blocks(),
            total_secs = report.total_secs(),
            "all blocks verified"
        );
        Ok(report)
    }

    /// One pass of bind → dispatch → wait → map → verify → release.
    ///
    /// Returns the block's elapsed time, measured from before the bind up to
    /// the completed map.
    fn run_block(&self, dataset: &mut Dataset, block: usize) -> ProbeResult<u64> {
        let _span = tracing::debug_span!("block", index = block).entered();
        let mut timer = Timer::start();

        let binding = DeviceBinding::bind(self.accelerator, dataset, block)?;
        self.accelerator.set_buffer_arg(0, binding.write_target())?;
        self.accelerator.set_buffer_arg(1, binding.read_source())?;
        self.accelerator.enqueue(self.work)?;
        self.accelerator.finish()?;
        self.accelerator.map_read(binding.write_target())?;
        let secs = timer.stop();

        binding.verify()?;
        binding.release()?;
        tracing::debug!(secs, "block verified");
        Ok(secs)
    }
}
