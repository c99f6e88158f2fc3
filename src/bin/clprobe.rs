/// clprobe – loopback kernel correctness and latency probe.
///
/// Pushes a generated dataset block by block through a loopback kernel on
/// an OpenCL device and checks that every block comes back unchanged:
///   clprobe                      → accelerator device, kernel.cl, 1600 blocks
///   clprobe -d gpu -k loop.cl    → GPU device, custom kernel file
///   clprobe -d cpu -l 16         → CPU device, 16 blocks
///
/// Exit status: 0 when every block verified, 1 on a mismatch or runtime
/// error, 255 when no device of the requested type is available, 2 on bad
/// arguments.
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use clprobe::accelerator::{Accelerator, DeviceType};
use clprobe::config::{ProbeConfig, DEFAULT_BLOCK_COUNT, DEFAULT_KERNEL_FILE};
use clprobe::dataset::Dataset;
use clprobe::driver::{PipelineDriver, RunReport};
use clprobe::{logging, ProbeError, ProbeResult};

#[derive(Debug, Parser)]
#[command(name = "clprobe", about = "Loopback kernel correctness and latency probe")]
struct Cli {
    /// Device type: gpu, cpu or acc.
    #[arg(short = 'd', long = "device", value_name = "DEVICE", default_value = "acc")]
    device: DeviceType,
    /// Kernel source file.
    #[arg(short = 'k', long = "kernel", value_name = "KERNEL_FILE", default_value = DEFAULT_KERNEL_FILE)]
    kernel: PathBuf,
    /// Iteration count (accepted, currently unused).
    #[arg(short = 'i', long = "iteration", value_name = "ITERATION_COUNT", default_value_t = 5)]
    iterations: u32,
    /// Number of blocks to send through the kernel.
    #[arg(short = 'l', long = "length", value_name = "BLOCK_COUNT", default_value_t = DEFAULT_BLOCK_COUNT)]
    block_count: usize,
    /// Verbose flag (accepted, currently unused).
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> ProbeConfig {
        ProbeConfig {
            device_type: self.device,
            kernel_file: self.kernel,
            iterations: self.iterations,
            block_count: self.block_count,
            verbose: self.verbose,
            ..ProbeConfig::default()
        }
    }
}

/// Print the buffer layout and work sizes ahead of the run.
#[cfg_attr(not(feature = "opencl"), allow(dead_code))]
fn write_layout<W: Write>(out: &mut W, config: &ProbeConfig, data: &Dataset) -> io::Result<()> {
    writeln!(out, "Block buffer size = {} KB", data.block_len() / 1024)?;
    writeln!(out, "Block buffer count = {}", data.block_count())?;
    writeln!(out, "Total buffer size = {} KB", data.len() / 1024)?;
    let work = config.work_size();
    writeln!(out, "Global size = {}", work.global)?;
    if let Some(local) = work.local {
        writeln!(out, "Local size = {local}")?;
    }
    Ok(())
}

/// Allocate and fill the dataset, then run every block through `accel`.
#[cfg_attr(not(feature = "opencl"), allow(dead_code))]
fn run<A: Accelerator, W: Write>(
    out: &mut W,
    config: &ProbeConfig,
    accel: &A,
) -> ProbeResult<RunReport> {
    let mut data = Dataset::new(config.dataset_len()?, config.block_len())?;
    let seed = data.generate_time_seeded();
    tracing::info!(seed, "reference data generated");
    if let Err(err) = write_layout(out, config, &data) {
        tracing::warn!(error = %err, "could not write buffer layout");
    }
    PipelineDriver::new(accel, config.work_size()).run(&mut data)
}

/// Print the failure, including both ranges of a mismatching block.
#[cfg_attr(not(feature = "opencl"), allow(dead_code))]
fn write_failure<W: Write>(out: &mut W, err: &ProbeError) -> io::Result<()> {
    if let ProbeError::DataMismatch {
        output, reference, ..
    } = err
    {
        out.write_all(b"Output: ")?;
        out.write_all(output)?;
        out.write_all(b"\nReference: ")?;
        out.write_all(reference)?;
        out.write_all(b"\n")?;
    }
    writeln!(out, "Exception: {err}")?;
    writeln!(out, "FAILED TEST")
}

/// Print the closing lines for a finished run.
#[cfg_attr(not(feature = "opencl"), allow(dead_code))]
fn write_outcome<W: Write>(out: &mut W, outcome: &ProbeResult<RunReport>) -> io::Result<()> {
    match outcome {
        Ok(report) => {
            writeln!(out, "OpenCL kernel time: {} sec", report.total_secs())?;
            writeln!(out, "PASSED TEST")
        }
        Err(err) => write_failure(out, err),
    }
}

/// Run the probe on an acquired device and report; returns the exit code.
#[cfg_attr(not(feature = "opencl"), allow(dead_code))]
fn execute<A: Accelerator, W: Write>(out: &mut W, config: &ProbeConfig, accel: &A) -> u8 {
    let outcome = run(out, config, accel);
    let code = match &outcome {
        Ok(_) => 0,
        Err(err) => {
            tracing::error!(error = %err, "loopback run failed");
            err.exit_code()
        }
    };
    if let Err(err) = write_outcome(out, &outcome) {
        tracing::warn!(error = %err, "could not write run report");
    }
    code
}

/// Report an error raised before any block was dispatched.
fn fail_early(err: &ProbeError) -> u8 {
    eprintln!("clprobe: {err}");
    err.exit_code()
}

#[cfg(feature = "opencl")]
fn probe(config: &ProbeConfig) -> u8 {
    match clprobe::opencl::OpenClAccelerator::from_config(config) {
        Ok(accel) => execute(&mut io::stdout().lock(), config, &accel),
        Err(err) => fail_early(&err),
    }
}

#[cfg(not(feature = "opencl"))]
fn probe(_config: &ProbeConfig) -> u8 {
    fail_early(&ProbeError::DeviceUnavailable(
        "clprobe was built without the `opencl` feature".into(),
    ))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging();

    let config = cli.into_config();
    tracing::debug!(?config, "parsed configuration");
    if let Err(err) = config.validate() {
        return ExitCode::from(fail_early(&err));
    }
    ExitCode::from(probe(&config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clprobe::host::{Fault, HostAccelerator};

    /// Ten blocks of 64 bytes: one work-item of 64 bytes per dispatch.
    fn small_config() -> ProbeConfig {
        ProbeConfig {
            block_count: 10,
            work_group_size: 1,
            bytes_per_work_item: 64,
            ..ProbeConfig::default()
        }
    }

    fn execute_to_string(config: &ProbeConfig, accel: &HostAccelerator) -> (u8, Vec<u8>) {
        let mut out = Vec::new();
        let code = execute(&mut out, config, accel);
        (code, out)
    }

    #[test]
    fn test_cli_defaults() {
        let config = Cli::try_parse_from(["clprobe"]).unwrap().into_config();
        assert_eq!(config, ProbeConfig::default());
    }

    #[test]
    fn test_cli_short_and_long_flags() {
        let config = Cli::try_parse_from([
            "clprobe", "-d", "gpu", "-k", "loop.cl", "-i", "9", "--length", "16", "-v",
        ])
        .unwrap()
        .into_config();
        assert_eq!(config.device_type, DeviceType::Gpu);
        assert_eq!(config.kernel_file, PathBuf::from("loop.cl"));
        assert_eq!(config.iterations, 9);
        assert_eq!(config.block_count, 16);
        assert!(config.verbose);
    }

    #[test]
    fn test_cli_rejects_unknown_device_type() {
        let err = Cli::try_parse_from(["clprobe", "-d", "tpu"]).unwrap_err();
        assert_ne!(err.exit_code(), 0);
    }

    #[test]
    fn test_cli_help_exits_zero() {
        let err = Cli::try_parse_from(["clprobe", "-h"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);
    }

    #[test]
    fn test_passing_run() {
        let accel = HostAccelerator::new();
        let (code, out) = execute_to_string(&small_config(), &accel);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(code, 0);
        assert!(text.contains("Block buffer count = 10"));
        assert!(text.contains("Global size = 1"));
        assert!(text.contains("Local size = 1"));
        assert!(text.contains("OpenCL kernel time: "));
        assert!(text.ends_with("PASSED TEST\n"));
    }

    #[test]
    fn test_gpu_run_omits_local_size() {
        let accel = HostAccelerator::new();
        let config = ProbeConfig {
            device_type: DeviceType::Gpu,
            ..small_config()
        };
        let (code, out) = execute_to_string(&config, &accel);
        assert_eq!(code, 0);
        assert!(!String::from_utf8(out).unwrap().contains("Local size"));
    }

    #[test]
    fn test_corrupt_block_dumps_its_ranges() {
        let accel = HostAccelerator::with_fault(Fault::CorruptOutput {
            block: 3,
            offset: 0,
        });
        let (code, out) = execute_to_string(&small_config(), &accel);
        let text = String::from_utf8_lossy(&out);
        assert_eq!(code, 1);
        assert!(text.contains("Exception: incorrect data from kernel in block 3"));
        assert!(text.ends_with("FAILED TEST\n"));
        assert!(!text.contains("PASSED TEST"));
        assert!(!text.contains("kernel time"));

        let output_line = text
            .lines()
            .find(|l| l.starts_with("Output: "))
            .expect("output dump");
        let reference_line = text
            .lines()
            .find(|l| l.starts_with("Reference: "))
            .expect("reference dump");
        // 64 bytes per block, first byte corrupted.
        assert_eq!(reference_line.len(), "Reference: ".len() + 64);
        assert_ne!(
            output_line["Output: ".len()..].chars().next(),
            reference_line["Reference: ".len()..].chars().next()
        );
        assert_eq!(accel.stats().dispatches, 4);
    }

    #[test]
    fn test_zero_blocks_passes() {
        let accel = HostAccelerator::new();
        let config = ProbeConfig {
            block_count: 0,
            ..small_config()
        };
        let (code, out) = execute_to_string(&config, &accel);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(code, 0);
        assert!(text.contains("OpenCL kernel time: 0 sec"));
        assert_eq!(accel.stats().dispatches, 0);
    }

    #[test]
    fn test_wait_failure_fails_run() {
        let accel = HostAccelerator::with_fault(Fault::WaitFailure { block: 2 });
        let (code, out) = execute_to_string(&small_config(), &accel);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(code, 1);
        assert!(text.contains("Exception: clFinish failed: CL_OUT_OF_RESOURCES"));
        assert!(!text.contains("Output: "));
        assert_eq!(accel.stats().maps, 2);
    }

    #[test]
    fn test_release_failure_fails_run() {
        let accel = HostAccelerator::with_fault(Fault::ReleaseFailure { block: 1 });
        let (code, out) = execute_to_string(&small_config(), &accel);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(code, 1);
        assert!(text.contains("Exception: clReleaseMemObject failed: CL_INVALID_MEM_OBJECT"));
        assert!(text.ends_with("FAILED TEST\n"));
        assert!(!text.contains("PASSED TEST"));
    }

    #[test]
    fn test_outcome_write_error_keeps_exit_code() {
        struct ClosedPipe;
        impl Write for ClosedPipe {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::ErrorKind::BrokenPipe.into())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let accel = HostAccelerator::with_fault(Fault::WaitFailure { block: 0 });
        assert_eq!(execute(&mut ClosedPipe, &small_config(), &accel), 1);
        let accel = HostAccelerator::new();
        assert_eq!(execute(&mut ClosedPipe, &small_config(), &accel), 0);
    }

    #[test]
    fn test_device_unavailable_exit_code() {
        assert_eq!(
            fail_early(&ProbeError::DeviceUnavailable("none".into())),
            255
        );
    }
}
