use super::*;
use crate::dataset::Dataset;
use crate::driver::PipelineDriver;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Try each device type in turn; `None` when no OpenCL device is present.
fn any_accelerator() -> Option<(DeviceType, OpenClAccelerator)> {
    for ty in [DeviceType::Accelerator, DeviceType::Gpu, DeviceType::Cpu] {
        match OpenClAccelerator::with_source(ty, LOOPBACK_KERNEL_SOURCE, "loopback", "") {
            Ok(accel) => return Some((ty, accel)),
            Err(ProbeError::DeviceUnavailable(_)) => continue,
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }
    None
}

#[test]
fn test_device_type_mapping() {
    assert_eq!(
        cl_device_type_of(DeviceType::Accelerator),
        CL_DEVICE_TYPE_ACCELERATOR
    );
    assert_eq!(cl_device_type_of(DeviceType::Gpu), CL_DEVICE_TYPE_GPU);
    assert_eq!(cl_device_type_of(DeviceType::Cpu), CL_DEVICE_TYPE_CPU);
}

#[test]
fn test_embedded_kernel_declares_entry_point() {
    assert!(LOOPBACK_KERNEL_SOURCE.contains("__kernel void loopback("));
}

#[test]
fn test_missing_kernel_file() {
    let config = ProbeConfig {
        kernel_file: "does/not/exist.cl".into(),
        ..ProbeConfig::default()
    };
    match OpenClAccelerator::from_config(&config) {
        Err(ProbeError::KernelSource { path, .. }) => {
            assert_eq!(path, std::path::PathBuf::from("does/not/exist.cl"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

// Integration tests that require an actual OpenCL device.
// These are gated on the device being available at runtime.

#[test]
fn test_accelerator_creation() {
    if let Some((_, accel)) = any_accelerator() {
        assert!(!accel.device_name().is_empty());
    }
}

#[test]
fn test_unknown_kernel_name_is_build_error() {
    for ty in [DeviceType::Accelerator, DeviceType::Gpu, DeviceType::Cpu] {
        match OpenClAccelerator::with_source(ty, LOOPBACK_KERNEL_SOURCE, "no_such_kernel", "") {
            Err(ProbeError::DeviceUnavailable(_)) => continue,
            Err(ProbeError::KernelBuild(_)) => return,
            other => panic!("unexpected: {other:?}"),
        }
    }
}

#[test]
fn test_gpu_loopback_run() {
    let Some((ty, accel)) = any_accelerator() else {
        return; // skip
    };
    let config = ProbeConfig {
        device_type: ty,
        block_count: 4,
        ..ProbeConfig::default()
    };
    let mut data = Dataset::new(config.dataset_len().unwrap(), config.block_len()).unwrap();
    data.generate(&mut StdRng::seed_from_u64(3));

    let report = PipelineDriver::new(&accel, config.work_size())
        .run(&mut data)
        .expect("loopback run failed");
    assert_eq!(report.blocks(), 4);
}

#[test]
fn test_explicit_release_reports_success() {
    let Some((_, accel)) = any_accelerator() else {
        return; // skip
    };
    let mut out = [0u8; 64];
    let reference = [b'A'; 64];
    unsafe {
        let w = accel
            .import_buffer(HostRegion::writable(&mut out))
            .expect("import write target");
        let r = accel
            .import_buffer(HostRegion::readable(&reference))
            .expect("import read source");
        accel.release_buffer(w).expect("release write target");
        accel.release_buffer(r).expect("release read source");
    }
}
