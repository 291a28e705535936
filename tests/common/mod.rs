//! Shared helpers for pool integration tests
//!
//! Every test builds its own [`SimDevice`] so allocation counters are never
//! shared between tests. Data generators are seeded so failures reproduce.

#![allow(dead_code)]

use half::f16;
use hipresource::backend::DeviceHandle;
use hipresource::logging::init_logging_default;
use hipresource::{DeviceView, Element, SimDevice};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Fresh device plus a clone kept for inspection
pub fn sim_device() -> (SimDevice, SimDevice) {
    init_logging_default();
    let device = SimDevice::new();
    (device.clone(), device)
}

pub fn random_f32(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

pub fn random_f16(len: usize, seed: u64) -> Vec<f16> {
    random_f32(len, seed).into_iter().map(f16::from_f32).collect()
}

pub fn handle_of<T: Element>(view: DeviceView<T>) -> DeviceHandle {
    view.handle()
        .expect("role has no device allocation - resize the pool first")
}

/// Contents of a device allocation, copied out without touching any pool
pub fn device_bytes(device: &SimDevice, handle: &DeviceHandle) -> Vec<u8> {
    device
        .with_device_bytes(handle, |bytes| bytes.to_vec())
        .expect("handle should belong to the device")
}

/// Overwrite the start of a device allocation, standing in for a kernel write
pub fn write_device_bytes(device: &SimDevice, handle: &DeviceHandle, data: &[u8]) {
    device
        .with_device_bytes(handle, |bytes| bytes[..data.len()].copy_from_slice(data))
        .expect("handle should belong to the device");
}

pub fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn f16_to_bytes(values: &[f16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn bytes_to_f16(bytes: &[u8]) -> Vec<f16> {
    bytes
        .chunks_exact(2)
        .map(|c| f16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Host reference for `D = A x B + C` with row-major operands
pub fn reference_gemm(a: &[f32], b: &[f32], c: &[f32], m: usize, n: usize, k: usize) -> Vec<f32> {
    let mut d = c.to_vec();
    for row in 0..m {
        for col in 0..n {
            let mut acc = 0.0f32;
            for i in 0..k {
                acc += a[row * k + i] * b[i * n + col];
            }
            d[row * n + col] += acc;
        }
    }
    d
}
