//! Resize Sweep Benchmark
//!
//! Measures what a pooled sweep costs compared to allocating fresh buffers
//! for every case:
//! - Pooled GEMM and DLRM sweeps over ascending, descending and shuffled sizes
//! - Fresh-pool baseline for the same sweeps
//! - Allocator traffic and peak device memory from the simulated device
//!
//! Run with: `cargo bench --bench resize_sweep_bench`

use std::hint::black_box;
use std::time::{Duration, Instant};

use half::f16;
use hipresource::logging::init_logging_default;
use hipresource::{DlrmResource, GemmResource, ResourceConfig, SimDevice, SimStats};

type GemmF16 = GemmResource<f16, f32, SimDevice>;
type DlrmF16 = DlrmResource<f16, SimDevice>;

// ============================================================================
// Benchmark Harness
// ============================================================================

struct Benchmark {
    name: String,
    iterations: usize,
    warmup_iterations: usize,
}

impl Benchmark {
    fn new(name: &str, iterations: usize) -> Self {
        Benchmark {
            name: name.to_string(),
            iterations,
            warmup_iterations: iterations.min(3),
        }
    }

    /// Time `f` on a fresh device per iteration; stats come from the last run
    fn run<F>(&self, mut f: F) -> (BenchmarkResult, SimStats)
    where
        F: FnMut(&SimDevice),
    {
        for _ in 0..self.warmup_iterations {
            f(&SimDevice::new());
        }

        let mut durations = Vec::with_capacity(self.iterations);
        let mut stats = SimStats::default();
        for _ in 0..self.iterations {
            let device = SimDevice::new();
            let start = Instant::now();
            f(&device);
            durations.push(start.elapsed());
            stats = device.stats().unwrap_or_default();
        }

        let result = BenchmarkResult {
            name: self.name.clone(),
            durations,
        };
        (result, stats)
    }
}

struct BenchmarkResult {
    name: String,
    durations: Vec<Duration>,
}

impl BenchmarkResult {
    fn report(&self, stats: &SimStats) {
        let mut sorted = self.durations.clone();
        sorted.sort();
        let total: Duration = sorted.iter().sum();
        let avg = total / sorted.len().max(1) as u32;
        let p50 = sorted[sorted.len() / 2];

        println!("\n=== {} ===", self.name);
        println!("Iterations:  {}", sorted.len());
        println!("Average:     {:.3} ms", avg.as_secs_f64() * 1000.0);
        println!("P50:         {:.3} ms", p50.as_secs_f64() * 1000.0);
        println!("Allocations: {}", stats.allocations);
        println!("Peak device: {}", format_bytes(stats.peak_bytes));
        println!("To device:   {}", format_bytes(stats.bytes_to_device));
    }
}

fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = 1024 * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Sweeps
// ============================================================================

fn gemm_sizes() -> Vec<(i64, i64, i64)> {
    let dims = [16i64, 32, 64, 128, 256];
    let mut sizes = Vec::new();
    for &m in &dims {
        for &n in &dims {
            for &k in &dims {
                sizes.push((m, n, k));
            }
        }
    }
    sizes
}

/// Deterministic shuffle so runs are comparable
fn shuffled(mut sizes: Vec<(i64, i64, i64)>) -> Vec<(i64, i64, i64)> {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    for i in (1..sizes.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        sizes.swap(i, (state % (i as u64 + 1)) as usize);
    }
    sizes
}

fn gemm_pooled(device: &SimDevice, sizes: &[(i64, i64, i64)]) {
    let mut pool = GemmF16::new(device.clone());
    for &size in sizes {
        if pool.resize_storage(size).is_err() {
            return;
        }
        let _ = black_box(pool.copy_host_to_device_all());
        let _ = black_box(pool.copy_device_to_host_output());
    }
}

fn gemm_fresh(device: &SimDevice, sizes: &[(i64, i64, i64)]) {
    for &size in sizes {
        let mut pool = GemmF16::new(device.clone());
        if pool.resize_storage(size).is_err() {
            return;
        }
        let _ = black_box(pool.copy_host_to_device_all());
        let _ = black_box(pool.copy_device_to_host_output());
    }
}

fn dlrm_pooled(device: &SimDevice, sizes: &[(i64, i64, i64)]) {
    let mut pool = DlrmF16::new(device.clone());
    for &(m, k, batch) in sizes {
        if pool.resize_fwd_storage((m / 4, k, batch)).is_err()
            || pool.resize_bwd_storage((m / 4, k, batch)).is_err()
        {
            return;
        }
        let _ = black_box(pool.copy_host_to_device_fwd_all());
        let _ = black_box(pool.copy_host_to_device_bwd_all());
    }
}

fn benchmark_gemm_sweeps() {
    println!("\n[GEMM Sweeps]");
    println!("=============");

    let ascending = gemm_sizes();
    let descending: Vec<_> = ascending.iter().rev().copied().collect();
    let random = shuffled(ascending.clone());

    for (label, sizes) in [
        ("ascending", &ascending),
        ("descending", &descending),
        ("shuffled", &random),
    ] {
        let bench = Benchmark::new(&format!("GEMM pooled sweep ({})", label), 5);
        let (result, stats) = bench.run(|device| gemm_pooled(device, sizes));
        result.report(&stats);
    }

    let bench = Benchmark::new("GEMM fresh pool per case (shuffled)", 5);
    let (result, stats) = bench.run(|device| gemm_fresh(device, &random));
    result.report(&stats);
}

fn benchmark_dlrm_sweep() {
    println!("\n[DLRM Sweep]");
    println!("============");

    let sizes: Vec<_> = shuffled(gemm_sizes())
        .into_iter()
        .map(|(m, k, b)| (m, k, b / 16))
        .collect();
    let bench = Benchmark::new("DLRM pooled fwd+bwd sweep (shuffled)", 5);
    let (result, stats) = bench.run(|device| dlrm_pooled(device, &sizes));
    result.report(&stats);
}

fn report_footprint() {
    let config = ResourceConfig::from_env().unwrap_or_default();
    let mut pool = GemmF16::with_config(SimDevice::new(), config);
    for size in gemm_sizes() {
        if pool.resize_storage(size).is_err() {
            return;
        }
    }
    match serde_json::to_string_pretty(&pool.footprint()) {
        Ok(json) => println!("\nGEMM footprint after full sweep:\n{}", json),
        Err(e) => eprintln!("footprint serialization failed: {}", e),
    }
}

fn main() {
    init_logging_default();

    println!("hipresource resize sweep benchmarks");
    println!("====================================");

    benchmark_gemm_sweeps();
    benchmark_dlrm_sweep();
    report_footprint();
}
