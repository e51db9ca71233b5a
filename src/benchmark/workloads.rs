//! Micro-benchmark workloads
//!
//! A workload performs one bounded iteration of work and reports how many
//! work units it processed. Scores are `1000 * throughput / reference`, so
//! a reference-class machine scores about 1000 on every workload.

use crate::core::Subsystem;
use crate::error::{IoResultExt, Result};
use parking_lot::Mutex;
use std::hint::black_box;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Per-run parameters handed to workloads
#[derive(Debug, Clone)]
pub struct WorkloadContext {
    /// Use the reduced problem size
    pub quick: bool,
    /// Directory for files created by storage workloads
    pub working_dir: PathBuf,
}

/// One micro-benchmark
pub trait Workload: Send + Sync {
    /// Name, unique within the subsystem
    fn name(&self) -> &str;

    /// Subsystem this workload measures
    fn subsystem(&self) -> Subsystem;

    /// Throughput (units per second) that maps to a score of 1000
    fn reference_throughput(&self) -> f64;

    /// Unit of work reported by `run_iteration`
    fn unit(&self) -> &'static str {
        "ops"
    }

    /// Allocate buffers or files before warmup
    fn prepare(&self, _ctx: &WorkloadContext) -> Result<()> {
        Ok(())
    }

    /// Run one iteration; returns units of work processed
    fn run_iteration(&self, ctx: &WorkloadContext) -> Result<u64>;

    /// Release whatever `prepare` created
    fn cleanup(&self, _ctx: &WorkloadContext) {}
}

fn problem_size(ctx: &WorkloadContext, full: usize) -> usize {
    if ctx.quick {
        (full / 8).max(1)
    } else {
        full
    }
}

/// Deterministic pseudo-random sequence for workload data
fn xorshift(mut state: u64) -> u64 {
    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;
    state
}

/// Integer mixing loop
pub struct IntegerArithmetic;

impl Workload for IntegerArithmetic {
    fn name(&self) -> &str {
        "integer_arithmetic"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Cpu
    }

    fn reference_throughput(&self) -> f64 {
        5.0e8
    }

    fn run_iteration(&self, ctx: &WorkloadContext) -> Result<u64> {
        let ops = problem_size(ctx, 4_000_000);
        let mut acc = black_box(0x9E37_79B9_7F4A_7C15u64);
        for i in 0..ops as u64 {
            acc = acc.wrapping_mul(6364136223846793005).wrapping_add(i) ^ (acc >> 29);
        }
        black_box(acc);
        Ok(ops as u64)
    }
}

/// Floating-point multiply-add chain
pub struct FloatArithmetic;

impl Workload for FloatArithmetic {
    fn name(&self) -> &str {
        "float_arithmetic"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Cpu
    }

    fn reference_throughput(&self) -> f64 {
        5.0e8
    }

    fn unit(&self) -> &'static str {
        "flops"
    }

    fn run_iteration(&self, ctx: &WorkloadContext) -> Result<u64> {
        let ops = problem_size(ctx, 4_000_000);
        let mut x = black_box(1.000_001f64);
        let mut y = black_box(0.5f64);
        for _ in 0..ops / 2 {
            x = x * 0.999_999 + 1.0e-7;
            y = y.mul_add(1.000_000_1, -1.0e-8);
        }
        black_box((x, y));
        Ok(ops as u64)
    }
}

/// Data-dependent branches over pseudo-random values
pub struct BranchPrediction;

impl Workload for BranchPrediction {
    fn name(&self) -> &str {
        "branch_prediction"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Cpu
    }

    fn reference_throughput(&self) -> f64 {
        2.0e8
    }

    fn run_iteration(&self, ctx: &WorkloadContext) -> Result<u64> {
        let ops = problem_size(ctx, 2_000_000);
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        let mut taken = 0u64;
        for _ in 0..ops {
            state = xorshift(state);
            if state & 0x10 != 0 {
                taken += 1;
            } else if state & 0x200 != 0 {
                taken = taken.wrapping_add(3);
            }
        }
        black_box(taken);
        Ok(ops as u64)
    }
}

/// Vectorisable float reduction
pub struct SimdThroughput;

impl Workload for SimdThroughput {
    fn name(&self) -> &str {
        "simd_throughput"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Cpu
    }

    fn reference_throughput(&self) -> f64 {
        2.0e9
    }

    fn unit(&self) -> &'static str {
        "elements"
    }

    fn run_iteration(&self, ctx: &WorkloadContext) -> Result<u64> {
        let len = problem_size(ctx, 1 << 18);
        let a: Vec<f32> = (0..len).map(|i| (i % 97) as f32 * 0.5).collect();
        let b: Vec<f32> = (0..len).map(|i| (i % 89) as f32 * 0.25).collect();
        let mut lanes = [0f32; 8];
        let mut processed = 0u64;
        for _ in 0..16 {
            for (ca, cb) in a.chunks_exact(8).zip(b.chunks_exact(8)) {
                for lane in 0..8 {
                    lanes[lane] += ca[lane] * cb[lane];
                }
            }
            processed += len as u64;
        }
        black_box(lanes);
        Ok(processed)
    }
}

/// XXH3 over an in-memory buffer
pub struct HashThroughput {
    buffer: Mutex<Vec<u8>>,
}

impl HashThroughput {
    /// Create the workload; the buffer is filled in `prepare`
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
        }
    }
}

impl Default for HashThroughput {
    fn default() -> Self {
        Self::new()
    }
}

impl Workload for HashThroughput {
    fn name(&self) -> &str {
        "hash_throughput"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Cpu
    }

    fn reference_throughput(&self) -> f64 {
        1.0e10
    }

    fn unit(&self) -> &'static str {
        "bytes"
    }

    fn prepare(&self, ctx: &WorkloadContext) -> Result<()> {
        let size = problem_size(ctx, 4 * 1024 * 1024);
        *self.buffer.lock() = (0..size).map(|i| (i % 251) as u8).collect();
        Ok(())
    }

    fn run_iteration(&self, _ctx: &WorkloadContext) -> Result<u64> {
        let buffer = self.buffer.lock();
        black_box(xxhash_rust::xxh3::xxh3_64(&buffer));
        Ok(buffer.len() as u64)
    }

    fn cleanup(&self, _ctx: &WorkloadContext) {
        *self.buffer.lock() = Vec::new();
    }
}

/// Sequential buffer fill
pub struct SequentialWrite {
    buffer: Mutex<Vec<u8>>,
}

impl SequentialWrite {
    /// Create the workload
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
        }
    }
}

impl Default for SequentialWrite {
    fn default() -> Self {
        Self::new()
    }
}

impl Workload for SequentialWrite {
    fn name(&self) -> &str {
        "sequential_write"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Memory
    }

    fn reference_throughput(&self) -> f64 {
        1.0e10
    }

    fn unit(&self) -> &'static str {
        "bytes"
    }

    fn prepare(&self, ctx: &WorkloadContext) -> Result<()> {
        *self.buffer.lock() = vec![0u8; problem_size(ctx, 16 * 1024 * 1024)];
        Ok(())
    }

    fn run_iteration(&self, _ctx: &WorkloadContext) -> Result<u64> {
        let mut buffer = self.buffer.lock();
        let fill = black_box(0xA5u8);
        buffer.fill(fill);
        black_box(buffer.last().copied());
        Ok(buffer.len() as u64)
    }

    fn cleanup(&self, _ctx: &WorkloadContext) {
        *self.buffer.lock() = Vec::new();
    }
}

/// Sequential buffer sum
pub struct SequentialRead {
    buffer: Mutex<Vec<u64>>,
}

impl SequentialRead {
    /// Create the workload
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
        }
    }
}

impl Default for SequentialRead {
    fn default() -> Self {
        Self::new()
    }
}

impl Workload for SequentialRead {
    fn name(&self) -> &str {
        "sequential_read"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Memory
    }

    fn reference_throughput(&self) -> f64 {
        1.5e10
    }

    fn unit(&self) -> &'static str {
        "bytes"
    }

    fn prepare(&self, ctx: &WorkloadContext) -> Result<()> {
        let words = problem_size(ctx, 2 * 1024 * 1024);
        *self.buffer.lock() = (0..words as u64).collect();
        Ok(())
    }

    fn run_iteration(&self, _ctx: &WorkloadContext) -> Result<u64> {
        let buffer = self.buffer.lock();
        let sum = buffer.iter().fold(0u64, |acc, v| acc.wrapping_add(*v));
        black_box(sum);
        Ok((buffer.len() * std::mem::size_of::<u64>()) as u64)
    }

    fn cleanup(&self, _ctx: &WorkloadContext) {
        *self.buffer.lock() = Vec::new();
    }
}

/// Dependent loads through a shuffled index chain
pub struct RandomAccess {
    chain: Mutex<Vec<u32>>,
}

impl RandomAccess {
    /// Create the workload
    pub fn new() -> Self {
        Self {
            chain: Mutex::new(Vec::new()),
        }
    }
}

impl Default for RandomAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl Workload for RandomAccess {
    fn name(&self) -> &str {
        "random_access"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Memory
    }

    fn reference_throughput(&self) -> f64 {
        1.0e8
    }

    fn unit(&self) -> &'static str {
        "loads"
    }

    fn prepare(&self, ctx: &WorkloadContext) -> Result<()> {
        let len = problem_size(ctx, 1 << 22).max(2);
        // Sattolo's algorithm: one cycle through every slot
        let mut chain: Vec<u32> = (0..len as u32).collect();
        let mut state = 0x853C_49E6_748F_EA9Bu64;
        for i in (1..len).rev() {
            state = xorshift(state);
            let j = (state % i as u64) as usize;
            chain.swap(i, j);
        }
        *self.chain.lock() = chain;
        Ok(())
    }

    fn run_iteration(&self, _ctx: &WorkloadContext) -> Result<u64> {
        let chain = self.chain.lock();
        let loads = chain.len().min(1 << 20);
        let mut index = 0usize;
        for _ in 0..loads {
            index = chain[index] as usize;
        }
        black_box(index);
        Ok(loads as u64)
    }

    fn cleanup(&self, _ctx: &WorkloadContext) {
        *self.chain.lock() = Vec::new();
    }
}

/// Small heap allocations and frees
pub struct Allocation;

impl Workload for Allocation {
    fn name(&self) -> &str {
        "allocation"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Memory
    }

    fn reference_throughput(&self) -> f64 {
        5.0e7
    }

    fn unit(&self) -> &'static str {
        "allocations"
    }

    fn run_iteration(&self, ctx: &WorkloadContext) -> Result<u64> {
        let count = problem_size(ctx, 200_000);
        let mut live: Vec<Box<[u8]>> = Vec::with_capacity(64);
        for i in 0..count {
            live.push(vec![i as u8; 16 + (i % 8) * 16].into_boxed_slice());
            if live.len() == 64 {
                black_box(&live);
                live.clear();
            }
        }
        Ok(count as u64)
    }
}

fn bench_file(ctx: &WorkloadContext, name: &str) -> PathBuf {
    ctx.working_dir
        .join(format!(".captier-bench-{}-{}", std::process::id(), name))
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = std::fs::File::create(path).with_path(path)?;
    file.write_all(data).with_path(path)?;
    file.sync_all().with_path(path)
}

/// Write and sync a file in the working directory
pub struct StorageWrite {
    data: Mutex<Vec<u8>>,
}

impl StorageWrite {
    /// Create the workload
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Vec::new()),
        }
    }
}

impl Default for StorageWrite {
    fn default() -> Self {
        Self::new()
    }
}

impl Workload for StorageWrite {
    fn name(&self) -> &str {
        "storage_write"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Io
    }

    fn reference_throughput(&self) -> f64 {
        5.0e8
    }

    fn unit(&self) -> &'static str {
        "bytes"
    }

    fn prepare(&self, ctx: &WorkloadContext) -> Result<()> {
        let size = problem_size(ctx, 4 * 1024 * 1024);
        *self.data.lock() = (0..size).map(|i| (i % 256) as u8).collect();
        Ok(())
    }

    fn run_iteration(&self, ctx: &WorkloadContext) -> Result<u64> {
        let data = self.data.lock();
        write_file(&bench_file(ctx, self.name()), &data)?;
        Ok(data.len() as u64)
    }

    fn cleanup(&self, ctx: &WorkloadContext) {
        let _ = std::fs::remove_file(bench_file(ctx, self.name()));
        *self.data.lock() = Vec::new();
    }
}

/// Read back a file from the working directory
pub struct StorageRead;

impl Workload for StorageRead {
    fn name(&self) -> &str {
        "storage_read"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Io
    }

    fn reference_throughput(&self) -> f64 {
        4.0e9
    }

    fn unit(&self) -> &'static str {
        "bytes"
    }

    fn prepare(&self, ctx: &WorkloadContext) -> Result<()> {
        let size = problem_size(ctx, 4 * 1024 * 1024);
        let data: Vec<u8> = (0..size).map(|i| (i % 253) as u8).collect();
        write_file(&bench_file(ctx, self.name()), &data)
    }

    fn run_iteration(&self, ctx: &WorkloadContext) -> Result<u64> {
        let path = bench_file(ctx, self.name());
        let mut file = std::fs::File::open(&path).with_path(&path)?;
        let mut buffer = Vec::new();
        let read = file.read_to_end(&mut buffer).with_path(&path)?;
        black_box(buffer.last().copied());
        Ok(read as u64)
    }

    fn cleanup(&self, ctx: &WorkloadContext) {
        let _ = std::fs::remove_file(bench_file(ctx, self.name()));
    }
}

/// Monotonic clock query rate
pub struct TimerQuery;

impl Workload for TimerQuery {
    fn name(&self) -> &str {
        "timer_query"
    }

    fn subsystem(&self) -> Subsystem {
        Subsystem::Io
    }

    fn reference_throughput(&self) -> f64 {
        4.0e7
    }

    fn unit(&self) -> &'static str {
        "queries"
    }

    fn run_iteration(&self, ctx: &WorkloadContext) -> Result<u64> {
        let queries = problem_size(ctx, 200_000);
        let start = Instant::now();
        let mut last = start;
        for _ in 0..queries {
            last = black_box(Instant::now());
        }
        black_box(last.duration_since(start));
        Ok(queries as u64)
    }
}

/// Built-in workloads for a subsystem
///
/// There are no built-in GPU workloads; GPU scores come from workloads a
/// graphics backend registers.
pub fn builtin_workloads(subsystem: Subsystem) -> Vec<Arc<dyn Workload>> {
    match subsystem {
        Subsystem::Cpu => vec![
            Arc::new(IntegerArithmetic),
            Arc::new(FloatArithmetic),
            Arc::new(BranchPrediction),
            Arc::new(SimdThroughput),
            Arc::new(HashThroughput::new()),
        ],
        Subsystem::Gpu => Vec::new(),
        Subsystem::Memory => vec![
            Arc::new(SequentialWrite::new()),
            Arc::new(SequentialRead::new()),
            Arc::new(RandomAccess::new()),
            Arc::new(Allocation),
        ],
        Subsystem::Io => vec![
            Arc::new(StorageWrite::new()),
            Arc::new(StorageRead),
            Arc::new(TimerQuery),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_ctx(dir: &Path) -> WorkloadContext {
        WorkloadContext {
            quick: true,
            working_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_builtin_names_unique_per_subsystem() {
        for subsystem in Subsystem::ALL {
            let workloads = builtin_workloads(subsystem);
            let mut names: Vec<&str> = workloads.iter().map(|w| w.name()).collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), workloads.len());
            assert!(workloads.iter().all(|w| w.subsystem() == subsystem));
        }
        assert!(builtin_workloads(Subsystem::Gpu).is_empty());
    }

    #[test]
    fn test_every_builtin_runs_quick() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = quick_ctx(dir.path());
        for subsystem in Subsystem::ALL {
            for workload in builtin_workloads(subsystem) {
                workload.prepare(&ctx).unwrap();
                let units = workload.run_iteration(&ctx).unwrap();
                assert!(units > 0, "{} processed nothing", workload.name());
                workload.cleanup(&ctx);
            }
        }
    }

    #[test]
    fn test_storage_cleanup_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = quick_ctx(dir.path());
        let workload = StorageRead;
        workload.prepare(&ctx).unwrap();
        assert!(bench_file(&ctx, "storage_read").exists());
        workload.cleanup(&ctx);
        assert!(!bench_file(&ctx, "storage_read").exists());
    }

    #[test]
    fn test_storage_read_without_prepare_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = StorageRead.run_iteration(&quick_ctx(dir.path())).unwrap_err();
        assert!(matches!(err, crate::error::CapabilityError::Io { .. }));
    }
}
