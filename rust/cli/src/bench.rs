//! GRU benchmark CLI for parameter sweeps.
//!
//! Usage:
//!   gru-bench --sequence-length 1024
//!   gru-bench --sequence-length 1024 --backend reference --backward --json
//!   gru-bench --cu-seqlens 0,700,1900,2700 --dtype bf16

use std::time::Instant;

use burn::{prelude::*, tensor::backend::AutodiffBackend};
use clap::Parser;
use gru_cli::{
    CaseConfig, DType, GruBackend, KernelBackend, case_batch, case_inputs, select_engine,
};
use gru_core::{
    GpuAutodiffBackend, GpuBackend, PackedBatch, RecurrenceEngine, check_gradient_clipping,
    test_utils::GruTestInputs,
};
use half::{bf16, f16};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gru-bench", about = "GRU benchmark for parameter sweeps")]
struct Args {
    #[command(flatten)]
    case: CaseConfig,

    #[arg(long, value_enum, default_value = "fused")]
    backend: KernelBackend,

    /// Time forward and backward together
    #[arg(long)]
    backward: bool,

    #[arg(long, default_value = "3")]
    warmup: usize,

    #[arg(long, default_value = "10")]
    repeats: usize,

    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct BenchResult {
    backend: KernelBackend,
    dtype: DType,
    backward: bool,
    batch_size: usize,
    total_tokens: usize,
    max_seqlen: usize,
    state_size: usize,
    num_heads: usize,
    time_ms: f64,
    throughput: f64,
}

/// Mean wall time of `step` in milliseconds, synchronising the device after each call.
/// The first failing step aborts the measurement.
fn time_ms<B: Backend>(
    args: &Args,
    device: &B::Device,
    mut step: impl FnMut() -> gru_cli::Result<()>,
) -> gru_cli::Result<f64> {
    for _ in 0..args.warmup {
        step()?;
        let _ = B::sync(device);
    }

    let mut total = 0.0;
    for _ in 0..args.repeats {
        let _ = B::sync(device);
        let start = Instant::now();
        step()?;
        let _ = B::sync(device);
        total += start.elapsed().as_secs_f64();
    }
    Ok((total / args.repeats.max(1) as f64) * 1000.0)
}

fn bench_fwd<B: GruBackend>(
    args: &Args,
    batch: &PackedBatch,
    data: &GruTestInputs,
    gradient_clipping: Option<f32>,
) -> gru_cli::Result<f64> {
    let device = Default::default();
    let engine = select_engine::<B>(args.backend);
    let inputs = data.to_inputs::<B>(&device);

    time_ms::<B>(args, &device, || {
        engine.run(inputs.clone(), batch, gradient_clipping)?;
        Ok(())
    })
}

fn bench_bwd<B: AutodiffBackend + GruBackend>(
    args: &Args,
    batch: &PackedBatch,
    data: &GruTestInputs,
    gradient_clipping: Option<f32>,
) -> gru_cli::Result<f64> {
    let device = Default::default();
    let engine = select_engine::<B>(args.backend);
    let inputs = data.to_inputs::<B>(&device).require_grad();

    time_ms::<B>(args, &device, || {
        let out = engine.run(inputs.clone(), batch, gradient_clipping)?;
        let _grads = (out.output.sum() + out.output_state.sum()).backward();
        Ok(())
    })
}

fn run(args: &Args) -> gru_cli::Result<BenchResult> {
    let batch = case_batch(&args.case)?;
    let data = case_inputs(&args.case, &batch)?;
    let clip = check_gradient_clipping(args.case.gradient_clipping)?;

    let time_ms = match (args.case.dtype, args.backward) {
        (DType::F32, false) => bench_fwd::<GpuBackend<f32>>(args, &batch, &data, clip)?,
        (DType::F32, true) => bench_bwd::<GpuAutodiffBackend<f32>>(args, &batch, &data, clip)?,
        (DType::F16, false) => bench_fwd::<GpuBackend<f16>>(args, &batch, &data, clip)?,
        (DType::F16, true) => bench_bwd::<GpuAutodiffBackend<f16>>(args, &batch, &data, clip)?,
        (DType::BF16, false) => bench_fwd::<GpuBackend<bf16>>(args, &batch, &data, clip)?,
        (DType::BF16, true) => bench_bwd::<GpuAutodiffBackend<bf16>>(args, &batch, &data, clip)?,
    };

    Ok(BenchResult {
        backend: args.backend,
        dtype: args.case.dtype,
        backward: args.backward,
        batch_size: batch.batch_size(),
        total_tokens: batch.total_tokens(),
        max_seqlen: batch.max_seqlen(),
        state_size: args.case.state_size,
        num_heads: args.case.num_heads,
        time_ms,
        throughput: batch.total_tokens() as f64 / (time_ms / 1000.0),
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let result = match run(&args) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if args.json {
        match serde_json::to_string(&result) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing result: {e}");
                std::process::exit(1);
            }
        }
    } else {
        println!("GRU Benchmark");
        println!("=============");
        println!("Backend: {}", result.backend);
        println!("Dtype: {}", result.dtype);
        println!("Backward: {}", result.backward);
        println!(
            "Batch: {}, Tokens: {}, Max seqlen: {}",
            result.batch_size, result.total_tokens, result.max_seqlen
        );
        println!(
            "State size: {}, Heads: {}",
            result.state_size, result.num_heads
        );
        println!();
        println!("Time: {:.2} ms", result.time_ms);
        println!("Throughput: {:.0} tok/s", result.throughput);
    }
}
