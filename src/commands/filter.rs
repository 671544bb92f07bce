//! Filter command.
//!
//! Each stdin line is one batch: the work unit that was processed and the
//! outputs it produced.
//!
//! ```json
//! {"origin": {"url": "https://example.com/list"}, "outputs": [
//!     {"type": "request", "url": "https://example.com/a"},
//!     {"type": "item", "title": "A"}
//! ]}
//! ```
//!
//! Forwarded outputs are written to stdout, one JSON object per line, in
//! their original order.

use std::io::{BufRead, BufWriter, Write};

use anyhow::Context;
use deltafetch::{DeltaFetchConfig, Job, Output, PipelineStage, WorkUnit, install};
use serde::Deserialize;

/// One processed work unit and its outputs.
#[derive(Debug, Deserialize)]
struct Batch {
    origin: WorkUnit,
    #[serde(default)]
    outputs: Vec<Output>,
}

/// Totals for one filter run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FilterStats {
    batches: usize,
    received: usize,
    forwarded: usize,
}

/// Filter command.
pub fn cmd_filter(config: &DeltaFetchConfig, job_name: &str, reset: bool) -> anyhow::Result<()> {
    if !config.enabled {
        tracing::warn!(
            "Deltafetch is disabled (set DELTAFETCH_ENABLED=1); outputs pass through unchanged"
        );
    }

    let job = Job::new(job_name).with_reset(reset);
    let stage = install(config.clone());
    stage
        .job_opened(&job)
        .with_context(|| format!("failed to open job '{job_name}'"))?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let result = run_filter(stage.as_ref(), stdin.lock(), BufWriter::new(stdout.lock()));

    // Close even when the run failed so the store is flushed
    let closed = stage.job_closed(&job);
    let stats = result?;
    closed.with_context(|| format!("failed to close job '{job_name}'"))?;

    tracing::info!(
        job = job_name,
        batches = stats.batches,
        received = stats.received,
        forwarded = stats.forwarded,
        "Filter run complete"
    );
    Ok(())
}

/// Streams batches from `input` through `stage` into `output`.
fn run_filter<R, W>(
    stage: &dyn PipelineStage,
    input: R,
    mut output: W,
) -> anyhow::Result<FilterStats>
where
    R: BufRead,
    W: Write,
{
    let mut stats = FilterStats::default();

    for (index, line) in input.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("failed to read line {line_no}"))?;
        if line.trim().is_empty() {
            continue;
        }

        let batch: Batch = serde_json::from_str(&line)
            .with_context(|| format!("invalid batch on line {line_no}"))?;
        stats.batches += 1;
        stats.received += batch.outputs.len();

        let forwarded = stage.process_output(&batch.origin, batch.outputs)?;
        stats.forwarded += forwarded.len();
        for out in &forwarded {
            serde_json::to_writer(&mut output, out)?;
            output.write_all(b"\n")?;
        }
    }

    output.flush()?;
    Ok(stats)
}
