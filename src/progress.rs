//! Wave progress reporting.
//!
//! Reports observable progress during `sweep run` so users see which wave
//! is in flight, how many chunks have settled, and roughly how many remain.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.
//!
//! This is separate from `tracing` logs: progress is for people watching a
//! run, logs are for diagnosing one.

use clap::ValueEnum;
use std::io::Write;

/// A single progress event for a run.
#[derive(Clone, Debug, PartialEq)]
pub enum WaveProgressEvent {
    /// A wave of `chunks` chunks has been dispatched.
    WaveStarted {
        wave: usize,
        chunks: usize,
        processed: usize,
        estimated_total: usize,
    },
    /// Every chunk of the wave has settled.
    WaveFinished {
        wave: usize,
        succeeded: usize,
        failed: usize,
        processed: usize,
        estimated_total: usize,
        elapsed_ms: u64,
    },
    /// The run is over.
    Finished {
        processed: usize,
        total: usize,
        terminated_early: bool,
    },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait WaveProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the scheduler between waves.
    fn report(&self, event: WaveProgressEvent);
}

/// Human-friendly progress on stderr: "wave 2  dispatched  4 chunks  (8 / ~31)".
pub struct StderrProgress;

impl WaveProgressReporter for StderrProgress {
    fn report(&self, event: WaveProgressEvent) {
        let line = match &event {
            WaveProgressEvent::WaveStarted {
                wave,
                chunks,
                processed,
                estimated_total,
            } => format!(
                "wave {}  dispatched  {} chunks  ({} / ~{})\n",
                wave,
                chunks,
                format_number(*processed as u64),
                format_number(*estimated_total as u64)
            ),
            WaveProgressEvent::WaveFinished {
                wave,
                succeeded,
                failed,
                processed,
                estimated_total,
                elapsed_ms,
            } => format!(
                "wave {}  done  {} ok, {} failed in {:.1}s  ({} / ~{})\n",
                wave,
                succeeded,
                failed,
                *elapsed_ms as f64 / 1000.0,
                format_number(*processed as u64),
                format_number(*estimated_total as u64)
            ),
            WaveProgressEvent::Finished {
                processed,
                total,
                terminated_early,
            } => format!(
                "sweep  {}  {} / {} chunks analyzed\n",
                if *terminated_early { "stopped early" } else { "complete" },
                format_number(*processed as u64),
                format_number(*total as u64)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &WaveProgressEvent) -> serde_json::Value {
        match event {
            WaveProgressEvent::WaveStarted {
                wave,
                chunks,
                processed,
                estimated_total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "wave_started",
                "wave": wave,
                "chunks": chunks,
                "processed": processed,
                "estimated_total": estimated_total
            }),
            WaveProgressEvent::WaveFinished {
                wave,
                succeeded,
                failed,
                processed,
                estimated_total,
                elapsed_ms,
            } => serde_json::json!({
                "event": "progress",
                "phase": "wave_finished",
                "wave": wave,
                "succeeded": succeeded,
                "failed": failed,
                "processed": processed,
                "estimated_total": estimated_total,
                "elapsed_ms": elapsed_ms
            }),
            WaveProgressEvent::Finished {
                processed,
                total,
                terminated_early,
            } => serde_json::json!({
                "event": "finished",
                "processed": processed,
                "total": total,
                "terminated_early": terminated_early
            }),
        }
    }
}

impl WaveProgressReporter for JsonProgress {
    fn report(&self, event: WaveProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl WaveProgressReporter for NoProgress {
    fn report(&self, _event: WaveProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Where wave progress goes. Selected with `sweep run --progress`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProgressMode {
    /// No progress output.
    #[value(alias = "none")]
    Off,
    /// One line per wave on stderr.
    Human,
    /// One JSON object per event on stderr.
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn WaveProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
