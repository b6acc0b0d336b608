//! Index build progress reporting.
//!
//! Building an index embeds every chunk, which can take a while with a local
//! model. Progress is emitted on **stderr** so the conversation on stdout
//! stays clean.

use std::io::Write;

/// A single progress event during index construction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BuildProgress {
    /// Reading and extracting the document source.
    Loading,
    /// Documents loaded; splitting them into chunks.
    Chunking { documents: u64 },
    /// n chunks embedded out of total.
    Embedding { n: u64, total: u64 },
    /// Writing the index to disk.
    Persisting { chunks: u64 },
}

/// Receives build progress. Called from the index store.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: BuildProgress);
}

/// Human-friendly progress on stderr: "index  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: BuildProgress) {
        let line = render(&event);
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", line);
        let _ = stderr.flush();
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: BuildProgress) {}
}

fn render(event: &BuildProgress) -> String {
    match event {
        BuildProgress::Loading => "index  loading documents...".to_string(),
        BuildProgress::Chunking { documents } => {
            format!("index  chunking  {} documents", format_number(*documents))
        }
        BuildProgress::Embedding { n, total } => format!(
            "index  embedding  {} / {} chunks",
            format_number(*n),
            format_number(*total)
        ),
        BuildProgress::Persisting { chunks } => {
            format!("index  persisting  {} chunks", format_number(*chunks))
        }
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Human progress when stderr is a TTY, otherwise silent.
pub fn default_reporter() -> Box<dyn ProgressReporter> {
    if atty::is(atty::Stream::Stderr) {
        Box::new(StderrProgress)
    } else {
        Box::new(NoProgress)
    }
}
