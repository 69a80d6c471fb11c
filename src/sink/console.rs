use super::Sink;
use std::io::Write;

/// Appends every line to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

impl Sink for ConsoleSink {
    fn write(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        // A closed stdout has nowhere to report to.
        let _ = writeln!(stdout, "{line}");
    }
}
