//! Terminal destination for streamed turn events.

use std::io::Write;

use console::style;

use colloquy_core::chat::pipeline::{DeltaSink, SinkClosed};
use colloquy_types::chat::TurnEvent;

/// Writes deltas to `out` as they arrive and backend errors to `err`.
pub struct TerminalSink<W: Write + Send, E: Write + Send> {
    out: W,
    err: E,
    wrote_text: bool,
}

impl<W: Write + Send, E: Write + Send> TerminalSink<W, E> {
    pub fn new(out: W, err: E) -> Self {
        Self {
            out,
            err,
            wrote_text: false,
        }
    }

    pub fn into_inner(self) -> (W, E) {
        (self.out, self.err)
    }
}

impl TerminalSink<std::io::Stdout, std::io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdout(), std::io::stderr())
    }
}

impl<W: Write + Send, E: Write + Send> DeltaSink for TerminalSink<W, E> {
    fn emit(&mut self, event: TurnEvent) -> Result<(), SinkClosed> {
        match event {
            TurnEvent::Delta { content } => {
                self.wrote_text = true;
                self.out
                    .write_all(content.as_bytes())
                    .and_then(|_| self.out.flush())
                    .map_err(|_| SinkClosed)
            }
            TurnEvent::Error { message } => {
                if self.wrote_text {
                    let _ = writeln!(self.out);
                }
                writeln!(self.err, "  {} {}", style("✗").red().bold(), message)
                    .map_err(|_| SinkClosed)
            }
            TurnEvent::Done { .. } => {
                if self.wrote_text {
                    writeln!(self.out).map_err(|_| SinkClosed)?;
                }
                self.out.flush().map_err(|_| SinkClosed)
            }
        }
    }
}
