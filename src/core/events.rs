//! Progress events and the serialized reporter that renders them.
//!
//! Concurrent tasks never write to stdout directly. They send [`Event`]s over
//! a channel; one consumer task renders each event as whole lines and keeps
//! the error tally.

use super::error::Position;
use console::{pad_str, style, Alignment};
use std::io::Write;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Something worth telling the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    UnitFailed {
        unit: String,
        message: String,
        position: Option<Position>,
    },
    UnitCancelled {
        unit: String,
    },
    /// Unit evaluated but had no `Stacks`
    UnitSkipped {
        unit: String,
        reason: String,
    },
    StackError {
        unit: String,
        stack: String,
        message: String,
    },
    StackSkipped {
        stack: String,
        reason: String,
    },
    StackWritten {
        verb: &'static str,
        stack: String,
        path: String,
    },
    /// Column headings for the status rows of one unit
    StatusHeader {
        unit: String,
    },
    StackStatus {
        stack: String,
        status: String,
        created: String,
        updated: String,
        reason: String,
    },
    /// Pre-rendered document (print command)
    Document {
        unit: String,
        body: String,
    },
    /// Error that aborts the run once the batch settles
    Fatal {
        message: String,
    },
}

impl Event {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Event::UnitFailed { .. }
                | Event::UnitSkipped { .. }
                | Event::StackError { .. }
                | Event::Fatal { .. }
        )
    }
}

/// Totals gathered by the consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub errors: usize,
    pub fatal: Vec<String>,
}

/// Rendering switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Render only error events
    pub only_errors: bool,
    /// Suppress error events (still counted)
    pub hide_errors: bool,
}

/// Widths of the stack, status, created and updated columns.
const STATUS_WIDTHS: [usize; 4] = [40, 28, 26, 26];

/// Pad plain text to a column; styling is applied afterwards.
fn cell(text: &str, width: usize) -> String {
    pad_str(text, width, Alignment::Left, None).into_owned()
}

/// Render one event as the lines shown to the operator.
pub fn render(event: &Event) -> String {
    match event {
        Event::UnitFailed {
            unit,
            message,
            position,
        } => match position {
            Some(pos) => format!("{}\n{} ({})", style(unit).cyan(), style(message).red(), pos),
            None => format!("{}\n{}", style(unit).cyan(), style(message).red()),
        },
        Event::UnitCancelled { unit } => format!("{} {}", style("Cancelled").yellow(), unit),
        Event::UnitSkipped { unit, reason } => {
            format!("{}\n{}", style(unit).cyan(), style(reason).red())
        }
        Event::StackError {
            unit,
            stack,
            message,
        } => format!(
            "{} {}\n{}",
            style(unit).cyan(),
            style(stack).magenta(),
            style(message).red()
        ),
        Event::StackSkipped { stack, reason } => {
            format!("{} {} {}", style("Skipped").white(), style(stack).magenta(), reason)
        }
        Event::StackWritten { verb, stack, path } => format!(
            "{} {} {} {}",
            style(verb).white(),
            style(stack).magenta(),
            style("⤏").white(),
            path
        ),
        Event::StatusHeader { unit } => {
            let header = [
                cell("Stackname", STATUS_WIDTHS[0]),
                cell("Status", STATUS_WIDTHS[1]),
                cell("Created", STATUS_WIDTHS[2]),
                cell("Updated", STATUS_WIDTHS[3]),
                "Reason".into(),
            ]
            .join(" ");
            format!("{}\n{}", style(unit).cyan(), style(header).bold())
        }
        Event::StackStatus {
            stack,
            status,
            created,
            updated,
            reason,
        } => {
            let padded = cell(status, STATUS_WIDTHS[1]);
            let status = if status.contains("FAIL") || status.contains("ROLLBACK") {
                style(padded).red().to_string()
            } else if status.contains("COMPLETE") {
                style(padded).green().bright().to_string()
            } else {
                padded
            };
            format!(
                "{} {} {} {} {}",
                style(cell(stack, STATUS_WIDTHS[0])).magenta(),
                status,
                cell(created, STATUS_WIDTHS[2]),
                cell(updated, STATUS_WIDTHS[3]),
                reason
            )
        }
        Event::Document { unit, body } => format!("{}\n{}", style(unit).cyan(), body.trim_end()),
        Event::Fatal { message } => format!("{}", style(message).red().bold()),
    }
}

/// Cloneable sending side handed to every task.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: mpsc::UnboundedSender<Event>,
}

impl Reporter {
    pub fn emit(&self, event: Event) {
        if event.is_error() {
            tracing::debug!(?event, "error event");
        }
        // Send only fails after the consumer is gone, i.e. during shutdown.
        let _ = self.tx.send(event);
    }
}

/// The single consumer draining a reporter's channel.
pub struct ReporterHandle {
    reporter: Reporter,
    consumer: JoinHandle<Summary>,
}

impl ReporterHandle {
    /// Spawn a consumer writing to any sink.
    pub fn spawn<W: Write + Send + 'static>(options: RenderOptions, mut out: W) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let consumer = tokio::spawn(async move {
            let mut summary = Summary::default();
            while let Some(event) = rx.recv().await {
                let is_error = event.is_error();
                if is_error {
                    summary.errors += 1;
                }
                if let Event::Fatal { message } = &event {
                    summary.fatal.push(message.clone());
                }
                let visible = if is_error {
                    !options.hide_errors
                } else {
                    !options.only_errors
                };
                if visible {
                    let _ = writeln!(out, "{}", render(&event));
                }
            }
            let _ = out.flush();
            summary
        });
        Self {
            reporter: Reporter { tx },
            consumer,
        }
    }

    pub fn reporter(&self) -> Reporter {
        self.reporter.clone()
    }

    /// Close the channel and wait for every queued event to render.
    /// Clones of the reporter still alive elsewhere keep the consumer running.
    pub async fn finish(self) -> Summary {
        let Self { reporter, consumer } = self;
        drop(reporter);
        consumer.await.unwrap_or_default()
    }
}
