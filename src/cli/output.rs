//! Output formatting for CLI commands.
//!
//! Renders engine events and snapshots as colored text or JSON.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::deploy::StepOp;
use crate::engine::{
    DiagEventPayload, Event, ResourceChanges, Severity, StepEventMetadata, SummaryEventPayload,
};
use crate::snapshot::Snapshot;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Change count row for table display.
#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Count")]
    count: usize,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Type")]
    type_token: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the output format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats one engine event, or `None` if it has no visible output.
    ///
    /// JSON output is one object per line.
    #[must_use]
    pub fn format_event(&self, event: &Event) -> Option<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string(event).ok(),
            OutputFormat::Text => Self::format_event_text(event),
        }
    }

    fn format_event_text(event: &Event) -> Option<String> {
        match event {
            Event::StdoutColor(text) => Some(text.clone()),
            Event::Diag(diag) => Some(Self::format_diag(diag)),
            Event::ResourcePre(pre) => Some(Self::format_step_line(&pre.metadata)),
            Event::ResourceOutputs(outputs) => outputs.debug.then(|| {
                let count = outputs
                    .metadata
                    .new
                    .as_ref()
                    .map_or(0, |state| state.outputs.len());
                format!("    {} output(s) for {}", count, outputs.metadata.urn)
                    .dimmed()
                    .to_string()
            }),
            Event::ResourceOperationFailed(failed) => Some(format!(
                "{} {} {} failed (status: {})",
                "✗".red(),
                failed.metadata.op,
                failed.metadata.urn,
                failed.status
            )),
            Event::Prelude(prelude) => {
                let mut output = String::new();
                let title = if prelude.is_preview {
                    "Previewing update"
                } else {
                    "Updating"
                };
                let _ = writeln!(output, "{}", title.bold());
                for (key, value) in &prelude.config {
                    let _ = writeln!(output, "   {key}: {value}");
                }
                Some(output.trim_end().to_string())
            }
            Event::UpdateSummary(summary) => Some(Self::format_summary(summary)),
            Event::Cancel => None,
        }
    }

    fn format_diag(diag: &DiagEventPayload) -> String {
        let prefix = match diag.severity {
            Severity::Debug => "debug:".dimmed().to_string(),
            Severity::Info => String::new(),
            Severity::Infoerr => "info:".cyan().to_string(),
            Severity::Warning => "warning:".yellow().to_string(),
            Severity::Error => "error:".red().bold().to_string(),
        };

        let mut line = String::new();
        if !prefix.is_empty() {
            let _ = write!(line, "{prefix} ");
        }
        if let Some(urn) = &diag.urn {
            let _ = write!(line, "{}: ", urn.name());
        }
        line.push_str(diag.message.trim_end());
        line
    }

    fn format_step_line(metadata: &StepEventMetadata) -> String {
        format!(
            "  {} {} {}",
            Self::format_op(metadata.op),
            metadata.type_token,
            metadata.urn.name()
        )
    }

    fn format_summary(summary: &SummaryEventPayload) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "\n{}", "Resources:".bold());

        if summary.resource_changes.is_empty() {
            let _ = writeln!(output, "   no changes");
        } else {
            let _ = writeln!(output, "{}", Self::changes_table(&summary.resource_changes));
        }

        #[allow(clippy::cast_precision_loss)]
        let seconds = summary.duration_ms as f64 / 1000.0;
        let _ = write!(output, "\nDuration: {seconds:.1}s");

        if summary.maybe_corrupt {
            let _ = write!(
                output,
                "\n{} a provider could not confirm an operation; the snapshot may not match reality",
                "⚠".yellow()
            );
        }
        output
    }

    fn changes_table(changes: &ResourceChanges) -> String {
        let rows: Vec<ChangeRow> = changes
            .iter()
            .map(|(op, count)| ChangeRow {
                operation: Self::format_op(op),
                count,
            })
            .collect();
        Table::new(rows).to_string()
    }

    /// Formats a recorded snapshot.
    #[must_use]
    pub fn format_snapshot(&self, snapshot: &Snapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(snapshot).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nSnapshot: {}\n\n", snapshot.stack.bold());
                let _ = writeln!(output, "   Version: {}", snapshot.version);
                let _ = writeln!(output, "   Last updated: {}", snapshot.last_updated);
                let _ = writeln!(output, "   Resources: {}", snapshot.resources.len());

                if !snapshot.resources.is_empty() {
                    let rows: Vec<ResourceRow> = snapshot
                        .resources
                        .iter()
                        .map(|r| ResourceRow {
                            type_token: r.type_token.clone(),
                            name: Self::truncate(r.urn.name(), 40),
                            id: r.id.clone().unwrap_or_else(|| String::from("-")),
                            status: if r.delete {
                                "pending delete".yellow().to_string()
                            } else {
                                "live".green().to_string()
                            },
                        })
                        .collect();
                    let _ = writeln!(output, "\n{}", Table::new(rows));
                }

                if !snapshot.plugins.is_empty() {
                    let _ = writeln!(output, "\n   Plugins:");
                    for plugin in &snapshot.plugins {
                        let _ = writeln!(output, "     - {plugin}");
                    }
                }

                if !snapshot.pending_operations.is_empty() {
                    let _ = writeln!(
                        output,
                        "\n{} {} operation(s) did not finish:",
                        "⚠".yellow(),
                        snapshot.pending_operations.len()
                    );
                    for pending in &snapshot.pending_operations {
                        let _ = writeln!(
                            output,
                            "     {} {} (started {})",
                            pending.op,
                            pending.urn,
                            pending.started_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats an operation with color.
    fn format_op(op: StepOp) -> String {
        match op {
            StepOp::Same => "same".dimmed().to_string(),
            StepOp::Create => "+create".green().to_string(),
            StepOp::Update => "~update".yellow().to_string(),
            StepOp::Delete => "-delete".red().to_string(),
            StepOp::Replace => "+-replace".magenta().to_string(),
            StepOp::CreateReplacement => "++create-replacement".green().to_string(),
            StepOp::DeleteReplaced => "--delete-replaced".red().to_string(),
            StepOp::Read => ">read".cyan().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}
