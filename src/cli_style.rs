/*!
 * Roster CLI Style System
 *
 * Themed text, tables for batch results, connection health and audit history.
 */

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use console::{style, StyledObject};
use roster_bulk::{BatchJob, BatchStatus};
use roster_connect::ConnectionHealth;
use roster_core_audit::{OperationRecord, OperationStatus};
use roster_core_resilience::CircuitState;

// ============================================================================
// THEME COLORS
// ============================================================================

/// Brand colors for consistent styling
pub struct Theme;

impl Theme {
    /// Primary accent color (cyan/blue)
    pub fn primary<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan()
    }

    pub fn success<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).green()
    }

    pub fn warning<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).yellow()
    }

    pub fn error<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).red()
    }

    /// Muted/secondary text (dim)
    pub fn muted<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).dim()
    }

    /// Header style (bold cyan)
    pub fn header<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan().bold()
    }
}

// ============================================================================
// ICONS
// ============================================================================

/// Unicode icons for visual feedback
pub struct Icons;

impl Icons {
    pub const SUCCESS: &'static str = "✓";
    pub const ERROR: &'static str = "✗";
    pub const WARNING: &'static str = "⚠";
    pub const INFO: &'static str = "ℹ";
    pub const RUNNING: &'static str = "◐";
    pub const ARROW_RIGHT: &'static str = "→";
}

/// Draw a section header with a line
pub fn section_header(title: &str) {
    let line_len = 50 - title.len().min(40);
    println!(
        "\n{} {}",
        Theme::header(title),
        Theme::muted("─".repeat(line_len))
    );
}

// ============================================================================
// TABLES
// ============================================================================

/// Create a styled data table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Create a minimal table (no outer borders)
pub fn create_minimal_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_NO_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header_cells(titles: &[&str]) -> Vec<Cell> {
    titles
        .iter()
        .map(|title| Cell::new(title).fg(Color::Cyan).add_attribute(Attribute::Bold))
        .collect()
}

/// Summary of a finished batch
pub fn batch_summary_table(job: &BatchJob) -> Table {
    let mut table = create_table();
    table.set_header(vec![
        Cell::new("Batch Summary")
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        Cell::new(""),
    ]);

    table.add_row(vec![Cell::new("Operation"), Cell::new(job.operation_type.as_str())]);
    table.add_row(vec![
        Cell::new("Operation Id"),
        Cell::new(job.operation_id.as_str()).fg(Color::DarkGrey),
    ]);
    table.add_row(vec![Cell::new("Status"), batch_status_cell(job.status)]);
    table.add_row(vec![
        Cell::new("Total"),
        Cell::new(job.total_items.to_string()).add_attribute(Attribute::Bold),
    ]);
    table.add_row(vec![
        Cell::new("Succeeded"),
        Cell::new(job.processed_items.to_string())
            .fg(Color::Green)
            .add_attribute(Attribute::Bold),
    ]);

    if job.failed_items > 0 {
        table.add_row(vec![
            Cell::new("Failed"),
            Cell::new(job.failed_items.to_string())
                .fg(Color::Red)
                .add_attribute(Attribute::Bold),
        ]);
    }

    if let Some(finished) = job.finished_at {
        let secs = (finished - job.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        table.add_row(vec![Cell::new("Duration"), Cell::new(format_duration(secs))]);
    }

    if job.cancelled {
        table.add_row(vec![
            Cell::new("Cancelled"),
            Cell::new(format!("{} yes", Icons::WARNING)).fg(Color::Yellow),
        ]);
    }

    if let Some(ref detail) = job.error_detail {
        table.add_row(vec![Cell::new("Error"), Cell::new(detail).fg(Color::Red)]);
    }

    table
}

/// Failed targets with their reasons, at most `limit` rows
pub fn failures_table(job: &BatchJob, limit: usize) -> Table {
    let mut table = create_table();
    table.set_header(header_cells(&["Target", "Reason"]));

    for (key, reason) in job.errors.iter().take(limit) {
        table.add_row(vec![Cell::new(key), Cell::new(reason).fg(Color::Red)]);
    }

    let hidden = job.errors.len().saturating_sub(limit);
    if hidden > 0 {
        table.add_row(vec![
            Cell::new(format!("… {} more", hidden)).fg(Color::DarkGrey),
            Cell::new(""),
        ]);
    }

    table
}

/// Connection health as key/value rows
pub fn health_table(health: &ConnectionHealth) -> Table {
    let mut table = create_minimal_table();

    let rows = [
        ("Connected", bool_cell(health.connected)),
        ("Token valid", bool_cell(health.token_valid)),
        ("Circuit", circuit_cell(health.circuit_state)),
        (
            "Failures",
            Cell::new(health.failure_count.to_string()).fg(Color::White),
        ),
        (
            "Principal",
            Cell::new(health.principal_id.as_deref().unwrap_or("-")),
        ),
        (
            "Last success",
            Cell::new(
                health
                    .last_success
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string()),
            )
            .fg(Color::DarkGrey),
        ),
    ];

    for (key, value) in rows {
        table.add_row(vec![Cell::new(key).fg(Color::Cyan), value]);
    }

    table
}

/// Audited operations, newest last
pub fn history_table(records: &[OperationRecord]) -> Table {
    let mut table = create_table();
    table.set_header(header_cells(&[
        "Started", "Operation", "Target", "Status", "Progress", "Message",
    ]));

    for record in records {
        let progress = if record.total > 0 {
            format!("{}/{} ({} failed)", record.processed, record.total, record.failed)
        } else {
            "-".to_string()
        };
        table.add_row(vec![
            Cell::new(record.created_at.format("%Y-%m-%d %H:%M:%S").to_string())
                .fg(Color::DarkGrey),
            Cell::new(record.operation_type.as_str()),
            Cell::new(format!("{}:{}", record.target_type, record.target_id)),
            operation_status_cell(record.status),
            Cell::new(progress),
            Cell::new(record.message.as_deref().unwrap_or(&record.name)),
        ]);
    }

    table
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn bool_cell(value: bool) -> Cell {
    if value {
        Cell::new(format!("{} Yes", Icons::SUCCESS)).fg(Color::Green)
    } else {
        Cell::new(format!("{} No", Icons::ERROR)).fg(Color::Red)
    }
}

fn circuit_cell(state: CircuitState) -> Cell {
    let color = match state {
        CircuitState::Closed => Color::Green,
        CircuitState::HalfOpen => Color::Yellow,
        CircuitState::Open => Color::Red,
    };
    Cell::new(state.as_str()).fg(color)
}

fn batch_status_cell(status: BatchStatus) -> Cell {
    let (icon, color) = match status {
        BatchStatus::Completed => (Icons::SUCCESS, Color::Green),
        BatchStatus::PartialSuccess => (Icons::WARNING, Color::Yellow),
        BatchStatus::Failed => (Icons::ERROR, Color::Red),
        BatchStatus::Pending | BatchStatus::InProgress => (Icons::RUNNING, Color::DarkGrey),
    };
    Cell::new(format!("{} {}", icon, status.as_str()))
        .fg(color)
        .add_attribute(Attribute::Bold)
}

fn operation_status_cell(status: OperationStatus) -> Cell {
    let color = match status {
        OperationStatus::Completed => Color::Green,
        OperationStatus::PartialSuccess => Color::Yellow,
        OperationStatus::Failed => Color::Red,
        OperationStatus::Pending | OperationStatus::InProgress => Color::DarkGrey,
    };
    Cell::new(status.as_str()).fg(color)
}

/// Format duration into human-readable string
pub fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining = secs % 60.0;
        format!("{}m {:.0}s", mins, remaining)
    } else {
        let hours = (secs / 3600.0).floor();
        let mins = ((secs % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours, mins)
    }
}

/// Print a styled error message with optional suggestion
pub fn print_error(message: &str, suggestion: Option<&str>) {
    eprintln!(
        "\n{} {}",
        Theme::error(format!("{} Error:", Icons::ERROR)),
        message
    );

    if let Some(hint) = suggestion {
        eprintln!(
            "  {} {}",
            Theme::muted(Icons::ARROW_RIGHT),
            Theme::muted(hint)
        );
    }
    eprintln!();
}

pub fn print_warning(message: &str) {
    eprintln!(
        "{} {}",
        Theme::warning(Icons::WARNING.to_string()),
        Theme::warning(message)
    );
}

pub fn print_success(message: &str) {
    println!(
        "{} {}",
        Theme::success(Icons::SUCCESS.to_string()),
        Theme::success(message)
    );
}

pub fn print_info(message: &str) {
    println!("{} {}", Theme::primary(Icons::INFO.to_string()), message);
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core_audit::{OperationId, OperationType};

    fn finished_job() -> BatchJob {
        let mut job = BatchJob::new(OperationId::generate(), OperationType::AddMembers, 3);
        job.start();
        job.merge_chunk(vec![
            roster_bulk::ItemResult::success("ana@school.edu"),
            roster_bulk::ItemResult::success("ben@school.edu"),
            roster_bulk::ItemResult::failure("ghost@school.edu", "User not found in directory"),
        ]);
        job.finalize();
        job
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.5), "500ms");
        assert_eq!(format_duration(1.5), "1.5s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3660.0), "1h 1m");
    }

    #[test]
    fn test_batch_summary_table() {
        let rendered = batch_summary_table(&finished_job()).to_string();
        assert!(rendered.contains("PartialSuccess"));
        assert!(rendered.contains("Failed"));
        assert!(rendered.contains("add_members"));
    }

    #[test]
    fn test_failures_table_truncates() {
        let job = finished_job();
        let rendered = failures_table(&job, 10).to_string();
        assert!(rendered.contains("ghost@school.edu"));
        assert!(!rendered.contains("more"));

        let mut job = job;
        job.errors.insert("zed@school.edu".into(), "Already a member".into());
        let rendered = failures_table(&job, 1).to_string();
        assert!(rendered.contains("1 more"));
    }
}
