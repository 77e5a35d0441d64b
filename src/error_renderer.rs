//! Error rendering using ariadne
//!
//! Host errors that carry a cursor position are rendered with the query
//! text and the offending token underlined. Everything else is rendered the
//! way the host prints diagnostics: `ERROR:`, `DETAIL:` and `HINT:` lines.

use crate::{Error, ErrorRecord, Severity};
use ariadne::{ColorGenerator, Label, Report, ReportKind, Source};
use std::io::Write;

const SOURCE_ID: &str = "<query>";

/// Render an error with formatting to stderr
///
/// # Example
/// ```no_run
/// use pgbridge::{ExecuteOptions, Executor, render_error};
/// # fn demo(session: &pgbridge::Session) -> pgbridge::Result<()> {
/// let executor = Executor::connect(session)?;
/// if let Err(e) = executor.query::<(i32,)>("SELEC 1", (), ExecuteOptions::default()) {
///     render_error(&e);
/// }
/// # Ok(())
/// # }
/// ```
pub fn render_error(error: &Error) {
    render_error_to_writer(error, &mut std::io::stderr(), true).ok();
}

/// Render an error to a specific writer
pub fn render_error_to(error: &Error, writer: &mut dyn Write) -> std::io::Result<()> {
    render_error_to_writer(error, writer, true)
}

/// Render an error to a String (useful for logs and server messages)
pub fn render_error_to_string(error: &Error) -> String {
    let mut buf = Vec::new();
    render_error_to_writer(error, &mut buf, true).ok();
    String::from_utf8_lossy(&buf).to_string()
}

/// Render an error to a String without color codes (useful for tests)
pub fn render_error_to_string_no_color(error: &Error) -> String {
    let mut buf = Vec::new();
    render_error_to_writer(error, &mut buf, false).ok();
    String::from_utf8_lossy(&buf).to_string()
}

fn render_error_to_writer(
    error: &Error,
    writer: &mut dyn Write,
    use_color: bool,
) -> std::io::Result<()> {
    match error {
        Error::Host(record) => match query_span(record) {
            Some((query, span)) => render_with_query(record, query, span, writer, use_color),
            None => render_lines(record, writer),
        },
        other => writeln!(writer, "{}:  {}", Severity::Error, other),
    }
}

/// The query and the character span of the token at the cursor.
fn query_span(record: &ErrorRecord) -> Option<(&str, std::ops::Range<usize>)> {
    let query = record.query.as_deref()?;
    let position = record.cursor_position?;
    let len = query.chars().count();
    if position == 0 || len == 0 {
        return None;
    }
    // Past the end means "at end of input": point at the last character.
    let start = (position - 1).min(len - 1);
    let token = query
        .chars()
        .skip(start)
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .count();
    Some((query, start..start + token.max(1)))
}

fn render_with_query(
    record: &ErrorRecord,
    query: &str,
    span: std::ops::Range<usize>,
    writer: &mut dyn Write,
    use_color: bool,
) -> std::io::Result<()> {
    let mut colors = ColorGenerator::new();
    colors.next(); // Skip the first color.

    let kind = match record.severity {
        s if s.is_error() => ReportKind::Error,
        Severity::Warning => ReportKind::Warning,
        _ => ReportKind::Advice,
    };

    let mut report = Report::build(kind, (SOURCE_ID, span.clone()))
        .with_code(record.sqlstate)
        .with_message(&record.message)
        .with_config(ariadne::Config::default().with_color(use_color))
        .with_label(
            Label::new((SOURCE_ID, span))
                .with_message(&record.message)
                .with_color(colors.next()),
        );
    if let Some(detail) = &record.detail {
        report = report.with_note(detail);
    }
    if let Some(hint) = &record.hint {
        report = report.with_help(hint);
    }

    report
        .finish()
        .write((SOURCE_ID, Source::from(query)), &mut *writer)
}

fn render_lines(record: &ErrorRecord, writer: &mut dyn Write) -> std::io::Result<()> {
    writeln!(writer, "{}:  {}", record.severity, record.message)?;
    if let Some(detail) = &record.detail {
        writeln!(writer, "DETAIL:  {detail}")?;
    }
    if let Some(hint) = &record.hint {
        writeln!(writer, "HINT:  {hint}")?;
    }
    Ok(())
}
