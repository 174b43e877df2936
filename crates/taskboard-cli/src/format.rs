//! Plain-text rendering for boards and tasks.

use chrono::{DateTime, NaiveDate, Utc};
use taskboard_core::models::{Board, Task};

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%b %d, %Y").to_string()
}

pub fn format_deadline(deadline: Option<&DateTime<Utc>>) -> String {
    deadline.map(format_date).unwrap_or_else(|| "-".to_string())
}

/// Accepts RFC 3339 or a bare `YYYY-MM-DD`, which means end of that day (UTC).
pub fn parse_deadline(s: &str) -> Result<DateTime<Utc>, String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid deadline '{}' (expected YYYY-MM-DD or RFC 3339)", s))
}

const NAME_WIDTH: usize = 40;
const TITLE_WIDTH: usize = 48;

pub fn board_table(boards: &[Board]) -> String {
    if boards.is_empty() {
        return "No boards.".to_string();
    }
    let mut out = format!("{:>6}  {:<width$}  {}\n", "ID", "NAME", "UPDATED", width = NAME_WIDTH);
    for board in boards {
        out.push_str(&format!(
            "{:>6}  {:<width$}  {}\n",
            board.id,
            truncate_string(&board.name, NAME_WIDTH),
            format_date(&board.updated_at),
            width = NAME_WIDTH
        ));
    }
    out.trim_end().to_string()
}

pub fn task_table(tasks: &[Task], now: DateTime<Utc>) -> String {
    if tasks.is_empty() {
        return "No tasks.".to_string();
    }
    let mut out = format!(
        "{:>6}  {:<12}  {:<8}  {:<14}  {}\n",
        "ID", "STATUS", "PRIORITY", "DEADLINE", "TITLE"
    );
    for task in tasks {
        let mut deadline = format_deadline(task.deadline.as_ref());
        if task.is_overdue(now) {
            deadline.push_str(" !");
        }
        out.push_str(&format!(
            "{:>6}  {:<12}  {:<8}  {:<14}  {}\n",
            task.id,
            task.status.to_string(),
            task.priority.as_str(),
            deadline,
            truncate_string(&task.title, TITLE_WIDTH)
        ));
    }
    out.trim_end().to_string()
}
