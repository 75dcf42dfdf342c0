//! CSV export of logged sessions.
//!
//! Each row carries both multipliers next to the stored effective minutes,
//! plus the duration recovered from those effective minutes, so a
//! spreadsheet can check every row against the forward formula.

use std::collections::HashMap;
use std::io::Write;

use chrono::SecondsFormat;

use crate::error::Result;
use crate::mastery::{duration_from_effective, duration_multiplier, streak_multiplier};
use crate::storage::{SessionEntry, Technique};

pub const CSV_HEADER: &str = "session_id,technique_id,technique_name,occurred_at,source,\
duration_minutes,duration_multiplier,bonus_streak,streak_multiplier,effective_minutes,\
recovered_duration_minutes";

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Write `sessions` as CSV, resolving technique names from `techniques`.
///
/// Returns the number of data rows written.
pub fn write_sessions_csv<W: Write>(
    out: &mut W,
    sessions: &[SessionEntry],
    techniques: &[Technique],
) -> Result<usize> {
    let names: HashMap<&str, &str> = techniques
        .iter()
        .map(|t| (t.id.as_str(), t.name.as_str()))
        .collect();

    writeln!(out, "{CSV_HEADER}")?;
    for s in sessions {
        let name = names.get(s.technique_id.as_str()).copied().unwrap_or("");
        writeln!(
            out,
            "{},{},{},{},{},{},{:.6},{},{:.6},{:.6},{:.6}",
            escape(&s.id),
            escape(&s.technique_id),
            escape(name),
            s.occurred_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            s.source.as_str(),
            s.duration_minutes,
            duration_multiplier(s.duration_minutes),
            s.bonus_streak,
            streak_multiplier(s.bonus_streak),
            s.effective_minutes,
            duration_from_effective(s.effective_minutes, s.bonus_streak),
        )?;
    }
    Ok(sessions.len())
}
