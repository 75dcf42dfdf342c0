pub mod config;
pub mod decay;
pub mod export;
pub mod mastery;
pub mod session;
pub mod technique;

use chrono::{DateTime, NaiveDate, Utc};
use stillpoint_core::mastery::practice_day;
use stillpoint_core::{Config, Database, MasteryEngine};

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Engine over the default database, plus the user to act as.
pub fn open_engine(user: Option<String>) -> Result<(MasteryEngine, String), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let user = user.unwrap_or_else(|| config.user.id.clone());
    let db = Database::open()?;
    Ok((MasteryEngine::new(db, config), user))
}

/// Parse an RFC 3339 timestamp, defaulting to now.
pub fn parse_instant(at: Option<&str>) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    match at {
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

/// Parse a `YYYY-MM-DD` day, defaulting to today in the configured offset.
pub fn parse_day(engine: &MasteryEngine, day: Option<&str>) -> Result<NaiveDate, Box<dyn std::error::Error>> {
    match day {
        Some(s) => Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?),
        None => Ok(practice_day(Utc::now(), engine.config().engine.utc_offset_minutes)),
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
