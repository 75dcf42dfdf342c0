use clap::Subcommand;
use stillpoint_core::SessionSource;

use super::{open_engine, parse_instant, print_json, CmdResult};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Log a completed session
    Log {
        /// Technique ID
        technique_id: String,
        /// Duration in minutes
        minutes: f64,
        /// When the session happened (RFC 3339, default: now)
        #[arg(long)]
        at: Option<String>,
        /// Entered by hand rather than timed
        #[arg(long)]
        manual: bool,
    },
    /// Change the duration of a logged session
    Edit {
        /// Session ID
        id: String,
        /// Corrected duration in minutes
        minutes: f64,
    },
    /// Remove a logged session
    Remove {
        /// Session ID
        id: String,
    },
    /// List sessions, newest first
    List {
        /// Only sessions of this technique
        #[arg(long)]
        technique: Option<String>,
    },
}

pub fn run(action: SessionAction, user: Option<String>) -> CmdResult {
    let (engine, user) = open_engine(user)?;

    match action {
        SessionAction::Log {
            technique_id,
            minutes,
            at,
            manual,
        } => {
            let occurred_at = parse_instant(at.as_deref())?;
            let source = if manual {
                SessionSource::Manual
            } else {
                SessionSource::Timer
            };
            let outcome = engine.record_session(&user, &technique_id, minutes, occurred_at, source)?;
            print_json(&outcome)?;
        }
        SessionAction::Edit { id, minutes } => {
            let outcome = engine.edit_session(&user, &id, minutes, parse_instant(None)?)?;
            print_json(&outcome)?;
        }
        SessionAction::Remove { id } => {
            let outcome = engine.delete_session(&user, &id, parse_instant(None)?)?;
            print_json(&outcome)?;
        }
        SessionAction::List { technique } => {
            print_json(&engine.list_sessions(&user, technique.as_deref())?)?;
        }
    }
    Ok(())
}
