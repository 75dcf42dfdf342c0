use clap::Subcommand;
use serde::Serialize;
use stillpoint_core::mastery::{next_milestone, Milestone};
use stillpoint_core::MasteryRecord;

use super::{open_engine, parse_day, print_json, CmdResult};

#[derive(Subcommand)]
pub enum MasteryAction {
    /// Show mastery for one technique, or all of them
    Show {
        /// Technique ID (default: every technique)
        technique_id: Option<String>,
    },
    /// Mastery history of a technique, oldest first
    History {
        /// Technique ID
        technique_id: String,
    },
    /// Current practice streak
    Streak {
        /// Day to evaluate the streak on (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
    },
}

#[derive(Serialize)]
struct MasteryView {
    #[serde(flatten)]
    record: MasteryRecord,
    next_milestone: Option<Milestone>,
}

impl From<MasteryRecord> for MasteryView {
    fn from(record: MasteryRecord) -> Self {
        let next_milestone = next_milestone(record.cumulative_effective_minutes);
        Self {
            record,
            next_milestone,
        }
    }
}

pub fn run(action: MasteryAction, user: Option<String>) -> CmdResult {
    let (engine, user) = open_engine(user)?;

    match action {
        MasteryAction::Show {
            technique_id: Some(id),
        } => {
            print_json(&MasteryView::from(engine.mastery_record(&user, &id)?))?;
        }
        MasteryAction::Show { technique_id: None } => {
            let views: Vec<MasteryView> = engine
                .list_mastery(&user)?
                .into_iter()
                .map(MasteryView::from)
                .collect();
            print_json(&views)?;
        }
        MasteryAction::History { technique_id } => {
            print_json(&engine.mastery_history(&user, &technique_id)?)?;
        }
        MasteryAction::Streak { date } => {
            let today = parse_day(&engine, date.as_deref())?;
            print_json(&serde_json::json!({
                "user_id": user,
                "day": today,
                "streak": engine.streak(&user, today)?,
            }))?;
        }
    }
    Ok(())
}
