use clap::Subcommand;

use super::{open_engine, parse_day, print_json, CmdResult};

#[derive(Subcommand)]
pub enum DecayAction {
    /// Apply the daily decay (safe to repeat within a day)
    Run {
        /// Day to decay through (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
    },
}

pub fn run(action: DecayAction, user: Option<String>) -> CmdResult {
    let (engine, user) = open_engine(user)?;

    match action {
        DecayAction::Run { date } => {
            let today = parse_day(&engine, date.as_deref())?;
            let outcome = engine.apply_daily_decay(&user, today)?;
            print_json(&outcome)?;
        }
    }
    Ok(())
}
