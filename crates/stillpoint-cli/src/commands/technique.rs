use chrono::Utc;
use clap::Subcommand;

use super::{open_engine, print_json, CmdResult};

#[derive(Subcommand)]
pub enum TechniqueAction {
    /// Add a technique to the library
    Add {
        /// Technique name
        name: String,
        /// Optional description
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List techniques
    List,
    /// Remove a technique with its sessions and mastery history
    Remove {
        /// Technique ID
        id: String,
    },
}

pub fn run(action: TechniqueAction, user: Option<String>) -> CmdResult {
    let (engine, user) = open_engine(user)?;

    match action {
        TechniqueAction::Add { name, description } => {
            let technique = engine.create_technique(&user, &name, &description, Utc::now())?;
            print_json(&technique)?;
        }
        TechniqueAction::List => {
            print_json(&engine.list_techniques(&user)?)?;
        }
        TechniqueAction::Remove { id } => {
            engine.delete_technique(&user, &id)?;
            println!("technique removed: {id}");
        }
    }
    Ok(())
}
