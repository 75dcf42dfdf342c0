use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::Subcommand;
use stillpoint_core::export::write_sessions_csv;

use super::{open_engine, CmdResult};

#[derive(Subcommand)]
pub enum ExportAction {
    /// Export sessions as CSV
    Sessions {
        /// Only sessions of this technique
        #[arg(long)]
        technique: Option<String>,
        /// Output file (default: stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

pub fn run(action: ExportAction, user: Option<String>) -> CmdResult {
    let (engine, user) = open_engine(user)?;

    match action {
        ExportAction::Sessions { technique, output } => {
            let sessions = engine.list_sessions(&user, technique.as_deref())?;
            let techniques = engine.list_techniques(&user)?;
            let rows = match output {
                Some(path) => {
                    let mut out = BufWriter::new(File::create(&path)?);
                    let rows = write_sessions_csv(&mut out, &sessions, &techniques)?;
                    out.flush()?;
                    eprintln!("exported {rows} sessions to {}", path.display());
                    rows
                }
                None => {
                    let stdout = io::stdout();
                    let mut out = stdout.lock();
                    write_sessions_csv(&mut out, &sessions, &techniques)?
                }
            };
            tracing::debug!(rows, "sessions exported");
        }
    }
    Ok(())
}
