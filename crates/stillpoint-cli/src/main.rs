use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "stillpoint", version, about = "Stillpoint meditation mastery tracker")]
struct Cli {
    /// Act as this user instead of the configured `user.id`
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Technique library
    Technique {
        #[command(subcommand)]
        action: commands::technique::TechniqueAction,
    },
    /// Log and correct practice sessions
    Session {
        #[command(subcommand)]
        action: commands::session::SessionAction,
    },
    /// Mastery scores, history and streak
    Mastery {
        #[command(subcommand)]
        action: commands::mastery::MasteryAction,
    },
    /// Inactivity decay
    Decay {
        #[command(subcommand)]
        action: commands::decay::DecayAction,
    },
    /// Export data
    Export {
        #[command(subcommand)]
        action: commands::export::ExportAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("STILLPOINT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("stillpoint=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let user = cli.user;
    let result = match cli.command {
        Commands::Technique { action } => commands::technique::run(action, user),
        Commands::Session { action } => commands::session::run(action, user),
        Commands::Mastery { action } => commands::mastery::run(action, user),
        Commands::Decay { action } => commands::decay::run(action, user),
        Commands::Export { action } => commands::export::run(action, user),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
