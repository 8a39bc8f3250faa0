use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use barody_setup::cli::SetupWizardArgs;
use barody_setup::config::Settings;

#[derive(Parser)]
#[command(name = "barody-setup", version, about = "Barodybroject first-run setup")]
struct Cli {
    /// TOML configuration file (default: ./barody.toml if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the web application with the installation gate
    Serve,
    /// Create the first administrator, or issue a setup token with --headless
    SetupWizard(SetupWizardArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Serve => match barody_setup::run_server(settings).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log::error!("[PHASE: shutdown] Server failed: {:#}", e);
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        },
        Command::SetupWizard(args) => {
            ExitCode::from(barody_setup::run_setup_wizard(settings, args).await)
        }
    }
}
