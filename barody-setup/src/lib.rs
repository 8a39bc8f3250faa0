// Barodybroject setup subsystem
// Library entry point: logging, service wiring, and the two commands (`serve`, `setup-wizard`).

pub mod api;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod installation;
pub mod models;
pub mod security;
pub mod utils;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::cli::prompt::DialoguerPrompter;
use crate::cli::{SetupWizard, SetupWizardArgs, EXIT_CANCELLED};
use crate::config::Settings;
use crate::database::accounts::{AccountStore, SqlAccountStore};
use crate::database::connection;
use crate::installation::{InstallationService, StatePaths};
use crate::models::state::AppState;

const SESSION_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5 * 60);

fn text_line(message: &std::fmt::Arguments, record: &log::Record) -> String {
    let (phase, step, text) = utils::logging::parse_log_metadata(&message.to_string());
    utils::logging::format_human_readable_log(
        &chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        record.level(),
        record.target(),
        &text,
        phase.as_deref(),
        step.as_deref(),
    )
}

fn json_line(message: &std::fmt::Arguments, record: &log::Record) -> String {
    let (phase, step, text) = utils::logging::parse_log_metadata(&message.to_string());
    utils::logging::format_json_log(
        &chrono::Utc::now().to_rfc3339(),
        record.level(),
        record.target(),
        &text,
        phase.as_deref(),
        step.as_deref(),
    )
}

/// Dual-format logging: `setup-<ts>.log` (JSON lines) and `setup-<ts>.txt` in the log folder,
/// plus stdout when `with_stdout` (off for the wizard so prompts stay readable).
pub fn init_logging(settings: &Settings, with_stdout: bool) -> Result<()> {
    let log_dir = utils::path_resolver::resolve_log_folder(settings.log_dir.as_deref())?;
    let stamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");
    let json_path = log_dir.join(format!("setup-{}.log", stamp));
    let txt_path = log_dir.join(format!("setup-{}.txt", stamp));

    let level = if settings.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let json_file = fern::log_file(&json_path)
        .with_context(|| format!("Failed to open log file {:?}", json_path))?;
    let txt_file = fern::log_file(&txt_path)
        .with_context(|| format!("Failed to open log file {:?}", txt_path))?;

    let mut dispatch = fern::Dispatch::new()
        .level(level)
        .level_for("sqlx", log::LevelFilter::Warn)
        .chain(
            fern::Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!("{}", json_line(message, record)))
                })
                .chain(json_file),
        )
        .chain(
            fern::Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!("{}", text_line(message, record)))
                })
                .chain(txt_file),
        );
    if with_stdout {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!("{}", text_line(message, record)))
                })
                .chain(std::io::stdout()),
        );
    }
    dispatch.apply().context("Logger already initialized")?;

    info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(())
}

/// Wire the installation service to the configured account store.
///
/// With `lazy`, an unreachable database does not fail construction; callers see it through
/// `ping` and the health projections instead.
pub async fn build_service(settings: &Settings, lazy: bool) -> Result<InstallationService> {
    let store = match SqlAccountStore::connect(&settings.database_url).await {
        Ok(store) => store,
        Err(e) if lazy => {
            warn!(
                "[PHASE: initialization] [STEP: database] Database not reachable at startup, continuing: {:#}",
                e
            );
            SqlAccountStore::new(connection::connect_lazy(&settings.database_url)?)
        }
        Err(e) => return Err(e),
    };
    let accounts: Arc<dyn AccountStore> = Arc::new(store);
    Ok(InstallationService::new(
        StatePaths::from_settings(settings),
        accounts,
    ))
}

/// `serve`: run the web application behind the installation gate until Ctrl-C.
pub async fn run_server(settings: Settings) -> Result<()> {
    if let Err(e) = init_logging(&settings, true) {
        eprintln!("Failed to initialize logging: {:#}", e);
    }
    info!(
        "[PHASE: initialization] Server starting at {}",
        chrono::Utc::now()
    );

    let service = Arc::new(build_service(&settings, true).await?);
    match service.cleanup_expired_tokens().await {
        Ok(true) => info!("[PHASE: initialization] [STEP: cleanup] Removed expired setup token"),
        Ok(false) => {}
        Err(e) => warn!(
            "[PHASE: initialization] [STEP: cleanup] Expired token cleanup failed: {}",
            e
        ),
    }
    info!(
        "[PHASE: initialization] [STEP: state] Current setup phase: {:?}",
        service.current_phase().await
    );

    let addr = settings.socket_addr()?;
    let state = AppState::new(service, settings);
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let removed = sessions.sweep().await;
            if removed > 0 {
                debug!(
                    "[PHASE: runtime] [STEP: sessions] Dropped {} idle sessions",
                    removed
                );
            }
        }
    });
    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("[PHASE: initialization] Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("[PHASE: shutdown] Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("[PHASE: shutdown] Shutdown requested");
        })
        .await
        .context("Server error")?;
    Ok(())
}

/// `setup-wizard`: returns the process exit status.
pub async fn run_setup_wizard(settings: Settings, args: SetupWizardArgs) -> u8 {
    if let Err(e) = init_logging(&settings, false) {
        eprintln!("Failed to initialize logging: {:#}", e);
    }

    // Terminal reads block; Ctrl-C is handled here instead of inside the prompt.
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[PHASE: cli] [STEP: interrupt] Setup interrupted by user");
            eprintln!("\nSetup interrupted.");
            std::process::exit(i32::from(EXIT_CANCELLED));
        }
    });

    let service = match build_service(&settings, false).await {
        Ok(service) => service,
        Err(e) => {
            error!("[PHASE: cli] [STEP: start] Could not initialize setup: {:#}", e);
            eprintln!("Error: {:#}", e);
            return cli::EXIT_FAILURE;
        }
    };

    let mut stdout = std::io::stdout();
    let mut prompter = DialoguerPrompter;
    let result = SetupWizard::new(&service, &settings, &mut stdout, &mut prompter)
        .run(&args)
        .await;

    match &result {
        Ok(outcome) => info!("[PHASE: cli] [STEP: finish] Setup wizard finished: {:?}", outcome),
        Err(e) => {
            error!("[PHASE: cli] [STEP: finish] Setup wizard failed: {}", e);
            eprintln!("Error: {}", e);
        }
    }
    cli::exit_code(&result)
}
