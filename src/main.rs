//! careflow - Main CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use careflow::audit::JsonlAuditSink;
use careflow::cli::repl::opening_type;
use careflow::cli::{display, Args, Commands, ConsultationRepl, InputHandler, Verbosity};
use careflow::store::JsonFileStore;
use careflow::{EngineConfig, Orchestrator, PatientContext, StartRequest};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let verbosity = args.verbosity();

    init_logging(verbosity);

    let config = match &args.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    };

    match args.command {
        Commands::Config => {
            let path = match &args.config {
                Some(path) => path.clone(),
                None => EngineConfig::config_path()?,
            };
            println!("# {}", path.display());
            println!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to serialize config")?
            );
            Ok(())
        }
        Commands::Consult {
            query,
            age,
            sex,
            symptoms,
            medications,
            kind,
        } => {
            let store_dir = store_dir(&args.store, &config)?;
            let orchestrator = build(config, &store_dir).await?;

            let mut patient = PatientContext::new();
            if let Some(age) = age {
                patient = patient.with_age(age);
            }
            if let Some(sex) = sex {
                patient = patient.with_sex(sex);
            }
            for symptom in symptoms {
                patient = patient.with_symptom(symptom);
            }
            for medication in medications {
                patient = patient.with_medication(medication);
            }

            let history_file = EngineConfig::config_path()?.with_file_name("history");
            let mut input = InputHandler::open(Some(history_file))?;

            let query = match query {
                Some(query) => query,
                None => match input.next_line()? {
                    Some(line) => line,
                    None => return Ok(()),
                },
            };

            let message_type = opening_type(&query, kind.into());
            let request = StartRequest::new(query, patient).with_type(message_type);
            let started = orchestrator.start_consultation(request).await?;
            info!(consultation_id = %started.consultation_id, "consultation opened");

            display::show_start(&started, verbosity.show_details());
            if started.status.is_terminal() {
                orchestrator.flush_audit().await;
                return Ok(());
            }

            input.enter_consultation(short_id(&started.consultation_id));
            let mut repl = ConsultationRepl::new(
                &orchestrator,
                started.consultation_id,
                input,
                verbosity.show_details(),
            );
            repl.run().await
        }
        Commands::History { consultation_id } => {
            let store_dir = store_dir(&args.store, &config)?;
            let orchestrator = build(config, &store_dir).await?;
            let view = orchestrator.get_history(&consultation_id).await?;
            display::show_history(&view);
            Ok(())
        }
        Commands::Resume {
            consultation_id,
            task_id,
        } => {
            let store_dir = store_dir(&args.store, &config)?;
            let orchestrator = build(config, &store_dir).await?;
            let response = orchestrator.resume_task(&consultation_id, &task_id).await?;
            display::show_reply(&response, verbosity.show_details());
            orchestrator.flush_audit().await;
            Ok(())
        }
        Commands::List => {
            let store_dir = store_dir(&args.store, &config)?;
            let orchestrator = build(config, &store_dir).await?;
            let ids = orchestrator.list_consultations().await?;
            if ids.is_empty() {
                display::show_info("No consultations stored");
            }
            for id in ids {
                let view = orchestrator.get_history(&id).await?;
                println!(
                    "{}  {:<14} {}",
                    id,
                    view.status.display_name(),
                    view.summary
                );
            }
            Ok(())
        }
    }
}

fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn store_dir(flag: &Option<PathBuf>, config: &EngineConfig) -> Result<PathBuf> {
    match flag {
        Some(dir) => Ok(dir.clone()),
        None => config.storage_dir(),
    }
}

async fn build(config: EngineConfig, store_dir: &Path) -> Result<Orchestrator> {
    let store = JsonFileStore::open(store_dir)
        .await
        .with_context(|| format!("Failed to open store at {}", store_dir.display()))?;
    let audit = JsonlAuditSink::new(store_dir.join("audit.jsonl"));

    let orchestrator = Orchestrator::builder()
        .with_config(config)
        .with_store(Arc::new(store))
        .with_audit_sink(Arc::new(audit))
        .build()?;
    Ok(orchestrator)
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
