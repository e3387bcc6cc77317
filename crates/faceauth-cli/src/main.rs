use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceauth_core::{Pose, UserRecord};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;
use engine::{EngineHandle, EnrollOutcome};

#[derive(Parser)]
#[command(name = "faceauth", about = "Face authentication: register and verify users from images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a user from three captures
    Enroll {
        name: String,
        /// Frontal capture
        front: PathBuf,
        /// Head turned left
        left: PathBuf,
        /// Head turned right
        right: PathBuf,
    },
    /// Verify a capture against a registered user
    Verify { name: String, image: PathBuf },
    /// Print a summary of a registered user's record as JSON
    Show { name: String },
    /// Delete all registered users
    Clear,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    tracing::debug!(?config, "configuration");

    let engine = engine::spawn_engine(&config).context("starting engine")?;
    let result = run(&engine, &config, cli.command).await;
    engine.shutdown().await?;
    result
}

async fn run(engine: &EngineHandle, config: &Config, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Enroll {
            name,
            front,
            left,
            right,
        } => {
            let images = [load_rgb(&front)?, load_rgb(&left)?, load_rgb(&right)?];
            match engine.enroll(&name, images).await? {
                EnrollOutcome::Saved(outcome) => {
                    println!("{name}: {outcome:?}");
                    Ok(ExitCode::SUCCESS)
                }
                EnrollOutcome::Recapture { pose } => {
                    eprintln!("{name}: no usable face in the {pose} capture; recapture it");
                    Ok(ExitCode::from(2))
                }
            }
        }
        Commands::Verify { name, image } => {
            let image = load_rgb(&image)?;
            let timeout = Duration::from_secs(config.verify_timeout_secs);
            let result = tokio::time::timeout(timeout, engine.verify(&name, image))
                .await
                .with_context(|| format!("verify timed out after {}s", config.verify_timeout_secs))??;

            println!("{}", serde_json::to_string(&result)?);
            Ok(if result.is_match {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Show { name } => match engine.record(&name).await? {
            Some(record) => {
                println!("{}", serde_json::to_string_pretty(&summary(&record))?);
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("{name}: not registered");
                Ok(ExitCode::FAILURE)
            }
        },
        Commands::Clear => {
            let removed = engine.clear().await?;
            println!("removed {removed} record(s)");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_rgb(path: &Path) -> Result<image::RgbImage> {
    let image = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
    Ok(image.to_rgb8())
}

fn summary(record: &UserRecord) -> serde_json::Value {
    let norms: serde_json::Map<String, serde_json::Value> = Pose::ALL
        .iter()
        .map(|pose| (pose.to_string(), serde_json::json!(record.embedding(*pose).norm())))
        .collect();

    serde_json::json!({
        "user_name": record.user_name,
        "model_version": record.front.model_version,
        "dimension": record.dimension(),
        "norms": norms,
    })
}
