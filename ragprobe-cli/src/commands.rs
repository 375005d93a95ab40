//! CLI subcommand handlers.

use crate::Commands;
use anyhow::Context;
use ragprobe_core::ProbeConfig;
use ragprobe_eval::satisfaction::{goals, personas};
use ragprobe_eval::{AppState, GoldenOptions, Harness, Progress, SatisfactionParams, run_gateway};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<()> {
    match command {
        Commands::Serve { host, port } => {
            let mut config = load(workspace, config_path)?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            handle_serve(config).await
        }
        Commands::Golden {
            data_dir,
            pairs,
            no_write,
        } => {
            let config = load(workspace, config_path)?;
            let mut options = GoldenOptions::from_config(&config);
            if let Some(dir) = data_dir {
                options.data_dir = dir;
            }
            if let Some(pairs) = pairs {
                options.pairs_per_doc = pairs;
            }
            if no_write {
                options.write_dataset = false;
            }
            handle_golden(config, options).await
        }
        Commands::Retrieval { top_k, limit } => {
            let config = load(workspace, config_path)?;
            let harness = Harness::from_config(config)?;
            let report = harness.run_retrieval(top_k, limit, &log_progress).await;
            print_json(&serde_json::to_value(report)?)
        }
        Commands::Satisfaction {
            persona,
            goal,
            turns,
        } => {
            let config = load(workspace, config_path)?;
            let harness = Harness::from_config(config)?;
            let request = harness.validate_satisfaction(&SatisfactionParams {
                persona_id: persona,
                goal_id: goal,
                turns,
            })?;
            let report = harness.run_satisfaction(&request, None, &log_progress).await?;
            print_json(&serde_json::to_value(report)?)
        }
        Commands::Personas => {
            for (key, persona) in personas() {
                println!("{:<28} {} - {}", key, persona.name, persona.description);
            }
            Ok(())
        }
        Commands::Goals => {
            for (key, goal) in goals() {
                println!("{:<28} [{}] {}", key, goal.complexity, goal.description);
            }
            Ok(())
        }
        Commands::Config => {
            let config = load(workspace, config_path)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load(workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<ProbeConfig> {
    let config = ragprobe_core::load_config(Some(workspace), config_path)
        .context("Failed to load config")?;
    config.validate()?;
    Ok(config)
}

fn log_progress(progress: Progress) {
    info!(i = progress.i, of = progress.of, phase = %progress.phase, "Progress");
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn handle_serve(config: ProbeConfig) -> anyhow::Result<()> {
    let harness = Harness::from_config(config)?;
    let state = Arc::new(AppState::new(harness));
    run_gateway(state).await?;
    Ok(())
}

async fn handle_golden(config: ProbeConfig, options: GoldenOptions) -> anyhow::Result<()> {
    let harness = Harness::from_config(config)?;
    let rid = uuid::Uuid::new_v4().simple().to_string();
    info!(rid = %rid, data_dir = %options.data_dir.display(), "Running golden evaluation");
    let report = harness.run_golden(&options, &rid, &log_progress).await?;
    print_json(&serde_json::to_value(report)?)
}
