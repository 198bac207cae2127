//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::TrainArgs;
use anyhow::Context;
use monotrain_core::config::{DEFAULT_CONFIG_FILE, TrainingConfig, load_config};
use monotrain_core::reference::{SyntheticSize, build_components};
use monotrain_core::training::{CheckpointStore, Trainer};
use serde_json::{Map, Value};
use std::path::Path;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, config_file: Option<&Path>) -> anyhow::Result<()> {
    match command {
        Commands::Train(args) => handle_train(args, config_file).await,
        Commands::Inspect { artifact } => handle_inspect(&artifact),
        Commands::Config { action } => handle_config(action, config_file),
    }
}

/// Partial configuration document carrying only the flags that were given.
fn train_overrides(args: &TrainArgs) -> anyhow::Result<Value> {
    let mut map = Map::new();
    if let Some(max_epoch) = args.max_epoch {
        map.insert("max_epoch".into(), Value::from(max_epoch));
    }
    if let Some(save_frequency) = args.save_frequency {
        map.insert("save_frequency".into(), Value::from(save_frequency));
    }
    if let Some(path) = &args.resume {
        map.insert("resume_model".into(), serde_json::to_value(path)?);
    }
    if let Some(path) = &args.pretrain {
        map.insert("pretrain_model".into(), serde_json::to_value(path)?);
    }
    if let Some(dir) = &args.checkpoint_dir {
        map.insert("checkpoint_dir".into(), serde_json::to_value(dir)?);
    }
    Ok(Value::Object(map))
}

/// Resolve the effective configuration for a `train` invocation.
fn resolve_train_config(
    args: &TrainArgs,
    config_file: Option<&Path>,
) -> anyhow::Result<TrainingConfig> {
    let mut config = load_config(config_file, Some(train_overrides(args)?))
        .context("Failed to load configuration")?;

    if args.resume_latest {
        let store = CheckpointStore::new(&config.checkpoint_dir);
        match store.latest()? {
            Some(path) => {
                tracing::info!(path = %path.display(), "Resuming from latest checkpoint");
                config.resume_model = Some(path);
            }
            None => {
                tracing::warn!(
                    dir = %store.dir().display(),
                    "No checkpoint found, starting fresh"
                );
            }
        }
    }
    Ok(config)
}

async fn handle_train(args: TrainArgs, config_file: Option<&Path>) -> anyhow::Result<()> {
    let config = resolve_train_config(&args, config_file)?;
    let size = SyntheticSize {
        samples: args.synthetic_samples,
        in_features: args.in_features,
        batch_size: args.batch_size,
    };

    // The loop is blocking; keep it off the async workers.
    let epoch = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
        let components = build_components(&config, &size)?;
        let mut trainer = Trainer::new(config, components)?;
        trainer.run()?;
        Ok(trainer.current_epoch())
    })
    .await
    .context("Training task panicked")??;

    println!("Training finished at epoch {epoch}");
    Ok(())
}

fn handle_inspect(artifact: &Path) -> anyhow::Result<()> {
    let state = CheckpointStore::read(artifact)?;
    println!("Artifact:       {}", artifact.display());
    println!("Epoch:          {}", state.epoch);
    println!("Format version: {}", state.format_version);
    println!("Created:        {}", state.created_at.to_rfc3339());
    println!("Digest:         {}", state.digest);
    println!("Parameters:     {}", state.parameter_count());
    for (name, tensor) in &state.model_state {
        println!("  {name:<24} {:?}", tensor.shape());
    }
    println!(
        "Optimizer:      {}",
        if state.optimizer_state.is_some() {
            "present"
        } else {
            "absent"
        }
    );
    Ok(())
}

fn handle_config(action: ConfigAction, config_file: Option<&Path>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let path = config_file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            let toml_str = TrainingConfig::default().to_toml_string()?;
            std::fs::write(path, toml_str)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(config_file, None).context("Failed to load config")?;
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
