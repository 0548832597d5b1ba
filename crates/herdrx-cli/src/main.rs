use std::fs::File;
use std::process::ExitCode;

use anyhow::Context;
use arrow::ipc::writer::FileWriter;
use clap::Parser;
use herdrx_store::ArtifactStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod display;
mod error;
mod pipeline;

use config::{Cli, Command, OutputFormat, Settings};
use error::AppError;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("herdrx v{}", env!("CARGO_PKG_VERSION"));

    match run(&cli.settings, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            err.log();
            // Failures still produce a JSON body on stdout.
            if let Ok(body) = serde_json::to_string_pretty(&err.response()) {
                println!("{body}");
            }
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(settings: &Settings, command: Command) -> Result<(), AppError> {
    match command {
        Command::Train { client } => {
            let outcome = pipeline::train_client(settings, &client)?;
            display::print_json(&outcome)?;
        }

        Command::RetrainAll => {
            let report = pipeline::retrain_all(settings)?;
            display::print_json(&report)?;
        }

        Command::Predict {
            client,
            input,
            options,
            format,
        } => {
            // Validate before loading anything.
            let request = pipeline::read_request(&input)?;
            let model = pipeline::load_model(settings, &client)?;
            let response = model.predict(&request, options.options())?;
            info!(
                client = %client,
                predictions = response.predictions.len(),
                "prediction served"
            );
            match format {
                OutputFormat::Json => display::print_json(&response)?,
                OutputFormat::Card => display::print_prediction_card(&response),
            }
        }

        Command::Encode { client, input, ipc } => {
            let request = pipeline::read_request(&input)?;
            let model = pipeline::load_model(settings, &client)?;
            let batch = model
                .encode(&request)?
                .to_record_batch()
                .context("building feature matrix batch")?;
            println!("{}", display::format_matrix(&batch)?);

            if let Some(path) = ipc {
                let file = File::create(&path)
                    .with_context(|| format!("creating {}", path.display()))?;
                let mut writer = FileWriter::try_new(file, &batch.schema())
                    .context("opening Arrow IPC writer")?;
                writer.write(&batch).context("writing Arrow IPC batch")?;
                writer.finish().context("finishing Arrow IPC file")?;
                info!(path = %path.display(), rows = batch.num_rows(), "wrote feature matrix");
            }
        }

        Command::Vocab { client } => {
            let model = pipeline::load_model(settings, &client)?;
            display::print_vocab(&client, model.schema());
        }

        Command::Clients => {
            let clients = ArtifactStore::new(&settings.models_dir).clients()?;
            display::print_json(&clients)?;
        }
    }
    Ok(())
}
