//! Command-line surface and runtime settings.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use herdrx_ai::{DEFAULT_TOP_N, LEGACY_TOP_N, PredictOptions};
use herdrx_core::FusionPolicy;

#[derive(Debug, Parser)]
#[command(
    name = "herdrx",
    version,
    about = "Per-client veterinary prescription recommendation"
)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Command,
}

/// Locations shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Root of the per-client model directories.
    #[arg(long, global = true, env = "HERDRX_MODELS_DIR", default_value = "models")]
    pub models_dir: PathBuf,

    /// Root of the per-client training data directories.
    #[arg(long, global = true, env = "HERDRX_DATA_DIR", default_value = "client_data")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Train and publish one client's model from its data directory.
    Train {
        client: String,
    },

    /// Train every client found in the data directory.
    RetrainAll,

    /// Recommend medicines for one animal.
    Predict {
        client: String,

        #[command(flatten)]
        input: RequestInput,

        #[command(flatten)]
        options: PredictArgs,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Print the reconciled feature matrix for a request.
    Encode {
        client: String,

        #[command(flatten)]
        input: RequestInput,

        /// Also write the matrix as an Arrow IPC file.
        #[arg(long)]
        ipc: Option<PathBuf>,
    },

    /// List the diagnoses and breeds a client's model was trained on.
    Vocab {
        client: String,
    },

    /// List clients with a published model.
    Clients,
}

/// Where the JSON request body comes from. Defaults to stdin.
#[derive(Debug, Clone, Args)]
pub struct RequestInput {
    /// Inline JSON request body.
    #[arg(long, conflicts_with = "file")]
    pub request: Option<String>,

    /// Path to a JSON request body.
    #[arg(long)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct PredictArgs {
    /// Multi-diagnosis aggregation strategy.
    #[arg(long, value_enum, default_value_t = PolicyArg::Summed)]
    pub policy: PolicyArg,

    /// Maximum number of recommendations.
    #[arg(long, default_value_t = DEFAULT_TOP_N, conflicts_with = "legacy")]
    pub top_n: usize,

    /// Single best-guess mode: top 2 only.
    #[arg(long)]
    pub legacy: bool,
}

impl PredictArgs {
    pub fn options(&self) -> PredictOptions {
        PredictOptions {
            policy: self.policy.into(),
            top_n: if self.legacy { LEGACY_TOP_N } else { self.top_n },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Summed,
    Union,
}

impl From<PolicyArg> for FusionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Summed => FusionPolicy::Summed,
            PolicyArg::Union => FusionPolicy::Union,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Card,
}
