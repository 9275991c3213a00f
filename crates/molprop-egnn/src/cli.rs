use super::commands;
use clap::{Args, Parser, Subcommand};
use molprop_egnn::{AggMode, Qm9Property};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Silence all logging
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train an EGNN on a QM9 property
    Train(TrainArgs),
    /// Report the MAE of saved weights on a data file
    Evaluate(EvaluateArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(long, required = true)]
    pub train: PathBuf,

    #[arg(long)]
    pub valid: Option<PathBuf>,

    #[arg(long)]
    pub test: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "homo")]
    pub property: Qm9Property,

    // Model architecture; overrides --config
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub nf: Option<usize>,

    #[arg(long)]
    pub n_layers: Option<usize>,

    #[arg(long)]
    pub attention: Option<bool>,

    #[arg(long)]
    pub node_attr: Option<bool>,

    /// sum, avg or max
    #[arg(long, value_parser = AggMode::from_name)]
    pub agg_mode: Option<AggMode>,

    #[arg(long)]
    pub coords_weight: Option<f64>,

    #[arg(long, default_value_t = 2)]
    pub charge_power: usize,

    // Optimisation
    #[arg(long, default_value_t = 1000)]
    pub epochs: usize,

    #[arg(long, default_value_t = 96)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    #[arg(long, default_value_t = 1e-16)]
    pub weight_decay: f64,

    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    #[arg(long, default_value_t = 20)]
    pub log_interval: usize,

    #[arg(long, default_value_t = 1)]
    pub test_interval: usize,

    /// Target mean; computed from the training set when omitted
    #[arg(long, allow_negative_numbers = true)]
    pub mean: Option<f64>,

    /// Target mean absolute deviation; computed from the training set when omitted
    #[arg(long)]
    pub mad: Option<f64>,

    /// Write weights here, with the model manifest next to it as JSON
    #[arg(long)]
    pub save: Option<PathBuf>,

    #[arg(long)]
    pub cpu: bool,
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    #[arg(long, required = true)]
    pub data: PathBuf,

    #[arg(long, required = true)]
    pub weights: PathBuf,

    /// Model manifest; defaults to the weights path with a `.json` extension
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Defaults to the property the model was trained on
    #[arg(long, value_enum)]
    pub property: Option<Qm9Property>,

    #[arg(long, default_value_t = 96)]
    pub batch_size: usize,

    #[arg(long)]
    pub cpu: bool,
}

impl Cli {
    pub fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Train(args) => commands::train::execute(args),
            Commands::Evaluate(args) => commands::evaluate::execute(args),
        }
    }
}
