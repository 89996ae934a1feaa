use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use flowgrid_engine::{
    DataSet, EngineConfig, FlowgridRuntime, Grid, NeighborTopology, NumericSchema, PriorClassifier,
    TemplateLayout, TopologyKind,
};
use tokio::runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "fgctl", version, about = "Flowgrid validation and ensemble grid driver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cross-validates the configured learner on synthetic data.
    Validate {
        #[command(flatten)]
        common: CommonArgs,
        /// Overrides `[validation] strategy`.
        #[arg(long)]
        strategy: Option<String>,
        /// Overrides `[validation] params` (comma separated).
        #[arg(long, value_delimiter = ',')]
        params: Option<Vec<f64>>,
        /// Evaluates folds on worker threads.
        #[arg(long)]
        concurrent: bool,
    },
    /// Runs ensemble grid rounds on synthetic two-class data.
    Grid {
        #[command(flatten)]
        common: CommonArgs,
        /// Overrides `[grid] width`.
        #[arg(long)]
        width: Option<usize>,
        /// Overrides `[grid] height`.
        #[arg(long)]
        height: Option<usize>,
        /// Overrides `[grid] topology`.
        #[arg(long)]
        topology: Option<String>,
        /// Overrides `[grid] rounds`.
        #[arg(long)]
        rounds: Option<usize>,
    },
    /// Prints the wraparound neighbors of one cell.
    Neighbors {
        #[arg(long, default_value_t = 5)]
        width: usize,
        #[arg(long, default_value_t = 5)]
        height: usize,
        #[arg(long, default_value = "orthogonal4")]
        topology: String,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        x: i64,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        y: i64,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Engine TOML; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 200)]
    samples: usize,
    #[arg(long, default_value_t = 2)]
    classes: usize,
    #[arg(long, default_value_t = 2)]
    dims: usize,
    /// Seed of the synthetic data generator.
    #[arg(long, default_value_t = 7)]
    seed: u64,
    #[arg(long)]
    log_path: Option<PathBuf>,
    #[arg(long)]
    event_log: Option<PathBuf>,
}

impl CommonArgs {
    fn load_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        if let Some(path) = &self.log_path {
            config.telemetry.log_path = Some(path.clone());
        }
        if let Some(path) = &self.event_log {
            config.telemetry.event_log = Some(path.clone());
        }
        Ok(config)
    }

    fn dataset(&self) -> DataSet {
        DataSet::synthetic(self.samples, self.classes, self.dims, self.seed)
    }

    fn runtime(&self, config: EngineConfig) -> Result<FlowgridRuntime> {
        config.check()?;
        FlowgridRuntime::from_config(config, Arc::new(NumericSchema::new(self.dims)))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate {
            common,
            strategy,
            params,
            concurrent,
        } => {
            let mut config = common.load_config()?;
            if let Some(strategy) = strategy {
                config.validation.strategy = strategy;
            }
            if let Some(params) = params {
                config.validation.params = params;
            }
            let runtime = common.runtime(config)?;
            let data = common.dataset();
            let report = if concurrent {
                let rt = Runtime::new().context("starting worker runtime")?;
                rt.block_on(runtime.validate_concurrent(Arc::new(data)))?
            } else {
                runtime.validate(&data)?
            };
            println!("{}", report.summary());
            println!("{}", report.confusion);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Grid {
            common,
            width,
            height,
            topology,
            rounds,
        } => {
            let mut config = common.load_config()?;
            if let Some(width) = width {
                config.grid.width = width;
            }
            if let Some(height) = height {
                config.grid.height = height;
            }
            if let Some(topology) = topology {
                config.grid.topology = topology;
            }
            if let Some(rounds) = rounds {
                config.grid.rounds = rounds;
            }
            let runtime = common.runtime(config)?;
            let run = runtime.run_grid(&common.dataset())?;
            for (idx, round) in run.rounds.iter().enumerate() {
                println!(
                    "[grid] round={idx} swapped={} retained={} mass={:.6}",
                    round.swapped,
                    round.retained.len(),
                    round.total_mass
                );
                for warning in &round.retained {
                    println!("  warn: {warning}");
                }
            }
            println!("{}", run.confusion);
            println!("{}", serde_json::to_string_pretty(&run.summary())?);
            Ok(())
        }
        Commands::Neighbors {
            width,
            height,
            topology,
            x,
            y,
        } => {
            let kind: TopologyKind = topology.parse()?;
            let grid = Grid::new(
                width,
                height,
                1,
                &TemplateLayout::Uniform(Box::new(PriorClassifier::new())),
                NeighborTopology::predefined(kind),
                None,
            )?;
            let cell = grid.cell_at(x, y);
            let (cx, cy) = grid.position(cell)?;
            println!("{kind} neighbors of ({cx}, {cy}) on {width}x{height}:");
            for neighbor in grid.neighbors(cell)? {
                let (nx, ny) = grid.position(neighbor)?;
                println!("  ({nx}, {ny})");
            }
            if grid.has_aliasing() {
                println!("  note: grid is small enough for neighbors to repeat");
            }
            Ok(())
        }
    }
}
