// VCNPU simulator CLI: generate mock sparse-transform masks, or run a
// cycle-approximate simulation of one frame against a layer pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};

use vcnpu_sim::config::SimConfig;
use vcnpu_sim::error::SimError;
use vcnpu_sim::frame::FrameController;
use vcnpu_sim::layer::build_default_layers;
use vcnpu_sim::mask;

#[derive(Parser)]
#[command(name = "vcnpu-sim", about = "Cycle-approximate VCNPU accelerator simulator")]
struct Cli {
    /// TOML file overlaid on top of the built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write mock sparse-transform masks for the default layer pipeline.
    GenMasks {
        #[arg(long)]
        outdir: PathBuf,
        #[arg(long)]
        channels: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Run the simulator over one synthetic frame and print the stats record.
    Simulate {
        /// Directory of `.npz` masks produced by `gen-masks`. Layers without
        /// a matching file fall back to the analytic cost model.
        #[arg(long)]
        mask_dir: Option<PathBuf>,
        #[arg(long)]
        frame_h: Option<usize>,
        #[arg(long)]
        frame_w: Option<usize>,
        #[arg(long)]
        tile_columns: Option<usize>,
        #[arg(long)]
        dram_bw: Option<u64>,
        #[arg(long)]
        dram_latency: Option<u64>,
        #[arg(long)]
        banks: Option<usize>,
        #[arg(long)]
        group_slots: Option<usize>,
        #[arg(long)]
        num_parallel_units: Option<usize>,
        #[arg(long)]
        bypass_mode: bool,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        max_cycles: Option<u64>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<SimConfig, SimError> {
    match path {
        Some(p) => SimConfig::from_file(p),
        None => Ok(SimConfig::default()),
    }
}

fn run() -> Result<(), SimError> {
    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::GenMasks { outdir, channels, seed } => {
            if let Some(c) = channels {
                cfg.channels = c;
            }
            if let Some(s) = seed {
                cfg.seed = s;
            }
            cfg.validate()?;
            let layers = build_default_layers(cfg.channels, &cfg);
            let written = mask::generate_mock_masks_for_layers(&outdir, &layers, cfg.seed)?;
            info!("wrote {written} mock mask file(s) to {}", outdir.display());
        }
        Commands::Simulate {
            mask_dir,
            frame_h,
            frame_w,
            tile_columns,
            dram_bw,
            dram_latency,
            banks,
            group_slots,
            num_parallel_units,
            bypass_mode,
            seed,
            max_cycles,
        } => {
            if let Some(v) = frame_h {
                cfg.frame_h = v;
            }
            if let Some(v) = frame_w {
                cfg.frame_w = v;
            }
            if tile_columns.is_some() {
                cfg.tile_columns = tile_columns;
            }
            if let Some(v) = dram_bw {
                cfg.dram_bw = v;
            }
            if let Some(v) = dram_latency {
                cfg.dram_latency = v;
            }
            if let Some(v) = banks {
                cfg.sftm_num_banks = v;
            }
            if let Some(v) = group_slots {
                cfg.group_slots_per_bank = v;
            }
            if let Some(v) = num_parallel_units {
                cfg.num_parallel_units = v;
            }
            if bypass_mode {
                cfg.bypass_mode = true;
            }
            if let Some(v) = seed {
                cfg.seed = v;
            }
            if let Some(v) = max_cycles {
                cfg.max_cycles = v;
            }
            cfg.validate()?;

            let layers = build_default_layers(cfg.channels, &cfg);
            let controller = FrameController::new(cfg, &layers, mask_dir.as_deref())?;
            let stats = controller.run();
            println!("{stats}");
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
