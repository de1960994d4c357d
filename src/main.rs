#![recursion_limit = "131"]

use std::path::PathBuf;

use burn::backend::{NdArray, Wgpu};
use burn::config::Config;
use clap::{Parser, Subcommand, ValueEnum};

use gsdn_up::GsdnUpConfig;
use gsdn_up::data::SceneConfig;
use gsdn_up::inference::{self, InferenceConfig};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default run configuration.
    InitConfig {
        #[arg(short, long, default_value = "gsdn_up.json")]
        path: PathBuf,
        #[arg(long, default_value_t = 18)]
        num_classes: usize,
    },
    /// Run the upsampling block on a random sparse scene.
    Run {
        /// Run configuration, defaults are used when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory where voxels, boxes and the summary are written.
        #[arg(short, long, default_value = "artifacts")]
        out: PathBuf,
        /// Overrides the scene seed.
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, value_enum, default_value_t = BackendKind::Ndarray)]
        backend: BackendKind,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendKind {
    /// CPU
    Ndarray,
    /// GPU through WebGPU
    Wgpu,
}

fn default_config(num_classes: usize) -> InferenceConfig {
    InferenceConfig::new(GsdnUpConfig::new(vec![32, 16], num_classes), SceneConfig::new())
}

fn main() -> gsdn_up::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::InitConfig { path, num_classes } => {
            default_config(num_classes).save(&path)?;
            log::info!("wrote {}", path.display());
        }
        Commands::Run {
            config,
            out,
            seed,
            backend,
        } => {
            let mut config = match config {
                Some(path) => InferenceConfig::load_json(&path)?,
                None => default_config(18),
            };
            if let Some(seed) = seed {
                config.scene.seed = seed;
            }

            let start = std::time::Instant::now();
            let summary = match backend {
                BackendKind::Ndarray => inference::infer::<NdArray<f32>>(
                    &out,
                    &config,
                    burn::backend::ndarray::NdArrayDevice::Cpu,
                )?,
                BackendKind::Wgpu => inference::infer::<Wgpu<f32, i32>>(
                    &out,
                    &config,
                    burn::backend::wgpu::WgpuDevice::default(),
                )?,
            };
            log::info!("{summary:?} in {:?}", start.elapsed());
        }
    }
    Ok(())
}
