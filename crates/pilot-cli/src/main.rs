use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use pilot_policy::PolicyConfig;
use pilot_runtime::controller::{DetectorFactory, FrameLoop};
use pilot_runtime::LoopConfig;
use pilot_vision::{detector, VisionConfig};

mod adb;
use adb::{AdbConfig, AdbFrameSource, AdbGestureSink};

#[derive(Debug, Parser)]
#[command(name = "tappilot", version, about = "TapPilot - AI-Powered Mobile Game Autopilot")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    Run,
    Vision {
        #[command(subcommand)]
        cmd: VisionCmd,
    },
}

#[derive(Debug, Subcommand)]
enum VisionCmd {
    /// Print the loaded model's tensor shapes.
    Inspect,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    vision: VisionConfig,
    policy: PolicyConfig,
    runtime: LoopConfig,
    adb: AdbConfig,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    Ok(toml::from_str(&s).context("parse config toml")?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg).await?,
        Command::Run => run(&cfg).await?,
        Command::Vision { cmd } => vision_cmd(&cfg, cmd)?,
    }
    Ok(())
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    pilot_vision::doctor::check_vision(&cfg.vision)?;
    pilot_policy::check_policy(&cfg.policy)?;
    anyhow::ensure!(
        cfg.runtime.target_fps >= 1.0 && cfg.runtime.target_fps <= 120.0,
        "runtime.target_fps out of range 1..120"
    );
    anyhow::ensure!(cfg.runtime.error_backoff_ms >= 100, "runtime.error_backoff_ms too small");

    adb::probe_device(&cfg.adb).await.or_else(|e| {
        warn!("adb device not reachable: {e:#}");
        Ok::<(), anyhow::Error>(())
    })?;

    info!("doctor: OK");
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");

    let source = Arc::new(Mutex::new(AdbFrameSource::start(cfg.adb.clone())?));
    let sink = Arc::new(Mutex::new(AdbGestureSink::new(cfg.adb.clone())));

    let vision = cfg.vision.clone();
    let factory: DetectorFactory = Box::new(move |model_source| {
        let mut vcfg = vision.clone();
        vcfg.model_source = model_source.to_string();
        detector::load_detector(&vcfg)
    });

    let frame_loop = FrameLoop::new(cfg.runtime.clone(), cfg.policy.clone(), source, sink, factory);
    frame_loop.start(&cfg.vision.model_source)?;

    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    ticker.tick().await; // first tick fires immediately
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let st = frame_loop.status();
                info!("status: frames={} fps={:.1}", st.frame_count, st.fps);
            }
        }
    }

    info!("ctrl-c received, stopping");
    frame_loop.stop();
    Ok(())
}

fn vision_cmd(cfg: &Config, cmd: VisionCmd) -> Result<()> {
    match cmd {
        VisionCmd::Inspect => vision_inspect(&cfg.vision),
    }
}

#[cfg(feature = "vision-tflite")]
fn vision_inspect(cfg: &VisionConfig) -> Result<()> {
    use pilot_vision::engine::TensorEngine;
    use pilot_vision::tflite::TfLiteEngine;

    let (path, bytes) =
        detector::resolve_model_bytes(&cfg.model_source, std::path::Path::new(&cfg.assets_dir))?;
    let engine = TfLiteEngine::new(bytes)?;

    println!("model: {}", path.display());
    println!("input dims: {:?}", engine.input_dims());
    for i in 0..engine.output_count() {
        println!("output[{i}] dims: {:?}", engine.output_dims(i)?);
    }
    Ok(())
}

#[cfg(not(feature = "vision-tflite"))]
fn vision_inspect(_cfg: &VisionConfig) -> Result<()> {
    anyhow::bail!("vision backend not available; build with --features vision-tflite")
}
