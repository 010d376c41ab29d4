//! smsimg: send an image as SMS-sized encrypted fragments
//!
//! Commands:
//!   send <image>            - compress, fragment, encrypt, transmit, reassemble
//!   compress <image>        - run only the byte-budget compressor
//!   key show | key reset    - inspect or delete the installation key
//!   config show             - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use smsimg_core::config::{ReassemblyMode, SmsimgConfig};
use smsimg_core::TransferState;
use smsimg_secrets::KeyStore;
use smsimg_transfer::{ArtifactStore, LoopbackTransport, TransferEvent, TransferPipeline};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "smsimg",
    version,
    about = "Send images as encrypted SMS-sized fragments",
    long_about = "smsimg: compress an image to a byte budget, split it into encrypted fragments, \
                  deliver them, and reassemble the image on the far side"
)]
struct Cli {
    /// Path to smsimg.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SMSIMG_CONFIG",
        default_value = "~/.config/smsimg/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "SMSIMG_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "SMSIMG_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a full transfer over the in-process loopback transport
    Send {
        /// Image to send (JPEG or PNG)
        image: PathBuf,
        /// Directory for the reconstructed image (overrides [output] dir)
        #[arg(long, short = 'o')]
        output_dir: Option<PathBuf>,
        /// Reassemble around missing fragments instead of failing
        #[arg(long)]
        best_effort: bool,
        /// Print the transfer report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compress an image to the byte budget without sending it
    Compress {
        /// Image to compress (JPEG or PNG)
        image: PathBuf,
        /// Write the compressed JPEG here
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Installation key management
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /// Show the key fingerprint and where the key came from
    Show,
    /// Delete the persisted key; previously sent fragments become unreadable
    Reset {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = smsimg_core::config::expand_tilde(&cli.config);
    let config = load_config(&config_path)?;

    let rust_log = std::env::var("RUST_LOG").ok();
    let directive = filter_directive(cli.log.as_deref(), rust_log.as_deref(), &config.log.level);
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| parse_log_format(&config.log.format));
    init_logging(&directive, &format);
    // Config loading ran before a subscriber existed.
    if !config_path.exists() {
        tracing::warn!(path = %config_path.display(), "no config file, using defaults");
    }

    match cli.command {
        Commands::Send {
            image,
            output_dir,
            best_effort,
            json,
        } => cmd_send(config, &image, output_dir, best_effort, json).await,
        Commands::Compress { image, output } => cmd_compress(&config, &image, output.as_deref()).await,
        Commands::Key { action: KeyAction::Show } => cmd_key_show(&config).await,
        Commands::Key {
            action: KeyAction::Reset { yes },
        } => cmd_key_reset(&config, yes).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<SmsimgConfig> {
    SmsimgConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
}

fn parse_log_format(s: &str) -> LogFormat {
    if s.eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Text
    }
}

/// `--log` / `SMSIMG_LOG` first, then `RUST_LOG`, then `[log] level`.
fn filter_directive(cli_log: Option<&str>, rust_log: Option<&str>, config_level: &str) -> String {
    cli_log
        .or(rust_log)
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(config_level)
        .to_string()
}

fn init_logging(directive: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries command output; logs go to stderr.
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

// ── `smsimg send` ─────────────────────────────────────────────────────────────

async fn cmd_send(
    mut config: SmsimgConfig,
    image: &Path,
    output_dir: Option<PathBuf>,
    best_effort: bool,
    json: bool,
) -> Result<()> {
    if let Some(dir) = output_dir {
        config.output.dir = dir;
    }
    if best_effort {
        config.fragments.reassembly = ReassemblyMode::BestEffort;
    }

    let keystore = Arc::new(KeyStore::from_config(&config.keystore).context("opening key store")?);
    let store = ArtifactStore::from_config(&config.output).context("opening output directory")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let pb = make_progress_bar("send");
    pb.set_message(image.display().to_string());
    let pb_events = pb.clone();
    let observer = Box::new(move |event: &TransferEvent| match event {
        TransferEvent::Stage(TransferState::Transmitting { sent: 0, total }) => {
            pb_events.set_length(*total as u64);
        }
        TransferEvent::Stage(state) => pb_events.set_message(state.to_string()),
        TransferEvent::FragmentSent { index, total } => {
            pb_events.set_position(*index as u64 + 1);
            pb_events.set_message(format!("sending encrypted chunk {}/{total}", index + 1));
        }
        TransferEvent::FragmentReceived { received } => {
            pb_events.set_message(format!("received chunk {received}"));
        }
        TransferEvent::FragmentDropped { position, reason } => {
            pb_events.println(format!("  dropped fragment #{position}: {reason}"));
        }
    });

    let pipeline = TransferPipeline::new(keystore, store, &config)
        .with_observer(observer)
        .with_cancellation(cancel);

    let result = pipeline.send_file(image, LoopbackTransport::new()).await;
    match result {
        Ok(report) => {
            pb.finish_with_message("done".to_string());
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("serializing report")?
                );
                return Ok(());
            }
            println!();
            println!("Transfer complete:");
            let location = report
                .artifact
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| report.artifact.name.clone());
            println!("  image:     {location}");
            println!(
                "  size:      {} ({}px wide, quality {:.2})",
                fmt_bytes(report.compressed_size as u64),
                report.width,
                report.quality
            );
            println!("  fragments: {}", report.fragments);
            println!("  key:       {}", report.key_fingerprint);
            for caveat in &report.caveats {
                println!("  caveat:    {caveat}");
            }
            Ok(())
        }
        Err(failure) => {
            pb.abandon_with_message(format!("failed ({})", failure.kind));
            Err(failure).with_context(|| format!("sending {}", image.display()))
        }
    }
}

// ── `smsimg compress` ─────────────────────────────────────────────────────────

async fn cmd_compress(config: &SmsimgConfig, image: &Path, output: Option<&Path>) -> Result<()> {
    let path = image.to_path_buf();
    let cfg = config.compress.clone();
    let compressed = tokio::task::spawn_blocking(move || smsimg_codec::compress_file(&path, &cfg))
        .await
        .context("compress task panicked")?
        .with_context(|| format!("compressing {}", image.display()))?;

    println!("Attempts:");
    for (i, a) in compressed.attempts.iter().enumerate() {
        println!(
            "  {:>2}. {:>4}px  q={:.2}  {}",
            i + 1,
            a.width,
            a.quality,
            fmt_bytes(a.decoded_size as u64)
        );
    }
    println!();
    let chunk_size = config.fragments.chunk_size;
    println!("  budget:    {}", fmt_bytes(compressed.target_bytes as u64));
    println!("  size:      {}", fmt_bytes(compressed.decoded_size() as u64));
    println!("  base64:    {} chars", compressed.payload.len());
    println!(
        "  fragments: {} x {chunk_size} chars",
        compressed.payload.len().div_ceil(chunk_size)
    );
    if let Some(caveat) = compressed.caveat() {
        println!("  caveat:    {caveat}");
    }

    if let Some(out) = output {
        let bytes = compressed.payload.decode()?;
        tokio::fs::write(out, &bytes)
            .await
            .with_context(|| format!("writing {}", out.display()))?;
        println!("  written:   {}", out.display());
    }
    Ok(())
}

// ── `smsimg key` ──────────────────────────────────────────────────────────────

async fn cmd_key_show(config: &SmsimgConfig) -> Result<()> {
    let keystore = KeyStore::from_config(&config.keystore).context("opening key store")?;
    let resolved = keystore.resolve().await;
    println!("backend:     {}", keystore.backend_name());
    println!("entry:       {}", config.keystore.entry);
    println!("fingerprint: {}", resolved.key.fingerprint());
    println!("source:      {}", resolved.source);
    Ok(())
}

async fn cmd_key_reset(config: &SmsimgConfig, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!(
            "refusing to delete the key without --yes \
             (fragments encrypted under it can no longer be decrypted)"
        );
    }
    let mut keystore = KeyStore::from_config(&config.keystore).context("opening key store")?;
    keystore.reset().await.context("deleting persisted key")?;
    println!("deleted key '{}' from {}", config.keystore.entry, keystore.backend_name());
    Ok(())
}

// ── `smsimg config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &SmsimgConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
