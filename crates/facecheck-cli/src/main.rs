use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facecheck_core::CapturedImage;
use facecheck_engine::Config;
use facecheck_gateway::{HttpGateway, RecognitionGateway};
use facecheck_hw::Camera;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Frames discarded after opening the camera so exposure can settle.
const WARMUP_FRAMES: usize = 4;

#[derive(Parser)]
#[command(name = "facecheck", about = "Facecheck camera and recognition-service diagnostics")]
struct Cli {
    /// TOML config file (defaults plus FACECHECK_* variables when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Capture one frame and save it as JPEG
    Snapshot {
        #[arg(short, long, default_value = "snapshot.jpg")]
        output: PathBuf,
    },
    /// Ask the service which pose a face shows
    Classify {
        /// JPEG to send instead of a fresh camera frame
        #[arg(short, long)]
        image: Option<PathBuf>,
    },
    /// Check whether a face is already enrolled
    Duplicate {
        #[arg(short, long)]
        image: Option<PathBuf>,
    },
    /// Submit one attendance check (no framing or liveness checks)
    Attend {
        #[arg(short, long)]
        image: Option<PathBuf>,
    },
    /// Register face samples for an employee
    Register {
        #[arg(short, long)]
        employee_id: String,
        /// JPEG files to upload; captures from the camera when empty
        images: Vec<PathBuf>,
        /// Frames to capture when no files are given
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
    /// List employees and their enrollment status
    Employees,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let config = Config::from_env();
            config.validate()?;
            config
        }
    };
    tracing::debug!(gateway = %config.gateway_url, device = %config.camera_device, "config loaded");

    match cli.command {
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({})", dev.path, dev.name, dev.driver);
            }
        }
        Commands::Snapshot { output } => {
            let image = capture(&config, 1)?
                .pop()
                .context("camera returned no frame")?;
            std::fs::write(&output, image.bytes())
                .with_context(|| format!("writing {}", output.display()))?;
            println!(
                "Saved {}x{} frame ({} bytes) to {}",
                image.width,
                image.height,
                image.len(),
                output.display()
            );
        }
        Commands::Classify { image } => {
            let image = single_image(&config, image.as_deref())?;
            print_json(&gateway(&config)?.classify_pose(&image).await?)?;
        }
        Commands::Duplicate { image } => {
            let image = single_image(&config, image.as_deref())?;
            print_json(&gateway(&config)?.check_duplicate(&image).await?)?;
        }
        Commands::Attend { image } => {
            let image = single_image(&config, image.as_deref())?;
            print_json(&gateway(&config)?.process_attendance(&image).await?)?;
        }
        Commands::Register {
            employee_id,
            images,
            count,
        } => {
            let samples = if images.is_empty() {
                capture(&config, count)?
            } else {
                images
                    .iter()
                    .map(|p| read_image(p))
                    .collect::<Result<Vec<_>>>()?
            };
            if samples.is_empty() {
                bail!("no samples to register");
            }
            let outcome = gateway(&config)?
                .register_face(&employee_id, &samples)
                .await?;
            print_json(&outcome)?;
            if !outcome.success {
                bail!(
                    "{}",
                    outcome.error_message().unwrap_or("registration failed")
                );
            }
        }
        Commands::Employees => {
            let employees = gateway(&config)?.list_employees().await?;
            for e in &employees {
                println!(
                    "{:<10} {:<30} {:<20} {}",
                    e.employee_id,
                    e.full_name,
                    e.department.as_deref().unwrap_or("-"),
                    if e.has_face { "enrolled" } else { "not enrolled" }
                );
            }
            println!("{} employee(s)", employees.len());
        }
    }

    Ok(())
}

fn gateway(config: &Config) -> Result<HttpGateway> {
    Ok(HttpGateway::new(&config.gateway_url, config.request_timeout())?)
}

fn single_image(config: &Config, path: Option<&Path>) -> Result<CapturedImage> {
    match path {
        Some(path) => read_image(path),
        None => capture(config, 1)?.pop().context("camera returned no frame"),
    }
}

/// Load a JPEG from disk. Dimensions are not decoded.
fn read_image(path: &Path) -> Result<CapturedImage> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        bail!("{} is not a JPEG file", path.display());
    }
    Ok(CapturedImage::new(bytes, 0, 0))
}

/// Capture `count` non-dark frames from the configured camera as JPEG stills.
fn capture(config: &Config, count: usize) -> Result<Vec<CapturedImage>> {
    let camera = Camera::open(
        &config.camera_device,
        config.camera_width,
        config.camera_height,
    )?;
    camera.warm_up(WARMUP_FRAMES);

    let mut images = Vec::with_capacity(count);
    let mut dark_skipped = 0usize;
    // Bound the attempts so a covered lens cannot loop forever.
    for _ in 0..count * 3 {
        if images.len() == count {
            break;
        }
        let frame = camera.capture_frame()?;
        if frame.is_dark {
            dark_skipped += 1;
            continue;
        }
        images.push(frame.encode_jpeg(config.jpeg_quality)?);
    }
    tracing::info!(captured = images.len(), dark_skipped, "camera capture finished");

    if images.len() < count {
        bail!(
            "only {} of {count} frames were usable ({dark_skipped} too dark)",
            images.len()
        );
    }
    Ok(images)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
