use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::{AttendanceRecord, Config, EnrollmentStore, FacePipeline, Ledger, Recorder};
use rollcall_hw::{Camera, CaptureDevice, FrameSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

mod watch;

/// Fraction of near-black pixels above which a frame counts as dark.
const DARK_THRESHOLD: f32 = 0.95;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance CLI")]
struct Cli {
    /// TOML config file (overrides ROLLCALL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the attendance window and mark recognized faces present
    Watch,
    /// List enrolled names
    Faces,
    /// Print ledger rows
    Ledger {
        /// Only rows for this day (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Mark every enrolled name without a row on the day as absent
    Absentees {
        /// Day to sweep (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics
    Test {
        /// Number of frames to capture
        #[arg(long, default_value_t = 10)]
        frames: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::interactive()
        .load(cli.config.as_deref())
        .context("failed to load configuration")?;

    match cli.command {
        Commands::Watch => watch::run(&config)?,
        Commands::Faces => {
            let store = enroll(&config)?;
            for name in store.names() {
                println!("{name}");
            }
            println!("{} enrolled", store.len());
        }
        Commands::Ledger { date } => {
            let ledger = Ledger::open(&config.ledger_path).context("failed to open attendance ledger")?;
            let rows = match date {
                Some(d) => ledger.records_on(d)?,
                None => ledger.load()?,
            };
            for row in &rows {
                println!("{}", format_row(row));
            }
        }
        Commands::Absentees { date } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let store = enroll(&config)?;
            let ledger = Ledger::open(&config.ledger_path).context("failed to open attendance ledger")?;
            let absent = Recorder::new(Arc::new(store), ledger, config.tolerance).mark_absentees(date)?;
            if absent.is_empty() {
                println!("No absentees for {date}");
            } else {
                println!("Marked absent for {date}: {}", absent.join(", "));
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test { frames } => camera_test(&config, frames)?,
    }

    Ok(())
}

fn enroll(config: &Config) -> Result<EnrollmentStore> {
    let mut pipeline = FacePipeline::load(&config.model_dir).context("failed to load face models")?;
    EnrollmentStore::load_non_empty(&config.known_faces_dir, &mut pipeline)
        .context("failed to enroll known faces")
}

fn format_row(row: &AttendanceRecord) -> String {
    let time = row
        .time
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!("{:<24} {} {:>8} {:?}", row.name, row.date, time, row.status)
}

fn camera_test(config: &Config, frames: usize) -> Result<()> {
    println!("Running camera diagnostics...");
    let camera = Camera::open(&config.camera_device).context("failed to open camera")?;
    println!(
        "{}: {}x{} {:?} ({})",
        camera.device_path,
        camera.width,
        camera.height,
        camera.pixel_format(),
        camera.fourcc
    );

    let mut session = camera.start().context("failed to start capture")?;
    let started = Instant::now();
    let mut dark = 0;
    let mut brightness = 0.0f32;
    for _ in 0..frames {
        let frame = session.next_frame().context("capture failed")?;
        brightness += frame.avg_brightness();
        if frame.is_dark(DARK_THRESHOLD) {
            dark += 1;
        }
    }
    let elapsed = started.elapsed().as_secs_f32();

    if frames > 0 {
        println!(
            "captured {frames} frames in {elapsed:.2}s ({:.1} fps), avg brightness {:.1}, {dark} dark",
            frames as f32 / elapsed.max(f32::EPSILON),
            brightness / frames as f32
        );
    }
    Ok(())
}
