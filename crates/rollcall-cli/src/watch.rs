//! Interactive attendance window.

use anyhow::{Context, Result};
use image::RgbImage;
use minifb::{Key, Window, WindowOptions};
use rollcall_core::{Config, EnrollmentStore, FacePipeline, FrameProcessor, Ledger, Overlay, Recorder};
use rollcall_hw::{Camera, CaptureDevice, FrameSource};
use std::sync::Arc;

pub const WINDOW_TITLE: &str = "Attendance System";

/// Show the camera with recognized names until `q` is pressed or the window
/// is closed. Every recognized face is marked present in the ledger.
pub fn run(config: &Config) -> Result<()> {
    let mut pipeline = FacePipeline::load(&config.model_dir).context("failed to load face models")?;
    let store = EnrollmentStore::load_non_empty(&config.known_faces_dir, &mut pipeline)
        .context("failed to enroll known faces")?;
    let ledger = Ledger::open(&config.ledger_path).context("failed to open attendance ledger")?;
    let overlay = Overlay::load(config.font_path.as_deref()).context("failed to load label font")?;

    let recorder = Recorder::new(Arc::new(store), ledger, config.tolerance);
    let mut processor = FrameProcessor::new(pipeline, recorder, config.downscale);

    let camera = Camera::open(&config.camera_device).context("failed to open camera")?;
    let mut session = camera.start().context("failed to start capture")?;
    session
        .skip(config.warmup_frames)
        .context("capture failed during warmup")?;

    let mut window = Window::new(
        WINDOW_TITLE,
        camera.width as usize,
        camera.height as usize,
        WindowOptions::default(),
    )
    .context("failed to open window")?;

    tracing::info!(device = %camera.device_path, "watching; press q to quit");

    let mut buffer = Vec::new();
    while window.is_open() && !window.is_key_down(Key::Q) {
        let frame = match session.next_frame() {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "capture failed; closing window");
                break;
            }
        };

        let mut image = frame.image;
        let now = chrono::Local::now().naive_local();
        let recognitions = match processor.process(&image, now) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence, "frame processing failed");
                Vec::new()
            }
        };
        overlay.draw(&mut image, &recognitions);

        to_argb_buffer(&image, &mut buffer);
        window
            .update_with_buffer(&buffer, image.width() as usize, image.height() as usize)
            .context("failed to update window")?;
    }

    tracing::info!("attendance window closed");
    Ok(())
}

/// Pack RGB pixels as `0x00RRGGBB`, the layout the window expects.
fn to_argb_buffer(image: &RgbImage, buffer: &mut Vec<u32>) {
    buffer.clear();
    buffer.extend(
        image
            .pixels()
            .map(|p| (p[0] as u32) << 16 | (p[1] as u32) << 8 | p[2] as u32),
    );
}
