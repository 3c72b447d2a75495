use anyhow::{anyhow, Context, Result};
use rollcall_core::{Config, EnrollmentStore, FacePipeline, FrameProcessor, Ledger, Overlay, Recorder};
use rollcall_hw::Camera;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod engine;
mod web;

use engine::EngineHandle;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::server()
        .load(None)
        .context("failed to load configuration")?;

    let mut pipeline =
        FacePipeline::load(&config.model_dir).context("failed to load face models")?;
    tracing::info!(dir = %config.model_dir.display(), "face models loaded");

    let store = EnrollmentStore::load_non_empty(&config.known_faces_dir, &mut pipeline)
        .context("failed to enroll known faces")?;
    let ledger = Ledger::open(&config.ledger_path).context("failed to open attendance ledger")?;

    let camera = Camera::open(&config.camera_device).context("failed to open camera")?;
    tracing::info!(
        device = %camera.device_path,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    let overlay = Overlay::load(config.font_path.as_deref()).context("failed to load label font")?;
    let recorder = Recorder::new(Arc::new(store), ledger.clone(), config.tolerance);
    let processor = FrameProcessor::new(pipeline, recorder, config.downscale);
    let (engine, join) = engine::spawn_engine(camera, processor, overlay, config.warmup_frames)?;

    let app = web::router(web::AppState {
        ledger,
        engine: engine.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    tracing::info!(addr = %config.listen_addr, tolerance = config.tolerance, "rollcalld ready");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine))
        .await;

    // The engine owns the only ledger writer; sweep once it has exited.
    let recorder = tokio::task::spawn_blocking(move || join.join())
        .await?
        .map_err(|_| anyhow!("engine thread panicked"))?;
    let today = chrono::Local::now().date_naive();
    let absent = tokio::task::spawn_blocking(move || recorder.mark_absentees(today))
        .await?
        .context("absentee sweep failed")?;
    tracing::info!(date = %today, absent = ?absent, "rollcalld stopped");

    served.context("http server failed")
}

/// Resolves on Ctrl-C after stopping the engine, which ends every open video
/// feed so graceful shutdown does not wait on them.
async fn shutdown_signal(engine: EngineHandle) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
    tracing::info!("rollcalld shutting down");
    engine.shutdown().await;
}
