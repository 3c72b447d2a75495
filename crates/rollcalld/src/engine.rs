use rollcall_core::{encode_jpeg, FaceAnalyzer, FrameProcessor, Overlay, Recorder};
use rollcall_hw::{CaptureDevice, FrameSource};
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot};

/// Frames buffered per subscriber before new ones are dropped for it.
const SUBSCRIBER_BUFFER: usize = 2;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Subscribe {
        reply: oneshot::Sender<mpsc::Receiver<Vec<u8>>>,
    },
    Shutdown,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Join the video feed. The receiver yields annotated JPEG frames and
    /// ends when the capture session fails or the engine shuts down.
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<u8>>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Subscribe { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Ask the engine to stop. Open feeds end; the thread returns its recorder.
    pub async fn shutdown(&self) {
        if self.tx.send(EngineRequest::Shutdown).await.is_err() {
            tracing::debug!("engine already stopped");
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the camera and the frame processor, so it is the only
/// ledger writer. It captures only while at least one feed is subscribed.
/// Joining the returned handle yields the recorder for the absentee sweep.
pub fn spawn_engine<D, A>(
    device: D,
    processor: FrameProcessor<A>,
    overlay: Overlay,
    warmup_frames: usize,
) -> Result<(EngineHandle, JoinHandle<Recorder>), EngineError>
where
    D: CaptureDevice + Send + 'static,
    A: FaceAnalyzer + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<EngineRequest>(8);

    let join = std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut engine = Engine {
                device,
                processor,
                overlay,
                warmup_frames,
                rx,
                subscribers: Vec::new(),
            };
            engine.run();
            tracing::info!("engine thread exiting");
            engine.processor.into_recorder()
        })
        .map_err(EngineError::Spawn)?;

    Ok((EngineHandle { tx }, join))
}

enum Flow {
    Idle,
    Stop,
}

struct Engine<D, A> {
    device: D,
    processor: FrameProcessor<A>,
    overlay: Overlay,
    warmup_frames: usize,
    rx: mpsc::Receiver<EngineRequest>,
    subscribers: Vec<mpsc::Sender<Vec<u8>>>,
}

impl<D: CaptureDevice, A: FaceAnalyzer> Engine<D, A> {
    fn run(&mut self) {
        while let Some(req) = self.rx.blocking_recv() {
            match req {
                EngineRequest::Shutdown => break,
                EngineRequest::Subscribe { reply } => {
                    add_subscriber(&mut self.subscribers, reply);
                    if let Flow::Stop = self.stream() {
                        break;
                    }
                }
            }
        }
        self.subscribers.clear();
    }

    /// Capture and fan out frames until the last subscriber leaves, capture
    /// fails or shutdown is requested. The session is released on return.
    fn stream(&mut self) -> Flow {
        let mut session = match self.device.start() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "cannot start capture; closing video feeds");
                self.subscribers.clear();
                return Flow::Idle;
            }
        };
        tracing::info!("capture session started");

        if let Err(e) = session.skip(self.warmup_frames) {
            tracing::warn!(error = %e, "capture failed during warmup; closing video feeds");
            self.subscribers.clear();
            return Flow::Idle;
        }

        loop {
            loop {
                match self.rx.try_recv() {
                    Ok(EngineRequest::Subscribe { reply }) => add_subscriber(&mut self.subscribers, reply),
                    Ok(EngineRequest::Shutdown) | Err(TryRecvError::Disconnected) => return Flow::Stop,
                    Err(TryRecvError::Empty) => break,
                }
            }

            self.subscribers.retain(|s| !s.is_closed());
            if self.subscribers.is_empty() {
                tracing::info!("no video subscribers left; releasing camera");
                return Flow::Idle;
            }

            let frame = match session.next_frame() {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(error = %e, "capture failed; closing video feeds");
                    self.subscribers.clear();
                    return Flow::Idle;
                }
            };

            let mut image = frame.image;
            let now = chrono::Local::now().naive_local();
            let recognitions = match self.processor.process(&image, now) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, sequence = frame.sequence, "frame processing failed");
                    Vec::new()
                }
            };
            self.overlay.draw(&mut image, &recognitions);

            let jpeg = match encode_jpeg(&image) {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(error = %e, "jpeg encode failed; skipping frame");
                    continue;
                }
            };

            for sub in &self.subscribers {
                match sub.try_send(jpeg.clone()) {
                    Ok(()) | Err(TrySendError::Closed(_)) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::debug!(sequence = frame.sequence, "subscriber lagging; frame dropped");
                    }
                }
            }
        }
    }
}

fn add_subscriber(
    subscribers: &mut Vec<mpsc::Sender<Vec<u8>>>,
    reply: oneshot::Sender<mpsc::Receiver<Vec<u8>>>,
) {
    let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
    if reply.send(rx).is_ok() {
        subscribers.push(tx);
        tracing::info!(subscribers = subscribers.len(), "video feed subscribed");
    }
}
