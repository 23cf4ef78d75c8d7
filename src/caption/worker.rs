//! Inference worker
//!
//! A dedicated OS thread that owns the caption model. The only things it
//! shares with the UI are two unbounded channels: jobs in, events out.
//!
//! Lifecycle: Starting (model loads once) -> Ready -> Busy per job -> Ready.
//! The thread exits when every job sender has been dropped.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;

use super::model::{CaptionModel, ModelFactory, Preprocessor};
use crate::error::{ModelError, WorkerError};
use crate::state::data::{CaptionFailure, CaptionJob, CaptionResult, ImageId, JobTicket};
use crate::state::settings::Settings;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Everything the worker reports back to the UI thread
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Model loaded, accepting jobs
    Ready,
    /// Model failed to load; the worker has exited
    Unavailable(String),
    /// A job was dequeued and inference started
    Started(JobTicket, ImageId),
    /// Inference finished; one per successful job
    Captioned(CaptionResult),
    /// Decode or inference failed; the job is dropped
    Failed(CaptionFailure),
}

/// Observable state of the worker, as seen from its events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Ready,
    Busy,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// How long a single blocking receive waits before looping
    pub idle_timeout: Duration,
    /// Square input size handed to the preprocessor
    pub input_size: u32,
}

impl From<&Settings> for WorkerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            idle_timeout: settings.worker_idle_timeout(),
            input_size: settings.model_input_size,
        }
    }
}

/// Join handle for the worker thread
#[derive(Debug)]
pub struct WorkerHandle {
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Wait for the thread to exit (drop every job sender first)
    pub fn join(self) -> Result<(), WorkerError> {
        self.thread.join().map_err(|_| WorkerError::Panicked)
    }

    /// Join if the thread exits within `grace`, otherwise detach it
    ///
    /// Returns `Ok(false)` when the thread was left running, e.g. in the
    /// middle of a slow inference.
    pub fn join_within(self, grace: Duration) -> Result<bool, WorkerError> {
        let deadline = Instant::now() + grace;
        while !self.thread.is_finished() {
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        self.join().map(|()| true)
    }
}

/// Start the worker thread
///
/// The factory runs on the new thread, so the model's startup cost is paid
/// there exactly once and never blocks the caller.
pub fn spawn(
    factory: ModelFactory,
    config: WorkerConfig,
) -> Result<(Sender<CaptionJob>, Receiver<WorkerEvent>, WorkerHandle), WorkerError> {
    let (job_tx, job_rx) = mpsc::channel();
    let (event_tx, event_rx) = mpsc::channel();

    let thread = thread::Builder::new()
        .name("caption-worker".to_string())
        .spawn(move || run(factory, config, job_rx, event_tx))?;

    Ok((job_tx, event_rx, WorkerHandle { thread }))
}

fn run(
    factory: ModelFactory,
    config: WorkerConfig,
    jobs: Receiver<CaptionJob>,
    events: Sender<WorkerEvent>,
) {
    tracing::info!("⏳ Loading caption model...");
    let started = Instant::now();

    let mut model = match catch_unwind(AssertUnwindSafe(factory)) {
        Ok(Ok(model)) => model,
        Ok(Err(e)) => {
            tracing::error!("❌ Caption model failed to load: {}", e);
            let _ = events.send(WorkerEvent::Unavailable(e.to_string()));
            return;
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            tracing::error!("❌ Caption model panicked while loading: {}", reason);
            let _ = events.send(WorkerEvent::Unavailable(reason));
            return;
        }
    };
    let preprocessor = Preprocessor::new(config.input_size);

    tracing::info!("✅ Caption model ready in {:.1?}", started.elapsed());
    if events.send(WorkerEvent::Ready).is_err() {
        return;
    }

    loop {
        let job = match jobs.recv_timeout(config.idle_timeout) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => {
                tracing::trace!("caption worker idle");
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let id = job.image.id().clone();
        if events
            .send(WorkerEvent::Started(job.ticket, id.clone()))
            .is_err()
        {
            break;
        }

        let started = Instant::now();
        let event = match caption_one(&preprocessor, model.as_mut(), &job) {
            Ok(text) => {
                tracing::info!("📝 Captioned {} in {:.1?}", id, started.elapsed());
                WorkerEvent::Captioned(CaptionResult {
                    ticket: job.ticket,
                    image: job.image,
                    text,
                    completed_at: Utc::now(),
                })
            }
            Err(e) => {
                tracing::warn!("⚠️  Caption failed for {}: {}", id, e);
                WorkerEvent::Failed(CaptionFailure {
                    ticket: job.ticket,
                    image: job.image,
                    reason: e.to_string(),
                })
            }
        };

        // Nobody left to deliver to
        if events.send(event).is_err() {
            break;
        }
    }

    tracing::info!("🛑 Caption worker stopped");
}

/// Decode, preprocess and infer a single job, turning panics into errors
fn caption_one(
    preprocessor: &Preprocessor,
    model: &mut dyn CaptionModel,
    job: &CaptionJob,
) -> Result<String, ModelError> {
    catch_unwind(AssertUnwindSafe(|| {
        let prepared = preprocessor.prepare(&job.image)?;
        model.infer(&prepared)
    }))
    .map_err(|payload| ModelError::Panicked(panic_message(payload.as_ref())))?
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
