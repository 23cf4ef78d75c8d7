/// Asynchronous captioning pipeline
///
/// This module keeps model inference off the UI thread:
/// - `model.rs` - the `infer(image) -> text` boundary and preprocessing
/// - `worker.rs` - the thread that owns the model
/// - `dispatcher.rs` - non-blocking job submission
/// - `correlator.rs` - draining results and routing them to the UI or disk
///
/// `CaptionPipeline` wires the three together for the app.

pub mod correlator;
pub mod dispatcher;
pub mod model;
pub mod worker;

pub use correlator::PollReport;
pub use worker::{WorkerConfig, WorkerState};

use std::time::Duration;

use crate::error::{DispatchError, WorkerError};
use crate::state::data::{ImageId, ImageRef, JobTicket};
use crate::state::library::KnownFiles;
use crate::state::settings::Settings;
use crate::state::store::CaptionStore;
use correlator::Correlator;
use dispatcher::Dispatcher;
use model::ModelFactory;
use worker::WorkerHandle;

/// The worker plus its UI-side dispatcher and correlator
#[derive(Debug)]
pub struct CaptionPipeline {
    dispatcher: Dispatcher,
    correlator: Correlator,
    worker: WorkerHandle,
}

impl CaptionPipeline {
    /// Start the worker with the built-in model
    pub fn start(settings: &Settings) -> Result<Self, WorkerError> {
        Self::with_factory(model::default_factory(), WorkerConfig::from(settings))
    }

    /// Start the worker with a custom model factory
    pub fn with_factory(factory: ModelFactory, config: WorkerConfig) -> Result<Self, WorkerError> {
        let (jobs, events, worker) = worker::spawn(factory, config)?;
        Ok(Self {
            dispatcher: Dispatcher::new(jobs),
            correlator: Correlator::new(events),
            worker,
        })
    }

    /// Switch the directory that generated captions are written to
    pub fn rebind(&mut self, store: CaptionStore) {
        self.correlator.rebind(store);
    }

    /// Queue a caption job unless one is already running for this image
    ///
    /// Returns `Ok(None)` when the image already has work in flight.
    pub fn request(&mut self, image: ImageRef) -> Result<Option<JobTicket>, DispatchError> {
        if self.is_generating(image.id()) {
            tracing::debug!("⏳ {} already has a caption job in flight", image.id());
            return Ok(None);
        }
        self.dispatcher.submit(image).map(Some)
    }

    /// Queue a caption job; never blocks
    pub fn submit(&mut self, image: ImageRef) -> Result<JobTicket, DispatchError> {
        self.dispatcher.submit(image)
    }

    /// Drain finished work and settle the dispatcher's bookkeeping
    pub fn poll(&mut self, selection: Option<&ImageId>, known: &mut KnownFiles) -> PollReport {
        let report = self.correlator.poll(selection, known);

        for ticket in &report.settled {
            self.dispatcher.settle(*ticket);
        }
        if report.worker_lost {
            let abandoned = self.dispatcher.abandon_all();
            if abandoned > 0 {
                tracing::warn!("⚠️  Abandoned {} caption jobs", abandoned);
            }
        }

        report
    }

    /// Whether a caption is being generated for this image
    pub fn is_generating(&self, id: &ImageId) -> bool {
        self.dispatcher.in_flight(id) > 0
    }

    pub fn pending(&self) -> usize {
        self.dispatcher.pending()
    }

    pub fn worker_state(&self) -> WorkerState {
        self.correlator.worker_state()
    }

    /// Stop accepting jobs and give the worker `grace` to finish its
    /// current one
    ///
    /// Returns `Ok(false)` if the worker was still busy and got detached;
    /// it exits on its own once the job is done.
    pub fn shutdown(self, grace: Duration) -> Result<bool, WorkerError> {
        let Self {
            dispatcher,
            correlator,
            worker,
        } = self;
        drop(dispatcher);
        drop(correlator);
        worker.join_within(grace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caption::model::{CaptionModel, PreparedImage};
    use crate::error::ModelError;
    use image::{Rgb, RgbImage};
    use std::path::Path;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::time::{Duration, Instant};

    const WAIT: Duration = Duration::from_secs(10);

    fn config() -> WorkerConfig {
        WorkerConfig {
            idle_timeout: Duration::from_millis(20),
            input_size: 8,
        }
    }

    fn write_png(dir: &Path, name: &str) -> ImageRef {
        let path = dir.join(name);
        RgbImage::from_pixel(4, 4, Rgb([10, 200, 10])).save(&path).unwrap();
        ImageRef::new(path).unwrap()
    }

    /// Model that answers "a photo of a <stem>"
    fn photo_factory() -> ModelFactory {
        Box::new(|| {
            let model: Box<dyn CaptionModel> = Box::new(|image: &PreparedImage| {
                Ok::<_, ModelError>(format!("a photo of a {}", image.id))
            });
            Ok(model)
        })
    }

    /// Model that reports when inference starts, then waits for a signal
    /// before answering
    struct Gate {
        open: Sender<()>,
        entered: Receiver<ImageId>,
    }

    impl Gate {
        fn wait_entered(&self) -> ImageId {
            self.entered.recv_timeout(WAIT).unwrap()
        }
    }

    fn gated_factory() -> (ModelFactory, Gate) {
        let (open, gate) = mpsc::channel::<()>();
        let (enter, entered) = mpsc::channel();
        let factory: ModelFactory = Box::new(move || {
            let model: Box<dyn CaptionModel> = Box::new(move |image: &PreparedImage| -> Result<String, ModelError> {
                let _ = enter.send(image.id.clone());
                gate.recv()
                    .map_err(|_| ModelError::Inference("gate closed".into()))?;
                Ok(format!("a photo of a {}", image.id))
            });
            Ok(model)
        });
        (factory, Gate { open, entered })
    }

    struct Scene {
        dir: tempfile::TempDir,
        store: CaptionStore,
        known: KnownFiles,
        pipeline: CaptionPipeline,
    }

    fn scene(factory: ModelFactory) -> Scene {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptionStore::new(dir.path());
        let mut pipeline = CaptionPipeline::with_factory(factory, config()).unwrap();
        pipeline.rebind(store.clone());
        Scene {
            dir,
            store,
            known: KnownFiles::default(),
            pipeline,
        }
    }

    impl Scene {
        /// Poll like the UI timer would until `done` holds, collecting reports
        fn poll_until(
            &mut self,
            selection: Option<&ImageId>,
            mut done: impl FnMut(&[PollReport]) -> bool,
        ) -> Vec<PollReport> {
            let deadline = Instant::now() + WAIT;
            let mut reports = Vec::new();
            while !done(&reports) {
                assert!(Instant::now() < deadline, "timed out waiting for the worker");
                let report = self.pipeline.poll(selection, &mut self.known);
                if !report.is_empty() {
                    reports.push(report);
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            reports
        }
    }

    fn settled(reports: &[PollReport]) -> usize {
        reports.iter().map(|r| r.settled.len()).sum()
    }

    #[test]
    fn test_selected_image_caption_goes_live() {
        let mut s = scene(photo_factory());
        let cat = write_png(s.dir.path(), "cat.png");
        let selection = cat.id().clone();

        s.pipeline.submit(cat.clone()).unwrap();
        assert!(s.pipeline.is_generating(cat.id()));

        let reports = s.poll_until(Some(&selection), |r| settled(r) == 1);

        let live: Vec<_> = reports.iter().filter_map(|r| r.live.as_deref()).collect();
        assert_eq!(live, vec!["a photo of a cat"]);
        assert_eq!(s.store.read(cat.id()).unwrap().as_deref(), Some("a photo of a cat"));
        assert!(!s.pipeline.is_generating(cat.id()));
    }

    #[test]
    fn test_other_image_caption_goes_to_disk() {
        let mut s = scene(photo_factory());
        let cat = write_png(s.dir.path(), "cat.png");
        let dog = write_png(s.dir.path(), "dog.png");
        let selection = cat.id().clone();

        s.pipeline.submit(dog.clone()).unwrap();
        let reports = s.poll_until(Some(&selection), |r| settled(r) == 1);

        assert!(reports.iter().all(|r| r.live.is_none()));
        assert_eq!(s.store.read(dog.id()).unwrap().as_deref(), Some("a photo of a dog"));
        assert!(s.known.contains(&s.store.caption_path(dog.id())));
        assert!(!s.store.exists(cat.id()));
    }

    #[test]
    fn test_broken_image_produces_no_caption() {
        let mut s = scene(photo_factory());
        let broken_path = s.dir.path().join("broken.png");
        std::fs::write(&broken_path, b"garbage").unwrap();
        let broken = ImageRef::new(&broken_path).unwrap();
        let cat = write_png(s.dir.path(), "cat.png");

        s.pipeline.submit(broken.clone()).unwrap();
        s.pipeline.submit(cat.clone()).unwrap();
        let reports = s.poll_until(Some(broken.id()), |r| settled(r) == 2);

        let failures: Vec<_> = reports.iter().flat_map(|r| &r.failures).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].image.id(), broken.id());
        assert!(!s.store.exists(broken.id()));
        assert_eq!(s.store.read(cat.id()).unwrap().as_deref(), Some("a photo of a cat"));
        assert_eq!(s.pipeline.pending(), 0);
    }

    #[test]
    fn test_poll_does_not_block_on_busy_worker() {
        let (factory, gate) = gated_factory();
        let mut s = scene(factory);
        let cat = write_png(s.dir.path(), "cat.png");
        let selection = cat.id().clone();

        s.pipeline.submit(cat.clone()).unwrap();
        assert_eq!(gate.wait_entered(), selection);

        let started = Instant::now();
        let report = s.pipeline.poll(Some(&selection), &mut s.known);
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(report.live, None);
        assert!(report.settled.is_empty());
        assert!(s.pipeline.is_generating(cat.id()));

        gate.open.send(()).unwrap();
        let reports = s.poll_until(Some(&selection), |r| settled(r) == 1);
        assert!(reports.iter().any(|r| r.live.as_deref() == Some("a photo of a cat")));
    }

    #[test]
    fn test_duplicate_jobs_both_complete() {
        let (factory, gate) = gated_factory();
        let mut s = scene(factory);
        let cat = write_png(s.dir.path(), "cat.png");
        let selection = cat.id().clone();

        s.pipeline.submit(cat.clone()).unwrap();
        s.pipeline.submit(cat.clone()).unwrap();
        assert_eq!(s.pipeline.pending(), 2);

        gate.open.send(()).unwrap();
        gate.open.send(()).unwrap();
        let reports = s.poll_until(Some(&selection), |r| settled(r) == 2);

        let persisted: usize = reports.iter().map(|r| r.persisted.len()).sum();
        assert_eq!(persisted, 2);
        assert_eq!(s.store.read(cat.id()).unwrap().as_deref(), Some("a photo of a cat"));
        assert!(!s.pipeline.is_generating(cat.id()));
    }

    #[test]
    fn test_image_deleted_mid_inference_is_dropped() {
        let (factory, gate) = gated_factory();
        let mut s = scene(factory);
        let cat = write_png(s.dir.path(), "cat.png");

        s.pipeline.submit(cat.clone()).unwrap();
        gate.wait_entered();
        std::fs::remove_file(cat.path()).unwrap();
        gate.open.send(()).unwrap();

        let reports = s.poll_until(Some(cat.id()), |r| settled(r) == 1);
        assert_eq!(reports.iter().map(|r| r.stale.len()).sum::<usize>(), 1);
        assert!(!s.store.exists(cat.id()));
    }

    #[test]
    fn test_unavailable_model_stops_pipeline() {
        let factory: ModelFactory = Box::new(|| Err(ModelError::Load("missing weights".into())));
        let mut s = scene(factory);

        let reports = s.poll_until(None, |r| r.iter().any(|r| r.worker_lost));
        assert!(reports.iter().any(|r| r.worker_unavailable.is_some()));
        assert_eq!(s.pipeline.worker_state(), WorkerState::Stopped);

        let cat = write_png(s.dir.path(), "cat.png");
        assert!(matches!(s.pipeline.submit(cat), Err(DispatchError::WorkerGone)));
    }

    #[test]
    fn test_shutdown_joins_idle_worker() {
        let s = scene(photo_factory());
        assert!(s.pipeline.shutdown(WAIT).unwrap());
    }

    #[test]
    fn test_shutdown_detaches_busy_worker() {
        let (factory, gate) = gated_factory();
        let s = scene(factory);
        let cat = write_png(s.dir.path(), "cat.png");
        let mut pipeline = s.pipeline;

        pipeline.submit(cat).unwrap();
        gate.wait_entered();

        let started = Instant::now();
        assert!(!pipeline.shutdown(Duration::from_millis(50)).unwrap());
        assert!(started.elapsed() < WAIT);

        // Let the detached worker finish
        gate.open.send(()).unwrap();
    }

    #[test]
    fn test_request_skips_image_already_in_flight() {
        let (factory, gate) = gated_factory();
        let mut s = scene(factory);
        let cat = write_png(s.dir.path(), "cat.png");
        let selection = cat.id().clone();

        assert!(s.pipeline.request(cat.clone()).unwrap().is_some());
        assert!(s.pipeline.request(cat.clone()).unwrap().is_none());
        assert_eq!(s.pipeline.pending(), 1);

        // Forced regeneration still queues a second job
        s.pipeline.submit(cat.clone()).unwrap();
        assert_eq!(s.pipeline.pending(), 2);

        gate.open.send(()).unwrap();
        gate.open.send(()).unwrap();
        s.poll_until(Some(&selection), |r| settled(r) == 2);
        assert!(s.pipeline.request(cat).unwrap().is_some());
    }
}
