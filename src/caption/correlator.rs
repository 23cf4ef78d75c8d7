use std::path::PathBuf;
use std::sync::mpsc::{Receiver, TryRecvError};

use super::worker::{WorkerEvent, WorkerState};
use crate::error::StoreError;
use crate::state::data::{CaptionFailure, CaptionResult, ImageId, JobTicket};
use crate::state::library::KnownFiles;
use crate::state::store::CaptionStore;

/// Upper bound on events handled in one tick, so a flood of results
/// can't stall the UI frame
const MAX_EVENTS_PER_POLL: usize = 64;

/// What happened during one poll tick
#[derive(Debug, Default)]
pub struct PollReport {
    /// Caption to show in the live field (last matching result wins)
    pub live: Option<String>,
    /// Captions written to disk this tick
    pub persisted: Vec<(ImageId, PathBuf)>,
    /// Jobs that finished this tick, successfully or not
    pub settled: Vec<JobTicket>,
    /// Jobs the worker dropped
    pub failures: Vec<CaptionFailure>,
    /// Results whose image could no longer be resolved
    pub stale: Vec<ImageId>,
    /// Writes that failed; not retried
    pub store_errors: Vec<StoreError>,
    /// Set when the model could not be loaded
    pub worker_unavailable: Option<String>,
    /// Set while the worker's event channel is disconnected
    pub worker_lost: bool,
}

impl PollReport {
    pub fn is_empty(&self) -> bool {
        self.live.is_none()
            && self.settled.is_empty()
            && self.store_errors.is_empty()
            && self.worker_unavailable.is_none()
            && !self.worker_lost
    }
}

/// Drains worker events on the UI thread and routes each caption to
/// either the live caption field or straight to its sidecar file.
///
/// The correlator is the only writer of generated captions.
#[derive(Debug)]
pub struct Correlator {
    events: Receiver<WorkerEvent>,
    store: Option<CaptionStore>,
    state: WorkerState,
}

impl Correlator {
    pub fn new(events: Receiver<WorkerEvent>) -> Self {
        Self {
            events,
            store: None,
            state: WorkerState::Starting,
        }
    }

    /// Point the correlator at the currently opened directory
    pub fn rebind(&mut self, store: CaptionStore) {
        tracing::debug!("📂 Correlator now writing to {}", store.root().display());
        self.store = Some(store);
    }

    pub fn worker_state(&self) -> WorkerState {
        self.state
    }

    /// Handle every event that is available right now, without waiting
    ///
    /// `selection` is the image currently shown in the UI. Results for it
    /// are surfaced through `PollReport::live`; every result is persisted.
    pub fn poll(&mut self, selection: Option<&ImageId>, known: &mut KnownFiles) -> PollReport {
        let mut report = PollReport::default();

        for _ in 0..MAX_EVENTS_PER_POLL {
            match self.events.try_recv() {
                Ok(event) => self.handle(event, selection, known, &mut report),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.state != WorkerState::Stopped {
                        tracing::error!("❌ Caption worker is gone; no more captions will arrive");
                        self.state = WorkerState::Stopped;
                    }
                    report.worker_lost = true;
                    break;
                }
            }
        }

        report
    }

    fn handle(
        &mut self,
        event: WorkerEvent,
        selection: Option<&ImageId>,
        known: &mut KnownFiles,
        report: &mut PollReport,
    ) {
        match event {
            WorkerEvent::Ready => {
                tracing::info!("🤖 Caption worker ready");
                self.state = WorkerState::Ready;
            }
            WorkerEvent::Unavailable(reason) => {
                self.state = WorkerState::Stopped;
                report.worker_unavailable = Some(reason);
            }
            WorkerEvent::Started(_, _) => {
                self.state = WorkerState::Busy;
            }
            WorkerEvent::Captioned(result) => {
                self.mark_idle();
                report.settled.push(result.ticket);
                self.apply(result, selection, known, report);
            }
            WorkerEvent::Failed(failure) => {
                self.mark_idle();
                report.settled.push(failure.ticket);
                report.failures.push(failure);
            }
        }
    }

    fn mark_idle(&mut self) {
        if self.state == WorkerState::Busy {
            self.state = WorkerState::Ready;
        }
    }

    fn apply(
        &self,
        result: CaptionResult,
        selection: Option<&ImageId>,
        known: &mut KnownFiles,
        report: &mut PollReport,
    ) {
        let id = result.id().clone();

        // The image must still exist and belong to the open directory
        let store = match &self.store {
            Some(store) if store.owns(&result.image) && result.image.path().is_file() => store,
            _ => {
                tracing::warn!(
                    "🗑️  Dropping caption for {}: {} is no longer in the open directory",
                    id,
                    result.image.path().display()
                );
                report.stale.push(id);
                return;
            }
        };

        match store.write(&id, &result.text) {
            Ok(path) => {
                tracing::info!(
                    "💾 Saved caption for {} to {} (generated {})",
                    id,
                    path.display(),
                    result.completed_at.format("%H:%M:%S")
                );
                known.insert(path.clone());
                report.persisted.push((id.clone(), path));
            }
            Err(e) => {
                tracing::error!("❌ {}", e);
                report.store_errors.push(e);
            }
        }

        if selection == Some(&id) {
            report.live = Some(result.text);
        }
    }
}
