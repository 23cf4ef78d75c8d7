use std::collections::HashMap;
use std::sync::mpsc::Sender;

use crate::error::DispatchError;
use crate::state::data::{CaptionJob, ImageId, ImageRef, JobTicket};

/// UI-side handle for queueing caption jobs.
///
/// `submit` never blocks: the job channel is unbounded, so it is a plain
/// enqueue-and-return. Jobs reach the worker in submission order.
///
/// There is no deduplication here. Submitting the same image twice runs two
/// jobs and yields two results; callers check for an existing caption first.
#[derive(Debug)]
pub struct Dispatcher {
    jobs: Sender<CaptionJob>,
    next_ticket: u64,
    in_flight: HashMap<JobTicket, ImageId>,
}

impl Dispatcher {
    pub fn new(jobs: Sender<CaptionJob>) -> Self {
        Self {
            jobs,
            next_ticket: 0,
            in_flight: HashMap::new(),
        }
    }

    /// Queue a caption job for an image
    pub fn submit(&mut self, image: ImageRef) -> Result<JobTicket, DispatchError> {
        let ticket = JobTicket(self.next_ticket);
        let id = image.id().clone();

        self.jobs
            .send(CaptionJob { ticket, image })
            .map_err(|_| DispatchError::WorkerGone)?;

        self.next_ticket += 1;
        self.in_flight.insert(ticket, id.clone());
        tracing::debug!("📨 Queued caption job #{} for {}", ticket.0, id);

        Ok(ticket)
    }

    /// Number of unfinished jobs for one image
    pub fn in_flight(&self, id: &ImageId) -> usize {
        self.in_flight.values().filter(|pending| *pending == id).count()
    }

    /// Number of unfinished jobs overall
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Mark a job as finished (captioned or failed)
    pub fn settle(&mut self, ticket: JobTicket) -> Option<ImageId> {
        self.in_flight.remove(&ticket)
    }

    /// Forget every unfinished job, e.g. once the worker is gone
    pub fn abandon_all(&mut self) -> usize {
        let count = self.in_flight.len();
        self.in_flight.clear();
        count
    }
}
