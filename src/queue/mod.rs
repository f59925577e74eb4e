// src/queue/mod.rs

//! FIFO job queue.
//!
//! Mutated only by `push_back` (enqueue) and `pop_front` (dequeue), plus
//! `clear` which drops jobs that have not started yet. A job that leaves the
//! queue through `pop_front` is handed to exactly one execution.

pub mod job;

use std::collections::VecDeque;

use tracing::debug;

pub use job::{BlobContents, Job, SourceBlob};

#[derive(Debug, Default, Clone)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Append a job at the tail.
    pub fn push_back(&mut self, job: Job) {
        debug!(job = %job.label(), position = self.jobs.len(), "job enqueued");
        self.jobs.push_back(job);
    }

    /// Remove and return the head job.
    pub fn pop_front(&mut self) -> Option<Job> {
        let job = self.jobs.pop_front();
        if let Some(ref j) = job {
            debug!(job = %j.label(), remaining = self.jobs.len(), "job dequeued");
        }
        job
    }

    pub fn peek(&self) -> Option<&Job> {
        self.jobs.front()
    }

    /// Drop every queued job. Returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.jobs.len();
        self.jobs.clear();
        debug!(dropped, "queue cleared");
        dropped
    }

    /// Copy of the current queue contents in FIFO order.
    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs.iter().cloned().collect()
    }
}
