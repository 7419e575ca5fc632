//! Bounded cache of recent work templates from a destination.
//!
//! Keeps the most recent notify messages keyed by job id, together with
//! the extranonce and difficulty in effect at the moment each was
//! received. The newest entry is the replay snapshot for destination
//! swaps; holding a backlog lets late shares for slightly-stale jobs be
//! matched to their template.

use std::collections::{HashMap, VecDeque};

use crate::stratum_v1::Notify;

/// Cache capacity. Pools rarely keep more than a handful of jobs valid;
/// 30 covers the deepest observed backlogs.
pub const JOB_CACHE_SIZE: usize = 30;

/// A notify message plus the destination state snapshot at receipt.
#[derive(Debug, Clone)]
pub struct CachedJob {
    pub notify: Notify,
    pub extranonce1: String,
    pub extranonce2_size: usize,
    pub difficulty: f64,
}

/// Insertion-ordered bounded map of jobs, oldest evicted first.
#[derive(Debug, Default)]
pub struct JobCache {
    order: VecDeque<String>,
    jobs: HashMap<String, CachedJob>,
}

impl JobCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job, evicting the oldest entry when full. Re-announcing
    /// an existing job id refreshes its payload and recency.
    pub fn push(&mut self, job: CachedJob) {
        let id = job.notify.job_id.clone();
        if self.jobs.insert(id.clone(), job).is_some() {
            self.order.retain(|j| *j != id);
        }
        self.order.push_back(id);

        while self.order.len() > JOB_CACHE_SIZE {
            if let Some(evicted) = self.order.pop_front() {
                self.jobs.remove(&evicted);
            }
        }
    }

    pub fn get(&self, job_id: &str) -> Option<&CachedJob> {
        self.jobs.get(job_id)
    }

    /// Most recently received job.
    pub fn latest(&self) -> Option<&CachedJob> {
        self.order.back().and_then(|id| self.jobs.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
