use crate::pbs::{JobSnapshot, NodeSnapshot};

/// Shared process state behind an `RwLock`: the poll task writes it once
/// per cycle, the HTTP layer reads it for `/api/state`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct State {
    pub started_at_unix: i64,
    pub last_poll_unix: i64,
    pub jobs: Option<JobSnapshot>,
    pub nodes: Option<NodeSnapshot>,
    pub job_fetch_failures: u64,
    pub node_fetch_failures: u64,
}

impl State {
    pub fn new(started_at_unix: i64) -> Self {
        Self {
            started_at_unix,
            ..Self::default()
        }
    }

    pub fn record_jobs(&mut self, snapshot: Option<JobSnapshot>) {
        if snapshot.is_none() {
            self.job_fetch_failures += 1;
        }
        self.jobs = snapshot;
    }

    pub fn record_nodes(&mut self, snapshot: Option<NodeSnapshot>) {
        if snapshot.is_none() {
            self.node_fetch_failures += 1;
        }
        self.nodes = snapshot;
    }
}
