pub mod client;
pub mod parser;

use std::collections::HashMap;

/// One fully parsed sample of `qstat -t` output.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct JobSnapshot {
    pub running_by_user: HashMap<String, u64>,
    pub running_by_queue: HashMap<String, u64>,
    pub total_by_queue: HashMap<String, u64>,
    pub count_by_status: HashMap<String, u64>,
    pub totals: JobTotals,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobTotals {
    pub r: u64,
    pub h: u64,
    pub f: u64,
    pub q: u64,
    pub e: u64,
    pub b: u64,
    pub all: u64,
    pub running: u64,
}

/// One fully parsed sample of `pbsnodes -aSj` output.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct NodeSnapshot {
    pub nodes: HashMap<String, NodeInfo>,
    pub counts: NodeStateCounts,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct NodeInfo {
    /// Raw state string from the report, kept verbatim even when it is not
    /// one of the four recognized states.
    pub state: String,
    pub jobs: u64,
    pub cpus_available: u64,
    pub cpus_total: u64,
    pub gpus_available: u64,
    pub gpus_total: u64,
    pub memory_available_gb: f64,
    pub memory_total_gb: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct NodeStateCounts {
    pub free: u64,
    pub busy: u64,
    pub offline: u64,
    pub down: u64,
}

/// Numeric encoding of a node state for the `pbs_node_state` gauge.
/// Unrecognized states map to the down code.
pub fn node_state_gauge(state: &str) -> f64 {
    match state {
        "free" => 1.0,
        "busy" => 2.0,
        "offline" => 3.0,
        _ => 4.0,
    }
}
