use crate::config::Config;
use crate::metrics::Metrics;
use crate::pbs::client::PbsClient;
use crate::pbs::parser::{parse_job_report, parse_node_report};
use crate::pbs::{JobSnapshot, NodeSnapshot};
use crate::state::State;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Runs one full poll cycle: the job domain first, then the node domain.
///
/// Each domain clears its metrics before its report is fetched. On fetch
/// failure the domain stays empty until the next successful poll; an empty
/// scrape is preferred over a stale one.
pub async fn run_cycle(
    client: &PbsClient,
    cfg: &Config,
    metrics: &Metrics,
    state: &Arc<RwLock<State>>,
) {
    let jobs = update_job_metrics(client, cfg, metrics).await;
    let nodes = update_node_metrics(client, metrics).await;

    let now = now_unix();
    metrics.set_last_poll_timestamp(now);

    let mut guard = state.write().await;
    guard.last_poll_unix = now;
    guard.record_jobs(jobs);
    guard.record_nodes(nodes);
}

async fn update_job_metrics(
    client: &PbsClient,
    cfg: &Config,
    metrics: &Metrics,
) -> Option<JobSnapshot> {
    metrics.reset_job_metrics();

    let report = match client.fetch_job_report().await {
        Ok(report) => report,
        Err(err) => {
            warn!(error = %err, "job report fetch failed, leaving job metrics empty");
            metrics.inc_fetch_error("qstat");
            return None;
        }
    };

    let snapshot = parse_job_report(&report, &cfg.queues);
    debug!(
        total = snapshot.totals.all,
        running = snapshot.totals.running,
        "job report parsed"
    );
    metrics.publish_jobs(&snapshot);
    Some(snapshot)
}

async fn update_node_metrics(
    client: &PbsClient,
    metrics: &Metrics,
) -> Option<NodeSnapshot> {
    metrics.reset_node_metrics();

    let report = match client.fetch_node_report().await {
        Ok(report) => report,
        Err(err) => {
            warn!(error = %err, "node report fetch failed, leaving node metrics empty");
            metrics.inc_fetch_error("pbsnodes");
            return None;
        }
    };

    let snapshot = parse_node_report(&report);
    debug!(nodes = snapshot.nodes.len(), "node report parsed");
    metrics.publish_nodes(&snapshot);
    Some(snapshot)
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
