use crate::pbs::{node_state_gauge, JobSnapshot, NodeSnapshot};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;

/// The exported metric surface. Metric names and label names are a stable
/// contract for downstream dashboards.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    // Job metrics, reset as one group before every job fetch.
    pub running_jobs_by_user: GaugeVec,
    pub running_jobs_by_queue: GaugeVec,
    pub jobs_in_queue: GaugeVec,
    pub jobs_by_status: GaugeVec,
    pub total_running_jobs: Gauge,
    pub total_r_jobs: Gauge,
    pub total_h_jobs: Gauge,
    pub total_f_jobs: Gauge,
    pub total_q_jobs: Gauge,
    pub total_e_jobs: Gauge,
    pub total_b_jobs: Gauge,
    pub total_all_jobs: Gauge,
    // Node metrics, reset as one group before every node fetch.
    pub node_state: GaugeVec,
    pub node_jobs: GaugeVec,
    pub node_cpus_available: GaugeVec,
    pub node_cpus_used: GaugeVec,
    pub node_cpus_total: GaugeVec,
    pub node_gpus_available: GaugeVec,
    pub node_gpus_used: GaugeVec,
    pub node_gpus_total: GaugeVec,
    pub node_memory_available: GaugeVec,
    pub node_memory_used: GaugeVec,
    pub node_memory_total: GaugeVec,
    pub node_count_free: Gauge,
    pub node_count_busy: Gauge,
    pub node_count_offline: Gauge,
    pub node_count_down: Gauge,
    // Exporter self-metrics, never reset.
    pub scrape_count_total: Counter,
    pub fetch_errors_total: CounterVec,
    pub last_poll_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let running_jobs_by_user = GaugeVec::new(
            opts!("qstat_running_jobs_by_user", "Number of running jobs per user"),
            &["user"],
        )?;
        let running_jobs_by_queue = GaugeVec::new(
            opts!(
                "qstat_running_jobs_by_queue",
                "Number of running jobs per queue"
            ),
            &["queue"],
        )?;
        let jobs_in_queue = GaugeVec::new(
            opts!("qstat_jobs_in_queue", "Total number of jobs in each queue"),
            &["queue"],
        )?;
        let jobs_by_status = GaugeVec::new(
            opts!("qstat_jobs_by_status", "Number of jobs by status"),
            &["status"],
        )?;
        let total_running_jobs = Gauge::with_opts(opts!(
            "qstat_total_running_jobs",
            "Total number of running jobs"
        ))?;
        let total_r_jobs = Gauge::with_opts(opts!(
            "qstat_total_r_jobs",
            "Total number of Running (R) jobs"
        ))?;
        let total_h_jobs =
            Gauge::with_opts(opts!("qstat_total_h_jobs", "Total number of Hold (H) jobs"))?;
        let total_f_jobs = Gauge::with_opts(opts!(
            "qstat_total_f_jobs",
            "Total number of Finished (F) jobs"
        ))?;
        let total_q_jobs = Gauge::with_opts(opts!(
            "qstat_total_q_jobs",
            "Total number of Queuing (Q) jobs"
        ))?;
        let total_e_jobs = Gauge::with_opts(opts!(
            "qstat_total_e_jobs",
            "Total number of Error (E) jobs"
        ))?;
        let total_b_jobs = Gauge::with_opts(opts!(
            "qstat_total_b_jobs",
            "Total number of Array Job Running (B) jobs"
        ))?;
        let total_all_jobs =
            Gauge::with_opts(opts!("qstat_total_all_jobs", "Total number of all jobs"))?;

        let node_state = GaugeVec::new(
            opts!(
                "pbs_node_state",
                "Node state (1=free, 2=busy, 3=offline, 4=down)"
            ),
            &["node"],
        )?;
        let node_jobs = GaugeVec::new(
            opts!("pbs_node_jobs", "Number of jobs on node"),
            &["node"],
        )?;
        let node_cpus_available = GaugeVec::new(
            opts!("pbs_node_cpus_available", "Available CPUs on node"),
            &["node"],
        )?;
        let node_cpus_used = GaugeVec::new(
            opts!("pbs_node_cpus_used", "Used CPUs on node"),
            &["node"],
        )?;
        let node_cpus_total = GaugeVec::new(
            opts!("pbs_node_cpus_total", "Total CPUs on node"),
            &["node"],
        )?;
        let node_gpus_available = GaugeVec::new(
            opts!("pbs_node_gpus_available", "Available GPUs on node"),
            &["node"],
        )?;
        let node_gpus_used = GaugeVec::new(
            opts!("pbs_node_gpus_used", "Used GPUs on node"),
            &["node"],
        )?;
        let node_gpus_total = GaugeVec::new(
            opts!("pbs_node_gpus_total", "Total GPUs on node"),
            &["node"],
        )?;
        let node_memory_available = GaugeVec::new(
            opts!(
                "pbs_node_memory_available_gb",
                "Available memory on node in GB"
            ),
            &["node"],
        )?;
        let node_memory_used = GaugeVec::new(
            opts!("pbs_node_memory_used_gb", "Used memory on node in GB"),
            &["node"],
        )?;
        let node_memory_total = GaugeVec::new(
            opts!("pbs_node_memory_total_gb", "Total memory on node in GB"),
            &["node"],
        )?;
        let node_count_free = Gauge::with_opts(opts!(
            "pbs_node_count_free",
            "Number of nodes in free state (status=1)"
        ))?;
        let node_count_busy = Gauge::with_opts(opts!(
            "pbs_node_count_busy",
            "Number of nodes in busy state (status=2)"
        ))?;
        let node_count_offline = Gauge::with_opts(opts!(
            "pbs_node_count_offline",
            "Number of nodes in offline state (status=3)"
        ))?;
        let node_count_down = Gauge::with_opts(opts!(
            "pbs_node_count_down",
            "Number of nodes in down state (status=4)"
        ))?;

        let scrape_count_total = Counter::with_opts(opts!(
            "pbs_exporter_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let fetch_errors_total = CounterVec::new(
            opts!(
                "pbs_exporter_fetch_errors_total",
                "Failed report fetches by report"
            ),
            &["report"],
        )?;
        let last_poll_timestamp_seconds = Gauge::with_opts(opts!(
            "pbs_exporter_last_poll_timestamp_seconds",
            "Unix timestamp of the last completed poll cycle"
        ))?;

        register(&registry, &running_jobs_by_user)?;
        register(&registry, &running_jobs_by_queue)?;
        register(&registry, &jobs_in_queue)?;
        register(&registry, &jobs_by_status)?;
        register(&registry, &total_running_jobs)?;
        register(&registry, &total_r_jobs)?;
        register(&registry, &total_h_jobs)?;
        register(&registry, &total_f_jobs)?;
        register(&registry, &total_q_jobs)?;
        register(&registry, &total_e_jobs)?;
        register(&registry, &total_b_jobs)?;
        register(&registry, &total_all_jobs)?;
        register(&registry, &node_state)?;
        register(&registry, &node_jobs)?;
        register(&registry, &node_cpus_available)?;
        register(&registry, &node_cpus_used)?;
        register(&registry, &node_cpus_total)?;
        register(&registry, &node_gpus_available)?;
        register(&registry, &node_gpus_used)?;
        register(&registry, &node_gpus_total)?;
        register(&registry, &node_memory_available)?;
        register(&registry, &node_memory_used)?;
        register(&registry, &node_memory_total)?;
        register(&registry, &node_count_free)?;
        register(&registry, &node_count_busy)?;
        register(&registry, &node_count_offline)?;
        register(&registry, &node_count_down)?;
        register(&registry, &scrape_count_total)?;
        register(&registry, &fetch_errors_total)?;
        register(&registry, &last_poll_timestamp_seconds)?;

        Ok(Arc::new(Self {
            registry,
            running_jobs_by_user,
            running_jobs_by_queue,
            jobs_in_queue,
            jobs_by_status,
            total_running_jobs,
            total_r_jobs,
            total_h_jobs,
            total_f_jobs,
            total_q_jobs,
            total_e_jobs,
            total_b_jobs,
            total_all_jobs,
            node_state,
            node_jobs,
            node_cpus_available,
            node_cpus_used,
            node_cpus_total,
            node_gpus_available,
            node_gpus_used,
            node_gpus_total,
            node_memory_available,
            node_memory_used,
            node_memory_total,
            node_count_free,
            node_count_busy,
            node_count_offline,
            node_count_down,
            scrape_count_total,
            fetch_errors_total,
            last_poll_timestamp_seconds,
        }))
    }

    /// Clears every job-domain series. Called before the job report is
    /// even fetched, so a failed fetch leaves the domain empty, not stale.
    pub fn reset_job_metrics(&self) {
        self.running_jobs_by_user.reset();
        self.running_jobs_by_queue.reset();
        self.jobs_in_queue.reset();
        self.jobs_by_status.reset();
        self.total_running_jobs.set(0.0);
        self.total_r_jobs.set(0.0);
        self.total_h_jobs.set(0.0);
        self.total_f_jobs.set(0.0);
        self.total_q_jobs.set(0.0);
        self.total_e_jobs.set(0.0);
        self.total_b_jobs.set(0.0);
        self.total_all_jobs.set(0.0);
    }

    /// Clears every node-domain series, same discipline as the job side.
    pub fn reset_node_metrics(&self) {
        self.node_state.reset();
        self.node_jobs.reset();
        self.node_cpus_available.reset();
        self.node_cpus_used.reset();
        self.node_cpus_total.reset();
        self.node_gpus_available.reset();
        self.node_gpus_used.reset();
        self.node_gpus_total.reset();
        self.node_memory_available.reset();
        self.node_memory_used.reset();
        self.node_memory_total.reset();
        self.node_count_free.set(0.0);
        self.node_count_busy.set(0.0);
        self.node_count_offline.set(0.0);
        self.node_count_down.set(0.0);
    }

    pub fn publish_jobs(&self, snapshot: &JobSnapshot) {
        for (user, count) in &snapshot.running_by_user {
            self.running_jobs_by_user
                .with_label_values(&[user])
                .set(*count as f64);
        }
        for (queue, count) in &snapshot.running_by_queue {
            self.running_jobs_by_queue
                .with_label_values(&[queue])
                .set(*count as f64);
        }
        for (queue, count) in &snapshot.total_by_queue {
            self.jobs_in_queue
                .with_label_values(&[queue])
                .set(*count as f64);
        }
        for (status, count) in &snapshot.count_by_status {
            self.jobs_by_status
                .with_label_values(&[status])
                .set(*count as f64);
        }

        let totals = snapshot.totals;
        self.total_running_jobs.set(totals.running as f64);
        self.total_r_jobs.set(totals.r as f64);
        self.total_h_jobs.set(totals.h as f64);
        self.total_f_jobs.set(totals.f as f64);
        self.total_q_jobs.set(totals.q as f64);
        self.total_e_jobs.set(totals.e as f64);
        self.total_b_jobs.set(totals.b as f64);
        self.total_all_jobs.set(totals.all as f64);
    }

    pub fn publish_nodes(&self, snapshot: &NodeSnapshot) {
        self.node_count_free.set(snapshot.counts.free as f64);
        self.node_count_busy.set(snapshot.counts.busy as f64);
        self.node_count_offline.set(snapshot.counts.offline as f64);
        self.node_count_down.set(snapshot.counts.down as f64);

        for (name, info) in &snapshot.nodes {
            let labels: [&str; 1] = [name];
            self.node_state
                .with_label_values(&labels)
                .set(node_state_gauge(&info.state));
            self.node_jobs
                .with_label_values(&labels)
                .set(info.jobs as f64);

            // Used counts are derived here, never stored in the snapshot.
            let used_cpus = info.cpus_total.saturating_sub(info.cpus_available);
            self.node_cpus_available
                .with_label_values(&labels)
                .set(info.cpus_available as f64);
            self.node_cpus_used
                .with_label_values(&labels)
                .set(used_cpus as f64);
            self.node_cpus_total
                .with_label_values(&labels)
                .set(info.cpus_total as f64);

            let used_gpus = info.gpus_total.saturating_sub(info.gpus_available);
            self.node_gpus_available
                .with_label_values(&labels)
                .set(info.gpus_available as f64);
            self.node_gpus_used
                .with_label_values(&labels)
                .set(used_gpus as f64);
            self.node_gpus_total
                .with_label_values(&labels)
                .set(info.gpus_total as f64);

            let used_memory = info.memory_total_gb - info.memory_available_gb;
            self.node_memory_available
                .with_label_values(&labels)
                .set(info.memory_available_gb);
            self.node_memory_used
                .with_label_values(&labels)
                .set(used_memory);
            self.node_memory_total
                .with_label_values(&labels)
                .set(info.memory_total_gb);
        }
    }

    pub fn inc_scrape_count(&self) {
        self.scrape_count_total.inc();
    }

    pub fn inc_fetch_error(&self, report: &str) {
        self.fetch_errors_total.with_label_values(&[report]).inc();
    }

    pub fn set_last_poll_timestamp(&self, unix: i64) {
        self.last_poll_timestamp_seconds.set(unix as f64);
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pbs::parser::{parse_job_report, parse_node_report};

    const NODE_REPORT: &str = "\
header
header
node01 free 2 0 0 400gb/512gb 100/112 0/0 4/8 --
node02 busy 8 0 0 10gb/512gb 0/112 0/0 0/8 --
";

    fn encoded(metrics: &Metrics) -> String {
        String::from_utf8(metrics.encode_metrics().expect("encode")).expect("utf8")
    }

    #[test]
    fn publish_jobs_exports_series() {
        let metrics = Metrics::new().expect("metrics init");
        let report = "\
h1
h2
1.pbs a alice 0:01 R medium
2.pbs b bob 0:01 Q medium
";
        let snap = parse_job_report(report, &["small".to_string()]);
        metrics.reset_job_metrics();
        metrics.publish_jobs(&snap);

        let text = encoded(&metrics);
        assert!(text.contains("qstat_running_jobs_by_user{user=\"alice\"} 1"));
        assert!(text.contains("qstat_jobs_in_queue{queue=\"medium\"} 2"));
        assert!(text.contains("qstat_jobs_in_queue{queue=\"small\"} 0"));
        assert!(text.contains("qstat_total_all_jobs 2"));
        assert!(text.contains("qstat_total_running_jobs 1"));
    }

    #[test]
    fn publish_nodes_derives_used_at_publish_time() {
        let metrics = Metrics::new().expect("metrics init");
        let snap = parse_node_report(NODE_REPORT);
        metrics.reset_node_metrics();
        metrics.publish_nodes(&snap);

        let text = encoded(&metrics);
        assert!(text.contains("pbs_node_cpus_used{node=\"node01\"} 12"));
        assert!(text.contains("pbs_node_gpus_used{node=\"node01\"} 4"));
        assert!(text.contains("pbs_node_memory_used_gb{node=\"node01\"} 112"));
        assert!(text.contains("pbs_node_state{node=\"node01\"} 1"));
        assert!(text.contains("pbs_node_state{node=\"node02\"} 2"));
        assert!(text.contains("pbs_node_count_free 1"));
        assert!(text.contains("pbs_node_count_busy 1"));
    }

    #[test]
    fn reset_clears_previous_label_sets() {
        let metrics = Metrics::new().expect("metrics init");
        let snap = parse_node_report(NODE_REPORT);
        metrics.reset_node_metrics();
        metrics.publish_nodes(&snap);
        assert!(encoded(&metrics).contains("node01"));

        // Fail-empty: a reset with no subsequent publish leaves no trace of
        // the previous cycle's per-node series.
        metrics.reset_node_metrics();
        let text = encoded(&metrics);
        assert!(!text.contains("node01"));
        assert!(text.contains("pbs_node_count_free 0"));
    }

    #[test]
    fn self_metrics_survive_domain_resets() {
        let metrics = Metrics::new().expect("metrics init");
        metrics.inc_scrape_count();
        metrics.inc_fetch_error("qstat");
        metrics.reset_job_metrics();
        metrics.reset_node_metrics();

        let text = encoded(&metrics);
        assert!(text.contains("pbs_exporter_scrape_count_total 1"));
        assert!(text.contains("pbs_exporter_fetch_errors_total{report=\"qstat\"} 1"));
    }
}
