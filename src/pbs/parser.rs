use crate::pbs::{JobSnapshot, NodeInfo, NodeSnapshot};

// Field positions in a whitespace-split `qstat -t` data line.
const JOB_FIELD_USER: usize = 2;
const JOB_FIELD_STATUS: usize = 4;
const JOB_FIELD_QUEUE: usize = 5;
const JOB_MIN_FIELDS: usize = 6;

// Field positions in a whitespace-split `pbsnodes -aSj` data line.
const NODE_FIELD_NAME: usize = 0;
const NODE_FIELD_STATE: usize = 1;
const NODE_FIELD_JOBS: usize = 2;
const NODE_FIELD_MEM: usize = 5;
const NODE_FIELD_CPUS: usize = 6;
const NODE_FIELD_GPUS: usize = 8;
const NODE_MIN_FIELDS: usize = 9;

// Both reports start with a two-line header that is skipped regardless of
// content; dash separator rules and blank lines are skipped too.
const HEADER_LINES: usize = 2;

fn data_lines(report: &str) -> impl Iterator<Item = &str> {
    report
        .lines()
        .skip(HEADER_LINES)
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains("----"))
}

/// Parses an `available/total` token like `"112/112"`. `"--"` and the empty
/// string mean the resource is absent; a malformed side yields 0 for that
/// side only, so one bad token never rejects the whole line.
pub fn parse_fraction(token: &str) -> (u64, u64) {
    if token == "--" || token.is_empty() {
        return (0, 0);
    }
    let mut parts = token.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(avail), Some(total), None) => (
            avail.parse().unwrap_or(0),
            total.parse().unwrap_or(0),
        ),
        _ => (0, 0),
    }
}

/// Converts a memory token like `"512gb"` or `"2tb"` to gigabytes. A bare
/// number is taken as gigabytes; `"--"`, empty, or a non-numeric magnitude
/// yields 0. Suffixes are matched longest-first so `"500mb"` is never
/// mis-stripped on a trailing `b`.
pub fn parse_memory_gb(token: &str) -> f64 {
    let token = token.trim().to_lowercase();
    if token == "--" || token.is_empty() {
        return 0.0;
    }

    let (magnitude, factor) = if let Some(rest) = token.strip_suffix("tb") {
        (rest, 1024.0)
    } else if let Some(rest) = token.strip_suffix("gb") {
        (rest, 1.0)
    } else if let Some(rest) = token.strip_suffix("mb") {
        (rest, 0.001)
    } else if let Some(rest) = token.strip_suffix("kb") {
        (rest, 0.000001)
    } else {
        (token.as_str(), 1.0)
    };

    magnitude.parse::<f64>().map(|v| v * factor).unwrap_or(0.0)
}

/// Maps a raw one-letter job status code to its descriptive label. Unknown
/// codes pass through unchanged as their own label.
pub fn status_label(code: &str) -> String {
    match code.to_uppercase().as_str() {
        "F" => "Finished".to_string(),
        "H" => "Hold".to_string(),
        "R" => "Running".to_string(),
        "Q" => "Queuing".to_string(),
        "E" => "Error".to_string(),
        "B" => "ArrayJobRunning".to_string(),
        _ => code.to_string(),
    }
}

/// Parses the full text of a `qstat -t` report. Queues from `known_queues`
/// are pre-seeded at zero so idle queues still export a value; queues seen
/// only in the report are recorded as well.
pub fn parse_job_report(report: &str, known_queues: &[String]) -> JobSnapshot {
    let mut snapshot = JobSnapshot::default();
    for queue in known_queues {
        snapshot.running_by_queue.insert(queue.clone(), 0);
        snapshot.total_by_queue.insert(queue.clone(), 0);
    }

    for line in data_lines(report) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < JOB_MIN_FIELDS {
            continue;
        }
        let user = fields[JOB_FIELD_USER];
        let status = fields[JOB_FIELD_STATUS];
        let queue = fields[JOB_FIELD_QUEUE];

        *snapshot
            .count_by_status
            .entry(status_label(status))
            .or_insert(0) += 1;
        *snapshot.total_by_queue.entry(queue.to_string()).or_insert(0) += 1;

        snapshot.totals.all += 1;
        match status {
            "R" => snapshot.totals.r += 1,
            "H" => snapshot.totals.h += 1,
            "F" => snapshot.totals.f += 1,
            "Q" => snapshot.totals.q += 1,
            "E" => snapshot.totals.e += 1,
            "B" => snapshot.totals.b += 1,
            _ => {}
        }

        // Running counters key off the raw "R" code, not the label.
        if status == "R" {
            *snapshot.running_by_user.entry(user.to_string()).or_insert(0) += 1;
            *snapshot
                .running_by_queue
                .entry(queue.to_string())
                .or_insert(0) += 1;
            snapshot.totals.running += 1;
        }
    }

    snapshot
}

/// Parses the full text of a `pbsnodes -aSj` report. A repeated node name
/// overwrites the earlier entry; any state outside free/busy/offline/down
/// counts as down while the entry keeps the original string.
pub fn parse_node_report(report: &str) -> NodeSnapshot {
    let mut snapshot = NodeSnapshot::default();

    for line in data_lines(report) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < NODE_MIN_FIELDS {
            continue;
        }
        let name = fields[NODE_FIELD_NAME];
        let state = fields[NODE_FIELD_STATE];
        let jobs = fields[NODE_FIELD_JOBS].parse().unwrap_or(0);

        match state {
            "free" => snapshot.counts.free += 1,
            "busy" => snapshot.counts.busy += 1,
            "offline" => snapshot.counts.offline += 1,
            _ => snapshot.counts.down += 1,
        }

        let mem = fields[NODE_FIELD_MEM];
        let mem_parts: Vec<&str> = mem.split('/').collect();
        let (memory_available_gb, memory_total_gb) = if mem_parts.len() == 2 {
            (parse_memory_gb(mem_parts[0]), parse_memory_gb(mem_parts[1]))
        } else {
            (0.0, 0.0)
        };

        let (cpus_available, cpus_total) = parse_fraction(fields[NODE_FIELD_CPUS]);
        let (gpus_available, gpus_total) = parse_fraction(fields[NODE_FIELD_GPUS]);

        snapshot.nodes.insert(
            name.to_string(),
            NodeInfo {
                state: state.to_string(),
                jobs,
                cpus_available,
                cpus_total,
                gpus_available,
                gpus_total,
                memory_available_gb,
                memory_total_gb,
            },
        );
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB_REPORT: &str = "\
Job id            Name             User              Time Use S Queue
----------------- ---------------- ----------------- -------- - -----
123.pbs01         train_a          alice             01:02:03 R medium
124.pbs01         train_b          alice             00:10:00 R large

125.pbs01         eval_c           bob               00:00:00 Q medium
126.pbs01         hold_d           carol             00:00:00 H small
127.pbs01         odd_e            dave              00:00:00 X ghostqueue
short line
";

    const NODE_REPORT: &str = "\
                                                        mem       ncpus   nmics   ngpus
vnode           state           njobs   run   susp      f/t        f/t     f/t     f/t   jobs
--------------- --------------- ------ ----- ------ ------------ ------- ------- ------- -------
node01          free                 2     2      0  400gb/512gb 100/112     0/0     4/8 --
node02          busy                 8     8      0   10gb/512gb   0/112     0/0     0/8 --
node03          offline              0     0      0  512gb/512gb 112/112     0/0     8/8 --
node04          down                 0     0      0        --/--   --/--     0/0   --/-- --
node05          state-unknown        0     0      0        --/--     3/x     0/0     0/0 --
";

    fn known_queues() -> Vec<String> {
        ["interactive", "medium", "small"]
            .iter()
            .map(|q| q.to_string())
            .collect()
    }

    #[test]
    fn fraction_parses_both_sides() {
        assert_eq!(parse_fraction("112/112"), (112, 112));
        assert_eq!(parse_fraction("0/8"), (0, 8));
    }

    #[test]
    fn fraction_placeholder_and_malformed() {
        assert_eq!(parse_fraction("--"), (0, 0));
        assert_eq!(parse_fraction(""), (0, 0));
        assert_eq!(parse_fraction("3/x"), (3, 0));
        assert_eq!(parse_fraction("x/3"), (0, 3));
        assert_eq!(parse_fraction("1/2/3"), (0, 0));
        assert_eq!(parse_fraction("7"), (0, 0));
    }

    #[test]
    fn memory_unit_conversion() {
        assert_eq!(parse_memory_gb("2tb"), 2048.0);
        assert_eq!(parse_memory_gb("512gb"), 512.0);
        assert_eq!(parse_memory_gb("500mb"), 0.5);
        assert!((parse_memory_gb("1000kb") - 0.001).abs() < 1e-12);
        assert_eq!(parse_memory_gb("10"), 10.0);
        assert_eq!(parse_memory_gb("128GB"), 128.0);
    }

    #[test]
    fn memory_absent_or_malformed_is_zero() {
        assert_eq!(parse_memory_gb("--"), 0.0);
        assert_eq!(parse_memory_gb(""), 0.0);
        assert_eq!(parse_memory_gb("lots"), 0.0);
    }

    #[test]
    fn status_labels() {
        assert_eq!(status_label("R"), "Running");
        assert_eq!(status_label("r"), "Running");
        assert_eq!(status_label("B"), "ArrayJobRunning");
        assert_eq!(status_label("Z"), "Z");
    }

    #[test]
    fn job_report_aggregates() {
        let snap = parse_job_report(JOB_REPORT, &known_queues());

        assert_eq!(snap.running_by_user.get("alice"), Some(&2));
        assert_eq!(snap.running_by_user.get("bob"), None);
        assert_eq!(snap.running_by_queue.get("medium"), Some(&1));
        assert_eq!(snap.running_by_queue.get("large"), Some(&1));
        assert_eq!(snap.total_by_queue.get("medium"), Some(&2));
        assert_eq!(snap.total_by_queue.get("ghostqueue"), Some(&1));
        assert_eq!(snap.count_by_status.get("Running"), Some(&2));
        assert_eq!(snap.count_by_status.get("Queuing"), Some(&1));
        assert_eq!(snap.count_by_status.get("X"), Some(&1));

        assert_eq!(snap.totals.r, 2);
        assert_eq!(snap.totals.q, 1);
        assert_eq!(snap.totals.h, 1);
        assert_eq!(snap.totals.all, 5);
        assert_eq!(snap.totals.running, 2);
    }

    #[test]
    fn job_report_seeds_known_queues_at_zero() {
        let snap = parse_job_report(JOB_REPORT, &known_queues());
        assert_eq!(snap.running_by_queue.get("interactive"), Some(&0));
        assert_eq!(snap.total_by_queue.get("interactive"), Some(&0));
    }

    #[test]
    fn job_totals_by_code_sum_to_all_when_codes_known() {
        let snap = parse_job_report(JOB_REPORT, &[]);
        let t = snap.totals;
        let coded = t.r + t.h + t.f + t.q + t.e + t.b;
        // One line carries the unknown code X.
        assert_eq!(coded + 1, t.all);
        assert!(coded <= t.all);
    }

    #[test]
    fn job_report_skips_headers_even_if_they_look_like_data() {
        // Six whitespace-separated fields in the header must not be counted.
        let report = "one two three four R queue\nsix two three four R queue\n";
        let snap = parse_job_report(report, &[]);
        assert_eq!(snap.totals.all, 0);
    }

    #[test]
    fn node_report_parses_nodes() {
        let snap = parse_node_report(NODE_REPORT);
        assert_eq!(snap.nodes.len(), 5);

        let n1 = &snap.nodes["node01"];
        assert_eq!(n1.state, "free");
        assert_eq!(n1.jobs, 2);
        assert_eq!(n1.cpus_available, 100);
        assert_eq!(n1.cpus_total, 112);
        assert_eq!(n1.gpus_available, 4);
        assert_eq!(n1.gpus_total, 8);
        assert_eq!(n1.memory_available_gb, 400.0);
        assert_eq!(n1.memory_total_gb, 512.0);

        let n4 = &snap.nodes["node04"];
        assert_eq!(n4.cpus_total, 0);
        assert_eq!(n4.memory_total_gb, 0.0);

        let n5 = &snap.nodes["node05"];
        assert_eq!(n5.state, "state-unknown");
        assert_eq!(n5.cpus_available, 3);
        assert_eq!(n5.cpus_total, 0);
    }

    #[test]
    fn node_state_counts_treat_unknown_as_down() {
        let snap = parse_node_report(NODE_REPORT);
        assert_eq!(snap.counts.free, 1);
        assert_eq!(snap.counts.busy, 1);
        assert_eq!(snap.counts.offline, 1);
        assert_eq!(snap.counts.down, 2);
    }

    #[test]
    fn node_duplicate_line_last_write_wins() {
        let report = "\
header one
header two
node01 free 1 0 0 400gb/512gb 100/112 0/0 4/8 --
node01 busy 9 0 0 10gb/512gb 0/112 0/0 0/8 --
";
        let snap = parse_node_report(report);
        assert_eq!(snap.nodes.len(), 1);
        assert_eq!(snap.nodes["node01"].state, "busy");
        assert_eq!(snap.nodes["node01"].jobs, 9);
        // Both lines were counted toward state totals.
        assert_eq!(snap.counts.free, 1);
        assert_eq!(snap.counts.busy, 1);
    }

    #[test]
    fn parsing_is_idempotent() {
        let queues = known_queues();
        assert_eq!(
            parse_job_report(JOB_REPORT, &queues),
            parse_job_report(JOB_REPORT, &queues)
        );
        assert_eq!(parse_node_report(NODE_REPORT), parse_node_report(NODE_REPORT));
    }
}
