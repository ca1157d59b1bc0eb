use devup::{NodeState, StatusEntry, UpSummary};

/// Abstraction over user-facing output.
///
/// Command modules use this trait instead of `println!`/`eprintln!` so that
/// rendering stays testable and machine-readable output goes to stdout alone.
pub trait UserOutput: Send + Sync {
    /// Informational status message (e.g., "Stopping all containers...")
    fn status(&self, message: &str);

    /// Success message (e.g., "All requested services are healthy")
    fn success(&self, message: &str);

    /// Warning message (e.g., "migration 002_add_index.sql failed")
    fn warning(&self, message: &str);

    /// Error message (e.g., "auth-service is unhealthy")
    fn error(&self, message: &str);

    /// A blank line separator.
    fn blank(&self);
}

/// Standard CLI output: writes to stdout/stderr with ANSI colors.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("\x1b[32m{}\x1b[0m", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("\x1b[33m{}\x1b[0m", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }

    fn blank(&self) {
        println!();
    }
}

fn state_icon(state: NodeState) -> &'static str {
    match state {
        NodeState::Healthy => "+",
        NodeState::Unmanaged => "-",
        NodeState::Skipped => "o",
        NodeState::Unhealthy | NodeState::Failed => "x",
        _ => ".",
    }
}

/// One line per node, dependencies first, with where it can be reached.
pub fn render_up_summary(summary: &UpSummary, out: &dyn UserOutput) {
    out.status("Stack:");
    out.status(&format!("{:-<60}", ""));
    for (node, record) in &summary.report.nodes {
        let endpoint = summary
            .identities
            .get(node)
            .map(|i| format!("localhost:{}", i.port))
            .unwrap_or_default();
        let line = format!(
            "  {} {:<32} {:<16} {}",
            state_icon(record.state),
            node,
            record.state,
            endpoint
        );
        match record.state {
            NodeState::Unhealthy | NodeState::Failed => out.error(&line),
            _ => out.status(&line),
        }
        if let Some(detail) = &record.detail {
            out.status(&format!("      {}", detail));
        }
        for warning in &record.warnings {
            out.warning(&format!("      warning: {}", warning));
        }
    }
}

pub fn status_lines(entries: &[StatusEntry]) -> Vec<String> {
    if entries.is_empty() {
        return vec!["  No containers in this stack".to_string()];
    }
    entries
        .iter()
        .map(|e| {
            let health = e.health.as_deref().unwrap_or("-");
            let port = e.port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
            format!(
                "  {:<28} {:<15} {:<10} {:<10} {}",
                e.node, e.kind, e.status, health, port
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lines_show_missing_values_as_dashes() {
        let lines = status_lines(&[StatusEntry {
            node: "postgres".to_string(),
            kind: "infrastructure",
            container: "shop-postgres".to_string(),
            status: "exited".to_string(),
            health: None,
            port: None,
        }]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("postgres"));
        assert!(lines[0].contains("exited"));
        assert!(lines[0].trim_end().ends_with('-'));
    }

    #[test]
    fn empty_status_says_so() {
        assert_eq!(status_lines(&[]), vec!["  No containers in this stack"]);
    }

    #[derive(Default)]
    struct Recorded(parking_lot::Mutex<Vec<(&'static str, String)>>);

    impl UserOutput for Recorded {
        fn status(&self, message: &str) {
            self.0.lock().push(("status", message.to_string()));
        }
        fn success(&self, message: &str) {
            self.0.lock().push(("success", message.to_string()));
        }
        fn warning(&self, message: &str) {
            self.0.lock().push(("warning", message.to_string()));
        }
        fn error(&self, message: &str) {
            self.0.lock().push(("error", message.to_string()));
        }
        fn blank(&self) {}
    }

    #[test]
    fn up_summary_routes_failures_and_warnings() {
        use devup::orchestrator::{NodeRecord, UpReport};
        use devup::resolve::Identity;
        use std::collections::{BTreeMap, BTreeSet};

        let record = |state, detail: Option<&str>, warnings: &[&str]| NodeRecord {
            state,
            detail: detail.map(str::to_string),
            root_cause: None,
            warnings: warnings.iter().map(|w| w.to_string()).collect(),
        };
        let summary = UpSummary {
            report: UpReport {
                nodes: BTreeMap::from([
                    ("auth-service".to_string(), record(NodeState::Unhealthy, Some("timed out"), &[])),
                    ("postgres/orders_db".to_string(), record(NodeState::Healthy, None, &["seed failed"])),
                ]),
                cancelled: false,
            },
            requested: BTreeSet::new(),
            identities: BTreeMap::from([(
                "auth-service".to_string(),
                Identity {
                    container_name: "shop-auth-service".to_string(),
                    host: "shop-auth-service".to_string(),
                    port: 36001,
                },
            )]),
        };

        let out = Recorded::default();
        render_up_summary(&summary, &out);
        let lines = out.0.lock().clone();

        let failed = lines.iter().find(|(kind, _)| *kind == "error").unwrap();
        assert!(failed.1.contains("auth-service") && failed.1.contains("localhost:36001"));
        assert!(lines.iter().any(|(kind, l)| *kind == "status" && l.contains("timed out")));
        assert!(lines
            .iter()
            .any(|(kind, l)| *kind == "warning" && l.contains("seed failed")));
    }
}
