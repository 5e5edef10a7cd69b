//! Health reports generated on every health cycle.

use crate::probe::{ProbeKind, ProbeState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;
use std::time::Duration;

/// Per-probe slice of a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub probe_type: String,
    pub kind: ProbeKind,
    pub state: ProbeState,
    pub last_reading_at: Option<DateTime<Utc>>,
    /// Data stored by this probe since the log was last reset
    pub data_stored: u64,
}

/// Commit latency over the most recent cycles, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub mean_secs: f64,
    pub std_dev_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolReport {
    pub protocol_id: String,
    pub protocol_name: String,
    pub generated_at: DateTime<Utc>,
    pub probes: Vec<ProbeReport>,
    pub remote_running: Option<bool>,
    pub pending: usize,
    pub checked_out: usize,
    pub commit_latency: Option<LatencySummary>,
}

impl ProtocolReport {
    /// Human-readable multi-line rendering.
    pub fn render(&self) -> String {
        let mut lines = vec![format!(
            "Protocol {} ({}) at {}",
            self.protocol_name,
            self.protocol_id,
            self.generated_at.to_rfc3339()
        )];
        for probe in &self.probes {
            let last = probe
                .last_reading_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            lines.push(format!(
                "  {:<14} {:<9} stored={:<8} last={}",
                probe.probe_type, probe.state, probe.data_stored, last
            ));
        }
        let remote = match self.remote_running {
            Some(true) => "running",
            Some(false) => "not running",
            None => "none",
        };
        lines.push(format!(
            "  remote={remote} pending={} checked_out={}",
            self.pending, self.checked_out
        ));
        if let Some(latency) = &self.commit_latency {
            lines.push(format!(
                "  commit latency: mean {:.3}s, std dev {:.3}s over {} cycles",
                latency.mean_secs, latency.std_dev_secs, latency.samples
            ));
        }
        lines.join("\n")
    }
}

/// Rolling window of commit latencies.
#[derive(Debug, Clone)]
pub(crate) struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn record(&mut self, elapsed: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed.as_secs_f64());
    }

    pub(crate) fn summary(&self) -> Option<LatencySummary> {
        if self.samples.is_empty() {
            return None;
        }
        let std_dev = if self.samples.len() > 1 {
            self.samples.iter().std_dev()
        } else {
            0.0
        };
        Some(LatencySummary {
            samples: self.samples.len(),
            mean_secs: self.samples.iter().mean(),
            std_dev_secs: std_dev,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_window_summary() {
        let mut window = LatencyWindow::new(3);
        assert!(window.summary().is_none());

        window.record(Duration::from_millis(100));
        let single = window.summary().unwrap();
        assert_eq!(single.samples, 1);
        assert_eq!(single.std_dev_secs, 0.0);

        window.record(Duration::from_millis(200));
        window.record(Duration::from_millis(300));
        window.record(Duration::from_millis(400));

        let summary = window.summary().unwrap();
        assert_eq!(summary.samples, 3);
        assert!((summary.mean_secs - 0.3).abs() < 1e-9);
        assert!((summary.std_dev_secs - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_render_mentions_probes_and_remote() {
        let report = ProtocolReport {
            protocol_id: "p-1".into(),
            protocol_name: "study".into(),
            generated_at: Utc::now(),
            probes: vec![ProbeReport {
                probe_type: "compass".into(),
                kind: ProbeKind::Listen,
                state: ProbeState::Failed,
                last_reading_at: None,
                data_stored: 0,
            }],
            remote_running: Some(false),
            pending: 12,
            checked_out: 0,
            commit_latency: None,
        };
        let text = report.render();
        assert!(text.contains("compass"));
        assert!(text.contains("failed"));
        assert!(text.contains("remote=not running pending=12"));
    }
}
