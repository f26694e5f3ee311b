use pulsemon_collector::catalog::POLL_COUNT;
use pulsemon_common::types::Metric;
use std::collections::HashMap;

/// Most recent sample set of the agent.
///
/// Every poll replaces the table wholesale. The `PollCount` counter lives
/// beside the table: it grows by one per poll and is moved out whole into
/// each report. A report that cannot be delivered hands its count back with
/// [`Snapshot::requeue`], so every poll is either pending here or carried by
/// exactly one delivery.
#[derive(Debug, Default)]
pub struct Snapshot {
    metrics: HashMap<String, Metric>,
    poll_count: i64,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a fresh sample set and counts the poll.
    pub fn replace(&mut self, metrics: Vec<Metric>) {
        self.metrics = metrics.into_iter().map(|m| (m.id.clone(), m)).collect();
        self.poll_count += 1;
    }

    /// Copies the samples for delivery, sorted by id, and appends
    /// `PollCount` carrying the pending polls, which resets to zero here.
    /// Empty until the first poll.
    pub fn take_report(&mut self) -> Vec<Metric> {
        if self.metrics.is_empty() {
            return Vec::new();
        }
        let mut metrics: Vec<Metric> = self.metrics.values().cloned().collect();
        metrics.sort_by(|a, b| a.id.cmp(&b.id));
        metrics.push(Metric::counter(POLL_COUNT, std::mem::take(&mut self.poll_count)));
        metrics
    }

    /// Returns the polls of a report that never reached the server.
    pub fn requeue(&mut self, undelivered: i64) {
        self.poll_count += undelivered;
    }

    /// Polls not yet handed to a delivery.
    pub fn poll_count(&self) -> i64 {
        self.poll_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsemon_common::types::MetricValue;

    #[test]
    fn replace_discards_previous_metrics() {
        let mut snapshot = Snapshot::new();
        snapshot.replace(vec![Metric::gauge("a", 1.0), Metric::gauge("b", 2.0)]);
        snapshot.replace(vec![Metric::gauge("a", 3.0)]);

        let report = snapshot.take_report();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0], Metric::gauge("a", 3.0));
        assert_eq!(report[1], Metric::counter(POLL_COUNT, 2));
    }

    fn carried(report: &[Metric]) -> i64 {
        match report.last().map(|m| m.value) {
            Some(MetricValue::Counter(d)) => d,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn report_moves_poll_count_out() {
        let mut snapshot = Snapshot::new();
        snapshot.replace(vec![Metric::gauge("a", 1.0)]);
        snapshot.replace(vec![Metric::gauge("a", 1.0)]);
        assert_eq!(carried(&snapshot.take_report()), 2);
        assert_eq!(snapshot.poll_count(), 0);
    }

    #[test]
    fn overlapping_reports_never_share_polls() {
        let mut snapshot = Snapshot::new();
        snapshot.replace(vec![Metric::gauge("a", 1.0)]);
        let first = carried(&snapshot.take_report());
        snapshot.replace(vec![Metric::gauge("a", 2.0)]);
        snapshot.replace(vec![Metric::gauge("a", 3.0)]);
        let second = carried(&snapshot.take_report());
        assert_eq!((first, second), (1, 2));
    }

    #[test]
    fn requeued_polls_ride_the_next_report() {
        let mut snapshot = Snapshot::new();
        snapshot.replace(vec![Metric::gauge("a", 1.0)]);
        let failed = carried(&snapshot.take_report());
        snapshot.replace(vec![Metric::gauge("a", 2.0)]);
        snapshot.requeue(failed);
        assert_eq!(carried(&snapshot.take_report()), 2);
    }

    #[test]
    fn report_is_empty_before_first_poll() {
        let mut snapshot = Snapshot::new();
        assert!(snapshot.take_report().is_empty());
        assert_eq!(snapshot.poll_count(), 0);
    }
}
