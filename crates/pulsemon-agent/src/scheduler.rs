//! Dual-cadence sampling and delivery.
//!
//! The poll task refreshes the [`Snapshot`] on one interval, the report task
//! turns the snapshot into delivery jobs on another, and a fixed pool of
//! workers drains those jobs through a bounded channel. When every worker is
//! busy the report task waits, so at most `rate_limit` deliveries are in
//! flight plus `rate_limit` queued.

use crate::config::{AgentConfig, ReportMode};
use crate::snapshot::Snapshot;
use crate::transport::{Transport, TransportError};
use anyhow::{bail, Context, Result};
use pulsemon_collector::catalog::POLL_COUNT;
use pulsemon_collector::Collector;
use pulsemon_common::types::{Metric, MetricValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct ScheduleSettings {
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub rate_limit: usize,
    pub mode: ReportMode,
}

impl From<&AgentConfig> for ScheduleSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            report_interval: Duration::from_secs(config.report_interval_secs),
            rate_limit: config.rate_limit.max(1),
            mode: config.report_mode,
        }
    }
}

#[derive(Debug)]
enum Delivery {
    Json(Metric),
    Unary(Metric),
    Batch(Vec<Metric>),
}

/// One unit of work for a delivery worker.
#[derive(Debug)]
struct Job {
    delivery: Delivery,
    /// `PollCount` delta carried by this job, requeued if delivery fails.
    poll_count: Option<i64>,
}

fn poll_count_of(metrics: &[Metric]) -> Option<i64> {
    metrics.iter().find_map(|m| match m.value {
        MetricValue::Counter(delta) if m.id == POLL_COUNT => Some(delta),
        _ => None,
    })
}

fn plan_jobs(report: Vec<Metric>, mode: ReportMode) -> Vec<Job> {
    match mode {
        ReportMode::Batch => vec![Job {
            poll_count: poll_count_of(&report),
            delivery: Delivery::Batch(report),
        }],
        ReportMode::PerMetric | ReportMode::Unary => report
            .into_iter()
            .map(|metric| Job {
                poll_count: poll_count_of(std::slice::from_ref(&metric)),
                delivery: if mode == ReportMode::Unary {
                    Delivery::Unary(metric)
                } else {
                    Delivery::Json(metric)
                },
            })
            .collect(),
    }
}

/// Samples every collector and installs the result as the new snapshot.
///
/// # Errors
///
/// Fails when a collector fails or nothing was sampled. The previous
/// snapshot is left untouched in that case.
pub async fn poll_once(
    collectors: &mut [Box<dyn Collector>],
    snapshot: &Mutex<Snapshot>,
) -> Result<usize> {
    let mut metrics = Vec::new();
    for collector in collectors.iter_mut() {
        let sampled = collector
            .collect()
            .with_context(|| format!("collector {} failed", collector.name()))?;
        metrics.extend(sampled);
    }
    if metrics.is_empty() {
        bail!("no metrics sampled");
    }
    let count = metrics.len();
    snapshot.lock().await.replace(metrics);
    Ok(count)
}

pub struct Scheduler {
    settings: ScheduleSettings,
    collectors: Vec<Box<dyn Collector>>,
    snapshot: Arc<Mutex<Snapshot>>,
    transport: Arc<Transport>,
}

impl Scheduler {
    pub fn new(
        settings: ScheduleSettings,
        collectors: Vec<Box<dyn Collector>>,
        transport: Transport,
    ) -> Self {
        Self {
            settings,
            collectors,
            snapshot: Arc::new(Mutex::new(Snapshot::new())),
            transport: Arc::new(transport),
        }
    }

    pub fn snapshot(&self) -> Arc<Mutex<Snapshot>> {
        self.snapshot.clone()
    }

    /// Runs until `shutdown` is cancelled, then lets queued jobs finish.
    pub async fn run(self, shutdown: CancellationToken) {
        let Scheduler {
            settings,
            collectors,
            snapshot,
            transport,
        } = self;

        tracing::info!(
            poll_ms = settings.poll_interval.as_millis() as u64,
            report_ms = settings.report_interval.as_millis() as u64,
            workers = settings.rate_limit,
            mode = ?settings.mode,
            "Scheduler started"
        );

        let (tx, rx) = mpsc::channel::<Job>(settings.rate_limit);
        let rx = Arc::new(Mutex::new(rx));
        let workers: Vec<_> = (0..settings.rate_limit)
            .map(|id| tokio::spawn(worker(id, rx.clone(), transport.clone(), snapshot.clone())))
            .collect();

        let poller = tokio::spawn(poll_loop(
            collectors,
            snapshot.clone(),
            settings.poll_interval,
            shutdown.clone(),
        ));
        let reporter = tokio::spawn(report_loop(
            snapshot,
            tx,
            settings.report_interval,
            settings.mode,
            shutdown,
        ));

        for handle in [poller, reporter] {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler task panicked");
            }
        }
        // The reporter owned the only sender; workers exit once the queue drains.
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Delivery worker panicked");
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

async fn poll_loop(
    mut collectors: Vec<Box<dyn Collector>>,
    snapshot: Arc<Mutex<Snapshot>>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                match poll_once(&mut collectors, &snapshot).await {
                    Ok(count) => tracing::debug!(count, "Snapshot refreshed"),
                    Err(e) => {
                        tracing::warn!(error = %e, "Sampling failed, keeping previous snapshot")
                    }
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

async fn report_loop(
    snapshot: Arc<Mutex<Snapshot>>,
    tx: mpsc::Sender<Job>,
    period: Duration,
    mode: ReportMode,
    shutdown: CancellationToken,
) {
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.cancelled() => return,
        }

        let report = snapshot.lock().await.take_report();
        if report.is_empty() {
            tracing::debug!("Nothing sampled yet, skipping report");
            continue;
        }
        tracing::debug!(count = report.len(), "Dispatching report");

        let mut jobs = plan_jobs(report, mode).into_iter();
        while let Some(job) = jobs.next() {
            let carried = job.poll_count;
            let sent = tokio::select! {
                sent = tx.send(job) => sent.is_ok(),
                _ = shutdown.cancelled() => false,
            };
            if !sent {
                // Polls carried by jobs that never reached the queue stay pending.
                let unsent: i64 = carried
                    .into_iter()
                    .chain(jobs.by_ref().filter_map(|job| job.poll_count))
                    .sum();
                if unsent > 0 {
                    snapshot.lock().await.requeue(unsent);
                }
                return;
            }
        }
    }
}

async fn worker(
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    transport: Arc<Transport>,
    snapshot: Arc<Mutex<Snapshot>>,
) {
    loop {
        let Some(job) = jobs.lock().await.recv().await else {
            break;
        };
        if let Err(e) = deliver(&transport, &job.delivery).await {
            tracing::error!(worker = id, error = %e, "Delivery failed");
            if let Some(undelivered) = job.poll_count {
                snapshot.lock().await.requeue(undelivered);
            }
        }
    }
}

async fn deliver(transport: &Transport, delivery: &Delivery) -> Result<(), TransportError> {
    match delivery {
        Delivery::Json(metric) => transport.send_metric(metric).await,
        Delivery::Unary(metric) => transport.send_unary(metric).await,
        Delivery::Batch(metrics) => transport.send_batch(metrics).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_collector, spawn_slow_collector};
    use pulsemon_collector::alloc::TrackingAllocator;
    use pulsemon_collector::catalog::BASELINE_LEN;
    use pulsemon_collector::random::RandomCollector;
    use pulsemon_collector::runtime::RuntimeCollector;
    use pulsemon_common::codec::{decode_batch, decode_metric};
    use pulsemon_common::retry::RetryPolicy;

    static TRACKER: TrackingAllocator = TrackingAllocator::new();

    struct Fixed(Vec<Metric>);

    impl Collector for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn collect(&mut self) -> Result<Vec<Metric>> {
            Ok(self.0.clone())
        }
    }

    /// Counts how many times it has been sampled.
    struct Counting(Arc<std::sync::atomic::AtomicI64>);

    impl Collector for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn collect(&mut self) -> Result<Vec<Metric>> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(vec![Metric::gauge("Alloc", 42.0)])
        }
    }

    struct Broken;

    impl Collector for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn collect(&mut self) -> Result<Vec<Metric>> {
            bail!("sensor unavailable")
        }
    }

    fn settings(mode: ReportMode) -> ScheduleSettings {
        ScheduleSettings {
            poll_interval: Duration::from_millis(20),
            report_interval: Duration::from_millis(60),
            rate_limit: 2,
            mode,
        }
    }

    #[tokio::test]
    async fn one_poll_fills_the_baseline_catalog() {
        let mut collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(RuntimeCollector::new(&TRACKER)),
            Box::new(RandomCollector),
        ];
        let snapshot = Mutex::new(Snapshot::new());

        poll_once(&mut collectors, &snapshot).await.unwrap();

        let report = snapshot.lock().await.take_report();
        assert_eq!(report.len(), BASELINE_LEN);
        for metric in &report {
            if metric.id == POLL_COUNT {
                assert_eq!(metric.value, MetricValue::Counter(1));
            } else {
                assert!(matches!(metric.value, MetricValue::Gauge(_)), "{}", metric.id);
            }
        }
    }

    #[tokio::test]
    async fn failed_poll_keeps_stale_snapshot() {
        let snapshot = Mutex::new(Snapshot::new());
        let mut good: Vec<Box<dyn Collector>> =
            vec![Box::new(Fixed(vec![Metric::gauge("a", 1.0)]))];
        poll_once(&mut good, &snapshot).await.unwrap();

        let mut bad: Vec<Box<dyn Collector>> = vec![
            Box::new(Fixed(vec![Metric::gauge("a", 2.0)])),
            Box::new(Broken),
        ];
        assert!(poll_once(&mut bad, &snapshot).await.is_err());

        let mut snapshot = snapshot.lock().await;
        assert_eq!(snapshot.poll_count(), 1);
        assert_eq!(snapshot.take_report()[0], Metric::gauge("a", 1.0));
    }

    #[test]
    fn per_metric_plan_tags_only_poll_count() {
        let report = vec![Metric::gauge("a", 1.0), Metric::counter(POLL_COUNT, 3)];
        let jobs = plan_jobs(report, ReportMode::PerMetric);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].poll_count, None);
        assert_eq!(jobs[1].poll_count, Some(3));
    }

    #[tokio::test]
    async fn batch_mode_delivers_and_resets_poll_count() {
        let server = spawn_collector(0).await;
        let transport = Transport::new(&server.base_url, None, RetryPolicy::none()).unwrap();
        let polls = Arc::new(std::sync::atomic::AtomicI64::new(0));
        let collectors: Vec<Box<dyn Collector>> = vec![Box::new(Counting(polls.clone()))];
        let scheduler = Scheduler::new(settings(ReportMode::Batch), collectors, transport);
        let snapshot = scheduler.snapshot();
        let shutdown = CancellationToken::new();
        let run = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        run.await.unwrap();

        let hits = server.hits();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.path == "/updates/"));
        let mut delivered = 0;
        for hit in &hits {
            let batch = decode_batch(&hit.body).unwrap();
            assert_eq!(batch[0], Metric::gauge("Alloc", 42.0));
            delivered += poll_count_of(&batch).unwrap();
        }
        // Every poll is either delivered or still pending.
        let remaining = snapshot.lock().await.poll_count();
        assert_eq!(delivered + remaining, polls.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn per_metric_mode_posts_objects() {
        let server = spawn_collector(0).await;
        let transport = Transport::new(&server.base_url, None, RetryPolicy::none()).unwrap();
        let collectors: Vec<Box<dyn Collector>> =
            vec![Box::new(Fixed(vec![Metric::gauge("Alloc", 1.0)]))];
        let scheduler = Scheduler::new(settings(ReportMode::PerMetric), collectors, transport);
        let shutdown = CancellationToken::new();
        let run = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        run.await.unwrap();

        let hits = server.hits();
        assert!(hits.len() >= 2);
        assert!(hits.iter().all(|h| h.path == "/update/"));
        let ids: Vec<String> = hits
            .iter()
            .map(|h| decode_metric(&h.body).unwrap().id)
            .collect();
        assert!(ids.contains(&"Alloc".to_string()));
        assert!(ids.contains(&POLL_COUNT.to_string()));
    }

    #[tokio::test]
    async fn delivery_failures_do_not_stop_the_scheduler() {
        let server = spawn_collector(usize::MAX).await;
        let transport = Transport::new(&server.base_url, None, RetryPolicy::none()).unwrap();
        let polls = Arc::new(std::sync::atomic::AtomicI64::new(0));
        let collectors: Vec<Box<dyn Collector>> = vec![Box::new(Counting(polls.clone()))];
        let scheduler = Scheduler::new(settings(ReportMode::Batch), collectors, transport);
        let snapshot = scheduler.snapshot();
        let shutdown = CancellationToken::new();
        let run = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        run.await.unwrap();

        assert!(server.hits().len() >= 2);
        // Failed reports hand their polls back, so every poll is still counted.
        assert_eq!(
            snapshot.lock().await.poll_count(),
            polls.load(std::sync::atomic::Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn slow_deliveries_never_count_a_poll_twice() {
        let server = spawn_slow_collector(Duration::from_millis(150)).await;
        let transport = Transport::new(&server.base_url, None, RetryPolicy::none()).unwrap();
        let polls = Arc::new(std::sync::atomic::AtomicI64::new(0));
        let collectors: Vec<Box<dyn Collector>> = vec![Box::new(Counting(polls.clone()))];
        let scheduler = Scheduler::new(settings(ReportMode::Batch), collectors, transport);
        let snapshot = scheduler.snapshot();
        let shutdown = CancellationToken::new();
        let run = tokio::spawn(scheduler.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(400)).await;
        shutdown.cancel();
        run.await.unwrap();

        let hits = server.hits();
        assert!(hits.len() >= 2, "reports should overlap in flight");
        let delivered: i64 = hits
            .iter()
            .map(|hit| poll_count_of(&decode_batch(&hit.body).unwrap()).unwrap())
            .sum();
        let polls = polls.load(std::sync::atomic::Ordering::SeqCst);
        assert!(delivered <= polls, "server saw {delivered} polls out of {polls}");
        assert_eq!(delivered + snapshot.lock().await.poll_count(), polls);
    }
}
