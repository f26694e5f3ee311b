use crate::catalog::RANDOM_VALUE;
use crate::Collector;
use anyhow::Result;
use pulsemon_common::types::Metric;
use rand::Rng;

/// Emits [`RANDOM_VALUE`], a fresh uniform sample on every poll.
#[derive(Debug, Default)]
pub struct RandomCollector;

impl Collector for RandomCollector {
    fn name(&self) -> &str {
        "random"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        let value: f64 = rand::thread_rng().gen();
        Ok(vec![Metric::gauge(RANDOM_VALUE, value)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsemon_common::types::MetricValue;

    #[test]
    fn value_is_in_unit_interval() {
        let metrics = RandomCollector.collect().unwrap();
        assert_eq!(metrics.len(), 1);
        assert!(matches!(metrics[0].value, MetricValue::Gauge(v) if (0.0..1.0).contains(&v)));
    }
}
