use anyhow::Result;
use pulsemon_agent::config::AgentConfig;
use pulsemon_agent::scheduler::{ScheduleSettings, Scheduler};
use pulsemon_agent::transport::Transport;
use pulsemon_collector::alloc::TrackingAllocator;
use pulsemon_collector::host::HostCollector;
use pulsemon_collector::random::RandomCollector;
use pulsemon_collector::runtime::RuntimeCollector;
use pulsemon_collector::Collector;
use pulsemon_common::retry::RetryPolicy;
use pulsemon_common::signing::Signer;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static ALLOCATOR: TrackingAllocator = TrackingAllocator::new();

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulsemon=info".parse()?))
        .init();

    let config_path = std::env::args().nth(1);
    let mut config = AgentConfig::resolve(config_path.as_deref(), "config/agent.toml")?;
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;

    tracing::info!(
        server = %config.base_url(),
        mode = ?config.report_mode,
        signed = config.hash_key.is_some(),
        "pulsemon-agent starting"
    );

    let transport = Transport::new(
        &config.base_url(),
        Signer::from_key(config.hash_key.as_deref()),
        RetryPolicy::from_millis(&config.retry_delays_ms),
    )?;

    let mut collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(RuntimeCollector::new(&ALLOCATOR)),
        Box::new(RandomCollector),
    ];
    if config.host_metrics {
        collectors.push(Box::new(HostCollector::new()));
    }

    let scheduler = Scheduler::new(ScheduleSettings::from(&config), collectors, transport);
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(scheduler.run(shutdown.clone()));

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");
    shutdown.cancel();
    run.await?;

    Ok(())
}
