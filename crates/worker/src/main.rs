mod demo;

use anyhow::Context;
use tracing::{info, warn};

use relayq_infra::{Backends, PipelineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    relayq_observability::init();

    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;
    let backends = select_backends(&config)?;

    let pipeline = demo::order_pipeline(config, backends);
    let producer = pipeline.producer();
    let handle = pipeline.spawn().context("failed to start pipeline")?;

    if seed_demo_requested() {
        demo::seed(&producer).context("failed to seed demo tasks")?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested; waiting for workers to finish their current step");

    let stats = tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .context("shutdown task panicked")?;

    info!(
        dequeued = stats.tasks_dequeued,
        completed = stats.tasks_completed,
        retries = stats.retries_scheduled,
        dead_lettered = stats.tasks_dead_lettered,
        interrupted = stats.tasks_interrupted,
        infra_failures = stats.infra_failures,
        "worker exited"
    );
    Ok(())
}

fn select_backends(config: &PipelineConfig) -> anyhow::Result<Backends> {
    match &config.redis_url {
        #[cfg(feature = "redis")]
        Some(url) => {
            let redis = relayq_infra::redis_conn::RedisConnector::open(url)?;
            redis.ping().context("redis is not reachable")?;
            info!(queue = %config.queue, "using redis backends");
            Ok(Backends::redis(config, redis))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            warn!("REDIS_URL is set but this build has no redis support; using in-memory backends");
            Ok(Backends::in_memory(config))
        }
        None => {
            warn!("REDIS_URL not set; using in-memory backends (nothing survives a restart)");
            Ok(Backends::in_memory(config))
        }
    }
}

fn seed_demo_requested() -> bool {
    std::env::var("RELAYQ_SEED_DEMO")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
