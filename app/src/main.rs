//! Seatguard load-test binary.
//!
//! Configuration comes from the environment (see [`seatguard::Config`]).

use anyhow::Context;
use seatguard::config::Config;
use seatguard::{load_test, wiring};
use seatguard_runtime::metrics::MetricsServer;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seatguard=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        backend = ?config.backend,
        strategies = ?config.strategies,
        stock = config.load.stock,
        requests = config.load.requests,
        buffered = config.dispatch.enabled,
        "Configuration loaded"
    );

    let mut metrics = config.metrics_addr.map(MetricsServer::new);
    if let Some(server) = metrics.as_mut() {
        server.start().context("Failed to install metrics recorder")?;
    }

    let backends = wiring::connect_backends(&config).await?;

    let (interrupt_tx, interrupt) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting pending lease waits");
            let _ = interrupt_tx.send(true);
        }
    });

    let mut reports = Vec::new();
    for &strategy in &config.strategies {
        let service = match wiring::service(strategy, &config, &backends, &interrupt) {
            Ok(service) => service,
            Err(e) => {
                warn!(strategy = %strategy, error = %e, "Skipping strategy");
                continue;
            }
        };

        let report = if config.dispatch.enabled {
            if !service.controller().prevents_oversell() {
                warn!(strategy = %strategy, "Workers require a strict or optimistic strategy, skipping");
                continue;
            }
            let buffer = wiring::ingestion_buffer(&config).await?;
            load_test::run_buffered(
                buffer,
                &service,
                strategy,
                &config.load,
                Duration::from_secs(config.dispatch.drain_timeout_secs),
            )
            .await?
        } else {
            load_test::run_inline(&service, strategy, &config.load).await?
        };

        println!("{report}");
        reports.push(report);
    }

    if let Some(text) = metrics.as_ref().and_then(MetricsServer::render) {
        println!("{text}");
    }

    for report in &reports {
        if report.oversold() > 0 || !report.consistent() {
            if expected_to_oversell(report.strategy) {
                info!(strategy = %report.strategy, oversold = report.oversold(), "Baseline oversold as expected");
            } else {
                error!(strategy = %report.strategy, oversold = report.oversold(), "Strategy failed to protect the counter");
            }
        }
    }

    Ok(())
}

const fn expected_to_oversell(strategy: seatguard::Strategy) -> bool {
    matches!(strategy, seatguard::Strategy::Unsynchronized)
}
