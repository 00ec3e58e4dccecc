use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use vetsched::config::ClinicConfig;
use vetsched::engine::Engine;
use vetsched::observability::{CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL};
use vetsched::{janitor, observability, tls, wire};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Process-level settings. Clinic rules live in `ClinicConfig`.
struct ServerSettings {
    addr: String,
    max_connections: usize,
    metrics_port: Option<u16>,
    tls_cert: Option<String>,
    tls_key: Option<String>,
}

impl ServerSettings {
    fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok();
        let bind = var("VETSCHED_BIND").unwrap_or_else(|| "0.0.0.0".into());
        let port = var("VETSCHED_PORT").unwrap_or_else(|| "5433".into());
        Self {
            addr: format!("{bind}:{port}"),
            max_connections: var("VETSCHED_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(256),
            metrics_port: var("VETSCHED_METRICS_PORT").and_then(|s| s.parse().ok()),
            tls_cert: var("VETSCHED_TLS_CERT"),
            tls_key: var("VETSCHED_TLS_KEY"),
        }
    }
}

/// Resolves on ctrl-c, or on SIGTERM where the platform has it.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("SIGTERM handler unavailable: {e}"),
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}

/// Wait until every connection permit is back or `timeout` passes.
async fn drain(permits: &Semaphore, total: usize, timeout: Duration) {
    let waited = tokio::time::timeout(timeout, async {
        while permits.available_permits() < total {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    match waited {
        Ok(()) => info!("all sessions closed"),
        Err(_) => warn!(
            open = total - permits.available_permits(),
            "drain timed out with sessions still open"
        ),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let settings = ServerSettings::from_env();
    observability::init(settings.metrics_port)?;
    let tls_acceptor =
        tls::load_tls_acceptor(settings.tls_cert.as_deref(), settings.tls_key.as_deref())?;

    let clinic = ClinicConfig::from_env()?;
    let engine = Arc::new(Engine::new(clinic));
    tokio::spawn(janitor::run_janitor(engine.clone(), janitor::SWEEP_INTERVAL));

    let listener = TcpListener::bind(&settings.addr).await?;
    info!(
        addr = %settings.addr,
        hours = %format!(
            "{}-{}",
            clinic.opens_at.format("%H:%M"),
            clinic.closes_at.format("%H:%M")
        ),
        last_start = %clinic.last_start().format("%H:%M"),
        last_date = %clinic.last_date,
        capacity = clinic.daily_capacity,
        max_connections = settings.max_connections,
        tls = tls_acceptor.is_some(),
        metrics_port = ?settings.metrics_port,
        "vetsched listening"
    );

    let permits = Arc::new(Semaphore::new(settings.max_connections));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!("accept failed: {e}");
                    continue;
                }
            },
            _ = &mut shutdown => break,
        };

        let Ok(permit) = permits.clone().try_acquire_owned() else {
            warn!(%peer, "at max_connections, refusing");
            metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
            continue;
        };

        info!(%peer, "client connected");
        metrics::counter!(CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        let engine = engine.clone();
        let tls = tls_acceptor.clone();
        tokio::spawn(async move {
            if let Err(e) = wire::process_connection(socket, engine, tls).await {
                error!(%peer, "session ended with error: {e}");
            }
            metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
            drop(permit);
        });
    }

    info!("shutdown requested, draining sessions");
    drain(&permits, settings.max_connections, DRAIN_TIMEOUT).await;
    info!("vetsched stopped");
    Ok(())
}
