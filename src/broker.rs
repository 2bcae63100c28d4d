//! Top-level wiring: spawn children, bind transports, run until cancelled
//! (spec §2 "Data flow").

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::{assign_names, ChildSpec};
use crate::registry::Registry;
use crate::transport::{http, sse, tcp};

/// Grace period given to every child during shutdown teardown (spec §4.1
/// "Teardown").
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct BrokerOptions {
    pub specs: Vec<ChildSpec>,
    pub handshake_timeout: Duration,
    pub http_addr: String,
    pub tcp_addr: Option<String>,
    pub sse_addr: Option<String>,
}

/// Process exit codes (spec §6.2): 0 clean shutdown, 1 bind failure, 2
/// invalid config, 3 all children failed to start.
pub enum ExitCode {
    Clean = 0,
    BindFailure = 1,
    InvalidConfig = 2,
    AllChildrenFailed = 3,
}

/// Spawn all children, bind the configured transports, and run until
/// `cancel` fires (Ctrl-C in the CLI binary).
pub async fn run(options: BrokerOptions, cancel: CancellationToken) -> std::result::Result<(), ExitCode> {
    let named = assign_names(&options.specs, options.handshake_timeout).map_err(|e| {
        tracing::error!(error = %e, "invalid broker configuration");
        ExitCode::InvalidConfig
    })?;

    let registry = Arc::new(Registry::from_specs(named, cancel.child_token()).await);

    if !options.specs.is_empty() && registry.all_failed().await {
        tracing::error!("all children failed to start");
        return Err(ExitCode::AllChildrenFailed);
    }

    registry.start_restart_supervisors(cancel.child_token()).await;

    let http_router = http::router(registry.clone());

    let http_listener = TcpListener::bind(&options.http_addr).await.map_err(|e| {
        tracing::error!(addr = %options.http_addr, error = %e, "failed to bind HTTP listener");
        ExitCode::BindFailure
    })?;
    tracing::info!(addr = %options.http_addr, "HTTP dispatcher listening");

    let tcp_task = if let Some(tcp_addr) = options.tcp_addr {
        let listener = TcpListener::bind(&tcp_addr).await.map_err(|e| {
            tracing::error!(addr = %tcp_addr, error = %e, "failed to bind TCP listener");
            ExitCode::BindFailure
        })?;
        tracing::info!(addr = %tcp_addr, "TCP dispatcher listening");
        let registry = registry.clone();
        let cancel = cancel.child_token();
        Some(tokio::spawn(tcp::serve(listener, registry, cancel)))
    } else {
        None
    };

    // SSE gets its own listener and port, independent of HTTP (spec §2.3
    // "independently overridable with TCP_PORT/SSE_PORT"), rather than being
    // merged onto the HTTP router.
    let sse_task = if let Some(sse_addr) = options.sse_addr {
        let listener = TcpListener::bind(&sse_addr).await.map_err(|e| {
            tracing::error!(addr = %sse_addr, error = %e, "failed to bind SSE listener");
            ExitCode::BindFailure
        })?;
        tracing::info!(addr = %sse_addr, "SSE dispatcher listening");
        let sse_router = sse::router(registry.clone());
        let shutdown_signal = cancel.child_token();
        Some(tokio::spawn(async move {
            let result = axum::serve(listener, sse_router)
                .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "SSE dispatcher exited with error");
            }
        }))
    } else {
        None
    };

    let shutdown_signal = cancel.clone();
    let http_result = axum::serve(http_listener, http_router)
        .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
        .await;

    if let Err(e) = http_result {
        tracing::error!(error = %e, "HTTP dispatcher exited with error");
    }

    cancel.cancel();
    if let Some(task) = tcp_task {
        let _ = task.await;
    }
    if let Some(task) = sse_task {
        let _ = task.await;
    }

    registry.teardown_all(SHUTDOWN_GRACE).await;
    tracing::info!("broker shutdown complete");
    Ok(())
}

