//! Relays droplet and build-artifact uploads to the controller.
//!
//! Callers stream a file to one of the upload endpoints along with the
//! controller URL it should go to. The relay forwards it as a multipart
//! upload, follows the controller's asynchronous job if one is returned, and
//! answers the caller once the controller has the file.

mod cancel;
pub mod config;
pub mod coordinator;
pub mod drain;
pub mod errors;
pub mod metrics_defs;
pub mod poller;
pub mod service;
pub mod shutdown;
pub mod tls;
pub mod transport;
pub mod upload;

#[cfg(test)]
mod testutils;

use shared::admin_service::AdminService;
use shared::http::{run_http_service, run_https_service};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::coordinator::Coordinator;
use crate::drain::DrainTracker;
use crate::errors::{RelayError, Result};
use crate::poller::Poller;
use crate::service::RelayService;
use crate::shutdown::ShutdownOrchestrator;
use crate::transport::{TransportSelector, Transports};
use crate::upload::Uploader;

/// Runs the relay until `signal` resolves and in-flight uploads have drained
/// (or the drain timeout passed). Fails if a listener cannot be started or
/// stops unexpectedly.
pub async fn run<F>(config: config::Config, signal: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    config.validate()?;
    let transports = Transports::from_config(&config.controller)?;
    serve(config, transports, signal).await
}

async fn serve<F>(config: config::Config, transports: Transports, signal: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let uploader = Uploader::new(
        TransportSelector::new(transports.plain, transports.mutual_tls),
        config.upload_retry_delay(),
    );
    let poller = Poller::new(transports.polling, config.job_polling_interval());
    let drain = DrainTracker::new();
    let coordinator = Arc::new(Coordinator::new(uploader, poller, drain.clone()));

    let stop_accepting = CancellationToken::new();
    let mut listeners = JoinSet::new();

    if let Some(listener) = &config.listener {
        let service = RelayService::new(coordinator.clone());
        let host = listener.host.clone();
        let port = listener.port;
        let stop = stop_accepting.clone();
        listeners.spawn(async move { run_http_service(&host, port, service, stop).await });
    }

    if let Some(mutual_tls) = &config.mutual_tls {
        let acceptor = tls::server_acceptor(mutual_tls)?;
        let service = RelayService::new(coordinator.clone());
        let host = mutual_tls.listener.host.clone();
        let port = mutual_tls.listener.port;
        let stop = stop_accepting.clone();
        listeners.spawn(async move { run_https_service(&host, port, service, acceptor, stop).await });
    }

    if let Some(admin) = &config.admin_listener {
        let ready_token = stop_accepting.clone();
        let service = AdminService::new(move || !ready_token.is_cancelled());
        let host = admin.host.clone();
        let port = admin.port;
        let stop = stop_accepting.clone();
        listeners.spawn(async move { run_http_service(&host, port, service, stop).await });
    }

    tracing::info!("uploader relay ready");

    let orchestrator = ShutdownOrchestrator::new(
        stop_accepting.clone(),
        drain,
        config.shutdown_timeout(),
    );
    let shutdown = orchestrator.run(signal);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            Some(joined) = listeners.join_next() => match joined {
                // Listeners only return cleanly once shutdown has begun.
                Ok(Ok(())) => continue,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "listener failed");
                    stop_accepting.cancel();
                    return Err(RelayError::Io(e));
                }
                Err(e) => {
                    tracing::error!(error = %e, "listener task panicked");
                    stop_accepting.cancel();
                    return Err(RelayError::Io(std::io::Error::other(e)));
                }
            },
        }
    }
}
