// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! fudnet node entrypoint.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use fudnet::config::Config;
use fudnet::gossip::GossipEngine;
use fudnet::host::HostIdentity;
use fudnet::http::{router, AppState};
use fudnet::metrics::Metrics;
use fudnet::store::DeviceStore;
use fudnet::transport::UdpTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    let config = Config::parse();

    let host = HostIdentity::discover(config.message_port).context("discovering host identity")?;
    info!(host = %host.id, address = %host.local_address, "fudnet starting");

    let store = DeviceStore::open(&config.data_dir).context("opening device store")?;
    let metrics = Arc::new(Metrics::new().context("registering metrics")?);
    let transport = UdpTransport::new(config.message_port);
    let engine = GossipEngine::new(host, transport, store, metrics);

    let shutdown = CancellationToken::new();
    let app = router(AppState::new(engine, shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.request_port))
        .await
        .context("binding HTTP listener")?;

    info!(port = config.request_port, "control plane listening");

    const GRACEFUL_DRAIN: Duration = Duration::from_secs(10);

    // SIGINT/SIGTERM cancel the same token the `/shutdown` endpoint cancels,
    // so all three trigger the same drain path below.
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            sigterm.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        signal_shutdown.cancel();
    });

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    // The 10s bound covers only the drain *after* a shutdown signal fires,
    // not total uptime: a healthy node runs indefinitely until cancelled.
    shutdown.cancelled().await;
    match tokio::time::timeout(GRACEFUL_DRAIN, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => return Err(e).context("serving HTTP control plane"),
        Ok(Err(e)) => return Err(e).context("HTTP server task panicked"),
        Err(_) => tracing::warn!("graceful drain exceeded {GRACEFUL_DRAIN:?}, forcing exit"),
    }

    info!("fudnet stopped");
    Ok(())
}
