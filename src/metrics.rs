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

//! Process-wide Prometheus counters/gauges for gossip and HTTP activity.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A prometheus registration or collection call failed.
    #[error("prometheus error")]
    Prom,
}

/// Metrics container, registered once at startup.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    /// Number of peers currently in the directory.
    pub peers_known: IntGauge,
    /// Current count of live message-cache entries.
    pub cache_size: IntGauge,
    /// Gossip messages received, by kind.
    pub messages_received_total: IntCounterVec,
    /// Gossip messages dropped (duplicate, malformed, or policy).
    pub messages_dropped_total: IntCounter,
    /// Gossip messages sent during fan-out.
    pub messages_sent_total: IntCounter,
    /// HTTP requests handled, by route.
    pub http_requests_total: IntCounterVec,
}

impl Metrics {
    /// Create and register all series against a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let peers_known = IntGauge::new("fudnet_peers_known", "Peers currently in the directory")
            .map_err(|_| MetricsError::Prom)?;
        let cache_size = IntGauge::new("fudnet_cache_size", "Live message-cache entries")
            .map_err(|_| MetricsError::Prom)?;
        let messages_received_total = IntCounterVec::new(
            Opts::new("fudnet_messages_received_total", "Gossip messages received"),
            &["kind"],
        )
        .map_err(|_| MetricsError::Prom)?;
        let messages_dropped_total = IntCounter::new(
            "fudnet_messages_dropped_total",
            "Gossip messages dropped (duplicate, malformed, or policy)",
        )
        .map_err(|_| MetricsError::Prom)?;
        let messages_sent_total = IntCounter::new(
            "fudnet_messages_sent_total",
            "Gossip messages sent during fan-out",
        )
        .map_err(|_| MetricsError::Prom)?;
        let http_requests_total = IntCounterVec::new(
            Opts::new("fudnet_http_requests_total", "HTTP requests handled"),
            &["route"],
        )
        .map_err(|_| MetricsError::Prom)?;

        registry
            .register(Box::new(peers_known.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(cache_size.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(messages_received_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(messages_dropped_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(messages_sent_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(http_requests_total.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            peers_known,
            cache_size,
            messages_received_total,
            messages_dropped_total,
            messages_sent_total,
            http_requests_total,
        })
    }

    /// Render all registered series in Prometheus text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|_| MetricsError::Prom)?;
        String::from_utf8(buffer).map_err(|_| MetricsError::Prom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_series_names() {
        let metrics = Metrics::new().unwrap();
        metrics.peers_known.set(3);
        metrics.messages_sent_total.inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("fudnet_peers_known"));
        assert!(text.contains("fudnet_messages_sent_total"));
    }
}
