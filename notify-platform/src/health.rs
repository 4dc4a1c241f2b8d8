//! Component health checks for the readiness probe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::Result;
use crate::broker::AmqpBroker;
use crate::error::with_timeout;
use crate::database::DbPool;
use crate::ratelimit::RedisQuotaCounter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Outcome of one probe.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub latency_ms: u64,
}

/// Aggregate report served by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub components: BTreeMap<&'static str, ComponentHealth>,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub checked_at: DateTime<Utc>,
}

impl SystemHealth {
    /// Healthy only if every component is; an empty report is healthy.
    pub fn from_components(
        components: BTreeMap<&'static str, ComponentHealth>,
        uptime: Duration,
    ) -> Self {
        let status = if components
            .values()
            .all(|c| c.status == HealthStatus::Healthy)
        {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        Self {
            status,
            components,
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: uptime.as_secs(),
            checked_at: Utc::now(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// A dependency that can be probed.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self) -> Result<()>;
}

pub struct HealthChecker {
    probes: Vec<Arc<dyn HealthProbe>>,
    start_time: Instant,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            probes: Vec::new(),
            start_time: Instant::now(),
            timeout,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// Run every probe concurrently, each bounded by the checker timeout.
    pub async fn check_all(&self) -> SystemHealth {
        let probes = self.probes.iter().map(|probe| async move {
            let started = Instant::now();
            let outcome = with_timeout(probe.name(), self.timeout, probe.check()).await;
            let health = ComponentHealth {
                status: if outcome.is_ok() {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Unhealthy
                },
                message: outcome.err().map(|e| e.to_string()),
                latency_ms: started.elapsed().as_millis() as u64,
            };
            (probe.name(), health)
        });

        let components = futures::future::join_all(probes).await.into_iter().collect();
        SystemHealth::from_components(components, self.start_time.elapsed())
    }

    pub async fn check_ready(&self) -> bool {
        self.check_all().await.is_ready()
    }
}

/// Probes the ledger database with `SELECT 1`.
pub struct DatabaseProbe(pub DbPool);

#[async_trait]
impl HealthProbe for DatabaseProbe {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.0).await?;
        Ok(())
    }
}

#[async_trait]
impl HealthProbe for RedisQuotaCounter {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn check(&self) -> Result<()> {
        self.ping().await
    }
}

#[async_trait]
impl HealthProbe for AmqpBroker {
    fn name(&self) -> &'static str {
        "broker"
    }

    async fn check(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(crate::Error::unavailable("broker connection is closed"))
        }
    }
}
