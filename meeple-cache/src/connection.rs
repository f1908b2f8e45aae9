//! Neo4j connection management and health probes
//!
//! The durable statistics store lives in Neo4j. [`HealthCheckResult`] is
//! shared with the key-value backend so both stores report the same way.

use crate::cache::config::BackendSettings;
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use neo4rs::{query, ConfigBuilder, Graph};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Response time above which a responsive store is reported as degraded
pub const DEFAULT_DEGRADED_THRESHOLD: Duration = Duration::from_millis(1000);

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Store is healthy and responsive
    Healthy,
    /// Store is responsive but slow (above degraded threshold)
    Degraded,
    /// Store is not responsive or erroring
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Outcome of one health probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Which store was probed
    pub component: String,
    /// Overall health status
    pub status: HealthStatus,
    /// Response time in milliseconds
    pub response_time_ms: u64,
    /// Timestamp of the health check
    pub timestamp: DateTime<Utc>,
    /// Error message (if unhealthy)
    pub error: Option<String>,
}

impl HealthCheckResult {
    /// Classify a finished probe
    pub fn from_probe(
        component: &str,
        elapsed: Duration,
        outcome: &Result<()>,
        degraded_threshold: Duration,
    ) -> Self {
        let (status, error) = match outcome {
            Ok(()) if elapsed > degraded_threshold => (HealthStatus::Degraded, None),
            Ok(()) => (HealthStatus::Healthy, None),
            Err(e) => (HealthStatus::Unhealthy, Some(e.to_string())),
        };

        Self {
            component: component.to_string(),
            status,
            response_time_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
            error,
        }
    }

    /// Time a probe under a hard timeout and classify it; never fails
    pub async fn probe<F>(component: &str, timeout: Duration, probe: F) -> Self
    where
        F: Future<Output = Result<()>>,
    {
        let start = Instant::now();
        let outcome = match tokio::time::timeout(timeout, probe).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CacheError::TimeoutError {
                timeout_ms: timeout.as_millis() as u64,
                context: format!("{} health check", component),
            }),
        };

        let elapsed = start.elapsed();
        let result = Self::from_probe(component, elapsed, &outcome, DEFAULT_DEGRADED_THRESHOLD);
        if !result.status.is_operational() {
            warn!(component, error = ?result.error, "Health check failed");
        }
        result
    }
}

/// Neo4j client with connection pooling
pub struct Neo4jClient {
    graph: Graph,
}

impl Neo4jClient {
    /// Create a new Neo4j client
    ///
    /// # Arguments
    /// * `uri` - Neo4j connection URI (e.g., "bolt://localhost:7687")
    /// * `user` - Username for authentication
    /// * `password` - Password for authentication
    /// * `database` - Database name (default: "neo4j")
    pub async fn new(uri: &str, user: &str, password: &str, database: &str) -> Result<Self> {
        info!("Connecting to Neo4j at {} (database: {})", uri, database);

        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .db(database)
            .fetch_size(500)
            .max_connections(16)
            .build()
            .map_err(|e| CacheError::ConfigError(e.to_string()))?;

        let graph = Graph::connect(config)
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        info!("Successfully connected to Neo4j");
        Ok(Self { graph })
    }

    /// Connect using `NEO4J_*` settings
    pub async fn from_settings(settings: &BackendSettings) -> Result<Self> {
        Self::new(
            &settings.neo4j_uri,
            &settings.neo4j_user,
            &settings.neo4j_password,
            &settings.neo4j_database,
        )
        .await
    }

    /// Simple health check using RETURN 1
    pub async fn health_check(&self) -> Result<()> {
        debug!("Executing simple health check (RETURN 1)");

        self.graph
            .run(query("RETURN 1"))
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        debug!("Simple health check passed");
        Ok(())
    }

    /// Timed health check with degraded-state detection
    pub async fn health_check_detailed(&self, timeout: Duration) -> HealthCheckResult {
        HealthCheckResult::probe("neo4j", timeout, self.health_check()).await
    }

    /// Get a reference to the underlying Neo4j Graph instance
    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}
