use chrono::Utc;
use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;

use super::endpoint::{Endpoint, EndpointHealth};
use crate::config::{EndpointConfig, EngineConfig, FailoverConfig};
use crate::error::{AttemptError, FailoverError};

/// Sends calls through a pool of interchangeable endpoints
///
/// Endpoints are ranked by health score (descending) then priority
/// (ascending). Each round tries every attemptable endpoint in that order and
/// returns on the first success; failed rounds back off by
/// `retry_delay * retry_backoff^round`.
pub struct FailoverRouter {
    endpoints: Vec<Arc<Endpoint>>,
    config: FailoverConfig,
}

impl FailoverRouter {
    pub fn new(endpoints: &[EndpointConfig], config: FailoverConfig) -> Self {
        Self {
            endpoints: endpoints.iter().map(|e| Arc::new(Endpoint::new(e))).collect(),
            config,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.endpoints, config.failover.clone())
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn endpoint(&self, name: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints.iter().find(|e| e.name() == name)
    }

    /// Attemptable endpoints in preference order
    ///
    /// Open endpoints whose cool-down has elapsed are moved to half-open as a
    /// side effect.
    pub fn ranked_endpoints(&self) -> Vec<Arc<Endpoint>> {
        let now = Utc::now();

        let mut candidates: Vec<(f64, Arc<Endpoint>)> = self
            .endpoints
            .iter()
            .filter(|e| e.can_attempt_at(now))
            .map(|e| (e.health_score_at(now), Arc::clone(e)))
            .collect();

        candidates.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.priority().cmp(&b.priority()))
        });

        candidates.into_iter().map(|(_, e)| e).collect()
    }

    /// Run `operation` against the best available endpoint, failing over on error
    ///
    /// The operation must return `Err` on failure; the router never inspects
    /// the value. `label` only appears in logs and the exhaustion error.
    pub async fn execute<T, F, Fut>(&self, operation: F, label: &str) -> Result<T, FailoverError>
    where
        F: Fn(Arc<Endpoint>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if self.endpoints.is_empty() {
            return Err(FailoverError::NoEndpoints);
        }

        let mut last_error: Option<AttemptError> = None;

        for round in 0..self.config.max_retries {
            let candidates = self.ranked_endpoints();

            if candidates.is_empty() {
                tracing::warn!(
                    label = %label,
                    round = round + 1,
                    max_retries = self.config.max_retries,
                    "No endpoint available, all circuits open"
                );
            }

            for endpoint in candidates {
                match self.attempt(&endpoint, &operation).await {
                    Ok(value) => {
                        tracing::debug!(
                            label = %label,
                            endpoint = %endpoint.name(),
                            round = round + 1,
                            "Call succeeded"
                        );
                        return Ok(value);
                    }
                    Err(e) => {
                        tracing::warn!(
                            label = %label,
                            endpoint = %endpoint.name(),
                            round = round + 1,
                            timeout = e.is_timeout(),
                            error = %e,
                            "Call failed, trying next endpoint"
                        );
                        last_error = Some(e);
                    }
                }
            }

            if round + 1 < self.config.max_retries {
                let delay = self.config.backoff_delay(round);
                tracing::debug!(label = %label, delay_ms = delay.as_millis() as u64, "Backing off");
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(
            label = %label,
            rounds = self.config.max_retries,
            last_error = ?last_error.as_ref().map(|e| e.to_string()),
            "All endpoints exhausted"
        );

        Err(FailoverError::Exhausted {
            label: label.to_string(),
            rounds: self.config.max_retries,
            last: last_error,
        })
    }

    /// One call against one endpoint, with its timeout; updates that endpoint's counters
    async fn attempt<T, F, Fut>(&self, endpoint: &Arc<Endpoint>, operation: &F) -> Result<T, AttemptError>
    where
        F: Fn(Arc<Endpoint>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        endpoint.wait_for_quota().await;

        let timeout = endpoint.timeout();
        let outcome = tokio::time::timeout(timeout, operation(Arc::clone(endpoint))).await;

        let error = match outcome {
            Ok(Ok(value)) => {
                endpoint.record_success();
                return Ok(value);
            }
            Ok(Err(e)) => AttemptError::Failed {
                endpoint: endpoint.name().to_string(),
                message: format!("{:#}", e),
            },
            Err(_) => AttemptError::Timeout {
                endpoint: endpoint.name().to_string(),
                timeout,
            },
        };

        endpoint.record_failure(&error.to_string());
        Err(error)
    }

    pub fn health_snapshot(&self) -> Vec<EndpointHealth> {
        let now = Utc::now();
        self.endpoints.iter().map(|e| e.snapshot_at(now)).collect()
    }
}
