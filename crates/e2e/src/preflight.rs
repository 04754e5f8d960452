//! Reachability preflight for the application under test

use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

/// Configuration for the reachability probe
#[derive(Debug, Clone)]
pub struct PreflightConfig {
    pub attempts: usize,

    /// Pause between attempts
    pub interval: Duration,

    /// Timeout of a single request
    pub request_timeout: Duration,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Wait for `url` to answer with a success or redirect status.
///
/// Certificates are not verified: review environments use self-signed
/// ones and the browser is told to ignore them too.
pub async fn check_reachable(url: &str, config: &PreflightConfig) -> E2eResult<()> {
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .danger_accept_invalid_certs(true)
        .build()?;

    for attempt in 1..=config.attempts {
        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => {
                info!("Application reachable at {} ({})", url, resp.status());
                return Ok(());
            }
            Ok(resp) => {
                warn!("Preflight attempt {} returned {}", attempt, resp.status());
            }
            Err(e) => {
                warn!("Preflight attempt {} failed: {}", attempt, e);
            }
        }

        if attempt < config.attempts {
            sleep(config.interval).await;
        }
    }

    Err(E2eError::PreflightFailed {
        url: url.to_string(),
        attempts: config.attempts,
    })
}
