//! Network observation scoped to a scenario
//!
//! An [`Observation`] owns one page listener registered through the
//! driver. `finish()` deregisters it and returns what was collected;
//! dropping an unfinished observation deregisters it as well, so nothing
//! accumulates across scenarios.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, trace, warn};

use trafficolor_common::{decode_colors, ColorCode};

use crate::driver::{DriverClient, DriverEvent, EventKind, Subscription};
use crate::error::{E2eError, E2eResult};

/// Host serving traffic tiles in the review environment
pub const REVIEW_TRAFFIC_HOST: &str = "review-mf-maps-tr-gl8a3w-review.dev-dcadcx.michelin.fr";

/// Path segment of traffic tile URLs
pub const TRAFFIC_TILE_PATH: &str = "/trafficolor/";

/// HTTP status of a tile response worth decoding
const STATUS_OK: u16 = 200;

/// URL predicate for traffic tiles: both substrings must be present
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileUrlFilter {
    pub host: String,
    pub path_segment: String,
}

impl TileUrlFilter {
    pub fn new(host: impl Into<String>, path_segment: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path_segment: path_segment.into(),
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        url.contains(&self.host) && url.contains(&self.path_segment)
    }

    /// The same predicate, in the form the driver filters on
    pub fn substrings(&self) -> Vec<String> {
        vec![self.host.clone(), self.path_segment.clone()]
    }
}

impl Default for TileUrlFilter {
    fn default() -> Self {
        Self::new(REVIEW_TRAFFIC_HOST, TRAFFIC_TILE_PATH)
    }
}

/// Decode outcome counters for a color observation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorStats {
    /// Matching 200 responses a decode task was spawned for
    pub scheduled: usize,
    pub decoded: usize,
    /// Body fetch or decode failures, ignored
    pub failed: usize,
}

/// Colors gathered from every decoded tile response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorReport {
    pub colors: BTreeSet<ColorCode>,
    pub stats: ColorStats,
}

/// A registered page listener and the task collecting its events
pub struct Observation<T> {
    driver: DriverClient,
    subscription: u64,
    collector: Option<JoinHandle<T>>,
    released: bool,
}

/// Distinct URLs of matching requests
pub type RequestObservation = Observation<HashSet<String>>;

/// Color codes decoded from matching responses
pub type ColorObservation = Observation<ColorReport>;

impl Observation<HashSet<String>> {
    /// Start counting distinct requests whose URL matches `filter`
    pub async fn start(driver: &DriverClient, filter: TileUrlFilter) -> E2eResult<Self> {
        let Subscription { id, events } = driver
            .subscribe(EventKind::Request, filter.substrings())
            .await?;
        debug!("Observing requests matching {:?} (#{})", filter, id);

        let collector = tokio::spawn(collect_requests(id, events, filter));
        Ok(Self::new(driver, id, collector))
    }

    /// Deregister the listener and return the distinct URL count
    pub async fn count(self) -> E2eResult<usize> {
        Ok(self.finish().await?.len())
    }
}

impl Observation<ColorReport> {
    /// Start decoding every successful response whose URL matches `filter`
    pub async fn start(driver: &DriverClient, filter: TileUrlFilter) -> E2eResult<Self> {
        let Subscription { id, events } = driver
            .subscribe(EventKind::Response, filter.substrings())
            .await?;
        debug!("Observing tile responses matching {:?} (#{})", filter, id);

        let collector = tokio::spawn(collect_colors(driver.clone(), id, events, filter));
        Ok(Self::new(driver, id, collector))
    }
}

impl<T> Observation<T> {
    fn new(driver: &DriverClient, subscription: u64, collector: JoinHandle<T>) -> Self {
        Self {
            driver: driver.clone(),
            subscription,
            collector: Some(collector),
            released: false,
        }
    }

    pub fn subscription(&self) -> u64 {
        self.subscription
    }

    /// Deregister the listener, then wait for the collector to drain
    /// every event of the subscription and any work it scheduled.
    pub async fn finish(mut self) -> E2eResult<T> {
        let unsubscribed = self.driver.unsubscribe(self.subscription).await;
        self.released = true;
        unsubscribed?;

        let collector = self
            .collector
            .take()
            .ok_or_else(|| E2eError::Driver("observation already finished".to_string()))?;

        collector
            .await
            .map_err(|e| {
                E2eError::Driver(format!(
                    "observation #{} collector failed: {}",
                    self.subscription, e
                ))
            })
    }
}

impl<T> Drop for Observation<T> {
    fn drop(&mut self) {
        if !self.released {
            debug!("Releasing abandoned listener #{}", self.subscription);
            self.driver.unsubscribe_detached(self.subscription);
        }
        if let Some(collector) = self.collector.take() {
            collector.abort();
        }
    }
}

/// Next event belonging to `subscription`, or None once it has ended
async fn next_event(
    events: &mut broadcast::Receiver<DriverEvent>,
    subscription: u64,
) -> Option<DriverEvent> {
    loop {
        match events.recv().await {
            Ok(DriverEvent::Unsubscribed { subscription: s }) if s == subscription => return None,
            Ok(DriverEvent::Closed) => return None,
            Ok(event) if event.subscription() == Some(subscription) => return Some(event),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Listener #{} fell behind, {} events lost", subscription, skipped);
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn collect_requests(
    subscription: u64,
    mut events: broadcast::Receiver<DriverEvent>,
    filter: TileUrlFilter,
) -> HashSet<String> {
    let mut urls = HashSet::new();

    while let Some(event) = next_event(&mut events, subscription).await {
        if let DriverEvent::Request { url, .. } = event {
            if filter.matches(&url) {
                trace!("Traffic tile request: {}", url);
                urls.insert(url);
            }
        }
    }

    debug!("Listener #{} saw {} distinct traffic tile requests", subscription, urls.len());
    urls
}

async fn collect_colors(
    driver: DriverClient,
    subscription: u64,
    mut events: broadcast::Receiver<DriverEvent>,
    filter: TileUrlFilter,
) -> ColorReport {
    let mut tasks = JoinSet::new();
    let mut report = ColorReport::default();

    while let Some(event) = next_event(&mut events, subscription).await {
        let DriverEvent::Response { url, status, response, .. } = event else {
            continue;
        };
        if status != STATUS_OK || !filter.matches(&url) {
            continue;
        }

        report.stats.scheduled += 1;
        let driver = driver.clone();
        tasks.spawn(async move { decode_response(&driver, response, &url).await });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(colors)) => {
                report.stats.decoded += 1;
                report.colors.extend(colors);
            }
            Ok(Err(e)) => {
                report.stats.failed += 1;
                debug!("Ignoring undecodable traffic tile: {}", e);
            }
            Err(e) => {
                report.stats.failed += 1;
                debug!("Tile decode task failed: {}", e);
            }
        }
    }

    debug!(
        "Listener #{} decoded {}/{} traffic tiles, colors {:?}",
        subscription, report.stats.decoded, report.stats.scheduled, report.colors
    );
    report
}

async fn decode_response(
    driver: &DriverClient,
    response: u64,
    url: &str,
) -> E2eResult<BTreeSet<ColorCode>> {
    let body = driver.response_body(response).await?;
    let colors = decode_colors(&body)?;
    trace!("Tile {} ({} bytes) carries colors {:?}", url, body.len(), colors);
    Ok(colors)
}
