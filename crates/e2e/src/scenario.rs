//! Traffic tile scenarios
//!
//! A scenario opens the map at one zoom level while a network observation
//! is active, switches both panels to the review tiles, waits out its
//! settle window and reports what the observation collected.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, Instrument};

use trafficolor_common::{ColorCode, Zoom};

use crate::error::{E2eError, E2eResult};
use crate::observer::{ColorObservation, ColorReport, Observation, RequestObservation};
use crate::session::MapSession;

/// Lifecycle of one scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioPhase {
    NotStarted,
    Navigating,
    PanelsSwitching,
    Observing,
    Settled,
    Reported,
}

impl ScenarioPhase {
    fn next(self) -> Option<ScenarioPhase> {
        match self {
            ScenarioPhase::NotStarted => Some(ScenarioPhase::Navigating),
            ScenarioPhase::Navigating => Some(ScenarioPhase::PanelsSwitching),
            ScenarioPhase::PanelsSwitching => Some(ScenarioPhase::Observing),
            ScenarioPhase::Observing => Some(ScenarioPhase::Settled),
            ScenarioPhase::Settled => Some(ScenarioPhase::Reported),
            ScenarioPhase::Reported => None,
        }
    }
}

impl fmt::Display for ScenarioPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScenarioPhase::NotStarted => "not_started",
            ScenarioPhase::Navigating => "navigating",
            ScenarioPhase::PanelsSwitching => "panels_switching",
            ScenarioPhase::Observing => "observing",
            ScenarioPhase::Settled => "settled",
            ScenarioPhase::Reported => "reported",
        };
        f.write_str(name)
    }
}

/// Phase tracker; phases only move forward one step at a time
#[derive(Debug)]
pub struct PhaseTracker {
    phase: ScenarioPhase,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            phase: ScenarioPhase::NotStarted,
        }
    }
}

impl PhaseTracker {
    pub fn phase(&self) -> ScenarioPhase {
        self.phase
    }

    pub fn advance(&mut self, to: ScenarioPhase) -> E2eResult<()> {
        if self.phase.next() != Some(to) {
            return Err(E2eError::InvalidPhase {
                from: self.phase.to_string(),
                to: to.to_string(),
            });
        }
        debug!("Scenario phase {} -> {}", self.phase, to);
        self.phase = to;
        Ok(())
    }
}

/// What a scenario measured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measurement {
    RequestCount { zoom: Zoom, count: usize },
    Colors { zoom: Zoom, report: ColorReport },
}

/// Runs scenarios against one open page
pub struct ScenarioRunner {
    session: MapSession,
}

impl ScenarioRunner {
    pub fn new(session: MapSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &MapSession {
        &self.session
    }

    /// Distinct traffic tile requests issued with the map at `zoom`
    pub async fn count_review_traffic_requests(&self, zoom: Zoom) -> E2eResult<usize> {
        let span = info_span!("request_scenario", zoom = zoom.level());
        async {
            let filter = self.session.target().traffic.clone();
            let settle = self.session.target().timings.request_settle;
            let observation = RequestObservation::start(self.session.driver(), filter).await?;

            let count = self.choreograph(zoom, observation, settle).await?.len();
            info!("Zoom {}: {} distinct traffic tile requests", zoom, count);
            Ok(count)
        }
        .instrument(span)
        .await
    }

    /// Color codes decoded from the traffic tiles rendered at `zoom`
    pub async fn collect_rendered_colors(&self, zoom: Zoom) -> E2eResult<ColorReport> {
        let span = info_span!("color_scenario", zoom = zoom.level());
        async {
            let filter = self.session.target().traffic.clone();
            let settle = self.session.target().timings.color_settle;
            let observation = ColorObservation::start(self.session.driver(), filter).await?;

            let report = self.choreograph(zoom, observation, settle).await?;
            info!(
                "Zoom {}: colors {:?} from {} decoded tiles ({} skipped)",
                zoom, report.colors, report.stats.decoded, report.stats.failed
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Convenience wrapper returning only the color set
    pub async fn rendered_color_codes(&self, zoom: Zoom) -> E2eResult<BTreeSet<ColorCode>> {
        Ok(self.collect_rendered_colors(zoom).await?.colors)
    }

    /// Observation is already listening when this starts. Any failure
    /// drops it, which releases the page listener.
    async fn choreograph<T>(
        &self,
        zoom: Zoom,
        observation: Observation<T>,
        settle: Duration,
    ) -> E2eResult<T> {
        let mut phases = PhaseTracker::default();

        phases.advance(ScenarioPhase::Navigating)?;
        self.session.open_map(zoom).await?;

        phases.advance(ScenarioPhase::PanelsSwitching)?;
        self.session.switch_to_review_source().await?;

        phases.advance(ScenarioPhase::Observing)?;
        tokio::time::sleep(settle).await;

        phases.advance(ScenarioPhase::Settled)?;
        let collected = observation.finish().await?;

        phases.advance(ScenarioPhase::Reported)?;
        Ok(collected)
    }
}
