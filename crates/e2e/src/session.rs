//! Browser session control for the traffic color map
//!
//! Navigation to a zoom-specific map URL and the selector choreography that
//! points both comparison panels at the review tiles.

use std::time::Duration;

use tracing::{debug, info};

use trafficolor_common::{MapCenter, Zoom};

use crate::driver::{DriverClient, WaitUntil};
use crate::error::E2eResult;
use crate::observer::TileUrlFilter;

/// Application under test in the review environment
pub const DEFAULT_BASE_URL: &str = "https://review-mf-tfc-dem-n01jvo-review.dev-dcadcx.michelin.fr/traffic-color/";

/// Canvas of the left ("before") comparison panel
pub const LEFT_MAP_CANVAS: &str = "#before canvas.maplibregl-canvas";

/// Fixed waits and bounded timeouts used around page actions
#[derive(Debug, Clone)]
pub struct SettleTimings {
    pub navigation_timeout: Duration,

    /// Bound for the left canvas to become visible
    pub visibility_timeout: Duration,

    /// Wait after switching sources, for the style reload to kick in
    pub source_switch_settle: Duration,

    /// Extra observation window when counting requests
    pub request_settle: Duration,

    /// Extra observation window when decoding tiles
    pub color_settle: Duration,
}

impl Default for SettleTimings {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(120),
            visibility_timeout: Duration::from_secs(10),
            source_switch_settle: Duration::from_millis(6000),
            request_settle: Duration::from_millis(4000),
            color_settle: Duration::from_millis(6000),
        }
    }
}

/// The four `<select>` controls of the comparison view
#[derive(Debug, Clone)]
pub struct PanelSelectors {
    pub left_source: String,
    pub right_source: String,
    pub left_tile: String,
    pub right_tile: String,
}

impl Default for PanelSelectors {
    fn default() -> Self {
        Self {
            left_source: "#left-source-selector".to_string(),
            right_source: "#right-source-selector".to_string(),
            left_tile: "#left-martin-tile-selector".to_string(),
            right_tile: "#right-martin-tile-selector".to_string(),
        }
    }
}

/// Where the map lives and how to drive it
#[derive(Debug, Clone)]
pub struct MapTarget {
    pub base_url: String,
    pub center: MapCenter,
    pub left_canvas: String,
    pub selectors: PanelSelectors,

    /// Option picked in both source selectors
    pub source: String,

    /// Option picked in both tile variant selectors
    pub tile_variant: String,

    pub traffic: TileUrlFilter,
    pub timings: SettleTimings,
}

impl Default for MapTarget {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            center: MapCenter::default(),
            left_canvas: LEFT_MAP_CANVAS.to_string(),
            selectors: PanelSelectors::default(),
            source: "martin".to_string(),
            tile_variant: "review".to_string(),
            traffic: TileUrlFilter::default(),
            timings: SettleTimings::default(),
        }
    }
}

impl MapTarget {
    /// `<base>#<zoom>/<lat>/<lon>`
    pub fn map_url(&self, zoom: Zoom) -> String {
        format!("{}#{}/{}", self.base_url, zoom, self.center)
    }

    /// Select actions in the order they are performed
    pub fn panel_selections(&self) -> [(&str, &str); 4] {
        [
            (self.selectors.left_source.as_str(), self.source.as_str()),
            (self.selectors.right_source.as_str(), self.source.as_str()),
            (self.selectors.left_tile.as_str(), self.tile_variant.as_str()),
            (self.selectors.right_tile.as_str(), self.tile_variant.as_str()),
        ]
    }
}

/// A page showing the map, driven through the Playwright driver
#[derive(Clone)]
pub struct MapSession {
    driver: DriverClient,
    target: MapTarget,
}

impl MapSession {
    pub fn new(driver: DriverClient, target: MapTarget) -> Self {
        Self { driver, target }
    }

    pub fn driver(&self) -> &DriverClient {
        &self.driver
    }

    pub fn target(&self) -> &MapTarget {
        &self.target
    }

    /// Navigate to the map at `zoom`, wait for the network to go idle and
    /// for the left canvas to show. No retry on timeout.
    pub async fn open_map(&self, zoom: Zoom) -> E2eResult<()> {
        let url = self.target.map_url(zoom);
        info!("Opening map at zoom {}: {}", zoom, url);

        self.driver
            .goto(&url, WaitUntil::NetworkIdle, self.target.timings.navigation_timeout)
            .await?;
        self.driver
            .wait_visible(&self.target.left_canvas, self.target.timings.visibility_timeout)
            .await?;

        debug!("Left map canvas visible");
        Ok(())
    }

    /// Switch both panels to the configured source and tile variant, then
    /// give the map a fixed window to reload its style and tiles.
    pub async fn switch_to_review_source(&self) -> E2eResult<()> {
        for (selector, value) in self.target.panel_selections() {
            debug!("Selecting '{}' in {}", value, selector);
            self.driver.select_option(selector, value).await?;
        }

        // No reload-complete signal exists in the app; a fixed wait it is.
        tokio::time::sleep(self.target.timings.source_switch_settle).await;
        Ok(())
    }
}
