//! Traffic Color E2E Test Framework
//!
//! This crate provides a Rust-controlled E2E suite for the traffic color
//! map that:
//! - Drives Playwright through a generated Node.js driver script
//! - Observes page requests and responses as scoped subscriptions
//! - Decodes traffic vector tiles to check the rendered categories
//! - Parses declarative YAML test specs
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    E2E Test Runner (Rust)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── start_driver() -> DriverClient                       │
//! │    ├── run_spec(spec: TestSpec) -> TestResult               │
//! │    └── write_results(suite)                                 │
//! │  ScenarioRunner                                             │
//! │    ├── count_review_traffic_requests(zoom) -> usize         │
//! │    └── collect_rendered_colors(zoom) -> ColorReport         │
//! │  MapSession                                                 │
//! │    ├── open_map(zoom)                                       │
//! │    └── switch_to_review_source()                            │
//! │  Observation<T>                                             │
//! │    ├── RequestObservation (distinct tile URLs)              │
//! │    └── ColorObservation (JoinSet of tile decode tasks)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  driver.js (Node.js + Playwright), JSON lines on stdio      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod driver;
pub mod error;
pub mod observer;
pub mod preflight;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod spec;

pub use driver::{DriverClient, DriverConfig};
pub use error::{E2eError, E2eResult};
pub use observer::{ColorObservation, ColorReport, RequestObservation, TileUrlFilter};
pub use runner::TestRunner;
pub use scenario::ScenarioRunner;
pub use session::{MapSession, MapTarget};
pub use spec::{Check, TestSpec};
