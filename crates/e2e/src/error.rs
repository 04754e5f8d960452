//! Error types for E2E testing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Playwright not found. Install with: npm install playwright && npx playwright install chromium")]
    PlaywrightNotFound,

    #[error("Playwright driver error: {0}")]
    Driver(String),

    #[error("Playwright driver exited")]
    DriverClosed,

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Action failed: {action} - {reason}")]
    ActionFailed { action: String, reason: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Invalid scenario phase transition: {from} -> {to}")]
    InvalidPhase { from: String, to: String },

    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Preflight check against {url} failed after {attempts} attempts")]
    PreflightFailed { url: String, attempts: usize },

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Body decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Common(#[from] trafficolor_common::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
