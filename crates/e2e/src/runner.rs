//! Main test runner that orchestrates the driver, scenarios and reporting

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::driver::{DriverClient, DriverConfig};
use crate::error::{E2eError, E2eResult};
use crate::scenario::{Measurement, ScenarioRunner};
use crate::session::{MapSession, MapTarget};
use crate::spec::{Check, TestSpec};

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub measurements: Vec<Measurement>,

    /// Every expectation that did not hold
    pub failures: Vec<String>,

    /// Harness error that stopped the test early
    pub error: Option<String>,

    pub artifacts: FailureArtifacts,
}

/// Diagnostics captured for a failed test
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureArtifacts {
    pub screenshot: Option<PathBuf>,
    pub trace: Option<PathBuf>,
}

impl TestResult {
    /// First reason this test failed, for the one-line report
    pub fn reason(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or_else(|| self.failures.first().map(String::as_str))
    }
}

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn from_results(
        started_at: DateTime<Utc>,
        duration: Duration,
        results: Vec<TestResult>,
    ) -> Self {
        let passed = results.iter().filter(|r| r.success).count();
        Self {
            started_at,
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms: duration.as_millis() as u64,
            results,
        }
    }
}

/// Main E2E test runner. Tests run one at a time, without retries.
pub struct TestRunner {
    config: RunnerConfig,

    /// Running driver (if any)
    driver: Option<DriverClient>,

    /// Whether this runner spawned the driver and must shut it down
    owns_driver: bool,
}

impl TestRunner {
    /// Create a new test runner with default configuration
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    /// Create a test runner with custom configuration
    pub fn with_config(config: RunnerConfig) -> Self {
        Self {
            config,
            driver: None,
            owns_driver: false,
        }
    }

    /// Use an already connected driver instead of spawning one
    pub fn with_driver(config: RunnerConfig, driver: DriverClient) -> Self {
        Self {
            config,
            driver: Some(driver),
            owns_driver: false,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Start the Playwright driver
    pub async fn start_driver(&mut self) -> E2eResult<DriverClient> {
        if let Some(driver) = &self.driver {
            return Ok(driver.clone());
        }

        let driver = DriverClient::spawn(&self.config.driver).await?;
        self.driver = Some(driver.clone());
        self.owns_driver = true;
        Ok(driver)
    }

    /// Stop the driver if this runner started it
    pub async fn stop_driver(&mut self) -> E2eResult<()> {
        if let Some(driver) = self.driver.take() {
            if self.owns_driver {
                driver.shutdown().await?;
            }
        }
        self.owns_driver = false;
        Ok(())
    }

    /// Specs from the configured directory, or the built-in suite
    pub fn load_specs(&self) -> E2eResult<Vec<TestSpec>> {
        match &self.config.specs_dir {
            Some(dir) => TestSpec::load_all(dir),
            None => TestSpec::builtin_suite(),
        }
    }

    /// Run every test
    pub async fn run_all(&mut self) -> E2eResult<TestSuiteResult> {
        let specs = self.load_specs()?;
        self.run_specs(&specs).await
    }

    /// Run tests matching a tag
    pub async fn run_tagged(&mut self, tag: &str) -> E2eResult<TestSuiteResult> {
        let specs = self.load_specs()?;
        let filtered: Vec<TestSpec> = TestSpec::filter_by_tag(&specs, tag)
            .into_iter()
            .cloned()
            .collect();
        self.run_specs(&filtered).await
    }

    /// Run a specific test by name
    pub async fn run_test(&mut self, name: &str) -> E2eResult<TestResult> {
        let specs = self.load_specs()?;
        let spec = specs
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::SpecParse(format!("Test not found: {}", name)))?;

        Ok(self.run_reported(&spec).await)
    }

    /// Run a list of test specs
    pub async fn run_specs(&mut self, specs: &[TestSpec]) -> E2eResult<TestSuiteResult> {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut results = Vec::new();

        self.start_driver().await?;

        info!("Running {} test(s)...", specs.len());

        for spec in specs {
            results.push(self.run_reported(spec).await);
        }

        let suite = TestSuiteResult::from_results(started_at, start.elapsed(), results);

        info!("");
        info!(
            "Test Results: {} passed, {} failed ({} ms)",
            suite.passed, suite.failed, suite.duration_ms
        );

        Ok(suite)
    }

    /// Run one test, turning a harness error into a failed result, and
    /// print its report line
    async fn run_reported(&mut self, spec: &TestSpec) -> TestResult {
        let result = match self.run_spec(spec).await {
            Ok(result) => result,
            Err(e) => TestResult {
                name: spec.name.clone(),
                success: false,
                duration_ms: 0,
                measurements: vec![],
                failures: vec![],
                error: Some(e.to_string()),
                artifacts: FailureArtifacts::default(),
            },
        };
        report_result(&result);
        result
    }

    /// Run a single test spec in a fresh page
    pub async fn run_spec(&mut self, spec: &TestSpec) -> E2eResult<TestResult> {
        let start = Instant::now();
        debug!("Running test: {}", spec.name);

        let driver = self.start_driver().await?;
        driver.new_page().await?;

        let session = MapSession::new(driver.clone(), self.config.target.clone());
        let scenarios = ScenarioRunner::new(session);
        let measured =
            tokio::time::timeout(self.config.test_timeout, measure(&scenarios, &spec.checks)).await;

        let mut measurements = Vec::new();
        let mut failures = Vec::new();
        let mut test_error = None;

        match measured {
            Ok(Ok(taken)) => {
                for (check, measurement) in spec.checks.iter().zip(&taken) {
                    if let Err(e) = check.evaluate(measurement) {
                        failures.push(e.to_string());
                    }
                }
                measurements = taken;
            }
            Ok(Err(e)) => test_error = Some(e.to_string()),
            Err(_) => {
                test_error = Some(
                    E2eError::Timeout(format!(
                        "test '{}' exceeded {} ms",
                        spec.name,
                        self.config.test_timeout.as_millis()
                    ))
                    .to_string(),
                )
            }
        }

        let success = test_error.is_none() && failures.is_empty();
        let artifacts = self.finish_page(&driver, &spec.name, success).await;

        Ok(TestResult {
            name: spec.name.clone(),
            success,
            duration_ms: start.elapsed().as_millis() as u64,
            measurements,
            failures,
            error: test_error,
            artifacts,
        })
    }

    /// Close the test's page; failed tests keep a screenshot and trace
    async fn finish_page(
        &self,
        driver: &DriverClient,
        name: &str,
        success: bool,
    ) -> FailureArtifacts {
        if success {
            if let Err(e) = driver.close_page(None).await {
                warn!("Failed to close page after '{}': {}", name, e);
            }
            return FailureArtifacts::default();
        }

        let dir = self.config.artifacts_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!("Cannot create artifacts dir {}: {}", dir.display(), e);
        }

        let slug = slugify(name);
        let mut artifacts = FailureArtifacts::default();

        let screenshot = dir.join(format!("{}-failure.png", slug));
        match driver.screenshot(&screenshot, true).await {
            Ok(()) => artifacts.screenshot = Some(screenshot),
            Err(e) => warn!("Failure screenshot for '{}' not captured: {}", name, e),
        }

        let trace = self.config.driver.tracing.then(|| dir.join(format!("{}-trace.zip", slug)));
        match driver.close_page(trace.as_deref()).await {
            Ok(()) => artifacts.trace = trace,
            Err(e) => warn!("Trace for '{}' not saved: {}", name, e),
        }

        artifacts
    }

    /// Write test results to JSON file
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.results_path();
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Run each check's scenario in order. All measurements are taken before
/// any expectation is evaluated.
async fn measure(scenarios: &ScenarioRunner, checks: &[Check]) -> E2eResult<Vec<Measurement>> {
    let mut measurements = Vec::with_capacity(checks.len());

    for check in checks {
        let measurement = match check {
            Check::RequestCount { zoom, .. } => Measurement::RequestCount {
                zoom: *zoom,
                count: scenarios.count_review_traffic_requests(*zoom).await?,
            },
            Check::ColorCodes { zoom, .. } => Measurement::Colors {
                zoom: *zoom,
                report: scenarios.collect_rendered_colors(*zoom).await?,
            },
        };
        measurements.push(measurement);
    }

    Ok(measurements)
}

fn report_result(result: &TestResult) {
    if result.success {
        info!("✓ {} ({} ms)", result.name, result.duration_ms);
        return;
    }

    error!("✗ {} - {}", result.name, result.reason().unwrap_or("unknown error"));
    for failure in result.failures.iter().skip(usize::from(result.error.is_none())) {
        error!("    {}", failure);
    }
    for artifact in [&result.artifacts.screenshot, &result.artifacts.trace].into_iter().flatten() {
        error!("    attachment: {}", artifact.display());
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub driver: DriverConfig,
    pub target: MapTarget,

    /// Whole-test budget; exceeding it fails the test
    pub test_timeout: Duration,

    /// YAML specs; the built-in suite when None
    pub specs_dir: Option<PathBuf>,

    pub output_dir: PathBuf,
}

impl RunnerConfig {
    pub fn artifacts_dir(&self) -> PathBuf {
        self.output_dir.join("artifacts")
    }

    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join("test-results.json")
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            driver: DriverConfig::default(),
            target: MapTarget::default(),
            test_timeout: Duration::from_secs(120),
            specs_dir: None,
            output_dir: PathBuf::from("test-results"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(
            slugify("Traffic tiles contain black, red, and orange categories"),
            "traffic-tiles-contain-black-red-and-orange-categories"
        );
        assert_eq!(slugify("--z9--"), "z9");
    }

    #[test]
    fn test_suite_counts() {
        let result = |success| TestResult {
            name: "t".to_string(),
            success,
            duration_ms: 1,
            measurements: vec![],
            failures: vec![],
            error: None,
            artifacts: FailureArtifacts::default(),
        };
        let suite = TestSuiteResult::from_results(
            Utc::now(),
            Duration::from_millis(5),
            vec![result(true), result(false), result(true)],
        );

        assert_eq!(suite.total, 3);
        assert_eq!(suite.passed, 2);
        assert_eq!(suite.failed, 1);
    }

    #[test]
    fn test_runner_config_default() {
        let config = RunnerConfig::default();
        assert_eq!(config.test_timeout, Duration::from_secs(120));
        assert!(config.specs_dir.is_none());
        assert_eq!(config.artifacts_dir(), PathBuf::from("test-results/artifacts"));
    }
}
