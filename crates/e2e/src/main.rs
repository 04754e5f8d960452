//! E2E test harness entry point
//!
//! Runs the traffic tile suite, either the built-in tests or YAML specs
//! from a directory.
//! Run with: cargo run --package trafficolor-e2e -- --headless

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use trafficolor_common::MapCenter;
use trafficolor_e2e::driver::Browser;
use trafficolor_e2e::preflight::{check_reachable, PreflightConfig};
use trafficolor_e2e::runner::{RunnerConfig, TestSuiteResult};
use trafficolor_e2e::session::{MapTarget, DEFAULT_BASE_URL};
use trafficolor_e2e::{DriverConfig, E2eResult, TestRunner, TileUrlFilter};

#[derive(Parser, Debug)]
#[command(name = "trafficolor-e2e")]
#[command(about = "E2E traffic tile suite for the traffic color map")]
struct Args {
    /// Directory of YAML test specs (built-in suite when omitted)
    #[arg(short, long, env = "TRAFFICOLOR_E2E_SPECS")]
    specs: Option<PathBuf>,

    /// Run only tests matching this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only a specific test by name
    #[arg(short, long)]
    name: Option<String>,

    /// Map application URL
    #[arg(long, env = "TRAFFICOLOR_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Map center as lat/lon
    #[arg(long, default_value_t = MapCenter::default())]
    center: MapCenter,

    /// Host serving the traffic tiles
    #[arg(long, env = "TRAFFICOLOR_TRAFFIC_HOST")]
    traffic_host: Option<String>,

    /// Browser to use (chromium, firefox, webkit)
    #[arg(long, default_value = "chromium")]
    browser: Browser,

    /// Run in headless mode
    #[arg(long)]
    headless: bool,

    /// Viewport width
    #[arg(long, default_value = "1600")]
    viewport_width: u32,

    /// Viewport height
    #[arg(long, default_value = "900")]
    viewport_height: u32,

    /// Per-test timeout in seconds
    #[arg(long, default_value = "120")]
    test_timeout_secs: u64,

    /// Output directory for results
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,

    /// Check that the application answers before launching the browser
    #[arg(long)]
    preflight: bool,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(args: Args) -> E2eResult<bool> {
    let mut target = MapTarget {
        base_url: args.base_url,
        center: args.center,
        ..Default::default()
    };
    if let Some(host) = args.traffic_host {
        target.traffic = TileUrlFilter::new(host, target.traffic.path_segment.clone());
    }

    if args.preflight {
        check_reachable(&target.base_url, &PreflightConfig::default()).await?;
    }

    let config = RunnerConfig {
        driver: DriverConfig {
            browser: args.browser,
            headless: args.headless,
            viewport_width: args.viewport_width,
            viewport_height: args.viewport_height,
            ..Default::default()
        },
        target,
        test_timeout: Duration::from_secs(args.test_timeout_secs),
        specs_dir: args.specs,
        output_dir: args.output,
    };

    let mut runner = TestRunner::with_config(config);
    let outcome = run_selected(&mut runner, args.name, args.tag).await;

    if let Err(e) = runner.stop_driver().await {
        error!("Failed to stop driver: {}", e);
    }

    let results = outcome?;
    runner.write_results(&results)?;

    info!("{} of {} test(s) passed", results.passed, results.total);
    Ok(results.failed == 0)
}

async fn run_selected(
    runner: &mut TestRunner,
    name: Option<String>,
    tag: Option<String>,
) -> E2eResult<TestSuiteResult> {
    if let Some(name) = name {
        let started_at = Utc::now();
        runner.start_driver().await?;
        let result = runner.run_test(&name).await?;
        let duration = Duration::from_millis(result.duration_ms);
        Ok(TestSuiteResult::from_results(started_at, duration, vec![result]))
    } else if let Some(tag) = tag {
        runner.run_tagged(&tag).await
    } else {
        runner.run_all().await
    }
}
