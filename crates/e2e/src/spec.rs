//! Declarative YAML test specification

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use trafficolor_common::{ColorCode, TrafficColor, Zoom};

use crate::error::{E2eError, E2eResult};
use crate::scenario::Measurement;

/// A complete test specification parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    /// Unique name for this test
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering tests
    #[serde(default)]
    pub tags: Vec<String>,

    /// Scenarios to run in order, all on the same page
    pub checks: Vec<Check>,
}

/// One scenario and what its measurement must satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scenario", rename_all = "snake_case")]
pub enum Check {
    /// Count distinct traffic tile requests at a zoom level
    RequestCount { zoom: Zoom, expect: CountExpectation },

    /// Decode the traffic tiles rendered at a zoom level
    ColorCodes {
        zoom: Zoom,
        contains: Vec<TrafficColor>,
    },
}

impl Check {
    pub fn zoom(&self) -> Zoom {
        match self {
            Check::RequestCount { zoom, .. } | Check::ColorCodes { zoom, .. } => *zoom,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Check::RequestCount { zoom, expect } => {
                format!("requests@z{} {}", zoom, expect.describe())
            }
            Check::ColorCodes { zoom, contains } => {
                let names: Vec<String> = contains.iter().map(|c| c.to_string()).collect();
                format!("colors@z{} contain [{}]", zoom, names.join(", "))
            }
        }
    }

    /// Compare a measurement against this check's expectation
    pub fn evaluate(&self, measurement: &Measurement) -> E2eResult<()> {
        match (self, measurement) {
            (Check::RequestCount { expect, .. }, Measurement::RequestCount { count, .. }) => {
                expect.evaluate(*count).map_err(|reason| {
                    E2eError::AssertionFailed(format!("{}: {}", self.label(), reason))
                })
            }
            (Check::ColorCodes { contains, .. }, Measurement::Colors { report, .. }) => {
                let missing = missing_colors(contains, &report.colors);
                if missing.is_empty() {
                    Ok(())
                } else {
                    let names: Vec<String> = missing.iter().map(|c| c.to_string()).collect();
                    let decoded: Vec<String> = report
                        .colors
                        .iter()
                        .map(|&code| match TrafficColor::from_code(code) {
                            Ok(color) => color.to_string(),
                            Err(_) => code.to_string(),
                        })
                        .collect();
                    Err(E2eError::AssertionFailed(format!(
                        "{}: missing {} (decoded [{}])",
                        self.label(),
                        names.join(", "),
                        decoded.join(", ")
                    )))
                }
            }
            _ => Err(E2eError::AssertionFailed(format!(
                "{}: measurement of the wrong kind",
                self.label()
            ))),
        }
    }
}

/// Expected distinct request count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountExpectation {
    Zero,
    Positive,
    Exactly(usize),
    AtLeast(usize),
}

impl CountExpectation {
    pub fn describe(&self) -> String {
        match self {
            CountExpectation::Zero => "== 0".to_string(),
            CountExpectation::Positive => "> 0".to_string(),
            CountExpectation::Exactly(n) => format!("== {}", n),
            CountExpectation::AtLeast(n) => format!(">= {}", n),
        }
    }

    pub fn evaluate(&self, count: usize) -> Result<(), String> {
        let holds = match self {
            CountExpectation::Zero => count == 0,
            CountExpectation::Positive => count > 0,
            CountExpectation::Exactly(n) => count == *n,
            CountExpectation::AtLeast(n) => count >= *n,
        };

        if holds {
            Ok(())
        } else {
            Err(format!("expected {}, observed {}", self.describe(), count))
        }
    }
}

fn missing_colors(expected: &[TrafficColor], decoded: &BTreeSet<ColorCode>) -> Vec<TrafficColor> {
    expected
        .iter()
        .copied()
        .filter(|c| !decoded.contains(&c.code()))
        .collect()
}

impl TestSpec {
    /// Parse a test spec from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        if spec.checks.is_empty() {
            return Err(E2eError::SpecParse(format!("test '{}' has no checks", spec.name)));
        }
        Ok(spec)
    }

    /// Parse a test spec from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all test specs from a directory
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        paths.iter().map(|p| Self::from_file(p)).collect()
    }

    /// Filter specs by tag
    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    /// The suite run when no spec directory is given
    pub fn builtin_suite() -> E2eResult<Vec<Self>> {
        let zoom = Zoom::new;

        Ok(vec![
            TestSpec {
                name: "Traffic requests are absent before zoom 2 and present from zoom 2 to 19"
                    .to_string(),
                description: "No review traffic tiles are fetched below zoom 2".to_string(),
                tags: vec!["requests".to_string(), "smoke".to_string()],
                checks: vec![
                    Check::RequestCount { zoom: zoom(0)?, expect: CountExpectation::Zero },
                    Check::RequestCount { zoom: zoom(1)?, expect: CountExpectation::Zero },
                    Check::RequestCount { zoom: zoom(2)?, expect: CountExpectation::Positive },
                    Check::RequestCount { zoom: zoom(19)?, expect: CountExpectation::Positive },
                ],
            },
            TestSpec {
                name: "Traffic tiles contain black, red, and orange categories in review environment"
                    .to_string(),
                description: "Decoded tiles at zoom 9 carry every traffic category".to_string(),
                tags: vec!["colors".to_string()],
                checks: vec![Check::ColorCodes {
                    zoom: zoom(9)?,
                    contains: TrafficColor::ALL.to_vec(),
                }],
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ColorReport;
    use test_case::test_case;

    #[test]
    fn test_parse_simple_spec() {
        let yaml = r#"
name: low-zoom-requests
description: No traffic below zoom 2
tags:
  - requests
  - smoke
checks:
  - scenario: request_count
    zoom: 0
    expect: zero
  - scenario: request_count
    zoom: 12
    expect:
      at_least: 4
  - scenario: color_codes
    zoom: 9
    contains: [black, red]
"#;
        let spec = TestSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.name, "low-zoom-requests");
        assert_eq!(spec.checks.len(), 3);
        assert_eq!(
            spec.checks[1],
            Check::RequestCount {
                zoom: Zoom::new(12).unwrap(),
                expect: CountExpectation::AtLeast(4)
            }
        );
    }

    #[test]
    fn test_out_of_range_zoom_rejected() {
        let yaml = r#"
name: bad-zoom
checks:
  - scenario: request_count
    zoom: 20
    expect: positive
"#;
        assert!(TestSpec::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_spec_without_checks_rejected() {
        assert!(matches!(
            TestSpec::from_yaml("name: empty\nchecks: []\n"),
            Err(E2eError::SpecParse(_))
        ));
    }

    #[test_case(CountExpectation::Zero, 0, true)]
    #[test_case(CountExpectation::Zero, 3, false)]
    #[test_case(CountExpectation::Positive, 1, true)]
    #[test_case(CountExpectation::Positive, 0, false)]
    #[test_case(CountExpectation::Exactly(2), 2, true)]
    #[test_case(CountExpectation::AtLeast(2), 1, false)]
    fn test_count_expectations(expect: CountExpectation, count: usize, holds: bool) {
        assert_eq!(expect.evaluate(count).is_ok(), holds);
    }

    #[test]
    fn test_color_check_reports_missing_categories() {
        let check = Check::ColorCodes {
            zoom: Zoom::new(9).unwrap(),
            contains: TrafficColor::ALL.to_vec(),
        };
        let measurement = Measurement::Colors {
            zoom: Zoom::new(9).unwrap(),
            report: ColorReport {
                colors: [1, 3, 5].into_iter().collect(),
                ..Default::default()
            },
        };

        let err = check.evaluate(&measurement).unwrap_err().to_string();
        assert!(err.contains("missing RED (decoded [BLACK, ORANGE, 5])"), "{}", err);
    }

    #[test]
    fn test_shipped_specs_match_builtin_suite() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../specs");
        let mut shipped = TestSpec::load_all(&dir).unwrap();
        let mut builtin = TestSpec::builtin_suite().unwrap();
        shipped.sort_by(|a, b| a.name.cmp(&b.name));
        builtin.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(shipped.len(), builtin.len());
        for (file, code) in shipped.iter().zip(&builtin) {
            assert_eq!(file.name, code.name);
            assert_eq!(file.checks, code.checks);
        }
        assert_eq!(TestSpec::filter_by_tag(&shipped, "smoke").len(), 1);
    }

    #[test]
    fn test_builtin_suite_matches_zoom_thresholds() {
        let suite = TestSpec::builtin_suite().unwrap();
        assert_eq!(suite.len(), 2);

        let expectations: Vec<(u8, CountExpectation)> = suite[0]
            .checks
            .iter()
            .filter_map(|c| match c {
                Check::RequestCount { zoom, expect } => Some((zoom.level(), *expect)),
                _ => None,
            })
            .collect();
        assert_eq!(
            expectations,
            vec![
                (0, CountExpectation::Zero),
                (1, CountExpectation::Zero),
                (2, CountExpectation::Positive),
                (19, CountExpectation::Positive),
            ]
        );
        assert_eq!(suite[1].checks[0].zoom().level(), 9);
    }
}
