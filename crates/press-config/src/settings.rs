// SPDX-License-Identifier: MIT OR Apache-2.0
//! Orchestrator settings: TOML file plus environment overrides.

use crate::{ConfigError, ConfigWarning};
use press_core::{ScoreScale, Threshold, VerdictBands};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Budgets above this trigger a [`ConfigWarning::LargeBudget`].
const LARGE_BUDGET_SECS: u64 = 3_600;

/// Retry tunables handed to the MCP client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    /// Maximum retry attempts after the initial attempt.
    pub max_retries: u32,
    /// Backoff base delay, in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff cap, in milliseconds.
    pub max_delay_ms: u64,
    /// Overall retry budget, in milliseconds.
    pub overall_timeout_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            overall_timeout_ms: 120_000,
        }
    }
}

/// Top-level orchestrator settings.
///
/// The authoritative source for verdict bands, the world-class floor, and
/// scale constants — nothing in a job file can shadow these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Proxy host:port carrying the command channel.
    pub proxy_base: String,
    /// Application name registered on the channel.
    pub application: String,
    /// Document handle the layout worker drives.
    pub doc_id: String,
    /// Render endpoint for the service worker, when deployed.
    pub render_endpoint: Option<String>,
    /// Job types routed to the service worker.
    pub service_job_types: Vec<String>,
    /// Directory the primary PDF artifacts land in.
    pub out_dir: PathBuf,
    /// Directory scorecards and subreports land in.
    pub report_dir: PathBuf,
    /// Root of named visual-regression baselines.
    pub baseline_dir: PathBuf,
    /// Directory page previews are rasterized into.
    pub preview_dir: PathBuf,
    /// Rasterizer executable (`pdftoppm`-compatible).
    pub rasterizer_command: String,
    /// Rasterization DPI.
    pub raster_dpi: u32,
    /// Wall-clock budget for one job, in seconds. Exceeding it is an
    /// infrastructure error (exit 3).
    pub wall_clock_budget_secs: u64,
    /// Minimum rubric threshold a world-class job must declare.
    pub world_class_floor: f64,
    /// Verdict band floors (grade scale).
    pub bands: VerdictBands,
    /// MCP retry policy.
    pub retry: RetrySettings,
    /// Force the vision provider into dry-run.
    pub dry_run_vision: bool,
    /// Force the accessibility provider into dry-run.
    pub dry_run_accessibility: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy_base: "127.0.0.1:8701".into(),
            application: "indesign".into(),
            doc_id: "active".into(),
            render_endpoint: None,
            service_job_types: vec!["report".into()],
            out_dir: PathBuf::from("output"),
            report_dir: PathBuf::from("reports"),
            baseline_dir: PathBuf::from("baselines"),
            preview_dir: PathBuf::from("previews"),
            rasterizer_command: "pdftoppm".into(),
            raster_dpi: 150,
            wall_clock_budget_secs: 900,
            world_class_floor: 140.0,
            bands: VerdictBands::default(),
            retry: RetrySettings::default(),
            dry_run_vision: false,
            dry_run_accessibility: false,
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// [`ConfigError::FileNotFound`] or [`ConfigError::ParseError`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(p) => {
                let content =
                    std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                        path: p.display().to_string(),
                    })?;
                toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                    reason: e.to_string(),
                })?
            }
            None => Self::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Apply `PRESS_*` and `DRY_RUN_*` environment overrides. Credentials
    /// for external providers never appear here or in job files; providers
    /// read their own environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("PRESS_OUT_DIR") {
            self.out_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("PRESS_REPORT_DIR") {
            self.report_dir = PathBuf::from(dir);
        }
        if let Ok(base) = std::env::var("PRESS_PROXY_URL") {
            self.proxy_base = base;
        }
        if env_flag("DRY_RUN_VISION") {
            self.dry_run_vision = true;
        }
        if env_flag("DRY_RUN_ACCESSIBILITY") {
            self.dry_run_accessibility = true;
        }
    }

    /// Advisory checks that do not block startup.
    #[must_use]
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if self.wall_clock_budget_secs > LARGE_BUDGET_SECS {
            warnings.push(ConfigWarning::LargeBudget {
                secs: self.wall_clock_budget_secs,
            });
        }
        if self.render_endpoint.is_none() && !self.service_job_types.is_empty() {
            warnings.push(ConfigWarning::MissingOptionalField {
                field: "render_endpoint".into(),
                hint: "service-routed job types will fail without it".into(),
            });
        }
        warnings
    }

    /// The world-class floor as an explicit rubric-scale threshold.
    #[must_use]
    pub fn world_class_threshold(&self) -> Threshold {
        Threshold {
            value: self.world_class_floor,
            scale: ScoreScale::Rubric,
        }
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_and_round_trip_through_toml() {
        let settings = Settings::default();
        let text = toml::to_string(&settings).unwrap();
        let back: Settings = toml::from_str(&text).unwrap();
        assert_eq!(settings, back);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("press.toml");
        std::fs::write(
            &path,
            r#"
proxy_base = "proxy.internal:9000"
raster_dpi = 300
wall_clock_budget_secs = 7200

[retry]
max_retries = 5
base_delay_ms = 100
max_delay_ms = 2000
overall_timeout_ms = 60000
"#,
        )
        .unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.proxy_base, "proxy.internal:9000");
        assert_eq!(settings.raster_dpi, 300);
        assert_eq!(settings.retry.max_retries, 5);
        // Untouched fields keep their defaults.
        assert_eq!(settings.application, "indesign");
        assert!(settings
            .warnings()
            .iter()
            .any(|w| matches!(w, ConfigWarning::LargeBudget { secs: 7200 })));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Settings::load(Some(Path::new("/no/such/press.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn world_class_threshold_is_explicitly_rubric() {
        let threshold = Settings::default().world_class_threshold();
        assert_eq!(threshold.scale, ScoreScale::Rubric);
        assert_eq!(threshold.value, 140.0);
    }
}
