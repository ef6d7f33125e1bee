//! Pipeline configuration.
//!
//! Loaded from a plain JSON file; every field has a default matching the
//! study setup the pipeline was built around, so an empty `{}` config is a
//! runnable configuration.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(y, mo, d)
        .expect("valid date literal")
        .and_hms_opt(h, mi, 0)
        .expect("valid time literal")
}

/// One session-selection window with its cleaning thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub after_start: NaiveDateTime,
    pub before_end: NaiveDateTime,
    /// Sessions below this are considered noise (plug-in without charging).
    pub energy_cutoff_kwh: f64,
    pub max_dwell_hours: Option<f64>,
    pub min_dwell_hours: Option<f64>,
    /// When false, sessions crossing midnight are dropped.
    pub overnight_stays: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            after_start: naive(2020, 1, 1, 0, 0),
            before_end: naive(2022, 8, 31, 23, 59),
            energy_cutoff_kwh: 1.0,
            max_dwell_hours: Some(24.0),
            min_dwell_hours: Some(10.0 / 60.0),
            overnight_stays: true,
        }
    }
}

/// Tri-state chargepoint filter: `Some(true)` drops the manager chargers,
/// `Some(false)` keeps only them, `None` leaves the table untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerFilter {
    pub exclude: Option<bool>,
    pub chargepoints: Vec<String>,
}

impl Default for ManagerFilter {
    fn default() -> Self {
        Self {
            exclude: None,
            chargepoints: vec![
                "1000019032", "1000019086", "1000019033", "1000019034", "1000019030",
                "1000019031", "1000019036", "1000019029", "1000019035", "1000019037",
                "1000019040", "1000019038", "1000019039", "1000011271", "1000011272",
                "1000011273", "1000011274", "1000011255", "1000011275", "1000011276",
                "1000011277", "1000011278", "1000011317",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Connection and sweep settings for the time-series database holding
/// simulation output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Query window, epoch seconds.
    pub start_epoch: i64,
    pub end_epoch: i64,
    /// Resolution of the simulator output, seconds.
    pub time_base_seconds: u32,
    pub cases: Vec<String>,
    /// Cases that were re-simulated with realized inputs; their realization
    /// is read from the `<case>realized_` measurements.
    pub extended_cases: Vec<String>,
    pub base_case: String,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086/query".to_string(),
            database: "dem".to_string(),
            username: String::new(),
            password: String::new(),
            start_epoch: 1_640_991_600, // 2022-01-01 Europe/Amsterdam
            end_epoch: 1_642_201_200,   // 2022-01-15
            time_base_seconds: 900,
            cases: ["C0_", "C1_", "C2_", "C3_", "C4_", "C5_", "C6_", "C7_", "C8_"]
                .into_iter()
                .map(String::from)
                .collect(),
            extended_cases: [
                "C1_realized_",
                "C2_realized_",
                "C4_realized_",
                "C5_realized_",
                "C6_realized_",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            base_case: "C0_".to_string(),
        }
    }
}

/// Top-level configuration for all pipeline passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Transaction export CSV.
    pub transaction_file: String,
    /// OCPI export CSV.
    pub ocpi_file: String,
    /// Directory for simulator input files and table exports.
    pub output_dir: String,
    /// Directory for rendered figures.
    pub figures_dir: String,

    /// Window the per-car statistics are trained on.
    pub training: WindowConfig,
    /// Window the scenario files are generated for.
    pub test: WindowConfig,

    pub manager_filter: ManagerFilter,
    /// Card ids that are not vehicle proxies (shared chips, anonymous).
    pub excluded_card_ids: Vec<String>,

    /// Assumed usable battery capacity, Wh.
    pub default_capacity_wh: f64,
    /// Assumed maximum charging power, W.
    pub default_power_w: f64,

    /// Number of sweep points; 21 gives percentiles 0,5,...,100.
    pub percentile_steps: usize,
    /// Scenario prefix the percentile-sweep file families are emitted for;
    /// `None` disables the sweep.
    pub sweep_case: Option<String>,
    /// Sessions and estimates shorter than this are stretched to it, in
    /// seconds. The simulator rejects sessions inside one planning interval.
    pub dwell_floor_seconds: f64,
    /// Constant-dwell estimate used by the online end-time fallback, seconds.
    pub estimate_constant_seconds: f64,

    pub influx: InfluxConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut test = WindowConfig {
            after_start: naive(2022, 8, 31, 0, 0),
            before_end: naive(2022, 8, 31, 23, 59),
            ..WindowConfig::default()
        };
        // simulator feasibility needs a longer minimum on the test day
        test.min_dwell_hours = Some(0.5);

        Self {
            transaction_file: "asrData1.csv".to_string(),
            ocpi_file: "asrData2.csv".to_string(),
            output_dir: "output".to_string(),
            figures_dir: "Figures".to_string(),
            training: WindowConfig::default(),
            test,
            manager_filter: ManagerFilter::default(),
            excluded_card_ids: default_excluded_card_ids(),
            default_capacity_wh: 100_000.0,
            default_power_w: 7_400.0,
            percentile_steps: 21,
            sweep_case: Some("C7_".to_string()),
            dwell_floor_seconds: 1_800.0,
            estimate_constant_seconds: 8.0 * 3_600.0,
            influx: InfluxConfig::default(),
        }
    }
}

fn default_excluded_card_ids() -> Vec<String> {
    let mut ids: Vec<String> = vec!["Plug & charge".to_string(), "Anoniem".to_string()];
    ids.extend((1..=22).map(|i| format!("{i} (chip)")));
    ids
}

impl PipelineConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Loads from `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Sweep percentiles: `percentile_steps` evenly spaced points with the
    /// last step size rounded up so the range always reaches 100. Points are
    /// capped at 100 when the step count does not divide the range evenly.
    pub fn sweep_percentiles(&self) -> Vec<u32> {
        let steps = self.percentile_steps.max(2) as u32;
        let stepsize = 100u32.div_ceil(steps - 1);
        let mut points: Vec<u32> = (0..steps).map(|i| (i * stepsize).min(100)).collect();
        points.dedup();
        points
    }
}
