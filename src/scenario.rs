//! Simulator input generation.
//!
//! Each scenario is a named configuration of estimated vs. realized inputs
//! for the external energy-management simulator. Per quantity (session
//! count, required charge, start times, end times, EV specs) a pair of text
//! files is written, `<stem>_real.txt` and `<stem>_estimate.txt`, one line
//! per car in the format `index:v1,v2,...` with the sessions of that car in
//! order. Estimates come from the per-car statistics table; a car without
//! history falls back to a static default.

use crate::filter::Session;
use crate::stats::CarStatsTable;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// How emitted values are rounded before printing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rounding {
    #[default]
    None,
    Up,
    Down,
    Nearest,
}

impl Rounding {
    fn format(self, v: f64) -> String {
        match self {
            Rounding::None => format!("{v}"),
            Rounding::Up => format!("{}", v.ceil() as i64),
            Rounding::Down => format!("{}", v.floor() as i64),
            Rounding::Nearest => format!("{}", v.round() as i64),
        }
    }
}

/// Which realized per-session value a file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealKey {
    TotalEnergyWh,
    StartSinceWindow,
    EndSinceWindow,
    /// Training-set session count of the car (0 for unknown cars).
    Count,
}

impl RealKey {
    fn value(self, s: &Session) -> f64 {
        match self {
            RealKey::TotalEnergyWh => s.energy_wh,
            RealKey::StartSinceWindow => s.start_since_window,
            RealKey::EndSinceWindow => s.end_since_window,
            RealKey::Count => s.training_count,
        }
    }
}

/// One `<stem>_real.txt` / `<stem>_estimate.txt` pair.
#[derive(Debug, Clone)]
pub struct SessionFileSpec {
    pub file_stem: String,
    /// Statistics key for the estimate; `None` always emits the default
    /// (used for quantities where only the realized file matters).
    pub estimate_key: Option<String>,
    pub real_key: RealKey,
    pub rounding: Rounding,
    pub static_default: f64,
}

/// The EV specs pair (`index:capacity,power` per car).
#[derive(Debug, Clone)]
pub struct SpecsFileSpec {
    pub file_stem: String,
    pub cap_key: String,
    pub power_key: String,
    pub rounding: Rounding,
    pub default_capacity: f64,
    pub default_power: f64,
}

/// A full scenario: prefix plus its file specs.
#[derive(Debug, Clone)]
pub struct ScenarioDef {
    pub prefix: String,
    pub files: Vec<SessionFileSpec>,
    pub specs: Option<SpecsFileSpec>,
}

/// Groups sessions per card id, preserving first-appearance order. The line
/// index in the emitted files is the position in this grouping.
pub fn group_by_car(sessions: &[Session]) -> Vec<(String, Vec<&Session>)> {
    let mut groups: Vec<(String, Vec<&Session>)> = Vec::new();
    for s in sessions {
        match groups.iter_mut().find(|(id, _)| *id == s.card_id) {
            Some((_, list)) => list.push(s),
            None => groups.push((s.card_id.clone(), vec![s])),
        }
    }
    groups
}

/// Writes the per-scenario simulator input files.
pub struct ScenarioWriter<'a> {
    out_dir: PathBuf,
    stats: &'a CarStatsTable,
    groups: Vec<(String, Vec<&'a Session>)>,
}

impl<'a> ScenarioWriter<'a> {
    pub fn new<P: AsRef<Path>>(
        out_dir: P,
        stats: &'a CarStatsTable,
        real_sessions: &'a [Session],
    ) -> Result<Self> {
        let out_dir = out_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&out_dir)
            .with_context(|| format!("creating output dir {}", out_dir.display()))?;
        Ok(Self {
            out_dir,
            stats,
            groups: group_by_car(real_sessions),
        })
    }

    /// The estimate for one car and key. Besides the statistics table keys
    /// this resolves `count` and the per-session online end estimates
    /// (`end_sreal_*`), which live on the car's first session.
    fn estimate_value(&self, card_id: &str, sessions: &[&Session], key: &str) -> Option<f64> {
        if key == "count" {
            return Some(
                self.stats
                    .get(card_id)
                    .map(|c| c.count as f64)
                    .unwrap_or(0.0),
            );
        }
        if let Some(v) = self.stats.get(card_id).and_then(|c| c.value(key)) {
            return Some(v);
        }
        sessions
            .first()
            .and_then(|s| s.end_estimates.get(key).copied())
    }

    /// Writes one real/estimate file pair. The real file has all sessions of
    /// a car on its line; the estimate file has a single value per car.
    pub fn write_session_file(&self, spec: &SessionFileSpec) -> Result<()> {
        let mut real_lines = Vec::with_capacity(self.groups.len());
        let mut estimate_lines = Vec::with_capacity(self.groups.len());

        for (car_index, (card_id, sessions)) in self.groups.iter().enumerate() {
            let reals: Vec<String> = sessions
                .iter()
                .map(|s| spec.rounding.format(spec.real_key.value(s)))
                .collect();
            real_lines.push(format!("{car_index}:{}", reals.join(",")));

            let estimate = spec
                .estimate_key
                .as_deref()
                .and_then(|key| self.estimate_value(card_id, sessions, key))
                .unwrap_or_else(|| {
                    if spec.estimate_key.is_some() {
                        warn!(
                            card_id,
                            key = spec.estimate_key.as_deref().unwrap_or(""),
                            default = spec.static_default,
                            "No historical estimate for car, using static default"
                        );
                    }
                    spec.static_default
                });
            estimate_lines.push(format!("{car_index}:{}", spec.rounding.format(estimate)));
        }

        self.write_pair(&spec.file_stem, &real_lines, &estimate_lines)
    }

    /// Writes the EV specs pair, one `index:capacity,power` line per car.
    /// Realized specs come from the car's first session.
    pub fn write_specs_file(&self, spec: &SpecsFileSpec) -> Result<()> {
        let mut real_lines = Vec::with_capacity(self.groups.len());
        let mut estimate_lines = Vec::with_capacity(self.groups.len());

        for (car_index, (card_id, sessions)) in self.groups.iter().enumerate() {
            let Some(first) = sessions.first() else {
                continue;
            };
            real_lines.push(format!(
                "{car_index}:{},{}",
                spec.rounding.format(first.capacity_wh),
                spec.rounding.format(first.max_power_w),
            ));

            let cap = self
                .estimate_value(card_id, sessions, &spec.cap_key)
                .unwrap_or(spec.default_capacity);
            let power = self
                .estimate_value(card_id, sessions, &spec.power_key)
                .unwrap_or(spec.default_power);
            estimate_lines.push(format!(
                "{car_index}:{},{}",
                spec.rounding.format(cap),
                spec.rounding.format(power),
            ));
        }

        self.write_pair(&spec.file_stem, &real_lines, &estimate_lines)
    }

    fn write_pair(&self, stem: &str, real: &[String], estimate: &[String]) -> Result<()> {
        let real_path = self.out_dir.join(format!("{stem}_real.txt"));
        let estimate_path = self.out_dir.join(format!("{stem}_estimate.txt"));
        std::fs::write(&real_path, real.join("\n"))
            .with_context(|| format!("writing {}", real_path.display()))?;
        std::fs::write(&estimate_path, estimate.join("\n"))
            .with_context(|| format!("writing {}", estimate_path.display()))?;
        info!(stem, cars = real.len(), "Scenario file pair written");
        Ok(())
    }

    pub fn write_scenario(&self, scenario: &ScenarioDef) -> Result<()> {
        for file in &scenario.files {
            self.write_session_file(file)?;
        }
        if let Some(specs) = &scenario.specs {
            self.write_specs_file(specs)?;
        }
        Ok(())
    }
}

const START_DEFAULT: f64 = 9.0 * 3600.0;
const END_DEFAULT: f64 = 17.0 * 3600.0;

fn count_file(prefix: &str) -> SessionFileSpec {
    SessionFileSpec {
        file_stem: format!("{prefix}ElectricVehicle_Count"),
        estimate_key: Some("count".to_string()),
        real_key: RealKey::Count,
        rounding: Rounding::None,
        static_default: 0.0,
    }
}

fn charge_file(prefix: &str, estimate_key: Option<&str>, energy_default: f64) -> SessionFileSpec {
    SessionFileSpec {
        file_stem: format!("{prefix}ElectricVehicle_RequiredCharge"),
        estimate_key: estimate_key.map(String::from),
        real_key: RealKey::TotalEnergyWh,
        rounding: Rounding::Up,
        static_default: energy_default,
    }
}

fn endtimes_file(prefix: &str, estimate_key: Option<&str>) -> SessionFileSpec {
    SessionFileSpec {
        file_stem: format!("{prefix}ElectricVehicle_Endtimes"),
        estimate_key: estimate_key.map(String::from),
        real_key: RealKey::EndSinceWindow,
        rounding: Rounding::Down,
        static_default: END_DEFAULT,
    }
}

fn starttimes_file(prefix: &str, estimate_key: Option<&str>) -> SessionFileSpec {
    SessionFileSpec {
        file_stem: format!("{prefix}ElectricVehicle_Starttimes"),
        estimate_key: estimate_key.map(String::from),
        real_key: RealKey::StartSinceWindow,
        rounding: Rounding::Up,
        static_default: START_DEFAULT,
    }
}

fn specs_file(prefix: &str, default_capacity: f64, default_power: f64) -> SpecsFileSpec {
    SpecsFileSpec {
        file_stem: format!("{prefix}ElectricVehicle_Specs"),
        cap_key: "capacity".to_string(),
        power_key: "maxPower".to_string(),
        rounding: Rounding::Up,
        default_capacity,
        default_power,
    }
}

/// The built-in information scenarios.
///
/// Per scenario, which quantities use historical estimates instead of the
/// static defaults:
/// - `C0_`: none (also serves as the perfect-information file layout)
/// - `C1_`: energy
/// - `C2_`: end time (real start + median historical dwell)
/// - `C3_`: energy and end time as in C2
/// - `C4_`: start time
/// - `C5_`: start time and energy
/// - `C6_`: start and end time
/// - `C7_`: start time, end time and energy
/// - `C8_`: none, perfect-information baseline
pub fn builtin_scenarios(
    energy_default: f64,
    default_capacity: f64,
    default_power: f64,
) -> Vec<ScenarioDef> {
    let wiring: [(&str, Option<&str>, Option<&str>, Option<&str>); 9] = [
        ("C0_", None, None, None),
        ("C1_", Some("energy_mean"), None, None),
        ("C2_", None, Some("end_sreal_d50"), None),
        ("C3_", Some("energy_mean"), Some("end_sreal_d50"), None),
        ("C4_", None, None, Some("start_time_mean")),
        ("C5_", Some("energy_mean"), None, Some("start_time_mean")),
        ("C6_", None, Some("end_smean_dmean"), Some("start_time_mean")),
        (
            "C7_",
            Some("energy_mean"),
            Some("end_smean_dmean"),
            Some("start_time_mean"),
        ),
        ("C8_", None, None, None),
    ];

    wiring
        .into_iter()
        .map(|(prefix, energy_key, end_key, start_key)| ScenarioDef {
            prefix: prefix.to_string(),
            files: vec![
                count_file(prefix),
                charge_file(prefix, energy_key, energy_default),
                endtimes_file(prefix, end_key),
                starttimes_file(prefix, start_key),
            ],
            specs: Some(specs_file(prefix, default_capacity, default_power)),
        })
        .collect()
}

/// Percentile sweep file family for one scenario prefix: per sweep point
/// `p`, required charge from `e{p}`, start times from `s{p}` and end times
/// from `end_s{p}d{p}`.
pub fn sweep_files(prefix: &str, percentiles: &[u32], energy_default: f64) -> Vec<SessionFileSpec> {
    let mut files = Vec::with_capacity(percentiles.len() * 3);
    for &p in percentiles {
        files.push(SessionFileSpec {
            file_stem: format!("{prefix}e{p}_ElectricVehicle_RequiredCharge"),
            estimate_key: Some(format!("e{p}")),
            real_key: RealKey::TotalEnergyWh,
            rounding: Rounding::Up,
            static_default: energy_default,
        });
        files.push(SessionFileSpec {
            file_stem: format!("{prefix}s{p}d{p}_ElectricVehicle_Endtimes"),
            estimate_key: Some(format!("end_s{p}d{p}")),
            real_key: RealKey::EndSinceWindow,
            rounding: Rounding::Down,
            static_default: END_DEFAULT,
        });
        files.push(SessionFileSpec {
            file_stem: format!("{prefix}s{p}_ElectricVehicle_Starttimes"),
            estimate_key: Some(format!("s{p}")),
            real_key: RealKey::StartSinceWindow,
            rounding: Rounding::Up,
            static_default: START_DEFAULT,
        });
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowConfig;
    use crate::filter::{clean_sessions, online_estimate_end};
    use crate::parser::{RawSession, SessionSource};
    use crate::stats::CarStatsTable;

    fn sessions(specs: &[(&str, &str, &str, f64)]) -> Vec<Session> {
        let raw = specs
            .iter()
            .enumerate()
            .map(|(i, (card, start, end, kwh))| RawSession {
                transaction: i as i64,
                chargepoint_id: "CP".to_string(),
                card_id: card.to_string(),
                start: start.parse().unwrap(),
                end: end.parse().unwrap(),
                energy_kwh: *kwh,
                utc_offset_hours: 2,
                source: SessionSource::OcpiExport,
            })
            .collect();
        clean_sessions(raw, &WindowConfig::default(), (100_000.0, 7_400.0))
    }

    fn trained_table(data: &[Session]) -> CarStatsTable {
        let mut table = CarStatsTable::from_sessions(data);
        table.energy_stats(data, Some(&[0, 50, 100]));
        table.start_time_stats(data, Some(&[0, 50, 100]));
        table.end_time_stats(data);
        table.dwell_time_stats(data, 1_800.0, Some(&[0, 50, 100]));
        table.power_estimation(data, 7_400.0, 100_000.0);
        table
    }

    #[test]
    fn test_rounding_format() {
        assert_eq!(Rounding::Up.format(10.1), "11");
        assert_eq!(Rounding::Down.format(10.9), "10");
        assert_eq!(Rounding::Nearest.format(10.5), "11");
        assert_eq!(Rounding::None.format(10.5), "10.5");
        assert_eq!(Rounding::None.format(10.0), "10");
    }

    #[test]
    fn test_group_by_car_keeps_order() {
        let data = sessions(&[
            ("A", "2022-06-01T08:00:00", "2022-06-01T16:00:00", 10.0),
            ("B", "2022-06-01T09:00:00", "2022-06-01T16:00:00", 10.0),
            ("A", "2022-06-02T08:00:00", "2022-06-02T16:00:00", 10.0),
        ]);
        let groups = group_by_car(&data);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "A");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "B");
    }

    #[test]
    fn test_session_file_pair_format() {
        let dir = std::env::temp_dir().join("ev_scenario_test_pair");
        let _ = std::fs::remove_dir_all(&dir);

        let data = sessions(&[
            ("A", "2022-06-01T08:00:00", "2022-06-01T16:00:00", 10.0),
            ("A", "2022-06-02T08:00:00", "2022-06-02T16:00:00", 20.0),
            ("B", "2022-06-01T09:00:00", "2022-06-01T17:00:00", 5.5),
        ]);
        let table = trained_table(&data);

        let writer = ScenarioWriter::new(&dir, &table, &data).unwrap();
        writer
            .write_session_file(&charge_file("T_", Some("energy_mean"), 12_000.0))
            .unwrap();

        let real =
            std::fs::read_to_string(dir.join("T_ElectricVehicle_RequiredCharge_real.txt")).unwrap();
        assert_eq!(real, "0:10000,20000\n1:5500");

        let estimate =
            std::fs::read_to_string(dir.join("T_ElectricVehicle_RequiredCharge_estimate.txt"))
                .unwrap();
        assert_eq!(estimate, "0:15000\n1:5500");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unknown_car_falls_back_to_default() {
        let dir = std::env::temp_dir().join("ev_scenario_test_default");
        let _ = std::fs::remove_dir_all(&dir);

        let training = sessions(&[("A", "2022-06-01T08:00:00", "2022-06-01T16:00:00", 10.0)]);
        let table = trained_table(&training);
        // test day sees a car that never appeared in training
        let test_day = sessions(&[("NEW", "2022-06-09T08:00:00", "2022-06-09T16:00:00", 7.0)]);

        let writer = ScenarioWriter::new(&dir, &table, &test_day).unwrap();
        writer
            .write_session_file(&charge_file("T_", Some("energy_mean"), 12_345.0))
            .unwrap();

        let estimate =
            std::fs::read_to_string(dir.join("T_ElectricVehicle_RequiredCharge_estimate.txt"))
                .unwrap();
        assert_eq!(estimate, "0:12345");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_count_and_end_estimate_lookup() {
        let dir = std::env::temp_dir().join("ev_scenario_test_count");
        let _ = std::fs::remove_dir_all(&dir);

        let training = sessions(&[
            ("A", "2022-06-01T08:00:00", "2022-06-01T16:00:00", 10.0),
            ("A", "2022-06-02T08:00:00", "2022-06-02T14:00:00", 10.0),
        ]);
        let table = trained_table(&training);

        let mut test_day = sessions(&[("A", "2022-06-09T09:00:00", "2022-06-09T15:00:00", 8.0)]);
        online_estimate_end(&mut test_day, &table, 1_800.0, 8.0 * 3600.0);

        let writer = ScenarioWriter::new(&dir, &table, &test_day).unwrap();
        writer.write_session_file(&count_file("T_")).unwrap();
        writer
            .write_session_file(&endtimes_file("T_", Some("end_sreal_d50")))
            .unwrap();

        let count =
            std::fs::read_to_string(dir.join("T_ElectricVehicle_Count_estimate.txt")).unwrap();
        assert_eq!(count, "0:2");

        // median training dwell is 7h; estimate = real start + 7h, floored down
        let end = std::fs::read_to_string(dir.join("T_ElectricVehicle_Endtimes_estimate.txt"))
            .unwrap();
        let expected = (test_day[0].start_since_window + 7.0 * 3600.0).floor() as i64;
        assert_eq!(end, format!("0:{expected}"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_specs_file_format() {
        let dir = std::env::temp_dir().join("ev_scenario_test_specs");
        let _ = std::fs::remove_dir_all(&dir);

        let data = sessions(&[("A", "2022-06-01T08:00:00", "2022-06-01T16:00:00", 10.0)]);
        let table = trained_table(&data);

        let writer = ScenarioWriter::new(&dir, &table, &data).unwrap();
        writer
            .write_specs_file(&specs_file("T_", 100_000.0, 7_400.0))
            .unwrap();

        let real =
            std::fs::read_to_string(dir.join("T_ElectricVehicle_Specs_real.txt")).unwrap();
        assert_eq!(real, "0:100000,7400");
        let estimate =
            std::fs::read_to_string(dir.join("T_ElectricVehicle_Specs_estimate.txt")).unwrap();
        assert_eq!(estimate, "0:100000,7400");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_builtin_scenario_wiring() {
        let scenarios = builtin_scenarios(15_000.0, 100_000.0, 7_400.0);
        assert_eq!(scenarios.len(), 9);

        let c7 = scenarios.iter().find(|s| s.prefix == "C7_").unwrap();
        let charge = &c7.files[1];
        assert_eq!(charge.estimate_key.as_deref(), Some("energy_mean"));
        let ends = &c7.files[2];
        assert_eq!(ends.estimate_key.as_deref(), Some("end_smean_dmean"));

        let c8 = scenarios.iter().find(|s| s.prefix == "C8_").unwrap();
        assert!(c8.files.iter().skip(1).all(|f| f.estimate_key.is_none()));
    }

    #[test]
    fn test_sweep_files_naming() {
        let files = sweep_files("C7_", &[0, 50, 100], 15_000.0);
        assert_eq!(files.len(), 9);
        assert!(files
            .iter()
            .any(|f| f.file_stem == "C7_s50d50_ElectricVehicle_Endtimes"));
        assert!(files
            .iter()
            .any(|f| f.file_stem == "C7_e100_ElectricVehicle_RequiredCharge"));
    }

    #[test]
    fn test_default_config_yields_sweep_family() {
        let config = crate::config::PipelineConfig::default();
        let prefix = config.sweep_case.as_deref().unwrap();
        let files = sweep_files(prefix, &config.sweep_percentiles(), 15_000.0);
        // 21 percentile points, three file families each
        assert_eq!(files.len(), 63);
        assert!(files.iter().all(|f| f.file_stem.starts_with("C7_")));
    }
}
