//! Energy and energy-not-served measures over retrieved simulation series.

use crate::stats::CarStatsTable;
use anyhow::Result;
use csv::WriterBuilder;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use super::{agg_plan_key, agg_real_key, car_plan_key, car_real_key};

/// All series retrieved for one evaluation run, keyed
/// `<case><field>_<component>`.
#[derive(Debug, Clone, Default)]
pub struct SimulationData {
    series: BTreeMap<String, Vec<f64>>,
}

impl SimulationData {
    pub fn insert(&mut self, key: String, values: Vec<f64>) {
        self.series.insert(key, values);
    }

    pub fn get(&self, key: &str) -> Option<&[f64]> {
        self.series.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Energy in Wh over a quarter-hourly power series, rounded to 5
    /// decimals. NaN when the series is absent.
    fn energy(&self, key: &str) -> f64 {
        match self.series.get(key) {
            Some(values) => {
                let wh = values.iter().sum::<f64>() / 4.0;
                (wh * 1e5).round() / 1e5
            }
            None => f64::NAN,
        }
    }

    fn peak(&self, key: &str) -> f64 {
        self.series
            .get(key)
            .map(|v| v.iter().copied().fold(f64::MIN, f64::max))
            .unwrap_or(f64::NAN)
    }
}

/// Per-car energy and energy-not-served measures for one case.
#[derive(Debug, Clone)]
pub struct CarCaseMeasures {
    pub card_id: String,
    /// Energy served in the realization, Wh.
    pub e_real: f64,
    /// Energy served in the offline plan, Wh.
    pub e_plan: f64,
    /// Realized ENS versus the base case, clamped at zero.
    pub ens_real_abs: f64,
    pub ens_real_relative: f64,
    /// Planned ENS versus the base case, clamped at zero.
    pub ens_plan_abs: f64,
    pub ens_plan_relative: f64,
    /// ENS of the realization versus the case's own plan, clamped at zero.
    pub ens_case_internal_abs: f64,
    pub ens_case_internal_relative: f64,
}

/// Fleet-level aggregates for one case.
#[derive(Debug, Clone)]
pub struct GlobalMeasures {
    /// Per ENS measure name: (sum, average, max, min) over cars.
    pub ens: Vec<(String, [f64; 4])>,
    pub power_peak_real: f64,
    pub power_peak_real_vs_base_abs: f64,
    pub power_peak_real_vs_base_rel: f64,
    pub power_peak_plan: f64,
    pub power_peak_plan_vs_base_abs: f64,
    pub power_peak_plan_vs_base_rel: f64,
    /// Aggregated fleet energy, Wh.
    pub e_real_agg: f64,
    pub e_plan_agg: f64,
}

#[derive(Debug, Clone)]
pub struct CaseMeasures {
    pub case: String,
    pub cars: Vec<CarCaseMeasures>,
    pub global: GlobalMeasures,
}

fn clamped(v: f64) -> f64 {
    if v < 0.0 { 0.0 } else { v }
}

/// Computes per-car and global measures for every case. Car indices follow
/// the statistics table order, matching the scenario input file lines.
pub fn evaluate_cases(
    data: &SimulationData,
    stats: &CarStatsTable,
    cases: &[String],
    base_case: &str,
) -> Vec<CaseMeasures> {
    let base_real: Vec<f64> = (0..stats.len())
        .map(|ev| data.energy(&car_real_key(base_case, ev)))
        .collect();
    let base_peak = data.peak(&agg_real_key(base_case));

    cases
        .iter()
        .map(|case| {
            let cars: Vec<CarCaseMeasures> = stats
                .cars()
                .iter()
                .enumerate()
                .map(|(ev, car)| {
                    let e_real = data.energy(&car_real_key(case, ev));
                    let e_plan = data.energy(&car_plan_key(case, ev));
                    if e_plan.is_nan() {
                        warn!(case, ev, "No planned power series for vehicle");
                    }

                    let ens_real_abs = clamped(base_real[ev] - e_real);
                    let ens_plan_abs = clamped(base_real[ev] - e_plan);
                    let ens_case_internal_abs = clamped(e_plan - e_real);
                    CarCaseMeasures {
                        card_id: car.card_id.clone(),
                        e_real,
                        e_plan,
                        ens_real_abs,
                        ens_real_relative: ens_real_abs / base_real[ev],
                        ens_plan_abs,
                        ens_plan_relative: ens_plan_abs / base_real[ev],
                        ens_case_internal_abs,
                        ens_case_internal_relative: ens_case_internal_abs / e_plan,
                    }
                })
                .collect();

            let global = global_measures(data, case, &cars, base_peak);
            CaseMeasures {
                case: case.clone(),
                cars,
                global,
            }
        })
        .collect()
}

const ENS_MEASURES: [&str; 6] = [
    "ENSrealAbs",
    "ENSrealRelative",
    "ENSplanAbs",
    "ENSplanRelative",
    "ENScaseInternalAbs",
    "ENScaseInternalRelative",
];

fn global_measures(
    data: &SimulationData,
    case: &str,
    cars: &[CarCaseMeasures],
    base_peak: f64,
) -> GlobalMeasures {
    let columns: [Vec<f64>; 6] = [
        cars.iter().map(|c| c.ens_real_abs).collect(),
        cars.iter().map(|c| c.ens_real_relative).collect(),
        cars.iter().map(|c| c.ens_plan_abs).collect(),
        cars.iter().map(|c| c.ens_plan_relative).collect(),
        cars.iter().map(|c| c.ens_case_internal_abs).collect(),
        cars.iter().map(|c| c.ens_case_internal_relative).collect(),
    ];

    let ens = ENS_MEASURES
        .iter()
        .zip(&columns)
        .map(|(name, values)| {
            let sum: f64 = values.iter().sum();
            let max = values.iter().copied().fold(f64::MIN, f64::max);
            let min = values.iter().copied().fold(f64::MAX, f64::min);
            (
                name.to_string(),
                [sum, sum / values.len().max(1) as f64, max, min],
            )
        })
        .collect();

    let peak_real = data.peak(&agg_real_key(case));
    let peak_plan = data.peak(&agg_plan_key(case));

    GlobalMeasures {
        ens,
        power_peak_real: peak_real,
        power_peak_real_vs_base_abs: base_peak - peak_real,
        power_peak_real_vs_base_rel: peak_real / base_peak,
        power_peak_plan: peak_plan,
        power_peak_plan_vs_base_abs: base_peak - peak_plan,
        power_peak_plan_vs_base_rel: peak_plan / base_peak,
        e_real_agg: data.energy(&agg_real_key(case)),
        e_plan_agg: data.energy(&agg_plan_key(case)),
    }
}

/// Writes every retrieved series as one CSV row, `key,v1,v2,...`.
pub fn write_timeseries<P: AsRef<Path>>(path: P, data: &SimulationData) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new().flexible(true).from_path(path)?;
    for (key, values) in &data.series {
        let mut row = vec![key.clone()];
        row.extend(values.iter().map(f64::to_string));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    info!(path = %path.display(), series = data.series.len(), "Time series written");
    Ok(())
}

/// Writes the per-car measures, one row per car per case.
pub fn write_car_measures<P: AsRef<Path>>(path: P, measures: &[CaseMeasures]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record([
        "case",
        "car",
        "card_id",
        "eReal",
        "ePlan",
        "ENSrealAbs",
        "ENSrealRelative",
        "ENSplanAbs",
        "ENSplanRelative",
        "ENScaseInternalAbs",
        "ENScaseInternalRelative",
    ])?;
    for case in measures {
        for (ev, car) in case.cars.iter().enumerate() {
            writer.write_record([
                case.case.clone(),
                ev.to_string(),
                car.card_id.clone(),
                car.e_real.to_string(),
                car.e_plan.to_string(),
                car.ens_real_abs.to_string(),
                car.ens_real_relative.to_string(),
                car.ens_plan_abs.to_string(),
                car.ens_plan_relative.to_string(),
                car.ens_case_internal_abs.to_string(),
                car.ens_case_internal_relative.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    info!(path = %path.display(), cases = measures.len(), "Per-car measures written");
    Ok(())
}

/// Writes the global aggregates, one row per case.
pub fn write_global_measures<P: AsRef<Path>>(path: P, measures: &[CaseMeasures]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new().from_path(path)?;

    let mut header = vec!["case".to_string()];
    for name in ENS_MEASURES {
        for aspect in ["sum", "average", "max", "min"] {
            header.push(format!("{name}_{aspect}"));
        }
    }
    header.extend(
        [
            "powerPeakReal",
            "powerPeakReal_vsBaseAbs",
            "powerPeakReal_vsBaseRel",
            "powerPeakPlan",
            "powerPeakPlan_vsBaseAbs",
            "powerPeakPlan_vsBaseRel",
            "eRealAgg",
            "ePlanAgg",
        ]
        .map(String::from),
    );
    writer.write_record(&header)?;

    for case in measures {
        let g = &case.global;
        let mut row = vec![case.case.clone()];
        for (_, aspects) in &g.ens {
            row.extend(aspects.iter().map(f64::to_string));
        }
        row.extend(
            [
                g.power_peak_real,
                g.power_peak_real_vs_base_abs,
                g.power_peak_real_vs_base_rel,
                g.power_peak_plan,
                g.power_peak_plan_vs_base_abs,
                g.power_peak_plan_vs_base_rel,
                g.e_real_agg,
                g.e_plan_agg,
            ]
            .map(|v| v.to_string()),
        );
        writer.write_record(&row)?;
    }
    writer.flush()?;
    info!(path = %path.display(), cases = measures.len(), "Global measures written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowConfig;
    use crate::filter::clean_sessions;
    use crate::parser::{RawSession, SessionSource};

    fn stats_for(cards: &[&str]) -> CarStatsTable {
        let raw = cards
            .iter()
            .enumerate()
            .map(|(i, card)| RawSession {
                transaction: i as i64,
                chargepoint_id: "CP".to_string(),
                card_id: card.to_string(),
                start: "2022-06-01T08:00:00".parse().unwrap(),
                end: "2022-06-01T16:00:00".parse().unwrap(),
                energy_kwh: 10.0,
                utc_offset_hours: 2,
                source: SessionSource::OcpiExport,
            })
            .collect();
        let sessions = clean_sessions(raw, &WindowConfig::default(), (100_000.0, 7_400.0));
        CarStatsTable::from_sessions(&sessions)
    }

    fn flat_series(power: f64, steps: usize) -> Vec<f64> {
        vec![power; steps]
    }

    fn sample_data(base: &str, case: &str) -> SimulationData {
        let mut data = SimulationData::default();
        // base case: 4 intervals at 4 kW -> 4 kWh real
        data.insert(car_real_key(base, 0), flat_series(4_000.0, 4));
        data.insert(car_plan_key(base, 0), flat_series(4_000.0, 4));
        data.insert(agg_real_key(base), flat_series(4_000.0, 4));
        data.insert(agg_plan_key(base), flat_series(4_000.0, 4));
        // case: realized 3 kWh, planned 3.5 kWh
        data.insert(car_real_key(case, 0), flat_series(3_000.0, 4));
        data.insert(car_plan_key(case, 0), flat_series(3_500.0, 4));
        data.insert(agg_real_key(case), flat_series(3_000.0, 4));
        data.insert(agg_plan_key(case), flat_series(3_500.0, 4));
        data
    }

    #[test]
    fn test_energy_quarter_hour_sum() {
        let mut data = SimulationData::default();
        data.insert("k".to_string(), vec![1_000.0, 2_000.0, 3_000.0, 2_000.0]);
        assert_eq!(data.energy("k"), 2_000.0);
        assert!(data.energy("missing").is_nan());
    }

    #[test]
    fn test_ens_measures() {
        let data = sample_data("C0_", "C7_");
        let stats = stats_for(&["A"]);
        let cases = vec!["C0_".to_string(), "C7_".to_string()];
        let measures = evaluate_cases(&data, &stats, &cases, "C0_");

        let c7 = &measures[1].cars[0];
        assert_eq!(c7.e_real, 3_000.0);
        assert_eq!(c7.e_plan, 3_500.0);
        assert_eq!(c7.ens_real_abs, 1_000.0);
        assert_eq!(c7.ens_real_relative, 0.25);
        assert_eq!(c7.ens_plan_abs, 500.0);
        assert_eq!(c7.ens_case_internal_abs, 500.0);
        assert!((c7.ens_case_internal_relative - 500.0 / 3_500.0).abs() < 1e-12);

        // base case compared to itself is all zero
        let c0 = &measures[0].cars[0];
        assert_eq!(c0.ens_real_abs, 0.0);
        assert_eq!(c0.ens_plan_abs, 0.0);
    }

    #[test]
    fn test_ens_clamped_at_zero() {
        let mut data = sample_data("C0_", "C7_");
        // case serves more than the base: ENS must clamp to 0, not go negative
        data.insert(car_real_key("C7_", 0), flat_series(5_000.0, 4));
        let stats = stats_for(&["A"]);
        let cases = vec!["C7_".to_string()];
        let measures = evaluate_cases(&data, &stats, &cases, "C0_");
        assert_eq!(measures[0].cars[0].ens_real_abs, 0.0);
    }

    #[test]
    fn test_global_power_peaks() {
        let data = sample_data("C0_", "C7_");
        let stats = stats_for(&["A"]);
        let cases = vec!["C7_".to_string()];
        let measures = evaluate_cases(&data, &stats, &cases, "C0_");

        let g = &measures[0].global;
        assert_eq!(g.power_peak_real, 3_000.0);
        assert_eq!(g.power_peak_real_vs_base_abs, 1_000.0);
        assert_eq!(g.power_peak_real_vs_base_rel, 0.75);
        assert_eq!(g.e_real_agg, 3_000.0);
        assert_eq!(g.e_plan_agg, 3_500.0);
    }

    #[test]
    fn test_global_ens_aggregates() {
        let data = sample_data("C0_", "C7_");
        let stats = stats_for(&["A"]);
        let cases = vec!["C7_".to_string()];
        let measures = evaluate_cases(&data, &stats, &cases, "C0_");

        let (name, aspects) = &measures[0].global.ens[0];
        assert_eq!(name, "ENSrealAbs");
        // single car: sum = average = max = min
        assert_eq!(aspects, &[1_000.0, 1_000.0, 1_000.0, 1_000.0]);
    }

    #[test]
    fn test_write_outputs() {
        let dir = std::env::temp_dir();
        let ts = dir.join("ev_results_test_ts.csv");
        let global = dir.join("ev_results_test_global.csv");

        let data = sample_data("C0_", "C7_");
        let stats = stats_for(&["A"]);
        let cases = vec!["C0_".to_string(), "C7_".to_string()];
        let measures = evaluate_cases(&data, &stats, &cases, "C0_");

        write_timeseries(&ts, &data).unwrap();
        write_global_measures(&global, &measures).unwrap();

        let ts_content = std::fs::read_to_string(&ts).unwrap();
        assert_eq!(ts_content.lines().count(), 8);
        let global_content = std::fs::read_to_string(&global).unwrap();
        assert!(global_content.starts_with("case,ENSrealAbs_sum"));
        assert_eq!(global_content.lines().count(), 3);

        std::fs::remove_file(&ts).unwrap();
        std::fs::remove_file(&global).unwrap();
    }
}
