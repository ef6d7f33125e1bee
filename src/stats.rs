//! Per-vehicle descriptive statistics.
//!
//! Each unique card id gets a [`CarStats`] record: describe-style summaries
//! (count, mean, std, min, quartiles, max) over energy, start time, end time
//! and dwell time, optional percentile sweeps, empirical CDFs, and derived
//! end-time estimates combining start and dwell statistics. Downstream the
//! scenario generator looks these up by string key, falling back to a static
//! default for cars without history.

use crate::filter::Session;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Arithmetic mean. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (ddof = 1). Undefined for fewer than two
/// samples.
pub fn sample_stddev(values: &[f64], mean: f64) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Linear-interpolation percentile over unsorted samples, `p` in 0..=100.
/// Percentile 0 is the minimum and 100 the maximum.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    assert!(!values.is_empty(), "percentile of empty sample");
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite samples"));

    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Empirical cumulative distribution function over a fixed sample.
#[derive(Debug, Clone, Default)]
pub struct Ecdf {
    sorted: Vec<f64>,
}

impl Ecdf {
    pub fn from_samples(values: &[f64]) -> Self {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite samples"));
        Self { sorted }
    }

    /// P(sample <= x).
    pub fn eval(&self, x: f64) -> f64 {
        if self.sorted.is_empty() {
            return 0.0;
        }
        let n = self.sorted.partition_point(|v| *v <= x);
        n as f64 / self.sorted.len() as f64
    }

    pub fn support(&self) -> &[f64] {
        &self.sorted
    }
}

/// Statistics for one vehicle (proxied by card id). Keyed values hold the
/// describe stats (`energy_mean`, `start_time_50`, ...), sweep percentiles
/// (`e5`, `s50`, `d100`), and derived end times (`end_smean_dmean`,
/// `end_s25d75`).
#[derive(Debug, Clone)]
pub struct CarStats {
    pub card_id: String,
    pub count: usize,
    values: BTreeMap<String, f64>,
    pub energy_ecdf: Ecdf,
    pub start_time_ecdf: Ecdf,
    pub end_time_ecdf: Ecdf,
    pub dwell_time_ecdf: Ecdf,
}

impl CarStats {
    pub fn value(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    fn insert(&mut self, key: String, value: f64) {
        self.values.insert(key, value);
    }
}

/// The per-vehicle statistics table, in order of first appearance in the
/// session data.
#[derive(Debug, Clone, Default)]
pub struct CarStatsTable {
    cars: Vec<CarStats>,
    index: HashMap<String, usize>,
}

const DESCRIBE_ASPECTS: [&str; 6] = ["mean", "max", "min", "75", "50", "25"];

impl CarStatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes one record per unique card id.
    pub fn from_sessions(sessions: &[Session]) -> Self {
        let mut table = Self::new();
        for s in sessions {
            if !table.index.contains_key(&s.card_id) {
                table.index.insert(s.card_id.clone(), table.cars.len());
                table.cars.push(CarStats {
                    card_id: s.card_id.clone(),
                    count: 0,
                    values: BTreeMap::new(),
                    energy_ecdf: Ecdf::default(),
                    start_time_ecdf: Ecdf::default(),
                    end_time_ecdf: Ecdf::default(),
                    dwell_time_ecdf: Ecdf::default(),
                });
            }
            let idx = table.index[&s.card_id];
            table.cars[idx].count += 1;
        }
        debug!(cars = table.cars.len(), "Car statistics table initialized");
        table
    }

    pub fn get(&self, card_id: &str) -> Option<&CarStats> {
        self.index.get(card_id).map(|i| &self.cars[*i])
    }

    pub fn cars(&self) -> &[CarStats] {
        &self.cars
    }

    pub fn len(&self) -> usize {
        self.cars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }

    fn per_car_samples<F: Fn(&Session) -> f64>(
        &self,
        sessions: &[Session],
        extract: F,
    ) -> Vec<Vec<f64>> {
        let mut samples = vec![Vec::new(); self.cars.len()];
        for s in sessions {
            if let Some(&idx) = self.index.get(&s.card_id) {
                samples[idx].push(extract(s));
            }
        }
        samples
    }

    fn describe(&mut self, samples: &[Vec<f64>], prefix: &str) {
        for (car, values) in self.cars.iter_mut().zip(samples) {
            if values.is_empty() {
                continue;
            }
            let m = mean(values);
            car.insert(format!("{prefix}_mean"), m);
            if let Some(sd) = sample_stddev(values, m) {
                car.insert(format!("{prefix}_std"), sd);
            }
            car.insert(format!("{prefix}_min"), percentile(values, 0.0));
            car.insert(format!("{prefix}_25"), percentile(values, 25.0));
            car.insert(format!("{prefix}_50"), percentile(values, 50.0));
            car.insert(format!("{prefix}_75"), percentile(values, 75.0));
            car.insert(format!("{prefix}_max"), percentile(values, 100.0));
        }
    }

    fn sweep(&mut self, samples: &[Vec<f64>], key_prefix: &str, percentiles: &[u32]) {
        for (car, values) in self.cars.iter_mut().zip(samples) {
            if values.is_empty() {
                continue;
            }
            for &p in percentiles {
                car.insert(
                    format!("{key_prefix}{p}"),
                    percentile(values, f64::from(p.min(100))),
                );
            }
        }
    }

    /// Energy demand stats per car (Wh), plus the `e{p}` sweep percentiles
    /// and the per-car energy ECDF (kWh, matching the source figures).
    pub fn energy_stats(&mut self, sessions: &[Session], percentiles: Option<&[u32]>) {
        let samples = self.per_car_samples(sessions, |s| s.energy_wh);
        self.describe(&samples, "energy");
        if let Some(p) = percentiles {
            self.sweep(&samples, "e", p);
        }
        let kwh = self.per_car_samples(sessions, |s| s.energy_kwh);
        for (car, values) in self.cars.iter_mut().zip(&kwh) {
            car.energy_ecdf = Ecdf::from_samples(values);
        }
    }

    /// Start-of-charge stats per car, seconds of day, plus the `s{p}` sweep.
    pub fn start_time_stats(&mut self, sessions: &[Session], percentiles: Option<&[u32]>) {
        let samples = self.per_car_samples(sessions, |s| s.start_seconds_of_day);
        self.describe(&samples, "start_time");
        if let Some(p) = percentiles {
            self.sweep(&samples, "s", p);
        }
        let hours = self.per_car_samples(sessions, |s| s.start_hours);
        for (car, values) in self.cars.iter_mut().zip(&hours) {
            car.start_time_ecdf = Ecdf::from_samples(values);
        }
    }

    /// End-of-charge stats per car, seconds of day.
    pub fn end_time_stats(&mut self, sessions: &[Session]) {
        let samples = self.per_car_samples(sessions, |s| s.end_seconds_of_day);
        self.describe(&samples, "end_time");
        let hours = self.per_car_samples(sessions, |s| s.end_hours);
        for (car, values) in self.cars.iter_mut().zip(&hours) {
            car.end_time_ecdf = Ecdf::from_samples(values);
        }
    }

    /// Dwell time stats per car in seconds, the `d{p}` sweep, and the
    /// derived end-time keys: `end_s{a}_d{b}` over the describe aspects and
    /// `end_s{p}d{q}` over the sweep percentiles. Dwell statistics below
    /// `dwell_floor` seconds are raised to it before deriving end times.
    ///
    /// Requires start-time stats to be present.
    pub fn dwell_time_stats(
        &mut self,
        sessions: &[Session],
        dwell_floor: f64,
        percentiles: Option<&[u32]>,
    ) {
        let samples = self.per_car_samples(sessions, |s| s.dwell_seconds);
        self.describe(&samples, "dwell_time");
        if let Some(p) = percentiles {
            self.sweep(&samples, "d", p);
        }
        let hours = self.per_car_samples(sessions, |s| s.dwell_hours);
        for (car, values) in self.cars.iter_mut().zip(&hours) {
            car.dwell_time_ecdf = Ecdf::from_samples(values);
        }

        for car in self.cars.iter_mut() {
            for (a, b) in DESCRIBE_ASPECTS
                .iter()
                .flat_map(|a| DESCRIBE_ASPECTS.iter().map(move |b| (*a, *b)))
            {
                let (Some(start), Some(dwell)) = (
                    car.value(&format!("start_time_{a}")),
                    car.value(&format!("dwell_time_{b}")),
                ) else {
                    continue;
                };
                car.insert(format!("end_s{a}_d{b}"), start + dwell.max(dwell_floor));
            }

            if let Some(percentiles) = percentiles {
                for &p in percentiles {
                    for &q in percentiles {
                        let (Some(start), Some(dwell)) =
                            (car.value(&format!("s{p}")), car.value(&format!("d{q}")))
                        else {
                            continue;
                        };
                        car.insert(format!("end_s{p}d{q}"), start + dwell.max(dwell_floor));
                    }
                }
            }
        }
    }

    /// Per-car maximum-power estimate: the largest average session power,
    /// floored at the default. Also records the default specs under the
    /// `capacity` / `maxPower` keys the scenario spec files read.
    pub fn power_estimation(&mut self, sessions: &[Session], power_default: f64, capacity_default: f64) {
        let samples = self.per_car_samples(sessions, |s| s.average_power_w);
        for (car, values) in self.cars.iter_mut().zip(&samples) {
            let max_average = values.iter().copied().fold(f64::MIN, f64::max);
            car.insert("power_max_average_W".to_string(), power_default.max(max_average));
            car.insert("power_default".to_string(), power_default);
            car.insert("capacity_default".to_string(), capacity_default);
            car.insert("capacity".to_string(), capacity_default);
            car.insert("maxPower".to_string(), power_default);
        }
    }

    /// Mean of the per-car mean energies, rounded to the nearest Wh. Used as
    /// the static default for cars without history.
    pub fn global_energy_average(&self) -> f64 {
        let means: Vec<f64> = self
            .cars
            .iter()
            .filter_map(|c| c.value("energy_mean"))
            .collect();
        mean(&means).round()
    }

    /// The `n` cars with the most sessions, most frequent first.
    pub fn top_by_count(&self, n: usize) -> Vec<&CarStats> {
        let mut sorted: Vec<&CarStats> = self.cars.iter().collect();
        sorted.sort_by(|a, b| b.count.cmp(&a.count));
        sorted.truncate(n);
        sorted
    }
}

/// Column labels of [`correlation_matrix`].
pub const CORRELATION_COLUMNS: [&str; 4] =
    ["total_energy", "start_hours", "end_hours", "dwell_hours"];

/// Pearson correlation matrix over energy, start, end and dwell.
pub fn correlation_matrix(sessions: &[Session]) -> [[f64; 4]; 4] {
    let columns: [Vec<f64>; 4] = [
        sessions.iter().map(|s| s.energy_kwh).collect(),
        sessions.iter().map(|s| s.start_hours).collect(),
        sessions.iter().map(|s| s.end_hours).collect(),
        sessions.iter().map(|s| s.dwell_hours).collect(),
    ];
    let mut out = [[0.0; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            out[i][j] = pearson(&columns[i], &columns[j]);
        }
    }
    out
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let ma = mean(a);
    let mb = mean(b);
    let cov: f64 = a.iter().zip(b).map(|(x, y)| (x - ma) * (y - mb)).sum();
    let va: f64 = a.iter().map(|x| (x - ma).powi(2)).sum::<f64>().sqrt();
    let vb: f64 = b.iter().map(|y| (y - mb).powi(2)).sum::<f64>().sqrt();
    if va == 0.0 || vb == 0.0 {
        return f64::NAN;
    }
    cov / (va * vb)
}
