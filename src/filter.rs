//! Cleaning and normalization of raw charging sessions.
//!
//! This is the one structurally interesting pass of the pipeline: the
//! transaction export stores naive UTC timestamps that must be shifted to
//! Dutch local time across four DST boundaries, card ids from the two
//! channels must be reconciled (the backend sometimes drops the last digit),
//! and near-duplicate sessions appearing in both exports are collapsed.
//! Everything downstream works on the [`Session`] table produced here.

use crate::config::{ManagerFilter, PipelineConfig, WindowConfig};
use crate::parser::{RawSession, SessionSource};
use crate::stats::CarStatsTable;
use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// A cleaned charging session with all derived columns.
#[derive(Debug, Clone)]
pub struct Session {
    pub transaction: i64,
    pub chargepoint_id: String,
    pub card_id: String,
    /// Local (Europe/Amsterdam wall clock) timestamps.
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub energy_kwh: f64,
    pub energy_wh: f64,
    pub dwell_hours: f64,
    pub dwell_seconds: f64,
    /// Time of day as fractional hours, ignoring the date.
    pub start_hours: f64,
    pub end_hours: f64,
    /// Time of day in seconds, ignoring the date.
    pub start_seconds_of_day: f64,
    pub end_seconds_of_day: f64,
    /// Seconds since the start of the filter window. This is the time axis
    /// the simulator input files use.
    pub start_since_window: f64,
    pub end_since_window: f64,
    /// Offset of the source record's timestamps from UTC, in hours.
    pub utc_offset_hours: i64,
    pub average_power_w: f64,
    pub capacity_wh: f64,
    pub max_power_w: f64,
    /// Sessions of this car in the training set; 0 when the car is unknown.
    /// Filled in by [`online_estimate_end`].
    pub training_count: f64,
    /// Estimated end times keyed `end_sreal_d<stat>`, filled in by
    /// [`online_estimate_end`].
    pub end_estimates: BTreeMap<String, f64>,
}

fn boundary(y: i32, mo: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
        .expect("valid DST boundary date")
        .and_hms_opt(1, 0, 0)
        .expect("valid DST boundary time")
}

/// Converts a naive UTC timestamp from the transaction export to Dutch wall
/// clock time. The timestamp is first shifted to CEST (+2h) and then pulled
/// back one hour inside each winter (CET) range. The corrections are applied
/// in sequence on the already-shifted value, which is how the source data
/// was originally repaired; the ranges are kept verbatim, including the
/// 2021-03-21 boundary.
pub fn utc_to_local(ts: NaiveDateTime) -> NaiveDateTime {
    let mut t = ts + Duration::hours(2);
    if t < boundary(2020, 3, 29) {
        t -= Duration::hours(1);
    }
    if t > boundary(2020, 10, 25) && t <= boundary(2021, 3, 21) {
        t -= Duration::hours(1);
    }
    if t > boundary(2021, 10, 31) && t <= boundary(2022, 3, 27) {
        t -= Duration::hours(1);
    }
    if t >= boundary(2022, 10, 30) {
        t -= Duration::hours(1);
    }
    t
}

/// Card ids are compared on symbols only; separators and masking characters
/// differ between the two exports.
pub fn normalize_card_id(id: &str) -> String {
    id.replace(['-', '*'], "")
}

fn seconds_of_day(ts: NaiveDateTime) -> f64 {
    (ts.hour() * 3600 + ts.minute() * 60 + ts.second()) as f64
}

/// Merges the two export channels into one cleaned table: local-time
/// correction, card-id normalization and trailing-digit repair, transaction
/// dedup, and all derived columns relative to `window.after_start`.
///
/// The returned table is unfiltered; apply [`apply_filters`] for a specific
/// selection. `clean_sessions` plus `apply_filters` together correspond to
/// one pass of the original filter stage.
pub fn clean_sessions(
    raw: Vec<RawSession>,
    window: &WindowConfig,
    defaults: (f64, f64),
) -> Vec<Session> {
    let (capacity_wh, power_w) = defaults;

    let mut cleaned: Vec<(RawSession, NaiveDateTime, NaiveDateTime)> = raw
        .into_iter()
        .map(|mut s| {
            s.card_id = normalize_card_id(&s.card_id);
            let (start, end) = match s.source {
                SessionSource::TransactionExport => (utc_to_local(s.start), utc_to_local(s.end)),
                SessionSource::OcpiExport => (s.start, s.end),
            };
            (s, start, end)
        })
        .collect();

    // Trailing-digit repair: if some id equals another id minus its last
    // character, the shorter one is the truncated form of the longer.
    let ids: HashSet<String> = cleaned.iter().map(|(s, _, _)| s.card_id.clone()).collect();
    for id in &ids {
        if id.len() < 2 {
            continue;
        }
        let short = &id[..id.len() - 1];
        if ids.contains(short) {
            for (s, _, _) in cleaned.iter_mut() {
                if s.card_id == *short {
                    s.card_id = id.clone();
                }
            }
        }
    }

    // Duplicate sessions show up in both exports under the same transaction
    // id; keep the first occurrence.
    let mut seen = HashSet::new();
    cleaned.retain(|(s, _, _)| seen.insert(s.transaction));

    let sessions: Vec<Session> = cleaned
        .into_iter()
        .map(|(s, start, end)| {
            let dwell_seconds = (end - start).num_seconds() as f64;
            let dwell_hours = dwell_seconds / 3600.0;
            let energy_wh = s.energy_kwh * 1000.0;
            Session {
                transaction: s.transaction,
                chargepoint_id: s.chargepoint_id,
                card_id: s.card_id,
                start,
                end,
                energy_kwh: s.energy_kwh,
                energy_wh,
                dwell_hours,
                dwell_seconds,
                start_hours: seconds_of_day(start) / 3600.0,
                end_hours: seconds_of_day(end) / 3600.0,
                start_seconds_of_day: seconds_of_day(start),
                end_seconds_of_day: seconds_of_day(end),
                start_since_window: (start - window.after_start).num_seconds() as f64,
                end_since_window: (end - window.after_start).num_seconds() as f64,
                utc_offset_hours: s.utc_offset_hours,
                average_power_w: energy_wh / dwell_hours,
                capacity_wh,
                max_power_w: power_w,
                training_count: 0.0,
                end_estimates: BTreeMap::new(),
            }
        })
        .collect();

    debug!(rows = sessions.len(), "Sessions cleaned and deduplicated");
    sessions
}

/// Applies the configured selection filters and sorts by start time within
/// the window.
pub fn apply_filters(
    mut sessions: Vec<Session>,
    window: &WindowConfig,
    managers: &ManagerFilter,
    excluded_card_ids: &[String],
) -> Vec<Session> {
    let before = sessions.len();

    sessions.retain(|s| s.start >= window.after_start && s.start <= window.before_end);
    sessions.retain(|s| s.energy_kwh >= window.energy_cutoff_kwh);
    if let Some(max_dwell) = window.max_dwell_hours {
        sessions.retain(|s| s.dwell_hours <= max_dwell);
    }
    if let Some(min_dwell) = window.min_dwell_hours {
        sessions.retain(|s| s.dwell_hours >= min_dwell);
    }
    if !window.overnight_stays {
        sessions.retain(|s| s.start.date() == s.end.date());
    }
    for id in excluded_card_ids {
        sessions.retain(|s| s.card_id != *id);
    }
    match managers.exclude {
        Some(true) => {
            sessions.retain(|s| !managers.chargepoints.contains(&s.chargepoint_id));
        }
        Some(false) => {
            sessions.retain(|s| managers.chargepoints.contains(&s.chargepoint_id));
        }
        None => {}
    }

    sessions.sort_by(|a, b| {
        a.start_since_window
            .partial_cmp(&b.start_since_window)
            .expect("start offsets are finite")
    });

    info!(
        kept = sessions.len(),
        filtered = before - sessions.len(),
        "Session filters applied"
    );
    sessions
}

/// Reads both exports and cleans them, without selection filters.
pub fn load_cleaned(config: &PipelineConfig, window: &WindowConfig) -> Result<Vec<Session>> {
    let mut raw = crate::parser::read_transaction_export(&config.transaction_file)?;
    raw.extend(crate::parser::read_ocpi_export(&config.ocpi_file)?);

    Ok(clean_sessions(
        raw,
        window,
        (config.default_capacity_wh, config.default_power_w),
    ))
}

/// Convenience wrapper: read both exports, clean, filter.
pub fn load_filtered(config: &PipelineConfig, window: &WindowConfig) -> Result<Vec<Session>> {
    let cleaned = load_cleaned(config, window)?;
    Ok(apply_filters(
        cleaned,
        window,
        &config.manager_filter,
        &config.excluded_card_ids,
    ))
}

const END_ESTIMATE_ASPECTS: [&str; 6] = ["mean", "max", "min", "75", "50", "25"];

/// Attaches online end-time estimates to each session: the real start plus a
/// per-car historical dwell statistic (falling back to `dwell_default` for
/// unknown cars), floored at `dwell_default` so no estimate lands inside a
/// single planning interval. Also records the constant-dwell estimates and
/// the training session count per car.
pub fn online_estimate_end(
    sessions: &mut [Session],
    stats: &CarStatsTable,
    dwell_default: f64,
    constant: f64,
) {
    for s in sessions.iter_mut() {
        let car = stats.get(&s.card_id);
        s.training_count = car.map(|c| c.count as f64).unwrap_or(0.0);

        for aspect in END_ESTIMATE_ASPECTS {
            let dwell = car
                .and_then(|c| c.value(&format!("dwell_time_{aspect}")))
                .unwrap_or(dwell_default)
                .max(dwell_default);
            s.end_estimates
                .insert(format!("end_sreal_d{aspect}"), s.start_since_window + dwell);
        }
        s.end_estimates.insert(
            "end_sreal_dconstant_sinceStart".to_string(),
            s.start_since_window + constant,
        );
        s.end_estimates.insert(
            "end_sreal_dconstant_sinceMidnight".to_string(),
            s.start_seconds_of_day + constant,
        );
    }
}
