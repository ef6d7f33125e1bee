//! CSV persistence for cleaned sessions and per-car statistics.

use anyhow::Result;
use tracing::{debug, info};

use crate::filter::Session;
use crate::stats::{CORRELATION_COLUMNS, CarStats, CarStatsTable};
use csv::WriterBuilder;
use std::collections::BTreeSet;
use std::path::Path;

/// Writes the cleaned session table to a CSV file, one row per session with
/// all derived columns.
pub fn write_sessions<P: AsRef<Path>>(path: P, sessions: &[Session]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new().from_path(path)?;

    writer.write_record([
        "transaction",
        "chargepoint_id",
        "card_id",
        "start",
        "end",
        "total_energy_kWh",
        "total_energy_Wh",
        "dwell_hours",
        "dwell_seconds",
        "start_hours",
        "end_hours",
        "start_seconds_of_day",
        "end_seconds_of_day",
        "start_since_window",
        "end_since_window",
        "start_utc_offset",
        "average_power_W",
    ])?;
    for s in sessions {
        writer.write_record([
            s.transaction.to_string(),
            s.chargepoint_id.clone(),
            s.card_id.clone(),
            s.start.format("%Y-%m-%d %H:%M:%S").to_string(),
            s.end.format("%Y-%m-%d %H:%M:%S").to_string(),
            s.energy_kwh.to_string(),
            s.energy_wh.to_string(),
            s.dwell_hours.to_string(),
            s.dwell_seconds.to_string(),
            s.start_hours.to_string(),
            s.end_hours.to_string(),
            s.start_seconds_of_day.to_string(),
            s.end_seconds_of_day.to_string(),
            s.start_since_window.to_string(),
            s.end_since_window.to_string(),
            s.utc_offset_hours.to_string(),
            s.average_power_w.to_string(),
        ])?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = sessions.len(), "Session table written");
    Ok(())
}

/// Writes the per-car statistics table to a CSV file. The column set is the
/// union of keys over all cars; cars missing a key get an empty cell.
pub fn write_car_stats<P: AsRef<Path>>(path: P, table: &CarStatsTable) -> Result<()> {
    let path = path.as_ref();
    let columns: BTreeSet<&str> = table
        .cars()
        .iter()
        .flat_map(CarStats::keys)
        .collect();

    let mut writer = WriterBuilder::new().from_path(path)?;
    let mut header = vec!["card_id", "count"];
    header.extend(columns.iter());
    writer.write_record(&header)?;

    for car in table.cars() {
        let mut row = vec![car.card_id.clone(), car.count.to_string()];
        for col in &columns {
            row.push(
                car.value(col)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;

    info!(
        path = %path.display(),
        cars = table.len(),
        columns = columns.len() + 2,
        "Car statistics written"
    );
    Ok(())
}

/// Writes the 4x4 Pearson correlation matrix with row and column labels.
pub fn write_correlation<P: AsRef<Path>>(path: P, matrix: &[[f64; 4]; 4]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new().from_path(path)?;

    let mut header = vec![""];
    header.extend(CORRELATION_COLUMNS);
    writer.write_record(&header)?;
    for (label, row) in CORRELATION_COLUMNS.iter().zip(matrix) {
        let mut record = vec![label.to_string()];
        record.extend(row.iter().map(f64::to_string));
        writer.write_record(&record)?;
    }
    writer.flush()?;

    debug!(path = %path.display(), "Correlation matrix written");
    Ok(())
}
