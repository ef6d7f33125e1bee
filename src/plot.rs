//! Figure rendering for the session data, per-car statistics and simulation
//! results.

use crate::filter::Session;
use crate::results::{CaseMeasures, SimulationData};
use crate::stats::{CarStatsTable, Ecdf, percentile};
use anyhow::Result;
use chrono::Datelike;
use plotters::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

const FIGURE_SIZE: (u32, u32) = (1200, 700);
const HISTOGRAM_BINS: usize = 100;

const PALETTE: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

fn histogram_counts(values: &[f64], bins: usize) -> Vec<(f64, usize)> {
    let min = values.iter().copied().fold(f64::MAX, f64::min);
    let max = values.iter().copied().fold(f64::MIN, f64::max);
    if values.is_empty() || min >= max {
        return Vec::new();
    }
    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for &v in values {
        let bin = (((v - min) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, c)| (min + (i as f64 + 0.5) * width, c))
        .collect()
}

/// Histogram of one session column, 100 bins.
pub fn plot_histogram<P: AsRef<Path>>(
    path: P,
    title: &str,
    x_desc: &str,
    values: &[f64],
) -> Result<()> {
    let counts = histogram_counts(values, HISTOGRAM_BINS);
    if counts.is_empty() {
        return Ok(());
    }
    let x_min = counts.first().map(|(c, _)| *c).unwrap_or(0.0);
    let x_max = counts.last().map(|(c, _)| *c).unwrap_or(1.0);
    let y_max = counts.iter().map(|(_, c)| *c).max().unwrap_or(1);
    let bin_width = (x_max - x_min) / counts.len().max(1) as f64;

    let root = BitMapBackend::new(path.as_ref(), FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, 0usize..(y_max + y_max / 10 + 1))?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc("sessions")
        .draw()?;

    chart.draw_series(counts.iter().map(|&(center, count)| {
        Rectangle::new(
            [
                (center - bin_width / 2.0, 0),
                (center + bin_width / 2.0, count),
            ],
            PALETTE[0].filled(),
        )
    }))?;

    root.present()?;
    Ok(())
}

/// Total delivered energy per calendar month, as a bar chart.
pub fn plot_monthly_energy<P: AsRef<Path>>(path: P, sessions: &[Session]) -> Result<()> {
    let mut months: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for s in sessions {
        *months
            .entry((s.start.year(), s.start.month()))
            .or_default() += s.energy_kwh;
    }
    if months.is_empty() {
        return Ok(());
    }
    let labels: Vec<String> = months
        .keys()
        .map(|(y, m)| format!("{y}-{m:02}"))
        .collect();
    let totals: Vec<f64> = months.values().copied().collect();
    let y_max = totals.iter().copied().fold(0.0, f64::max);

    let root = BitMapBackend::new(path.as_ref(), FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Delivered energy per month", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0usize..totals.len(), 0.0..(y_max * 1.1))?;

    chart
        .configure_mesh()
        .x_desc("month")
        .y_desc("energy [kWh]")
        .x_labels(totals.len())
        .x_label_formatter(&|i| labels.get(*i).cloned().unwrap_or_default())
        .draw()?;

    chart.draw_series(
        totals
            .iter()
            .enumerate()
            .map(|(i, &total)| Rectangle::new([(i, 0.0), (i + 1, total)], PALETTE[0].filled())),
    )?;

    root.present()?;
    Ok(())
}

/// Empirical CDF step curves for a set of cars.
pub fn plot_ecdf_curves<P: AsRef<Path>>(
    path: P,
    title: &str,
    x_desc: &str,
    curves: &[(String, &Ecdf)],
) -> Result<()> {
    let x_min = curves
        .iter()
        .filter_map(|(_, e)| e.support().first().copied())
        .fold(f64::MAX, f64::min);
    let x_max = curves
        .iter()
        .filter_map(|(_, e)| e.support().last().copied())
        .fold(f64::MIN, f64::max);
    if x_min >= x_max {
        return Ok(());
    }

    let root = BitMapBackend::new(path.as_ref(), FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, 0.0..1.05)?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc("P(X <= x)")
        .draw()?;

    for (i, (label, ecdf)) in curves.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        let n = ecdf.support().len() as f64;
        let points: Vec<(f64, f64)> = ecdf
            .support()
            .iter()
            .enumerate()
            .flat_map(|(j, &x)| [(x, j as f64 / n), (x, (j + 1) as f64 / n)])
            .collect();
        chart
            .draw_series(LineSeries::new(points, color))?
            .label(label.clone())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Percentile curves of one session column for the most frequent cars: per
/// car one line of its 0..=100 percentiles.
pub fn plot_percentile_bands<P: AsRef<Path>>(
    path: P,
    title: &str,
    y_desc: &str,
    sessions: &[Session],
    table: &CarStatsTable,
    top_n: usize,
    value: fn(&Session) -> f64,
) -> Result<()> {
    let top = table.top_by_count(top_n);
    let mut curves: Vec<(String, Vec<(f64, f64)>)> = Vec::with_capacity(top.len());
    let mut y_max = 0.0f64;
    for car in &top {
        let samples: Vec<f64> = sessions
            .iter()
            .filter(|s| s.card_id == car.card_id)
            .map(value)
            .collect();
        if samples.is_empty() {
            continue;
        }
        let points: Vec<(f64, f64)> = (0..=100)
            .step_by(5)
            .map(|p| (p as f64, percentile(&samples, p as f64)))
            .collect();
        y_max = y_max.max(points.last().map(|(_, y)| *y).unwrap_or(0.0));
        curves.push((format!("car {}", car.card_id), points));
    }
    if curves.is_empty() {
        return Ok(());
    }

    let root = BitMapBackend::new(path.as_ref(), FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..100.0, 0.0..(y_max * 1.1))?;

    chart
        .configure_mesh()
        .x_desc("percentile")
        .y_desc(y_desc)
        .draw()?;

    for (i, (label, points)) in curves.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        chart
            .draw_series(LineSeries::new(points.clone(), color))?
            .label(label.clone())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Aggregated real power profile of every case against the base case, one
/// line per case on a shared time axis.
pub fn plot_case_power_profiles<P: AsRef<Path>>(
    path: P,
    data: &SimulationData,
    cases: &[String],
    base_case: &str,
    time_base_seconds: u32,
) -> Result<()> {
    let mut curves: Vec<(&str, &[f64])> = Vec::new();
    if let Some(series) = data.get(&crate::results::agg_real_key(base_case)) {
        curves.push((base_case, series));
    }
    for case in cases {
        if case == base_case {
            continue;
        }
        if let Some(series) = data.get(&crate::results::agg_real_key(case)) {
            curves.push((case, series));
        }
    }
    let x_max = curves.iter().map(|(_, s)| s.len()).max().unwrap_or(0);
    let y_max = curves
        .iter()
        .flat_map(|(_, s)| s.iter().copied())
        .filter(|v| v.is_finite())
        .fold(0.0f64, f64::max);
    if x_max == 0 || y_max <= 0.0 {
        return Ok(());
    }
    let interval_hours = time_base_seconds as f64 / 3600.0;

    let root = BitMapBackend::new(path.as_ref(), FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Aggregated fleet power per case", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..(x_max as f64 * interval_hours), 0.0..(y_max * 1.1))?;

    chart
        .configure_mesh()
        .x_desc("time [h]")
        .y_desc("power [W]")
        .draw()?;

    for (i, (label, series)) in curves.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        let points: Vec<(f64, f64)> = series
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(j, &v)| (j as f64 * interval_hours, v))
            .collect();
        chart
            .draw_series(LineSeries::new(points, color))?
            .label(label.to_string())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Load-duration style comparison of the realized energy-not-served: per
/// case the cars' ENS values sorted from worst to best.
pub fn plot_ens_duration_curves<P: AsRef<Path>>(
    path: P,
    measures: &[CaseMeasures],
) -> Result<()> {
    let mut curves: Vec<(&str, Vec<f64>)> = Vec::with_capacity(measures.len());
    for case in measures {
        let mut ens: Vec<f64> = case
            .cars
            .iter()
            .map(|c| c.ens_real_abs)
            .filter(|v| v.is_finite())
            .collect();
        ens.sort_by(|a, b| b.partial_cmp(a).expect("finite ENS values"));
        curves.push((&case.case, ens));
    }
    let x_max = curves.iter().map(|(_, e)| e.len()).max().unwrap_or(0);
    let y_max = curves
        .iter()
        .flat_map(|(_, e)| e.iter().copied())
        .fold(0.0f64, f64::max);
    if x_max == 0 || y_max <= 0.0 {
        return Ok(());
    }

    let root = BitMapBackend::new(path.as_ref(), FIGURE_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Realized energy not served per case", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0usize..x_max, 0.0..(y_max * 1.1))?;

    chart
        .configure_mesh()
        .x_desc("cars, worst first")
        .y_desc("ENS [Wh]")
        .draw()?;

    for (i, (label, ens)) in curves.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        let points: Vec<(usize, f64)> = ens.iter().copied().enumerate().collect();
        chart
            .draw_series(LineSeries::new(points, color))?
            .label(label.to_string())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Renders the simulation result figures into `figures_dir`.
pub fn render_results<P: AsRef<Path>>(
    figures_dir: P,
    data: &SimulationData,
    measures: &[CaseMeasures],
    cases: &[String],
    base_case: &str,
    time_base_seconds: u32,
) -> Result<()> {
    let dir = figures_dir.as_ref().join("results");
    std::fs::create_dir_all(&dir)?;

    plot_case_power_profiles(
        dir.join("power_profiles.png"),
        data,
        cases,
        base_case,
        time_base_seconds,
    )?;
    plot_ens_duration_curves(dir.join("ens_duration.png"), measures)?;

    info!(dir = %dir.display(), "Result figures rendered");
    Ok(())
}

/// Renders the full figure set into `figures_dir`.
pub fn render_all<P: AsRef<Path>>(
    figures_dir: P,
    sessions: &[Session],
    table: &CarStatsTable,
) -> Result<()> {
    let dir = figures_dir.as_ref();
    std::fs::create_dir_all(dir.join("histograms"))?;
    std::fs::create_dir_all(dir.join("ecdf"))?;

    plot_monthly_energy(dir.join("monthly_energy.png"), sessions)?;

    let energy: Vec<f64> = sessions.iter().map(|s| s.energy_kwh).collect();
    let start: Vec<f64> = sessions.iter().map(|s| s.start_hours).collect();
    let end: Vec<f64> = sessions.iter().map(|s| s.end_hours).collect();
    let dwell: Vec<f64> = sessions.iter().map(|s| s.dwell_hours).collect();
    plot_histogram(
        dir.join("histograms/energy.png"),
        "Energy per session",
        "energy [kWh]",
        &energy,
    )?;
    plot_histogram(
        dir.join("histograms/start_time.png"),
        "Start of charging",
        "time of day [h]",
        &start,
    )?;
    plot_histogram(
        dir.join("histograms/end_time.png"),
        "End of parking",
        "time of day [h]",
        &end,
    )?;
    plot_histogram(
        dir.join("histograms/dwell_time.png"),
        "Dwell time",
        "dwell [h]",
        &dwell,
    )?;

    let top = table.top_by_count(10);
    let energy_curves: Vec<(String, &Ecdf)> = top
        .iter()
        .map(|c| (format!("car {}", c.card_id), &c.energy_ecdf))
        .collect();
    plot_ecdf_curves(
        dir.join("ecdf/energy.png"),
        "Energy ECDF of the most frequent cars",
        "energy [kWh]",
        &energy_curves,
    )?;
    let dwell_curves: Vec<(String, &Ecdf)> = top
        .iter()
        .map(|c| (format!("car {}", c.card_id), &c.dwell_time_ecdf))
        .collect();
    plot_ecdf_curves(
        dir.join("ecdf/dwell_time.png"),
        "Dwell time ECDF of the most frequent cars",
        "dwell [h]",
        &dwell_curves,
    )?;

    plot_percentile_bands(
        dir.join("energy_percentiles.png"),
        "Energy percentiles of the most frequent cars",
        "energy [kWh]",
        sessions,
        table,
        10,
        |s| s.energy_kwh,
    )?;
    plot_percentile_bands(
        dir.join("start_time_percentiles.png"),
        "Start time percentiles of the most frequent cars",
        "time of day [h]",
        sessions,
        table,
        10,
        |s| s.start_hours,
    )?;
    plot_percentile_bands(
        dir.join("end_time_percentiles.png"),
        "End time percentiles of the most frequent cars",
        "time of day [h]",
        sessions,
        table,
        10,
        |s| s.end_hours,
    )?;

    info!(dir = %dir.display(), "Figures rendered");
    Ok(())
}
