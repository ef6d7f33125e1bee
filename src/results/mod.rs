//! Retrieval and evaluation of simulation results.
//!
//! The external simulator writes its output to an InfluxDB 1.x instance.
//! [`influx`] pulls the per-vehicle and aggregated power series out of it,
//! [`measures`] turns them into energy-not-served and power-peak measures
//! per scenario case.

pub mod influx;
pub mod measures;

pub use influx::{InfluxClient, SeriesQuery, TimeSeriesApi};
pub use measures::{CarCaseMeasures, CaseMeasures, SimulationData};

use crate::config::InfluxConfig;
use anyhow::Result;
use tracing::{info, warn};

const REAL_FIELD: &str = "W-power.real.c.ELECTRICITY";
const PLAN_FIELD: &str = "W-power.plan.real.c.ELECTRICITY";

pub(crate) fn car_real_key(case: &str, ev: usize) -> String {
    format!("{case}{REAL_FIELD}_ElectricVehicle-{ev}")
}

pub(crate) fn car_plan_key(case: &str, ev: usize) -> String {
    format!("{case}{PLAN_FIELD}_ElectricVehicle-{ev}")
}

pub(crate) fn agg_real_key(case: &str) -> String {
    format!("{case}{REAL_FIELD}_BufferTimeshiftable")
}

pub(crate) fn agg_plan_key(case: &str) -> String {
    format!("{case}{PLAN_FIELD}_BufferTimeshiftable")
}

async fn fetch_into<C: TimeSeriesApi>(
    api: &C,
    data: &mut SimulationData,
    key: String,
    query: SeriesQuery,
) -> Result<()> {
    match api.fetch_series(&query).await? {
        Some(values) if !values.is_empty() => {
            data.insert(key, values);
        }
        _ => warn!(key, "No data in time-series database"),
    }
    Ok(())
}

/// Pulls the aggregated fleet power for one case: the realized power of the
/// vehicle devices and the planned power of their controllers. For cases
/// with a separate realized simulation both series come from device
/// measurements.
async fn fetch_power_agg<C: TimeSeriesApi>(
    api: &C,
    data: &mut SimulationData,
    case: &str,
    real_case: Option<&str>,
) -> Result<()> {
    match real_case {
        Some(real_case) => {
            fetch_into(
                api,
                data,
                agg_real_key(case),
                SeriesQuery::sum(REAL_FIELD, format!("{real_case}devices"))
                    .device_type("BufferTimeshiftable"),
            )
            .await?;
            fetch_into(
                api,
                data,
                agg_plan_key(case),
                SeriesQuery::sum(REAL_FIELD, format!("{case}devices"))
                    .device_type("BufferTimeshiftable"),
            )
            .await?;
        }
        None => {
            fetch_into(
                api,
                data,
                agg_real_key(case),
                SeriesQuery::sum(REAL_FIELD, format!("{case}devices"))
                    .device_type("BufferTimeshiftable"),
            )
            .await?;
            fetch_into(
                api,
                data,
                agg_plan_key(case),
                SeriesQuery::sum(PLAN_FIELD, format!("{case}controllers"))
                    .controller_type("BufferTimeshiftableController"),
            )
            .await?;
        }
    }
    Ok(())
}

/// Pulls the per-vehicle and aggregated power series for every configured
/// case. `car_count` is the number of vehicle indices in the simulation,
/// matching the line count of the scenario input files.
///
/// Three case shapes exist:
/// - cases with a `<case>realized_` twin: realization from the twin's
///   devices, the plan from the case's own devices;
/// - the base case: plan equals realization (perfect information);
/// - plain cases: realization from devices, plan from controllers.
pub async fn collect_simulation_data<C: TimeSeriesApi>(
    api: &C,
    config: &InfluxConfig,
    car_count: usize,
) -> Result<SimulationData> {
    let mut data = SimulationData::default();

    for case in &config.cases {
        let realized = format!("{case}realized_");
        if config.extended_cases.contains(&realized) {
            for ev in 0..car_count {
                fetch_into(
                    api,
                    &mut data,
                    car_real_key(case, ev),
                    SeriesQuery::mean(REAL_FIELD, format!("{realized}devices"))
                        .name(format!("ElectricVehicle-{ev}")),
                )
                .await?;
                fetch_into(
                    api,
                    &mut data,
                    car_plan_key(case, ev),
                    SeriesQuery::mean(REAL_FIELD, format!("{case}devices"))
                        .name(format!("ElectricVehicle-{ev}")),
                )
                .await?;
            }
            fetch_power_agg(api, &mut data, case, Some(&realized)).await?;
        } else if *case == config.base_case {
            for ev in 0..car_count {
                fetch_into(
                    api,
                    &mut data,
                    car_real_key(case, ev),
                    SeriesQuery::mean(REAL_FIELD, format!("{case}devices"))
                        .name(format!("ElectricVehicle-{ev}")),
                )
                .await?;
                // perfect information: the plan is the realization
                if let Some(values) = data.get(&car_real_key(case, ev)) {
                    let values = values.to_vec();
                    data.insert(car_plan_key(case, ev), values);
                }
            }
            fetch_power_agg(api, &mut data, case, Some(case)).await?;
        } else {
            for ev in 0..car_count {
                fetch_into(
                    api,
                    &mut data,
                    car_real_key(case, ev),
                    SeriesQuery::mean(REAL_FIELD, format!("{case}devices"))
                        .name(format!("ElectricVehicle-{ev}")),
                )
                .await?;
                fetch_into(
                    api,
                    &mut data,
                    car_plan_key(case, ev),
                    SeriesQuery::mean(PLAN_FIELD, format!("{case}controllers"))
                        .name(format!("ElectricVehicleController{ev}")),
                )
                .await?;
            }
            fetch_power_agg(api, &mut data, case, None).await?;
        }
        info!(case, "Simulation series collected");
    }

    Ok(data)
}
