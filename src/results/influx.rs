//! InfluxDB 1.x query client.

use crate::config::InfluxConfig;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// One aggregated series request: `operator(field)` from a measurement,
/// restricted by a tag condition and grouped on the client's time base.
#[derive(Debug, Clone)]
pub struct SeriesQuery {
    pub field: String,
    pub measurement: String,
    pub condition: String,
    pub operator: String,
}

impl SeriesQuery {
    pub fn mean<F: Into<String>, M: Into<String>>(field: F, measurement: M) -> Self {
        Self {
            field: field.into(),
            measurement: measurement.into(),
            condition: String::new(),
            operator: "mean".to_string(),
        }
    }

    pub fn sum<F: Into<String>, M: Into<String>>(field: F, measurement: M) -> Self {
        Self {
            field: field.into(),
            measurement: measurement.into(),
            condition: String::new(),
            operator: "sum".to_string(),
        }
    }

    pub fn name<N: AsRef<str>>(mut self, name: N) -> Self {
        self.condition = format!("\"name\" = '{}'", name.as_ref());
        self
    }

    pub fn device_type<N: AsRef<str>>(mut self, devtype: N) -> Self {
        self.condition = format!("\"devtype\" = '{}'", devtype.as_ref());
        self
    }

    pub fn controller_type<N: AsRef<str>>(mut self, ctrltype: N) -> Self {
        self.condition = format!("\"ctrltype\" = '{}'", ctrltype.as_ref());
        self
    }

    /// Renders the InfluxQL statement. Epoch bounds are seconds, padded to
    /// nanoseconds as the database expects.
    pub fn render(&self, start_epoch: i64, end_epoch: i64, time_base_seconds: u32) -> String {
        format!(
            "SELECT {}(\"{}\") FROM \"{}\" WHERE {} AND time >= {}000000000 AND time < {}000000000 \
             GROUP BY time({}s) fill(previous) ORDER BY time ASC",
            self.operator,
            self.field,
            self.measurement,
            self.condition,
            start_epoch,
            end_epoch,
            time_base_seconds,
        )
    }
}

/// A source of aggregated time series. `Ok(None)` means the query matched no
/// series at all.
#[async_trait]
pub trait TimeSeriesApi: Send + Sync {
    async fn fetch_series(&self, query: &SeriesQuery) -> Result<Option<Vec<f64>>>;
}

/// Queries an InfluxDB 1.x `/query` endpoint over HTTP.
pub struct InfluxClient {
    url: String,
    database: String,
    username: String,
    password: String,
    start_epoch: i64,
    end_epoch: i64,
    time_base_seconds: u32,
    client: reqwest::Client,
}

impl InfluxClient {
    pub fn new(config: &InfluxConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            url: config.url.clone(),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            start_epoch: config.start_epoch,
            end_epoch: config.end_epoch,
            time_base_seconds: config.time_base_seconds,
            client,
        })
    }
}

#[async_trait]
impl TimeSeriesApi for InfluxClient {
    async fn fetch_series(&self, query: &SeriesQuery) -> Result<Option<Vec<f64>>> {
        let q = query.render(self.start_epoch, self.end_epoch, self.time_base_seconds);
        debug!(query = %q, "Querying time-series database");

        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("db", self.database.as_str()),
                ("u", self.username.as_str()),
                ("p", self.password.as_str()),
                ("q", q.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("querying {}", self.url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Database returned status {status}: {body}"));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .context("parsing query response")?;

        Ok(parse_series_values(&json))
    }
}

/// Extracts the value column of the first series in a query response.
/// Intervals the database filled with null become NaN.
pub fn parse_series_values(json: &serde_json::Value) -> Option<Vec<f64>> {
    let values = json["results"][0]["series"][0]["values"].as_array()?;
    Some(
        values
            .iter()
            .map(|row| row[1].as_f64().unwrap_or(f64::NAN))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_query() {
        let q = SeriesQuery::mean("W-power.real.c.ELECTRICITY", "C0_devices")
            .name("ElectricVehicle-3");
        assert_eq!(
            q.render(1_640_991_600, 1_642_201_200, 900),
            "SELECT mean(\"W-power.real.c.ELECTRICITY\") FROM \"C0_devices\" \
             WHERE \"name\" = 'ElectricVehicle-3' \
             AND time >= 1640991600000000000 AND time < 1642201200000000000 \
             GROUP BY time(900s) fill(previous) ORDER BY time ASC"
        );
    }

    #[test]
    fn test_render_sum_with_devtype() {
        let q = SeriesQuery::sum("W-power.real.c.ELECTRICITY", "C1_devices")
            .device_type("BufferTimeshiftable");
        let rendered = q.render(0, 900, 900);
        assert!(rendered.starts_with("SELECT sum("));
        assert!(rendered.contains("\"devtype\" = 'BufferTimeshiftable'"));
    }

    #[test]
    fn test_parse_series_values() {
        let json: serde_json::Value = serde_json::json!({
            "results": [{
                "series": [{
                    "columns": ["time", "mean"],
                    "values": [
                        ["2022-01-01T00:00:00Z", 1500.0],
                        ["2022-01-01T00:15:00Z", null],
                        ["2022-01-01T00:30:00Z", 0.0]
                    ]
                }]
            }]
        });
        let values = parse_series_values(&json).unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0], 1500.0);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 0.0);
    }

    #[test]
    fn test_parse_no_series() {
        let json: serde_json::Value = serde_json::json!({ "results": [{}] });
        assert!(parse_series_values(&json).is_none());
    }
}
