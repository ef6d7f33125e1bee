//! CSV ingestion for the two charging-session export schemas.
//!
//! Sessions arrive through two channels with different column layouts: the
//! transaction export (`transaction, chargepoint_id, start_datetime_utc,
//! end_datetime_utc, card_id, total_energy`) and the OCPI export
//! (`session_id, session_start_datetime, session_end_datetime, session_kwh,
//! session_auth_id, evse_uid, ...`). Both are read into the same
//! [`RawSession`] shape here; cleaning happens in [`crate::filter`].

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

/// Which export channel a session came from. The transaction export carries
/// naive UTC timestamps that still need the Dutch DST correction; the OCPI
/// export is already in local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSource {
    TransactionExport,
    OcpiExport,
}

/// One charging session as read from disk, before cleaning.
#[derive(Debug, Clone)]
pub struct RawSession {
    pub transaction: i64,
    pub chargepoint_id: String,
    pub card_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub energy_kwh: f64,
    /// UTC offset in hours recorded on OCPI timestamps (0 for the
    /// transaction export, which is corrected later).
    pub utc_offset_hours: i64,
    pub source: SessionSource,
}

#[derive(Debug, Deserialize)]
struct TransactionRow {
    transaction: Option<i64>,
    chargepoint_id: Option<String>,
    start_datetime_utc: Option<String>,
    end_datetime_utc: Option<String>,
    card_id: Option<String>,
    total_energy: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OcpiRow {
    session_id: Option<String>,
    session_start_datetime: Option<String>,
    session_end_datetime: Option<String>,
    session_kwh: Option<f64>,
    session_auth_id: Option<String>,
    evse_uid: Option<String>,
}

const TRANSACTION_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const OCPI_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reads the transaction export. Rows missing any of start, end, energy or
/// card id are dropped.
pub fn read_transaction_export<P: AsRef<Path>>(path: P) -> Result<Vec<RawSession>> {
    let path = path.as_ref();
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("opening transaction export {}", path.display()))?;

    let mut sessions = Vec::new();
    let mut dropped = 0usize;

    for result in rdr.deserialize() {
        let row: TransactionRow = result?;

        let (Some(transaction), Some(start), Some(end), Some(card_id), Some(energy)) = (
            row.transaction,
            row.start_datetime_utc,
            row.end_datetime_utc,
            row.card_id,
            row.total_energy,
        ) else {
            dropped += 1;
            continue;
        };

        sessions.push(RawSession {
            transaction,
            chargepoint_id: row.chargepoint_id.unwrap_or_default(),
            card_id,
            start: NaiveDateTime::parse_from_str(&start, TRANSACTION_FORMAT)
                .with_context(|| format!("start timestamp {start:?}"))?,
            end: NaiveDateTime::parse_from_str(&end, TRANSACTION_FORMAT)
                .with_context(|| format!("end timestamp {end:?}"))?,
            energy_kwh: energy,
            utc_offset_hours: 0,
            source: SessionSource::TransactionExport,
        });
    }

    debug!(
        file = %path.display(),
        rows = sessions.len(),
        dropped,
        "Transaction export loaded"
    );
    Ok(sessions)
}

/// Reads the OCPI export. Timestamps carry a trailing `+HH:MM` offset which
/// is stripped and recorded; `card_id` comes from the auth id, the
/// chargepoint from `evse_uid` truncated at the first `*`, and the numeric
/// transaction id from `session_id` with its `NLLMS` prefix removed.
pub fn read_ocpi_export<P: AsRef<Path>>(path: P) -> Result<Vec<RawSession>> {
    let path = path.as_ref();
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("opening OCPI export {}", path.display()))?;

    let mut sessions = Vec::new();
    let mut dropped = 0usize;

    for result in rdr.deserialize() {
        let row: OcpiRow = result?;

        let (Some(session_id), Some(start), Some(end), Some(auth_id), Some(energy)) = (
            row.session_id,
            row.session_start_datetime,
            row.session_end_datetime,
            row.session_auth_id,
            row.session_kwh,
        ) else {
            dropped += 1;
            continue;
        };

        let (start, start_offset) = split_offset(&start)?;
        let (end, _end_offset) = split_offset(&end)?;

        let transaction = match session_id.replace("NLLMS", "").parse::<i64>() {
            Ok(t) => t,
            Err(_) => {
                warn!(session_id, "Session id not numeric after prefix strip, row dropped");
                dropped += 1;
                continue;
            }
        };

        let chargepoint_id = row
            .evse_uid
            .unwrap_or_default()
            .split('*')
            .next()
            .unwrap_or_default()
            .to_string();

        sessions.push(RawSession {
            transaction,
            chargepoint_id,
            card_id: auth_id,
            start,
            end,
            energy_kwh: energy,
            utc_offset_hours: start_offset,
            source: SessionSource::OcpiExport,
        });
    }

    debug!(
        file = %path.display(),
        rows = sessions.len(),
        dropped,
        "OCPI export loaded"
    );
    Ok(sessions)
}

/// Splits `YYYY-MM-DD HH:MM:SS+HH:MM` into the naive local timestamp and the
/// offset hours.
fn split_offset(ts: &str) -> Result<(NaiveDateTime, i64)> {
    anyhow::ensure!(ts.len() > 6, "timestamp too short: {ts:?}");
    let (naive, offset) = ts.split_at(ts.len() - 6);
    let hours: i64 = offset[1..3]
        .parse()
        .with_context(|| format!("UTC offset in {ts:?}"))?;
    let parsed = NaiveDateTime::parse_from_str(naive, OCPI_FORMAT)
        .with_context(|| format!("OCPI timestamp {ts:?}"))?;
    Ok((parsed, hours))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_split_offset() {
        let (ts, offset) = split_offset("2022-06-01 08:15:00+02:00").unwrap();
        assert_eq!(offset, 2);
        assert_eq!(ts.to_string(), "2022-06-01 08:15:00");
    }

    #[test]
    fn test_transaction_export_drops_incomplete_rows() {
        let path = write_temp(
            "ev_parser_test_transactions.csv",
            "transaction,chargepoint_id,start_datetime_utc,end_datetime_utc,card_id,total_energy\n\
             1,CP1,2022-06-01T06:00:00Z,2022-06-01T14:00:00Z,AA11,10.5\n\
             2,CP1,2022-06-01T07:00:00Z,,AA12,3.0\n\
             3,CP2,2022-06-01T07:30:00Z,2022-06-01T12:00:00Z,AA13,\n",
        );

        let sessions = read_transaction_export(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].transaction, 1);
        assert_eq!(sessions[0].card_id, "AA11");
        assert_eq!(sessions[0].source, SessionSource::TransactionExport);
    }

    #[test]
    fn test_ocpi_export_derivations() {
        let path = write_temp(
            "ev_parser_test_ocpi.csv",
            "session_id,session_start_datetime,session_end_datetime,session_kwh,session_auth_id,evse_uid\n\
             NLLMS123,2022-06-01 08:00:00+02:00,2022-06-01 16:30:00+02:00,22.1,BB-22*,1000019032*1\n",
        );

        let sessions = read_ocpi_export(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.transaction, 123);
        assert_eq!(s.chargepoint_id, "1000019032");
        assert_eq!(s.utc_offset_hours, 2);
        // card id normalization (dash/asterisk strip) happens in filter
        assert_eq!(s.card_id, "BB-22*");
    }
}
