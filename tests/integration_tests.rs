use chrono::NaiveDate;
use ev_session_pipeline::config::{ManagerFilter, WindowConfig};
use ev_session_pipeline::filter::{apply_filters, clean_sessions, online_estimate_end};
use ev_session_pipeline::parser::{read_ocpi_export, read_transaction_export};
use ev_session_pipeline::scenario::{ScenarioWriter, builtin_scenarios};
use ev_session_pipeline::stats::CarStatsTable;

const TRANSACTIONS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/transactions.csv");
const OCPI: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/ocpi.csv");

fn june_2022() -> WindowConfig {
    WindowConfig {
        after_start: NaiveDate::from_ymd_opt(2022, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        before_end: NaiveDate::from_ymd_opt(2022, 6, 30)
            .unwrap()
            .and_hms_opt(23, 59, 0)
            .unwrap(),
        energy_cutoff_kwh: 1.0,
        max_dwell_hours: Some(24.0),
        min_dwell_hours: Some(10.0 / 60.0),
        overnight_stays: true,
    }
}

fn load_sessions() -> Vec<ev_session_pipeline::filter::Session> {
    let mut raw = read_transaction_export(TRANSACTIONS).expect("transaction export");
    raw.extend(read_ocpi_export(OCPI).expect("OCPI export"));
    let window = june_2022();
    let cleaned = clean_sessions(raw, &window, (100_000.0, 7_400.0));
    apply_filters(cleaned, &window, &ManagerFilter::default(), &[])
}

#[test]
fn test_full_cleaning_pipeline() {
    let sessions = load_sessions();

    // 4 complete transaction rows + 2 OCPI rows, minus the incomplete row
    // and the duplicate transaction id
    assert_eq!(sessions.len(), 4);

    // the truncated card id picked up the trailing digit of its long form
    let cards: Vec<&str> = sessions.iter().map(|s| s.card_id.as_str()).collect();
    assert!(cards.contains(&"AB1234"));
    assert!(!cards.contains(&"AB123"));

    // transaction export timestamps came out in local summer time
    let first = sessions
        .iter()
        .find(|s| s.transaction == 101)
        .expect("session 101");
    assert_eq!(first.start.to_string(), "2022-06-01 08:00:00");
    assert_eq!(first.dwell_hours, 8.0);
    assert_eq!(first.energy_wh, 10_000.0);

    // sorted by start within the window
    assert!(
        sessions
            .windows(2)
            .all(|w| w[0].start_since_window <= w[1].start_since_window)
    );
}

#[test]
fn test_statistics_over_fixture_data() {
    let sessions = load_sessions();

    let mut table = CarStatsTable::from_sessions(&sessions);
    table.energy_stats(&sessions, Some(&[0, 50, 100]));
    table.start_time_stats(&sessions, Some(&[0, 50, 100]));
    table.dwell_time_stats(&sessions, 1_800.0, Some(&[0, 50, 100]));

    assert_eq!(table.len(), 3);

    let ab = table.get("AB1234").expect("AB1234 stats");
    assert_eq!(ab.count, 2);
    assert_eq!(ab.value("energy_mean"), Some(11_000.0));
    assert_eq!(ab.value("e100"), Some(12_000.0));
    // one session starts 08:00, the other 08:30
    assert_eq!(ab.value("start_time_mean"), Some(8.25 * 3600.0));

    let ef = table.get("EF55").expect("EF55 stats");
    assert_eq!(ef.count, 1);
    assert_eq!(ef.value("energy_std"), None);
}

#[test]
fn test_scenario_generation_end_to_end() {
    let dir = std::env::temp_dir().join("ev_integration_scenarios");
    let _ = std::fs::remove_dir_all(&dir);

    let mut sessions = load_sessions();

    let mut table = CarStatsTable::from_sessions(&sessions);
    table.energy_stats(&sessions, Some(&[0, 50, 100]));
    table.start_time_stats(&sessions, Some(&[0, 50, 100]));
    table.end_time_stats(&sessions);
    table.dwell_time_stats(&sessions, 1_800.0, Some(&[0, 50, 100]));
    table.power_estimation(&sessions, 7_400.0, 100_000.0);

    online_estimate_end(&mut sessions, &table, 1_800.0, 8.0 * 3600.0);

    let writer = ScenarioWriter::new(&dir, &table, &sessions).expect("scenario writer");
    for scenario in builtin_scenarios(table.global_energy_average(), 100_000.0, 7_400.0) {
        writer.write_scenario(&scenario).expect("scenario files");
    }

    // 9 scenarios x 5 quantities x real/estimate
    let files = std::fs::read_dir(&dir).unwrap().count();
    assert_eq!(files, 90);

    // C1_ estimates energy from history: AB1234 has the earliest session,
    // so its line index is 0 and the estimate its 11 kWh mean
    let content =
        std::fs::read_to_string(dir.join("C1_ElectricVehicle_RequiredCharge_estimate.txt"))
            .unwrap();
    let first_line = content.lines().next().unwrap();
    assert_eq!(first_line, "0:11000");

    // real file carries both sessions of the car
    let content =
        std::fs::read_to_string(dir.join("C1_ElectricVehicle_RequiredCharge_real.txt")).unwrap();
    assert_eq!(content.lines().next().unwrap(), "0:10000,12000");

    // specs hold the default EV model
    let content =
        std::fs::read_to_string(dir.join("C0_ElectricVehicle_Specs_real.txt")).unwrap();
    assert!(content.lines().all(|l| l.ends_with(":100000,7400")));

    std::fs::remove_dir_all(&dir).unwrap();
}
