//! CLI entry point for the EV session pipeline.
//!
//! Provides subcommands for cleaning and filtering the charging session
//! exports, deriving per-car statistics, generating simulator input files,
//! evaluating simulation results from the time-series database, and
//! rendering figures.

use anyhow::Result;
use clap::{Parser, Subcommand};
use ev_session_pipeline::config::PipelineConfig;
use ev_session_pipeline::filter::{
    Session, apply_filters, load_cleaned, load_filtered, online_estimate_end,
};
use ev_session_pipeline::results::measures::{
    evaluate_cases, write_car_measures, write_global_measures, write_timeseries,
};
use ev_session_pipeline::results::{InfluxClient, collect_simulation_data};
use ev_session_pipeline::scenario::{ScenarioWriter, builtin_scenarios, sweep_files};
use ev_session_pipeline::stats::{CarStatsTable, correlation_matrix};
use ev_session_pipeline::{output, plot};
use std::ffi::OsStr;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "ev_session_pipeline")]
#[command(about = "Filter, analyze and evaluate EV charging session data", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults apply when absent
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean both session exports and write the filtered training table
    Filter {
        /// CSV file to write the cleaned sessions to
        #[arg(short, long, default_value = "filtered_sessions.csv")]
        output: String,
    },
    /// Derive per-car statistics over the training window
    Stats {
        /// CSV file to write the statistics table to
        #[arg(short, long, default_value = "car_stats.csv")]
        output: String,
    },
    /// Generate the simulator input files for all scenarios
    Scenarios,
    /// Pull simulation results from the time-series database and compute
    /// energy-not-served measures
    Results,
    /// Render the figure set for the training window
    Plots,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/ev_session_pipeline.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("ev_session_pipeline.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Filter { output } => {
            let cleaned = load_cleaned(&config, &config.training)?;
            let raw_path = Path::new(&output).with_file_name("sessions_concatenated.csv");
            output::write_sessions(&raw_path, &cleaned)?;

            let sessions = apply_filters(
                cleaned,
                &config.training,
                &config.manager_filter,
                &config.excluded_card_ids,
            );
            output::write_sessions(&output, &sessions)?;
        }
        Commands::Stats { output } => {
            let (sessions, table) = training_stats(&config)?;
            output::write_car_stats(&output, &table)?;

            let corr_path = Path::new(&output)
                .with_file_name("correlation.csv");
            output::write_correlation(&corr_path, &correlation_matrix(&sessions))?;
        }
        Commands::Scenarios => {
            let (_, table) = training_stats(&config)?;

            let mut test_sessions = load_filtered(&config, &config.test)?;
            online_estimate_end(
                &mut test_sessions,
                &table,
                config.dwell_floor_seconds,
                config.estimate_constant_seconds,
            );
            info!(
                training_cars = table.len(),
                test_sessions = test_sessions.len(),
                "Generating scenario input files"
            );

            let writer = ScenarioWriter::new(&config.output_dir, &table, &test_sessions)?;
            let energy_default = table.global_energy_average();
            for scenario in builtin_scenarios(
                energy_default,
                config.default_capacity_wh,
                config.default_power_w,
            ) {
                writer.write_scenario(&scenario)?;
            }
            if let Some(prefix) = &config.sweep_case {
                for file in sweep_files(prefix, &config.sweep_percentiles(), energy_default) {
                    writer.write_session_file(&file)?;
                }
            }
        }
        Commands::Results => {
            let test_sessions = load_filtered(&config, &config.test)?;
            let table = CarStatsTable::from_sessions(&test_sessions);

            let client = InfluxClient::new(&config.influx)?;
            let data = collect_simulation_data(&client, &config.influx, table.len()).await?;
            let measures = evaluate_cases(
                &data,
                &table,
                &config.influx.cases,
                &config.influx.base_case,
            );

            std::fs::create_dir_all(&config.output_dir)?;
            let dir = Path::new(&config.output_dir);
            write_timeseries(dir.join("results_timeseries.csv"), &data)?;
            write_car_measures(dir.join("results_car_measures.csv"), &measures)?;
            write_global_measures(dir.join("results_global_measures.csv"), &measures)?;

            plot::render_results(
                &config.figures_dir,
                &data,
                &measures,
                &config.influx.cases,
                &config.influx.base_case,
                config.influx.time_base_seconds,
            )?;
        }
        Commands::Plots => {
            let (sessions, table) = training_stats(&config)?;
            plot::render_all(&config.figures_dir, &sessions, &table)?;
        }
    }

    Ok(())
}

/// Loads the training window and derives the full per-car statistics table.
#[tracing::instrument(skip(config))]
fn training_stats(config: &PipelineConfig) -> Result<(Vec<Session>, CarStatsTable)> {
    let sessions = load_filtered(config, &config.training)?;
    let percentiles = config.sweep_percentiles();

    let mut table = CarStatsTable::from_sessions(&sessions);
    table.energy_stats(&sessions, Some(&percentiles));
    table.start_time_stats(&sessions, Some(&percentiles));
    table.end_time_stats(&sessions);
    table.dwell_time_stats(&sessions, config.dwell_floor_seconds, Some(&percentiles));
    table.power_estimation(
        &sessions,
        config.default_power_w,
        config.default_capacity_wh,
    );

    info!(
        sessions = sessions.len(),
        cars = table.len(),
        "Training statistics derived"
    );
    Ok((sessions, table))
}
