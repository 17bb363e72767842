pub mod config;
pub mod history;
pub mod monitor;
pub mod mqtt;
pub mod observers;

use crate::config::AppConfig;
use crate::history::{Day, InMemoryRecordStore};
use crate::monitor::WaterMonitor;
use crate::mqtt::message_manager::{SensorReading, SwitchCommand};
use crate::mqtt::reconnect::Transition;
use crate::observers::Observer;
use color_eyre::Result;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const HELP: &str = "commands: switch on|off, threshold <max> <min>, connect, disconnect, \
status, log, history [today|yesterday], quit";

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = AppConfig::default_path()?;
    AppConfig::ensure_default_config(&path).await?;
    let app_config = AppConfig::load(&path).await?;

    let mut monitor = WaterMonitor::new(
        app_config.connection_config(),
        app_config.log_capacity,
        Box::new(InMemoryRecordStore::default()),
    );
    monitor.subscribe(Observer::Sensor(Box::new(print_reading)));
    monitor.subscribe(Observer::State(Box::new(|t: &Transition| {
        println!("[link] {}", t)
    })));

    monitor.store_mut().purge_expired();
    monitor.start();
    println!("{}", HELP);

    // The UI task: one tick drains all transport events, then stdin is served.
    let mut ticker = tokio::time::interval(Duration::from_millis(app_config.tick_ms.max(10)));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                monitor.tick();
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_command(&mut monitor, line.trim()) {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    monitor.stop();
    monitor.tick();
    info!("Shutting down");
    Ok(())
}

/// Returns false when the user asked to quit
fn handle_command(monitor: &mut WaterMonitor, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (None, _, _) => {}
        (Some("quit" | "exit"), _, _) => return false,
        (Some("switch"), Some("on"), None) => {
            monitor.send_switch(SwitchCommand::On);
        }
        (Some("switch"), Some("off"), None) => {
            monitor.send_switch(SwitchCommand::Off);
        }
        (Some("threshold"), Some(max), Some(min)) => {
            monitor.send_thresholds(max, min);
        }
        (Some("connect"), None, None) => {
            monitor.start();
        }
        (Some("disconnect"), None, None) => monitor.stop(),
        (Some("status"), None, None) => {
            let connected = if monitor.is_connected() {
                "connected"
            } else {
                "not connected"
            };
            println!("{} ({})", connected, monitor.link_state());
            print_reading(monitor.latest());
        }
        (Some("log"), None, None) => println!("{}", monitor.log().render()),
        (Some("history"), day, None) => {
            let day = match day {
                Some("yesterday") => Day::Yesterday,
                _ => Day::Today,
            };
            let records = monitor.store().query_day(day);
            if records.is_empty() {
                println!("no records for {:?}", day);
            }
            for record in records {
                println!("{}", record);
            }
        }
        _ => println!("{}", HELP),
    }
    true
}

fn print_reading(reading: &SensorReading) {
    let show = |v: Option<f64>, decimals: usize| match v {
        Some(v) => format!("{:.*}", decimals, v),
        None => "--".to_string(),
    };
    println!(
        "DO {} mg/L | pH {} | Temp {} °C",
        show(reading.dissolved_oxygen, 2),
        show(reading.ph, 1),
        show(reading.temperature, 1)
    );
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
