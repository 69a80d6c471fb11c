use chrono::NaiveDate;
use rask_log_relay::sink::{ManualClock, RotatingFileConfig, RotatingFileSink, Sink};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing_test::traced_test;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
    ))
}

fn log_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".log"))
        .collect();
    names.sort();
    names
}

#[test]
fn test_size_threshold_triggers_exactly_one_rollover() {
    let temp_dir = TempDir::new().unwrap();
    let config = RotatingFileConfig::new(temp_dir.path().join("app")).with_max_size(100);
    let sink = RotatingFileSink::with_clock(config, clock()).unwrap();

    let line = "x".repeat(49); // 50 bytes with the newline
    sink.write(&line);
    sink.write(&line);
    assert_eq!(sink.current_index(), 0);

    // 100 bytes written: the next write opens index 1.
    sink.write(&line);
    assert_eq!(sink.current_index(), 1);
    assert_eq!(sink.stats().rotations, 1);

    sink.write(&line);
    assert_eq!(sink.current_index(), 1);
    assert_eq!(
        log_files(temp_dir.path()),
        vec!["app_20250301.log", "app_20250301_1.log"]
    );
    assert_eq!(
        fs::read_to_string(temp_dir.path().join("app_20250301.log"))
            .unwrap()
            .len(),
        100
    );
}

#[test]
fn test_date_change_resets_index() {
    let temp_dir = TempDir::new().unwrap();
    let clock = clock();
    let config = RotatingFileConfig::new(temp_dir.path().join("app")).with_max_size(10);
    let sink = RotatingFileSink::with_clock(config, clock.clone()).unwrap();

    for _ in 0..3 {
        sink.write("0123456789");
    }
    assert_eq!(sink.current_index(), 2);

    clock.advance_days(1);
    sink.write("next day");

    assert_eq!(sink.current_index(), 0);
    assert_eq!(sink.current_path(), temp_dir.path().join("app_20250302.log"));
    assert_eq!(
        fs::read_to_string(sink.current_path()).unwrap(),
        "next day\n"
    );
}

#[test]
fn test_only_newest_files_survive_retention() {
    let temp_dir = TempDir::new().unwrap();
    let clock = clock();
    let config = RotatingFileConfig::new(temp_dir.path().join("app")).with_max_files(3);
    let sink = RotatingFileSink::with_clock(config, clock.clone()).unwrap();

    sink.write("day 1");
    for day in 2..=6 {
        clock.advance_days(1);
        sink.write(&format!("day {day}"));
    }

    assert_eq!(
        log_files(temp_dir.path()),
        vec!["app_20250304.log", "app_20250305.log", "app_20250306.log"]
    );
    assert_eq!(sink.retained_files().len(), 3);
    assert_eq!(sink.stats().files_removed, 3);
}

#[test]
fn test_retention_counts_size_rollovers_too() {
    let temp_dir = TempDir::new().unwrap();
    let config = RotatingFileConfig::new(temp_dir.path().join("app"))
        .with_max_size(5)
        .with_max_files(2);
    let sink = RotatingFileSink::with_clock(config, clock()).unwrap();

    for i in 0..5 {
        sink.write(&format!("line{i}"));
    }

    assert_eq!(
        log_files(temp_dir.path()),
        vec!["app_20250301_3.log", "app_20250301_4.log"]
    );
}

#[traced_test]
#[test]
fn test_open_failure_is_counted_and_reported() {
    let temp_dir = TempDir::new().unwrap();
    let clock = clock();
    let log_dir = temp_dir.path().join("logs");
    let config = RotatingFileConfig::new(log_dir.join("app"));
    let sink = RotatingFileSink::with_clock(config, clock.clone()).unwrap();

    fs::remove_dir_all(&log_dir).unwrap();
    clock.advance_days(1);
    sink.write("lost");

    assert_eq!(sink.stats().write_failures, 1);
    assert_eq!(sink.stats().lines_written, 0);
    assert!(logs_contain("Failed to open log file"));

    // Once the directory is back, the next write recovers.
    fs::create_dir_all(&log_dir).unwrap();
    sink.write("recovered");
    assert_eq!(sink.stats().lines_written, 1);
    assert_eq!(
        fs::read_to_string(sink.current_path()).unwrap(),
        "recovered\n"
    );
}
