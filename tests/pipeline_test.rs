use rask_log_relay::app::build_pipeline;
use rask_log_relay::app::config::RelayConfig;
use rask_log_relay::domain::LogLevel;
use rask_log_relay::server::{CapturedOutput, CollectorServer, ServerConfig, ServerMode};
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[test]
fn test_records_flow_from_dispatcher_to_collector_and_file() {
    let output = Arc::new(CapturedOutput::new());
    let mut server = CollectorServer::new(
        ServerConfig::new(0, ServerMode::Poll).with_poll_interval(Duration::from_millis(20)),
        output.clone(),
    );
    let port = server.start().unwrap().port();

    let temp_dir = TempDir::new().unwrap();
    let mut config = RelayConfig {
        no_console: true,
        file: Some(temp_dir.path().join("relay")),
        forward: Some(format!("127.0.0.1:{port}")),
        level: LogLevel::Info,
        reconnect_backoff_ms: 50,
        ..RelayConfig::default()
    };
    config.post_process().unwrap();
    config.validate().unwrap();

    let pipeline = build_pipeline(&config).unwrap();
    let dispatcher = pipeline.dispatcher();
    assert!(dispatcher.is_async());
    assert_eq!(dispatcher.sink_count(), 2);

    let forwarder = pipeline.forwarder().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !forwarder.is_connected() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(forwarder.is_connected());

    dispatcher.debug("filtered out");
    for i in 0..20 {
        dispatcher.info(format!("event-{i:02}"));
    }
    pipeline.shutdown();

    let all_arrived = output.wait_for(Duration::from_secs(10), |contents| {
        contents.lines().filter(|line| line.contains("[INFO] event-")).count() == 20
    });
    assert!(all_arrived, "collector saw: {:?}", output.contents());

    let received = output.contents();
    let events: Vec<&str> = received
        .lines()
        .filter_map(|line| line.split("[INFO] ").nth(1))
        .collect();
    let expected: Vec<String> = (0..20).map(|i| format!("event-{i:02}")).collect();
    assert_eq!(events, expected);
    assert!(!received.contains("filtered out"));

    let file_path = pipeline.file_sink().unwrap().current_path();
    let written = fs::read_to_string(file_path).unwrap();
    assert_eq!(written.lines().count(), 20);
    assert!(written.lines().all(|line| line.starts_with('[')));

    server.stop();
}

#[test]
fn test_sync_pipeline_writes_before_log_returns() {
    let temp_dir = TempDir::new().unwrap();
    let config = RelayConfig {
        no_console: true,
        sync: true,
        file: Some(temp_dir.path().join("sync")),
        ..RelayConfig::default()
    };

    let pipeline = build_pipeline(&config).unwrap();
    pipeline.dispatcher().error("written immediately");

    let path = pipeline.file_sink().unwrap().current_path();
    let content = fs::read_to_string(path).unwrap();
    assert!(content.trim_end().ends_with("[ERROR] written immediately"));
    pipeline.shutdown();
}
