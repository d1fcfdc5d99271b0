mod common;
use common::*;
use solarmax_bridge::prelude::*;

use std::time::Duration;

async fn wait_for_reads(inverter: &FakeInverter, n: usize, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if inverter.reads().len() >= n {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn polls_on_start_and_stops_on_shutdown() {
    common_setup();

    let inverter = FakeInverter::new();
    let pinger = FakePinger::new(PingBehaviour::Alive);
    let channels = Channels::new();

    let coordinator = Coordinator::new(
        "SolarMax",
        Factory::settings(),
        Factory::layout(),
        inverter.connector(),
        pinger.liveness(),
        channels.clone(),
    );
    let scheduler = Scheduler::new(coordinator, channels);

    let s = scheduler.clone();
    let handle = tokio::spawn(async move { s.start().await });

    assert!(wait_for_reads(&inverter, 1, Duration::from_secs(2)).await);

    scheduler.stop();
    let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));

    // 60s interval, so nothing beyond the initial poll
    assert_eq!(inverter.reads().len(), 1);
}

#[tokio::test]
async fn new_scan_interval_applies_to_current_wait() {
    common_setup();

    let inverter = FakeInverter::new();
    let pinger = FakePinger::new(PingBehaviour::Alive);
    let channels = Channels::new();

    let coordinator = Coordinator::new(
        "SolarMax",
        Factory::settings(),
        Factory::layout(),
        inverter.connector(),
        pinger.liveness(),
        channels.clone(),
    );
    let scheduler = Scheduler::new(coordinator.clone(), channels);

    let s = scheduler.clone();
    let handle = tokio::spawn(async move { s.start().await });

    assert!(wait_for_reads(&inverter, 1, Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    coordinator.update_runtime_settings(1, "").unwrap();
    assert!(wait_for_reads(&inverter, 2, Duration::from_secs(3)).await);

    scheduler.stop();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn frequent_settings_updates_do_not_delay_polls() {
    common_setup();

    let inverter = FakeInverter::new();
    let pinger = FakePinger::new(PingBehaviour::Alive);
    let channels = Channels::new();

    let mut settings = Factory::settings();
    settings.scan_interval = 1;
    let coordinator = Coordinator::new(
        "SolarMax",
        settings,
        Factory::layout(),
        inverter.connector(),
        pinger.liveness(),
        channels.clone(),
    );
    let scheduler = Scheduler::new(coordinator.clone(), channels);

    let s = scheduler.clone();
    let handle = tokio::spawn(async move { s.start().await });

    // same interval, only the ping host flips; faster than the interval
    let started = tokio::time::Instant::now();
    let mut i = 0;
    while started.elapsed() < Duration::from_millis(3300) {
        let ping_host = if i % 2 == 0 { "192.168.1.1" } else { "" };
        coordinator.update_runtime_settings(1, ping_host).unwrap();
        i += 1;
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    // startup poll plus one per elapsed second
    assert!(inverter.reads().len() >= 3, "reads: {}", inverter.reads().len());

    scheduler.stop();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn zero_interval_is_refused_while_running() {
    common_setup();

    let inverter = FakeInverter::new();
    let pinger = FakePinger::new(PingBehaviour::Alive);
    let channels = Channels::new();

    let coordinator = Coordinator::new(
        "SolarMax",
        Factory::settings(),
        Factory::layout(),
        inverter.connector(),
        pinger.liveness(),
        channels.clone(),
    );
    let scheduler = Scheduler::new(coordinator.clone(), channels);

    let s = scheduler.clone();
    let handle = tokio::spawn(async move { s.start().await });

    assert!(wait_for_reads(&inverter, 1, Duration::from_secs(2)).await);

    assert!(coordinator.update_runtime_settings(0, "").is_err());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(inverter.reads().len(), 1);

    scheduler.stop();
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}
