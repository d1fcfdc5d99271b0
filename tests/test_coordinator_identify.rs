mod common;
use common::*;
use solarmax_bridge::coordinator::commands::identify::Identity;
use solarmax_bridge::prelude::*;

fn ascii_words(s: &str) -> Vec<u16> {
    s.as_bytes()
        .chunks(2)
        .map(|c| (u16::from(c[0]) << 8) | u16::from(*c.get(1).unwrap_or(&0)))
        .collect()
}

#[tokio::test]
async fn identifies_smt_6() {
    common_setup();

    let inverter = FakeInverter::new();
    let pinger = FakePinger::new(PingBehaviour::Alive);
    inverter.set_registers(6672, &ascii_words("2245-211303511"));

    let coordinator = Factory::coordinator(&inverter, &pinger, Factory::settings());
    let identity = coordinator.identify().await;

    assert_eq!(
        identity,
        Identity {
            serial_number: "2245-211303511".to_owned(),
            model_label: "SolarMax 6SMT".to_owned(),
        }
    );
    assert_eq!(coordinator.identity(), Some(identity));

    let read = inverter.reads().pop().unwrap();
    assert_eq!((read.address, read.count), (6672, 7));
}

#[tokio::test]
async fn identifies_other_smt_models_by_serial_tail() {
    common_setup();

    let inverter = FakeInverter::new();
    let pinger = FakePinger::new(PingBehaviour::Alive);
    inverter.set_registers(6672, &ascii_words("2245-219876543"));

    let coordinator = Factory::coordinator(&inverter, &pinger, Factory::settings());

    assert_eq!(coordinator.identify().await.model_label, "SolarMax SMT 876543");
}

#[tokio::test]
async fn read_failure_falls_back() {
    common_setup();

    let inverter = FakeInverter::new();
    let pinger = FakePinger::new(PingBehaviour::Alive);
    inverter.fail_read(true);

    let coordinator = Factory::coordinator(&inverter, &pinger, Factory::settings());
    let identity = coordinator.identify().await;

    assert_eq!(identity.serial_number, "unknown");
    assert_eq!(identity.model_label, "SolarMax");
}

#[tokio::test]
async fn blank_serial_falls_back() {
    common_setup();

    // all serial registers read as zero
    let inverter = FakeInverter::new();
    let pinger = FakePinger::new(PingBehaviour::Alive);

    let coordinator = Factory::coordinator(&inverter, &pinger, Factory::settings());

    assert_eq!(coordinator.identify().await.serial_number, "unknown");
}

#[tokio::test]
async fn shares_session_with_polling() {
    common_setup();

    let inverter = FakeInverter::new();
    let pinger = FakePinger::new(PingBehaviour::Alive);
    inverter.set_registers(6672, &ascii_words("2245-211303511"));

    let coordinator = Factory::coordinator(&inverter, &pinger, Factory::settings());

    coordinator.identify().await;
    coordinator.request_refresh().await;

    assert_eq!(inverter.connects().len(), 1);
    assert_eq!(inverter.reads().len(), 2);
}
