#![allow(dead_code)]

use solarmax_bridge::liveness::{PingError, PingReply, Pinger};
use solarmax_bridge::prelude::*;
use solarmax_bridge::register::SensorDescriptor;
use solarmax_bridge::solarmax::connection::{Connector, Session};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn common_setup() {
    solarmax_bridge::init_logging("debug");
}

/// One holding-register read as seen by the fake inverter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Read {
    pub host: String,
    pub port: u16,
    pub address: u16,
    pub count: u16,
}

#[derive(Default)]
struct FakeState {
    // registers by absolute address
    registers: Mutex<HashMap<u16, u16>>,
    connects: Mutex<Vec<(String, u16)>>,
    reads: Mutex<Vec<Read>>,
    fail_connect: AtomicBool,
    fail_read: AtomicBool,
    // when set, reads park until `release_read` is called
    hold_reads: AtomicBool,
    read_started: Notify,
    read_released: Notify,
}

/// In-memory inverter behind the `Connector` seam.
#[derive(Clone, Default)]
pub struct FakeInverter {
    state: Arc<FakeState>,
}

impl FakeInverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.state.registers.lock().unwrap().insert(address, value);
    }

    pub fn set_registers(&self, address: u16, values: &[u16]) {
        for (i, value) in values.iter().enumerate() {
            self.set_register(address + i as u16, *value);
        }
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_read(&self, fail: bool) {
        self.state.fail_read.store(fail, Ordering::SeqCst);
    }

    pub fn hold_reads(&self, hold: bool) {
        self.state.hold_reads.store(hold, Ordering::SeqCst);
    }

    pub async fn read_started(&self) {
        self.state.read_started.notified().await
    }

    pub fn release_read(&self) {
        self.state.read_released.notify_one();
    }

    pub fn connects(&self) -> Vec<(String, u16)> {
        self.state.connects.lock().unwrap().clone()
    }

    pub fn reads(&self) -> Vec<Read> {
        self.state.reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeInverter {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Session>> {
        self.state
            .connects
            .lock()
            .unwrap()
            .push((host.to_owned(), port));

        if self.state.fail_connect.load(Ordering::SeqCst) {
            bail!("connection refused");
        }

        Ok(Box::new(FakeSession {
            state: self.state.clone(),
            host: host.to_owned(),
            port,
        }))
    }
}

struct FakeSession {
    state: Arc<FakeState>,
    host: String,
    port: u16,
}

#[async_trait]
impl Session for FakeSession {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.state.reads.lock().unwrap().push(Read {
            host: self.host.clone(),
            port: self.port,
            address,
            count,
        });

        if self.state.hold_reads.load(Ordering::SeqCst) {
            self.state.read_started.notify_one();
            self.state.read_released.notified().await;
        }

        if self.state.fail_read.load(Ordering::SeqCst) {
            bail!("connection reset by peer");
        }

        let registers = self.state.registers.lock().unwrap();
        Ok((address..address + count)
            .map(|a| registers.get(&a).copied().unwrap_or(0))
            .collect())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingBehaviour {
    Alive,
    Dead,
    Unresolvable,
}

/// `Pinger` with a canned answer that counts how often it is asked.
#[derive(Clone)]
pub struct FakePinger {
    behaviour: Arc<Mutex<PingBehaviour>>,
    calls: Arc<AtomicUsize>,
}

impl FakePinger {
    pub fn new(behaviour: PingBehaviour) -> Self {
        Self {
            behaviour: Arc::new(Mutex::new(behaviour)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, behaviour: PingBehaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn liveness(&self) -> LivenessCheck {
        LivenessCheck::new(Arc::new(self.clone()), IcmpPrivilege::Privileged)
    }
}

#[async_trait]
impl Pinger for FakePinger {
    async fn ping(
        &self,
        host: &str,
        count: u16,
        _timeout: Duration,
        _privileged: bool,
    ) -> Result<PingReply, PingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let behaviour = *self.behaviour.lock().unwrap();
        match behaviour {
            PingBehaviour::Alive => Ok(PingReply {
                is_alive: true,
                packets_sent: count,
                packets_received: count,
            }),
            PingBehaviour::Dead => Ok(PingReply {
                is_alive: false,
                packets_sent: count,
                packets_received: 0,
            }),
            PingBehaviour::Unresolvable => Err(PingError::NameLookup(host.to_owned())),
        }
    }
}

pub struct Factory();

impl Factory {
    pub fn settings() -> HubSettings {
        HubSettings {
            host: "192.168.1.50".to_owned(),
            port: 502,
            scan_interval: 60,
            ping_host: String::new(),
        }
    }

    pub fn sensor(offset: u16, name: &str, data_type: &str, factor: f64) -> SensorDescriptor {
        SensorDescriptor {
            offset,
            name: name.to_owned(),
            data_type: data_type.to_owned(),
            factor,
            unit: String::new(),
            device_class: None,
            state_class: None,
            icon: None,
        }
    }

    /// Three fields in a four-register block at 4097.
    pub fn layout() -> FieldLayout {
        FieldLayout::new(
            4097,
            4,
            &[
                Self::sensor(0, "Voltage", "UINT16", 0.1),
                Self::sensor(1, "Power", "UINT32", 1.0),
                Self::sensor(3, "InverterMode", "STATUS_INVERTER_MODE", 1.0),
            ],
        )
        .unwrap()
    }

    pub fn coordinator(
        inverter: &FakeInverter,
        pinger: &FakePinger,
        settings: HubSettings,
    ) -> Coordinator {
        Coordinator::new(
            "SolarMax",
            settings,
            Self::layout(),
            inverter.connector(),
            pinger.liveness(),
            Channels::new(),
        )
    }
}
