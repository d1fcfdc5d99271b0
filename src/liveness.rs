use crate::prelude::*;

use {
    async_trait::async_trait,
    socket2::Type,
    std::net::IpAddr,
    std::sync::Arc,
    std::time::Duration,
    surge_ping::{Client, Config as PingConfig, IcmpPacket, PingIdentifier, PingSequence, ICMP},
};

const PING_COUNT: u16 = 1;
const PING_TIMEOUT_SECS: u64 = 1;
const PING_PAYLOAD: [u8; 56] = [0; 56];

/// Which kind of ICMP socket this process may open. Worked out once at
/// startup and handed to every liveness check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IcmpPrivilege {
    /// raw sockets
    Privileged,
    /// datagram ICMP sockets (`net.ipv4.ping_group_range`)
    Unprivileged,
    /// neither; liveness checks are skipped
    Unavailable,
}

impl IcmpPrivilege {
    /// Tries socket creation. Must run inside the tokio runtime.
    pub fn detect() -> Self {
        if open_socket(Type::RAW).is_ok() {
            info!("Using ICMP in privileged mode");
            return Self::Privileged;
        }

        match open_socket(Type::DGRAM) {
            Ok(_) => {
                info!("Using ICMP in unprivileged mode");
                Self::Unprivileged
            }
            Err(e) => {
                info!(
                    "Cannot use ICMP because privileges are insufficient to create the socket: {}",
                    e
                );
                Self::Unavailable
            }
        }
    }

    pub fn privileged(&self) -> bool {
        matches!(self, Self::Privileged)
    }
}

fn open_socket(sock_type: Type) -> std::io::Result<Client> {
    Client::new(&PingConfig::builder().kind(ICMP::V4).sock_type_hint(sock_type).build())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PingReply {
    pub is_alive: bool,
    pub packets_sent: u16,
    pub packets_received: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum PingError {
    #[error("cannot resolve {0}")]
    NameLookup(String),
    #[error("ping failed: {0}")]
    Other(#[from] anyhow::Error),
}

/// The ICMP facility. `host` may be a name or a literal address.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(
        &self,
        host: &str,
        count: u16,
        timeout: Duration,
        privileged: bool,
    ) -> Result<PingReply, PingError>;
}

/// Pre-flight check that the inverter's network is up before opening a
/// Modbus session.
#[derive(Clone)]
pub struct LivenessCheck {
    pinger: Arc<dyn Pinger>,
    privilege: IcmpPrivilege,
}

impl LivenessCheck {
    pub fn new(pinger: Arc<dyn Pinger>, privilege: IcmpPrivilege) -> Self {
        Self { pinger, privilege }
    }

    pub fn privilege(&self) -> IcmpPrivilege {
        self.privilege
    }

    pub async fn is_alive(&self, host: &str) -> Result<bool, HostResolutionError> {
        if self.privilege == IcmpPrivilege::Unavailable {
            return Ok(true);
        }

        debug!("ping address: {}", host);
        match self
            .pinger
            .ping(
                host,
                PING_COUNT,
                Duration::from_secs(PING_TIMEOUT_SECS),
                self.privilege.privileged(),
            )
            .await
        {
            Ok(reply) => {
                debug!(
                    "ping returned: reachable={} sent={} received={}",
                    reply.is_alive, reply.packets_sent, reply.packets_received
                );
                Ok(reply.is_alive)
            }
            Err(PingError::NameLookup(_)) => Err(HostResolutionError {
                host: host.to_owned(),
            }),
            Err(e) => {
                warn!("ping {} failed, treating host as offline: {}", host, e);
                Ok(false)
            }
        }
    }
}

/// `Pinger` backed by surge-ping.
pub struct IcmpPinger;

impl IcmpPinger {
    async fn resolve(host: &str) -> Result<IpAddr, PingError> {
        if let Ok(addr) = host.parse::<IpAddr>() {
            return Ok(addr);
        }

        tokio::net::lookup_host((host, 0))
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .map(|addr| addr.ip())
            .ok_or_else(|| PingError::NameLookup(host.to_owned()))
    }
}

#[async_trait]
impl Pinger for IcmpPinger {
    async fn ping(
        &self,
        host: &str,
        count: u16,
        timeout: Duration,
        privileged: bool,
    ) -> Result<PingReply, PingError> {
        let addr = Self::resolve(host).await?;

        let kind = if addr.is_ipv4() { ICMP::V4 } else { ICMP::V6 };
        let sock_type = if privileged { Type::RAW } else { Type::DGRAM };
        let config = PingConfig::builder().kind(kind).sock_type_hint(sock_type).build();
        let client = Client::new(&config).map_err(anyhow::Error::from)?;

        let mut pinger = client.pinger(addr, PingIdentifier(rand::random())).await;
        pinger.timeout(timeout);

        let mut received = 0;
        for seq in 0..count {
            match pinger.ping(PingSequence(seq), &PING_PAYLOAD).await {
                Ok((IcmpPacket::V4(_), rtt)) | Ok((IcmpPacket::V6(_), rtt)) => {
                    trace!("ping {} seq={} rtt={:?}", addr, seq, rtt);
                    received += 1;
                }
                Err(e) => trace!("ping {} seq={}: {}", addr, seq, e),
            }
        }

        Ok(PingReply {
            is_alive: received > 0,
            packets_sent: count,
            packets_received: received,
        })
    }
}
