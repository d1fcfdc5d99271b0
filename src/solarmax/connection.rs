use crate::prelude::*;

use {
    async_trait::async_trait,
    net2::TcpStreamExt,
    std::sync::Arc,
    std::time::Duration,
    tokio_modbus::client::{Client, Reader},
    tokio_modbus::Slave,
};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const READ_TIMEOUT_SECS: u64 = 10;
const TCP_KEEPALIVE_SECS: u64 = 60;

/// Opens sessions to an inverter. Split out so tests can drive the
/// coordinator without a socket.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Session>>;
}

#[async_trait]
pub trait Session: Send {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;
    async fn disconnect(&mut self) -> Result<()>;
}

// Modbus TCP {{{
pub struct ModbusTcpConnector {
    unit_id: u8,
}

impl ModbusTcpConnector {
    pub fn new(unit_id: u8) -> Self {
        Self { unit_id }
    }
}

#[async_trait]
impl Connector for ModbusTcpConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Session>> {
        let stream = match tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            tokio::net::TcpStream::connect((host, port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => bail!("connect failed: {}", e),
            Err(_) => bail!("connection timeout after {} seconds", CONNECT_TIMEOUT_SECS),
        };

        let std_stream = stream.into_std()?;
        if let Err(e) = std_stream.set_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS))) {
            warn!("Failed to set TCP keepalive: {}", e);
        }
        let stream = tokio::net::TcpStream::from_std(std_stream)?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        let ctx = tokio_modbus::client::tcp::attach_slave(stream, Slave(self.unit_id));

        Ok(Box::new(ModbusTcpSession { ctx }))
    }
}

pub struct ModbusTcpSession {
    ctx: tokio_modbus::client::Context,
}

#[async_trait]
impl Session for ModbusTcpSession {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        match tokio::time::timeout(
            Duration::from_secs(READ_TIMEOUT_SECS),
            self.ctx.read_holding_registers(address, count),
        )
        .await
        {
            Ok(Ok(Ok(words))) => Ok(words),
            Ok(Ok(Err(exception))) => bail!("modbus exception {:?}", exception),
            Ok(Err(e)) => bail!("read failed: {}", e),
            Err(_) => bail!("no reply within {} seconds", READ_TIMEOUT_SECS),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.ctx.disconnect().await?;
        Ok(())
    }
} // }}}

/// The single session a hub keeps open to its inverter.
///
/// Connects lazily and never retries on its own: a failed connect leaves no
/// session, a failed read drops the session, and the next
/// `ensure_connected()` starts over.
pub struct Connection {
    connector: Arc<dyn Connector>,
    host: String,
    port: u16,
    session: Option<Box<dyn Session>>,
}

impl Connection {
    pub fn new(connector: Arc<dyn Connector>, host: &str, port: u16) -> Self {
        Self {
            connector,
            host: host.to_owned(),
            port,
            session: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Points the connection at `(host, port)`, closing any session to a
    /// different endpoint.
    pub async fn set_endpoint(&mut self, host: &str, port: u16) {
        if self.host == host && self.port == port {
            return;
        }

        info!(
            "inverter endpoint changed from {}:{} to {}:{}",
            self.host, self.port, host, port
        );
        self.close().await;
        self.host = host.to_owned();
        self.port = port;
    }

    pub async fn ensure_connected(&mut self) -> Result<(), ConnectivityError> {
        if self.session.is_some() {
            return Ok(());
        }

        info!("connecting to inverter at {}:{}", self.host, self.port);
        match self.connector.connect(&self.host, self.port).await {
            Ok(session) => {
                info!("connected to inverter at {}:{}", self.host, self.port);
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                error!("failed to connect to inverter at {}:{}: {}", self.host, self.port, e);
                Err(ConnectivityError::new(&self.host, self.port, e))
            }
        }
    }

    pub async fn read_block(&mut self, address: u16, count: u16) -> Result<Vec<u16>, ConnectivityError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| ConnectivityError::new(&self.host, self.port, "not connected"))?;

        match session.read_holding_registers(address, count).await {
            Ok(words) => Ok(words),
            Err(e) => {
                error!("error reading holding registers {}+{}: {}", address, count, e);
                // the socket may be half-dead; reconnect on next use
                self.session = None;
                Err(ConnectivityError::new(&self.host, self.port, e))
            }
        }
    }

    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.disconnect().await {
                debug!("error closing session to {}:{}: {}", self.host, self.port, e);
            }
        }
    }
}
