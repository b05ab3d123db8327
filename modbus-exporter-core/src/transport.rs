//! Connections to remote Modbus devices.
//!
//! [`Transport`] opens a [`Session`] against an endpoint; the reader only
//! talks to these traits so that tests can substitute an in-memory device.
//! [`TcpTransport`] is the production implementation on top of tokio-modbus.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::error::Elapsed;
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::debug;

use crate::error::{Result, ScrapeError};
use crate::profile::FunctionCode;
use crate::workload::Device;

/// Raw content returned by one read.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Holding or input registers.
    Registers(Vec<u16>),
    /// Coils or discrete inputs.
    Bits(Vec<bool>),
}

/// Failure of a single read on an open session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("device exception: {0}")]
    Exception(String),
    #[error("transport error: {0}")]
    Transport(String),
    /// The connection was dropped and could not be re-established.
    #[error("reconnect failed: {0}")]
    Reconnect(String),
}

/// Opens sessions to remote devices.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `endpoint` (`host:port`) using the device's parameters.
    async fn connect(&self, endpoint: &str, device: &Device) -> Result<Box<dyn Session>>;
}

/// An open connection to one device.
#[async_trait]
pub trait Session: Send {
    /// Read `count` registers (or bits) starting at wire address `address`.
    async fn read(
        &mut self,
        function: FunctionCode,
        address: u16,
        count: u16,
    ) -> std::result::Result<Payload, SessionError>;

    /// Close the connection. Errors are logged, not returned.
    async fn close(&mut self);
}

/// Modbus TCP transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, endpoint: &str, device: &Device) -> Result<Box<dyn Session>> {
        let session = TcpSession::connect(endpoint, device).await?;
        Ok(Box::new(session))
    }
}

struct TcpSession {
    addr: SocketAddr,
    slave: Slave,
    timeout: Duration,
    idle_timeout: Duration,
    ctx: Context,
    last_activity: Instant,
}

impl TcpSession {
    async fn connect(endpoint: &str, device: &Device) -> Result<Self> {
        let addr = resolve(endpoint, device.timeout).await?;
        let slave = Slave(device.unit_id);

        let ctx = open_context(addr, slave, device.timeout)
            .await
            .map_err(|e| ScrapeError::connection(endpoint, e))?;

        debug!(%addr, unit_id = device.unit_id, "Connected to Modbus device");

        Ok(Self {
            addr,
            slave,
            timeout: device.timeout,
            idle_timeout: device.request_delay,
            ctx,
            last_activity: Instant::now(),
        })
    }

    /// Re-establish the connection if it has been idle too long.
    async fn refresh_if_idle(&mut self) -> std::result::Result<(), SessionError> {
        let idle = self.last_activity.elapsed();
        if idle <= self.idle_timeout {
            return Ok(());
        }

        debug!(addr = %self.addr, ?idle, "Connection idle, reconnecting");
        if let Err(e) = self.ctx.disconnect().await {
            debug!(addr = %self.addr, "Disconnect of idle connection failed: {}", e);
        }
        self.ctx = open_context(self.addr, self.slave, self.timeout)
            .await
            .map_err(SessionError::Reconnect)?;
        Ok(())
    }
}

#[async_trait]
impl Session for TcpSession {
    async fn read(
        &mut self,
        function: FunctionCode,
        address: u16,
        count: u16,
    ) -> std::result::Result<Payload, SessionError> {
        self.refresh_if_idle().await?;

        let timeout = self.timeout;
        let ctx = &mut self.ctx;

        let payload = match function {
            FunctionCode::ReadCoils => {
                let outcome = tokio::time::timeout(timeout, ctx.read_coils(address, count)).await;
                flatten(outcome, timeout).map(Payload::Bits)
            }
            FunctionCode::ReadDiscreteInputs => {
                let outcome =
                    tokio::time::timeout(timeout, ctx.read_discrete_inputs(address, count)).await;
                flatten(outcome, timeout).map(Payload::Bits)
            }
            FunctionCode::ReadHoldingRegisters => {
                let outcome =
                    tokio::time::timeout(timeout, ctx.read_holding_registers(address, count))
                        .await;
                flatten(outcome, timeout).map(Payload::Registers)
            }
            FunctionCode::ReadInputRegisters => {
                let outcome =
                    tokio::time::timeout(timeout, ctx.read_input_registers(address, count)).await;
                flatten(outcome, timeout).map(Payload::Registers)
            }
        };

        self.last_activity = Instant::now();
        payload
    }

    async fn close(&mut self) {
        if let Err(e) = self.ctx.disconnect().await {
            debug!(addr = %self.addr, "Disconnect failed: {}", e);
        }
    }
}

async fn resolve(endpoint: &str, timeout: Duration) -> Result<SocketAddr> {
    let mut addrs = tokio::time::timeout(timeout, tokio::net::lookup_host(endpoint))
        .await
        .map_err(|_| ScrapeError::connection(endpoint, "address resolution timed out"))?
        .map_err(|e| ScrapeError::connection(endpoint, e))?;

    addrs
        .next()
        .ok_or_else(|| ScrapeError::connection(endpoint, "no address found"))
}

async fn open_context(
    addr: SocketAddr,
    slave: Slave,
    timeout: Duration,
) -> std::result::Result<Context, String> {
    tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
        .await
        .map_err(|_| format!("connection timeout after {:?}", timeout))?
        .map_err(|e| e.to_string())
}

fn flatten<T>(
    outcome: std::result::Result<tokio_modbus::Result<T>, Elapsed>,
    timeout: Duration,
) -> std::result::Result<T, SessionError> {
    match outcome {
        Err(_) => Err(SessionError::Timeout(timeout)),
        Ok(Err(e)) => Err(SessionError::Transport(e.to_string())),
        Ok(Ok(Err(code))) => Err(SessionError::Exception(format!("{:?}", code))),
        Ok(Ok(Ok(values))) => Ok(values),
    }
}
