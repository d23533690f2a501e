use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_modbus::client::sync::{tcp, Context, Reader};
use tokio_modbus::{ExceptionCode, Slave};
use tracing::{error, info, warn};

use super::registers::{self, DecodeError};
use crate::config::{Config, RegisterConfig};

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("cannot resolve inverter address {0}")]
    Address(String),

    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] tokio_modbus::Error),

    #[error("inverter answered with exception: {0}")]
    Exception(ExceptionCode),
}

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// One instantaneous active-power reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerSample {
    pub watts: i32,
    pub timestamp: DateTime<Utc>,
}

impl PowerSample {
    pub fn now(watts: i32) -> Self {
        Self {
            watts,
            timestamp: Utc::now(),
        }
    }
}

pub trait TelemetrySource {
    fn read_power(&mut self) -> Result<PowerSample, TelemetryError>;
}

/// Solar inverter reached over Modbus TCP.
///
/// The session is opened on the first read and dropped after any transport
/// failure, so the following read reconnects.
pub struct ModbusInverter {
    connection: Option<Context>,
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
    register: RegisterConfig,
}

impl ModbusInverter {
    pub fn new(config: &Config) -> Self {
        let inverter = &config.inverter;
        info!(
            "Initializing inverter at {}:{} (unit {}, register {} {:?})",
            inverter.host,
            inverter.port,
            inverter.unit_id,
            inverter.power_register.address,
            inverter.power_register.data_type
        );
        ModbusInverter {
            connection: None,
            host: inverter.host.clone(),
            port: inverter.port,
            unit_id: inverter.unit_id,
            timeout: config.inverter_timeout(),
            register: inverter.power_register,
        }
    }

    fn open_session(&self) -> Result<Context, AcquisitionError> {
        let endpoint = format!("{}:{}", self.host, self.port);
        let addr = endpoint
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or(AcquisitionError::Address(endpoint))?;

        info!("Attempting to connect to inverter at {}", addr);
        let context =
            tcp::connect_slave_with_timeout(addr, Slave(self.unit_id), Some(self.timeout))
                .map_err(|source| AcquisitionError::Connect { addr, source })?;
        info!("Inverter connected at {}", addr);
        Ok(context)
    }

    /// Read the raw words of the configured power register.
    pub fn read_power_registers(&mut self) -> Result<Vec<u16>, AcquisitionError> {
        let address = self.register.address;
        let count = self.register.data_type.width();
        let mut context = match self.connection.take() {
            Some(context) => context,
            None => self.open_session()?,
        };

        match context.read_holding_registers(address, count) {
            Ok(Ok(words)) => {
                self.connection = Some(context);
                Ok(words)
            }
            Ok(Err(exception)) => {
                // The device answered, so the session is still usable
                warn!("Inverter rejected read of register {}: {}", address, exception);
                self.connection = Some(context);
                Err(AcquisitionError::Exception(exception))
            }
            Err(e) => {
                error!("Transport failure reading register {}: {}", address, e);
                warn!("Dropping inverter session, will reconnect on next read");
                Err(AcquisitionError::Transport(e))
            }
        }
    }
}

impl TelemetrySource for ModbusInverter {
    fn read_power(&mut self) -> Result<PowerSample, TelemetryError> {
        let words = self.read_power_registers()?;
        let value = registers::decode(&words, self.register.data_type)?;
        let watts = value.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        Ok(PowerSample::now(watts))
    }
}
