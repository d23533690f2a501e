pub mod inverter;
pub mod meter;
pub mod registers;

pub use inverter::{ModbusInverter, PowerSample, TelemetryError, TelemetrySource};
pub use meter::{ActuationError, Actuator, PwmMeter};
