//! Driver for Cryo-con temperature controllers.
//!
//! The controller sits on the GPIB bus behind a Prologix GPIB-Ethernet adapter
//! and speaks a line-oriented ASCII command language. The PID control loop is
//! started with `CONT` and stopped with `STOP`; setpoint and output power
//! range belong to control loop 1.
//!
//! The driver is stateless between calls. Because the adapter holds one
//! selected bus address for all of its clients, every operation re-selects
//! the stored address before issuing its command.

use anyhow::anyhow;
use tokio::time::Duration;

use crate::prologix::{AdapterAddress, PrologixEthernet};
use crate::scpi::extract_decimal;
use crate::Error;

/// Factory-default bus address of the controller.
pub const DEFAULT_GPIB_ADDRESS: u8 = 12;

pub struct CryoCon {
    adapter: Option<PrologixEthernet>,
    gpib: u8,
}

impl CryoCon {
    pub fn new() -> Self {
        Self {
            adapter: None,
            gpib: DEFAULT_GPIB_ADDRESS,
        }
    }

    /// Connect to the adapter and store the bus address of the controller.
    ///
    /// Must be called before any other method; they fail with
    /// [`Error::NotConnected`] otherwise.
    pub async fn open(
        &mut self,
        addr: AdapterAddress,
        gpib: u8,
        timeout: Duration,
    ) -> crate::Result<()> {
        if gpib == 0 || gpib > 30 {
            return Err(Error::argument(anyhow!("Invalid GPIB address: {}", gpib)));
        }
        log::debug!("opening cryocon on gpib address {}", gpib);
        let mut adapter = PrologixEthernet::with_timeout(addr, timeout);
        adapter.connect().await?;
        self.adapter.replace(adapter);
        self.gpib = gpib;
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(mut adapter) = self.adapter.take() {
            adapter.close();
        }
    }

    /// Send a raw command and return the reply verbatim.
    pub async fn send_command(&mut self, cmd: &str) -> crate::Result<String> {
        let adapter = self.adapter.as_mut().ok_or(Error::NotConnected)?;
        adapter.select(self.gpib).await?;
        adapter.query(cmd).await
    }

    async fn write_then_query(&mut self, cmd: &str, query: &str) -> crate::Result<String> {
        let adapter = self.adapter.as_mut().ok_or(Error::NotConnected)?;
        adapter.select(self.gpib).await?;
        adapter.write(cmd).await?;
        adapter.query(query).await
    }

    /// Start the PID loop and report the resulting status (`ON` or `OFF`).
    pub async fn enable(&mut self) -> crate::Result<String> {
        self.write_then_query("CONT", "CONT?").await
    }

    /// Stop the PID loop and report the resulting status.
    pub async fn disable(&mut self) -> crate::Result<String> {
        self.write_then_query("STOP", "CONT?").await
    }

    /// Report the PID loop status as sent by the instrument.
    pub async fn status(&mut self) -> crate::Result<String> {
        self.send_command("CONT?").await
    }

    /// Set the loop 1 setpoint in Kelvin.
    ///
    /// Returns the value the instrument accepted, which is authoritative over
    /// the requested one.
    pub async fn set_setpoint(&mut self, temp: f64) -> crate::Result<f64> {
        let reply = self
            .write_then_query(&format!("LOOP 1:SETPT {}", temp), "LOOP 1:SETPT?")
            .await?;
        extract_decimal(&reply)
    }

    /// Read back the loop 1 setpoint in Kelvin.
    pub async fn read_setpoint(&mut self) -> crate::Result<f64> {
        let reply = self.send_command("LOOP 1:SETPT?").await?;
        extract_decimal(&reply)
    }

    /// Read the temperature of sensor input A in Kelvin.
    pub async fn read_sensor_temperature(&mut self) -> crate::Result<f64> {
        let reply = self.send_command("INPUT? A").await?;
        extract_decimal(&reply)
    }

    /// Read the firmware revision of the controller.
    pub async fn read_firmware_version(&mut self) -> crate::Result<f64> {
        let reply = self.send_command("SYSTEM:FWREV?").await?;
        extract_decimal(&reply)
    }

    /// Report the loop 1 output power range (`LOW`, `MID` or `HI`).
    pub async fn status_range(&mut self) -> crate::Result<String> {
        self.send_command("LOOP 1:RANGE?").await
    }

    /// Switch the loop 1 output power to `LOW` (0.5 W) and report the range back.
    pub async fn set_range_low(&mut self) -> crate::Result<String> {
        self.write_then_query("LOOP 1:RANGE LOW", "LOOP 1:RANGE?").await
    }

    /// Switch the loop 1 output power to `MID` (5.0 W) and report the range back.
    pub async fn set_range_mid(&mut self) -> crate::Result<String> {
        self.write_then_query("LOOP 1:RANGE MID", "LOOP 1:RANGE?").await
    }

    /// Switch the loop 1 output power to `HI` (50 W) and report the range back.
    pub async fn set_range_hi(&mut self) -> crate::Result<String> {
        self.write_then_query("LOOP 1:RANGE HI", "LOOP 1:RANGE?").await
    }
}

impl Default for CryoCon {
    fn default() -> Self {
        CryoCon::new()
    }
}
