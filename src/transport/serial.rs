//! Serial device transport backed by the `serialport` crate

use serde::{Deserialize, Serialize};
use serialport::{DataBits, SerialPort, SerialPortInfo, SerialPortType, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, info};

use super::{Transport, TransportError, not_connected};

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Flow control setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

/// Serial line settings, immutable once the port is open
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub flow_control: FlowControl,
    /// Read timeout in microseconds
    pub read_timeout_us: u64,
    /// Write timeout in milliseconds
    pub write_timeout_ms: u64,
    /// Maximum bytes requested per read
    pub read_chunk_size: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            flow_control: FlowControl::None,
            read_timeout_us: 500,
            write_timeout_ms: 1000,
            read_chunk_size: 256,
        }
    }
}

impl SerialConfig {
    pub fn new(device: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            device: device.into(),
            baud_rate,
            ..Self::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_micros(self.read_timeout_us)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Reject settings the device layer would otherwise coerce silently
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.device.is_empty() {
            return Err(TransportError::InvalidConfig("no device path given".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(TransportError::InvalidConfig("baud rate must be positive".to_string()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(TransportError::InvalidConfig(format!(
                "data bits must be 5-8, got {}",
                self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(TransportError::InvalidConfig(format!(
                "stop bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        if self.read_chunk_size == 0 {
            return Err(TransportError::InvalidConfig(
                "read chunk size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn to_serialport_parity(p: Parity) -> serialport::Parity {
    match p {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn to_serialport_flow_control(f: FlowControl) -> serialport::FlowControl {
    match f {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::Software => serialport::FlowControl::Software,
        FlowControl::Hardware => serialport::FlowControl::Hardware,
    }
}

fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

/// An open serial device
///
/// The port carries the read timeout between calls; writes swap in the
/// write timeout for their duration.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    device: String,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl SerialTransport {
    pub fn open(config: &SerialConfig) -> Result<Self, TransportError> {
        config.validate()?;

        let port = serialport::new(&config.device, config.baud_rate)
            .data_bits(to_serialport_data_bits(config.data_bits))
            .parity(to_serialport_parity(config.parity))
            .stop_bits(to_serialport_stop_bits(config.stop_bits))
            .flow_control(to_serialport_flow_control(config.flow_control))
            .timeout(config.read_timeout())
            .open()
            .map_err(|source| TransportError::Open {
                device: config.device.clone(),
                source,
            })?;

        info!(
            "Opened serial port: {} at {} baud ({}{}{})",
            config.device,
            config.baud_rate,
            config.data_bits,
            match config.parity {
                Parity::None => 'N',
                Parity::Odd => 'O',
                Parity::Even => 'E',
            },
            config.stop_bits
        );

        Ok(Self {
            port: Some(port),
            device: config.device.clone(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        })
    }

    fn with_write_timeout<R>(
        &mut self,
        op: impl FnOnce(&mut dyn SerialPort) -> io::Result<R>,
    ) -> io::Result<R> {
        let port = self.port.as_mut().ok_or_else(|| not_connected("serial port"))?;
        port.set_timeout(self.write_timeout)?;
        let result = op(port.as_mut());
        port.set_timeout(self.read_timeout)?;
        result
    }
}

impl Transport for SerialTransport {
    fn describe(&self) -> String {
        self.device.clone()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let port = self.port.as_mut().ok_or_else(|| not_connected("serial port"))?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.with_write_timeout(|port| port.write(data))
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.with_write_timeout(|port| {
            port.write_all(data)?;
            port.flush()
        })
    }

    fn close(&mut self) {
        // Dropping the handle releases the device
        if self.port.take().is_some() {
            debug!("Closed serial port: {}", self.device);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

/// Enumerate the serial ports the OS reports
pub fn list_ports() -> Result<Vec<SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(TransportError::Enumerate)
}

/// One-line human description of a port's type
pub fn describe_port_type(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let mut desc = format!("USB {:04x}:{:04x}", usb.vid, usb.pid);
            if let Some(product) = &usb.product {
                desc.push_str(&format!(" {}", product));
            }
            if let Some(serial) = &usb.serial_number {
                desc.push_str(&format!(" (SN {})", serial));
            }
            desc
        }
        SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::Unknown => "Unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::ClearBuffer;
    use std::sync::{Arc, Mutex};

    /// Port that records the timeout in force at each write
    struct RecordingPort {
        timeout: Duration,
        write_timeouts: Arc<Mutex<Vec<Duration>>>,
    }

    impl Read for RecordingPort {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::TimedOut.into())
        }
    }

    impl Write for RecordingPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.write_timeouts.lock().unwrap().push(self.timeout);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialPort for RecordingPort {
        fn name(&self) -> Option<String> {
            Some("recording".to_string())
        }
        fn baud_rate(&self) -> serialport::Result<u32> {
            Ok(9600)
        }
        fn data_bits(&self) -> serialport::Result<DataBits> {
            Ok(DataBits::Eight)
        }
        fn flow_control(&self) -> serialport::Result<serialport::FlowControl> {
            Ok(serialport::FlowControl::None)
        }
        fn parity(&self) -> serialport::Result<serialport::Parity> {
            Ok(serialport::Parity::None)
        }
        fn stop_bits(&self) -> serialport::Result<StopBits> {
            Ok(StopBits::One)
        }
        fn timeout(&self) -> Duration {
            self.timeout
        }
        fn set_baud_rate(&mut self, _baud_rate: u32) -> serialport::Result<()> {
            Ok(())
        }
        fn set_data_bits(&mut self, _data_bits: DataBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_flow_control(&mut self, _flow_control: serialport::FlowControl) -> serialport::Result<()> {
            Ok(())
        }
        fn set_parity(&mut self, _parity: serialport::Parity) -> serialport::Result<()> {
            Ok(())
        }
        fn set_stop_bits(&mut self, _stop_bits: StopBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_timeout(&mut self, timeout: Duration) -> serialport::Result<()> {
            self.timeout = timeout;
            Ok(())
        }
        fn write_request_to_send(&mut self, _level: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn write_data_terminal_ready(&mut self, _level: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
            Ok(true)
        }
        fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
            Ok(true)
        }
        fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn bytes_to_read(&self) -> serialport::Result<u32> {
            Ok(0)
        }
        fn bytes_to_write(&self) -> serialport::Result<u32> {
            Ok(0)
        }
        fn clear(&self, _buffer_to_clear: ClearBuffer) -> serialport::Result<()> {
            Ok(())
        }
        fn try_clone(&self) -> serialport::Result<Box<dyn SerialPort>> {
            Err(serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "clone not supported",
            ))
        }
        fn set_break(&self) -> serialport::Result<()> {
            Ok(())
        }
        fn clear_break(&self) -> serialport::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writes_use_write_timeout_and_restore_read_timeout() {
        let config = SerialConfig::new("recording", 9600);
        let write_timeouts = Arc::new(Mutex::new(Vec::new()));
        let mut transport = SerialTransport {
            port: Some(Box::new(RecordingPort {
                timeout: config.read_timeout(),
                write_timeouts: Arc::clone(&write_timeouts),
            })),
            device: config.device.clone(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        };

        transport.write_all(b"AT\r\n").unwrap();
        transport.write(b"ATI\r\n").unwrap();

        assert_eq!(
            *write_timeouts.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(1)]
        );
        let port = transport.port.as_ref().unwrap();
        assert_eq!(port.timeout(), Duration::from_micros(500));
        assert_eq!(transport.read(&mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn test_defaults_match_8n1_9600() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.data_bits, 8);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, 1);
        assert_eq!(config.read_timeout(), Duration::from_micros(500));
        assert_eq!(config.read_chunk_size, 256);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        assert!(SerialConfig::default().validate().is_err());
        assert!(SerialConfig::new("/dev/ttyUSB0", 115200).validate().is_ok());

        let mut config = SerialConfig::new("/dev/ttyUSB0", 9600);
        config.data_bits = 9;
        assert!(config.validate().is_err());

        let mut config = SerialConfig::new("/dev/ttyUSB0", 9600);
        config.stop_bits = 3;
        assert!(config.validate().is_err());

        let mut config = SerialConfig::new("/dev/ttyUSB0", 9600);
        config.read_chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_serialport_conversions() {
        assert!(matches!(to_serialport_parity(Parity::Odd), serialport::Parity::Odd));
        assert!(matches!(to_serialport_parity(Parity::Even), serialport::Parity::Even));
        assert!(matches!(to_serialport_data_bits(7), DataBits::Seven));
        assert!(matches!(to_serialport_data_bits(8), DataBits::Eight));
        assert!(matches!(to_serialport_stop_bits(2), StopBits::Two));
        assert!(matches!(
            to_serialport_flow_control(FlowControl::Hardware),
            serialport::FlowControl::Hardware
        ));
    }

    #[test]
    fn test_open_missing_device_fails() {
        let config = SerialConfig::new("/dev/serialpipe-does-not-exist", 9600);
        match SerialTransport::open(&config) {
            Err(TransportError::Open { device, .. }) => {
                assert_eq!(device, "/dev/serialpipe-does-not-exist");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opened a device that does not exist"),
        }
    }
}
