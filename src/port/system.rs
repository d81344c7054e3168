//! Host serial ports through the `serialport` crate.

use std::io::{self, Read, Write};
use std::time::Duration;

use log::{debug, warn};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};

use super::{PortBackend, PortHandle, PortInfo, PortKind};
use crate::params::{ConnectionParams, Parity, StopBits};

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let mut out = PortInfo::named(info.port_name);
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                out.kind = PortKind::Usb;
                out.vid = Some(usb.vid);
                out.pid = Some(usb.pid);
                out.manufacturer = usb.manufacturer;
                out.product = usb.product;
                out.serial_number = usb.serial_number;
            }
            SerialPortType::PciPort => out.kind = PortKind::Pci,
            SerialPortType::BluetoothPort => out.kind = PortKind::Bluetooth,
            SerialPortType::Unknown => {}
        }
        out
    }
}

/// The host's serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

impl SystemBackend {
    pub fn new() -> Self {
        SystemBackend
    }
}

impl PortBackend for SystemBackend {
    fn available_ports(&self) -> io::Result<Vec<PortInfo>> {
        let mut ports: Vec<PortInfo> = serialport::available_ports()?
            .into_iter()
            .map(PortInfo::from)
            .collect();
        super::sort_ports(&mut ports);
        Ok(ports)
    }

    fn open(&self, params: &ConnectionParams) -> io::Result<Box<dyn PortHandle>> {
        let data_bits = match params.byte_size {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };
        let parity = match params.parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Mark | Parity::Space => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("parity {} is not supported on this host", params.parity.code()),
                ))
            }
        };
        let stop_bits = match params.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
            StopBits::OnePointFive => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "1.5 stop bits are not supported on this host",
                ))
            }
        };
        let flow = &params.flow_control;
        let flow_control = if flow.rts_cts {
            if flow.xon_xoff {
                warn!("Both RTS/CTS and XON/XOFF requested; using hardware flow control");
            }
            serialport::FlowControl::Hardware
        } else if flow.xon_xoff {
            serialport::FlowControl::Software
        } else {
            serialport::FlowControl::None
        };

        let mut port = serialport::new(params.port.as_str(), params.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow_control)
            .timeout(params.read_timeout)
            .open()?;

        if flow.dsr_dtr {
            if let Err(e) = port.write_data_terminal_ready(true) {
                warn!("Failed to assert DTR on {}: {} (continuing)", params.port, e);
            }
        }
        debug!("Opened {}", params);

        Ok(Box::new(SystemPort {
            name: params.port.clone(),
            port: Some(port),
            read_timeout: params.read_timeout,
            write_timeout: params.write_timeout,
            writing: false,
        }))
    }
}

/// An open host port. `serialport` has a single timeout per port, so the
/// handle switches it between the read and write values as needed.
pub struct SystemPort {
    name: String,
    port: Option<Box<dyn SerialPort>>,
    read_timeout: Duration,
    write_timeout: Duration,
    writing: bool,
}

impl SystemPort {
    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port is closed"))
    }

    fn timeout_mode(&mut self, writing: bool) -> io::Result<()> {
        if self.writing == writing {
            return Ok(());
        }
        let timeout = if writing {
            self.write_timeout
        } else {
            self.read_timeout
        };
        self.port()?.set_timeout(timeout)?;
        self.writing = writing;
        Ok(())
    }
}

impl PortHandle for SystemPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.timeout_mode(false)?;
        self.port()?.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.timeout_mode(true)?;
        self.port()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.timeout_mode(true)?;
        self.port()?.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        // Dropping the boxed port releases the OS handle.
        if self.port.take().is_some() {
            debug!("Closed {}", self.name);
        }
        Ok(())
    }
}
