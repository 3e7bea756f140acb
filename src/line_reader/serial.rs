// Serial port devices via tokio-serial

use super::{DeviceOpener, LineDevice, OpenError, RuntimeError};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Opens serial ports (`/dev/ttyUSB0`, `COM3`, ...) at the configured baud rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl DeviceOpener for SerialOpener {
    fn open(&self, address: &str, baud_rate: u32) -> Result<Box<dyn LineDevice>, OpenError> {
        let port = tokio_serial::new(address, baud_rate)
            .open_native_async()
            .map_err(|e| map_open_error(address, e))?;
        tracing::info!(path = address, baud_rate, "serial port opened");
        Ok(Box::new(SerialDevice {
            path: address.to_string(),
            reader: Some(BufReader::new(port)),
        }))
    }
}

fn map_open_error(path: &str, e: tokio_serial::Error) -> OpenError {
    let path = path.to_string();
    let message = e.description;
    match e.kind {
        tokio_serial::ErrorKind::NoDevice
        | tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            OpenError::NotFound { path, message }
        }
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            OpenError::AccessDenied { path, message }
        }
        tokio_serial::ErrorKind::InvalidInput => OpenError::InvalidSettings { path, message },
        _ => OpenError::Other { path, message },
    }
}

struct SerialDevice {
    path: String,
    reader: Option<BufReader<SerialStream>>,
}

#[async_trait]
impl LineDevice for SerialDevice {
    async fn read_line(&mut self) -> Result<Option<String>, RuntimeError> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(RuntimeError::Closed);
        };
        // Scales occasionally emit non-UTF-8 noise; keep the line and let parsing drop it.
        let mut buf = Vec::new();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            tracing::info!(path = %self.path, "serial port closed");
        }
    }
}
