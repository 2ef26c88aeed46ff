//! Byte transport under the protocol engine.
//!
//! The engine only ever writes whole command lines; reading is done by the
//! host's event loop, which pumps [`SerialTransport::read_lines`] and feeds
//! each complete line back into the engine.

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Write half of the wire. Implementations append the CRLF terminator.
pub trait Transport {
    fn write_line(&mut self, line: &str) -> Result<()>;
}

/// A real serial port plus a partial-line reassembly buffer.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    pending: Vec<u8>,
}

impl SerialTransport {
    /// 8N1 at the given baud rate. The short read timeout keeps the poll
    /// loop responsive; actual command timeouts are the engine's job.
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(path, baud)
            .timeout(Duration::from_millis(50))
            .open()?;
        Ok(Self {
            port,
            pending: Vec::new(),
        })
    }

    /// Drain whatever the port has buffered and return the complete lines.
    /// A trailing partial line stays pending until its terminator arrives.
    pub fn read_lines(&mut self) -> Result<Vec<String>> {
        let available = self.port.bytes_to_read()? as usize;
        if available > 0 {
            let start = self.pending.len();
            self.pending.resize(start + available, 0);
            let n = self.port.read(&mut self.pending[start..])?;
            self.pending.truncate(start + n);
        }

        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            lines.push(String::from_utf8_lossy(&raw).trim_end().to_string());
        }
        Ok(lines)
    }
}

impl Transport for SerialTransport {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\r\n")?;
        Ok(())
    }
}
