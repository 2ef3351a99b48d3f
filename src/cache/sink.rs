//! Pass-through body sinks.
//!
//! Each write goes to the live response body first and is then appended to
//! an in-memory buffer, so caching never delays what the client receives.

use std::{fmt, io};

use super::response::ResponseBody;

/// Byte-oriented dual sink.
#[derive(Debug)]
pub struct TeeStream<W> {
    live: W,
    buffer: Vec<u8>,
    capturing: bool,
}

impl<W: ResponseBody> TeeStream<W> {
    pub fn new(live: W) -> Self {
        Self {
            live,
            buffer: Vec::new(),
            capturing: true,
        }
    }

    /// Bytes accumulated so far.
    pub fn to_buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Close the live body. The buffer stays readable.
    pub fn close(&mut self) -> io::Result<()> {
        self.live.close()
    }

    pub(crate) fn discard(&mut self) {
        self.buffer.clear();
        self.capturing = false;
    }
}

impl<W: ResponseBody> io::Write for TeeStream<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let written = self.live.write(data)?;
        if self.capturing {
            self.buffer.extend_from_slice(&data[..written]);
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.live.flush()
    }
}

/// Character-oriented dual sink. Text reaches the live body as UTF-8.
#[derive(Debug)]
pub struct TeeWriter<W> {
    live: W,
    buffer: String,
    capturing: bool,
}

impl<W: ResponseBody> TeeWriter<W> {
    pub fn new(live: W) -> Self {
        Self {
            live,
            buffer: String::new(),
            capturing: true,
        }
    }

    pub fn write_text(&mut self, text: &str) -> io::Result<()> {
        self.live.write_all(text.as_bytes())?;
        if self.capturing {
            self.buffer.push_str(text);
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.live.flush()
    }

    /// Close the live body. The buffer stays readable.
    pub fn close(&mut self) -> io::Result<()> {
        self.live.close()
    }

    /// Text accumulated so far.
    pub fn to_buffer(&self) -> &str {
        &self.buffer
    }

    pub(crate) fn discard(&mut self) {
        self.buffer.clear();
        self.capturing = false;
    }
}

impl<W: ResponseBody> fmt::Write for TeeWriter<W> {
    fn write_str(&mut self, text: &str) -> fmt::Result {
        self.write_text(text).map_err(|_| fmt::Error)
    }
}
