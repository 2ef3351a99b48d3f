//! Binary encoding for operation logs.
//!
//! Records are framed as `MARKER | opcode | payload` and the log ends with a
//! single `END_OF_MARKER`. Integers are big-endian; strings are modified
//! UTF-8 with a 16-bit byte-length prefix.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use metrics::counter;
use thiserror::Error;
use tracing::warn;

use super::ops::*;

const METRIC_DECODE_SKIP: &str = "reprise_cache_decode_skip_total";

/// Largest encodable string, in modified UTF-8 bytes.
pub const MAX_STRING_BYTES: usize = u16::MAX as usize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("encoded string is {len} bytes, limit is {MAX_STRING_BYTES}")]
    StringTooLong { len: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("operation log truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("malformed modified UTF-8 string")]
    MalformedString,
}

/// Encode `ops` followed by the terminator.
pub fn encode(ops: &[Operation]) -> Result<Bytes, EncodeError> {
    let mut buf = BytesMut::new();
    for op in ops {
        encode_into(op, &mut buf)?;
    }
    buf.put_u8(END_OF_MARKER);
    Ok(buf.freeze())
}

/// Append one framed record to `buf`.
///
/// On error `buf` is left exactly as it was.
pub fn encode_into(op: &Operation, buf: &mut BytesMut) -> Result<(), EncodeError> {
    let start = buf.len();
    let result = write_record(op, buf);
    if result.is_err() {
        buf.truncate(start);
    }
    result
}

fn write_record(op: &Operation, buf: &mut BytesMut) -> Result<(), EncodeError> {
    buf.put_u8(MARKER);
    buf.put_u8(op.opcode());
    match op {
        Operation::AddIntHeader { name, value } | Operation::SetIntHeader { name, value } => {
            put_utf(buf, name)?;
            buf.put_i32(*value);
        }
        Operation::AddHeader { name, value } | Operation::SetHeader { name, value } => {
            put_utf(buf, name)?;
            put_utf(buf, value)?;
        }
        Operation::SetStatus { code } => buf.put_i32(*code),
        Operation::SetStatusWithMessage { code, message } => {
            // Message precedes the code on the wire.
            put_utf(buf, message)?;
            buf.put_i32(*code);
        }
        Operation::SetLocale(locale) => {
            put_utf(buf, &locale.language)?;
            put_utf(buf, &locale.country)?;
        }
        Operation::SetContentType(value) | Operation::SetCharacterEncoding(value) => {
            put_utf(buf, value)?;
        }
        Operation::SetContentLength(length) => buf.put_i32(*length),
        Operation::AddDateHeader { name, millis } | Operation::SetDateHeader { name, millis } => {
            put_utf(buf, name)?;
            buf.put_i64(*millis);
        }
    }
    Ok(())
}

/// Write `value` as a length-prefixed modified UTF-8 string.
///
/// NUL is written as `C0 80` and supplementary characters as two encoded
/// surrogates, so no encoded byte is ever zero.
pub fn put_utf(buf: &mut BytesMut, value: &str) -> Result<(), EncodeError> {
    let len: usize = value.encode_utf16().map(unit_len).sum();
    if len > MAX_STRING_BYTES {
        return Err(EncodeError::StringTooLong { len });
    }

    buf.reserve(2 + len);
    buf.put_u16(len as u16);
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => buf.put_u8(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                buf.put_u8(0xC0 | ((unit >> 6) & 0x1F) as u8);
                buf.put_u8(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                buf.put_u8(0xE0 | ((unit >> 12) & 0x0F) as u8);
                buf.put_u8(0x80 | ((unit >> 6) & 0x3F) as u8);
                buf.put_u8(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    Ok(())
}

fn unit_len(unit: u16) -> usize {
    match unit {
        0x0001..=0x007F => 1,
        0x0000 | 0x0080..=0x07FF => 2,
        _ => 3,
    }
}

/// Streaming decoder over an encoded operation log.
///
/// Yields operations in log order and stops at the terminator. Records with
/// an unknown opcode are skipped by scanning forward to the next `MARKER` or
/// `END_OF_MARKER` byte. That scan can land inside a payload that happens to
/// contain either byte value; the format has no per-record length to do
/// better. After the first error the reader is exhausted.
pub struct OperationReader<'a> {
    buf: &'a [u8],
    finished: bool,
}

/// Decode an encoded log lazily.
pub fn decode(bytes: &[u8]) -> OperationReader<'_> {
    OperationReader {
        buf: bytes,
        finished: false,
    }
}

impl OperationReader<'_> {
    fn resync(&mut self) {
        let skip = self
            .buf
            .iter()
            .position(|byte| *byte == MARKER || *byte == END_OF_MARKER)
            .unwrap_or(self.buf.len());
        self.buf.advance(skip);
    }

    fn read_payload(&mut self, opcode: u8) -> Option<Result<Operation, DecodeError>> {
        let op = match opcode {
            ADD_INT_HEADER => self
                .read_name_int()
                .map(|(name, value)| Operation::AddIntHeader { name, value }),
            ADD_HEADER => self
                .read_pair()
                .map(|(name, value)| Operation::AddHeader { name, value }),
            SET_STATUS => self.read_i32().map(|code| Operation::SetStatus { code }),
            SET_STATUS_WITH_MESSAGE => self.read_utf().and_then(|message| {
                self.read_i32()
                    .map(|code| Operation::SetStatusWithMessage { code, message })
            }),
            SET_INT_HEADER => self
                .read_name_int()
                .map(|(name, value)| Operation::SetIntHeader { name, value }),
            SET_HEADER => self
                .read_pair()
                .map(|(name, value)| Operation::SetHeader { name, value }),
            SET_LOCALE => self
                .read_pair()
                .map(|(language, country)| Operation::SetLocale(Locale { language, country })),
            SET_CONTENT_TYPE => self.read_utf().map(Operation::SetContentType),
            SET_CONTENT_LENGTH => self.read_i32().map(Operation::SetContentLength),
            SET_CHARACTER_ENCODING => self.read_utf().map(Operation::SetCharacterEncoding),
            ADD_DATE_HEADER => self
                .read_name_long()
                .map(|(name, millis)| Operation::AddDateHeader { name, millis }),
            SET_DATE_HEADER => self
                .read_name_long()
                .map(|(name, millis)| Operation::SetDateHeader { name, millis }),
            _ => return None,
        };
        Some(op)
    }

    fn require(&self, needed: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.require(4)?;
        Ok(self.buf.get_i32())
    }

    fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.require(8)?;
        Ok(self.buf.get_i64())
    }

    fn read_utf(&mut self) -> Result<String, DecodeError> {
        self.require(2)?;
        let len = self.buf.get_u16() as usize;
        self.require(len)?;
        let (raw, rest) = self.buf.split_at(len);
        self.buf = rest;
        decode_modified_utf8(raw)
    }

    fn read_pair(&mut self) -> Result<(String, String), DecodeError> {
        let first = self.read_utf()?;
        let second = self.read_utf()?;
        Ok((first, second))
    }

    fn read_name_int(&mut self) -> Result<(String, i32), DecodeError> {
        let name = self.read_utf()?;
        let value = self.read_i32()?;
        Ok((name, value))
    }

    fn read_name_long(&mut self) -> Result<(String, i64), DecodeError> {
        let name = self.read_utf()?;
        let value = self.read_i64()?;
        Ok((name, value))
    }
}

impl Iterator for OperationReader<'_> {
    type Item = Result<Operation, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if !self.buf.has_remaining() {
                self.finished = true;
                return Some(Err(DecodeError::Truncated {
                    needed: 1,
                    remaining: 0,
                }));
            }

            match self.buf.get_u8() {
                END_OF_MARKER => self.finished = true,
                MARKER => {
                    if !self.buf.has_remaining() {
                        self.finished = true;
                        return Some(Err(DecodeError::Truncated {
                            needed: 1,
                            remaining: 0,
                        }));
                    }
                    let opcode = self.buf.get_u8();
                    match self.read_payload(opcode) {
                        Some(result) => {
                            if result.is_err() {
                                self.finished = true;
                            }
                            return Some(result);
                        }
                        None => {
                            warn!(opcode, "skipping unknown operation in cached response log");
                            counter!(METRIC_DECODE_SKIP).increment(1);
                            self.resync();
                        }
                    }
                }
                stray => {
                    warn!(byte = stray, "unexpected byte between operation records");
                    counter!(METRIC_DECODE_SKIP).increment(1);
                    self.resync();
                }
            }
        }
        None
    }
}

fn decode_modified_utf8(raw: &[u8]) -> Result<String, DecodeError> {
    let mut units = Vec::with_capacity(raw.len());
    let mut index = 0;
    while index < raw.len() {
        let first = raw[index];
        if first & 0x80 == 0 {
            units.push(u16::from(first));
            index += 1;
        } else if first & 0xE0 == 0xC0 {
            let second = continuation(raw, index + 1)?;
            units.push((u16::from(first & 0x1F) << 6) | second);
            index += 2;
        } else if first & 0xF0 == 0xE0 {
            let second = continuation(raw, index + 1)?;
            let third = continuation(raw, index + 2)?;
            units.push((u16::from(first & 0x0F) << 12) | (second << 6) | third);
            index += 3;
        } else {
            return Err(DecodeError::MalformedString);
        }
    }
    String::from_utf16(&units).map_err(|_| DecodeError::MalformedString)
}

fn continuation(raw: &[u8], index: usize) -> Result<u16, DecodeError> {
    match raw.get(index) {
        Some(byte) if byte & 0xC0 == 0x80 => Ok(u16::from(byte & 0x3F)),
        _ => Err(DecodeError::MalformedString),
    }
}
