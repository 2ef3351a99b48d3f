//! Response capture.
//!
//! Wraps a live response, forwarding every call to it while recording the
//! cacheable ones into an encoded operation log. The log is written in line
//! with the live response; nothing is held back from the client.

use bytes::{BufMut, Bytes, BytesMut};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use super::codec;
use super::entry::CachedBody;
use super::ops::{END_OF_MARKER, Locale, Operation};
use super::response::{HttpResponse, ResponseBody, ResponseError, ResponseMutations};
use super::sink::{TeeStream, TeeWriter};

const METRIC_ABANDON: &str = "reprise_cache_abandon_total";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("illegal capture state: {0}")]
    IllegalState(&'static str),
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error("failed to write response body: {0}")]
    Io(#[from] std::io::Error),
}

enum BodySink<B> {
    Stream(TeeStream<B>),
    Writer(TeeWriter<B>),
}

impl<B: ResponseBody> BodySink<B> {
    fn discard(&mut self) {
        match self {
            BodySink::Stream(stream) => stream.discard(),
            BodySink::Writer(writer) => writer.discard(),
        }
    }
}

/// Records one response while it is being produced.
///
/// Starts cacheable. A redirect, an error, a buffer reset or a failed
/// encoding makes it uncacheable: the log is cleared and later calls are
/// forwarded without being recorded. Only [`reset`](Self::reset) re-arms it.
pub struct ResponseCapture<R: HttpResponse> {
    live: R,
    cacheable: bool,
    sealed: bool,
    log: BytesMut,
    sink: Option<BodySink<R::Body>>,
}

impl<R: HttpResponse> ResponseCapture<R> {
    pub fn new(live: R) -> Self {
        Self {
            live,
            cacheable: true,
            sealed: false,
            log: BytesMut::new(),
            sink: None,
        }
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    pub fn get_ref(&self) -> &R {
        &self.live
    }

    pub fn into_inner(self) -> R {
        self.live
    }

    /// Byte sink for the body. Repeated calls return the same sink.
    pub fn output_stream(&mut self) -> Result<&mut TeeStream<R::Body>, CaptureError> {
        if self.sink.is_none() {
            let body = self.live.output_stream()?;
            self.sink = Some(BodySink::Stream(TeeStream::new(body)));
        }
        match &mut self.sink {
            Some(BodySink::Stream(stream)) => Ok(stream),
            _ => Err(CaptureError::IllegalState(
                "writer already obtained for this response",
            )),
        }
    }

    /// Text sink for the body. Repeated calls return the same sink.
    pub fn writer(&mut self) -> Result<&mut TeeWriter<R::Body>, CaptureError> {
        if self.sink.is_none() {
            let body = self.live.writer()?;
            self.sink = Some(BodySink::Writer(TeeWriter::new(body)));
        }
        match &mut self.sink {
            Some(BodySink::Writer(writer)) => Ok(writer),
            _ => Err(CaptureError::IllegalState(
                "output stream already obtained for this response",
            )),
        }
    }

    pub fn send_redirect(&mut self, location: &str) -> Result<(), ResponseError> {
        self.abandon("redirect");
        self.live.send_redirect(location)
    }

    pub fn send_error(&mut self, code: i32, message: Option<&str>) -> Result<(), ResponseError> {
        self.abandon("error");
        self.live.send_error(code, message)
    }

    pub fn reset_buffer(&mut self) -> Result<(), ResponseError> {
        self.abandon("reset_buffer");
        self.live.reset_buffer()
    }

    /// Reset the live response and start a fresh capture.
    ///
    /// The body sink is released along with the live body, so either kind
    /// may be obtained afterwards.
    pub fn reset(&mut self) -> Result<(), ResponseError> {
        self.live.reset()?;
        self.log.clear();
        self.cacheable = true;
        self.sink = None;
        Ok(())
    }

    /// Terminate the log and return its encoded form.
    ///
    /// The first call appends the terminator; later calls return the same
    /// bytes and mutations made in between are not recorded.
    pub fn seal_log(&mut self) -> Bytes {
        if !self.sealed {
            self.log.put_u8(END_OF_MARKER);
            self.sealed = true;
        }
        Bytes::copy_from_slice(&self.log)
    }

    /// The body accumulated by whichever sink was bound.
    pub fn seal_body(&self) -> CachedBody {
        match &self.sink {
            Some(BodySink::Stream(stream)) => {
                CachedBody::Bytes(Bytes::copy_from_slice(stream.to_buffer()))
            }
            Some(BodySink::Writer(writer)) => CachedBody::Text(writer.to_buffer().to_string()),
            None => CachedBody::Empty,
        }
    }

    fn record(&mut self, op: impl FnOnce() -> Operation) {
        if !self.cacheable || self.sealed {
            return;
        }
        if let Err(error) = codec::encode_into(&op(), &mut self.log) {
            warn!(%error, "failed to encode response operation");
            self.abandon("encode");
        }
    }

    fn abandon(&mut self, reason: &'static str) {
        if self.cacheable {
            debug!(cache = "response", reason, "capture abandoned");
            counter!(METRIC_ABANDON, "reason" => reason).increment(1);
        }
        self.cacheable = false;
        self.log.clear();
        if let Some(sink) = &mut self.sink {
            sink.discard();
        }
    }
}

impl<R: HttpResponse> ResponseMutations for ResponseCapture<R> {
    fn add_header(&mut self, name: &str, value: &str) {
        self.live.add_header(name, value);
        self.record(|| Operation::AddHeader {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.live.set_header(name, value);
        self.record(|| Operation::SetHeader {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    fn add_int_header(&mut self, name: &str, value: i32) {
        self.live.add_int_header(name, value);
        self.record(|| Operation::AddIntHeader {
            name: name.to_string(),
            value,
        });
    }

    fn set_int_header(&mut self, name: &str, value: i32) {
        self.live.set_int_header(name, value);
        self.record(|| Operation::SetIntHeader {
            name: name.to_string(),
            value,
        });
    }

    fn add_date_header(&mut self, name: &str, millis: i64) {
        self.live.add_date_header(name, millis);
        self.record(|| Operation::AddDateHeader {
            name: name.to_string(),
            millis,
        });
    }

    fn set_date_header(&mut self, name: &str, millis: i64) {
        self.live.set_date_header(name, millis);
        self.record(|| Operation::SetDateHeader {
            name: name.to_string(),
            millis,
        });
    }

    fn set_status(&mut self, code: i32) {
        self.live.set_status(code);
        self.record(|| Operation::SetStatus { code });
    }

    fn set_status_with_message(&mut self, code: i32, message: &str) {
        self.live.set_status_with_message(code, message);
        self.record(|| Operation::SetStatusWithMessage {
            code,
            message: message.to_string(),
        });
    }

    fn set_locale(&mut self, locale: &Locale) {
        self.live.set_locale(locale);
        self.record(|| Operation::SetLocale(locale.clone()));
    }

    fn set_content_type(&mut self, content_type: &str) {
        self.live.set_content_type(content_type);
        self.record(|| Operation::SetContentType(content_type.to_string()));
    }

    fn set_content_length(&mut self, length: i32) {
        self.live.set_content_length(length);
        self.record(|| Operation::SetContentLength(length));
    }

    fn set_character_encoding(&mut self, charset: &str) {
        self.live.set_character_encoding(charset);
        self.record(|| Operation::SetCharacterEncoding(charset.to_string()));
    }
}
