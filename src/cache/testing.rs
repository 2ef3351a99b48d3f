//! In-memory response that records every call made on it.

use std::{cell::RefCell, io, rc::Rc};

use super::ops::Locale;
use super::response::{HttpResponse, ResponseBody, ResponseError, ResponseMutations};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddHeader(String, String),
    SetHeader(String, String),
    AddIntHeader(String, i32),
    SetIntHeader(String, i32),
    AddDateHeader(String, i64),
    SetDateHeader(String, i64),
    SetStatus(i32),
    SetStatusWithMessage(i32, String),
    SetLocale(Locale),
    SetContentType(String),
    SetContentLength(i32),
    SetCharacterEncoding(String),
    OutputStream,
    Writer,
    Write(Vec<u8>),
    Close,
    SendRedirect(String),
    SendError(i32, Option<String>),
    ResetBuffer,
    Reset,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    #[default]
    Unbound,
    Stream,
    Writer,
}

#[derive(Debug, Default)]
pub struct RecordingResponse {
    calls: Rc<RefCell<Vec<Call>>>,
    body: BodyKind,
}

impl RecordingResponse {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    /// Every body byte written, in order.
    pub fn body(&self) -> Vec<u8> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Write(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    fn push(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn open(&mut self, kind: BodyKind) -> Result<RecordingBody, ResponseError> {
        match self.body {
            BodyKind::Unbound => self.body = kind,
            bound if bound == kind => {}
            _ => return Err(ResponseError::IllegalState("other body kind already in use")),
        }
        self.push(match kind {
            BodyKind::Writer => Call::Writer,
            _ => Call::OutputStream,
        });
        Ok(RecordingBody {
            calls: Rc::clone(&self.calls),
        })
    }
}

pub struct RecordingBody {
    calls: Rc<RefCell<Vec<Call>>>,
}

impl io::Write for RecordingBody {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.calls.borrow_mut().push(Call::Write(data.to_vec()));
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseBody for RecordingBody {
    fn close(&mut self) -> io::Result<()> {
        self.calls.borrow_mut().push(Call::Close);
        Ok(())
    }
}

impl ResponseMutations for RecordingResponse {
    fn add_header(&mut self, name: &str, value: &str) {
        self.push(Call::AddHeader(name.into(), value.into()));
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.push(Call::SetHeader(name.into(), value.into()));
    }

    fn add_int_header(&mut self, name: &str, value: i32) {
        self.push(Call::AddIntHeader(name.into(), value));
    }

    fn set_int_header(&mut self, name: &str, value: i32) {
        self.push(Call::SetIntHeader(name.into(), value));
    }

    fn add_date_header(&mut self, name: &str, millis: i64) {
        self.push(Call::AddDateHeader(name.into(), millis));
    }

    fn set_date_header(&mut self, name: &str, millis: i64) {
        self.push(Call::SetDateHeader(name.into(), millis));
    }

    fn set_status(&mut self, code: i32) {
        self.push(Call::SetStatus(code));
    }

    fn set_status_with_message(&mut self, code: i32, message: &str) {
        self.push(Call::SetStatusWithMessage(code, message.into()));
    }

    fn set_locale(&mut self, locale: &Locale) {
        self.push(Call::SetLocale(locale.clone()));
    }

    fn set_content_type(&mut self, content_type: &str) {
        self.push(Call::SetContentType(content_type.into()));
    }

    fn set_content_length(&mut self, length: i32) {
        self.push(Call::SetContentLength(length));
    }

    fn set_character_encoding(&mut self, charset: &str) {
        self.push(Call::SetCharacterEncoding(charset.into()));
    }
}

impl HttpResponse for RecordingResponse {
    type Body = RecordingBody;

    fn output_stream(&mut self) -> Result<RecordingBody, ResponseError> {
        self.open(BodyKind::Stream)
    }

    fn writer(&mut self) -> Result<RecordingBody, ResponseError> {
        self.open(BodyKind::Writer)
    }

    fn send_redirect(&mut self, location: &str) -> Result<(), ResponseError> {
        self.push(Call::SendRedirect(location.into()));
        Ok(())
    }

    fn send_error(&mut self, code: i32, message: Option<&str>) -> Result<(), ResponseError> {
        self.push(Call::SendError(code, message.map(str::to_string)));
        Ok(())
    }

    fn reset_buffer(&mut self) -> Result<(), ResponseError> {
        self.push(Call::ResetBuffer);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ResponseError> {
        self.push(Call::Reset);
        self.body = BodyKind::Unbound;
        Ok(())
    }
}
