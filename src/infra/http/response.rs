//! [`HttpResponse`] implementation backed by an `axum` response.

use std::io;
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{CONTENT_LANGUAGE, CONTENT_LENGTH, CONTENT_TYPE, LOCATION},
    },
    response::Response,
};
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use tracing::warn;

use crate::cache::{HttpResponse, Locale, ResponseBody, ResponseError, ResponseMutations};

const SOURCE: &str = "infra::http::response";

/// IMF-fixdate, the preferred HTTP date format.
const HTTP_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    #[default]
    Unbound,
    Stream,
    Writer,
}

/// Handle onto the body of a [`BufferedResponse`].
#[derive(Debug, Clone, Default)]
pub struct SharedBody(Arc<Mutex<Vec<u8>>>);

impl SharedBody {
    fn with<T>(&self, f: impl FnOnce(&mut Vec<u8>) -> T) -> io::Result<T> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::other("response body lock poisoned"))?;
        Ok(f(&mut guard))
    }
}

impl io::Write for SharedBody {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.with(|body| body.extend_from_slice(data))?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseBody for SharedBody {}

/// Response assembled in memory and converted into an `axum` response.
#[derive(Debug)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    content_type: Option<String>,
    charset: Option<String>,
    body: SharedBody,
    body_kind: BodyKind,
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            content_type: None,
            charset: None,
            body: SharedBody::default(),
            body_kind: BodyKind::Unbound,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_response(self) -> Response {
        let body = self.body.with(std::mem::take).unwrap_or_default();
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }

    fn insert(&mut self, name: &str, value: &str) {
        if let Some((name, value)) = header_pair(name, value) {
            self.headers.insert(name, value);
        }
    }

    fn append(&mut self, name: &str, value: &str) {
        if let Some((name, value)) = header_pair(name, value) {
            self.headers.append(name, value);
        }
    }

    fn sync_content_type(&mut self) {
        let Some(content_type) = self.content_type.as_deref() else {
            return;
        };
        let value = match self.charset.as_deref() {
            Some(charset) if !content_type.to_ascii_lowercase().contains("charset=") => {
                format!("{content_type}; charset={charset}")
            }
            _ => content_type.to_string(),
        };
        self.insert(CONTENT_TYPE.as_str(), &value);
    }

    fn open(&mut self, kind: BodyKind) -> Result<SharedBody, ResponseError> {
        match self.body_kind {
            BodyKind::Unbound => self.body_kind = kind,
            bound if bound == kind => {}
            BodyKind::Stream => {
                return Err(ResponseError::IllegalState(
                    "output stream already obtained for this response",
                ));
            }
            BodyKind::Writer => {
                return Err(ResponseError::IllegalState(
                    "writer already obtained for this response",
                ));
            }
        }
        Ok(self.body.clone())
    }

    fn clear_body(&mut self) -> Result<(), ResponseError> {
        self.body.with(Vec::clear)?;
        Ok(())
    }
}

fn header_pair(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => Some((name, value)),
        _ => {
            warn!(target = SOURCE, header = name, "dropping invalid header");
            None
        }
    }
}

/// Format epoch milliseconds as an HTTP date.
pub fn format_http_date(millis: i64) -> Option<String> {
    let nanos = i128::from(millis) * 1_000_000;
    let instant = OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?;
    instant.format(HTTP_DATE).ok()
}

impl ResponseMutations for BufferedResponse {
    fn add_header(&mut self, name: &str, value: &str) {
        self.append(name, value);
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.insert(name, value);
    }

    fn add_int_header(&mut self, name: &str, value: i32) {
        self.append(name, &value.to_string());
    }

    fn set_int_header(&mut self, name: &str, value: i32) {
        self.insert(name, &value.to_string());
    }

    fn add_date_header(&mut self, name: &str, millis: i64) {
        match format_http_date(millis) {
            Some(date) => self.append(name, &date),
            None => warn!(target = SOURCE, header = name, millis, "dropping out-of-range date"),
        }
    }

    fn set_date_header(&mut self, name: &str, millis: i64) {
        match format_http_date(millis) {
            Some(date) => self.insert(name, &date),
            None => warn!(target = SOURCE, header = name, millis, "dropping out-of-range date"),
        }
    }

    fn set_status(&mut self, code: i32) {
        match u16::try_from(code).ok().and_then(|code| StatusCode::from_u16(code).ok()) {
            Some(status) => self.status = status,
            None => warn!(target = SOURCE, code, "ignoring invalid status code"),
        }
    }

    fn set_status_with_message(&mut self, code: i32, _message: &str) {
        // The reason phrase is chosen by the server; only the code carries over.
        self.set_status(code);
    }

    fn set_locale(&mut self, locale: &Locale) {
        self.insert(CONTENT_LANGUAGE.as_str(), &locale.to_language_tag());
    }

    fn set_content_type(&mut self, content_type: &str) {
        self.content_type = Some(content_type.to_string());
        self.sync_content_type();
    }

    fn set_content_length(&mut self, length: i32) {
        if length >= 0 {
            self.insert(CONTENT_LENGTH.as_str(), &length.to_string());
        }
    }

    fn set_character_encoding(&mut self, charset: &str) {
        self.charset = Some(charset.to_string());
        self.sync_content_type();
    }
}

impl HttpResponse for BufferedResponse {
    type Body = SharedBody;

    fn output_stream(&mut self) -> Result<SharedBody, ResponseError> {
        self.open(BodyKind::Stream)
    }

    fn writer(&mut self) -> Result<SharedBody, ResponseError> {
        self.open(BodyKind::Writer)
    }

    fn send_redirect(&mut self, location: &str) -> Result<(), ResponseError> {
        self.clear_body()?;
        self.status = StatusCode::FOUND;
        self.insert(LOCATION.as_str(), location);
        Ok(())
    }

    fn send_error(&mut self, code: i32, message: Option<&str>) -> Result<(), ResponseError> {
        self.set_status(code);
        let message = message
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("error")
            .to_string();
        self.clear_body()?;
        self.content_type = Some("text/plain; charset=utf-8".to_string());
        self.sync_content_type();
        self.headers.remove(CONTENT_LENGTH);
        self.body.with(|body| body.extend_from_slice(message.as_bytes()))?;
        Ok(())
    }

    fn reset_buffer(&mut self) -> Result<(), ResponseError> {
        self.clear_body()
    }

    fn reset(&mut self) -> Result<(), ResponseError> {
        self.clear_body()?;
        self.status = StatusCode::OK;
        self.headers.clear();
        self.content_type = None;
        self.charset = None;
        self.body_kind = BodyKind::Unbound;
        Ok(())
    }
}
