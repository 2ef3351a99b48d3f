//! Abstract outgoing response.
//!
//! The cache never talks to a server directly. Anything that can accept the
//! mutation calls below and hand out a body sink can be captured from and
//! replayed onto.

use std::io;

use thiserror::Error;

use super::ops::Locale;

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("illegal response state: {0}")]
    IllegalState(&'static str),
    #[error("response io error: {0}")]
    Io(#[from] io::Error),
}

/// Header, status and metadata mutations on a response.
pub trait ResponseMutations {
    fn add_header(&mut self, name: &str, value: &str);
    fn set_header(&mut self, name: &str, value: &str);
    fn add_int_header(&mut self, name: &str, value: i32);
    fn set_int_header(&mut self, name: &str, value: i32);
    /// `millis` is milliseconds since the Unix epoch.
    fn add_date_header(&mut self, name: &str, millis: i64);
    /// `millis` is milliseconds since the Unix epoch.
    fn set_date_header(&mut self, name: &str, millis: i64);
    fn set_status(&mut self, code: i32);
    fn set_status_with_message(&mut self, code: i32, message: &str);
    fn set_locale(&mut self, locale: &Locale);
    fn set_content_type(&mut self, content_type: &str);
    fn set_content_length(&mut self, length: i32);
    fn set_character_encoding(&mut self, charset: &str);
}

/// Destination for response body bytes.
pub trait ResponseBody: io::Write {
    /// Finish the body. The default only flushes.
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }
}

/// A complete outgoing response.
///
/// `output_stream` and `writer` are mutually exclusive for the lifetime of
/// the response; asking for the other kind fails with
/// [`ResponseError::IllegalState`]. Text written through a writer handle is
/// UTF-8 encoded.
pub trait HttpResponse: ResponseMutations {
    type Body: ResponseBody;

    fn output_stream(&mut self) -> Result<Self::Body, ResponseError>;
    fn writer(&mut self) -> Result<Self::Body, ResponseError>;
    fn send_redirect(&mut self, location: &str) -> Result<(), ResponseError>;
    fn send_error(&mut self, code: i32, message: Option<&str>) -> Result<(), ResponseError>;
    /// Discard buffered body content, keeping status and headers.
    fn reset_buffer(&mut self) -> Result<(), ResponseError>;
    /// Discard status, headers and buffered body content.
    fn reset(&mut self) -> Result<(), ResponseError>;
}

impl ResponseBody for Vec<u8> {}
