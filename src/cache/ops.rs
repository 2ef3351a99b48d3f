//! Response mutation vocabulary.
//!
//! Every call a handler makes on an outgoing response that affects what the
//! client receives (apart from the body) is one [`Operation`]. Operations are
//! recorded in handler order and replayed in the same order.

use super::response::ResponseMutations;

/// Starts every record in an encoded operation log.
pub const MARKER: u8 = 0xFF;
/// Terminates an encoded operation log.
pub const END_OF_MARKER: u8 = 0xFE;

pub const ADD_INT_HEADER: u8 = 0x01;
pub const ADD_HEADER: u8 = 0x02;
pub const SET_STATUS: u8 = 0x03;
pub const SET_STATUS_WITH_MESSAGE: u8 = 0x04;
pub const SET_INT_HEADER: u8 = 0x05;
pub const SET_HEADER: u8 = 0x06;
pub const SET_LOCALE: u8 = 0x07;
pub const SET_CONTENT_TYPE: u8 = 0x08;
pub const SET_CONTENT_LENGTH: u8 = 0x09;
pub const SET_CHARACTER_ENCODING: u8 = 0x0A;
pub const ADD_DATE_HEADER: u8 = 0x0B;
pub const SET_DATE_HEADER: u8 = 0x0C;

/// Language and country pair carried by `setLocale`.
///
/// Either part may be empty; the pair is stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Locale {
    pub language: String,
    pub country: String,
}

impl Locale {
    pub fn new(language: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            country: country.into(),
        }
    }

    /// BCP 47 style tag (`en-US`, or `en` when the country is empty).
    pub fn to_language_tag(&self) -> String {
        if self.country.is_empty() {
            self.language.clone()
        } else {
            format!("{}-{}", self.language, self.country)
        }
    }
}

/// One recorded response mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    AddIntHeader { name: String, value: i32 },
    AddHeader { name: String, value: String },
    SetStatus { code: i32 },
    SetStatusWithMessage { code: i32, message: String },
    SetIntHeader { name: String, value: i32 },
    SetHeader { name: String, value: String },
    SetLocale(Locale),
    SetContentType(String),
    SetContentLength(i32),
    SetCharacterEncoding(String),
    /// Date value in milliseconds since the Unix epoch.
    AddDateHeader { name: String, millis: i64 },
    /// Date value in milliseconds since the Unix epoch.
    SetDateHeader { name: String, millis: i64 },
}

impl Operation {
    pub fn opcode(&self) -> u8 {
        match self {
            Operation::AddIntHeader { .. } => ADD_INT_HEADER,
            Operation::AddHeader { .. } => ADD_HEADER,
            Operation::SetStatus { .. } => SET_STATUS,
            Operation::SetStatusWithMessage { .. } => SET_STATUS_WITH_MESSAGE,
            Operation::SetIntHeader { .. } => SET_INT_HEADER,
            Operation::SetHeader { .. } => SET_HEADER,
            Operation::SetLocale(_) => SET_LOCALE,
            Operation::SetContentType(_) => SET_CONTENT_TYPE,
            Operation::SetContentLength(_) => SET_CONTENT_LENGTH,
            Operation::SetCharacterEncoding(_) => SET_CHARACTER_ENCODING,
            Operation::AddDateHeader { .. } => ADD_DATE_HEADER,
            Operation::SetDateHeader { .. } => SET_DATE_HEADER,
        }
    }

    /// Re-issue this mutation on `response`.
    pub fn apply<R: ResponseMutations + ?Sized>(&self, response: &mut R) {
        match self {
            Operation::AddIntHeader { name, value } => response.add_int_header(name, *value),
            Operation::AddHeader { name, value } => response.add_header(name, value),
            Operation::SetStatus { code } => response.set_status(*code),
            Operation::SetStatusWithMessage { code, message } => {
                response.set_status_with_message(*code, message)
            }
            Operation::SetIntHeader { name, value } => response.set_int_header(name, *value),
            Operation::SetHeader { name, value } => response.set_header(name, value),
            Operation::SetLocale(locale) => response.set_locale(locale),
            Operation::SetContentType(content_type) => response.set_content_type(content_type),
            Operation::SetContentLength(length) => response.set_content_length(*length),
            Operation::SetCharacterEncoding(charset) => response.set_character_encoding(charset),
            Operation::AddDateHeader { name, millis } => response.add_date_header(name, *millis),
            Operation::SetDateHeader { name, millis } => response.set_date_header(name, *millis),
        }
    }
}
