//! Cache entries and replay.

use std::io::{self, Write};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::datetime;

use super::capture::ResponseCapture;
use super::codec::{self, DecodeError};
use super::response::{HttpResponse, ResponseBody, ResponseError};

/// Expiry used when `now + cache_age` is past what `time` can represent.
const LATEST_EXPIRY: OffsetDateTime = datetime!(9999-12-31 23:59:59.999_999_999 UTC);

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("no valid cache entry to replay")]
    Missing,
    #[error("cached operation log is corrupt: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error("failed to write cached body: {0}")]
    Io(#[from] io::Error),
}

/// Captured response body. Binary and text bodies never coexist.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CachedBody {
    #[default]
    Empty,
    Bytes(Bytes),
    Text(String),
}

impl CachedBody {
    pub fn len(&self) -> usize {
        match self {
            CachedBody::Empty => 0,
            CachedBody::Bytes(bytes) => bytes.len(),
            CachedBody::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable snapshot of one captured response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    expires_at: OffsetDateTime,
    operations: Bytes,
    body: CachedBody,
}

impl CacheEntry {
    pub fn new(expires_at: OffsetDateTime, operations: Bytes, body: CachedBody) -> Self {
        Self {
            expires_at,
            operations,
            body,
        }
    }

    /// Seal `capture` into an entry that expires `cache_age` after `now`.
    pub fn from_capture<R: HttpResponse>(
        capture: &mut ResponseCapture<R>,
        cache_age: Duration,
        now: OffsetDateTime,
    ) -> Self {
        let operations = capture.seal_log();
        let body = capture.seal_body();
        let expires_at = time::Duration::try_from(cache_age)
            .ok()
            .and_then(|age| now.checked_add(age))
            .unwrap_or(LATEST_EXPIRY);
        Self::new(expires_at, operations, body)
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    pub fn body(&self) -> &CachedBody {
        &self.body
    }

    /// True while the entry has not expired. Evaluated on every call.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(OffsetDateTime::now_utc())
    }

    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at > now
    }

    /// Reproduce the recorded response on `response`.
    ///
    /// Operations are re-issued in recorded order, then the body is written
    /// through the writer (text) or the output stream (bytes).
    pub fn replay<R: HttpResponse>(&self, response: &mut R) -> Result<(), ReplayError> {
        for op in codec::decode(&self.operations) {
            op?.apply(response);
        }

        match &self.body {
            CachedBody::Empty => {}
            CachedBody::Text(text) => write_body(response.writer()?, text.as_bytes())?,
            CachedBody::Bytes(bytes) => write_body(response.output_stream()?, bytes)?,
        }
        Ok(())
    }
}

fn write_body<B: ResponseBody>(mut body: B, data: &[u8]) -> io::Result<()> {
    body.write_all(data)?;
    body.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ops::{Locale, Operation};
    use crate::cache::response::ResponseMutations;
    use crate::cache::testing::{Call, RecordingResponse};

    const NOW: OffsetDateTime = datetime!(2024-05-01 12:00 UTC);

    #[test]
    fn validity_tracks_the_clock() {
        let mut capture = ResponseCapture::new(RecordingResponse::default());
        capture.set_status(200);
        let entry = CacheEntry::from_capture(&mut capture, Duration::from_secs(60), NOW);

        assert_eq!(entry.expires_at(), datetime!(2024-05-01 12:01 UTC));
        assert!(entry.is_valid_at(NOW));
        assert!(entry.is_valid_at(NOW + Duration::from_secs(59)));
        assert!(!entry.is_valid_at(NOW + Duration::from_secs(60)));
    }

    #[test]
    fn unrepresentable_expiry_is_clamped() {
        let mut capture = ResponseCapture::new(RecordingResponse::default());
        capture.set_status(200);
        let entry =
            CacheEntry::from_capture(&mut capture, Duration::from_secs(1_000_000_000_000), NOW);

        assert_eq!(entry.expires_at(), LATEST_EXPIRY);
        assert!(entry.is_valid_at(NOW));
    }

    #[test]
    fn is_valid_uses_the_current_time() {
        let now = OffsetDateTime::now_utc();
        let fresh = CacheEntry::new(now + Duration::from_secs(3600), Bytes::new(), CachedBody::Empty);
        let stale = CacheEntry::new(now - Duration::from_secs(1), Bytes::new(), CachedBody::Empty);

        assert!(fresh.is_valid());
        assert!(!stale.is_valid());
    }

    #[test]
    fn replay_reissues_every_kind_in_order() {
        let mut capture = ResponseCapture::new(RecordingResponse::default());
        capture.set_status_with_message(201, "Created");
        capture.add_header("Vary", "Accept");
        capture.set_header("Cache-Control", "public");
        capture.add_int_header("X-Count", 1);
        capture.set_int_header("X-Count", 2);
        capture.add_date_header("Last-Modified", 1_000);
        capture.set_date_header("Expires", 2_000);
        capture.set_locale(&Locale::new("en", "GB"));
        capture.set_content_type("application/octet-stream");
        capture.set_character_encoding("ISO-8859-1");
        capture.set_content_length(3);
        capture.set_status(202);
        capture
            .output_stream()
            .expect("stream")
            .write_all(&[9, 8, 7])
            .expect("write");

        let original = capture.get_ref().calls();
        let entry = CacheEntry::from_capture(&mut capture, Duration::from_secs(30), NOW);

        let mut fresh = RecordingResponse::default();
        entry.replay(&mut fresh).expect("replay");

        assert_eq!(fresh.calls(), original);
        assert_eq!(fresh.body(), vec![9, 8, 7]);
    }

    #[test]
    fn text_body_goes_through_the_writer() {
        let entry = CacheEntry::new(
            NOW,
            codec::encode(&[Operation::SetContentType("text/plain".into())]).expect("encodes"),
            CachedBody::Text("hello".into()),
        );

        let mut response = RecordingResponse::default();
        entry.replay(&mut response).expect("replay");

        assert_eq!(
            response.calls(),
            vec![
                Call::SetContentType("text/plain".into()),
                Call::Writer,
                Call::Write(b"hello".to_vec()),
            ]
        );
    }

    #[test]
    fn empty_body_writes_nothing() {
        let entry = CacheEntry::new(
            NOW,
            codec::encode(&[Operation::SetStatus { code: 204 }]).expect("encodes"),
            CachedBody::Empty,
        );

        let mut response = RecordingResponse::default();
        entry.replay(&mut response).expect("replay");
        assert_eq!(response.calls(), vec![Call::SetStatus(204)]);
    }

    #[test]
    fn corrupt_log_fails_replay() {
        let entry = CacheEntry::new(NOW, Bytes::from_static(&[0xFF, 0x03, 0x00]), CachedBody::Empty);
        let mut response = RecordingResponse::default();

        assert!(matches!(
            entry.replay(&mut response),
            Err(ReplayError::Decode(DecodeError::Truncated { .. }))
        ));
    }

    #[test]
    fn body_kind_conflict_surfaces_as_error() {
        let entry = CacheEntry::new(
            NOW,
            Bytes::from_static(&[0xFE]),
            CachedBody::Text("late".into()),
        );
        let mut response = RecordingResponse::default();
        response.output_stream().expect("stream");

        assert!(matches!(
            entry.replay(&mut response),
            Err(ReplayError::Response(ResponseError::IllegalState(_)))
        ));
    }
}
