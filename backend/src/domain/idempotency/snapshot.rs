//! Response snapshots stored for replay.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport framing headers never persisted in a snapshot.
///
/// The replaying server recomputes them for the replayed body.
pub const FRAMING_HEADERS: [&str; 8] = [
    "connection",
    "content-length",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const CONTENT_TYPE: &str = "content-type";

/// Errors raised while building or decoding a [`ResponseSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// The status code lies outside `100..=999`.
    #[error("response status {status} is not a valid HTTP status")]
    InvalidStatus {
        /// Rejected status code.
        status: u16,
    },
    /// The stored bytes are not a snapshot document.
    #[error("stored snapshot could not be decoded: {message}")]
    Decode {
        /// Decoder diagnostic.
        message: String,
    },
    /// The snapshot could not be serialised.
    #[error("snapshot could not be encoded: {message}")]
    Encode {
        /// Encoder diagnostic.
        message: String,
    },
}

/// Returns `true` for headers that a snapshot never carries.
///
/// ```
/// # use clinic_backend::domain::idempotency::is_excluded_header;
/// assert!(is_excluded_header("Transfer-Encoding"));
/// assert!(is_excluded_header("content-type"));
/// assert!(!is_excluded_header("location"));
/// ```
pub fn is_excluded_header(name: &str) -> bool {
    name.eq_ignore_ascii_case(CONTENT_TYPE)
        || FRAMING_HEADERS
            .iter()
            .any(|framing| name.eq_ignore_ascii_case(framing))
}

/// Complete response captured for an idempotency key.
///
/// Header names are normalised to lowercase and header values are kept as
/// raw bytes, so a replay reproduces the original response exactly apart
/// from transport framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
    status: u16,
    content_type: Option<String>,
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
}

impl ResponseSnapshot {
    /// Capture a response.
    ///
    /// Framing headers and `content-type` are dropped from `headers`; the
    /// content type is carried separately.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::InvalidStatus`] when `status` is outside
    /// `100..=999`.
    pub fn new(
        status: u16,
        content_type: Option<String>,
        headers: impl IntoIterator<Item = (String, Vec<u8>)>,
        body: Vec<u8>,
    ) -> Result<Self, SnapshotError> {
        if !(100..=999).contains(&status) {
            return Err(SnapshotError::InvalidStatus { status });
        }
        let headers = headers
            .into_iter()
            .filter(|(name, _)| !is_excluded_header(name))
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        Ok(Self {
            status,
            content_type,
            headers,
            body,
        })
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Content type of the body, if the response declared one.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Non-framing headers in their original order.
    pub fn headers(&self) -> &[(String, Vec<u8>)] {
        &self.headers
    }

    /// Body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Server errors are never cached.
    pub fn is_cacheable(&self) -> bool {
        self.status < 500
    }

    /// Serialise for storage.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Encode`] if serialisation fails.
    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        let stored = StoredSnapshot {
            status: self.status,
            content_type: self.content_type.clone(),
            headers: self
                .headers
                .iter()
                .map(|(name, value)| StoredHeader {
                    name: name.clone(),
                    value: hex::encode(value),
                })
                .collect(),
            body: hex::encode(&self.body),
        };
        serde_json::to_vec(&stored).map_err(|err| SnapshotError::Encode {
            message: err.to_string(),
        })
    }

    /// Decode bytes previously produced by [`ResponseSnapshot::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Decode`] for malformed documents and
    /// [`SnapshotError::InvalidStatus`] for out-of-range statuses.
    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let stored: StoredSnapshot =
            serde_json::from_slice(bytes).map_err(|err| SnapshotError::Decode {
                message: err.to_string(),
            })?;
        let headers = stored
            .headers
            .into_iter()
            .map(|header| {
                hex::decode(&header.value)
                    .map(|value| (header.name, value))
                    .map_err(|err| SnapshotError::Decode {
                        message: format!("header value: {err}"),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let body = hex::decode(&stored.body).map_err(|err| SnapshotError::Decode {
            message: format!("body: {err}"),
        })?;
        Self::new(stored.status, stored.content_type, headers, body)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSnapshot {
    status: u16,
    content_type: Option<String>,
    headers: Vec<StoredHeader>,
    body: String,
}

#[derive(Serialize, Deserialize)]
struct StoredHeader {
    name: String,
    value: String,
}
