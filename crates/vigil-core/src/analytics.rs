//! Sanitized traffic summaries published to the analytics bus.
//!
//! One record per event, encoded as the ASCII string `<ip>|<ts_ns>|<size>`
//! with `|` delimiters and no escaping. IP literals and the two integer
//! fields cannot contain `|`, so the format is unambiguous for the inputs
//! the gateway produces.

use thiserror::Error;

/// A traffic summary line for the anomaly-detection worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSummary {
    /// Source IP literal as received on the stream.
    pub ip: String,
    /// Client-supplied event timestamp, nanoseconds since epoch.
    pub timestamp_ns: i64,
    /// Payload length in bytes.
    pub payload_size: usize,
}

/// Failure decoding a traffic record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// The record does not have three `|`-separated fields.
    #[error("malformed traffic record: {0:?}")]
    Malformed(String),
    /// A numeric field failed to parse.
    #[error("invalid numeric field {field} in traffic record: {value:?}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// The unparseable text.
        value: String,
    },
}

impl TrafficSummary {
    /// Encodes the record as `<ip>|<ts_ns>|<size>`.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}|{}|{}", self.ip, self.timestamp_ns, self.payload_size)
    }

    /// Decodes a record produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if the record does not have exactly three
    /// fields or a numeric field fails to parse.
    pub fn parse(record: &str) -> Result<Self, RecordError> {
        let mut fields = record.splitn(3, '|');
        let (Some(ip), Some(ts), Some(size)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(RecordError::Malformed(record.to_owned()));
        };
        if ip.is_empty() {
            return Err(RecordError::Malformed(record.to_owned()));
        }
        let timestamp_ns = ts.parse().map_err(|_| RecordError::InvalidField {
            field: "timestamp",
            value: ts.to_owned(),
        })?;
        let payload_size = size.parse().map_err(|_| RecordError::InvalidField {
            field: "payload_size",
            value: size.to_owned(),
        })?;
        Ok(Self {
            ip: ip.to_owned(),
            timestamp_ns,
            payload_size,
        })
    }
}
