use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Layout of the `created_at` column, microsecond precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One logged half of an HTTP exchange.
///
/// A request and its response are recorded as two values sharing the same
/// `correlation_line` (`"<METHOD> <URL>"`); the line is only a join key, the
/// response's own status line lives in `headers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxRecord {
    pub correlation_line: String,
    #[serde(serialize_with = "lossy_text")]
    pub headers: Vec<u8>,
    #[serde(serialize_with = "lossy_text")]
    pub body: Vec<u8>,
    pub at: DateTime<Utc>,
}

impl TxRecord {
    pub fn new(
        correlation_line: impl Into<String>,
        headers: impl Into<Vec<u8>>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            correlation_line: correlation_line.into(),
            headers: headers.into(),
            body: body.into(),
            at: Utc::now(),
        }
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    /// The body as stored: absent and empty bodies are both `None`.
    pub fn body(&self) -> Option<&[u8]> {
        if self.body.is_empty() {
            None
        } else {
            Some(&self.body)
        }
    }

    pub fn created_at(&self) -> String {
        self.at.format(TIMESTAMP_FORMAT).to_string()
    }
}

#[allow(clippy::ptr_arg)]
fn lossy_text<S: Serializer>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn created_at_has_microsecond_layout() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
            + chrono::Duration::microseconds(42);
        let rec = TxRecord::new("GET http://localhost/", "GET / HTTP/1.1\r\n\r\n", "").at(at);
        assert_eq!(rec.created_at(), "2024-03-09 07:05:01.000042");
    }

    #[test]
    fn empty_body_reads_as_absent() {
        let rec = TxRecord::new("GET http://localhost/", "h", Vec::new());
        assert_eq!(rec.body(), None);

        let rec = TxRecord::new("GET http://localhost/", "h", "payload");
        assert_eq!(rec.body(), Some(&b"payload"[..]));
    }

    #[test]
    fn serializes_bytes_as_text() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let rec = TxRecord::new("POST http://localhost/t", "POST /t HTTP/1.1\r\n", r#"{"a":1}"#).at(at);
        let json: serde_json::Value = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["correlation_line"], "POST http://localhost/t");
        assert_eq!(json["headers"], "POST /t HTTP/1.1\r\n");
        assert_eq!(json["body"], r#"{"a":1}"#);
    }
}
