//! Trigger payload parsing.
//!
//! An invocation either carries upload-notification records naming the
//! objects that just landed, or no payload at all, which means a full
//! rescan. The dispatch flow only consumes "current key set under the
//! prefix" plus "full catalog", so records are logged for traceability
//! rather than driving per-object work.

use serde::Deserialize;

/// The upload-notification payload. An absent or empty record list is a
/// full rescan.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerPayload {
    #[serde(rename = "Records", default)]
    pub records: Vec<UploadRecord>,
}

/// One stored-object notification.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadRecord {
    #[serde(rename = "eventName", default)]
    pub event_name: String,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketRef {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectRef {
    pub key: String,
    #[serde(default)]
    pub size: u64,
}

impl TriggerPayload {
    /// Parse a raw payload. Blank input is a full rescan, not an error.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw)
    }

    pub fn is_full_rescan(&self) -> bool {
        self.records.is_empty()
    }
}

impl ObjectRef {
    /// Object keys arrive URL-encoded with `+` standing in for spaces.
    pub fn decoded_key(&self) -> String {
        percent_decode(&self.key.replace('+', " "))
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_payload_is_full_rescan() {
        assert!(TriggerPayload::parse("").unwrap().is_full_rescan());
        assert!(TriggerPayload::parse("  \n").unwrap().is_full_rescan());
    }

    #[test]
    fn empty_records_is_full_rescan() {
        let payload = TriggerPayload::parse(r#"{"Records":[]}"#).unwrap();
        assert!(payload.is_full_rescan());
    }

    #[test]
    fn records_decode() {
        let payload = TriggerPayload::parse(
            r#"{"Records":[{
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": "tour-uploads" },
                    "object": { "key": "image/lobby.jpg", "size": 1024 }
                }
            }]}"#,
        )
        .unwrap();
        assert_eq!(payload.records.len(), 1);
        let record = &payload.records[0];
        assert_eq!(record.event_name, "ObjectCreated:Put");
        assert_eq!(record.s3.bucket.name, "tour-uploads");
        assert_eq!(record.s3.object.size, 1024);
    }

    #[test]
    fn keys_are_url_decoded() {
        let object = ObjectRef {
            key: "image/grand+hall%20east%2Fwing.jpg".to_string(),
            size: 0,
        };
        assert_eq!(object.decoded_key(), "image/grand hall east/wing.jpg");
    }

    #[test]
    fn malformed_escape_passes_through() {
        let object = ObjectRef {
            key: "image/100%25.jpg".to_string(),
            size: 0,
        };
        assert_eq!(object.decoded_key(), "image/100%.jpg");

        let truncated = ObjectRef {
            key: "image/oops%2".to_string(),
            size: 0,
        };
        assert_eq!(truncated.decoded_key(), "image/oops%2");
    }

    #[test]
    fn garbage_payload_is_an_error() {
        assert!(TriggerPayload::parse("not json").is_err());
    }
}
