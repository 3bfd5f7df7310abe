//! Compresses oversized event payloads for the wire.
//!
//! Events whose JSON exceeds `sse_compression_threshold` are gzip-compressed
//! then base64-encoded so the SSE text framing stays intact; the wire event
//! type gets a `_z` suffix so unaware clients can safely ignore it.

use std::io::Write;

use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;

/// The wire form of one event: its SSE `event:` type name and `data:` body.
pub struct WireEvent {
    pub event_type: String,
    pub data: String,
}

/// Render `json` as a wire event, compressing it if it exceeds `threshold`
/// bytes.
pub fn render(event_type: &str, json: &str, threshold: usize) -> WireEvent {
    if json.len() <= threshold {
        return WireEvent {
            event_type: event_type.to_owned(),
            data: json.to_owned(),
        };
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(json.as_bytes()).is_err() {
        return WireEvent {
            event_type: event_type.to_owned(),
            data: json.to_owned(),
        };
    }
    let Ok(compressed) = encoder.finish() else {
        return WireEvent {
            event_type: event_type.to_owned(),
            data: json.to_owned(),
        };
    };

    let encoded = base64::engine::general_purpose::STANDARD.encode(compressed);
    WireEvent {
        event_type: format!("{event_type}_z"),
        data: encoded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_passes_through_uncompressed() {
        let wire = render("job_progress", "{\"a\":1}", 1024);
        assert_eq!(wire.event_type, "job_progress");
        assert_eq!(wire.data, "{\"a\":1}");
    }

    #[test]
    fn oversized_payload_is_compressed_and_suffixed() {
        let big = "x".repeat(2000);
        let json = format!("{{\"value\":\"{big}\"}}");
        let wire = render("job_complete", &json, 1024);
        assert_eq!(wire.event_type, "job_complete_z");
        assert!(wire.data.len() < json.len());
        assert!(base64::engine::general_purpose::STANDARD
            .decode(&wire.data)
            .is_ok());
    }
}
