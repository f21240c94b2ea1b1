//! NDJSON frame codec for stdio transports.
//!
//! Both the upstream channel and every backend pipe carry one compact JSON
//! object per line, `\n`-terminated, no `Content-Length` framing. This module
//! provides pure parsing plus the two async I/O primitives the read/write
//! loops are built from: a size-bounded line reader and a flush-always frame
//! writer. Policy for what to do with a bad line (answer, log, drop) stays
//! with the caller; the codec only reports.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FramingError;
use crate::jsonrpc::{ClassifyError, JsonRpcMessageKind, classify_frame};

/// Maximum NDJSON frame size (10 MiB).
///
/// Lines exceeding this limit are rejected before JSON parsing to prevent
/// allocation of oversized `serde_json::Value` trees from crafted input.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// A parsed NDJSON frame.
///
/// Carries the classified message kind plus the full parsed value, so callers
/// can pull `params`, `result`, or `error` without re-parsing.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Classified message kind (request, response, or notification).
    pub kind: JsonRpcMessageKind,
    /// The complete parsed JSON object.
    pub value: Value,
}

/// Parse a single NDJSON line into a [`Frame`].
///
/// Performs size validation, JSON parsing, batch rejection, and JSON-RPC
/// classification in sequence.
///
/// # Errors
///
/// Returns [`FramingError`] for oversized lines (checked before JSON parsing),
/// invalid JSON, JSON arrays, missing or wrong `jsonrpc` version, invalid `id`
/// types, and messages with neither `id` nor `method`.
pub fn parse_frame(line: &str) -> Result<Frame, FramingError> {
    if line.len() > MAX_FRAME_BYTES {
        return Err(FramingError::MessageTooLarge {
            max_bytes: MAX_FRAME_BYTES,
        });
    }

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(FramingError::MalformedJson {
            reason: "empty message".to_string(),
        });
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|e| FramingError::MalformedJson {
        reason: e.to_string(),
    })?;

    if value.is_array() {
        return Err(FramingError::UnsupportedBatch);
    }

    let kind = classify_frame(&value).map_err(|e| match e {
        ClassifyError::MissingVersion => FramingError::MissingVersion,
        ClassifyError::UnsupportedVersion { version } => {
            FramingError::UnsupportedVersion { version }
        }
        ClassifyError::InvalidId => FramingError::MalformedJson {
            reason: "invalid id field".to_string(),
        },
        ClassifyError::Unclassifiable => FramingError::MalformedJson {
            reason: "message has neither id nor method".to_string(),
        },
    })?;

    Ok(Frame { kind, value })
}

/// Serialize `value` compactly and write it as one NDJSON line, then flush.
///
/// Flushing after every frame is mandatory: peers read line-by-line and a
/// frame sitting in a BufWriter is a hang, not a latency blip. Callers
/// serialize access to the writer (one mutex per stream) so lines never
/// interleave.
pub async fn write_frame<W>(writer: &mut W, value: &Value) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(value).map_err(|e| FramingError::MalformedJson {
        reason: e.to_string(),
    })?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a single line from an async buffered reader, enforcing a byte limit.
///
/// Unlike bare `read_line`, this will not allocate unbounded memory when the
/// peer streams bytes without a newline. If the accumulated bytes exceed
/// `max_bytes` before a newline is found, the remainder of the offending line
/// is drained and `MessageTooLarge` is returned, leaving the reader positioned
/// at the start of the next line.
///
/// Raw bytes are accumulated into a `Vec<u8>` so multi-byte UTF-8 characters
/// that straddle internal buffer boundaries are never split; the caller
/// converts to `String` after the full line is assembled.
///
/// # Returns
///
/// - `Ok(n)` where `n > 0`: a complete line was read into `buf`
/// - `Ok(0)`: EOF
/// - `Err(MessageTooLarge)`: line exceeded `max_bytes` without a newline
/// - `Err(Io)`: underlying I/O error
pub async fn bounded_read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<usize, FramingError> {
    let mut total = 0usize;
    loop {
        let available = reader.fill_buf().await.map_err(FramingError::Io)?;

        // EOF: return what we have (or 0 if nothing).
        if available.is_empty() {
            return Ok(total);
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let to_consume = pos + 1;
                if total + to_consume > max_bytes {
                    reader.consume(to_consume);
                    return Err(FramingError::MessageTooLarge { max_bytes });
                }
                buf.extend_from_slice(&available[..to_consume]);
                total += to_consume;
                reader.consume(to_consume);
                return Ok(total);
            }
            None => {
                let len = available.len();
                if total + len > max_bytes {
                    reader.consume(len);
                    drain_until_newline(reader).await;
                    return Err(FramingError::MessageTooLarge { max_bytes });
                }
                buf.extend_from_slice(available);
                total += len;
                reader.consume(len);
            }
        }
    }
}

/// Drain bytes from a reader until a newline or EOF is reached.
///
/// Used after an oversized line so the reader resynchronizes on the next
/// frame. A 30-second timeout prevents hanging on a stalled peer.
async fn drain_until_newline<R: AsyncBufRead + Unpin>(reader: &mut R) {
    let drain = async {
        loop {
            match reader.fill_buf().await {
                Ok([]) => return,
                Ok(buf) => {
                    if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                        let consume = pos + 1;
                        reader.consume(consume);
                        return;
                    }
                    let len = buf.len();
                    reader.consume(len);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "IO error while draining oversized frame");
                    return;
                }
            }
        }
    };
    if tokio::time::timeout(std::time::Duration::from_secs(30), drain)
        .await
        .is_err()
    {
        tracing::warn!("drain_until_newline timed out after 30s");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::JsonRpcId;
    use tokio::io::BufReader;

    // ─────────────────────────────────────────────────────────────────────
    // parse_frame tests
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_parse_request() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo"}}"#;
        let frame = parse_frame(line).unwrap();
        assert_eq!(
            frame.kind,
            JsonRpcMessageKind::Request {
                id: JsonRpcId::Number(1),
                method: "tools/call".to_string(),
            }
        );
        assert_eq!(frame.value["params"]["name"], "echo");
    }

    #[test]
    fn test_parse_response() {
        let line = r#"{"jsonrpc":"2.0","id":1,"result":{"content":[]}}"#;
        let frame = parse_frame(line).unwrap();
        assert_eq!(
            frame.kind,
            JsonRpcMessageKind::Response {
                id: JsonRpcId::Number(1),
            }
        );
    }

    #[test]
    fn test_parse_notification() {
        let line = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let frame = parse_frame(line).unwrap();
        assert_eq!(
            frame.kind,
            JsonRpcMessageKind::Notification {
                method: "notifications/initialized".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_oversized() {
        let big = "x".repeat(MAX_FRAME_BYTES + 1);
        let err = parse_frame(&big).unwrap_err();
        assert!(
            matches!(err, FramingError::MessageTooLarge { max_bytes } if max_bytes == MAX_FRAME_BYTES)
        );
    }

    #[test]
    fn test_parse_malformed() {
        let err = parse_frame(r#"{"truncated"#).unwrap_err();
        assert!(matches!(err, FramingError::MalformedJson { .. }));
    }

    #[test]
    fn test_parse_missing_version() {
        let err = parse_frame(r#"{"id":1,"method":"x"}"#).unwrap_err();
        assert!(matches!(err, FramingError::MissingVersion));
        assert!(err.is_invalid_request());
    }

    #[test]
    fn test_parse_wrong_version() {
        let err = parse_frame(r#"{"jsonrpc":"1.0","id":1,"method":"x"}"#).unwrap_err();
        assert!(matches!(err, FramingError::UnsupportedVersion { ref version } if version == "1.0"));
        assert!(err.is_invalid_request());
    }

    #[test]
    fn test_parse_batch_rejected() {
        let err = parse_frame(r#"[{"jsonrpc":"2.0","id":1,"method":"x"}]"#).unwrap_err();
        assert!(matches!(err, FramingError::UnsupportedBatch));
        assert!(!err.is_invalid_request());
    }

    #[test]
    fn test_parse_empty_line() {
        let err = parse_frame("  \n  ").unwrap_err();
        assert!(
            matches!(err, FramingError::MalformedJson { ref reason } if reason == "empty message")
        );
    }

    #[test]
    fn test_parse_large_valid_frame_under_limit() {
        // ~5 MiB payload under the limit is accepted.
        let payload = "A".repeat(5 * 1024 * 1024);
        let line = format!(r#"{{"jsonrpc":"2.0","id":1,"result":{{"data":"{payload}"}}}}"#);
        assert!(parse_frame(&line).is_ok());
    }

    // ─────────────────────────────────────────────────────────────────────
    // write_frame / bounded_read_line tests
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_write_frame_is_one_terminated_line() {
        let mut out = Vec::new();
        let value = serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}});
        write_frame(&mut out, &value).await.unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s.ends_with('\n'));
        assert_eq!(s.matches('\n').count(), 1);
        // Compact serialization: no pretty-printed newlines or indentation.
        assert!(!s.contains("  "));
    }

    #[tokio::test]
    async fn test_bounded_read_line_reads_lines() {
        let data = b"{\"a\":1}\n{\"b\":2}\n";
        let mut reader = BufReader::new(&data[..]);

        let mut buf = Vec::new();
        let n = bounded_read_line(&mut reader, &mut buf, 1024).await.unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf, b"{\"a\":1}\n");

        buf.clear();
        let n = bounded_read_line(&mut reader, &mut buf, 1024).await.unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf, b"{\"b\":2}\n");

        buf.clear();
        let n = bounded_read_line(&mut reader, &mut buf, 1024).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_bounded_read_line_oversized_resyncs() {
        let mut data = vec![b'x'; 64];
        data.push(b'\n');
        data.extend_from_slice(b"{\"ok\":true}\n");
        let mut reader = BufReader::new(&data[..]);

        let mut buf = Vec::new();
        let err = bounded_read_line(&mut reader, &mut buf, 16).await.unwrap_err();
        assert!(matches!(err, FramingError::MessageTooLarge { max_bytes: 16 }));

        // Reader is positioned at the next line.
        buf.clear();
        let n = bounded_read_line(&mut reader, &mut buf, 1024).await.unwrap();
        assert_eq!(&buf[..n], b"{\"ok\":true}\n");
    }

    #[tokio::test]
    async fn test_bounded_read_line_eof_without_newline() {
        let data = b"{\"jsonrpc\":\"2.0\",\"method\":\"x\"}";
        let mut reader = BufReader::new(&data[..]);
        let mut buf = Vec::new();
        let n = bounded_read_line(&mut reader, &mut buf, 1024).await.unwrap();
        assert_eq!(n, data.len());
        assert!(parse_frame(std::str::from_utf8(&buf).unwrap()).is_ok());
    }
}
