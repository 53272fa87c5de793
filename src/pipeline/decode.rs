//! Streaming SSE decoder (Bytes -> typed payloads)
//!
//! The body is read line by line. `data:` lines are decoded into the target type, a
//! `data:` line carrying the done signal ends the stream, `event:` lines and `:` comments
//! (keep-alives) are skipped, and anything else fails the stream.

use std::marker::PhantomData;

use bytes::Bytes;
use futures::{stream, FutureExt, StreamExt};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::config::StreamConfig;
use crate::pipeline::normalize::{ErrorEnvelope, NoEnvelope};
use crate::pipeline::PipelineError;
use crate::{BoxStream, Error, Result};

/// SSE decoder for payloads of type `T`, with `E` as the vendor's error envelope.
///
/// When a `data:` payload does not decode as `T`, it is decoded as `E`. On success the
/// stream ends with [`Error::Vendor`], otherwise with [`PipelineError::MalformedFrame`].
/// An empty payload (`{}` or `null`) is never an event and goes through the same fallback.
/// Strictness is the payload type's business: use `#[serde(deny_unknown_fields)]` on `T`
/// to reject payloads with unknown fields.
pub struct SseDecoder<T, E = NoEnvelope> {
    max_line_bytes: usize,
    done_signal: String,
    drain_on_close: bool,
    _marker: PhantomData<fn() -> (T, E)>,
}

impl<T, E> Default for SseDecoder<T, E>
where
    T: DeserializeOwned + Send + 'static,
    E: ErrorEnvelope,
{
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

impl<T, E> SseDecoder<T, E>
where
    T: DeserializeOwned + Send + 'static,
    E: ErrorEnvelope,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &StreamConfig) -> Self {
        Self {
            max_line_bytes: cfg.max_line_bytes,
            done_signal: cfg.done_signal.clone(),
            drain_on_close: cfg.drain_on_close,
            _marker: PhantomData,
        }
    }

    /// Decodes `input` lazily. The returned stream ends after the done signal, after
    /// the first error, or at end of input. A partial last line is still decoded.
    ///
    /// Errors are yielded as soon as they are found, whether or not the server keeps
    /// the body open.
    pub fn decode_stream(&self, input: BoxStream<'static, Bytes>) -> BoxStream<'static, T> {
        let max_line_bytes = self.max_line_bytes;
        let done_signal = self.done_signal.clone();
        let drain = self.drain_on_close;

        let stream = stream::unfold(DecodeState::new(input), move |mut st| {
            let done_signal = done_signal.clone();
            async move {
                loop {
                    if st.done {
                        return None;
                    }

                    if let Some(pos) = st.next_newline() {
                        let line: Vec<u8> = st.buf.drain(..=pos).collect();
                        st.scanned = 0;
                        let start = st.offset;
                        st.offset += line.len();
                        match parse_line::<T, E>(&line[..pos], start, &done_signal) {
                            Ok(Line::Skip) => continue,
                            Ok(Line::Event(v)) => return Some((Ok(v), st)),
                            Ok(Line::Done) => {
                                debug!(bytes = st.offset, "stream done");
                                st.close(drain, max_line_bytes);
                                return None;
                            }
                            Err(e) => {
                                st.close(drain, max_line_bytes);
                                return Some((Err(e), st));
                            }
                        }
                    }

                    if st.eof {
                        st.done = true;
                        if st.buf.is_empty() {
                            return None;
                        }
                        let line = std::mem::take(&mut st.buf);
                        return match parse_line::<T, E>(&line, st.offset, &done_signal) {
                            Ok(Line::Event(v)) => Some((Ok(v), st)),
                            Ok(Line::Skip) | Ok(Line::Done) => None,
                            Err(e) => Some((Err(e), st)),
                        };
                    }

                    if st.buf.len() > max_line_bytes {
                        st.close(drain, max_line_bytes);
                        let err = Error::from(PipelineError::LineTooLong {
                            limit: max_line_bytes,
                        });
                        return Some((Err(err), st));
                    }

                    match st.input.next().await {
                        Some(Ok(chunk)) => {
                            trace!(bytes = chunk.len(), "chunk received");
                            st.buf.extend_from_slice(&chunk);
                        }
                        Some(Err(e)) => {
                            st.done = true;
                            return Some((Err(e), st));
                        }
                        None => st.eof = true,
                    }
                }
            }
        });

        Box::pin(stream)
    }
}

/// Decodes an SSE body with default settings.
pub fn decode<T, E>(input: BoxStream<'static, Bytes>) -> BoxStream<'static, T>
where
    T: DeserializeOwned + Send + 'static,
    E: ErrorEnvelope,
{
    SseDecoder::<T, E>::new().decode_stream(input)
}

struct DecodeState {
    input: BoxStream<'static, Bytes>,
    buf: Vec<u8>,
    /// Prefix of `buf` known to hold no newline.
    scanned: usize,
    /// Bytes consumed before `buf[0]`.
    offset: usize,
    eof: bool,
    done: bool,
}

impl DecodeState {
    fn new(input: BoxStream<'static, Bytes>) -> Self {
        Self {
            input,
            buf: Vec::new(),
            scanned: 0,
            offset: 0,
            eof: false,
            done: false,
        }
    }

    fn next_newline(&mut self) -> Option<usize> {
        match self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            Some(i) => Some(self.scanned + i),
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    /// Ends decoding and releases the body. When asked to, first reads what the body
    /// already has buffered, up to `limit` bytes, without waiting for more.
    fn close(&mut self, drain: bool, limit: usize) {
        self.done = true;
        self.buf.clear();
        if drain {
            let mut drained = 0usize;
            while drained < limit {
                match self.input.next().now_or_never() {
                    Some(Some(Ok(chunk))) => drained += chunk.len(),
                    Some(None) | Some(Some(Err(_))) | None => break,
                }
            }
            if drained > 0 {
                debug!(bytes = drained, "drained unread body");
            }
        }
        self.input = Box::pin(stream::empty());
    }
}

enum Line<T> {
    Skip,
    Event(T),
    Done,
}

fn parse_line<T, E>(raw: &[u8], offset: usize, done_signal: &str) -> Result<Line<T>>
where
    T: DeserializeOwned,
    E: ErrorEnvelope,
{
    let text = std::str::from_utf8(raw).map_err(|e| PipelineError::InvalidUtf8 {
        offset: offset + e.valid_up_to(),
    })?;
    let line = text.trim();
    if line.is_empty() {
        return Ok(Line::Skip);
    }

    if let Some(rest) = line.strip_prefix("data:") {
        let data = rest.strip_prefix(' ').unwrap_or(rest);
        if data == done_signal {
            return Ok(Line::Done);
        }
        trace!(bytes = data.len(), "data frame");
        let reason = if is_empty_payload(data) {
            "payload carries no data".to_string()
        } else {
            match serde_json::from_str::<T>(data) {
                Ok(v) => return Ok(Line::Event(v)),
                Err(err) => err.to_string(),
            }
        };
        return match serde_json::from_str::<E>(data) {
            Ok(envelope) => Err(Error::Vendor(envelope.into_vendor_error())),
            Err(_) => Err(PipelineError::MalformedFrame {
                line: line.to_string(),
                reason,
            }
            .into()),
        };
    }

    if line.starts_with("event:") || line.starts_with(':') {
        debug!(line = %line, "ignored SSE line");
        return Ok(Line::Skip);
    }

    Err(PipelineError::UnexpectedLine {
        line: line.to_string(),
    }
    .into())
}

/// `{}` or `null`: decodes into an all-default payload without saying anything.
fn is_empty_payload(data: &str) -> bool {
    let data = data.trim();
    data == "null"
        || data
            .strip_prefix('{')
            .and_then(|d| d.strip_suffix('}'))
            .is_some_and(|inner| inner.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VendorError;
    use crate::transport::TransportError;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct Msg {
        text: String,
    }

    #[derive(Debug, Deserialize)]
    struct Envelope {
        error: EnvelopeBody,
    }

    #[derive(Debug, Deserialize)]
    struct EnvelopeBody {
        message: String,
    }

    impl ErrorEnvelope for Envelope {
        fn into_vendor_error(self) -> VendorError {
            VendorError {
                vendor: "test".into(),
                code: None,
                message: self.error.message,
            }
        }
    }

    fn body(chunks: Vec<&'static str>) -> BoxStream<'static, Bytes> {
        Box::pin(stream::iter(chunks).map(|s| Ok::<_, Error>(Bytes::from(s))))
    }

    async fn collect(input: BoxStream<'static, Bytes>) -> (Vec<Msg>, Option<Error>) {
        let mut out = Vec::new();
        let mut s = decode::<Msg, Envelope>(input);
        while let Some(item) = s.next().await {
            match item {
                Ok(m) => out.push(m),
                Err(e) => {
                    assert!(s.next().await.is_none(), "stream must end after an error");
                    return (out, Some(e));
                }
            }
        }
        (out, None)
    }

    #[tokio::test]
    async fn test_basic_and_done() {
        let (msgs, err) = collect(body(vec![
            "data: {\"text\":\"message 1\"}\n\ndata: {\"text\":\"message 2\"}\n\ndata: [DONE]\n\n",
        ]))
        .await;
        assert!(err.is_none());
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].text, "message 2");
    }

    #[tokio::test]
    async fn test_keep_alive_and_event_lines_ignored() {
        let (msgs, err) = collect(body(vec![
            "event: message\n\ndata: {\"text\":\"a\"}\n\n: keep-alive\n\n:\n\ndata: {\"text\":\"b\"}\n\n",
        ]))
        .await;
        assert!(err.is_none());
        assert_eq!(msgs, vec![Msg { text: "a".into() }, Msg { text: "b".into() }]);
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let (msgs, _) = collect(body(vec!["da", "ta: {\"te", "xt\":\"héllo\"}\r\n", "\r\n"])).await;
        assert_eq!(msgs, vec![Msg { text: "héllo".into() }]);
    }

    #[tokio::test]
    async fn test_partial_last_line_is_decoded() {
        let (msgs, err) = collect(body(vec!["data: {\"text\":\"tail\"}"])).await;
        assert!(err.is_none());
        assert_eq!(msgs.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed_frame() {
        let (_, err) = collect(body(vec!["data: {invalid json}\n\n"])).await;
        let err = err.unwrap();
        assert!(
            err.to_string()
                .contains("failed to decode server response \"data: {invalid json}\""),
            "{}",
            err
        );
        assert!(matches!(err, Error::Pipeline(PipelineError::MalformedFrame { .. })));
    }

    #[tokio::test]
    async fn test_unknown_field_is_rejected() {
        let (_, err) = collect(body(vec!["data: {\"text\":\"a\",\"extra\":1}\n\n"])).await;
        assert!(matches!(
            err,
            Some(Error::Pipeline(PipelineError::MalformedFrame { .. }))
        ));
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct Optional {
        text: Option<String>,
    }

    #[tokio::test]
    async fn test_empty_payload_is_not_an_event() {
        for frame in ["data: {}\n\n", "data: { }\n\n", "data: null\n\n"] {
            let mut s = decode::<Optional, NoEnvelope>(body(vec![frame]));
            let err = s.next().await.unwrap().unwrap_err();
            assert!(err.to_string().contains("payload carries no data"), "{}", err);
            assert!(s.next().await.is_none());
        }

        let mut s = decode::<Optional, NoEnvelope>(body(vec!["data: {\"text\":null}\n\n"]));
        assert!(s.next().await.unwrap().unwrap().text.is_none());
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct LooseEnvelope {
        error: Option<String>,
    }

    impl ErrorEnvelope for LooseEnvelope {
        fn into_vendor_error(self) -> VendorError {
            VendorError {
                vendor: "test".into(),
                code: None,
                message: self.error.unwrap_or_default(),
            }
        }
    }

    #[tokio::test]
    async fn test_empty_payload_falls_back_to_envelope() {
        let mut s = decode::<Optional, LooseEnvelope>(body(vec!["data: {}\n\n"]));
        let err = s.next().await.unwrap().unwrap_err();
        assert!(err.as_vendor().is_some(), "{}", err);
    }

    #[tokio::test]
    async fn test_unexpected_line() {
        let (_, err) = collect(body(vec!["unexpected: {\"text\":\"message\"}\n\n"])).await;
        assert_eq!(
            err.unwrap().to_string(),
            "Stream protocol error: unexpected line. expected \"data: \", got \"unexpected: {\\\"text\\\":\\\"message\\\"}\""
        );
    }

    #[tokio::test]
    async fn test_error_envelope_is_vendor_error() {
        let (msgs, err) = collect(body(vec![
            "data: {\"text\":\"a\"}\n\ndata: {\"error\":{\"message\":\"overloaded\"}}\n\n",
        ]))
        .await;
        assert_eq!(msgs.len(), 1);
        let err = err.unwrap();
        assert_eq!(err.as_vendor().map(|v| v.message.as_str()), Some("overloaded"));
    }

    #[tokio::test]
    async fn test_reader_error_is_transport_error() {
        let input: BoxStream<'static, Bytes> = Box::pin(stream::iter(vec![Err(Error::Transport(
            TransportError::Other("read error".into()),
        ))]));
        let (_, err) = collect(input).await;
        assert!(matches!(err, Some(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_invalid_utf8_reports_offset() {
        let input: BoxStream<'static, Bytes> = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"text\":\"a\"}\n")),
            Ok(Bytes::from_static(b"data: \xff\n")),
        ]));
        let (_, err) = collect(input).await;
        match err {
            Some(Error::Pipeline(PipelineError::InvalidUtf8 { offset })) => assert_eq!(offset, 25),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let cfg = StreamConfig {
            max_line_bytes: 1024,
            ..StreamConfig::default()
        };
        let big: &'static str = Box::leak("x".repeat(2048).into_boxed_str());
        let mut s = SseDecoder::<Msg, NoEnvelope>::from_config(&cfg).decode_stream(body(vec![big]));
        let err = s.next().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Pipeline(PipelineError::LineTooLong { limit: 1024 })));
    }

    fn held_open(head: &'static str) -> BoxStream<'static, Bytes> {
        let head = stream::iter(vec![Ok::<_, Error>(Bytes::from(head))]);
        Box::pin(head.chain(stream::pending()))
    }

    #[tokio::test]
    async fn test_errors_surface_while_body_is_held_open() {
        for head in ["garbage line\n", "data: {invalid json}\n"] {
            let mut s = decode::<Msg, Envelope>(held_open(head));
            let item = tokio::time::timeout(std::time::Duration::from_secs(2), s.next())
                .await
                .expect("error must not wait for the body to end");
            assert!(matches!(item, Some(Err(Error::Pipeline(_)))), "{:?}", item);
            assert!(s.next().await.is_none());
        }

        let cfg = StreamConfig {
            max_line_bytes: 16,
            ..StreamConfig::default()
        };
        let mut s = SseDecoder::<Msg, NoEnvelope>::from_config(&cfg)
            .decode_stream(held_open("data: 0123456789abcdef"));
        let item = tokio::time::timeout(std::time::Duration::from_secs(2), s.next())
            .await
            .expect("overlong line must be reported");
        assert!(matches!(item, Some(Err(Error::Pipeline(PipelineError::LineTooLong { limit: 16 })))));
    }

    #[tokio::test]
    async fn test_done_does_not_wait_for_held_open_body() {
        let mut s = decode::<Msg, Envelope>(held_open("data: {\"text\":\"a\"}\n\ndata: [DONE]\n\n"));
        assert_eq!(s.next().await.unwrap().unwrap().text, "a");
        let end = tokio::time::timeout(std::time::Duration::from_secs(2), s.next()).await;
        assert!(matches!(end, Ok(None)));
    }

    #[tokio::test]
    async fn test_drain_is_bounded() {
        let read = Arc::new(AtomicUsize::new(0));
        let counter = read.clone();
        let tail = stream::repeat(()).map(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(Bytes::from_static(b"0123456789"))
        });
        let input: BoxStream<'static, Bytes> =
            Box::pin(stream::iter(vec![Ok::<_, Error>(Bytes::from_static(b"data: [DONE]\n"))]).chain(tail));
        let cfg = StreamConfig {
            max_line_bytes: 100,
            ..StreamConfig::default()
        };
        let mut s = SseDecoder::<Msg, NoEnvelope>::from_config(&cfg).decode_stream(input);
        assert!(s.next().await.is_none());
        assert_eq!(read.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_rest_of_body_drained_after_done() {
        let read = Arc::new(AtomicUsize::new(0));
        let counter = read.clone();
        let chunks = vec!["data: [DONE]\n", "data: {\"text\":\"late\"}\n", "trailing"];
        let input: BoxStream<'static, Bytes> = Box::pin(stream::iter(chunks).map(move |s| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(s))
        }));
        let (msgs, err) = collect(input).await;
        assert!(msgs.is_empty());
        assert!(err.is_none());
        assert_eq!(read.load(Ordering::SeqCst), 3);
    }
}
