// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Newline-delimited JSON decoding over chunked byte streams.

use std::collections::VecDeque;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::error::TraceServerError;

/// Splits incoming chunks into complete lines.
///
/// A line may span any number of chunks; bytes after the last newline stay
/// buffered until more data arrives or [`NdjsonDecoder::finish`] is called.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed. Blank lines are skipped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..pos]);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Flush a trailing line that had no terminating newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

fn parse_line<T: DeserializeOwned>(line: &str) -> Result<T, TraceServerError> {
    serde_json::from_str(line).map_err(|e| TraceServerError::Parse(format!("{}: {}", e, line)))
}

/// Decode a byte stream of NDJSON records into a stream of `T`.
///
/// A transport error is yielded once and ends the stream.
pub fn decode_ndjson<S, B, E, T>(bytes: S) -> BoxStream<'static, Result<T, TraceServerError>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<TraceServerError> + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let state = (bytes.boxed(), NdjsonDecoder::new(), VecDeque::<String>::new(), false);

    stream::unfold(state, |(mut source, mut decoder, mut ready, mut done)| async move {
        loop {
            if let Some(line) = ready.pop_front() {
                let item = parse_line::<T>(&line);
                return Some((item, (source, decoder, ready, done)));
            }
            if done {
                return None;
            }
            match source.next().await {
                Some(Ok(chunk)) => ready.extend(decoder.feed(chunk.as_ref())),
                Some(Err(e)) => {
                    done = true;
                    ready.clear();
                    return Some((Err(e.into()), (source, decoder, ready, done)));
                }
                None => {
                    done = true;
                    ready.extend(decoder.finish());
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_line_split_across_chunks() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.feed(b"{\"id\":").is_empty());
        assert_eq!(decoder.feed(b"1}\n{\"id\""), vec!["{\"id\":1}".to_string()]);
        assert_eq!(decoder.feed(b":2}\n\n"), vec!["{\"id\":2}".to_string()]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_trailing_line_without_newline() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.feed(b"{\"id\":3}").is_empty());
        assert_eq!(decoder.finish(), Some("{\"id\":3}".to_string()));
    }

    #[tokio::test]
    async fn test_decode_stream() {
        let chunks: Vec<Result<Vec<u8>, TraceServerError>> = vec![
            Ok(b"{\"a\":1}\n{\"a\"".to_vec()),
            Ok(b":2}\n{\"a\":3}".to_vec()),
        ];
        let values: Vec<Value> = decode_ndjson(stream::iter(chunks))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(values, vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]);
    }

    #[tokio::test]
    async fn test_decode_stream_error_ends() {
        let chunks: Vec<Result<Vec<u8>, TraceServerError>> = vec![
            Ok(b"{\"a\":1}\n".to_vec()),
            Err(TraceServerError::Network("reset".to_string())),
            Ok(b"{\"a\":2}\n".to_vec()),
        ];
        let items: Vec<Result<Value, TraceServerError>> =
            decode_ndjson(stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(TraceServerError::Network(_))));
    }

    #[tokio::test]
    async fn test_decode_stream_bad_line() {
        let chunks: Vec<Result<Vec<u8>, TraceServerError>> = vec![Ok(b"not json\n".to_vec())];
        let items: Vec<Result<Value, TraceServerError>> =
            decode_ndjson(stream::iter(chunks)).collect().await;
        assert!(matches!(items[0], Err(TraceServerError::Parse(_))));
    }
}
