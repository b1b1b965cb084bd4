//! Script injection into a streamed HTML body.
//!
//! Bytes are held back until `</head>` shows up, the head scripts are
//! spliced in front of it, and everything after passes through untouched.
//! Body scripts follow the last source chunk. If `</head>` does not appear
//! within the lookahead limit (or before the stream ends), the head
//! scripts are emitted at the very front instead. Either way they are
//! emitted exactly once.

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use memchr::memmem;
use trellis_core::BoxByteStream;

/// Bytes buffered while looking for `</head>` before giving up.
pub const DEFAULT_LOOKAHEAD: usize = 64 * 1024;

const HEAD_CLOSE: &[u8] = b"</head>";

enum Phase {
    Searching,
    Passing,
    Done,
}

struct Injector {
    source: BoxByteStream,
    pending: BytesMut,
    /// Bytes of `pending` already searched, minus a tag-length overlap.
    searched: usize,
    head: Option<Bytes>,
    body: Option<Bytes>,
    limit: usize,
    phase: Phase,
}

impl Injector {
    fn find_head_close(&mut self) -> Option<usize> {
        let from = self.searched.saturating_sub(HEAD_CLOSE.len() - 1);
        let window = self.pending[from..].to_ascii_lowercase();
        let found = memmem::find(&window, HEAD_CLOSE).map(|i| i + from);
        self.searched = self.pending.len();
        found
    }

    /// Head scripts followed by `rest`, marking the head as emitted.
    fn emit_with_head_at(&mut self, at: usize) -> Bytes {
        let pending = self.pending.split().freeze();
        let head = self.head.take().unwrap_or_default();
        let mut out = BytesMut::with_capacity(pending.len() + head.len());
        out.extend_from_slice(&pending[..at]);
        out.extend_from_slice(&head);
        out.extend_from_slice(&pending[at..]);
        out.freeze()
    }
}

/// Inject scripts with the default lookahead.
pub fn inject_into_stream(source: BoxByteStream, head: &[String], body: &[String]) -> BoxByteStream {
    inject_into_stream_with_limit(source, head, body, DEFAULT_LOOKAHEAD)
}

pub fn inject_into_stream_with_limit(
    source: BoxByteStream,
    head: &[String],
    body: &[String],
    limit: usize,
) -> BoxByteStream {
    let joined = |parts: &[String]| {
        let s = parts.concat();
        if s.is_empty() { None } else { Some(Bytes::from(s)) }
    };
    let state = Injector {
        source,
        pending: BytesMut::new(),
        searched: 0,
        head: joined(head),
        body: joined(body),
        limit,
        phase: Phase::Searching,
    };

    Box::pin(futures_util::stream::unfold(state, |mut st| async move {
        loop {
            match st.phase {
                Phase::Done => return None,
                Phase::Passing => {
                    return match st.source.next().await {
                        Some(chunk) => Some((chunk, st)),
                        None => {
                            st.phase = Phase::Done;
                            st.body.take().map(|body| (Ok(body), st))
                        }
                    };
                }
                Phase::Searching => match st.source.next().await {
                    Some(Ok(chunk)) => {
                        st.pending.extend_from_slice(&chunk);
                        if let Some(at) = st.find_head_close() {
                            st.phase = Phase::Passing;
                            let out = st.emit_with_head_at(at);
                            return Some((Ok(out), st));
                        }
                        if st.pending.len() > st.limit {
                            st.phase = Phase::Passing;
                            let out = st.emit_with_head_at(0);
                            return Some((Ok(out), st));
                        }
                    }
                    Some(Err(err)) => {
                        st.phase = Phase::Done;
                        return Some((Err(err), st));
                    }
                    None => {
                        st.phase = Phase::Done;
                        let mut out = BytesMut::new();
                        if let Some(head) = st.head.take() {
                            out.extend_from_slice(&head);
                        }
                        out.extend_from_slice(&st.pending.split());
                        if let Some(body) = st.body.take() {
                            out.extend_from_slice(&body);
                        }
                        if out.is_empty() {
                            return None;
                        }
                        return Some((Ok(out.freeze()), st));
                    }
                },
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::streaming::{collect_stream, stream_from_chunks};

    fn run(chunks: Vec<&'static str>, limit: usize) -> String {
        let stream = inject_into_stream_with_limit(
            stream_from_chunks(chunks),
            &["<H/>".to_string()],
            &["<B/>".to_string()],
            limit,
        );
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        String::from_utf8(rt.block_on(collect_stream(stream)).unwrap()).unwrap()
    }

    #[test]
    fn test_head_close_split_across_chunks() {
        let out = run(vec!["<html><head><title>t</title></he", "ad><body>x", "</body></html>"], 1024);
        assert_eq!(
            out,
            "<html><head><title>t</title><H/></head><body>x</body></html><B/>"
        );
        assert_eq!(out.matches("<H/>").count(), 1);
    }

    #[test]
    fn test_head_close_split_one_byte_at_a_time() {
        let doc = "<html><HEAD></HEAD><body></body></html>";
        let chunks: Vec<&'static str> = (0..doc.len()).map(|i| &doc[i..i + 1]).collect();
        let out = run(chunks, 1024);
        assert_eq!(out, "<html><HEAD><H/></HEAD><body></body></html><B/>");
    }

    #[test]
    fn test_no_head_emits_at_front() {
        let out = run(vec!["<p>a</p>", "<p>b</p>"], 1024);
        assert_eq!(out, "<H/><p>a</p><p>b</p><B/>");
    }

    #[test]
    fn test_lookahead_limit_flushes() {
        let out = run(vec!["0123456789", "abcdefghij", "</head>rest"], 12);
        assert_eq!(out, "<H/>0123456789abcdefghij</head>rest<B/>");
        assert_eq!(out.matches("<H/>").count(), 1);
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(run(vec![], 1024), "<H/><B/>");
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let source: BoxByteStream = Box::pin(futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"<html>")),
            Err(trellis_core::Error::Internal("boom".into())),
        ]));
        let out = inject_into_stream(source, &[], &[]);
        assert!(collect_stream(out).await.is_err());
    }
}
