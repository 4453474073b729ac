//! Chunked rendering of lazy sequences.
//!
//! ```text
//! NotStarted --first--> Started --next--> Body --next--> Body ... --> Ended
//!      \_____________________ empty source _____________________/
//! ```
//!
//! Each fragment is written and flushed before the next element is pulled,
//! so at most one fragment is buffered. Headers travel with the first chunk
//! only. The source is closed on every exit path; when streaming fails the
//! original error is returned and a failing close is only logged.

use std::io;

use crate::error::{ODataError, RenderError};
use crate::request::Headers;
use crate::result::LazySequence;
use crate::value::ODataValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    NotStarted,
    Started,
    Body,
    Ended,
}

/// One flush-delimited piece of a streamed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderChunk {
    /// Present on the first chunk only.
    pub headers: Option<Headers>,
    pub body: Vec<u8>,
}

/// Where chunks go: a connection, a buffer, a test recorder.
pub trait ChunkSink {
    fn write_chunk(&mut self, chunk: RenderChunk) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

/// Collects everything into memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    pub headers: Option<Headers>,
    pub body: Vec<u8>,
    pub chunks: usize,
}

impl ChunkSink for BufferSink {
    fn write_chunk(&mut self, chunk: RenderChunk) -> io::Result<()> {
        if let Some(headers) = chunk.headers {
            self.headers.get_or_insert(headers);
        }
        self.body.extend_from_slice(&chunk.body);
        self.chunks += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The three-phase protocol a streaming format implements.
pub trait StreamRenderer {
    /// Response headers, sent with the first chunk.
    fn headers(&self) -> Headers;

    /// Envelope opening plus the first element.
    fn start(&mut self, first: &ODataValue) -> Result<Vec<u8>, RenderError>;

    /// Every later element.
    fn body(&mut self, element: &ODataValue) -> Result<Vec<u8>, RenderError>;

    /// Envelope closing. `last` is `None` when the source was empty, in which
    /// case the fragment must be a complete, empty document.
    fn end(&mut self, last: Option<&ODataValue>) -> Result<Vec<u8>, RenderError>;
}

impl<R: StreamRenderer + ?Sized> StreamRenderer for Box<R> {
    fn headers(&self) -> Headers {
        (**self).headers()
    }

    fn start(&mut self, first: &ODataValue) -> Result<Vec<u8>, RenderError> {
        (**self).start(first)
    }

    fn body(&mut self, element: &ODataValue) -> Result<Vec<u8>, RenderError> {
        (**self).body(element)
    }

    fn end(&mut self, last: Option<&ODataValue>) -> Result<Vec<u8>, RenderError> {
        (**self).end(last)
    }
}

/// Counts of the transitions one run went through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub started: u64,
    pub bodies: u64,
    pub ended: u64,
    pub chunks: u64,
    pub bytes: u64,
}

pub struct ContentStreamer<R> {
    renderer: R,
    state: StreamState,
    pending_headers: Option<Headers>,
    report: StreamReport,
}

impl<R: StreamRenderer> ContentStreamer<R> {
    pub fn new(renderer: R) -> Self {
        let headers = renderer.headers();
        Self {
            renderer,
            state: StreamState::NotStarted,
            pending_headers: Some(headers),
            report: StreamReport::default(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Stream `sequence` into `sink` and release it.
    pub fn run<S: ChunkSink + ?Sized>(
        mut self,
        mut sequence: LazySequence,
        sink: &mut S,
    ) -> Result<StreamReport, ODataError> {
        match self.drive(&mut sequence, sink) {
            Ok(()) => {
                sequence.close()?;
                Ok(self.report)
            }
            Err(err) => {
                if let Err(close_err) = sequence.close() {
                    tracing::warn!(
                        error = %close_err,
                        primary = %err,
                        "closing the result source failed after a streaming error"
                    );
                }
                Err(err)
            }
        }
    }

    fn drive<S: ChunkSink + ?Sized>(
        &mut self,
        sequence: &mut LazySequence,
        sink: &mut S,
    ) -> Result<(), ODataError> {
        let mut last: Option<ODataValue> = None;
        while let Some(item) = sequence.pull() {
            let element = item?;
            let fragment = match self.state {
                StreamState::NotStarted => {
                    self.transition(StreamState::Started);
                    self.renderer.start(&element)?
                }
                StreamState::Started | StreamState::Body => {
                    self.transition(StreamState::Body);
                    self.renderer.body(&element)?
                }
                StreamState::Ended => break,
            };
            self.emit(sink, fragment)?;
            last = Some(element);
        }

        let fragment = self.renderer.end(last.as_ref())?;
        self.transition(StreamState::Ended);
        self.emit(sink, fragment)
    }

    fn transition(&mut self, next: StreamState) {
        match next {
            StreamState::Started => self.report.started += 1,
            StreamState::Body => self.report.bodies += 1,
            StreamState::Ended => self.report.ended += 1,
            StreamState::NotStarted => {}
        }
        tracing::trace!(from = ?self.state, to = ?next, "stream transition");
        self.state = next;
    }

    fn emit<S: ChunkSink + ?Sized>(&mut self, sink: &mut S, body: Vec<u8>) -> Result<(), ODataError> {
        self.report.chunks += 1;
        self.report.bytes += body.len() as u64;
        sink.write_chunk(RenderChunk {
            headers: self.pending_headers.take(),
            body,
        })?;
        sink.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessorError;
    use crate::result::ResultSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Writes `[` / `,n` / `]` and fails on a chosen element.
    struct Brackets {
        fail_on: Option<i64>,
    }

    impl StreamRenderer for Brackets {
        fn headers(&self) -> Headers {
            vec![("Content-Type".to_string(), "text/test".to_string())]
        }

        fn start(&mut self, first: &ODataValue) -> Result<Vec<u8>, RenderError> {
            Ok(format!("[{}", self.element(first)?).into_bytes())
        }

        fn body(&mut self, element: &ODataValue) -> Result<Vec<u8>, RenderError> {
            Ok(format!(",{}", self.element(element)?).into_bytes())
        }

        fn end(&mut self, last: Option<&ODataValue>) -> Result<Vec<u8>, RenderError> {
            Ok(if last.is_some() { "]" } else { "[]" }.as_bytes().to_vec())
        }
    }

    impl Brackets {
        fn element(&self, v: &ODataValue) -> Result<i64, RenderError> {
            let n = v.as_i64().unwrap_or_default();
            if Some(n) == self.fail_on {
                return Err(RenderError::ShapeMismatch {
                    path: "$".to_string(),
                    expected: "Edm.Int64".to_string(),
                    found: "poison".to_string(),
                });
            }
            Ok(n)
        }
    }

    struct Source {
        next: i64,
        len: i64,
        error_at: Option<i64>,
        close_fails: bool,
        closes: Arc<AtomicUsize>,
    }

    impl ResultSource for Source {
        fn next_value(&mut self) -> Option<Result<ODataValue, ProcessorError>> {
            if self.next >= self.len {
                return None;
            }
            let n = self.next;
            self.next += 1;
            if Some(n) == self.error_at {
                return Some(Err(ProcessorError::internal("cursor lost")));
            }
            Some(Ok(ODataValue::Int(n)))
        }

        fn close(&mut self) -> Result<(), ProcessorError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.close_fails {
                Err(ProcessorError::internal("close failed"))
            } else {
                Ok(())
            }
        }
    }

    fn source(len: i64, closes: &Arc<AtomicUsize>) -> Source {
        Source {
            next: 0,
            len,
            error_at: None,
            close_fails: false,
            closes: closes.clone(),
        }
    }

    #[derive(Default)]
    struct Recorder {
        chunks: Vec<RenderChunk>,
        flushes: usize,
        fail_after: Option<usize>,
    }

    impl ChunkSink for Recorder {
        fn write_chunk(&mut self, chunk: RenderChunk) -> io::Result<()> {
            if self.fail_after == Some(self.chunks.len()) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"));
            }
            self.chunks.push(chunk);
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn n_elements_make_one_start_n_minus_one_bodies_one_end() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut recorder = Recorder::default();
        let report = ContentStreamer::new(Brackets { fail_on: None })
            .run(LazySequence::new(source(4, &closes)), &mut recorder)
            .expect("stream");

        assert_eq!((report.started, report.bodies, report.ended), (1, 3, 1));
        assert_eq!(recorder.chunks.len(), 5);
        assert_eq!(recorder.flushes, 5);
        assert!(recorder.chunks[0].headers.is_some());
        assert!(recorder.chunks[1..].iter().all(|c| c.headers.is_none()));
        let body: Vec<u8> = recorder.chunks.iter().flat_map(|c| c.body.clone()).collect();
        assert_eq!(String::from_utf8(body).expect("utf8"), "[0,1,2,3]");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_source_skips_start_and_still_ends() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut recorder = Recorder::default();
        let report = ContentStreamer::new(Brackets { fail_on: None })
            .run(LazySequence::new(source(0, &closes)), &mut recorder)
            .expect("stream");

        assert_eq!((report.started, report.bodies, report.ended), (0, 0, 1));
        assert_eq!(recorder.chunks.len(), 1);
        assert!(recorder.chunks[0].headers.is_some());
        assert_eq!(recorder.chunks[0].body, b"[]");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn source_error_closes_once_and_surfaces_the_original_error() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut src = source(5, &closes);
        src.error_at = Some(2);
        src.close_fails = true;
        let mut recorder = Recorder::default();
        let err = ContentStreamer::new(Brackets { fail_on: None })
            .run(LazySequence::new(src), &mut recorder)
            .expect_err("source error");

        match err {
            ODataError::Processor(e) => assert_eq!(e.message, "cursor lost"),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.chunks.len(), 2);
    }

    #[test]
    fn renderer_error_also_releases_the_source() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut recorder = Recorder::default();
        let err = ContentStreamer::new(Brackets { fail_on: Some(1) })
            .run(LazySequence::new(source(3, &closes)), &mut recorder)
            .expect_err("render error");
        assert!(matches!(err, ODataError::Render(_)));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        // The failing fragment produced no bytes.
        assert_eq!(recorder.chunks.len(), 1);
    }

    #[test]
    fn disconnected_sink_stops_pulling() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut recorder = Recorder {
            fail_after: Some(1),
            ..Recorder::default()
        };
        let err = ContentStreamer::new(Brackets { fail_on: None })
            .run(LazySequence::new(source(1_000, &closes)), &mut recorder)
            .expect_err("broken pipe");
        assert!(matches!(err, ODataError::Io(_)));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn buffer_sink_keeps_first_headers() {
        let mut sink = BufferSink::default();
        ContentStreamer::new(Brackets { fail_on: None })
            .run(LazySequence::from_values(vec![7i64.into()]), &mut sink)
            .expect("stream");
        assert_eq!(sink.body, b"[7]");
        assert_eq!(sink.chunks, 2);
        assert_eq!(sink.headers.map(|h| h.len()), Some(1));
    }
}
