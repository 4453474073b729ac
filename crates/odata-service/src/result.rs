//! What the query processor hands back.

use std::fmt;

use crate::error::ProcessorError;
use crate::value::ODataValue;

pub enum QueryResult {
    Empty,
    Single(ODataValue),
    Collection {
        values: Vec<ODataValue>,
        /// Total count for `$count=true`, when different from `values.len()`.
        count: Option<u64>,
    },
    Lazy(LazySequence),
}

impl QueryResult {
    pub fn collection(values: Vec<ODataValue>) -> Self {
        QueryResult::Collection {
            values,
            count: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueryResult::Empty => "empty",
            QueryResult::Single(_) => "single value",
            QueryResult::Collection { .. } => "collection",
            QueryResult::Lazy(_) => "lazy sequence",
        }
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryResult::Empty => f.write_str("Empty"),
            QueryResult::Single(v) => f.debug_tuple("Single").field(v).finish(),
            QueryResult::Collection { values, count } => f
                .debug_struct("Collection")
                .field("len", &values.len())
                .field("count", count)
                .finish(),
            QueryResult::Lazy(seq) => fmt::Debug::fmt(seq, f),
        }
    }
}

/// A backend cursor producing values on demand.
///
/// `close` releases whatever the cursor holds. [`LazySequence`] calls it
/// exactly once.
pub trait ResultSource: Send {
    fn next_value(&mut self) -> Option<Result<ODataValue, ProcessorError>>;

    fn close(&mut self) -> Result<(), ProcessorError> {
        Ok(())
    }
}

struct IterSource<I>(I);

impl<I> ResultSource for IterSource<I>
where
    I: Iterator<Item = Result<ODataValue, ProcessorError>> + Send,
{
    fn next_value(&mut self) -> Option<Result<ODataValue, ProcessorError>> {
        self.0.next()
    }
}

/// A consume-once result stream with scoped release.
///
/// The source is closed by [`LazySequence::close`] or, failing that, when the
/// sequence is dropped; whichever comes first. Nothing is pulled after the
/// source has been closed.
pub struct LazySequence {
    source: Option<Box<dyn ResultSource>>,
    count: Option<u64>,
    pulled: u64,
}

impl LazySequence {
    pub fn new(source: impl ResultSource + 'static) -> Self {
        Self {
            source: Some(Box::new(source)),
            count: None,
            pulled: 0,
        }
    }

    pub fn from_results<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Result<ODataValue, ProcessorError>>,
        I::IntoIter: Send + 'static,
    {
        Self::new(IterSource(iter.into_iter()))
    }

    pub fn from_values(values: Vec<ODataValue>) -> Self {
        Self::from_results(values.into_iter().map(Ok))
    }

    /// Total element count, if the backend knows it up front.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn count(&self) -> Option<u64> {
        self.count
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    /// Pull the next element. Returns `None` once the source is exhausted
    /// or closed.
    pub fn pull(&mut self) -> Option<Result<ODataValue, ProcessorError>> {
        let item = self.source.as_mut()?.next_value();
        if item.is_some() {
            self.pulled += 1;
        }
        item
    }

    /// Release the source and report how that went.
    pub fn close(mut self) -> Result<(), ProcessorError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), ProcessorError> {
        match self.source.take() {
            Some(mut source) => {
                tracing::trace!(pulled = self.pulled, "closing lazy sequence");
                source.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for LazySequence {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "closing an abandoned lazy sequence failed");
        }
    }
}

impl fmt::Debug for LazySequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazySequence")
            .field("count", &self.count)
            .field("pulled", &self.pulled)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        remaining: u32,
        closes: Arc<AtomicUsize>,
    }

    impl ResultSource for Counting {
        fn next_value(&mut self) -> Option<Result<ODataValue, ProcessorError>> {
            if self.remaining == 0 {
                return None;
            }
            self.remaining -= 1;
            Some(Ok(ODataValue::Int(i64::from(self.remaining))))
        }

        fn close(&mut self) -> Result<(), ProcessorError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn explicit_close_runs_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut seq = LazySequence::new(Counting {
            remaining: 3,
            closes: closes.clone(),
        });
        assert!(matches!(seq.pull(), Some(Ok(ODataValue::Int(2)))));
        seq.close().expect("close");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_an_abandoned_sequence_closes_it() {
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let mut seq = LazySequence::new(Counting {
                remaining: 10,
                closes: closes.clone(),
            });
            let _ = seq.pull();
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn from_values_keeps_order() {
        let mut seq = LazySequence::from_values(vec![1i64.into(), 2i64.into()]).with_count(2);
        assert_eq!(seq.count(), Some(2));
        let mut seen = Vec::new();
        while let Some(v) = seq.pull() {
            seen.push(v.expect("value"));
        }
        assert_eq!(seen, vec![ODataValue::Int(1), ODataValue::Int(2)]);
    }
}
