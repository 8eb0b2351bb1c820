//! Stream merging - fan in many async sources into one
//!
//! Items from one source keep their relative order; there is no ordering
//! between sources. Sources are polled only when the consumer pulls, so
//! nothing is buffered beyond what each source holds itself.

use futures::stream::{self, SelectAll, Stream};

/// Merge any number of sources into a single stream.
///
/// Ends once every source has ended. Zero sources yield an empty stream.
/// Merged streams can be merged again (e.g. all stdouts with all stderrs).
pub fn merge<I, S>(sources: I) -> SelectAll<S>
where
    I: IntoIterator<Item = S>,
    S: Stream + Unpin,
{
    stream::select_all(sources)
}
