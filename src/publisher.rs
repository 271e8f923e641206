use futures::Stream;

mod error;
mod fanout;
mod ingest;
mod subject;
pub use error::*;
pub use ingest::*;
pub use subject::*;

/// A publisher delivers events to one or more listener streams.
///
/// call subscribe to attach a new listener.
pub trait Publisher {
    type Output;
    type Failure;
    type Stream: Stream<Item = Result<Self::Output, ErrorEvent<Self::Failure>>>;

    /// Create new listener stream for this publisher
    fn subscribe(&self) -> Self::Stream;
}
