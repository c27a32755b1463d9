use anyhow::Error;
use tokio::io::AsyncRead;
use tokio_stream::Stream;

use crate::xmpp::stream_header::StreamHeader;

use super::Element;

pub mod rusty_xml;

#[derive(Debug)]
pub enum Frame {
    StreamStart(StreamHeader),
    XmlFragment(Element),
    StreamEnd,
}

/// Default cap on bytes that may be fed for a single top-level element
/// before a frame is emitted, used when a parser is built without an
/// explicit limit (tests, `Default::default()` settings).
pub const DEFAULT_MAX_STANZA_SIZE: usize = 65536;

pub trait StreamParser<R: AsyncRead + Unpin>: Stream<Item = Result<Frame, Error>> + Unpin {
    fn new(reader: R) -> Self;

    fn with_max_stanza_size(reader: R, max_stanza_size: usize) -> Self
    where
        Self: Sized,
    {
        let _ = max_stanza_size;
        Self::new(reader)
    }

    fn into_inner(self) -> R;
}
