use std::pin::Pin;
use std::task::{ready, Context, Poll};

use anyhow::{anyhow, Error};
use indexmap::IndexMap;
use rustyxml::{Element as RustyXmlElement, ElementBuilder, Event, Parser, Xml};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_stream::Stream;

use crate::xml::namespaces;
use crate::xml::stream_parser::{Frame, StreamParser, DEFAULT_MAX_STANZA_SIZE};
use crate::xml::{Element, Node};
use crate::xmpp::stream_header::{LanguageTag, StreamHeader};

const READ_CHUNK_SIZE: usize = 4096;

fn valid_stream_tag(name: &str, namespace: &Option<String>) -> bool {
    name == "stream" && namespace.as_deref() == Some(namespaces::XMPP_STREAMS)
}

impl From<RustyXmlElement> for Element {
    fn from(element: RustyXmlElement) -> Self {
        let mut attributes = IndexMap::new();
        for ((name, ns), value) in element.attributes {
            attributes.insert((name, ns), value);
        }

        let children = element
            .children
            .into_iter()
            .map(|child| match child {
                Xml::ElementNode(child) => Node::Element(child.into()),
                Xml::CharacterNode(text) => Node::Text(text),
                Xml::CDATANode(cdata) => Node::CData(cdata),
                Xml::PINode(pi) => Node::ProcessingInstruction(pi),
            })
            .collect();

        Element {
            name: element.name,
            namespace: element.ns,
            attributes,
            children,
        }
    }
}

/// Thrown when a client keeps sending bytes for a single top-level stanza
/// without closing it, past the configured limit. Surfaced as
/// `policy-violation` at the actor layer.
#[derive(Debug, thiserror::Error)]
#[error("stanza exceeds maximum size of {limit} bytes")]
pub struct OversizedStanza {
    pub limit: usize,
}

pub struct RustyXmlStreamParser<R: AsyncRead + Unpin> {
    reader: R,
    parser: Parser,
    element_builder: ElementBuilder,
    max_stanza_size: usize,
    bytes_since_last_frame: usize,
}

impl<R: AsyncRead + Unpin> RustyXmlStreamParser<R> {
    fn build_stream_header(attributes: &IndexMap<(String, Option<String>), String>) -> StreamHeader {
        StreamHeader {
            from: attributes
                .get(&("from".to_string(), None))
                .and_then(|jid| jid.parse().ok()),
            to: attributes
                .get(&("to".to_string(), None))
                .and_then(|jid| jid.parse().ok()),
            id: None,
            language: attributes
                .get(&("lang".to_string(), Some(namespaces::XML.to_string())))
                .map(|lang| LanguageTag(lang.to_string())),
            version: attributes.get(&("version".to_string(), None)).cloned(),
        }
    }
}

impl<R: AsyncRead + Unpin> StreamParser<R> for RustyXmlStreamParser<R> {
    fn new(reader: R) -> Self {
        Self::with_max_stanza_size(reader, DEFAULT_MAX_STANZA_SIZE)
    }

    fn with_max_stanza_size(reader: R, max_stanza_size: usize) -> Self {
        Self {
            reader,
            parser: Parser::new(),
            element_builder: ElementBuilder::new(),
            max_stanza_size,
            bytes_since_last_frame: 0,
        }
    }

    fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: AsyncRead + Unpin> Unpin for RustyXmlStreamParser<R> {}

impl<R: AsyncRead + Unpin> Stream for RustyXmlStreamParser<R> {
    type Item = Result<Frame, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            while let Some(parser_result) = self.parser.next() {
                match parser_result {
                    Ok(Event::ElementStart(ref tag)) if valid_stream_tag(&tag.name, &tag.ns) => {
                        let mut attributes = IndexMap::new();
                        for ((name, ns), value) in &tag.attributes {
                            attributes.insert((name.clone(), ns.clone()), value.clone());
                        }
                        let header = Self::build_stream_header(&attributes);
                        self.bytes_since_last_frame = 0;
                        return Poll::Ready(Some(Ok(Frame::StreamStart(header))));
                    }
                    Ok(Event::ElementEnd(ref tag)) if valid_stream_tag(&tag.name, &tag.ns) => {
                        self.bytes_since_last_frame = 0;
                        return Poll::Ready(Some(Ok(Frame::StreamEnd)));
                    }
                    Err(err) => {
                        return Poll::Ready(Some(Err(anyhow!(err))));
                    }
                    Ok(event) => {
                        if let Some(builder_result) = self.element_builder.handle_event(Ok(event)) {
                            self.bytes_since_last_frame = 0;
                            let frame_result = match builder_result {
                                Ok(element) => Ok(Frame::XmlFragment(element.into())),
                                Err(err) => Err(anyhow!(err)),
                            };
                            return Poll::Ready(Some(frame_result));
                        }
                    }
                }
            }

            let mut raw = [0u8; READ_CHUNK_SIZE];
            let mut buffer = ReadBuf::new(&mut raw);
            ready!(Pin::new(&mut self.reader).poll_read(cx, &mut buffer))?;
            let bytes_read = buffer.filled().len();

            if bytes_read == 0 {
                return Poll::Ready(None);
            }

            self.bytes_since_last_frame += bytes_read;
            if self.bytes_since_last_frame > self.max_stanza_size {
                return Poll::Ready(Some(Err(anyhow!(OversizedStanza {
                    limit: self.max_stanza_size,
                }))));
            }

            match std::str::from_utf8(buffer.filled()) {
                Ok(s) => self.parser.feed_str(s),
                Err(err) => return Poll::Ready(Some(Err(anyhow!(err)))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;
    use tokio_stream::StreamExt;

    use super::*;

    #[tokio::test]
    async fn parses_stream_start_then_fragment() {
        let (mut client, server) = duplex(4096);
        let mut parser = RustyXmlStreamParser::new(server);

        tokio::io::AsyncWriteExt::write_all(
            &mut client,
            b"<stream:stream xmlns:stream='http://etherx.jabber.org/streams' xmlns='jabber:client' version='1.0'>",
        )
        .await
        .unwrap();

        let frame = parser.next().await.unwrap().unwrap();
        assert!(matches!(frame, Frame::StreamStart(_)));

        tokio::io::AsyncWriteExt::write_all(&mut client, b"<iq type='get' id='1'/>")
            .await
            .unwrap();

        let frame = parser.next().await.unwrap().unwrap();
        match frame {
            Frame::XmlFragment(element) => assert!(element.validate("iq", None)),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_oversized_stanza() {
        let (mut client, server) = duplex(8192);
        let mut parser = RustyXmlStreamParser::with_max_stanza_size(server, 16);

        tokio::io::AsyncWriteExt::write_all(
            &mut client,
            b"<stream:stream xmlns:stream='http://etherx.jabber.org/streams' xmlns='jabber:client'>",
        )
        .await
        .unwrap();
        parser.next().await.unwrap().unwrap();

        tokio::io::AsyncWriteExt::write_all(&mut client, b"<message>this is far too long</message>")
            .await
            .unwrap();

        let frame = parser.next().await.unwrap();
        assert!(frame.is_err());
    }
}
