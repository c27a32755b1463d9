use anyhow::{anyhow, bail, Error};
use base64::prelude::*;
use indexmap::IndexMap;
use rand::{RngCore, SeedableRng};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::xml::namespaces;
use crate::xml::renderer::Renderer;
use crate::xml::Element;
use crate::xmpp::stream_header::StreamHeader;

/// Async sink for XML fragments. Rendering itself is delegated to
/// [`Renderer`]; this type only owns the writer half and the namespace stack
/// that must persist across writes on the same stream.
pub struct StreamWriter<W: AsyncWrite + Unpin> {
    writer: W,
    renderer: Renderer,
}

impl<W: AsyncWrite + Unpin> StreamWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            renderer: Renderer::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub async fn write_stream_header(
        &mut self,
        header: &StreamHeader,
        include_xml_declaration: bool,
    ) -> Result<(), Error> {
        if include_xml_declaration {
            self.write_xml_declaration().await?;
        }

        let Some(ref from) = header.from else {
            bail!("`from` field is required in outgoing stream header");
        };

        let mut rng = rand_chacha::ChaCha20Rng::from_entropy();
        let mut id_raw = [0u8; 16];
        rng.fill_bytes(&mut id_raw);
        let id_encoded = BASE64_STANDARD.encode(id_raw);

        let mut header_attributes = IndexMap::new();
        header_attributes.insert(("from".to_string(), None), from.to_string());
        if let Some(to) = &header.to {
            header_attributes.insert(("to".to_string(), None), to.to_string());
        }
        header_attributes.insert(("id".to_string(), None), id_encoded);
        header_attributes.insert(("version".to_string(), None), "1.0".to_string());
        header_attributes.insert(
            ("lang".to_string(), Some(namespaces::XML.to_string())),
            "en".to_string(),
        );
        header_attributes.insert(
            ("xmlns".to_string(), None),
            namespaces::XMPP_CLIENT.to_string(),
        );
        header_attributes.insert(
            ("stream".to_string(), Some(namespaces::XMLNS.to_string())),
            namespaces::XMPP_STREAMS.to_string(),
        );

        let stream_element = Element {
            name: "stream".to_string(),
            namespace: Some(namespaces::XMPP_STREAMS.to_string()),
            attributes: header_attributes,
            children: vec![],
        };

        let opening_tag = self.renderer.render_opening_tag(&stream_element, false);
        self.write_str(&opening_tag).await
    }

    pub async fn write_stream_close(&mut self) -> Result<(), Error> {
        let stream_element = Element {
            name: "stream".to_string(),
            namespace: Some(namespaces::XMPP_STREAMS.to_string()),
            attributes: IndexMap::new(),
            children: vec![],
        };

        let closing_tag = self.renderer.render_closing_tag(&stream_element);
        self.write_str(&closing_tag).await
    }

    pub async fn write_xml_element(&mut self, element: &Element) -> Result<(), Error> {
        let xml = self.renderer.render(element);
        self.write_str(&xml).await
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|err| anyhow!(err))?;

        self.writer.flush().await.map_err(|err| anyhow!(err))
    }

    async fn write_str(&mut self, string: &str) -> Result<(), Error> {
        trace!(xml = string, "writing stream fragment");
        self.write_bytes(string.as_bytes()).await
    }

    async fn write_xml_declaration(&mut self) -> Result<(), Error> {
        self.write_str("<?xml version='1.0'?>").await
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn writes_self_closing_element() {
        let (client, mut server) = duplex(4096);
        let mut writer = StreamWriter::new(client);

        let element = Element::new("ping", None);
        writer.write_xml_element(&element).await.unwrap();
        writer.into_inner();

        let mut buf = [0u8; 64];
        let n = tokio::io::AsyncReadExt::read(&mut server, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"<ping/>");
    }
}
