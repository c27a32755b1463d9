use anyhow::{Error, bail};
use tokio::io::ReadHalf;

use confidante_backend::settings::CompressionSettings;
use confidante_core::xml::{Element, namespaces, stream_parser::StreamParser};
use confidante_core::xmpp::{
    compression::Decompressor,
    stream::{Connection, XmppStream},
};

/// XEP-0138 stream compression. Advertised only when
/// `CompressionSettings::enabled` and the connection isn't already
/// compressed; negotiation never touches the underlying TLS/TCP connection,
/// only the [`Decompressor`]/[`Compressor`] codecs in front of it.
pub(super) struct CompressionNegotiator {
    _private: (),
}

impl CompressionNegotiator {
    pub fn advertise_feature() -> Element {
        let mut compression = Element::new("compression", Some(namespaces::COMPRESS_FEATURE));
        compression.with_child("method", Some(namespaces::COMPRESS_FEATURE), |method| {
            method.add_text("zlib");
        });

        compression
    }

    pub async fn negotiate_feature<C, P>(
        stream: &mut XmppStream<C, P>,
        element: &Element,
        settings: &CompressionSettings,
    ) -> Result<bool, Error>
    where
        C: Connection,
        P: StreamParser<Decompressor<ReadHalf<C>>>,
    {
        if !element.validate("compress", Some(namespaces::COMPRESS_PROTOCOL)) {
            bail!("expected compress element");
        }

        let Some(method) = element.find_child("method", Some(namespaces::COMPRESS_PROTOCOL)) else {
            let failure = Self::failure("setup-failed");
            stream.writer().write_xml_element(&failure).await?;
            return Ok(false);
        };

        if method.text() != "zlib" {
            let failure = Self::failure("unsupported-method");
            stream.writer().write_xml_element(&failure).await?;
            return Ok(false);
        }

        let mut compressed = Element::new("compressed", Some(namespaces::COMPRESS_PROTOCOL));
        compressed.set_attribute("xmlns", None::<String>, namespaces::COMPRESS_PROTOCOL);
        stream.writer().write_xml_element(&compressed).await?;

        stream.enable_compression(settings.level.to_flate2());

        Ok(true)
    }

    fn failure(condition: &str) -> Element {
        let mut failure = Element::new("failure", Some(namespaces::COMPRESS_PROTOCOL));
        failure.set_attribute("xmlns", None::<String>, namespaces::COMPRESS_PROTOCOL);
        failure.with_child(condition, Some(namespaces::COMPRESS_PROTOCOL), |_| {});

        failure
    }
}
