use std::collections::HashSet;
use std::sync::Arc;
use std::{fs::File, io::BufReader};

use anyhow::{anyhow, Error};
use rustls_native_certs::load_native_certs;
use rustls_pemfile::{certs, pkcs8_private_keys};
use serde::{Deserialize, Deserializer};
use tokio_rustls::rustls::pki_types::PrivateKeyDer::Pkcs8;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};

use confidante_core::xmpp::jid::Jid;

#[derive(Debug, Deserialize)]
struct TlsConfig {
    #[serde(deserialize_with = "load_certificate_chain")]
    certificate_chain: Vec<CertificateDer<'static>>,
    #[serde(deserialize_with = "load_private_key")]
    private_key: PrivateKeyDer<'static>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsSettings {
    pub required_for_clients: bool,
    pub required_for_servers: bool,
    #[serde(deserialize_with = "init_tls_server_config")]
    pub server_config: Arc<ServerConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionLevel {
    NoCompression,
    BestSpeed,
    Default,
    BestCompression,
}

impl CompressionLevel {
    pub fn to_flate2(self) -> flate2::Compression {
        match self {
            Self::NoCompression => flate2::Compression::none(),
            Self::BestSpeed => flate2::Compression::fast(),
            Self::Default => flate2::Compression::default(),
            Self::BestCompression => flate2::Compression::best(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompressionSettings {
    pub enabled: bool,
    #[serde(default = "default_compression_level")]
    pub level: CompressionLevel,
}

fn default_compression_level() -> CompressionLevel {
    CompressionLevel::Default
}

/// What happens when a second client binds the same resource name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceConflictPolicy {
    Disallow,
    Override,
    Replace,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleSettings {
    #[serde(default)]
    pub enabled: HashSet<String>,
    #[serde(default)]
    pub roster_versioning: bool,
    /// When set, a chat/groupchat message with a `<body/>` addressed to an
    /// offline bare JID is dropped rather than archived by the `offline`
    /// module. Mirrors the per-deployment archiving policy knob; off by
    /// default archives everything the `offline` tag would otherwise queue.
    #[serde(default)]
    pub offline_skip_chat_with_body: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    #[serde(deserialize_with = "deserialize_jid")]
    pub domain: Jid,
    pub tls: TlsSettings,

    #[serde(default = "default_max_stanza_size")]
    pub max_stanza_size: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub compression: CompressionSettings,
    #[serde(default = "default_resource_conflict")]
    pub resource_conflict: ResourceConflictPolicy,
    #[serde(default = "default_sasl_mechanisms")]
    pub sasl: Vec<String>,
    #[serde(default)]
    pub modules: ModuleSettings,
}

fn default_max_stanza_size() -> usize {
    262_144
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_resource_conflict() -> ResourceConflictPolicy {
    ResourceConflictPolicy::Disallow
}

fn default_sasl_mechanisms() -> Vec<String> {
    vec![
        "SCRAM-SHA-256-PLUS".to_string(),
        "SCRAM-SHA-256".to_string(),
        "SCRAM-SHA-1-PLUS".to_string(),
        "SCRAM-SHA-1".to_string(),
        "PLAIN".to_string(),
    ]
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: CompressionLevel::Default,
        }
    }
}

impl Settings {
    pub fn init() -> Result<Self, Error> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/defaults"))
            .add_source(config::File::with_name("config/overrides").required(false))
            .add_source(config::Environment::with_prefix("CONFIDANTE").separator("__"))
            .build()?;

        let settings = settings.try_deserialize().map_err(|e| anyhow!(e))?;

        Ok(settings)
    }
}

fn load_certificate_chain<'d, D: Deserializer<'d>>(
    deserializer: D,
) -> Result<Vec<CertificateDer<'static>>, D::Error> {
    let cert_path = String::deserialize(deserializer)?;
    let cert_file = &mut BufReader::new(File::open(cert_path).map_err(serde::de::Error::custom)?);
    let cert_chain = certs(cert_file).map(|result| result.unwrap()).collect();

    Ok(cert_chain)
}

fn load_private_key<'d, D: Deserializer<'d>>(
    deserializer: D,
) -> Result<PrivateKeyDer<'static>, D::Error> {
    let key_path = String::deserialize(deserializer)?;
    let key_file = &mut BufReader::new(File::open(key_path).map_err(serde::de::Error::custom)?);
    let key_der = pkcs8_private_keys(key_file)
        .map(|result| result.unwrap())
        .collect::<Vec<_>>()
        .remove(0);

    Ok(Pkcs8(key_der))
}

fn init_tls_server_config<'d, D: Deserializer<'d>>(
    deserializer: D,
) -> Result<Arc<ServerConfig>, D::Error> {
    let config = TlsConfig::deserialize(deserializer)?;

    let mut root_cert_store = RootCertStore::empty();
    for cert in load_native_certs().certs {
        root_cert_store.add(cert).map_err(serde::de::Error::custom)?;
    }
    let client_cert_verifier = WebPkiClientVerifier::builder(Arc::new(root_cert_store))
        .allow_unauthenticated()
        .build()
        .map_err(serde::de::Error::custom)?;
    let config = ServerConfig::builder()
        .with_client_cert_verifier(client_cert_verifier)
        .with_single_cert(config.certificate_chain, config.private_key)
        .map_err(serde::de::Error::custom)?;

    Ok(Arc::new(config))
}

fn deserialize_jid<'d, D: Deserializer<'d>>(deserializer: D) -> Result<Jid, D::Error> {
    let raw_jid = String::deserialize(deserializer)?;
    raw_jid.parse::<Jid>().map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sasl_order_prefers_scram_plus() {
        let mechanisms = default_sasl_mechanisms();
        assert_eq!(mechanisms.first().map(String::as_str), Some("SCRAM-SHA-256-PLUS"));
    }

    #[test]
    fn compression_level_maps_to_flate2() {
        assert_eq!(
            CompressionLevel::NoCompression.to_flate2().level(),
            flate2::Compression::none().level()
        );
    }
}
