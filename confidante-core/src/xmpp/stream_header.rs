use crate::xmpp::jid::Jid;
use crate::xmpp::stream::StreamId;

/// An `xml:lang` value. Not validated against BCP 47 beyond being non-empty;
/// stanzas with a malformed tag are accepted and echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageTag(pub String);

impl Default for LanguageTag {
    fn default() -> Self {
        Self("en".to_string())
    }
}

/// The attributes of an opening `<stream:stream>` tag, in either direction.
#[derive(Debug, Clone)]
pub struct StreamHeader {
    pub from: Option<Jid>,
    pub to: Option<Jid>,
    pub id: Option<StreamId>,
    pub language: Option<LanguageTag>,
    pub version: Option<String>,
}

impl StreamHeader {
    pub fn declares_1_0(&self) -> bool {
        self.version.as_deref() == Some("1.0")
    }
}
