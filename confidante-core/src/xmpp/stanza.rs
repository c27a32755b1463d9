use thiserror::Error;

use crate::error::StanzaError;
use crate::xml::{Element, Node};
use crate::xmpp::jid::Jid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqType {
    Get,
    Set,
    Result,
    Error,
}

impl IqType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Result => "result",
            Self::Error => "error",
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::Get | Self::Set)
    }
}

impl std::str::FromStr for IqType {
    type Err = StanzaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get" => Ok(Self::Get),
            "set" => Ok(Self::Set),
            "result" => Ok(Self::Result),
            "error" => Ok(Self::Error),
            other => Err(StanzaParseError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceType {
    Available,
    Unavailable,
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
    Probe,
    Error,
}

impl PresenceType {
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            Self::Available => None,
            Self::Unavailable => Some("unavailable"),
            Self::Subscribe => Some("subscribe"),
            Self::Subscribed => Some("subscribed"),
            Self::Unsubscribe => Some("unsubscribe"),
            Self::Unsubscribed => Some("unsubscribed"),
            Self::Probe => Some("probe"),
            Self::Error => Some("error"),
        }
    }

    pub fn parse(s: Option<&str>) -> Result<Self, StanzaParseError> {
        match s {
            None | Some("") => Ok(Self::Available),
            Some("unavailable") => Ok(Self::Unavailable),
            Some("subscribe") => Ok(Self::Subscribe),
            Some("subscribed") => Ok(Self::Subscribed),
            Some("unsubscribe") => Ok(Self::Unsubscribe),
            Some("unsubscribed") => Ok(Self::Unsubscribed),
            Some("probe") => Ok(Self::Probe),
            Some("error") => Ok(Self::Error),
            Some(other) => Err(StanzaParseError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Normal,
    Chat,
    Groupchat,
    Headline,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Chat => "chat",
            Self::Groupchat => "groupchat",
            Self::Headline => "headline",
            Self::Error => "error",
        }
    }

    pub fn parse(s: Option<&str>) -> Result<Self, StanzaParseError> {
        match s {
            None | Some("normal") | Some("") => Ok(Self::Normal),
            Some("chat") => Ok(Self::Chat),
            Some("groupchat") => Ok(Self::Groupchat),
            Some("headline") => Ok(Self::Headline),
            Some("error") => Ok(Self::Error),
            Some(other) => Err(StanzaParseError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StanzaKind {
    Iq(IqType),
    Presence(PresenceType, Option<i8>),
    Message(MessageType),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StanzaParseError {
    #[error("unrecognized top-level element: {0}")]
    NotAStanza(String),
    #[error("unknown stanza type: {0}")]
    UnknownType(String),
    #[error("iq stanza missing required `type` attribute")]
    MissingIqType,
    #[error("iq get/set must have exactly one child payload")]
    IqPayloadArity,
    #[error("malformed `from`/`to` JID")]
    MalformedJid,
    #[error("malformed presence priority")]
    MalformedPriority,
}

/// A parsed top-level stanza: an `Element` plus the fields the dispatch
/// logic actually needs, so handlers don't re-walk attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Stanza {
    pub element: Element,
    pub from: Option<Jid>,
    pub to: Option<Jid>,
    pub id: Option<String>,
    pub kind: StanzaKind,
}

impl Stanza {
    pub fn from_element(element: Element) -> Result<Self, StanzaParseError> {
        let from = Self::parse_jid_attribute(&element, "from")?;
        let to = Self::parse_jid_attribute(&element, "to")?;
        let id = element.attribute("id", None).map(|s| s.to_string());
        let type_attr = element.attribute("type", None);

        let kind = match element.name.as_str() {
            "iq" => {
                let iq_type: IqType = type_attr
                    .ok_or(StanzaParseError::MissingIqType)?
                    .parse()?;
                if iq_type.is_request() && element.elements().count() != 1 {
                    return Err(StanzaParseError::IqPayloadArity);
                }
                StanzaKind::Iq(iq_type)
            }
            "presence" => {
                let presence_type = PresenceType::parse(type_attr)?;
                let priority = element
                    .find_child("priority", None)
                    .map(|p| p.text())
                    .map(|text| text.parse::<i8>())
                    .transpose()
                    .map_err(|_| StanzaParseError::MalformedPriority)?;
                StanzaKind::Presence(presence_type, priority)
            }
            "message" => StanzaKind::Message(MessageType::parse(type_attr)?),
            other => return Err(StanzaParseError::NotAStanza(other.to_string())),
        };

        Ok(Self {
            element,
            from,
            to,
            id,
            kind,
        })
    }

    fn parse_jid_attribute(element: &Element, name: &str) -> Result<Option<Jid>, StanzaParseError> {
        match element.attribute(name, None) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| StanzaParseError::MalformedJid),
            None => Ok(None),
        }
    }

    pub fn has_body(&self) -> bool {
        matches!(self.kind, StanzaKind::Message(_)) && self.element.find_child("body", None).is_some()
    }

    pub fn is_chat(&self) -> bool {
        matches!(self.kind, StanzaKind::Message(MessageType::Chat))
    }

    pub fn is_groupchat(&self) -> bool {
        matches!(self.kind, StanzaKind::Message(MessageType::Groupchat))
    }

    pub fn is_iq_request(&self) -> bool {
        matches!(self.kind, StanzaKind::Iq(t) if t.is_request())
    }

    /// Clones the stanza shell (name, namespace, `from`/`to`/`id`, swapped)
    /// and attaches an `<error>` child built from `condition`, per RFC 6120
    /// §8.3.1: the reply's `from`/`to` are the original's swapped, `type`
    /// becomes `error`, and the original child content is preserved.
    pub fn error_reply(&self, condition: StanzaError) -> Stanza {
        self.error_reply_with(condition.to_element())
    }

    /// As [`Stanza::error_reply`], but with a caller-built `<error>` element
    /// rather than one derived from a [`StanzaError`] condition — used for
    /// the blocking-errors shape, which layers an application-specific
    /// `<blocked/>` child alongside the stanza condition.
    pub fn error_reply_with(&self, error_element: Element) -> Stanza {
        let mut element = Element::new(&self.element.name, self.element.namespace.as_deref());
        element.set_attribute("type", None::<&str>, "error");
        if let Some(id) = &self.id {
            element.set_attribute("id", None::<&str>, id.clone());
        }
        if let Some(from) = &self.to {
            element.set_attribute("from", None::<&str>, from.to_string());
        }
        if let Some(to) = &self.from {
            element.set_attribute("to", None::<&str>, to.to_string());
        }
        for child in &self.element.children {
            element.children.push(child.clone());
        }
        element.children.push(Node::Element(error_element));

        let kind = match &self.kind {
            StanzaKind::Iq(_) => StanzaKind::Iq(IqType::Error),
            StanzaKind::Presence(_, priority) => StanzaKind::Presence(PresenceType::Error, *priority),
            StanzaKind::Message(_) => StanzaKind::Message(MessageType::Error),
        };

        Stanza {
            from: self.to.clone(),
            to: self.from.clone(),
            id: self.id.clone(),
            element,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::namespaces;

    fn iq(kind: &str, id: &str, has_payload: bool) -> Element {
        let mut element = Element::new("iq", Some(namespaces::XMPP_CLIENT));
        element.set_attribute("type", None::<&str>, kind);
        element.set_attribute("id", None::<&str>, id);
        element.set_attribute("from", None::<&str>, "romeo@montague.lit/orchard");
        element.set_attribute("to", None::<&str>, "montague.lit");
        if has_payload {
            element.add_child(Element::new("query", Some(namespaces::DISCO_INFO)));
        }
        element
    }

    #[test]
    fn parses_iq_get_with_payload() {
        let stanza = Stanza::from_element(iq("get", "1", true)).unwrap();
        assert_eq!(stanza.kind, StanzaKind::Iq(IqType::Get));
        assert_eq!(stanza.id.as_deref(), Some("1"));
    }

    #[test]
    fn rejects_iq_get_without_payload() {
        let result = Stanza::from_element(iq("get", "1", false));
        assert_eq!(result, Err(StanzaParseError::IqPayloadArity));
    }

    #[test]
    fn presence_defaults_to_available() {
        let element = Element::new("presence", Some(namespaces::XMPP_CLIENT));
        let stanza = Stanza::from_element(element).unwrap();
        assert_eq!(stanza.kind, StanzaKind::Presence(PresenceType::Available, None));
    }

    #[test]
    fn message_has_body_predicate() {
        let mut element = Element::new("message", Some(namespaces::XMPP_CLIENT));
        element.set_attribute("type", None::<&str>, "chat");
        element.with_child("body", None, |body| {
            body.add_text("hi");
        });
        let stanza = Stanza::from_element(element).unwrap();
        assert!(stanza.has_body());
        assert!(stanza.is_chat());
    }

    #[test]
    fn error_reply_swaps_from_and_to() {
        let stanza = Stanza::from_element(iq("get", "1", true)).unwrap();
        let reply = stanza.error_reply(StanzaError::ServiceUnavailable);

        assert_eq!(reply.kind, StanzaKind::Iq(IqType::Error));
        assert_eq!(reply.from, stanza.to);
        assert_eq!(reply.to, stanza.from);
        assert_eq!(reply.element.attribute("type", None), Some("error"));
        assert!(reply
            .element
            .find_child("service-unavailable", Some(namespaces::XMPP_STANZA_ERRORS))
            .is_none());
        assert!(reply.element.find_child("error", None).is_some());
    }
}
