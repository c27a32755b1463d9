use confidante_core::xml::{namespaces, Element};
use confidante_core::xmpp::stanza::{IqType, Stanza, StanzaKind};

use crate::iq::{DispatchContext, IqHandler};

/// `urn:xmpp:ping` (XEP-0199): an empty `iq get` answered with an empty
/// `iq result`.
pub struct PingHandler;

impl IqHandler for PingHandler {
    fn matches(&self, iq: &Stanza) -> bool {
        matches!(iq.kind, StanzaKind::Iq(IqType::Get))
            && iq.element.find_child("ping", Some(namespaces::PING)).is_some()
    }

    async fn handle(&self, iq: &Stanza, _ctx: &DispatchContext<'_>) -> Option<Stanza> {
        let mut result = Element::new("iq", None);
        result.set_attribute("type", None::<&str>, "result");
        if let Some(id) = &iq.id {
            result.set_attribute("id", None::<&str>, id.clone());
        }
        if let Some(from) = &iq.to {
            result.set_attribute("from", None::<&str>, from.to_string());
        }
        if let Some(to) = &iq.from {
            result.set_attribute("to", None::<&str>, to.to_string());
        }

        Stanza::from_element(result).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confidante_core::xmpp::jid::Jid;

    #[tokio::test]
    async fn answers_ping_with_empty_result() {
        let mut element = Element::new("iq", Some(namespaces::XMPP_CLIENT));
        element.set_attribute("type", None::<&str>, "get");
        element.set_attribute("id", None::<&str>, "p1");
        element.set_attribute("from", None::<&str>, "romeo@montague.lit/orchard");
        element.set_attribute("to", None::<&str>, "montague.lit");
        element.add_child(Element::new("ping", Some(namespaces::PING)));
        let iq = Stanza::from_element(element).unwrap();

        let handler = PingHandler;
        assert!(handler.matches(&iq));

        let bound: Jid = "montague.lit".parse().unwrap();
        let ctx = DispatchContext { bound_jid: &bound };
        let reply = handler.handle(&iq, &ctx).await.unwrap();
        assert_eq!(reply.element.attribute("type", None), Some("result"));
        assert_eq!(reply.element.attribute("id", None), Some("p1"));
    }
}
