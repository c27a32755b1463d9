use confidante_core::xml::{namespaces, Element};
use confidante_core::xmpp::stanza::{IqType, Stanza, StanzaKind};

use crate::iq::{DispatchContext, IqHandler};

/// `http://jabber.org/protocol/disco#info` and `#items`.
/// Registered first so later handlers (ping, and whatever the
/// surrounding binary wires in as feature modules) can advertise
/// themselves into it with [`DiscoHandler::register_feature`] before the
/// handler chain is frozen for the session.
pub struct DiscoHandler {
    identity_category: &'static str,
    identity_type: &'static str,
    identity_name: String,
    features: Vec<&'static str>,
}

impl DiscoHandler {
    pub fn new(identity_name: impl Into<String>) -> Self {
        Self {
            identity_category: "server",
            identity_type: "im",
            identity_name: identity_name.into(),
            features: vec![namespaces::DISCO_INFO, namespaces::DISCO_ITEMS],
        }
    }

    /// Called by another module's setup code before the `IqHandler` chain
    /// is frozen, so that module's namespace shows up in `disco#info`.
    pub fn register_feature(&mut self, feature: &'static str) {
        if !self.features.contains(&feature) {
            self.features.push(feature);
        }
    }
}

impl IqHandler for DiscoHandler {
    fn matches(&self, iq: &Stanza) -> bool {
        matches!(iq.kind, StanzaKind::Iq(IqType::Get))
            && (iq.element.find_child("query", Some(namespaces::DISCO_INFO)).is_some()
                || iq.element.find_child("query", Some(namespaces::DISCO_ITEMS)).is_some())
    }

    async fn handle(&self, iq: &Stanza, _ctx: &DispatchContext<'_>) -> Option<Stanza> {
        let is_items = iq.element.find_child("query", Some(namespaces::DISCO_ITEMS)).is_some();

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

        if is_items {
            result.with_child("query", Some(namespaces::DISCO_ITEMS), |_| {});
        } else {
            result.with_child("query", Some(namespaces::DISCO_INFO), |query| {
                query.with_child("identity", None, |identity| {
                    identity.set_attribute("category", None::<&str>, self.identity_category);
                    identity.set_attribute("type", None::<&str>, self.identity_type);
                    identity.set_attribute("name", None::<&str>, self.identity_name.clone());
                });
                for feature in &self.features {
                    query.with_child("feature", None, |f| {
                        f.set_attribute("var", None::<&str>, *feature);
                    });
                }
            });
        }

        Stanza::from_element(result).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confidante_core::xmpp::jid::Jid;

    fn get_iq(query_ns: &str) -> Stanza {
        let mut element = Element::new("iq", Some(namespaces::XMPP_CLIENT));
        element.set_attribute("type", None::<&str>, "get");
        element.set_attribute("id", None::<&str>, "d1");
        element.set_attribute("from", None::<&str>, "romeo@montague.lit/orchard");
        element.set_attribute("to", None::<&str>, "montague.lit");
        element.add_child(Element::new("query", Some(query_ns)));
        Stanza::from_element(element).unwrap()
    }

    #[tokio::test]
    async fn matches_disco_info_and_items() {
        let handler = DiscoHandler::new("confidante");
        assert!(handler.matches(&get_iq(namespaces::DISCO_INFO)));
        assert!(handler.matches(&get_iq(namespaces::DISCO_ITEMS)));
    }

    #[tokio::test]
    async fn registered_features_show_up_in_info_reply() {
        let mut handler = DiscoHandler::new("confidante");
        handler.register_feature(namespaces::PING);

        let bound: Jid = "montague.lit".parse().unwrap();
        let ctx = DispatchContext { bound_jid: &bound };
        let reply = handler.handle(&get_iq(namespaces::DISCO_INFO), &ctx).await.unwrap();

        let query = reply.element.find_child("query", Some(namespaces::DISCO_INFO)).unwrap();
        assert!(query
            .find_children("feature", None)
            .any(|f| f.attribute("var", None) == Some(namespaces::PING)));
    }
}
