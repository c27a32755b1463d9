pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS: &str = "http://www.w3.org/2000/xmlns/";

pub const XMPP_STREAMS: &str = "http://etherx.jabber.org/streams";
pub const XMPP_CLIENT: &str = "jabber:client";
pub const XMPP_SERVER: &str = "jabber:server";
pub const XMPP_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
pub const XMPP_STREAM_ERRORS: &str = "urn:ietf:params:xml:ns:xmpp-streams";
pub const XMPP_STANZA_ERRORS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
pub const XMPP_BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
pub const XMPP_SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
pub const XMPP_STARTTLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";

pub const COMPRESS_FEATURE: &str = "http://jabber.org/features/compress";
pub const COMPRESS_PROTOCOL: &str = "http://jabber.org/protocol/compress";

pub const ROSTER_VER_FEATURE: &str = "urn:xmpp:features:rosterver";
pub const BLOCKING_ERRORS: &str = "urn:xmpp:blocking:errors";

pub const LEGACY_AUTH: &str = "jabber:iq:auth";
pub const REGISTER: &str = "jabber:iq:register";

pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
pub const DISCO_ITEMS: &str = "http://jabber.org/protocol/disco#items";
pub const PING: &str = "urn:xmpp:ping";

/// Whether `namespace` is consistent with a stanza sent under the
/// client-to-server default namespace. The stream parser's element builder
/// never sees the `<stream:stream>` open tag (it's intercepted as a
/// [`crate::xml::stream_parser::Frame::StreamStart`] before reaching the
/// builder), so a direct child relying on that tag's `xmlns='jabber:client'`
/// default surfaces with `namespace: None` rather than `Some(XMPP_CLIENT)`.
pub fn is_client_namespace(namespace: Option<&str>) -> bool {
    matches!(namespace, None | Some(XMPP_CLIENT))
}
