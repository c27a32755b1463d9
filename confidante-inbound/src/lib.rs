use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Error, bail};
use tokio::io::ReadHalf;
use tokio::select;
use tokio::time::timeout;
use tokio_stream::StreamExt;

use confidante_backend::settings::{CompressionSettings, ModuleSettings, ResourceConflictPolicy, Settings};
use confidante_backend::store::{BlocklistLookup, StoredPasswordLookup};
use confidante_core::error::{StanzaError, StreamError};
use confidante_core::xml::stream_parser::{Frame, StreamParser};
use confidante_core::xml::{Element, namespaces};
use confidante_core::xmpp::compression::Decompressor;
use confidante_core::xmpp::jid::Jid;
use confidante_core::xmpp::stanza::Stanza;
use confidante_core::xmpp::stream::{Connection, StreamId, XmppStream};
use confidante_core::xmpp::stream_header::{LanguageTag, StreamHeader};
use confidante_services::{ErasedIqHandler, OfflineHook, RosterHook, RouterHandle, RouterMessage};

use crate::bind::{BindOutcome, ResourceBindingNegotiator};
use crate::compress::CompressionNegotiator;
use crate::dispatch::Latch;
use crate::sasl::{SaslNegotiator, SaslOutcome};
use crate::session::SessionNegotiator;
use crate::starttls::StarttlsNegotiator;

mod bind;
mod compress;
pub mod connection;
mod dispatch;
pub mod sasl;
mod session;
mod starttls;

/// RFC 6120's stream lifecycle, generalized with the two post-SASL
/// negotiations (`session.rs` is a no-op transition kept for legacy
/// clients that still send it; compression, when a deployment offers
/// it, also restarts the stream the same way a successful bind of
/// TLS/SASL does).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Connecting,
    Connected,
    Authenticated,
    SessionStarted,
    Disconnected,
}

struct StreamInfo {
    stream_id: StreamId,
    /// The bound full JID, once resource binding has completed.
    jid: Option<Jid>,
    /// The bare JID SASL authenticated, before binding assigns a resource.
    peer_jid: Option<Jid>,
    peer_language: Option<LanguageTag>,
    latches: HashSet<Latch>,
    last_presence: Option<Stanza>,
}

impl StreamInfo {
    fn new() -> Self {
        Self {
            stream_id: StreamId::new(),
            jid: None,
            peer_jid: None,
            peer_language: None,
            latches: HashSet::new(),
            last_presence: None,
        }
    }
}

pub struct InboundStreamSettings {
    pub domain: Jid,
    pub tls_required: bool,
    pub max_stanza_size: usize,
    pub connect_timeout_secs: u64,
    pub compression: CompressionSettings,
    pub resource_conflict: ResourceConflictPolicy,
    pub sasl_mechanisms: Vec<String>,
    pub modules: ModuleSettings,
}

impl InboundStreamSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            domain: settings.domain.clone(),
            tls_required: settings.tls.required_for_clients,
            max_stanza_size: settings.max_stanza_size,
            connect_timeout_secs: settings.connect_timeout_secs,
            compression: settings.compression.clone(),
            resource_conflict: settings.resource_conflict,
            sasl_mechanisms: settings.sasl.clone(),
            modules: settings.modules.clone(),
        }
    }
}

/// A single client-to-server stream: owns the framed transport, the
/// negotiation state machine, and the session-established dispatch once
/// bound. One instance per accepted connection, run to completion by
/// [`InboundStream::handle`].
pub struct InboundStream<C, P, S>
where
    C: Connection,
    P: StreamParser<Decompressor<ReadHalf<C>>>,
    S: StoredPasswordLookup + BlocklistLookup + Send + Sync,
{
    stream: XmppStream<C, P>,
    state: StreamState,
    info: StreamInfo,
    router: RouterHandle,
    stanza_rx: Option<tokio::sync::mpsc::Receiver<RouterMessage>>,
    store: S,
    settings: InboundStreamSettings,
    iq_handlers: Vec<Box<dyn ErasedIqHandler>>,
    roster_hook: Box<dyn RosterHook>,
    offline_hook: Box<dyn OfflineHook>,
}

impl<C, P, S> InboundStream<C, P, S>
where
    C: Connection,
    P: StreamParser<Decompressor<ReadHalf<C>>>,
    S: StoredPasswordLookup + BlocklistLookup + Send + Sync,
{
    pub fn new(
        connection: C,
        router: RouterHandle,
        store: S,
        settings: InboundStreamSettings,
        iq_handlers: Vec<Box<dyn ErasedIqHandler>>,
        roster_hook: Box<dyn RosterHook>,
        offline_hook: Box<dyn OfflineHook>,
    ) -> Self {
        let stream = XmppStream::with_max_stanza_size(connection, settings.max_stanza_size);

        InboundStream {
            stream,
            state: StreamState::Connecting,
            info: StreamInfo::new(),
            router,
            stanza_rx: None,
            store,
            settings,
            iq_handlers,
            roster_hook,
            offline_hook,
        }
    }

    #[tracing::instrument(skip(self), fields(stream_id = %self.info.stream_id))]
    pub async fn handle(&mut self) {
        match self.inner_handle().await {
            Ok(graceful) => self.finalize(graceful).await,
            Err(error) => {
                tracing::warn!(%error, "closing stream after unrecoverable error");
                self.finalize(false).await;
                let _ = self.close_with_stream_error(StreamError::InternalServerError).await;
            }
        }
    }

    /// Returns `Ok(true)` for a clean shutdown (peer closed the stream, or
    /// the transport hit EOF), `Ok(false)` for a protocol condition that
    /// already wrote its own stream error and closed the transport.
    async fn inner_handle(&mut self) -> Result<bool, Error> {
        self.exchange_stream_headers().await?;
        self.state = StreamState::Connected;
        self.advertise_features().await?;
        self.run().await
    }

    async fn run(&mut self) -> Result<bool, Error> {
        loop {
            let outcome = if self.stanza_rx.is_some() {
                select! {
                    frame = self.stream.reader().next() => self.handle_frame(frame).await?,
                    msg = self.stanza_rx.as_mut().unwrap().recv() => self.handle_router_message(msg).await?,
                }
            } else {
                let frame = self.stream.reader().next().await;
                self.handle_frame(frame).await?
            };

            if let Some(done) = outcome {
                return Ok(done);
            }
        }
    }

    /// `None` means keep looping; `Some(graceful)` means the loop is done.
    async fn handle_frame(&mut self, frame: Option<Result<Frame, Error>>) -> Result<Option<bool>, Error> {
        match frame {
            Some(Ok(Frame::XmlFragment(element))) => {
                if self.handle_element(element).await? {
                    return Ok(Some(false));
                }
                Ok(None)
            }
            Some(Ok(Frame::StreamEnd)) => {
                let _ = self.stream.writer().write_stream_close().await;
                Ok(Some(true))
            }
            Some(Ok(Frame::StreamStart(_))) => bail!("unexpected stream restart mid-session"),
            Some(Err(err)) => {
                let condition = if err.downcast_ref::<confidante_core::xml::stream_parser::rusty_xml::OversizedStanza>().is_some() {
                    StreamError::PolicyViolation
                } else {
                    StreamError::InvalidXml
                };
                tracing::debug!(%err, ?condition, "parser fault, closing stream");
                self.close_with_stream_error(condition).await?;
                Ok(Some(false))
            }
            None => Ok(Some(true)),
        }
    }

    async fn handle_router_message(&mut self, msg: Option<RouterMessage>) -> Result<Option<bool>, Error> {
        match msg {
            Some(RouterMessage::Stanza(stanza)) => {
                self.stream.writer().write_xml_element(&stanza.element).await?;
                Ok(None)
            }
            Some(RouterMessage::Disconnect(error)) => {
                self.close_with_stream_error(error).await?;
                Ok(Some(false))
            }
            None => Ok(None),
        }
    }

    /// Returns `true` when a stream-fatal condition was hit and the stream
    /// error + close have already been written.
    async fn handle_element(&mut self, element: Element) -> Result<bool, Error> {
        match self.state {
            StreamState::Connecting => unreachable!("stream header exchange already transitions out of Connecting"),
            StreamState::Connected => self.handle_connected(element).await,
            StreamState::Authenticated => self.handle_authenticated(element).await,
            StreamState::SessionStarted => self.handle_session_started(element).await,
            StreamState::Disconnected => Ok(true),
        }
    }

    async fn handle_connected(&mut self, element: Element) -> Result<bool, Error> {
        if self.stream.is_starttls_allowed() && element.validate("starttls", Some(namespaces::XMPP_STARTTLS)) {
            // `upgrade_to_tls` already rebuilds the reader/writer around the
            // upgraded connection halves, so there's no stale parser state
            // to discard here, just the header re-exchange.
            StarttlsNegotiator::negotiate_feature(&mut self.stream, &element).await?;
            self.restart_stream(StreamState::Connected).await?;
            return Ok(false);
        }

        if element.name == "iq" && namespaces::is_client_namespace(element.namespace.as_deref()) {
            if element.find_child("query", Some(namespaces::LEGACY_AUTH)).is_some() {
                return self.reply_iq_error(element, StanzaError::ServiceUnavailable).await;
            }

            if element.find_child("query", Some(namespaces::REGISTER)).is_some() {
                if self.stream.is_secure() {
                    if let Some(reply) = self.dispatch_pre_auth_iq(&element).await {
                        self.stream.writer().write_xml_element(&reply.element).await?;
                    }
                    return Ok(false);
                }
                return self.reply_iq_error(element, StanzaError::ServiceUnavailable).await;
            }
        }

        if element.validate("auth", Some(namespaces::XMPP_SASL)) {
            if self.settings.tls_required && !self.stream.is_secure() {
                self.close_with_stream_error(StreamError::NotAuthorized).await?;
                return Ok(true);
            }

            let resolved_domain = self.settings.domain.domain().to_string();
            let outcome =
                SaslNegotiator::negotiate_feature(&mut self.stream, &element, resolved_domain, self.store.clone())
                    .await?;

            match outcome {
                SaslOutcome::Authenticated(jid) => {
                    self.info.peer_jid = Some(jid);
                    self.stream.reset_codecs();
                    self.restart_stream(StreamState::Authenticated).await?;
                }
                SaslOutcome::Failed => {}
            }

            return Ok(false);
        }

        // Unknown element before authentication: RFC 6120 leaves this
        // undefined behavior-wise for a conforming client, so the
        // connection is closed rather than silently ignoring it.
        self.close_with_stream_error(StreamError::UnsupportedStanzaType).await?;
        Ok(true)
    }

    async fn handle_authenticated(&mut self, element: Element) -> Result<bool, Error> {
        if element.name == "iq"
            && namespaces::is_client_namespace(element.namespace.as_deref())
            && element.find_child("session", Some(namespaces::XMPP_SESSION)).is_some()
        {
            SessionNegotiator::negotiate_feature(&mut self.stream, &element).await?;
            return Ok(false);
        }

        if element.validate("compress", Some(namespaces::COMPRESS_PROTOCOL)) {
            if self.settings.compression.enabled {
                // `enable_compression` already rebuilds the reader/writer
                // with zlib turned on, so the restart only needs the fresh
                // header exchange, not another `reset_codecs` (which would
                // rebuild them disabled again and silently drop compression).
                // A `<failure/>` reply (unsupported method, missing method)
                // doesn't restart the stream: the client never agreed to a
                // fresh framing, so it isn't about to resend a stream open.
                let negotiated =
                    CompressionNegotiator::negotiate_feature(&mut self.stream, &element, &self.settings.compression)
                        .await?;
                if negotiated {
                    self.restart_stream(StreamState::Authenticated).await?;
                }
            }
            return Ok(false);
        }

        if element.name == "iq"
            && namespaces::is_client_namespace(element.namespace.as_deref())
            && element.find_child("bind", Some(namespaces::XMPP_BIND)).is_some()
        {
            let outcome = ResourceBindingNegotiator::negotiate_feature(
                &mut self.stream,
                &element,
                &self.info.peer_jid,
                &self.router,
                self.settings.resource_conflict,
                &self.info.stream_id.to_string(),
            )
            .await?;

            if let BindOutcome::Bound(bound_jid) = outcome {
                self.info.jid = Some(bound_jid.clone());
                let stanza_rx = self.router.authenticate_stream(bound_jid);
                self.stanza_rx = Some(stanza_rx);
                self.state = StreamState::SessionStarted;
            }

            return Ok(false);
        }

        self.close_with_stream_error(StreamError::NotAuthorized).await?;
        Ok(true)
    }

    async fn handle_session_started(&mut self, element: Element) -> Result<bool, Error> {
        let bound_jid = self.info.jid.clone().expect("SessionStarted implies a bound jid");

        dispatch::dispatch(
            &mut self.stream,
            element,
            &bound_jid,
            &self.router,
            &self.iq_handlers,
            self.roster_hook.as_ref(),
            self.offline_hook.as_ref(),
            &self.settings.modules,
            &mut self.info.latches,
            &mut self.info.last_presence,
        )
        .await
    }

    /// Common tail of the three negotiations that restart the stream per
    /// RFC 6120 / XEP-0138: TLS upgrade, successful SASL, and compression.
    /// Each caller is responsible for getting the reader/writer into their
    /// post-negotiation shape *before* calling this; it only handles the
    /// state bookkeeping and the fresh header exchange. `target` is the
    /// state the stream lands in once the header round-trip is done, which
    /// in turn governs which features get (re-)advertised.
    async fn restart_stream(&mut self, target: StreamState) -> Result<(), Error> {
        self.state = StreamState::Connecting;
        self.exchange_stream_headers().await?;
        self.state = target;
        self.advertise_features().await?;
        Ok(())
    }

    /// Builds and sends an `error`-type reply for a pre-authentication
    /// `<iq>` that isn't covered by a bound session (legacy `jabber:iq:auth`,
    /// or in-band registration over an insecure channel).
    async fn reply_iq_error(&mut self, element: Element, condition: StanzaError) -> Result<bool, Error> {
        match Stanza::from_element(element) {
            Ok(stanza) => {
                let reply = stanza.error_reply(condition);
                self.stream.writer().write_xml_element(&reply.element).await?;
            }
            Err(err) => tracing::debug!(%err, "dropping malformed pre-auth iq"),
        }
        Ok(false)
    }

    /// Runs the registered `IqHandler` chain against a pre-authentication
    /// `jabber:iq:register` request. There's no bound JID yet, so the
    /// dispatch context carries the stream's own domain; no shipped handler
    /// currently matches `jabber:iq:register`, so this falls through to the
    /// caller's own unhandled-request reply until a registration module is
    /// wired up.
    async fn dispatch_pre_auth_iq(&self, element: &Element) -> Option<Stanza> {
        let stanza = match Stanza::from_element(element.clone()) {
            Ok(stanza) => stanza,
            Err(err) => {
                tracing::debug!(%err, "dropping malformed pre-auth iq");
                return None;
            }
        };

        let ctx = confidante_services::DispatchContext {
            bound_jid: &self.settings.domain,
        };

        for handler in &self.iq_handlers {
            if handler.matches(&stanza) {
                return handler.handle(&stanza, &ctx).await;
            }
        }

        if stanza.is_iq_request() {
            Some(stanza.error_reply(StanzaError::ServiceUnavailable))
        } else {
            None
        }
    }

    async fn advertise_features(&mut self) -> Result<(), Error> {
        let mut features = Element::new("features", Some(namespaces::XMPP_STREAMS));

        match self.state {
            StreamState::Connected => {
                if self.stream.is_starttls_allowed() {
                    features.add_child(StarttlsNegotiator::advertise_feature());
                }
                if !self.settings.tls_required || self.stream.is_secure() {
                    features.add_child(SaslNegotiator::advertise_feature(
                        &self.settings.sasl_mechanisms,
                        self.stream.is_secure(),
                        self.stream.channel_binding().is_some(),
                    ));
                }
            }
            StreamState::Authenticated => {
                features.add_child(ResourceBindingNegotiator::advertise_feature());
                features.add_child(SessionNegotiator::advertise_feature());
                if self.settings.compression.enabled {
                    features.add_child(CompressionNegotiator::advertise_feature());
                }
                if self.settings.modules.roster_versioning {
                    features.add_child(Element::new("ver", Some(namespaces::ROSTER_VER_FEATURE)));
                }
            }
            StreamState::Connecting | StreamState::SessionStarted | StreamState::Disconnected => {}
        }

        self.stream.writer().write_xml_element(&features).await
    }

    async fn exchange_stream_headers(&mut self) -> Result<(), Error> {
        let connect_timeout = Duration::from_secs(self.settings.connect_timeout_secs);
        let frame = timeout(connect_timeout, self.stream.reader().next())
            .await
            .map_err(|_| StreamError::ConnectionTimeout);

        let frame = match frame {
            Ok(frame) => frame,
            Err(condition) => {
                self.close_with_stream_error(condition).await?;
                bail!("connect timeout waiting for stream header");
            }
        };

        let Some(Ok(Frame::StreamStart(header))) = frame else {
            self.close_with_stream_error(StreamError::InvalidXml).await?;
            bail!("expected stream header");
        };

        if !header.declares_1_0() {
            self.close_with_stream_error(StreamError::UnsupportedVersion).await?;
            bail!("unsupported stream version");
        }

        if let Some(to) = &header.to
            && to.domain() != self.settings.domain.domain()
        {
            self.close_with_stream_error(StreamError::HostUnknown).await?;
            bail!("stream addressed to unknown host");
        }

        self.info.peer_language = header.language;

        self.send_stream_header().await
    }

    async fn send_stream_header(&mut self) -> Result<(), Error> {
        let outbound_header = StreamHeader {
            from: Some(self.settings.domain.clone()),
            to: self.info.peer_jid.clone(),
            id: Some(self.info.stream_id.clone()),
            language: None,
            version: Some("1.0".to_string()),
        };

        self.stream.writer().write_stream_header(&outbound_header, true).await
    }

    async fn close_with_stream_error(&mut self, error: StreamError) -> Result<(), Error> {
        self.stream.writer().write_xml_element(&error.to_element()).await?;
        self.stream.writer().write_stream_close().await
    }

    /// §4.7 logout bookkeeping: runs on every path out of [`InboundStream::handle`],
    /// whether the stream closed cleanly or was torn down by an error.
    async fn finalize(&mut self, graceful: bool) {
        self.state = StreamState::Disconnected;
        tracing::debug!(graceful, "stream finalizing");

        let Some(bound_jid) = self.info.jid.take() else {
            return;
        };

        self.router.unregister_stream(&bound_jid);

        let is_unavailable = self.info.last_presence.as_ref().is_some_and(|presence| {
            matches!(
                presence.kind,
                confidante_core::xmpp::stanza::StanzaKind::Presence(
                    confidante_core::xmpp::stanza::PresenceType::Unavailable,
                    _
                )
            )
        });
        let last_unavailable_status = is_unavailable
            .then(|| self.info.last_presence.as_ref().unwrap())
            .and_then(|presence| presence.element.find_child("status", None))
            .map(|status| status.text());
        let was_available = self.info.last_presence.is_some() && !is_unavailable;

        let logged_out_at = unix_timestamp_hint();
        if let Err(err) = self
            .router
            .record_logout(bound_jid.to_bare(), logged_out_at, last_unavailable_status)
            .await
        {
            tracing::warn!(%err, "failed to record logout");
        }

        if was_available {
            self.roster_hook.broadcast_unavailable(&bound_jid).await;
        }
    }
}

/// A coarse wall-clock reading for the logout bookkeeping column. Accurate
/// to the second; the exact value is only ever compared to other logout
/// timestamps, never parsed back into a presence payload.
fn unix_timestamp_hint() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
