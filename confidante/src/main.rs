use clap::{Parser, Subcommand};

use confidante_backend::settings::{ModuleSettings, Settings};
use confidante_backend::store::{SqliteStoreBackend, StoreHandle};
use confidante_core::xml::namespaces;
use confidante_core::xml::stream_parser::rusty_xml::RustyXmlStreamParser;
use confidante_core::xmpp::jid::Jid;
use confidante_inbound::connection::debug::DebugConnection;
use confidante_inbound::connection::tcp::TcpConnection;
use confidante_inbound::sasl::{StoredPassword, StoredPasswordArgon2, StoredPasswordScram};
use confidante_inbound::{InboundStream, InboundStreamSettings};
use confidante_services::{DiscoHandler, ErasedIqHandler, NoopHooks, OfflineHook, PingHandler, RosterHook, RouterHandle};
use sha1::Sha1;
use sha2::Sha256;

type Error = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    AddUser { bare_jid: String, password: String },
    RemoveUser { bare_jid: String },
}

/// One `IqHandler` chain per accepted connection (disco first, so other
/// enabled modules can register their namespace into it), matching the
/// module-tag gating `Settings.modules.enabled` exposes elsewhere.
fn build_iq_handlers(modules: &ModuleSettings, domain: &Jid) -> Vec<Box<dyn ErasedIqHandler>> {
    let mut disco = DiscoHandler::new(domain.domain().to_string());
    let mut handlers: Vec<Box<dyn ErasedIqHandler>> = Vec::new();

    if modules.enabled.contains("ping") {
        disco.register_feature(namespaces::PING);
    }

    handlers.push(Box::new(disco));

    if modules.enabled.contains("ping") {
        handlers.push(Box::new(PingHandler));
    }

    handlers
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = Settings::init()?;

    let store_backend = SqliteStoreBackend::new(&settings).await?;
    let store = StoreHandle::new(store_backend);

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::AddUser { bare_jid, password }) => {
            let bare_jid = bare_jid.parse::<Jid>()?.to_bare();
            let stored_password_argon2 = StoredPasswordArgon2::new(&password)?.to_string();
            let stored_password_scram_sha1 =
                StoredPasswordScram::<Sha1>::new(&password)?.to_string();
            let stored_password_scram_sha256 =
                StoredPasswordScram::<Sha256>::new(&password)?.to_string();
            store
                .add_user(
                    bare_jid,
                    stored_password_argon2,
                    stored_password_scram_sha1,
                    stored_password_scram_sha256,
                )
                .await?;
        }
        Some(Commands::RemoveUser { bare_jid }) => {
            let bare_jid = bare_jid.parse::<Jid>()?.to_bare();
            store.remove_user(bare_jid).await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind("0.0.0.0:5222").await?;
            let router = RouterHandle::new(settings.domain.domain().to_string(), store.clone());

            tracing::info!(domain = %settings.domain, "accepting client connections on {:?}", listener.local_addr()?);

            loop {
                let (connection, peer_addr) = listener.accept().await?;

                let settings = settings.clone();
                let router = router.clone();
                let store = store.clone();

                tokio::spawn(async move {
                    let connection = TcpConnection::new(connection, settings.tls.server_config.clone());
                    let connection = match DebugConnection::try_new(connection).await {
                        Ok(connection) => connection,
                        Err(err) => {
                            tracing::warn!(%err, %peer_addr, "failed to set up connection recorder");
                            return;
                        }
                    };
                    tracing::info!(uuid = %connection.uuid(), %peer_addr, "accepted connection");

                    let iq_handlers = build_iq_handlers(&settings.modules, &settings.domain);
                    let roster_hook: Box<dyn RosterHook> = Box::new(NoopHooks);
                    let offline_hook: Box<dyn OfflineHook> = Box::new(NoopHooks);

                    let stream_settings = InboundStreamSettings::from_settings(&settings);
                    let mut stream = InboundStream::<_, RustyXmlStreamParser<_>, _>::new(
                        connection,
                        router,
                        store,
                        stream_settings,
                        iq_handlers,
                        roster_hook,
                        offline_hook,
                    );
                    stream.handle().await;
                });
            }
        }
    }

    Ok(())
}
