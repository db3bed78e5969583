pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod push;
pub mod reconciler;
pub mod services;
pub mod session;
pub mod storage;
pub mod types;

pub use config::Config;
pub use error::{ConsoleError, Result};

use self::auth::AuthService;
use self::config::{ensure_config_dir, load_config, resolve_state_dir};
use self::http::ApiClient;
use self::push::{EventBus, PushClient, PushCommand, PushCommands};
use self::reconciler::Reconciler;
use self::session::SessionManager;
use self::storage::{FileStore, KeyValueStore, MemoryStore};

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

pub const STATE_FILE: &str = "session.json";

pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "operator_console=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

pub struct Console {
    pub config: Config,
    pub session: Arc<SessionManager>,
    pub api: Arc<ApiClient>,
    pub auth: AuthService,
    pub reconciler: Arc<Reconciler>,
    pub bus: Arc<EventBus>,
    commands: PushCommands,
    pending_commands: Option<mpsc::UnboundedReceiver<PushCommand>>,
    push: Option<(PushClient, JoinHandle<()>)>,
}

impl Console {
    /// Builds a console over the given stores. Nothing touches the network
    /// until a call is made or [`Console::connect_push`] runs.
    pub fn new(
        config: Config,
        tab: Arc<dyn KeyValueStore>,
        durable: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let session = Arc::new(SessionManager::new(
            tab,
            durable.clone(),
            config.session.clone(),
        ));
        session.hydrate();

        let api = Arc::new(ApiClient::new(
            &config.api,
            session.clone(),
            config.session.refresh_margin_ms,
        )?);
        let auth = AuthService::new(&config.api, api.clone(), durable)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let commands = PushCommands::new(tx);
        let pending_commands = config.push.enabled.then_some(rx);

        let reconciler = Arc::new(Reconciler::new(
            api.clone(),
            Some(commands.clone()),
            config.conversations.page_size,
            config.conversations.message_page_size,
        ));
        let bus = Arc::new(EventBus::new(config.push.event_buffer));

        Ok(Self {
            config,
            session,
            api,
            auth,
            reconciler,
            bus,
            commands,
            pending_commands,
            push: None,
        })
    }

    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let state_dir = resolve_state_dir(&config);
        let durable: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(state_dir.join(STATE_FILE))?);
        let tab: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        Ok(Self::new(config, tab, durable)?)
    }

    pub fn commands(&self) -> PushCommands {
        self.commands.clone()
    }

    /// Opens the push channel and feeds its events into the reconciler.
    /// Returns false when push is disabled or already connected.
    pub fn connect_push(&mut self) -> bool {
        let Some(rx) = self.pending_commands.take() else {
            return false;
        };
        let client = PushClient::spawn(&self.config.push, self.session.clone(), self.bus.clone(), rx);
        let events = self.bus.stream();
        let pump = tokio::spawn(self.reconciler.clone().run_push_loop(events));
        info!(url = %self.config.push.url, "push channel starting");
        self.push = Some((client, pump));
        true
    }

    pub fn is_push_connected(&self) -> bool {
        self.push
            .as_ref()
            .map(|(client, _)| client.is_connected())
            .unwrap_or(false)
    }

    pub fn disconnect_push(&mut self) {
        if let Some((client, pump)) = self.push.take() {
            client.disconnect();
            pump.abort();
            info!("push channel stopped");
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.disconnect_push();
    }
}

pub fn create_console() -> anyhow::Result<Console> {
    ensure_config_dir();
    let config = load_config();
    Console::from_config(config)
}
