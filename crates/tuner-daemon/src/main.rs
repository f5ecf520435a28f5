mod core;
mod hls;
mod host;
mod http;
mod mpv;
mod socket;
mod timer;

use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tuner_proto::config::Config;
use tuner_proto::protocol::{NowPlaying, TransportAction, TransportState};

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    NowPlaying(NowPlaying),
    Transport(TransportState),
    TransportActions(Vec<TransportAction>),
    /// Short user-facing message.
    Notice(String),
    Export(String),
    Log(String),
    Error(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR reach clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = String::new();
        let now = chrono::Local::now();
        message.push_str(&format!("{} [{}] ", now.format("%H:%M:%S"), level));

        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        let msg = if *level == tracing::Level::ERROR {
            BroadcastMessage::Error(message)
        } else {
            BroadcastMessage::Log(message)
        };
        // No receivers is OK
        let _ = self.sender.send(msg);
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so logging can use it
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = tuner_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    let broadcast_layer = BroadcastLayer::new(broadcast_tx.clone());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(broadcast_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tuner_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    if let Some(parent) = config.daemon.pid_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config.daemon.pid_file, std::process::id().to_string())?;

    // Event channel — all external inputs funnel into DaemonCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::DaemonEvent>(256);

    let daemon_core =
        core::DaemonCore::new(config.clone(), broadcast_tx.clone(), event_tx.clone()).await?;

    let state_manager = daemon_core.state_manager();

    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        tuner_proto::platform::DAEMON_TCP_PORT,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
        );
    }

    // Ctrl-C goes through the core so mpv is shut down and state saved
    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = shutdown_tx.send(core::DaemonEvent::Shutdown).await;
        }
    });

    info!("Daemon initialised, running event loop");
    let result = daemon_core.run(event_rx).await;

    let _ = std::fs::remove_file(&config.daemon.pid_file);
    result
}
