//! # jarvis-server
//!
//! Real-time control-plane gateway of the Jarvis desktop assistant.
//!
//! One process serves five WebSocket channels:
//! - **command** (`/communicate`): JSON request/reply over the settings
//!   document (settings, calendar events)
//! - **telemetry** (`/info`): a host metrics snapshot every few seconds
//! - **wake word** (`/hotword`): audio frames in, detection events out
//! - **face models** (`/face_recognition`): reference image upload and removal
//! - **face verification** (`/face-verification`): image in, best match out

mod api;
mod audio;
mod channels;
mod config;
mod decoder;
mod error;
mod face_store;
mod probe;
mod registry;
mod router;
mod telemetry;
mod verification;
mod wakeword;

use std::sync::Arc;

use jarvis_shared::constants::APP_NAME;
use jarvis_store::DocumentStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::GatewayConfig;
use crate::decoder::{DecoderFactory, SilentDecoderFactory};
use crate::face_store::FaceStore;
use crate::registry::ConnectionRegistry;
use crate::router::CommandRouter;
use crate::telemetry::NetworkSmoother;
use crate::verification::{FaceMatcher, UnavailableMatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,jarvis_server=debug")),
        )
        .init();

    info!("Starting {} gateway v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = GatewayConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Settings document, loaded once into memory
    let store = Arc::new(DocumentStore::open(&config.db_path)?);

    // Managed faces directory (created if missing)
    let faces = Arc::new(FaceStore::new(config.faces_dir.clone(), config.max_upload_size).await?);

    info!(
        db = %config.db_path.display(),
        faces = %faces.base_path().display(),
        materialized = store.is_materialized().await,
        "Storage ready"
    );

    let decoders: Arc<dyn DecoderFactory> = Arc::new(SilentDecoderFactory);
    if !decoders.is_functional() {
        warn!("No keyword decoder linked in; wake-word channels will never report a detection");
    }

    let matcher: Arc<dyn FaceMatcher> = Arc::new(UnavailableMatcher);
    if !matcher.is_available() {
        warn!("No face matching engine linked in; verification requests will fail");
    }

    let http_addr = config.http_addr;
    let app_state = AppState {
        registry: ConnectionRegistry::new(),
        router: Arc::new(CommandRouter::new(store.clone(), faces.clone())),
        store,
        faces,
        smoother: Arc::new(NetworkSmoother::new()),
        probes: probe::sysinfo_factory(),
        decoders,
        matcher,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
