pub mod config;
pub mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::api_client::ApiClient;
use crate::error::ExtractError;
use crate::pipeline::ExtractionPipeline;
use crate::session::SessionManager;

pub use config::ExtractorConfig;
pub use types::{FileEntry, HostError, MediaInfo, QualityOption, ShareContext, ShareLocator, SessionState};

/// Facade over the five core components: owns the pooled HTTP client, the
/// session manager, and the API client, and exposes the single operation the
/// rest of the system needs.
///
/// Analogous to the teacher's `AppState` — a small, cloneable bundle of
/// `Arc`-shared subsystems, built once per process and handed to every
/// extraction.
#[derive(Clone)]
pub struct Core {
    pipeline: Arc<ExtractionPipeline>,
    closed: Arc<AtomicBool>,
}

impl Core {
    /// Build a `Core` from an already-resolved config. Constructs the
    /// pooled `reqwest::Client` per §4.2 (connection caps, cookie jar, TLS
    /// verification knob) and wires the Session Manager and API Client on
    /// top of it.
    pub fn new(config: ExtractorConfig) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(30)
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(config.allow_invalid_certs)
            .cookie_store(true)
            .build()
            .map_err(ExtractError::from)?;

        let session_manager = SessionManager::new(client.clone(), config.cookie_refresh_interval_secs);
        let api_client = ApiClient::new(client, session_manager, config.max_retries);
        let pipeline = ExtractionPipeline::new(api_client);

        Ok(Self {
            pipeline: Arc::new(pipeline),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Build a `Core` from the process environment (see
    /// [`ExtractorConfig::from_env`]).
    pub fn from_env() -> Result<Self, ExtractError> {
        Self::new(ExtractorConfig::from_env())
    }

    /// `Extract(url) -> MediaInfo | Error` — the one operation the core
    /// exposes to callers.
    pub async fn extract(&self, url: &str) -> Result<MediaInfo, ExtractError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExtractError::Closed);
        }
        self.pipeline.extract(url).await
    }

    /// Drain the connection pool and mark the core closed. Idempotent;
    /// further `extract` calls return [`ExtractError::Closed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("extraction core closing");
        }
    }
}
