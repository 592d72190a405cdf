use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::analyze::{ContentAnalyzer, NoopAnalyzer, OpenAiAnalyzer};
use crate::auth::AdminCredentials;
use crate::capture::{HttpScreenshotProvider, NoopScreenshotProvider, RetryPolicy, ScreenshotProvider};
use crate::sites::SiteRecordManager;
use crate::store::{HttpSiteStore, HttpStoreConfig, MemorySiteStore, SiteStore};

#[derive(Debug, Clone)]
pub struct ScreenshotConfig {
    pub endpoint: String,
    pub access_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

/// Everything the binaries assemble from, read once at startup. Missing
/// provider credentials select degraded local substitutes instead of
/// failing: the memory store, the noop capture provider, the noop analyzer.
#[derive(Debug, Clone)]
pub struct Config {
    pub store: Option<HttpStoreConfig>,
    pub screenshot: Option<ScreenshotConfig>,
    pub analyzer: Option<AnalyzerConfig>,
    pub capture_timeout: Duration,
    pub retry: RetryPolicy,
    pub admin_username: String,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let store = match env_opt("SITEDECK_STORE_PROJECT") {
            Some(project_id) => Some(HttpStoreConfig {
                project_id,
                dataset: env_opt("SITEDECK_STORE_DATASET")
                    .unwrap_or_else(|| "production".to_string()),
                token: env_opt("SITEDECK_STORE_TOKEN")
                    .context("SITEDECK_STORE_TOKEN is required when a store project is set")?,
                api_version: env_opt("SITEDECK_STORE_API_VERSION")
                    .unwrap_or_else(HttpStoreConfig::default_api_version),
            }),
            None => None,
        };

        let screenshot = env_opt("SITEDECK_SCREENSHOT_URL").map(|endpoint| ScreenshotConfig {
            endpoint,
            access_key: env_opt("SITEDECK_SCREENSHOT_KEY"),
        });

        let analyzer = env_opt("OPENAI_API_KEY").map(|api_key| AnalyzerConfig {
            api_key,
            model: env_opt("SITEDECK_OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            base_url: env_opt("SITEDECK_OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        });

        let capture_timeout_secs = env_parse("SITEDECK_CAPTURE_TIMEOUT_SECS", 30u64)?;
        let capture_attempts = env_parse("SITEDECK_CAPTURE_ATTEMPTS", 3u32)?;
        let capture_delay_ms = env_parse("SITEDECK_CAPTURE_RETRY_DELAY_MS", 1000u64)?;

        Ok(Self {
            store,
            screenshot,
            analyzer,
            capture_timeout: Duration::from_secs(capture_timeout_secs),
            retry: RetryPolicy {
                max_attempts: capture_attempts.max(1),
                delay: Duration::from_millis(capture_delay_ms),
            },
            admin_username: env_opt("SITEDECK_ADMIN_USERNAME").unwrap_or_else(|| "admin".to_string()),
            admin_password: env_opt("SITEDECK_ADMIN_PASSWORD"),
        })
    }

    pub fn build_store(&self) -> anyhow::Result<Arc<dyn SiteStore>> {
        match &self.store {
            Some(store) => {
                tracing::info!(project = %store.project_id, dataset = %store.dataset, "using hosted document store");
                let store = HttpSiteStore::new(store).context("build document store client")?;
                Ok(Arc::new(store))
            }
            None => {
                tracing::warn!("no store project configured; using in-memory store (state dies with the process)");
                Ok(Arc::new(MemorySiteStore::new()))
            }
        }
    }

    pub fn build_screenshots(&self) -> anyhow::Result<Arc<dyn ScreenshotProvider>> {
        match &self.screenshot {
            Some(shot) => {
                tracing::info!(endpoint = %shot.endpoint, "using http screenshot provider");
                let provider = HttpScreenshotProvider::new(
                    shot.endpoint.clone(),
                    shot.access_key.clone(),
                    self.capture_timeout,
                )
                .context("build screenshot provider")?;
                Ok(Arc::new(provider))
            }
            None => {
                tracing::warn!("no screenshot endpoint configured; every capture will use the placeholder");
                Ok(Arc::new(NoopScreenshotProvider))
            }
        }
    }

    pub fn build_analyzer(&self) -> anyhow::Result<Arc<dyn ContentAnalyzer>> {
        match &self.analyzer {
            Some(analyzer) => {
                tracing::info!(model = %analyzer.model, "using openai content analyzer");
                let analyzer = OpenAiAnalyzer::new(
                    &analyzer.base_url,
                    analyzer.api_key.clone(),
                    analyzer.model.clone(),
                    Duration::from_secs(30),
                )
                .context("build content analyzer")?;
                Ok(Arc::new(analyzer))
            }
            None => {
                tracing::warn!("no analyzer key configured; card copy will be derived from urls");
                Ok(Arc::new(NoopAnalyzer))
            }
        }
    }

    pub fn build_manager(&self) -> anyhow::Result<Arc<SiteRecordManager>> {
        Ok(Arc::new(
            SiteRecordManager::new(
                self.build_store()?,
                self.build_screenshots()?,
                self.build_analyzer()?,
            )
            .with_retry_policy(self.retry),
        ))
    }

    /// Admin credentials for the web surface; the server refuses to start
    /// without an explicit password.
    pub fn admin_credentials(&self) -> anyhow::Result<AdminCredentials> {
        let password = self
            .admin_password
            .clone()
            .context("SITEDECK_ADMIN_PASSWORD is required to serve the admin surface")?;
        Ok(AdminCredentials {
            username: self.admin_username.clone(),
            password,
        })
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match env_opt(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("invalid {name}={raw:?}: {err}")),
        None => Ok(default),
    }
}
