use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::analyze::{Analysis, ContentAnalyzer};
use crate::capture::{RetryPolicy, ScreenshotProvider, capture_with_retry, fallback_image};
use crate::model::{Category, ImageField, NewSite, SITE_TYPE, Site, SiteStatus};
use crate::store::{SiteStore, StoreError, Transaction};

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("site not found: {0}")]
    NotFound(String),
    #[error("upstream service failed: {0}")]
    Upstream(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("delete failed ({stage}): {source}")]
    DeleteFailed {
        stage: &'static str,
        #[source]
        source: StoreError,
    },
}

/// A submitted URL after scheme normalization. `text` is what gets stored
/// (the user's spelling plus a scheme when one was missing); `parsed` is
/// what providers navigate to.
#[derive(Debug, Clone)]
pub struct NormalizedUrl {
    pub text: String,
    pub parsed: Url,
}

pub fn normalize_url(raw: &str) -> Result<NormalizedUrl, SiteError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SiteError::InvalidInput("url is required".to_string()));
    }

    let lower = trimmed.to_ascii_lowercase();
    let has_scheme =
        lower.starts_with("http://") || lower.starts_with("https://") || trimmed.contains("://");
    let text = if has_scheme {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&text)
        .map_err(|err| SiteError::InvalidInput(format!("invalid url {trimmed:?}: {err}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(SiteError::InvalidInput(format!(
            "url must be http/https: {trimmed}"
        )));
    }
    if parsed.host_str().is_none() {
        return Err(SiteError::InvalidInput(format!("url has no host: {trimmed}")));
    }

    Ok(NormalizedUrl { text, parsed })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchItemStatus {
    Created,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItemOutcome {
    pub url: String,
    pub status: BatchItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-item results of a bulk add. One bad URL never aborts the others.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub created: usize,
    pub failed: usize,
    pub results: Vec<BatchItemOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub site_id: String,
    /// `None` when the record carried no screenshot. `Some(false)` means the
    /// references were severed but the asset itself could not be removed —
    /// a degraded state, not a dangling reference.
    pub asset_deleted: Option<bool>,
}

/// Owns the site lifecycle against the document store: create (with
/// screenshot capture and analysis), listing, and the cascading-delete
/// protocol that keeps asset references from dangling.
pub struct SiteRecordManager {
    store: Arc<dyn SiteStore>,
    screenshots: Arc<dyn ScreenshotProvider>,
    analyzer: Arc<dyn ContentAnalyzer>,
    retry: RetryPolicy,
    settle_delay: Duration,
}

impl SiteRecordManager {
    pub fn new(
        store: Arc<dyn SiteStore>,
        screenshots: Arc<dyn ScreenshotProvider>,
        analyzer: Arc<dyn ContentAnalyzer>,
    ) -> Self {
        Self {
            store,
            screenshots,
            analyzer,
            retry: RetryPolicy::default(),
            settle_delay: Duration::from_secs(1),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Create one site record. Capture and analysis run concurrently and
    /// fail independently; neither failure fails the create. Duplicate URLs
    /// are permitted and produce independent records.
    pub async fn create_site(&self, raw_url: &str) -> Result<Site, SiteError> {
        let url = normalize_url(raw_url)?;

        let (captured, analysis) = tokio::join!(
            capture_with_retry(self.screenshots.as_ref(), &url.parsed, self.retry),
            self.analyzer.analyze(&url.parsed),
        );

        let (image, capture_ok) = match captured {
            Ok(image) => (image, true),
            Err(err) => {
                tracing::warn!(
                    url = %url.text,
                    error = %format!("{err:#}"),
                    "screenshot capture failed; storing placeholder"
                );
                (fallback_image(), false)
            }
        };

        let analysis = match analysis {
            Ok(analysis) => analysis,
            Err(err) => {
                tracing::warn!(
                    url = %url.text,
                    error = %format!("{err:#}"),
                    "analysis failed; deriving card copy from the url"
                );
                fallback_analysis(&url.parsed)
            }
        };

        let filename = screenshot_filename(&image.content_type);
        let asset = self
            .store
            .upload_image(image.bytes, &filename, &image.content_type)
            .await?;

        let draft = NewSite {
            type_tag: SITE_TYPE,
            url: url.text,
            title: analysis.title,
            description: analysis.description,
            category: analysis.category,
            screenshot: Some(ImageField::referencing(asset.asset_id)),
            status: if capture_ok {
                SiteStatus::Active
            } else {
                SiteStatus::Pending
            },
            has_error: !capture_ok,
            created_at: Utc::now(),
        };

        let site = self.store.create_site(&draft).await?;
        tracing::info!(site = %site.id, url = %site.url, capture_ok, "site created");
        Ok(site)
    }

    /// Bulk add. Each URL is processed concurrently; outcomes are collected
    /// all-settled and reported per URL in input order.
    pub async fn create_sites(&self, urls: &[String]) -> Result<BatchOutcome, SiteError> {
        if urls.is_empty() {
            return Err(SiteError::InvalidInput("url list is empty".to_string()));
        }

        let results = join_all(urls.iter().map(|url| async move {
            match self.create_site(url).await {
                Ok(site) => BatchItemOutcome {
                    url: url.clone(),
                    status: BatchItemStatus::Created,
                    id: Some(site.id),
                    error: None,
                },
                Err(err) => BatchItemOutcome {
                    url: url.clone(),
                    status: BatchItemStatus::Failed,
                    id: None,
                    error: Some(err.to_string()),
                },
            }
        }))
        .await;

        let created = results
            .iter()
            .filter(|r| r.status == BatchItemStatus::Created)
            .count();
        let failed = results.len() - created;
        tracing::info!(created, failed, "bulk add finished");

        Ok(BatchOutcome {
            created,
            failed,
            results,
        })
    }

    pub async fn list_active_sites(&self) -> Result<Vec<Site>, SiteError> {
        Ok(self.store.list_active_sites().await?)
    }

    /// Run analysis without persisting anything.
    pub async fn preview(&self, raw_url: &str) -> Result<Analysis, SiteError> {
        let url = normalize_url(raw_url)?;
        self.analyzer
            .analyze(&url.parsed)
            .await
            .map_err(|err| SiteError::Upstream(format!("{err:#}")))
    }

    /// Cascading delete. After a successful return the target document is
    /// gone and no document in the store references its screenshot asset.
    ///
    /// The asset may be shared (the placeholder is), so every referencing
    /// document — not just the target — has its reference severed, in the
    /// same atomic commit that removes the target. Only then is the asset
    /// itself deleted, best-effort.
    pub async fn delete_site(&self, id: &str) -> Result<DeleteReport, SiteError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(SiteError::InvalidInput("site id is required".to_string()));
        }

        let site = self
            .store
            .get_site(id)
            .await?
            .ok_or_else(|| SiteError::NotFound(id.to_string()))?;

        let Some(asset_id) = site.screenshot_asset().map(str::to_string) else {
            self.store
                .delete(id)
                .await
                .map_err(|source| SiteError::DeleteFailed {
                    stage: "delete document",
                    source,
                })?;
            tracing::info!(site = %id, "site deleted (no screenshot)");
            return Ok(DeleteReport {
                site_id: id.to_string(),
                asset_deleted: None,
            });
        };

        let mut referrers = self
            .store
            .find_asset_referrers(&asset_id)
            .await
            .map_err(|source| SiteError::DeleteFailed {
                stage: "scan references",
                source,
            })?;
        // The scan can lag behind a just-written document; the target must
        // be severed no matter what the index says.
        if !referrers.iter().any(|r| r == id) {
            referrers.push(id.to_string());
        }

        let mut tx = Transaction::new();
        for referrer in &referrers {
            tx.patch_unset(referrer.clone(), &["screenshot"]);
        }
        tx.delete(id);
        self.store
            .commit(tx)
            .await
            .map_err(|source| SiteError::DeleteFailed {
                stage: "sever references",
                source,
            })?;

        let asset_deleted = match self.store.delete_asset(&asset_id).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    asset = %asset_id,
                    error = %err,
                    "asset delete failed after references were severed"
                );
                false
            }
        };

        tracing::info!(site = %id, asset = %asset_id, asset_deleted, referrers = referrers.len(), "site deleted");
        Ok(DeleteReport {
            site_id: id.to_string(),
            asset_deleted: Some(asset_deleted),
        })
    }

    /// Best-effort removal of every site document and screenshot asset.
    /// Per-item failures are logged and skipped; returns how many documents
    /// were removed.
    pub async fn delete_all(&self) -> Result<usize, SiteError> {
        let sites = self.store.list_sites().await?;
        if sites.is_empty() {
            return Ok(0);
        }

        // Sever every screenshot reference first, all-settled.
        join_all(
            sites
                .iter()
                .filter(|site| site.screenshot.is_some())
                .map(|site| async move {
                    if let Err(err) = self.store.patch_unset(&site.id, &["screenshot"]).await {
                        tracing::warn!(site = %site.id, error = %err, "unset screenshot failed");
                    }
                }),
        )
        .await;

        // No transaction spans the whole batch, so give the store a moment
        // to observe the unsets before the dependent asset deletes.
        tokio::time::sleep(self.settle_delay).await;

        let asset_ids: HashSet<String> = sites
            .iter()
            .filter_map(|s| s.screenshot_asset().map(str::to_string))
            .collect();
        join_all(asset_ids.iter().map(|asset_id| async move {
            if let Err(err) = self.store.delete_asset(asset_id).await {
                tracing::warn!(asset = %asset_id, error = %err, "asset delete failed");
            }
        }))
        .await;

        let deleted = join_all(sites.iter().map(|site| async move {
            match self.store.delete(&site.id).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(site = %site.id, error = %err, "document delete failed");
                    false
                }
            }
        }))
        .await
        .into_iter()
        .filter(|removed| *removed)
        .count();

        tracing::info!(deleted, total = sites.len(), "delete-all finished");
        Ok(deleted)
    }
}

fn fallback_analysis(url: &Url) -> Analysis {
    let title = url.host_str().unwrap_or(url.as_str()).to_string();
    Analysis {
        title,
        description: "No description available.".to_string(),
        category: Category::Others,
    }
}

fn screenshot_filename(content_type: &str) -> String {
    let ext = match content_type {
        "image/svg+xml" => "svg",
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "jpg",
    };
    format!("screenshot-{}.{ext}", uuid::Uuid::new_v4().simple())
}
