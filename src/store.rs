use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::model::{NewSite, Site};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("store request failed: {0}")]
    Request(String),
    #[error("malformed store response: {0}")]
    Malformed(String),
}

/// An uploaded binary asset, addressed by an opaque id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAsset {
    pub asset_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Mutation {
    PatchUnset { id: String, fields: Vec<String> },
    Delete { id: String },
}

/// An ordered batch of mutations committed all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    mutations: Vec<Mutation>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patch_unset(&mut self, id: impl Into<String>, fields: &[&str]) -> &mut Self {
        self.mutations.push(Mutation::PatchUnset {
            id: id.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        self
    }

    pub fn delete(&mut self, id: impl Into<String>) -> &mut Self {
        self.mutations.push(Mutation::Delete { id: id.into() });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }
}

/// The single seam to the hosted document store. Reads coerce into typed
/// records; referential integrity on delete is the caller's job (the store
/// only models asset references by convention).
#[async_trait]
pub trait SiteStore: Send + Sync {
    async fn get_site(&self, id: &str) -> Result<Option<Site>, StoreError>;

    /// Every site document, deleted or not.
    async fn list_sites(&self) -> Result<Vec<Site>, StoreError>;

    /// Sites with `status != deleted` (or no status at all), newest first.
    /// Always a live read; listings must reflect deletes promptly.
    async fn list_active_sites(&self) -> Result<Vec<Site>, StoreError>;

    /// Ids of every document holding a reference to the asset.
    async fn find_asset_referrers(&self, asset_id: &str) -> Result<Vec<String>, StoreError>;

    async fn create_site(&self, draft: &NewSite) -> Result<Site, StoreError>;

    /// Remove fields from a document. Unsetting an absent field is a no-op.
    async fn patch_unset(&self, id: &str, fields: &[&str]) -> Result<(), StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Delete a binary asset. The store rejects this while documents still
    /// reference the asset.
    async fn delete_asset(&self, asset_id: &str) -> Result<(), StoreError>;

    /// Commit a multi-document transaction atomically.
    async fn commit(&self, tx: Transaction) -> Result<(), StoreError>;

    async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<UploadedAsset, StoreError>;
}

const QUERY_SITE_BY_ID: &str = r#"*[_type == "site" && _id == $id][0]"#;
const QUERY_ALL_SITES: &str = r#"*[_type == "site"] | order(createdAt desc)"#;
const QUERY_ACTIVE_SITES: &str = r#"*[_type == "site" && status != "deleted"] | order(createdAt desc)"#;
const QUERY_ASSET_REFERRERS: &str = r#"*[references($ref)]._id"#;

#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    pub project_id: String,
    pub dataset: String,
    pub token: String,
    pub api_version: String,
}

impl HttpStoreConfig {
    pub fn default_api_version() -> String {
        "2024-01-01".to_string()
    }
}

/// Client for a Sanity-compatible content store HTTP API. Queries go to the
/// live API host (not the CDN) so admin and public views see deletes without
/// a stale-cache window.
#[derive(Debug, Clone)]
pub struct HttpSiteStore {
    client: reqwest::Client,
    query_url: String,
    mutate_url: String,
    upload_url: String,
    token: String,
}

impl HttpSiteStore {
    pub fn new(config: &HttpStoreConfig) -> Result<Self, StoreError> {
        let base = format!(
            "https://{}.api.sanity.io/v{}",
            config.project_id, config.api_version
        );
        Self::from_base_url(&base, &config.dataset, &config.token)
    }

    /// Point the client at an explicit API base. Used for self-hosted
    /// store deployments and stub servers in tests.
    pub fn from_base_url(base: &str, dataset: &str, token: &str) -> Result<Self, StoreError> {
        let base = base.trim_end_matches('/');
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| StoreError::Request(format!("build store http client: {err}")))?;

        Ok(Self {
            client,
            query_url: format!("{base}/data/query/{dataset}"),
            mutate_url: format!("{base}/data/mutate/{dataset}"),
            upload_url: format!("{base}/assets/images/{dataset}"),
            token: token.to_string(),
        })
    }

    async fn query(&self, groq: &str, params: &[(&str, Value)]) -> Result<Value, StoreError> {
        let mut pairs: Vec<(String, String)> = vec![("query".to_string(), groq.to_string())];
        for (name, value) in params {
            let encoded = serde_json::to_string(value)
                .map_err(|err| StoreError::Malformed(format!("encode query param {name}: {err}")))?;
            pairs.push((format!("${name}"), encoded));
        }

        let response = self
            .client
            .get(&self.query_url)
            .query(&pairs)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| StoreError::Request(format!("query: {err}")))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| StoreError::Request(format!("read query response: {err}")))?;
        if !status.is_success() {
            let message = parse_error_description(&raw).unwrap_or(raw);
            return Err(StoreError::Request(format!("query failed ({status}): {message}")));
        }

        let mut value: Value = serde_json::from_str(&raw)
            .map_err(|err| StoreError::Malformed(format!("parse query response: {err}")))?;
        Ok(value
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    async fn mutate(&self, mutations: Value, return_documents: bool) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(&self.mutate_url)
            .query(&[
                ("returnDocuments", if return_documents { "true" } else { "false" }),
                ("visibility", "sync"),
            ])
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "mutations": mutations }))
            .send()
            .await
            .map_err(|err| StoreError::Request(format!("mutate: {err}")))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| StoreError::Request(format!("read mutate response: {err}")))?;
        if !status.is_success() {
            let message = parse_error_description(&raw).unwrap_or(raw);
            return Err(StoreError::Request(format!("mutate failed ({status}): {message}")));
        }

        serde_json::from_str(&raw)
            .map_err(|err| StoreError::Malformed(format!("parse mutate response: {err}")))
    }
}

#[async_trait]
impl SiteStore for HttpSiteStore {
    async fn get_site(&self, id: &str) -> Result<Option<Site>, StoreError> {
        let result = self
            .query(QUERY_SITE_BY_ID, &[("id", Value::from(id))])
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let site = serde_json::from_value(result)
            .map_err(|err| StoreError::Malformed(format!("decode site document: {err}")))?;
        Ok(Some(site))
    }

    async fn list_sites(&self) -> Result<Vec<Site>, StoreError> {
        let result = self.query(QUERY_ALL_SITES, &[]).await?;
        decode_sites(result)
    }

    async fn list_active_sites(&self) -> Result<Vec<Site>, StoreError> {
        let result = self.query(QUERY_ACTIVE_SITES, &[]).await?;
        decode_sites(result)
    }

    async fn find_asset_referrers(&self, asset_id: &str) -> Result<Vec<String>, StoreError> {
        let result = self
            .query(QUERY_ASSET_REFERRERS, &[("ref", Value::from(asset_id))])
            .await?;
        if result.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(result)
            .map_err(|err| StoreError::Malformed(format!("decode referrer ids: {err}")))
    }

    async fn create_site(&self, draft: &NewSite) -> Result<Site, StoreError> {
        let draft_json = serde_json::to_value(draft)
            .map_err(|err| StoreError::Malformed(format!("encode site draft: {err}")))?;
        let response = self
            .mutate(serde_json::json!([{ "create": draft_json }]), true)
            .await?;

        let document = response
            .get("results")
            .and_then(|r| r.get(0))
            .and_then(|r| r.get("document"))
            .cloned()
            .ok_or_else(|| StoreError::Malformed("create returned no document".to_string()))?;
        serde_json::from_value(document)
            .map_err(|err| StoreError::Malformed(format!("decode created site: {err}")))
    }

    async fn patch_unset(&self, id: &str, fields: &[&str]) -> Result<(), StoreError> {
        self.mutate(
            serde_json::json!([{ "patch": { "id": id, "unset": fields } }]),
            false,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.mutate(serde_json::json!([{ "delete": { "id": id } }]), false)
            .await?;
        Ok(())
    }

    async fn delete_asset(&self, asset_id: &str) -> Result<(), StoreError> {
        self.mutate(serde_json::json!([{ "delete": { "id": asset_id } }]), false)
            .await?;
        Ok(())
    }

    async fn commit(&self, tx: Transaction) -> Result<(), StoreError> {
        if tx.is_empty() {
            return Ok(());
        }
        let mutations: Vec<Value> = tx
            .mutations()
            .iter()
            .map(|m| match m {
                Mutation::PatchUnset { id, fields } => {
                    serde_json::json!({ "patch": { "id": id, "unset": fields } })
                }
                Mutation::Delete { id } => serde_json::json!({ "delete": { "id": id } }),
            })
            .collect();
        self.mutate(Value::Array(mutations), false).await?;
        Ok(())
    }

    async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<UploadedAsset, StoreError> {
        let response = self
            .client
            .post(&self.upload_url)
            .query(&[("filename", filename)])
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|err| StoreError::Request(format!("upload image: {err}")))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| StoreError::Request(format!("read upload response: {err}")))?;
        if !status.is_success() {
            let message = parse_error_description(&raw).unwrap_or(raw);
            return Err(StoreError::Request(format!("upload failed ({status}): {message}")));
        }

        let value: Value = serde_json::from_str(&raw)
            .map_err(|err| StoreError::Malformed(format!("parse upload response: {err}")))?;
        let document = value
            .get("document")
            .ok_or_else(|| StoreError::Malformed("upload returned no document".to_string()))?;
        let asset_id = document
            .get("_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StoreError::Malformed("uploaded asset has no _id".to_string()))?
            .to_string();
        let url = document
            .get("url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(UploadedAsset { asset_id, url })
    }
}

fn decode_sites(result: Value) -> Result<Vec<Site>, StoreError> {
    if result.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(result)
        .map_err(|err| StoreError::Malformed(format!("decode site documents: {err}")))
}

fn parse_error_description(raw_json: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw_json).ok()?;
    let error = value.get("error")?;
    let message = error
        .get("description")
        .or_else(|| error.get("message"))?
        .as_str()?
        .to_owned();
    Some(message)
}

#[derive(Debug, Default)]
struct MemoryInner {
    docs: HashMap<String, Site>,
    assets: HashSet<String>,
}

/// In-process store backend. Used by tests and by credential-less dev runs;
/// semantics mirror the hosted store, including the rejection of asset
/// deletes while references are live.
#[derive(Debug, Default)]
pub struct MemorySiteStore {
    inner: RwLock<MemoryInner>,
}

impl MemorySiteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn asset_exists(&self, asset_id: &str) -> bool {
        self.inner.read().await.assets.contains(asset_id)
    }

    pub async fn site_count(&self) -> usize {
        self.inner.read().await.docs.len()
    }
}

fn apply_unset(site: &mut Site, fields: &[String]) {
    for field in fields {
        match field.as_str() {
            "screenshot" => site.screenshot = None,
            "error" => site.error = None,
            "lastProcessed" => site.last_processed = None,
            // Unsetting a field the record never carries is a no-op.
            _ => {}
        }
    }
}

#[async_trait]
impl SiteStore for MemorySiteStore {
    async fn get_site(&self, id: &str) -> Result<Option<Site>, StoreError> {
        Ok(self.inner.read().await.docs.get(id).cloned())
    }

    async fn list_sites(&self) -> Result<Vec<Site>, StoreError> {
        let inner = self.inner.read().await;
        let mut sites: Vec<Site> = inner.docs.values().cloned().collect();
        sites.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sites)
    }

    async fn list_active_sites(&self) -> Result<Vec<Site>, StoreError> {
        let mut sites = self.list_sites().await?;
        sites.retain(|s| !s.is_deleted());
        Ok(sites)
    }

    async fn find_asset_referrers(&self, asset_id: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let mut ids: Vec<String> = inner
            .docs
            .values()
            .filter(|s| s.screenshot_asset() == Some(asset_id))
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn create_site(&self, draft: &NewSite) -> Result<Site, StoreError> {
        let site = Site {
            id: uuid::Uuid::new_v4().simple().to_string(),
            url: draft.url.clone(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            category: draft.category,
            screenshot: draft.screenshot.clone(),
            status: Some(draft.status),
            has_error: draft.has_error,
            created_at: draft.created_at,
            last_processed: None,
            error: None,
        };
        self.inner
            .write()
            .await
            .docs
            .insert(site.id.clone(), site.clone());
        Ok(site)
    }

    async fn patch_unset(&self, id: &str, fields: &[&str]) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let site = inner
            .docs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        apply_unset(site, &fields);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.write().await.docs.remove(id);
        Ok(())
    }

    async fn delete_asset(&self, asset_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let referenced = inner
            .docs
            .values()
            .any(|s| s.screenshot_asset() == Some(asset_id));
        if referenced {
            return Err(StoreError::Request(format!(
                "asset {asset_id} is still referenced"
            )));
        }
        inner.assets.remove(asset_id);
        Ok(())
    }

    async fn commit(&self, tx: Transaction) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        // Validate before touching anything so a bad transaction applies
        // none of its mutations.
        for mutation in tx.mutations() {
            if let Mutation::PatchUnset { id, .. } = mutation
                && !inner.docs.contains_key(id)
            {
                return Err(StoreError::NotFound(id.clone()));
            }
        }

        for mutation in tx.mutations() {
            match mutation {
                Mutation::PatchUnset { id, fields } => {
                    if let Some(site) = inner.docs.get_mut(id) {
                        apply_unset(site, fields);
                    }
                }
                Mutation::Delete { id } => {
                    inner.docs.remove(id);
                }
            }
        }
        Ok(())
    }

    async fn upload_image(
        &self,
        _bytes: Vec<u8>,
        _filename: &str,
        _content_type: &str,
    ) -> Result<UploadedAsset, StoreError> {
        let asset_id = format!("image-{}", uuid::Uuid::new_v4().simple());
        self.inner.write().await.assets.insert(asset_id.clone());
        Ok(UploadedAsset {
            asset_id,
            url: None,
        })
    }
}
