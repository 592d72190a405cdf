use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Fixed category set shown in the gallery filter bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Category {
    Social,
    Tech,
    News,
    Tools,
    Resources,
    Learning,
    #[default]
    Others,
}

impl Category {
    /// Coerce an arbitrary string into the enum. Anything unrecognized maps
    /// to `Others`; analyzer output is not trusted to stay in-set.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "social" => Self::Social,
            "tech" => Self::Tech,
            "news" => Self::News,
            "tools" => Self::Tools,
            "resources" => Self::Resources,
            "learning" => Self::Learning,
            _ => Self::Others,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Social => "social",
            Self::Tech => "tech",
            Self::News => "news",
            Self::Tools => "tools",
            Self::Resources => "resources",
            Self::Learning => "learning",
            Self::Others => "others",
        }
    }
}

impl From<String> for Category {
    fn from(raw: String) -> Self {
        Self::from_raw(&raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Pending,
    Active,
    Processing,
    Completed,
    Failed,
    Deleted,
}

impl SiteStatus {
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Image field as the store shapes it: a typed wrapper around a weak
/// reference to an asset document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageField {
    #[serde(rename = "_type", default = "image_type")]
    pub type_tag: String,
    pub asset: AssetLink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLink {
    #[serde(rename = "_type", default = "reference_type")]
    pub type_tag: String,
    #[serde(rename = "_ref")]
    pub asset_id: String,
}

impl ImageField {
    pub fn referencing(asset_id: impl Into<String>) -> Self {
        Self {
            type_tag: image_type(),
            asset: AssetLink {
                type_tag: reference_type(),
                asset_id: asset_id.into(),
            },
        }
    }
}

fn image_type() -> String {
    "image".to_string()
}

fn reference_type() -> String {
    "reference".to_string()
}

/// A cataloged site as read back from the document store. Older records may
/// lack `status`; reads coerce instead of failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    #[serde(rename = "_id")]
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ImageField>,
    #[serde(
        default,
        deserialize_with = "lenient_status",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<SiteStatus>,
    #[serde(default)]
    pub has_error: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Site {
    /// The referenced screenshot asset id, if any.
    pub fn screenshot_asset(&self) -> Option<&str> {
        self.screenshot.as_ref().map(|s| s.asset.asset_id.as_str())
    }

    pub fn is_deleted(&self) -> bool {
        self.status == Some(SiteStatus::Deleted)
    }
}

/// Creation payload for a site document. The store assigns the id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSite {
    #[serde(rename = "_type")]
    pub type_tag: &'static str,
    pub url: String,
    pub title: String,
    pub description: String,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ImageField>,
    pub status: SiteStatus,
    pub has_error: bool,
    pub created_at: DateTime<Utc>,
}

pub const SITE_TYPE: &str = "site";

fn lenient_status<'de, D>(deserializer: D) -> Result<Option<SiteStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(SiteStatus::from_raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_coerces_unknown_to_others() {
        assert_eq!(Category::from_raw("tech"), Category::Tech);
        assert_eq!(Category::from_raw(" Learning "), Category::Learning);
        assert_eq!(Category::from_raw("cooking"), Category::Others);
        assert_eq!(Category::from_raw(""), Category::Others);
    }

    #[test]
    fn site_reads_store_field_names() {
        let raw = serde_json::json!({
            "_id": "abc123",
            "url": "https://example.com",
            "title": "Example",
            "description": "demo",
            "category": "tools",
            "screenshot": {
                "_type": "image",
                "asset": { "_type": "reference", "_ref": "image-deadbeef" }
            },
            "hasError": true,
            "createdAt": "2026-01-01T00:00:00Z"
        });

        let site: Site = serde_json::from_value(raw).unwrap();
        assert_eq!(site.id, "abc123");
        assert_eq!(site.category, Category::Tools);
        assert_eq!(site.screenshot_asset(), Some("image-deadbeef"));
        assert!(site.has_error);
        assert_eq!(site.status, None);
    }

    #[test]
    fn unknown_status_reads_as_absent() {
        let raw = serde_json::json!({
            "_id": "abc",
            "url": "https://example.com",
            "status": "archived",
            "createdAt": "2026-01-01T00:00:00Z"
        });
        let site: Site = serde_json::from_value(raw).unwrap();
        assert_eq!(site.status, None);

        let raw = serde_json::json!({
            "_id": "abc",
            "url": "https://example.com",
            "status": "deleted",
            "createdAt": "2026-01-01T00:00:00Z"
        });
        let site: Site = serde_json::from_value(raw).unwrap();
        assert!(site.is_deleted());
    }

    #[test]
    fn new_site_serializes_type_tag() {
        let draft = NewSite {
            type_tag: SITE_TYPE,
            url: "https://example.com".to_string(),
            title: "Example".to_string(),
            description: String::new(),
            category: Category::Others,
            screenshot: Some(ImageField::referencing("image-1")),
            status: SiteStatus::Active,
            has_error: false,
            created_at: "2026-01-01T00:00:00Z".parse().unwrap(),
        };
        let value = serde_json::to_value(&draft).unwrap();
        assert_eq!(value["_type"], "site");
        assert_eq!(value["screenshot"]["asset"]["_ref"], "image-1");
        assert_eq!(value["hasError"], false);
        assert_eq!(value["status"], "active");
    }
}
