use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::crawler::errors::{CrawlerResult, ExtractionError};

/// Gender bucket inferred from the product URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Gender {
    Man,
    Woman,
    Other,
}

impl Gender {
    /// Infer gender from path segments. Women is checked first since
    /// "/womens" also contains "mens".
    pub fn from_url(url: &str) -> Self {
        let path = Url::parse(url)
            .map(|u| u.path().to_lowercase())
            .unwrap_or_else(|_| url.to_lowercase());

        if path.contains("/women/") || path.contains("/womens") {
            Gender::Woman
        } else if path.contains("/men/") || path.contains("/mens") {
            Gender::Man
        } else {
            Gender::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Man => "MAN",
            Gender::Woman => "WOMAN",
            Gender::Other => "OTHER",
        }
    }
}

/// Stable identity for a product: SHA-256 hex digest of its URL
pub fn product_id(product_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(product_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Free-form context stored next to the record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMetadata {
    pub url: String,
    pub breadcrumbs: Vec<String>,
}

/// Fields resolved from a product page before validation.
/// Every field is optional here; `ProductRecord::assemble` enforces the required ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductFields {
    pub title: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub sizes: Vec<String>,
    pub category: Option<String>,
    pub breadcrumbs: Vec<String>,
    pub resolved_url: Option<String>,
}

/// Site level constants stamped onto every record
#[derive(Debug, Clone)]
pub struct SiteIdentity {
    pub source: String,
    pub brand: String,
}

/// A validated product ready for the sink. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRecord {
    pub id: String,
    pub source: String,
    pub product_url: String,
    pub affiliate_url: Option<String>,
    pub image_url: String,
    pub brand: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub gender: Gender,
    pub price: Option<f64>,
    pub currency: String,
    pub size: Option<String>,
    pub second_hand: bool,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<ProductMetadata>,
    pub created_at: DateTime<Utc>,
}

/// Title and image URL after the hard checks passed
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredFields {
    pub title: String,
    pub image_url: String,
}

/// Validate the fields whose absence discards the whole record
pub fn validate_required(
    fields: &ProductFields,
    product_url: &str,
    base_url: &Url,
) -> CrawlerResult<RequiredFields> {
    let title = fields
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ExtractionError::MissingTitle(product_url.to_string()))?
        .to_string();

    let raw_image = fields
        .image_url
        .as_deref()
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .ok_or_else(|| ExtractionError::MissingImage(product_url.to_string()))?;

    let image_url = resolve_http_url(raw_image, base_url).ok_or_else(|| {
        ExtractionError::InvalidImageUrl {
            url: product_url.to_string(),
            image: raw_image.to_string(),
        }
    })?;

    Ok(RequiredFields { title, image_url })
}

/// Resolve `candidate` against `base` and accept it only if the result is HTTP(S)
pub fn resolve_http_url(candidate: &str, base: &Url) -> Option<String> {
    let resolved = match Url::parse(candidate) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => base.join(candidate).ok()?,
        Err(_) => return None,
    };
    match resolved.scheme() {
        "http" | "https" if resolved.host_str().is_some() => Some(resolved.to_string()),
        _ => None,
    }
}

impl ProductRecord {
    /// Combine validated fields, optional fields and an optional embedding
    pub fn assemble(
        site: &SiteIdentity,
        product_url: &str,
        required: RequiredFields,
        fields: ProductFields,
        embedding: Option<Vec<f32>>,
    ) -> Self {
        let size = if fields.sizes.is_empty() {
            None
        } else {
            Some(fields.sizes.join(", "))
        };
        let metadata = ProductMetadata {
            url: fields
                .resolved_url
                .clone()
                .unwrap_or_else(|| product_url.to_string()),
            breadcrumbs: fields.breadcrumbs.clone(),
        };

        Self {
            id: product_id(product_url),
            source: site.source.clone(),
            product_url: product_url.to_string(),
            affiliate_url: None,
            image_url: required.image_url,
            brand: site.brand.clone(),
            title: required.title,
            description: non_empty(fields.description),
            category: non_empty(fields.category),
            gender: Gender::from_url(product_url),
            price: fields.price.filter(|p| p.is_finite() && *p >= 0.0),
            currency: non_empty(fields.currency).unwrap_or_else(|| "USD".to_string()),
            size,
            second_hand: false,
            embedding,
            metadata: Some(metadata),
            created_at: Utc::now(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
