//! Stock positions as shown on the portal product page
//!
//! Pipeline: fetch every stock position, drop internal and obsolete item
//! families, project the survivors into the UI record shape.

use std::time::Duration;

use exact_client::{ExactClient, ExtraField};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::config::ProductsConfig;
use crate::error::PortalError;

/// Item code rules deciding which stock positions are shown.
#[derive(Debug, Clone)]
pub struct ProductFilter {
    marker: String,
    excluded_prefixes: Vec<String>,
    conditional_prefixes: Vec<String>,
}

impl ProductFilter {
    pub fn new(config: &ProductsConfig) -> Self {
        Self {
            marker: config.marker.to_uppercase(),
            excluded_prefixes: config.excluded_prefixes.clone(),
            conditional_prefixes: config.conditional_prefixes.clone(),
        }
    }

    /// Whether a raw stock position survives the pipeline.
    pub fn keep(&self, record: &Value) -> bool {
        let Some(code) = record.get("ItemCode").and_then(Value::as_str) else {
            return false;
        };
        if !self.marker.is_empty() && code.to_uppercase().contains(&self.marker) {
            return false;
        }
        if self.excluded_prefixes.iter().any(|p| code.starts_with(p.as_str())) {
            return false;
        }
        if self.conditional_prefixes.iter().any(|p| code.starts_with(p.as_str())) {
            let free = number(record.get("FreeStock"));
            let projected = number(record.get("ProjectedStock"));
            return !(free == 0.0 && projected == 0.0);
        }
        true
    }
}

/// Numbers and numeric strings pass through; everything else reads as zero.
fn number(value: Option<&Value>) -> f64 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite()).unwrap_or(0.0)
}

fn text(record: &Value, key: &str) -> String {
    record
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// One row of the product page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRecord {
    pub id: String,
    #[serde(rename = "Item Code")]
    pub item_code: String,
    #[serde(rename = "Item Description")]
    pub item_description: String,
    #[serde(rename = "Free Stock")]
    pub free_stock: f64,
    #[serde(rename = "Planned In")]
    pub planned_in: f64,
    #[serde(rename = "Planning Out")]
    pub planning_out: f64,
    #[serde(rename = "Expected Stock")]
    pub expected_stock: f64,
    #[serde(flatten)]
    pub details: Option<ItemDetails>,
}

impl ProductRecord {
    fn from_stock_position(record: &Value) -> Self {
        Self {
            id: text(record, "ItemId"),
            item_code: text(record, "ItemCode"),
            item_description: text(record, "ItemDescription"),
            free_stock: number(record.get("FreeStock")),
            planned_in: number(record.get("PlanningIn")),
            planning_out: number(record.get("PlanningOut")),
            expected_stock: number(record.get("ProjectedStock")),
            details: None,
        }
    }
}

const NOT_AVAILABLE: &str = "NA";

/// Physical item attributes from custom item fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemDetails {
    #[serde(rename = "Type of Skin")]
    pub type_of_skin: String,
    #[serde(rename = "Height")]
    pub height: String,
    #[serde(rename = "Thickness")]
    pub thickness: String,
    #[serde(rename = "Width")]
    pub width: String,
}

impl Default for ItemDetails {
    fn default() -> Self {
        Self {
            type_of_skin: NOT_AVAILABLE.into(),
            height: NOT_AVAILABLE.into(),
            thickness: NOT_AVAILABLE.into(),
            width: NOT_AVAILABLE.into(),
        }
    }
}

impl ItemDetails {
    /// Match field descriptions (Dutch, case-insensitive) to attributes.
    pub fn from_fields(fields: &[ExtraField]) -> Self {
        let mut details = Self::default();
        for field in fields {
            let Some(value) = field.value.as_deref().filter(|v| !v.is_empty()) else {
                continue;
            };
            let description = field.description.as_deref().unwrap_or_default().to_lowercase();
            let slot = if description.contains("materiaal") {
                &mut details.type_of_skin
            } else if description.contains("hoogte") {
                &mut details.height
            } else if description.contains("dikte") {
                &mut details.thickness
            } else if description.contains("breedte") {
                &mut details.width
            } else {
                continue;
            };
            *slot = value.to_owned();
        }
        details
    }
}

/// Start offset of enrichment call `index`.
fn start_delay(stagger: Duration, index: usize) -> Duration {
    stagger.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX))
}

/// Produces the product list from upstream stock positions.
pub struct ProductAdapter {
    client: ExactClient,
    filter: ProductFilter,
    enrich: bool,
    stagger: Duration,
}

impl ProductAdapter {
    pub fn new(client: ExactClient, config: &ProductsConfig) -> Self {
        Self {
            client,
            filter: ProductFilter::new(config),
            enrich: config.enrich,
            stagger: Duration::from_millis(config.enrich_stagger_ms),
        }
    }

    /// Filtered products in upstream order.
    #[instrument(skip_all)]
    pub async fn list_products(&self) -> Result<Vec<ProductRecord>, PortalError> {
        let raw = self
            .client
            .stock_positions()
            .await
            .inspect_err(|e| warn!(error = %e, "stock position fetch failed"))?;

        let mut products: Vec<ProductRecord> = raw
            .iter()
            .filter(|record| self.filter.keep(record))
            .map(ProductRecord::from_stock_position)
            .collect();
        info!(
            initial = raw.len(),
            filtered = products.len(),
            "stock positions filtered"
        );

        if self.enrich {
            self.enrich_details(&mut products).await;
        }
        Ok(products)
    }

    /// Attach item details. Call `i` starts `i * stagger` after the first;
    /// a failed call leaves that item with all attributes "NA".
    async fn enrich_details(&self, products: &mut [ProductRecord]) {
        let calls = products.iter().enumerate().map(|(index, product)| {
            let item_id = product.id.clone();
            let delay = start_delay(self.stagger, index);
            async move {
                tokio::time::sleep(delay).await;
                match self.client.item_extra_fields(&item_id).await {
                    Ok(fields) => ItemDetails::from_fields(&fields),
                    Err(e) => {
                        warn!(item_id = %item_id, error = %e, "extra field fetch failed");
                        ItemDetails::default()
                    }
                }
            }
        });
        let details = join_all(calls).await;

        for (product, details) in products.iter_mut().zip(details) {
            product.details = Some(details);
        }
        info!(products = products.len(), "products enriched");
    }
}
