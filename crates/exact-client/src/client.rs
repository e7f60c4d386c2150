//! Authenticated division-scoped requests
//!
//! Every call fetches a token from the `TokenSource` first, so an expired
//! token is refreshed at most once per upstream request. Failures carry the
//! upstream status and body for server-side logging; callers decide what the
//! browser gets to see.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::models::{Contact, ExtraField, odata_string};
use crate::{Error, Result, TokenSource};

/// Fields requested from the stock position sync endpoint.
const STOCK_POSITION_FIELDS: &[&str] = &[
    "ID",
    "ItemId",
    "ItemCode",
    "ItemDescription",
    "FreeStock",
    "PlanningIn",
    "PlanningOut",
    "ProjectedStock",
    "Timestamp",
];

/// Client for one Exact Online division.
#[derive(Clone)]
pub struct ExactClient {
    http: reqwest::Client,
    base_url: String,
    division: u64,
    tokens: Arc<dyn TokenSource>,
}

impl ExactClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        division: u64,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            division,
            tokens,
        }
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/api/v1/{}/{}", self.base_url, self.division, resource)
    }

    /// GET a division resource and return the decoded JSON body.
    #[instrument(skip_all, fields(resource = %resource))]
    pub async fn get(&self, resource: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.url(resource);
        let token = self.tokens.access_token().await?;

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Http(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            warn!(status = status.as_u16(), %url, "upstream request failed");
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::Decode(format!("GET {url}: {e}")))
    }

    /// Contacts with the given email whose `secret_field` is set.
    pub async fn find_contacts(&self, email: &str, secret_field: &str) -> Result<Vec<Contact>> {
        let body = self
            .get(
                "crm/Contacts",
                &[
                    (
                        "$filter",
                        format!("Email eq {} and {secret_field} ne null", odata_string(email)),
                    ),
                    ("$select", format!("ID,{secret_field},Email,FullName")),
                ],
            )
            .await?;

        let contacts: Vec<Contact> = results(body)?
            .iter()
            .filter_map(|record| Contact::from_record(record, secret_field))
            .collect();
        debug!(matches = contacts.len(), "contact lookup complete");
        Ok(contacts)
    }

    /// Raw stock position records, in upstream order.
    ///
    /// `Timestamp gt 1` asks the sync endpoint for every row in one response.
    pub async fn stock_positions(&self) -> Result<Vec<Value>> {
        let body = self
            .get(
                "sync/Inventory/StockPositions",
                &[
                    ("$filter", "Timestamp gt 1".to_string()),
                    ("$select", STOCK_POSITION_FIELDS.join(",")),
                ],
            )
            .await?;
        results(body)
    }

    /// Custom fields for one item.
    ///
    /// The id goes into a `guid'..'` literal, so anything but hex digits and
    /// dashes is refused before a request is made.
    pub async fn item_extra_fields(&self, item_id: &str) -> Result<Vec<ExtraField>> {
        if item_id.is_empty() || !item_id.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
            return Err(Error::Decode(format!("not a GUID item id: {item_id:?}")));
        }
        let body = self
            .get(
                "read/logistics/ItemExtraField",
                &[("itemId", format!("guid'{item_id}'"))],
            )
            .await?;
        results(body)?
            .into_iter()
            .map(|record| {
                serde_json::from_value(record)
                    .map_err(|e| Error::Decode(format!("extra field record: {e}")))
            })
            .collect()
    }
}

/// Unwrap the OData envelope: `{"d": {"results": [..]}}` or `{"d": [..]}`.
///
/// A body without `d` yields no records; a `d` of any other shape is malformed.
pub fn results(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Object(mut map) => match map.remove("d") {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Object(mut d)) => match d.remove("results") {
                Some(Value::Array(items)) => Ok(items),
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(other) => Err(Error::Decode(format!("d.results is not an array: {other}"))),
            },
            Some(other) => Err(Error::Decode(format!("unexpected d envelope: {other}"))),
        },
        other => Err(Error::Decode(format!("expected JSON object, got: {other}"))),
    }
}
