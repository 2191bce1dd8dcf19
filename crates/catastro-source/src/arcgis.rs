//! ArcGIS REST implementation of [`RemoteQueryClient`].
//!
//! Queries go through the portal's proxy (`proxy.ashx?<target>?<params>`), select
//! by polygon intersection or a SQL `where` clause, and paginate with
//! `resultOffset` / `resultRecordCount`. The session (cookies accepted through the
//! portal's splash page) is obtained elsewhere and handed in as a cookie header.

use std::time::Duration;

use async_trait::async_trait;
use itertools::Itertools;
use reqwest::{
    Client, StatusCode,
    header::{COOKIE, HeaderMap, HeaderValue, REFERER, USER_AGENT},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

use crate::{
    RemoteError, Result,
    filters::{FieldPredicate, SearchFilters},
    geometry::BoundingBox,
    query::{Page, PageCursor, RemoteQuery, RemoteQueryClient, SpatialFilter},
    record::{RawRecord, RecordSchema},
};

const DEFAULT_BASE_URL: &str = "https://catastro.crimpr.net";
const DEFAULT_LAYER_PATH: &str = "/server/rest/services/Parcelario/Parcelas/MapServer/654/query";
const DEFAULT_PROXY_PATH: &str = "/proxy/proxy.ashx";
const DEFAULT_REFERER: &str = "https://catastro.crimpr.net/cdprpc/";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36";

/// Connection settings for [`ArcGisClient`].
#[derive(Debug, Clone)]
pub struct ArcGisConfig {
    pub base_url: String,
    pub layer_path: String,
    /// Set to `None` to query the layer directly instead of through the portal proxy
    pub proxy_path: Option<String>,
    /// Records requested per page; the service never returns more than the record cap in total
    pub page_size: usize,
    pub timeout: Duration,
    pub referer: String,
    pub user_agent: String,
    /// `Cookie` header of an already established session
    pub session_cookie: Option<String>,
}

impl Default for ArcGisConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            layer_path: DEFAULT_LAYER_PATH.to_string(),
            proxy_path: Some(DEFAULT_PROXY_PATH.to_string()),
            page_size: 100,
            timeout: Duration::from_secs(30),
            referer: DEFAULT_REFERER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            session_cookie: None,
        }
    }
}

impl ArcGisConfig {
    /// Full query URL, proxy-wrapped when a proxy path is configured.
    ///
    /// The trailing `?` on the proxied target is required by the proxy: request
    /// parameters are appended after it.
    #[must_use]
    pub fn query_url(&self) -> String {
        let target = format!("{}{}", self.base_url, self.layer_path);
        match &self.proxy_path {
            Some(proxy) => format!("{}{}?{}?", self.base_url, proxy, target),
            None => target,
        }
    }
}

/// Client for the cadastral parcel layer.
#[derive(Debug, Clone)]
pub struct ArcGisClient {
    http: Client,
    config: ArcGisConfig,
    schema: RecordSchema,
}

impl ArcGisClient {
    pub fn new(config: ArcGisConfig) -> Result<Self> {
        Self::with_schema(config, RecordSchema::default())
    }

    pub fn with_schema(config: ArcGisConfig, schema: RecordSchema) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, header_value(&config.referer)?);
        headers.insert(USER_AGENT, header_value(&config.user_agent)?);
        if let Some(cookie) = &config.session_cookie {
            headers.insert(COOKIE, header_value(cookie)?);
        }

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            config,
            schema,
        })
    }

    #[must_use]
    pub const fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Query-string parameters for one page.
    #[must_use]
    pub fn query_params(&self, query: &RemoteQuery<'_>) -> Vec<(&'static str, String)> {
        let offset = query.cursor.and_then(PageCursor::as_offset).unwrap_or(0);
        let mut params = vec![
            ("f", "json".to_string()),
            ("where", where_clause(query.filter, query.attributes, &self.schema)),
            ("returnGeometry", "false".to_string()),
            ("outFields", "*".to_string()),
            ("spatialRel", "esriSpatialRelIntersects".to_string()),
            ("resultOffset", offset.to_string()),
            ("resultRecordCount", self.config.page_size.to_string()),
        ];
        if let SpatialFilter::BoundingBox(bbox) = query.filter {
            params.push(("geometry", polygon_json(bbox)));
            params.push(("geometryType", "esriGeometryPolygon".to_string()));
            params.push(("inSR", "4326".to_string()));
        }
        params
    }

    fn parse_page(&self, response: QueryResponse, offset: usize) -> Result<Page> {
        if let Some(error) = response.error {
            return Err(service_error(error));
        }
        let Some(features) = response.features else {
            return Err(RemoteError::InvalidResponse(
                "response has neither 'features' nor 'error'".to_string(),
            ));
        };

        let received = features.len();
        let records = features
            .into_iter()
            .map(|f| RawRecord::from_attributes(f.attributes, &self.schema))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;

        let more = received > 0
            && (response.exceeded_transfer_limit || received >= self.config.page_size);
        let next = more.then(|| PageCursor::from_offset(offset + received));
        Ok(Page::new(records, next))
    }
}

#[async_trait]
impl RemoteQueryClient for ArcGisClient {
    #[instrument(name = "ArcGIS query", level = "debug", skip_all, fields(filter = %query.filter))]
    async fn query(&self, query: RemoteQuery<'_>) -> Result<Page> {
        let offset = query.cursor.and_then(PageCursor::as_offset).unwrap_or(0);
        let params = self.query_params(&query);

        let response = self
            .http
            .get(self.config.query_url())
            .query(&params)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, offset, "Query failed");
            return Err(status_error(status));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        let page = self.parse_page(body, offset)?;
        debug!(
            offset,
            records = page.records.len(),
            last = page.is_last(),
            "Page received"
        );
        Ok(page)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    features: Option<Vec<Feature>>,
    #[serde(default, rename = "exceededTransferLimit")]
    exceeded_transfer_limit: bool,
    error: Option<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    attributes: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    code: i64,
    #[serde(default)]
    message: String,
}

fn service_error(error: ServiceError) -> RemoteError {
    match error.code {
        498 | 499 => RemoteError::Unauthorized(error.message),
        429 => RemoteError::RateLimited,
        code => RemoteError::Service {
            code,
            message: error.message,
        },
    }
}

fn status_error(status: StatusCode) -> RemoteError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RemoteError::Unauthorized(status.to_string())
        }
        other => RemoteError::Status(other.as_u16()),
    }
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else if let Some(status) = error.status() {
        status_error(status)
    } else {
        RemoteError::Transport(error.to_string())
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| RemoteError::Transport(e.to_string()))
}

/// Closed WGS84 ring, clockwise from the south-west corner.
fn polygon_json(bbox: &BoundingBox) -> String {
    let (s, n, w, e) = (bbox.south(), bbox.north(), bbox.west(), bbox.east());
    json!({
        "rings": [[[w, s], [w, n], [e, n], [e, s], [w, s]]],
        "spatialReference": {"wkid": 4326}
    })
    .to_string()
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Case-insensitive text equality, matching how records are filtered locally.
fn text_equals(field: &str, value: &str) -> String {
    format!("UPPER({field}) = {}", quote(&value.trim().to_uppercase()))
}

/// SQL `where` clause for the selection plus any pushable attribute predicates.
///
/// Date predicates are never pushed down; the service stores sale dates as epoch
/// milliseconds and local filtering handles them.
fn where_clause(filter: &SpatialFilter, attributes: &SearchFilters, schema: &RecordSchema) -> String {
    let selection = match filter {
        SpatialFilter::BoundingBox(_) => None,
        SpatialFilter::Municipality(name) => Some(text_equals(&schema.municipality_field, name)),
        SpatialFilter::Identifier(id) => Some(format!(
            "LOWER({}) = {}",
            schema.id_field,
            quote(&id.to_lowercase())
        )),
    };

    let pushed = attributes
        .predicates(schema)
        .into_iter()
        .flat_map(|predicate| match predicate {
            FieldPredicate::NumberRange { field, range } => [
                range.min.map(|min| format!("{field} >= {min}")),
                range.max.map(|max| format!("{field} <= {max}")),
            ],
            FieldPredicate::Equals { field, value } => [Some(text_equals(&field, &value)), None],
            FieldPredicate::DateRange { .. } => [None, None],
        })
        .flatten();

    let clause = selection.into_iter().chain(pushed).join(" AND ");
    if clause.is_empty() {
        "1=1".to_string()
    } else {
        clause
    }
}
