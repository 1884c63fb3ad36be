//! HTTP request handlers

use axum::{
    body::Bytes,
    extract::{OriginalUri, Path, Query, State},
    http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;

use super::identity::{rbac_device_groups, Identity};
use super::AppState;
use crate::error::{AppError, Result};
use crate::models::filters::{DEFAULT_PAGE, DEFAULT_PER_PAGE};
use crate::models::{AggregateParams, SearchParams};

const HDR_TOTAL_COUNT: &str = "x-total-count";

/// Liveness probe
pub async fn alive() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Readiness probe verifying that all dependencies are reachable
pub async fn health(State(state): State<AppState>) -> Result<StatusCode> {
    state.reporting.health().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Management search: tenant from the JWT claims, group scope from the
/// RBAC header.
pub async fn search(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let mut params = parse_search_params(&body)?;
    params.tenant_id = identity.tenant;
    params.groups = rbac_device_groups(&headers);
    search_response(&state, params, &uri).await
}

/// Internal search: tenant from the path, no identity
pub async fn internal_search(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<Response> {
    let mut params = parse_search_params(&body)?;
    params.tenant_id = tenant_id;
    search_response(&state, params, &uri).await
}

async fn search_response(state: &AppState, params: SearchParams, uri: &Uri) -> Result<Response> {
    let page = params.page;
    let per_page = params.per_page;
    let (devices, total) = state.reporting.search(params).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(HDR_TOTAL_COUNT),
        header_value(total.to_string())?,
    );
    headers.insert(
        axum::http::header::LINK,
        header_value(page_link_header(uri, page, per_page, total))?,
    );
    Ok((headers, Json(devices)).into_response())
}

/// List attributes discovered in the index
pub async fn searchable_attributes(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Response> {
    let attrs = state
        .reporting
        .searchable_attributes(&identity.tenant)
        .await?;
    Ok(Json(attrs).into_response())
}

/// List the tenant's mapped inventory attributes
pub async fn mapped_attributes(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Response> {
    let attrs = state.reporting.mapped_attributes(&identity.tenant).await?;
    Ok(Json(attrs).into_response())
}

/// Aggregate devices over attribute terms
pub async fn aggregate(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let mut params: AggregateParams = serde_json::from_slice(&body)
        .map_err(|err| AppError::Validation(format!("malformed request body: {err}")))?;
    params
        .validate()
        .map_err(|err| AppError::Validation(err.to_string()))?;
    params.tenant_id = identity.tenant;
    params.groups = rbac_device_groups(&headers);

    let aggregations = state.reporting.aggregate(params).await?;
    Ok(Json(aggregations).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ReindexQuery {
    #[serde(default)]
    pub service: String,
}

/// Request a reindex of a single device
pub async fn reindex(
    State(state): State<AppState>,
    Path((tenant_id, device_id)): Path<(String, String)>,
    Query(query): Query<ReindexQuery>,
) -> Result<StatusCode> {
    state
        .reporting
        .reindex(&tenant_id, &device_id, &query.service)?;
    Ok(StatusCode::ACCEPTED)
}

fn parse_search_params(body: &Bytes) -> Result<SearchParams> {
    let mut params: SearchParams = serde_json::from_slice(body)
        .map_err(|err| AppError::Validation(format!("malformed request body: {err}")))?;
    if params.page < 1 {
        params.page = DEFAULT_PAGE;
    }
    if params.per_page < 1 {
        params.per_page = DEFAULT_PER_PAGE;
    }
    params
        .validate()
        .map_err(|err| AppError::Validation(err.to_string()))?;
    Ok(params)
}

fn header_value(value: String) -> Result<HeaderValue> {
    HeaderValue::from_str(&value)
        .map_err(|err| AppError::Internal(format!("invalid header value: {err}")))
}

/// RFC 5988 pagination links echoing the original query string
fn page_link_header(uri: &Uri, page: u64, per_page: u64, total: u64) -> String {
    let path = uri.path();
    let mut pairs: Vec<(String, String)> = uri
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect();
    set_query_param(&mut pairs, "per_page", per_page.to_string());

    set_query_param(&mut pairs, "page", "1".to_string());
    let mut link = format!(r#"<{}>;rel="first""#, render_url(path, &pairs));

    if page > 1 {
        set_query_param(&mut pairs, "page", (page - 1).to_string());
        link = format!(r#"{}, <{}>;rel="previous""#, link, render_url(path, &pairs));
    }

    if total > per_page * page - 1 {
        set_query_param(&mut pairs, "page", (page + 1).to_string());
        link = format!(r#"{}, <{}>;rel="next""#, link, render_url(path, &pairs));
    }
    link
}

fn set_query_param(pairs: &mut Vec<(String, String)>, key: &str, value: String) {
    if let Some(pair) = pairs.iter_mut().find(|(k, _)| k == key) {
        pair.1 = value;
    } else {
        pairs.push((key.to_string(), value));
    }
}

fn render_url(path: &str, pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return path.to_string();
    }
    let query: Vec<String> = pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    format!("{}?{}", path, query.join("&"))
}
