//! Query Routes
//!
//! - GET /api/v1/series?match=&start=&end= - Series with their chunks
//! - GET /api/v1/label/:name/values?match=&start=&end= - Values of one label
//! - GET /api/v1/labels?match=&start=&end= - Label names
//! - GET /api/v1/info - Store bounds and external label sets
//!
//! Each request gets its own cancellation token. Dropping the handler future
//! (client disconnect) cancels the query.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::{LabelsResponse, SelectorParams, SeriesDto, SeriesResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::selector::parse_selector;
use crate::store::{
    LabelNamesRequest, LabelValuesRequest, Matcher, SeriesRequest, StoreInfo,
};

/// Parse the selector and time range shared by all query endpoints
fn parse_params(params: &SelectorParams) -> ApiResult<(i64, i64, Vec<Matcher>)> {
    let (start, end) = params.time_range();
    if start > end {
        return Err(ApiError::Validation(format!(
            "start ({}) must not be after end ({})",
            start, end
        )));
    }

    let matchers = match &params.selector {
        Some(selector) => parse_selector(selector)?,
        None => Vec::new(),
    };
    Ok((start, end, matchers))
}

/// GET /api/v1/series
pub async fn series(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SelectorParams>,
) -> ApiResult<Json<SeriesResponse>> {
    let (min_time, max_time, matchers) = parse_params(&params)?;
    let (cancel, _guard) = state.request_token();

    let series = state
        .executor
        .series(
            SeriesRequest {
                min_time,
                max_time,
                matchers,
            },
            &cancel,
        )
        .collect_all()
        .await?;

    tracing::debug!(series = series.len(), "Series query served");

    Ok(Json(SeriesResponse {
        status: "success".to_string(),
        data: series.into_iter().map(SeriesDto::from).collect(),
    }))
}

/// GET /api/v1/label/:name/values
pub async fn label_values(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<SelectorParams>,
) -> ApiResult<Json<LabelsResponse>> {
    if name.is_empty() {
        return Err(ApiError::Validation("label name cannot be empty".to_string()));
    }
    let (min_time, max_time, matchers) = parse_params(&params)?;
    let (cancel, _guard) = state.request_token();

    let values = state
        .executor
        .label_values(
            LabelValuesRequest {
                label: name,
                min_time,
                max_time,
                matchers,
            },
            &cancel,
        )
        .await?;

    Ok(Json(LabelsResponse {
        status: "success".to_string(),
        data: values,
    }))
}

/// GET /api/v1/labels
pub async fn label_names(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SelectorParams>,
) -> ApiResult<Json<LabelsResponse>> {
    let (min_time, max_time, matchers) = parse_params(&params)?;
    let (cancel, _guard) = state.request_token();

    let names = state
        .executor
        .label_names(
            LabelNamesRequest {
                min_time,
                max_time,
                matchers,
            },
            &cancel,
        )
        .await?;

    Ok(Json(LabelsResponse {
        status: "success".to_string(),
        data: names,
    }))
}

/// GET /api/v1/info
pub async fn info(State(state): State<Arc<AppState>>) -> ApiResult<Json<StoreInfo>> {
    Ok(Json(state.executor.info()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::StoreError;

    #[test]
    fn test_parse_params_rejects_inverted_range() {
        let params = SelectorParams {
            selector: None,
            start: Some(10),
            end: Some(5),
        };
        assert!(matches!(parse_params(&params), Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_parse_params_selector() {
        let params = SelectorParams {
            selector: Some(r#"{a="1"}"#.to_string()),
            start: None,
            end: Some(100),
        };
        let (start, end, matchers) = parse_params(&params).unwrap();
        assert_eq!((start, end), (i64::MIN, 100));
        assert_eq!(matchers.len(), 1);

        let params = SelectorParams {
            selector: Some("{a=1}".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            parse_params(&params),
            Err(ApiError::Store(StoreError::InvalidSelector(_)))
        ));
    }
}
