//! Resource deletion endpoint

use crate::cluster::{ClusterError, ResourceKind};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use tracing::warn;

/// `/kubernetes/delete/{type}/{name}`, redirects to `/` on success
pub async fn delete_handler(
    State(state): State<SharedState>,
    Path(target): Path<String>,
) -> Response {
    let (kind, name) = target.split_once('/').unwrap_or((target.as_str(), ""));

    match state.resources.delete(kind, name).await {
        Ok(_) => Redirect::to("/").into_response(),
        Err(e) => {
            warn!(kind, name, error = %e, "Delete refused");
            (StatusCode::BAD_REQUEST, delete_error_message(kind, &e)).into_response()
        }
    }
}

/// `/kubernetes/delete` without a type
pub async fn missing_kind_handler() -> Response {
    (
        StatusCode::BAD_REQUEST,
        delete_error_message("", &ClusterError::MissingKind),
    )
        .into_response()
}

/// Body of the 400 reply for a refused delete
pub fn delete_error_message(kind: &str, err: &ClusterError) -> String {
    match err {
        ClusterError::MissingKind => "Missing resource type".to_string(),
        ClusterError::MissingName => "Missing resource name".to_string(),
        ClusterError::UnknownKind(_) => "Unknown resource".to_string(),
        ClusterError::Connect(_) => err.to_string(),
        other => {
            let kind = kind
                .parse::<ResourceKind>()
                .map(|k| k.as_str().to_string())
                .unwrap_or_else(|_| kind.to_string());
            format!("Failed deleting {} {}", kind, other)
        }
    }
}
