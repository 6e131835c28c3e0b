//! `/info/provider[/<prefix>]` and `/info/stream/<id>` routes.
//!
//! Grounded on `original_source/dss/web_handlers/info.py`'s
//! `InfoHandler`.

use std::sync::Arc;

use actix_web::{route, web, HttpResponse};
use serde_json::json;

use super::AppState;

#[route("/info/provider", method = "GET", method = "POST")]
pub async fn provider_list(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let list: Vec<_> = state
        .providers
        .iter()
        .map(|p| json!({ "name": p.identifier(), "id": p.identifier() }))
        .collect();
    HttpResponse::Ok().json(list)
}

#[route("/info/provider/{prefix}", method = "GET", method = "POST")]
pub async fn provider_detail(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> HttpResponse {
    let Some(provider) = state.providers.by_prefix(&path.into_inner()) else {
        return HttpResponse::NotFound().finish();
    };
    let data: Vec<_> = provider
        .streams()
        .iter()
        .filter_map(|id| provider.stream_data(id).ok())
        .collect();
    HttpResponse::Ok().json(data)
}

#[route("/info/stream/{id}", method = "GET", method = "POST")]
pub async fn stream_detail(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = path.into_inner();
    match state.providers.select(&id).and_then(|p| p.stream_data(&id)) {
        Ok(data) => HttpResponse::Ok().json(data),
        Err(_) => HttpResponse::NotFound().finish(),
    }
}
