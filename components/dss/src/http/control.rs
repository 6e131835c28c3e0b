//! `/control/<id>/...` routes.
//!
//! Grounded on `original_source/dss/web_handlers/stream_control.py`'s
//! `StreamControlHandler`: one verb per path segment, same status code
//! conventions (404 unknown id, 403 not-yet-alive on `publish_start`).

use std::sync::Arc;

use actix_web::{route, web, HttpResponse};

use super::AppState;

#[route("/control/{id}/start", method = "GET", method = "POST")]
pub async fn start(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> HttpResponse {
    match state.registry.start(&path.into_inner(), 1, None).await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(_) => HttpResponse::NotFound().finish(),
    }
}

#[route("/control/{id}/stop", method = "GET", method = "POST")]
pub async fn stop(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> HttpResponse {
    match state.registry.stop(&path.into_inner()).await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(_) => HttpResponse::NotFound().finish(),
    }
}

#[route("/control/{id}/http", method = "GET", method = "POST")]
pub async fn http_keepalive_default(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> HttpResponse {
    http_keepalive_with(&state, &path.into_inner(), None).await
}

#[route("/control/{id}/http/{seconds}", method = "GET", method = "POST")]
pub async fn http_keepalive(
    state: web::Data<Arc<AppState>>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (id, seconds) = path.into_inner();
    http_keepalive_with(&state, &id, seconds.parse().ok()).await
}

async fn http_keepalive_with(
    state: &AppState,
    id: &str,
    requested: Option<u64>,
) -> HttpResponse {
    let cfg = &state.cfg.local;
    let timeout = requested
        .unwrap_or(cfg.http_client_timeout)
        .clamp(cfg.http_client_timeout_min, cfg.http_client_timeout_max);

    match state.registry.start(id, 0, Some(timeout)).await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(_) => HttpResponse::NotFound().finish(),
    }
}

#[route("/control/{id}/publish_start", method = "GET", method = "POST")]
pub async fn publish_start(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> HttpResponse {
    let supervisor = match state.registry.get_stream(&path.into_inner()).await {
        Ok(s) => s,
        Err(_) => return HttpResponse::NotFound().finish(),
    };
    if !supervisor.alive().await {
        return HttpResponse::Forbidden().finish();
    }
    supervisor.stats().warmup();
    HttpResponse::Ok().finish()
}

#[route("/control/{id}/publish_stop", method = "GET", method = "POST")]
pub async fn publish_stop(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> HttpResponse {
    let supervisor = match state.registry.get_stream(&path.into_inner()).await {
        Ok(s) => s,
        Err(_) => return HttpResponse::NotFound().finish(),
    };
    supervisor.stats().uptime();
    HttpResponse::Ok().finish()
}
