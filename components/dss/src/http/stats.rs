//! `/stats/<id_or_prefix>[/<csv-of-fields>]` route.
//!
//! Grounded on `original_source/dss/web_handlers/stream_stats.py`'s
//! `StreamStatsHandler`: field selection via a comma-separated suffix,
//! and the single-field unwrap that strips the enclosing object when
//! exactly one metric (other than `id`) was asked for.

use std::sync::Arc;

use actix_web::{route, web, HttpResponse};
use serde::Deserialize;
use serde_json::Value;

use super::AppState;
use crate::stats::Metric;

#[derive(Deserialize)]
pub struct StatsQuery {
    percent: Option<u8>,
}

impl StatsQuery {
    fn percent(&self) -> bool {
        self.percent.map_or(true, |p| p != 0)
    }
}

#[route("/stats/{id}", method = "GET", method = "POST")]
pub async fn stats(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    query: web::Query<StatsQuery>,
) -> HttpResponse {
    respond(&state, &path.into_inner(), None, query.percent()).await
}

#[route("/stats/{id}/{fields}", method = "GET", method = "POST")]
pub async fn stats_fields(
    state: web::Data<Arc<AppState>>,
    path: web::Path<(String, String)>,
    query: web::Query<StatsQuery>,
) -> HttpResponse {
    let (id, fields) = path.into_inner();
    respond(&state, &id, Some(fields), query.percent()).await
}

async fn respond(
    state: &AppState,
    id: &str,
    fields: Option<String>,
    percent: bool,
) -> HttpResponse {
    let mut data = Vec::new();
    let mut is_provider = false;

    match state.registry.get_stream(id).await {
        Ok(supervisor) => {
            data.push(metric_value(id, supervisor.stats().metric(percent)));
        }
        Err(_) => {
            let Some(provider) = state.providers.by_prefix(id) else {
                return HttpResponse::NotFound().finish();
            };
            is_provider = true;
            for stream_id in provider.streams() {
                let Ok(supervisor) = state.registry.get_stream(&stream_id).await
                else {
                    continue;
                };
                data.push(metric_value(
                    &stream_id,
                    supervisor.stats().metric(percent),
                ));
            }
        }
    }

    let requested: Vec<String> = fields
        .as_deref()
        .map(|f| f.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();

    if !requested.is_empty() {
        for field in &requested {
            if !data.iter().all(|d| d.get(field).is_some()) {
                return HttpResponse::NotFound().finish();
            }
        }
        let mut keep = requested.clone();
        keep.push("id".to_string());
        for item in &mut data {
            if let Value::Object(map) = item {
                map.retain(|k, _| keep.contains(k));
            }
        }
    }

    let body = if is_provider {
        Value::Array(data)
    } else {
        let mut single = data.into_iter().next().unwrap_or(Value::Null);
        if requested.len() == 1 {
            if requested[0] != "id" {
                if let Value::Object(map) = &mut single {
                    map.remove("id");
                }
            }
            single = single
                .as_object()
                .and_then(|m| m.values().next().cloned())
                .unwrap_or(Value::Null);
        }
        single
    };

    HttpResponse::Ok().json(body)
}

fn metric_value(id: &str, metric: Metric) -> Value {
    let mut value = serde_json::to_value(metric).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("id".to_string(), Value::String(id.to_string()));
    }
    value
}
