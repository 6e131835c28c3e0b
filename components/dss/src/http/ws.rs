//! `/mobile/location` WebSocket endpoint.
//!
//! Grounded on `original_source/dss/web_handlers/mobile_stream.py`'s
//! `MobileStreamLocation`: on open, sends a snapshot of every active
//! mobile session's last known position, then streams subsequent
//! `mobile_location` broadcast messages verbatim.

use std::{sync::Arc, time::Duration};

use actix::{Actor, ActorContext, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use ephyr_log::log;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use super::AppState;
use crate::mobile;

const CHANNEL: &str = "mobile_location";

/// Server-initiated heartbeat interval; keeps idle connections (and any
/// intermediate proxy) from timing out the socket.
const PING_INTERVAL: Duration = Duration::from_secs(15);

struct LocationSocket {
    snapshot: Value,
    rx: Option<broadcast::Receiver<Value>>,
}

impl Actor for LocationSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        if let Ok(text) = serde_json::to_string(&self.snapshot) {
            ctx.text(text);
        }
        if let Some(rx) = self.rx.take() {
            ctx.add_stream(BroadcastStream::new(rx));
        }
        ctx.run_interval(PING_INTERVAL, |_, ctx| ctx.ping(b""));
    }
}

impl StreamHandler<Result<Value, BroadcastStreamRecvError>> for LocationSocket {
    fn handle(
        &mut self,
        item: Result<Value, BroadcastStreamRecvError>,
        ctx: &mut Self::Context,
    ) {
        let Ok(value) = item else {
            return;
        };
        if let Ok(text) = serde_json::to_string(&value) {
            ctx.text(text);
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LocationSocket {
    fn handle(
        &mut self,
        msg: Result<ws::Message, ws::ProtocolError>,
        ctx: &mut Self::Context,
    ) {
        match msg {
            Ok(ws::Message::Ping(bytes)) => ctx.pong(&bytes),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(_) => ctx.stop(),
            _ => {}
        }
    }
}

/// Upgrades the connection and subscribes it to the `mobile_location`
/// broadcast channel.
pub async fn location(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse, Error> {
    let Some(channel) = state.broadcasts.select(CHANNEL).await else {
        log::error!("Broadcast channel \"{}\" is not registered", CHANNEL);
        return Ok(HttpResponse::InternalServerError().finish());
    };

    let actor = LocationSocket {
        snapshot: snapshot_active_sessions(&state).await,
        rx: Some(channel.subscribe()),
    };
    ws::start(actor, &req, stream)
}

async fn snapshot_active_sessions(state: &AppState) -> Value {
    let streams: Vec<Value> = state
        .store
        .active_mobiles()
        .await
        .into_iter()
        .map(|record| {
            json!({
                "name": mobile::stream_name(&record.id),
                "position": record.position.last(),
            })
        })
        .collect();
    json!({ "request": "all", "content": streams })
}
