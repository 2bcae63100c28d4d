//! SSE dispatcher (spec §4.6, §6.4): a `text/event-stream` variant of the
//! HTTP dispatcher's invocation endpoints, nested under `/sse` so it can
//! share a router with the plain HTTP surface (spec §6.5 `--sse` flag).

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::{self, Stream};

use crate::error::BrokerError;
use crate::registry::Registry;
use crate::transport::{coerce_arguments, DEFAULT_CALL_DEADLINE};

type AppState = Arc<Registry>;

/// Build the `/sse/*` router. Merge with [`super::http::router`] to serve
/// both surfaces from one listener.
pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/sse/call/:server/:tool", get(invoke_sse))
        .route("/sse/tools/:server/:tool", get(invoke_sse))
        .with_state(registry)
}

/// One event per `content[]` fragment of the child's reply, terminated by
/// an explicit end-of-response sentinel event (spec §4.6).
async fn invoke_sse(
    State(registry): State<AppState>,
    Path((server, tool)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let arguments = coerce_arguments(&query);
    let events = build_events(&registry, &server, &tool, arguments, DEFAULT_CALL_DEADLINE).await;
    Sse::new(stream::iter(events)).keep_alive(KeepAlive::default())
}

async fn build_events(
    registry: &Registry,
    server: &str,
    tool: &str,
    arguments: serde_json::Value,
    deadline: Duration,
) -> Vec<Result<Event, Infallible>> {
    match registry.call_tool(server, tool, arguments, deadline).await {
        Ok(result) => {
            let mut events: Vec<Result<Event, Infallible>> = result
                .content
                .iter()
                .map(|fragment| Ok(Event::default().event("message").data(fragment.text.clone())))
                .collect();
            if let Some(trailer) = result.pages_left_trailer() {
                events.push(Ok(Event::default().event("message").data(trailer)));
            }
            events.push(Ok(Event::default().event("done").data("")));
            events
        }
        Err(e) => vec![Ok(sse_error_event(&e))],
    }
}

fn sse_error_event(err: &BrokerError) -> Event {
    Event::default().event("error").data(err.to_string())
}
