//! Event stream endpoint: SSE over the in-process event bus.

use std::convert::Infallible;

use axum::extract::{Extension, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::kernel::SchedulerEvent;
use crate::server::app::AppState;
use crate::server::auth::AuthContext;

fn allowed(event: &SchedulerEvent, ctx: &Option<AuthContext>) -> bool {
    match ctx {
        Some(c) if c.is_admin => true,
        Some(c) => event.domain().map_or(true, |domain| domain == c.domain),
        // Unauthenticated subscribers only see tenant-less events.
        None => event.domain().is_none(),
    }
}

/// GET /events/stream — lifecycle events filtered by domain unless admin.
pub async fn event_stream(
    State(state): State<AppState>,
    ctx: Option<Extension<AuthContext>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let ctx = ctx.map(|Extension(inner)| inner);
    let rx = state.events.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) => {
            if !allowed(&event, &ctx) {
                return None;
            }
            let data = serde_json::to_string(&event).ok()?;
            Some(Ok::<_, Infallible>(
                Event::default().event(event.kind.as_str()).data(data),
            ))
        }
        Err(BroadcastStreamRecvError::Lagged(_)) => {
            Some(Ok(Event::default().event("lagged").data("{}")))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::EventKind;
    use chrono::Utc;
    use serde_json::json;

    fn event(payload: serde_json::Value) -> SchedulerEvent {
        SchedulerEvent {
            kind: EventKind::JobEnqueued,
            payload,
            ts: Utc::now(),
        }
    }

    fn ctx(domain: &str, is_admin: bool) -> Option<AuthContext> {
        Some(AuthContext {
            domain: domain.to_string(),
            is_admin,
            token_hash: None,
        })
    }

    #[test]
    fn admin_sees_everything() {
        assert!(allowed(&event(json!({"domain": "other"})), &ctx("admin", true)));
    }

    #[test]
    fn tenant_sees_only_its_domain() {
        let e = event(json!({"domain": "team-a"}));
        assert!(allowed(&e, &ctx("team-a", false)));
        assert!(!allowed(&e, &ctx("team-b", false)));
    }

    #[test]
    fn anonymous_sees_only_domainless_events() {
        assert!(!allowed(&event(json!({"domain": "team-a"})), &None));
        assert!(allowed(&event(json!({"note": "global"})), &None));
    }
}
