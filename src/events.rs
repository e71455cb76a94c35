//! Post-authentication event hooks.
//!
//! The engine notifies a sink after each successful authentication so
//! deployments can fan the event out to audit trails or notification
//! pipelines. Sinks are fire-and-forget by contract: a failing sink must
//! handle or log its own failure and never abort the login that triggered it.

use tracing::info;
use uuid::Uuid;

#[allow(async_fn_in_trait)]
pub trait LoginEventSink: Send + Sync {
    async fn login_succeeded(&self, account_id: Uuid);
}

impl<T: LoginEventSink + ?Sized> LoginEventSink for std::sync::Arc<T> {
    async fn login_succeeded(&self, account_id: Uuid) {
        (**self).login_succeeded(account_id).await;
    }
}

/// Sink that drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventSink;

impl LoginEventSink for NoopEventSink {
    async fn login_succeeded(&self, _account_id: Uuid) {}
}

/// Sink that records events on the tracing subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl LoginEventSink for TracingEventSink {
    async fn login_succeeded(&self, account_id: Uuid) {
        info!(%account_id, "login succeeded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sinks_accept_events() {
        let id = Uuid::new_v4();
        NoopEventSink.login_succeeded(id).await;
        TracingEventSink.login_succeeded(id).await;
    }
}
