use tempra_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Forwards audit events to the process log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let session_id = event.session_id.as_ref().map(|id| id.as_str().to_owned()).unwrap_or_default();
        let metadata = format!("{:?}", event.metadata);
        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                session_id = %session_id,
                category = ?event.category,
                metadata = %metadata,
                "audit"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                session_id = %session_id,
                category = ?event.category,
                outcome = ?event.outcome,
                metadata = %metadata,
                "audit"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempra_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};

    use super::TracingAuditSink;

    #[test]
    fn emitting_without_a_subscriber_is_harmless() {
        let context = AuditContext::new(None, None, "req-1", "test");
        TracingAuditSink.emit(context.event("router.transition_applied", AuditCategory::Routing, AuditOutcome::Success));
        TracingAuditSink.emit(context.event("commit.failed", AuditCategory::Commit, AuditOutcome::Failed));
    }
}
