use async_trait::async_trait;

use crate::ports::{AuditEntry, AuditSink, Result};

/// Emits each audit entry as a structured `tracing` event.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: &AuditEntry) -> Result<()> {
        tracing::info!(
            target: "partner_hub::audit",
            actor = %entry.actor_id,
            action = %entry.action,
            resource_type = entry.resource_type,
            resource_id = %entry.resource_id,
            before = ?entry.before,
            after = ?entry.after,
            at = %entry.at,
            "audit"
        );
        Ok(())
    }
}
