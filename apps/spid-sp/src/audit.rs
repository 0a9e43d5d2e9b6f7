//! Audit observer for SPID session events.

use spid_api_saml::{EventEnvelope, SpidEvent};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

/// Spawn a task that writes every login/logout event to the audit log.
pub fn start_audit_observer(mut receiver: broadcast::Receiver<EventEnvelope>) {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(envelope) => record(&envelope),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "audit", skipped, "Audit observer lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Audit observer stopped");
    });
}

fn record(envelope: &EventEnvelope) {
    match &envelope.event {
        SpidEvent::Login(login) => info!(
            target: "audit",
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            session_id = %login.session_id,
            idp_id = %login.idp_id,
            idp = %login.idp_entity_name,
            fiscal_code = login.user.fiscal_code().unwrap_or("-"),
            "SPID login"
        ),
        SpidEvent::Logout(logout) => info!(
            target: "audit",
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            session_id = %logout.session_id,
            idp_id = %logout.idp_id,
            idp = %logout.idp_entity_name,
            fiscal_code = logout.user.fiscal_code().unwrap_or("-"),
            "SPID logout"
        ),
    }
}
