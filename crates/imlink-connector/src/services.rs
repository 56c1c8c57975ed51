//! Collaborator services the connector forwards transfer traffic to.
//!
//! Implementations are called from a session's read loop and must not block
//! it: anything slow has to be handed off internally.

use tracing::info;

use imlink_core::{AckMsg, ChatMsg, ImResult};

/// Chat delivery and acknowledgement towards connected clients.
pub trait MessagingService: Send + Sync {
    fn do_chat(&self, msg: ChatMsg) -> ImResult<()>;

    fn do_send_ack(&self, msg: AckMsg) -> ImResult<()>;
}

/// Presence bookkeeping for users attached to this connector.
pub trait PresenceService: Send + Sync {
    fn force_offline(&self, user_id: &str) -> ImResult<()>;
}

/// Services that only record what they receive in the log.
///
/// Used by the standalone binary when no client-facing tier is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingServices;

impl MessagingService for LoggingServices {
    fn do_chat(&self, msg: ChatMsg) -> ImResult<()> {
        info!(
            id = msg.id,
            from = %msg.from_id,
            dest = %msg.dest_id,
            bytes = msg.msg_body.len(),
            "chat from transfer"
        );
        Ok(())
    }

    fn do_send_ack(&self, msg: AckMsg) -> ImResult<()> {
        info!(
            id = msg.id,
            from = %msg.from_id,
            dest = %msg.dest_id,
            ack_msg_id = msg.ack_msg_id,
            "ack from transfer"
        );
        Ok(())
    }
}

impl PresenceService for LoggingServices {
    fn force_offline(&self, user_id: &str) -> ImResult<()> {
        info!(user_id, "force offline requested by transfer");
        Ok(())
    }
}
