//! Shared fixtures for unit tests.

use std::sync::Arc;
use tokio::sync::mpsc;

use imlink_core::messages::{now_millis, ChatType, DestType};
use imlink_core::{
    AckMsg, ChatMsg, ImResult, InternalMsg, Module, MsgType,
    RandomTokenGenerator, SnowflakeIdGenerator, PROTOCOL_VERSION,
};

use crate::connector::{Connector, ConnectorServices, ConnectorSettings};
use crate::services::{MessagingService, PresenceService};

/// Services that report every call as a short string on a channel.
pub(crate) struct RecordingServices {
    events: mpsc::UnboundedSender<String>,
}

impl MessagingService for RecordingServices {
    fn do_chat(&self, msg: ChatMsg) -> ImResult<()> {
        let _ = self.events.send(format!("chat:{}", msg.id));
        Ok(())
    }

    fn do_send_ack(&self, msg: AckMsg) -> ImResult<()> {
        let _ = self.events.send(format!("ack:{}", msg.ack_msg_id));
        Ok(())
    }
}

impl PresenceService for RecordingServices {
    fn force_offline(&self, user_id: &str) -> ImResult<()> {
        let _ = self.events.send(format!("offline:{user_id}"));
        Ok(())
    }
}

pub(crate) fn test_connector(
    settings: ConnectorSettings,
) -> (Arc<Connector>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let recorder = Arc::new(RecordingServices { events: tx });
    let services = ConnectorServices {
        messaging: recorder.clone(),
        presence: recorder,
        ids: Arc::new(SnowflakeIdGenerator::new(1, 1).unwrap()),
        tokens: Arc::new(RandomTokenGenerator),
    };
    (Connector::new(services, settings).unwrap(), rx)
}

pub(crate) fn internal(kind: MsgType, body: &str, from: Module, dest: Module) -> InternalMsg {
    InternalMsg::new(1000, kind, body, from, dest)
}

pub(crate) fn chat(id: u64) -> ChatMsg {
    ChatMsg {
        id,
        version: PROTOCOL_VERSION,
        from_id: "alice".into(),
        dest_id: "bob".into(),
        create_time: now_millis(),
        msg_type: ChatType::Text,
        dest_type: DestType::Single,
        token: String::new(),
        msg_body: b"hello".to_vec(),
    }
}
