//! Dispatch table for inbound transfer traffic.
//!
//! The outer [`Dispatcher`] is keyed by message family ([`MessageClass`]);
//! internal messages are further routed by [`MsgType`] through an
//! [`InternalDispatcher`], which collapses into a single handler with
//! [`InternalDispatcher::into_dispatch_fn`] and is registered as the
//! internal branch of the outer table.

use std::collections::HashMap;

use imlink_core::{
    AckMsg, ChatMsg, ImError, ImResult, InternalMsg, MessageClass, MsgType, TransferMessage,
};

/// Boxed handler taking a message and the connection context.
pub type HandlerFn<M, C> = Box<dyn Fn(M, &C) -> ImResult<()> + Send + Sync>;

/// A concrete message type that can be pulled out of a [`TransferMessage`].
pub trait Routable: Sized {
    const CLASS: MessageClass;

    /// Unwrap the variant, handing the message back if it is another family.
    fn extract(msg: TransferMessage) -> Result<Self, TransferMessage>;
}

impl Routable for InternalMsg {
    const CLASS: MessageClass = MessageClass::Internal;

    fn extract(msg: TransferMessage) -> Result<Self, TransferMessage> {
        match msg {
            TransferMessage::Internal(m) => Ok(m),
            other => Err(other),
        }
    }
}

impl Routable for ChatMsg {
    const CLASS: MessageClass = MessageClass::Chat;

    fn extract(msg: TransferMessage) -> Result<Self, TransferMessage> {
        match msg {
            TransferMessage::Chat(m) => Ok(m),
            other => Err(other),
        }
    }
}

impl Routable for AckMsg {
    const CLASS: MessageClass = MessageClass::Ack;

    fn extract(msg: TransferMessage) -> Result<Self, TransferMessage> {
        match msg {
            TransferMessage::Ack(m) => Ok(m),
            other => Err(other),
        }
    }
}

/// Outer table: one handler per message family.
pub struct Dispatcher<C> {
    handlers: HashMap<MessageClass, HandlerFn<TransferMessage, C>>,
}

impl<C: 'static> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> Dispatcher<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for message type `M`.
    ///
    /// Registering a second handler for the same type is an error.
    pub fn register<M, F>(&mut self, handler: F) -> ImResult<()>
    where
        M: Routable + 'static,
        F: Fn(M, &C) -> ImResult<()> + Send + Sync + 'static,
    {
        if self.handlers.contains_key(&M::CLASS) {
            return Err(ImError::DuplicateHandler(M::CLASS.to_string()));
        }
        let routed: HandlerFn<TransferMessage, C> =
            Box::new(move |msg, ctx| match M::extract(msg) {
                Ok(m) => handler(m, ctx),
                Err(other) => Err(ImError::UnhandledMessage(format!(
                    "{} routed to {} handler",
                    other.class(),
                    M::CLASS
                ))),
            });
        self.handlers.insert(M::CLASS, routed);
        Ok(())
    }

    /// Run the handler registered for the message's family.
    pub fn dispatch(&self, msg: TransferMessage, ctx: &C) -> ImResult<()> {
        let class = msg.class();
        match self.handlers.get(&class) {
            Some(handler) => handler(msg, ctx),
            None => Err(ImError::UnhandledMessage(format!(
                "no handler for {class} (id {})",
                msg.id()
            ))),
        }
    }
}

/// Nested table for internal messages, keyed by message kind.
pub struct InternalDispatcher<C> {
    handlers: HashMap<MsgType, HandlerFn<InternalMsg, C>>,
}

impl<C: 'static> Default for InternalDispatcher<C> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<C: 'static> InternalDispatcher<C> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            handlers: HashMap::with_capacity(capacity),
        }
    }

    pub fn register<F>(&mut self, kind: MsgType, handler: F) -> ImResult<()>
    where
        F: Fn(InternalMsg, &C) -> ImResult<()> + Send + Sync + 'static,
    {
        if self.handlers.contains_key(&kind) {
            return Err(ImError::DuplicateHandler(format!("InternalMsg {kind}")));
        }
        self.handlers.insert(kind, Box::new(handler));
        Ok(())
    }

    pub fn dispatch(&self, msg: InternalMsg, ctx: &C) -> ImResult<()> {
        match self.handlers.get(&msg.msg_type) {
            Some(handler) => handler(msg, ctx),
            None => Err(ImError::UnhandledMessage(format!(
                "no handler for InternalMsg {} (id {})",
                msg.msg_type, msg.id
            ))),
        }
    }

    /// Collapse the table into one handler usable as an outer-table entry.
    pub fn into_dispatch_fn(self) -> impl Fn(InternalMsg, &C) -> ImResult<()> + Send + Sync + 'static {
        move |msg, ctx| self.dispatch(msg, ctx)
    }
}
