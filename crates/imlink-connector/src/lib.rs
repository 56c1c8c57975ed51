//! imlink-connector: the connector side of the transfer link.
//!
//! A connector keeps long-lived connections to one or more transfer nodes.
//! Each connection is driven by a [`session::TransferSession`] that greets the
//! transfer, validates and dispatches inbound traffic, and writes queued
//! outbound messages. The [`Connector`] ties sessions to the shared state:
//! the registry of live links and the user-status-sync exchange slot.

pub mod config;
pub mod connector;
pub mod correlator;
pub mod dispatch;
pub mod registry;
pub mod services;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::{CliOverrides, ConnectorConfig};
pub use connector::{Connector, ConnectorServices, ConnectorSettings, SessionHandle};
pub use correlator::{PendingExchange, ResponseCollector};
pub use dispatch::{Dispatcher, InternalDispatcher, Routable};
pub use registry::{ConnectionRegistry, TransferLink};
pub use services::{LoggingServices, MessagingService, PresenceService};
pub use session::{SessionContext, SessionStats, TransferSession};

pub use imlink_core::{ImError, ImResult};
