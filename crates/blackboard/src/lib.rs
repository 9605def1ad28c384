// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # BlackBoard - typed shared interfaces for robot components
//!
//! Components running on independent threads exchange state and commands
//! through named, schema-typed *interfaces*. Each interface pairs a record
//! (one writer, many readers) with an inbound queue of command messages.
//! A network client carries the same message abstraction to remote peers.
//!
//! ## Quick Start
//!
//! ```rust
//! use blackboard::interfaces::{SwitchInterface, SwitchMessage};
//! use blackboard::{BlackBoard, Message, Result};
//!
//! fn main() -> Result<()> {
//!     let bb = BlackBoard::new();
//!     let mut writer = bb.open_for_writing::<SwitchInterface>("Power", "driver")?;
//!     let mut reader = bb.open_for_reading::<SwitchInterface>("Power", "ui")?;
//!
//!     // Reader sends a command
//!     reader.msgq_enqueue(&Message::new(SwitchMessage::EnableSwitch))?;
//!
//!     // Writer processes it and publishes the new state
//!     while let Some(msg) = writer.msgq_pop()? {
//!         writer.data_mut().apply(msg.payload());
//!     }
//!     writer.write()?;
//!
//!     reader.read()?;
//!     assert!(reader.data().enabled);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                          Components                                 |
//! |      open_for_reading / open_for_writing -> Interface<S> handles    |
//! +---------------------------------------------------------------------+
//! |                          BlackBoard                                 |
//! |   (type, id) directory | writer/reader bookkeeping | observers      |
//! +---------------------------------------------------------------------+
//! |                    Interface storage                                |
//! |   versioned record (RwLock) | MessageQueue | change notifier        |
//! +---------------------------------------------------------------------+
//! |                         netcomm                                     |
//! |   NetworkClient | frame codec | component-routed handlers           |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`BlackBoard`] | Registry of open interfaces, factory for handles |
//! | [`Interface`] | Reader or writer handle to one interface instance |
//! | [`Schema`] | Field layout, record type and accepted messages of an interface type |
//! | [`MessageQueue`] | FIFO of [`Message`]s with an explicit lock/iterate protocol |
//! | [`netcomm::NetworkClient`] | Stream session routing messages by component id |
//!
//! ## Modules Overview
//!
//! - [`registry`] - interface directory and introspection
//! - [`interface`] - handles and schema description
//! - [`message_queue`] - queue and its lock guard
//! - [`netcomm`] - network client
//! - [`config`] - runtime configuration and environment overrides
//! - [`interfaces`] - bundled interface types

pub mod config;
pub mod error;
pub mod interface;
pub mod interfaces;
pub mod message;
pub mod message_queue;
pub mod netcomm;
pub mod notifier;
pub mod registry;
pub mod util;

pub use config::{BlackBoardConfig, ClientConfig};
pub use error::{Error, Result};
pub use interface::{
    AnyInterface, FieldInfo, FieldType, FieldValue, Interface, InterfaceMessage, NoMessage,
    OpenMode, Schema, SchemaHash,
};
pub use message::Message;
pub use message_queue::{Cursor, MessageQueue, MessageQueueGuard};
pub use notifier::ChangeNotifier;
pub use registry::{BlackBoard, InterfaceInfo, RegistryObserver};
