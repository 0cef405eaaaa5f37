//! # Osmosis
//!
//! Middleware for exchanging incrementally-updatable data units between
//! distributed processes over a message bus.
//!
//! Processes publish **units**, key-value payloads plus named link
//! relations, into named **output buffers**. **Input buffers** elsewhere
//! mirror those units and deliver fine-grained change notifications as
//! the owner mutates them, until the owner irrevocably **commits** the
//! unit to mark its content final.
//!
//! ## Features
//!
//! - **Incremental updates**: field-level payload deltas and link deltas,
//!   batched replaces delivered as one coherent event
//! - **Revision fencing**: mirrors tolerate duplicated and reordered
//!   delivery; observers only ever see a monotonically-advancing view
//! - **Write arbitration**: non-owners route mutations through the owner,
//!   serializing concurrent writers without multi-writer races
//! - **Pluggable transport**: any at-least-once, per-publisher-FIFO
//!   pub/sub bus behind a small trait; an in-process bus is included
//!
//! ## Quick Start
//!
//! ```rust
//! use osmosis::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> osmosis::Result<()> {
//! let context = Context::new(Arc::new(LocalBus::new()));
//!
//! // Publishing side
//! let output = OutputBuffer::new("producer", context.clone())?;
//! let unit = Unit::new("utterance");
//! unit.set("text", "hello")?;
//! output.add(&unit)?;
//!
//! // Mirroring side (usually another process)
//! let input = InputBuffer::new("consumer", ["utterance"], context)?;
//! input.register_handler(EventMask::ALL, LocalityMask::ANY, |unit, event| {
//!     println!("{} now at revision {}", event.uid, unit.revision());
//! });
//!
//! unit.set("text", "hello world")?;
//! unit.commit()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod links;
pub mod payload;
pub mod transport;
pub mod uid;
pub mod unit;
pub mod wire;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::{InputBuffer, OutputBuffer};
    pub use crate::config::BufferConfig;
    pub use crate::context::Context;
    pub use crate::dispatch::HandlerId;
    pub use crate::error::{Error, Result};
    pub use crate::event::{EventKind, EventMask, Locality, LocalityMask, UnitEvent};
    pub use crate::transport::{LocalBus, Transport};
    pub use crate::uid::Uid;
    pub use crate::unit::{Message, RemoteUnit, Unit, UnitRead};
}

pub use buffer::{InputBuffer, OutputBuffer};
pub use config::BufferConfig;
pub use context::Context;
pub use dispatch::HandlerId;
pub use error::{Error, Result};
pub use event::{EventKind, EventMask, Locality, LocalityMask, UnitEvent};
pub use uid::Uid;
pub use unit::{Message, RemoteUnit, Unit, UnitRead};
