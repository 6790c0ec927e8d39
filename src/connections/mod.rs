//! # Connections
//!
//! The live plug↔slot links and the resolver that creates and removes them.
//!
//! ```text
//! request_auto_connect ─┐
//! connect_manual ───────┼─▶ BaseDeclarationEvaluator ─▶ lock both instances
//! disconnect ───────────┘                                 │
//!                                 ConnectionState (table) ◀┤
//!                                 ProfileRegenerator      ◀┘ (still locked)
//! ```

pub mod resolver;
pub mod state;

pub use resolver::{ConnectError, ConnectionResolver, SlotCandidate};
pub use state::{Connection, ConnectionState};
