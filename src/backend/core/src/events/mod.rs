//! Versioned events and their wire envelope.
//!
//! - **`event`**: the `Event` trait, `EventBase` and `EntityId`.
//! - **`envelope`**: the `{type_name, bytes}` wrapper and the `EventTypeRegistry`
//!   that turns envelope bytes back into typed events.

pub mod envelope;
pub mod event;

pub use envelope::*;
pub use event::*;
