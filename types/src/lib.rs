//! Core domain types for owner-thread call marshalling.
//!
//! Pure types with no IO and no threads: indices, identifiers, event names
//! and the error vocabulary shared by the engine, the config layer and callers.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod error;
mod ids;
mod name;

pub use error::{CallError, MarshalError, TargetError, TargetPanic};
pub use ids::{CallIndex, CallbackToken, ContextId};
pub use name::{DEFAULT_CALL_EVENT, EmptyNameError, EventName, StaticEventName};
