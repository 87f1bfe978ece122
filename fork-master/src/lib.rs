//! Master side of the fork protocol.
//!
//! [`ForkClient`] talks to one forked worker over any pair of async byte
//! streams: it pushes test classes on demand and collects the worker's
//! events in delivery order. Rendering and aggregating those events is
//! left to the caller.

mod client;
mod error;

pub use client::{ForkClient, ForkSummary};
pub use error::{MasterError, MasterResult};
