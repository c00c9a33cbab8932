//! Handler registry for Switchboard.
//!
//! Handlers are pluggable modules that answer named methods. Each one
//! describes itself with a [`HandlerDescriptor`]: a name, a version, the
//! capability modules a client needs to call it, and the methods it serves.
//! The [`HandlerRegistry`] validates descriptors on the way in and answers
//! "who serves this method for this client?" on the way out.
//!
//! The registry is generic over the handler type so it stays free of any
//! runtime concerns; the broker plugs in its own handler with entry points.

mod descriptor;
mod error;
mod registry;

pub use descriptor::{Describe, HandlerDescriptor};
pub use error::RegistrationError;
pub use registry::HandlerRegistry;
