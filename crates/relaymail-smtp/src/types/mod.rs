//! Core SMTP types.

mod address;
mod extension;
mod reply;

pub use address::Address;
pub use extension::{AuthMethod, Extension};
pub use reply::{Reply, ReplyClass, ReplyCode};
