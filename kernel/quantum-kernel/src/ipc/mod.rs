//! Inter-process communication: named ports with bounded message queues.
//!
//! [`port`] holds the registry and queue logic (pure, host-testable);
//! [`blocking`] wraps it with the park/wake scheduling glue behind the
//! Send/Receive syscalls.

pub mod port;

#[cfg(target_os = "none")]
pub mod blocking;

pub use port::{Attachment, PortTable, ReceivedMessage, with_ports};
