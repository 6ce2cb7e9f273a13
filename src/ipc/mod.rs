//! Ports, sessions, and command-buffer translation.
//!
//! A Mach-style port with client/server halves and a request/reply
//! rendezvous, plus the session layer the guest ABI interposes between a
//! port and a message: `Connect`/`AcceptSession` produce a session pair,
//! and all subsequent traffic flows over the session, not the port. The
//! command-buffer translator handles the cross-address-space handle and
//! buffer descriptors that travel inside a message.

pub mod port;
pub mod session;
pub mod translation;
