//! gridplaned — the Gridplane agent daemon.
//!
//! Assembles the reconciliation engine with its surroundings:
//!
//! - `northbound`: file-backed desired-state source, polled for deltas
//! - `dataplane`: the opaque request/response boundary to the packet
//!   processor, plus an in-memory mock implementation
//! - `descriptors`: reference descriptors (interface, security
//!   association, security policy database with derived bindings, NAT
//!   address pool)

pub mod dataplane;
pub mod descriptors;
pub mod northbound;
