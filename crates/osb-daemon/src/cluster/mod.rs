//! Distributed execution layer: the worker registry and the remote client
//! that forwards engine operations to the owning worker over HTTP.

pub mod registry;
pub mod remote;
