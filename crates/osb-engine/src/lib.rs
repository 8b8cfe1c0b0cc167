//! Core engines of the Open Sandbox control plane.
//!
//! This crate turns a Docker-compatible runtime into a programmable sandbox
//! resource: the lifecycle engine ([`engine::Engine`]) drives containers
//! through their state machine with auto-expiration timers, and the command
//! layer tracks asynchronous executions with ring-buffered output that
//! supports concurrent live followers. The [`backend::SandboxBackend`] trait
//! is the contract the HTTP surface consumes; the orchestrator's remote
//! client implements the same contract over worker HTTP.

pub mod backend;
pub mod commands;
pub mod engine;
pub mod error;
pub mod files;
pub mod names;
pub mod ring;
pub mod runtime;
pub mod timers;
pub mod types;

pub use backend::{LogStream, SandboxBackend};
pub use commands::{mint_command_id, CommandHub, LiveCommand, COMMAND_RETENTION};
pub use engine::{
    Engine, EngineConfig, InvalidateHook, DEFAULT_CPUS, DEFAULT_MEMORY_MB,
    DEFAULT_TIMEOUT_SECONDS, MAX_CPUS, MAX_MEMORY_MB,
};
pub use error::EngineError;
pub use ring::{RingBuffer, RingReader, DEFAULT_RING_CAPACITY};
pub use runtime::Runtime;
pub use timers::ExpirationTimers;
