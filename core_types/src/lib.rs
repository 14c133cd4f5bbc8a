//! # Core Types
//!
//! This crate defines the fundamental types used throughout Weft.
//!
//! ## Philosophy
//!
//! Core types are designed with these principles:
//! - **Explicit over implicit**: Contexts, tasks, clusters, and processors
//!   are identified by distinct types that cannot be confused.
//! - **Type safety first**: The type system prevents misuse at compile time.
//! - **No runtime logic**: This crate holds identity and value types only;
//!   all scheduling behavior lives in the `kernel` crate.
//!
//! ## Key Types
//!
//! - [`ContextId`]: Unique identifier for an execution context (coroutine or task)
//! - [`ClusterId`]: Unique identifier for a scheduling domain
//! - [`ProcessorId`]: Identifier for a kernel execution engine
//! - [`Priority`]: Scheduling priority with total ordering

pub mod ids;
pub mod priority;

pub use ids::{ClusterId, ContextId, ProcessorId};
pub use priority::Priority;
