// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Halldyll Engine
//!
//! The step execution engine of an infrastructure deployment system.
//!
//! ## Overview
//!
//! Given a stream of planned [`deploy::Step`]s, the engine:
//!
//! - Reports each step as a structured [`engine::Event`]
//! - Opens a snapshot mutation, applies the step through a provider, and
//!   commits or discards the mutation
//! - Counts logical changes and flags updates that may have left the
//!   snapshot inconsistent
//! - Walks steps serially or with bounded parallelism, honoring
//!   dependencies and cancellation
//!
//! ## Architecture
//!
//! 1. **Source**: Produces steps in dependency order
//! 2. **Plan walker**: Dispatches steps and waits for prerequisites
//! 3. **Update actions**: Per-step reporting, checkpointing and counting
//! 4. **Snapshot manager**: Persists checkpoints between steps
//!
//! ## Modules
//!
//! - [`engine`]: Update orchestration, plan walking and events
//! - [`deploy`]: Steps, sources, plugins and the provider contract
//! - [`snapshot`]: Snapshot stores (local file, in memory)
//! - [`resource`]: Resource identities and recorded state
//! - [`config`]: Configuration parsing and validation
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack: dev
//! project: web
//! steps:
//!   - op: create
//!     type: aws:s3:Bucket
//!     name: assets
//!   - op: update
//!     type: aws:lambda:Function
//!     name: api
//!     depends_on: [assets]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod deploy;
pub mod engine;
pub mod error;
pub mod resource;
pub mod snapshot;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, EngineConfig};
pub use deploy::{PlanFile, Source, Step, StepApplier, StepOp};
pub use engine::{
    update, Context, Event, EventEmitter, PlanWalker, ResourceChanges, UpdateActions, UpdateInfo,
    UpdateOptions,
};
pub use error::{EngineError, Result, UpdateError};
pub use resource::{ResourceState, ResourceStatus, Urn};
pub use snapshot::{LocalSnapshotStore, MemorySnapshotStore, Snapshot, SnapshotManager};
