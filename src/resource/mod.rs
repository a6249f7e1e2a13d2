//! Resource model shared by steps, snapshots, and events.
//!
//! Resources are identified by a [`Urn`] that is unique within an update.
//! Their recorded state is a [`ResourceState`]; the outcome of a provider
//! call on one is a [`ResourceStatus`].

mod state;
mod urn;

pub use state::{PropertyMap, ResourceState, ResourceStatus};
pub use urn::{Urn, DEFAULT_PROVIDER_PREFIX, PROVIDER_TYPE_PREFIX};
