//! Step sources.
//!
//! A [`Source`] yields the steps of one update lazily and exactly once. Sources
//! are built by a [`SourceFactory`] after the plugins the program needs have
//! been resolved.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use crate::error::{PlanError, Result};

use super::plugin::ProgramInfo;
use super::step::Step;

/// An event produced by a source.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// A step to execute.
    Step(Step),
    /// Late output registration for a resource that was already stepped.
    RegisterOutputs(Step),
}

/// A lazy, finite, non-restartable sequence of source events.
#[async_trait]
pub trait Source: Send {
    /// Returns the next event, or `None` once the plan is exhausted.
    async fn next(&mut self) -> Result<Option<SourceEvent>>;
}

/// Everything a factory needs to construct the source for one update.
#[derive(Debug, Clone)]
pub struct SourceRequest {
    /// The program being evaluated.
    pub program: ProgramInfo,
    /// Name of the target being updated.
    pub target: String,
    /// Versions for the providers the engine will bootstrap, by package.
    pub default_provider_versions: BTreeMap<String, Option<String>>,
    /// Analyzers to run during planning.
    pub analyzers: Vec<String>,
    /// Whether this is a preview.
    pub dry_run: bool,
}

/// Builds the source for an update.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    /// Creates a new source.
    async fn new_source(&self, request: SourceRequest) -> Result<Box<dyn Source>>;
}

/// Source over a precomputed list of events.
#[derive(Debug, Default)]
pub struct FixedSource {
    events: VecDeque<SourceEvent>,
}

impl FixedSource {
    /// Creates a source over the given events.
    #[must_use]
    pub fn new(events: Vec<SourceEvent>) -> Self {
        Self {
            events: events.into(),
        }
    }

    /// Creates a source over plain steps.
    #[must_use]
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self::new(steps.into_iter().map(SourceEvent::Step).collect())
    }

    /// Returns the number of events not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl Source for FixedSource {
    async fn next(&mut self) -> Result<Option<SourceEvent>> {
        Ok(self.events.pop_front())
    }
}

/// Factory handing out a precomputed event list, once.
#[derive(Debug, Default)]
pub struct PrecomputedSourceFactory {
    events: Mutex<Option<Vec<SourceEvent>>>,
}

impl PrecomputedSourceFactory {
    /// Creates a factory over the given events.
    #[must_use]
    pub const fn new(events: Vec<SourceEvent>) -> Self {
        Self {
            events: Mutex::new(Some(events)),
        }
    }

    /// Creates a factory over plain steps.
    #[must_use]
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self::new(steps.into_iter().map(SourceEvent::Step).collect())
    }
}

#[async_trait]
impl SourceFactory for PrecomputedSourceFactory {
    async fn new_source(&self, _request: SourceRequest) -> Result<Box<dyn Source>> {
        let events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| PlanError::source_failed("the plan has already been consumed"))?;
        Ok(Box::new(FixedSource::new(events)))
    }
}

impl SourceEvent {
    /// Returns the step the event is about.
    #[must_use]
    pub const fn step(&self) -> &Step {
        match self {
            Self::Step(step) | Self::RegisterOutputs(step) => step,
        }
    }
}
