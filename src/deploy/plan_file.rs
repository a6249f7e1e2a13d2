//! YAML plan files.
//!
//! A plan file is a precomputed plan: the steps to run, in order, plus the
//! outcome the scripted provider should report for each of them. It lets an
//! update be replayed end to end without a planner or real providers.
//!
//! ```yaml
//! stack: dev
//! project: web
//! config:
//!   aws:region: eu-west-1
//! plugins:
//!   - name: aws
//!     kind: resource
//!     version: 5.2.0
//! steps:
//!   - op: create
//!     type: aws:s3:Bucket
//!     name: assets
//!   - op: delete
//!     type: aws:s3:Bucket
//!     name: legacy
//!     outcome:
//!       status: unknown
//!       error: "request timed out"
//! ```

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{EngineError, PlanError, Result};
use crate::resource::{PropertyMap, ResourceState, ResourceStatus, Urn};

use super::plugin::{PluginInfo, ProgramInfo};
use super::provider::{ApplyOutcome, ScriptedApplier};
use super::step::{Step, StepOp};

/// A parsed plan file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
    /// Stack (target) name.
    pub stack: String,
    /// Project name.
    pub project: String,
    /// Program entry point, relative to the plan file.
    #[serde(default)]
    pub program: Option<PathBuf>,
    /// Resolved target configuration.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Plugins the program requires.
    #[serde(default)]
    pub plugins: Vec<PluginInfo>,
    /// Steps in execution order.
    #[serde(default)]
    pub steps: Vec<PlannedStep>,
}

/// One step entry of a plan file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlannedStep {
    /// Operation. `replace` expands into create-replacement, replace and
    /// delete-replaced.
    pub op: StepOp,
    /// Resource type token.
    #[serde(rename = "type")]
    pub type_token: String,
    /// Resource name.
    pub name: String,
    /// Whether the resource is provider-backed.
    #[serde(default = "default_custom")]
    pub custom: bool,
    /// Provider-assigned identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// Desired inputs.
    #[serde(default)]
    pub inputs: PropertyMap,
    /// Outputs the provider reports.
    #[serde(default)]
    pub outputs: PropertyMap,
    /// Names of resources in this plan the step waits for.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Changed property keys.
    #[serde(default)]
    pub diffs: Vec<String>,
    /// Overrides whether the step counts toward change totals.
    #[serde(default)]
    pub logical: Option<bool>,
    /// Outcome the scripted provider reports.
    #[serde(default)]
    pub outcome: PlannedOutcome,
}

/// Scripted provider outcome of a planned step.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlannedOutcome {
    /// Status the provider reports.
    #[serde(default)]
    pub status: ResourceStatus,
    /// Error the provider reports, if any.
    #[serde(default)]
    pub error: Option<String>,
}

const fn default_custom() -> bool {
    true
}

impl PlanFile {
    /// Loads a plan file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading plan from: {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| PlanError::InvalidPlanFile {
            path: path.to_path_buf(),
            message: format!("Failed to read file: {e}"),
        })?;

        Self::parse(&content, path)
    }

    /// Parses a plan file from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let plan: Self = serde_yaml::from_str(content).map_err(|e| PlanError::InvalidPlanFile {
            path: path.to_path_buf(),
            message: format!("YAML parse error: {e}"),
        })?;

        debug!("Parsed plan with {} entries for {}/{}", plan.steps.len(), plan.project, plan.stack);
        Ok(plan)
    }

    /// Returns the URN of a resource in this plan.
    #[must_use]
    pub fn urn(&self, type_token: &str, name: &str) -> Urn {
        Urn::new(&self.stack, &self.project, type_token, name)
    }

    /// Returns the program this plan was computed for.
    #[must_use]
    pub fn program_info(&self, base_dir: &Path) -> ProgramInfo {
        ProgramInfo {
            project: self.project.clone(),
            pwd: base_dir.to_path_buf(),
            program: self.program.clone().unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    /// Builds the steps of this plan against the currently recorded resources.
    ///
    /// # Errors
    ///
    /// Returns an error if a step needs prior state that is not recorded, or
    /// depends on a resource the plan does not mention.
    pub fn steps(&self, current: &[ResourceState]) -> Result<Vec<Step>> {
        let recorded: HashMap<&Urn, &ResourceState> = current
            .iter()
            .filter(|r| !r.delete)
            .map(|r| (&r.urn, r))
            .collect();
        let mut urns_by_name: HashMap<&str, Urn> = HashMap::new();
        let mut steps = Vec::with_capacity(self.steps.len());

        for planned in &self.steps {
            let urn = self.urn(&planned.type_token, &planned.name);
            let dependencies = planned
                .depends_on
                .iter()
                .map(|name| {
                    urns_by_name.get(name.as_str()).cloned().ok_or_else(|| {
                        EngineError::from(PlanError::source_failed(format!(
                            "step '{}' depends on unknown resource '{name}'",
                            planned.name
                        )))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let old = recorded.get(&urn).map(|r| (*r).clone());
            let new = planned.state(urn.clone(), old.as_ref());

            for step in Self::expand(planned, &urn, old, new)? {
                let step = match planned.logical {
                    Some(logical) if step.op() == planned.op => step.with_logical(logical),
                    _ => step,
                };
                steps.push(step.with_dependencies(dependencies.clone()));
            }

            urns_by_name.insert(planned.name.as_str(), urn);
        }

        Ok(steps)
    }

    /// Expands one planned entry into the steps that carry it out.
    fn expand(
        planned: &PlannedStep,
        urn: &Urn,
        old: Option<ResourceState>,
        new: ResourceState,
    ) -> Result<Vec<Step>> {
        let require_old = |old: Option<ResourceState>| {
            old.ok_or_else(|| {
                EngineError::from(PlanError::MissingState {
                    urn: urn.clone(),
                    which: "old",
                })
            })
        };

        let steps = match planned.op {
            StepOp::Create => vec![Step::create(new)],
            StepOp::Read => vec![Step::read(old, new)],
            StepOp::Same => vec![Step::same(require_old(old)?, new)],
            StepOp::Update => vec![Step::update(require_old(old)?, new, planned.diffs.clone())],
            StepOp::Delete => vec![Step::delete(require_old(old)?)],
            StepOp::CreateReplacement => vec![Step::create_replacement(require_old(old)?, new)],
            StepOp::DeleteReplaced => vec![Step::delete_replaced(require_old(old)?)],
            StepOp::Replace => {
                let old = require_old(old)?;
                let mut replaced = old.clone();
                replaced.delete = true;
                vec![
                    Step::create_replacement(old.clone(), new.clone()),
                    Step::replace(old, new, planned.diffs.clone()),
                    Step::delete_replaced(replaced),
                ]
            }
        };

        Ok(steps)
    }

    /// Builds the scripted provider for this plan.
    #[must_use]
    pub fn applier(&self) -> ScriptedApplier {
        let mut applier = ScriptedApplier::new();
        for planned in &self.steps {
            let outcome = planned.outcome.to_apply_outcome();
            if outcome == ApplyOutcome::ok() {
                continue;
            }
            // The provider work of a replacement happens when the replacement is created.
            let op = match planned.op {
                StepOp::Replace => StepOp::CreateReplacement,
                op => op,
            };
            applier.set_outcome(self.urn(&planned.type_token, &planned.name), op, outcome);
        }
        applier
    }
}

impl PlannedStep {
    /// Builds the desired state, carrying the identifier and outputs over from
    /// the recorded state when the plan leaves them out.
    fn state(&self, urn: Urn, old: Option<&ResourceState>) -> ResourceState {
        let mut state = ResourceState::new(urn);
        state.type_token.clone_from(&self.type_token);
        state.custom = self.custom;
        state.inputs.clone_from(&self.inputs);
        state.outputs.clone_from(&self.outputs);
        state.id.clone_from(&self.id);

        if let Some(old) = old {
            if state.id.is_none() {
                state.id.clone_from(&old.id);
            }
            if state.outputs.is_empty() {
                state.outputs.clone_from(&old.outputs);
            }
            if state.inputs.is_empty() {
                state.inputs.clone_from(&old.inputs);
            }
        }

        state
    }
}

impl PlannedOutcome {
    /// Converts to the provider outcome.
    #[must_use]
    pub fn to_apply_outcome(&self) -> ApplyOutcome {
        match &self.error {
            Some(message) => ApplyOutcome::failed(self.status, message.clone()),
            None => ApplyOutcome {
                status: self.status,
                error: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r"
stack: dev
project: web
config:
  aws:region: eu-west-1
steps:
  - op: create
    type: aws:s3:Bucket
    name: assets
  - op: update
    type: aws:lambda:Function
    name: api
    depends_on: [assets]
    diffs: [memory]
  - op: delete
    type: aws:s3:Bucket
    name: legacy
    outcome:
      status: unknown
      error: request timed out
";

    fn recorded(plan: &PlanFile) -> Vec<ResourceState> {
        vec![
            ResourceState::new(plan.urn("aws:lambda:Function", "api")).with_id("fn-1"),
            ResourceState::new(plan.urn("aws:s3:Bucket", "legacy")).with_id("bucket-9"),
        ]
    }

    #[test]
    fn test_parse_and_build_steps() {
        let plan = PlanFile::parse(PLAN, Path::new("plan.yaml")).expect("parse");
        assert_eq!(plan.config.get("aws:region").map(String::as_str), Some("eu-west-1"));

        let steps = plan.steps(&recorded(&plan)).expect("steps");
        let ops: Vec<StepOp> = steps.iter().map(Step::op).collect();
        assert_eq!(ops, vec![StepOp::Create, StepOp::Update, StepOp::Delete]);

        let update = &steps[1];
        assert_eq!(update.dependencies(), &[plan.urn("aws:s3:Bucket", "assets")]);
        assert_eq!(update.diffs(), &[String::from("memory")]);
        assert_eq!(update.res().id.as_deref(), Some("fn-1"));
    }

    #[test]
    fn test_missing_old_state_is_an_error() {
        let plan = PlanFile::parse(PLAN, Path::new("plan.yaml")).expect("parse");
        let result = plan.steps(&[]);
        assert!(matches!(
            result,
            Err(EngineError::Plan(PlanError::MissingState { which: "old", .. }))
        ));
    }

    #[test]
    fn test_replace_expands_to_three_steps() {
        let yaml = r"
stack: dev
project: web
steps:
  - op: replace
    type: aws:s3:Bucket
    name: assets
    diffs: [region]
";
        let plan = PlanFile::parse(yaml, Path::new("plan.yaml")).expect("parse");
        let current = vec![ResourceState::new(plan.urn("aws:s3:Bucket", "assets"))];
        let steps = plan.steps(&current).expect("steps");

        let ops: Vec<StepOp> = steps.iter().map(Step::op).collect();
        assert_eq!(
            ops,
            vec![StepOp::CreateReplacement, StepOp::Replace, StepOp::DeleteReplaced]
        );
        let logical: Vec<bool> = steps.iter().map(Step::logical).collect();
        assert_eq!(logical, vec![false, true, false]);
        assert!(steps[2].res().delete);
    }

    #[tokio::test]
    async fn test_applier_replays_declared_outcomes() {
        use crate::deploy::StepApplier;

        let plan = PlanFile::parse(PLAN, Path::new("plan.yaml")).expect("parse");
        let steps = plan.steps(&recorded(&plan)).expect("steps");
        let applier = plan.applier();

        assert!(!applier.apply(&steps[0]).await.is_failure());
        let delete = applier.apply(&steps[2]).await;
        assert!(delete.is_failure());
        assert_eq!(delete.status, ResourceStatus::Unknown);
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let yaml = r"
stack: dev
project: web
steps:
  - op: create
    type: aws:s3:Bucket
    name: assets
    depends_on: [nowhere]
";
        let plan = PlanFile::parse(yaml, Path::new("plan.yaml")).expect("parse");
        assert!(plan.steps(&[]).is_err());
    }
}
