//! Interpreter - Execute Effects using a Provider
//!
//! The Interpreter executes Effects contained in a Plan in order,
//! collecting the results. This is where side effects actually occur.

use crate::effect::Effect;
use crate::plan::Plan;
use crate::provider::{Provider, ProviderError, ProviderResult};
use crate::resource::State;

/// Result of executing each Effect
#[derive(Debug)]
pub enum EffectOutcome {
    /// Create succeeded
    Created { state: State },
    /// Update succeeded
    Updated { state: State },
    /// Delete and re-create succeeded
    Replaced { state: State },
    /// Delete succeeded
    Deleted,
    /// Skipped (e.g., dry-run)
    Skipped { reason: String },
}

impl EffectOutcome {
    /// Resulting state, for outcomes that leave a resource behind
    pub fn state(&self) -> Option<&State> {
        match self {
            EffectOutcome::Created { state }
            | EffectOutcome::Updated { state }
            | EffectOutcome::Replaced { state } => Some(state),
            EffectOutcome::Deleted | EffectOutcome::Skipped { .. } => None,
        }
    }
}

/// Result of executing the entire Plan
#[derive(Debug)]
pub struct ApplyResult {
    pub outcomes: Vec<Result<EffectOutcome, ProviderError>>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl ApplyResult {
    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }
}

/// Interpreter configuration
#[derive(Debug, Clone, Default)]
pub struct InterpreterConfig {
    /// If true, skip actual side effects
    pub dry_run: bool,
    /// Continue on error
    pub continue_on_error: bool,
}

/// Interpreter that executes Effects using a Provider
pub struct Interpreter<P: Provider> {
    provider: P,
    config: InterpreterConfig,
}

impl<P: Provider> Interpreter<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: InterpreterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    /// Execute a Plan, interpreting all Effects and causing side effects.
    ///
    /// Stops at the first failure unless `continue_on_error` is set.
    pub async fn apply(&self, plan: &Plan) -> ApplyResult {
        let mut result = ApplyResult {
            outcomes: Vec::with_capacity(plan.effects().len()),
            success_count: 0,
            failure_count: 0,
        };

        for effect in plan.effects() {
            let outcome = self.execute_effect(effect).await;
            let stop = match &outcome {
                Ok(_) => {
                    log::debug!("{} applied", effect.resource_id());
                    result.success_count += 1;
                    false
                }
                Err(e) => {
                    log::error!("{} failed: {}", effect.resource_id(), e);
                    result.failure_count += 1;
                    !self.config.continue_on_error
                }
            };

            result.outcomes.push(outcome);
            if stop {
                break;
            }
        }

        result
    }

    /// Execute a single Effect
    async fn execute_effect(&self, effect: &Effect) -> ProviderResult<EffectOutcome> {
        if self.config.dry_run {
            return Ok(EffectOutcome::Skipped {
                reason: "dry-run mode".to_string(),
            });
        }

        match effect {
            Effect::Create(resource) => {
                let state = self.provider.create(resource).await?;
                Ok(EffectOutcome::Created { state })
            }
            Effect::Update { id, from, to } => {
                let identifier = require_identifier(from)?;
                let state = self.provider.update(id, identifier, from, to).await?;
                Ok(EffectOutcome::Updated { state })
            }
            Effect::Replace { id, from, to } => {
                let identifier = require_identifier(from)?;
                self.provider.delete(id, identifier).await?;
                let state = self.provider.create(to).await?;
                Ok(EffectOutcome::Replaced { state })
            }
            Effect::Delete { id, identifier } => {
                self.provider.delete(id, identifier).await?;
                Ok(EffectOutcome::Deleted)
            }
        }
    }
}

fn require_identifier(state: &State) -> ProviderResult<&str> {
    state.identifier.as_deref().ok_or_else(|| {
        ProviderError::new("Existing resource has no identifier").for_resource(state.id.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::provider::{BoxFuture, ResourceType};
    use crate::resource::{Resource, ResourceId};

    #[derive(Default)]
    struct TestProvider {
        calls: Mutex<Vec<String>>,
    }

    impl TestProvider {
        fn record(&self, call: String) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
        }
    }

    impl Provider for TestProvider {
        fn name(&self) -> &'static str {
            "test"
        }

        fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
            vec![]
        }

        fn read(
            &self,
            id: &ResourceId,
            _identifier: Option<&str>,
        ) -> BoxFuture<'_, ProviderResult<State>> {
            let id = id.clone();
            Box::pin(async move { Ok(State::not_found(id)) })
        }

        fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            self.record(format!("create {}", resource.id));
            let state = State::existing(resource.id.clone(), resource.attributes.clone())
                .with_identifier("test-id");
            Box::pin(async move { Ok(state) })
        }

        fn update(
            &self,
            id: &ResourceId,
            identifier: &str,
            _from: &State,
            to: &Resource,
        ) -> BoxFuture<'_, ProviderResult<State>> {
            self.record(format!("update {} {}", id, identifier));
            let state = State::existing(id.clone(), to.attributes.clone());
            Box::pin(async move { Ok(state) })
        }

        fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
            self.record(format!("delete {} {}", id, identifier));
            Box::pin(async { Ok(()) })
        }
    }

    fn existing(identifier: Option<&str>) -> State {
        let state = State::existing(ResourceId::new("test", "example"), Default::default());
        match identifier {
            Some(identifier) => state.with_identifier(identifier),
            None => state,
        }
    }

    #[tokio::test]
    async fn apply_empty_plan() {
        let provider = TestProvider::default();
        let interpreter = Interpreter::new(&provider);
        let plan = Plan::new();
        let result = interpreter.apply(&plan).await;

        assert!(result.is_success());
        assert_eq!(result.success_count, 0);
    }

    #[tokio::test]
    async fn apply_create_effect() {
        let provider = TestProvider::default();
        let interpreter = Interpreter::new(&provider);
        let mut plan = Plan::new();
        plan.add(Effect::Create(Resource::new("test", "example")));

        let result = interpreter.apply(&plan).await;

        assert!(result.is_success());
        assert_eq!(result.success_count, 1);
        let state = result.outcomes[0].as_ref().unwrap().state().unwrap();
        assert_eq!(state.identifier.as_deref(), Some("test-id"));
    }

    #[tokio::test]
    async fn replace_deletes_then_creates() {
        let provider = TestProvider::default();
        let interpreter = Interpreter::new(&provider);
        let mut plan = Plan::new();
        plan.add(Effect::Replace {
            id: ResourceId::new("test", "example"),
            from: existing(Some("41")),
            to: Resource::new("test", "example"),
        });

        let result = interpreter.apply(&plan).await;

        assert!(result.is_success());
        let calls = provider.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "delete test.example 41".to_string(),
                "create test.example".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn update_without_identifier_fails_and_stops() {
        let provider = TestProvider::default();
        let interpreter = Interpreter::new(&provider);
        let mut plan = Plan::new();
        plan.add(Effect::Update {
            id: ResourceId::new("test", "example"),
            from: existing(None),
            to: Resource::new("test", "example"),
        });
        plan.add(Effect::Create(Resource::new("test", "other")));

        let result = interpreter.apply(&plan).await;

        assert!(!result.is_success());
        assert_eq!(result.outcomes.len(), 1);
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dry_run_skips_effects() {
        let provider = TestProvider::default();
        let config = InterpreterConfig {
            dry_run: true,
            ..Default::default()
        };
        let interpreter = Interpreter::new(&provider).with_config(config);
        let mut plan = Plan::new();
        plan.add(Effect::Create(Resource::new("test", "example")));

        let result = interpreter.apply(&plan).await;

        assert!(result.is_success());
        assert!(matches!(
            result.outcomes[0],
            Ok(EffectOutcome::Skipped { .. })
        ));
    }
}
