//! Rule pipeline: PreLoadConditions, PreConditions and BusinessRules.
//!
//! Rules run in ascending `priority` order (default `f64::INFINITY`, ties keep
//! registration order). A rule is either a synchronous closure (see the `new`
//! constructors) or any type implementing the matching async check trait
//! (see [`Rule::from_check`]).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use event_store::EventEnvelope;
use serde_json::Value;

use crate::command::Command;
use crate::error::{DomainError, Result};

/// Why a rule rejected a command.
///
/// Without a message the rule's description is reported instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleRejection {
    pub message: Option<String>,
    pub more: Option<Value>,
}

impl RuleRejection {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            more: None,
        }
    }

    /// A rejection that reports the rule description.
    pub fn unexplained() -> Self {
        Self::default()
    }

    pub fn with_more(mut self, more: Value) -> Self {
        self.more = Some(more);
        self
    }
}

impl From<&str> for RuleRejection {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for RuleRejection {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

pub type RuleResult = std::result::Result<(), RuleRejection>;

/// Check run before the aggregate is loaded. Sees only the command.
#[async_trait]
pub trait PreLoadCheck: Send + Sync {
    async fn check(&self, command: &Command) -> RuleResult;
}

/// Check run after load, before the command handler. Sees the aggregate data.
#[async_trait]
pub trait PreConditionCheck: Send + Sync {
    async fn check(&self, command: &Command, aggregate: &Value) -> RuleResult;
}

/// Check run after the command handler applied its events.
#[async_trait]
pub trait BusinessRuleCheck: Send + Sync {
    async fn check(
        &self,
        changed: &Value,
        previous: &Value,
        events: &[EventEnvelope],
        command: &Command,
    ) -> RuleResult;
}

/// A named, prioritised check.
pub struct Rule<C: ?Sized> {
    pub name: String,
    pub description: Option<String>,
    pub priority: f64,
    /// Command names the rule applies to; empty means every command.
    pub commands: Vec<String>,
    check: Arc<C>,
}

pub type PreLoadCondition = Rule<dyn PreLoadCheck>;
pub type PreCondition = Rule<dyn PreConditionCheck>;
pub type BusinessRule = Rule<dyn BusinessRuleCheck>;

impl<C: ?Sized> Rule<C> {
    fn with_check(name: impl Into<String>, check: Arc<C>) -> Self {
        Self {
            name: name.into(),
            description: None,
            priority: f64::INFINITY,
            commands: Vec::new(),
            check,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Lower priorities run first.
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Restricts the rule to the given command names.
    pub fn for_commands<I, T>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.commands = commands.into_iter().map(Into::into).collect();
        self
    }

    pub fn applies_to(&self, command: &str) -> bool {
        self.commands.is_empty() || self.commands.iter().any(|c| c == command)
    }

    fn reject(&self, rejection: RuleRejection) -> DomainError {
        let message = rejection
            .message
            .or_else(|| self.description.clone())
            .unwrap_or_else(|| format!("rule '{}' rejected the command", self.name));

        DomainError::BusinessRule {
            message,
            rule: Some(self.name.clone()),
            more: rejection.more,
        }
    }
}

impl<C: ?Sized> fmt::Debug for Rule<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("priority", &self.priority)
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

struct SyncCheck<F>(F);

#[async_trait]
impl<F> PreLoadCheck for SyncCheck<F>
where
    F: Fn(&Command) -> RuleResult + Send + Sync,
{
    async fn check(&self, command: &Command) -> RuleResult {
        (self.0)(command)
    }
}

#[async_trait]
impl<F> PreConditionCheck for SyncCheck<F>
where
    F: Fn(&Command, &Value) -> RuleResult + Send + Sync,
{
    async fn check(&self, command: &Command, aggregate: &Value) -> RuleResult {
        (self.0)(command, aggregate)
    }
}

#[async_trait]
impl<F> BusinessRuleCheck for SyncCheck<F>
where
    F: Fn(&Value, &Value, &[EventEnvelope], &Command) -> RuleResult + Send + Sync,
{
    async fn check(
        &self,
        changed: &Value,
        previous: &Value,
        events: &[EventEnvelope],
        command: &Command,
    ) -> RuleResult {
        (self.0)(changed, previous, events, command)
    }
}

impl PreLoadCondition {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Command) -> RuleResult + Send + Sync + 'static,
    {
        Self::with_check(name, Arc::new(SyncCheck(check)))
    }

    pub fn from_check(name: impl Into<String>, check: impl PreLoadCheck + 'static) -> Self {
        Self::with_check(name, Arc::new(check))
    }
}

impl PreCondition {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Command, &Value) -> RuleResult + Send + Sync + 'static,
    {
        Self::with_check(name, Arc::new(SyncCheck(check)))
    }

    pub fn from_check(name: impl Into<String>, check: impl PreConditionCheck + 'static) -> Self {
        Self::with_check(name, Arc::new(check))
    }
}

impl BusinessRule {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value, &Value, &[EventEnvelope], &Command) -> RuleResult + Send + Sync + 'static,
    {
        Self::with_check(name, Arc::new(SyncCheck(check)))
    }

    pub fn from_check(name: impl Into<String>, check: impl BusinessRuleCheck + 'static) -> Self {
        Self::with_check(name, Arc::new(check))
    }
}

/// Stable sort by ascending priority.
pub fn sort_by_priority<C: ?Sized>(rules: &mut [Rule<C>]) {
    rules.sort_by(|a, b| a.priority.total_cmp(&b.priority));
}

/// Runs the PreLoadConditions that apply to `command`; the first rejection wins.
pub async fn check_pre_load_conditions(
    rules: &[PreLoadCondition],
    command: &Command,
) -> Result<()> {
    for rule in rules.iter().filter(|r| r.applies_to(&command.name)) {
        if let Err(rejection) = rule.check.check(command).await {
            tracing::debug!(rule = %rule.name, "pre-load condition rejected command");
            return Err(rule.reject(rejection));
        }
    }
    Ok(())
}

pub async fn check_pre_conditions(
    rules: &[PreCondition],
    command: &Command,
    aggregate: &Value,
) -> Result<()> {
    for rule in rules.iter().filter(|r| r.applies_to(&command.name)) {
        if let Err(rejection) = rule.check.check(command, aggregate).await {
            tracing::debug!(rule = %rule.name, "pre-condition rejected command");
            return Err(rule.reject(rejection));
        }
    }
    Ok(())
}

pub async fn check_business_rules(
    rules: &[BusinessRule],
    changed: &Value,
    previous: &Value,
    events: &[EventEnvelope],
    command: &Command,
) -> Result<()> {
    for rule in rules.iter().filter(|r| r.applies_to(&command.name)) {
        if let Err(rejection) = rule.check.check(changed, previous, events, command).await {
            tracing::debug!(rule = %rule.name, "business rule rejected command");
            return Err(rule.reject(rejection));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        label: &'static str,
    }

    #[async_trait]
    impl PreLoadCheck for Recorder {
        async fn check(&self, _: &Command) -> RuleResult {
            tokio::task::yield_now().await;
            self.log.lock().unwrap().push(self.label.to_string());
            Ok(())
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> Recorder {
        Recorder {
            log: Arc::clone(log),
            label,
        }
    }

    #[tokio::test]
    async fn rules_run_by_priority_with_stable_ties() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut rules = vec![
            PreLoadCondition::from_check("last", recorder(&log, "last")),
            PreLoadCondition::from_check("b", recorder(&log, "b")).with_priority(2.0),
            PreLoadCondition::from_check("a", recorder(&log, "a")).with_priority(1.0),
            PreLoadCondition::from_check("c", recorder(&log, "c")).with_priority(2.0),
        ];
        sort_by_priority(&mut rules);

        check_pre_load_conditions(&rules, &Command::new("addItem"))
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c", "last"]);
    }

    #[tokio::test]
    async fn first_rejection_stops_the_pipeline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let rules = vec![
            PreLoadCondition::new("deny", |_: &Command| Err("not allowed".into())),
            PreLoadCondition::from_check("never", recorder(&log, "never")),
        ];

        let err = check_pre_load_conditions(&rules, &Command::new("addItem"))
            .await
            .unwrap_err();

        match err {
            DomainError::BusinessRule { message, rule, .. } => {
                assert_eq!(message, "not allowed");
                assert_eq!(rule.as_deref(), Some("deny"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejection_without_message_uses_description() {
        let rules = vec![
            PreCondition::new("hasItems", |_: &Command, aggregate: &Value| {
                if aggregate["items"].as_array().is_some_and(|i| !i.is_empty()) {
                    Ok(())
                } else {
                    Err(RuleRejection::unexplained().with_more(json!({"items": 0})))
                }
            })
            .with_description("cart must not be empty"),
        ];

        let err = check_pre_conditions(&rules, &Command::new("checkout"), &json!({"items": []}))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Business rule violated: cart must not be empty");
        assert_eq!(err.more()["more"], json!({"items": 0}));
    }

    #[tokio::test]
    async fn scoped_rules_skip_other_commands() {
        let rules = vec![
            PreLoadCondition::new("onlyCheckout", |_: &Command| Err("blocked".into()))
                .for_commands(["checkout"]),
        ];

        assert!(
            check_pre_load_conditions(&rules, &Command::new("addItem"))
                .await
                .is_ok()
        );
        assert!(
            check_pre_load_conditions(&rules, &Command::new("checkout"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn business_rules_see_both_states() {
        let rules = vec![BusinessRule::new(
            "totalNeverShrinks",
            |changed: &Value, previous: &Value, _: &[EventEnvelope], _: &Command| {
                if changed["total"].as_i64() < previous["total"].as_i64() {
                    Err("total decreased".into())
                } else {
                    Ok(())
                }
            },
        )];
        let command = Command::new("addItem");

        assert!(
            check_business_rules(&rules, &json!({"total": 2}), &json!({"total": 1}), &[], &command)
                .await
                .is_ok()
        );
        assert!(
            check_business_rules(&rules, &json!({"total": 0}), &json!({"total": 1}), &[], &command)
                .await
                .is_err()
        );
    }
}
