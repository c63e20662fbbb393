//! Rule registry.
//!
//! Rules are kept in registration order. A rule's id is its index in that
//! order, which is also the bit the per-node fired-rule guard uses for it.

use super::context::Ctx;
use super::selector::Selector;
use crate::{ConfigError, Node};
use std::fmt;
use std::sync::Arc;

/// A rule body. It receives the dispatch context and may return a node that
/// replaces the one being matched.
pub type Transform = Arc<dyn Fn(&mut Ctx<'_>) -> Option<Node> + Send + Sync>;

/// Box a closure as a [`Transform`], pinning its signature for inference.
pub fn transform<F>(f: F) -> Transform
where
    F: Fn(&mut Ctx<'_>) -> Option<Node> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Rule identifier (index into the registry).
pub(crate) type RuleId = usize;

#[derive(Debug, Clone)]
pub(crate) enum Scope {
    /// Runs on every structured node before selector rules.
    Before,
    /// Runs on every structured node after selector rules.
    After,
    Selector(Selector),
}

#[derive(Clone)]
pub(crate) struct Rule {
    pub id: RuleId,
    pub scope: Scope,
    pub transform: Transform,
}

impl Rule {
    /// Human-readable name used in logs and metrics.
    pub(crate) fn label(&self) -> String {
        match &self.scope {
            Scope::Before => "$before".to_string(),
            Scope::After => "$after".to_string(),
            Scope::Selector(selector) => selector.to_string(),
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("id", &self.id).field("scope", &self.scope).finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Clone)]
pub(crate) struct Registry {
    rules: Vec<Rule>,
}

impl Registry {
    pub(crate) fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub(crate) fn len(&self) -> usize {
        self.rules.len()
    }

    pub(crate) fn push(&mut self, scope: Scope, transform: Transform) -> RuleId {
        let id = self.rules.len();
        self.rules.push(Rule { id, scope, transform });
        id
    }

    /// Register one transform per selector. Every selector is validated first,
    /// so a bad one leaves the registry untouched.
    pub(crate) fn add_all<I>(&mut self, entries: I) -> Result<Vec<RuleId>, ConfigError>
    where
        I: IntoIterator<Item = (String, Transform)>,
    {
        let parsed = entries
            .into_iter()
            .map(|(selector, transform)| Ok((selector.parse::<Selector>()?, transform)))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(parsed.into_iter().map(|(selector, transform)| self.push(Scope::Selector(selector), transform)).collect())
    }
}
