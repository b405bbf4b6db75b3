//! Transition declarations and their resolution.

use crate::error::CoreError;
use crate::node::NodeId;
use crate::state::Params;
use serde_json::Value;
use std::collections::HashMap;

/// Where a transition leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    /// A named node, resolved during initialization.
    Node(String),
    /// Stay on the current node without leave/enter callbacks.
    Null,
    /// Let the node's state object pick the next node by name.
    Custom,
}

/// A transition target plus the free-form properties declared with it.
#[derive(Debug, Clone)]
pub struct Target {
    kind: TargetKind,
    properties: Params,
}

impl Target {
    pub fn node(name: impl Into<String>) -> Self {
        Self::from_kind(TargetKind::Node(name.into()))
    }

    pub fn null() -> Self {
        Self::from_kind(TargetKind::Null)
    }

    pub fn custom() -> Self {
        Self::from_kind(TargetKind::Custom)
    }

    pub fn from_kind(kind: TargetKind) -> Self {
        Self {
            kind,
            properties: Params::new(),
        }
    }

    /// Attaches a property to the transition.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn kind(&self) -> &TargetKind {
        &self.kind
    }

    pub fn properties(&self) -> &Params {
        &self.properties
    }
}

/// What dispatching through a transition does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Move(NodeId),
    Stay,
    Decide,
}

/// A transition owned by exactly one node.
#[derive(Debug, Clone)]
pub struct Transition {
    target: Target,
    /// `None` until the initializer has resolved the target.
    step: Option<Step>,
}

impl Transition {
    pub(crate) fn new(target: Target) -> Self {
        Self { target, step: None }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_null(&self) -> bool {
        self.target.kind == TargetKind::Null
    }

    pub fn is_resolved(&self) -> bool {
        self.step.is_some()
    }

    /// Resolves the target against the complete name table.
    pub(crate) fn resolve(
        &mut self,
        owner: &str,
        label: &str,
        index: &HashMap<String, NodeId>,
        can_decide: bool,
    ) -> Result<(), CoreError> {
        let step = match &self.target.kind {
            TargetKind::Node(name) => {
                let id = index.get(name).ok_or_else(|| {
                    CoreError::malformed(format!(
                        "transition '{}' of state '{}' targets missing state '{}'",
                        label, owner, name
                    ))
                })?;
                Step::Move(*id)
            }
            TargetKind::Null => Step::Stay,
            TargetKind::Custom => {
                if !can_decide {
                    return Err(CoreError::malformed(format!(
                        "transition '{}' of state '{}' is custom but the state cannot decide its successor",
                        label, owner
                    )));
                }
                Step::Decide
            }
        };
        self.step = Some(step);
        Ok(())
    }

    pub(crate) fn step(&self) -> Option<Step> {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index() -> HashMap<String, NodeId> {
        let mut index = HashMap::new();
        index.insert("first".to_string(), NodeId(0));
        index.insert("second".to_string(), NodeId(1));
        index
    }

    #[test]
    fn test_resolve_fixed_target() {
        let mut t = Transition::new(Target::node("second"));
        assert!(!t.is_resolved());
        t.resolve("first", "A", &index(), false).unwrap();
        assert_eq!(t.step(), Some(Step::Move(NodeId(1))));
    }

    #[test]
    fn test_resolve_missing_target() {
        let mut t = Transition::new(Target::node("nowhere"));
        let err = t.resolve("first", "A", &index(), false).unwrap_err();
        assert!(err.is_specification());
        assert!(err.to_string().contains("nowhere"));
        assert!(!t.is_resolved());
    }

    #[test]
    fn test_null_is_distinct_from_missing() {
        let mut t = Transition::new(Target::null());
        t.resolve("first", "C", &index(), false).unwrap();
        assert!(t.is_null());
        assert_eq!(t.step(), Some(Step::Stay));
    }

    #[test]
    fn test_custom_requires_decider() {
        let mut t = Transition::new(Target::custom());
        assert!(t.resolve("first", "B", &index(), false).is_err());
        t.resolve("first", "B", &index(), true).unwrap();
        assert_eq!(t.step(), Some(Step::Decide));
    }

    #[test]
    fn test_target_properties() {
        let target = Target::node("second").with_property("weight", json!(3));
        assert_eq!(target.properties()["weight"], json!(3));
        assert_eq!(target.kind(), &TargetKind::Node("second".to_string()));
    }
}
