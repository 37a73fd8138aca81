// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// What to do when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Allow,
    Deny,
    Ask,
}

impl PermissionAction {
    /// Restrictiveness rank used when merging defaults: `Deny > Ask > Allow`.
    fn restrictiveness(self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::Ask => 1,
            Self::Deny => 2,
        }
    }

    pub fn most_restrictive(self, other: Self) -> Self {
        if other.restrictiveness() > self.restrictiveness() {
            other
        } else {
            self
        }
    }
}

/// One `category:resource` pattern rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub pattern: String,
    pub action: PermissionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

impl PermissionRule {
    pub fn new(pattern: impl Into<String>, action: PermissionAction, priority: i32) -> Self {
        Self { pattern: pattern.into(), action, reason: None, priority }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// An ordered rule list plus the action taken when nothing matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    pub name: String,
    pub rules: Vec<PermissionRule>,
    pub default_action: PermissionAction,
}

impl Ruleset {
    pub fn new(name: impl Into<String>, default_action: PermissionAction) -> Self {
        Self { name: name.into(), rules: Vec::new(), default_action }
    }

    pub fn with_rule(mut self, rule: PermissionRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Permissive default used for built-in agents with no configured rules.
    pub fn allow_all(name: impl Into<String>) -> Self {
        Self::new(name, PermissionAction::Allow)
    }
}

impl Default for Ruleset {
    fn default() -> Self {
        Self::new("default", PermissionAction::Ask)
    }
}

/// Merge rulesets into one.
///
/// Rules are concatenated in the given order and stably sorted by ascending
/// priority, so for equal priorities later sources win under last-match
/// evaluation.  The merged default is the most restrictive of the inputs.
pub fn merge_rulesets<'a>(sets: impl IntoIterator<Item = &'a Ruleset>) -> Ruleset {
    let mut merged = Ruleset::new("merged", PermissionAction::Allow);
    let mut saw_any = false;
    for set in sets {
        merged.rules.extend(set.rules.iter().cloned());
        merged.default_action = if saw_any {
            merged.default_action.most_restrictive(set.default_action)
        } else {
            set.default_action
        };
        saw_any = true;
    }
    merged.rules.sort_by_key(|r| r.priority);
    merged
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_is_most_restrictive() {
        assert_eq!(
            PermissionAction::Allow.most_restrictive(PermissionAction::Deny),
            PermissionAction::Deny
        );
        assert_eq!(
            PermissionAction::Deny.most_restrictive(PermissionAction::Ask),
            PermissionAction::Deny
        );
        assert_eq!(
            PermissionAction::Allow.most_restrictive(PermissionAction::Ask),
            PermissionAction::Ask
        );
    }

    #[test]
    fn merge_takes_most_restrictive_default() {
        let a = Ruleset::new("a", PermissionAction::Allow);
        let b = Ruleset::new("b", PermissionAction::Ask);
        assert_eq!(merge_rulesets([&a, &b]).default_action, PermissionAction::Ask);

        let c = Ruleset::new("c", PermissionAction::Deny);
        assert_eq!(
            merge_rulesets([&a, &c, &b]).default_action,
            PermissionAction::Deny
        );
    }

    #[test]
    fn merge_sorts_stably_by_priority() {
        let a = Ruleset::new("a", PermissionAction::Allow)
            .with_rule(PermissionRule::new("bash:*", PermissionAction::Allow, 10))
            .with_rule(PermissionRule::new("edit:*", PermissionAction::Ask, 5));
        let b = Ruleset::new("b", PermissionAction::Allow)
            .with_rule(PermissionRule::new("bash:rm *", PermissionAction::Deny, 10));

        let merged = merge_rulesets([&a, &b]);
        let patterns: Vec<&str> = merged.rules.iter().map(|r| r.pattern.as_str()).collect();
        // priority 5 first, then the two priority-10 rules in source order
        assert_eq!(patterns, vec!["edit:*", "bash:*", "bash:rm *"]);
    }

    #[test]
    fn merge_of_nothing_is_permissive_and_empty() {
        let none: [&Ruleset; 0] = [];
        let merged = merge_rulesets(none);
        assert!(merged.rules.is_empty());
        assert_eq!(merged.default_action, PermissionAction::Allow);
    }

    #[test]
    fn rule_serde_round_trip() {
        let rule = PermissionRule::new("bash:rm *", PermissionAction::Deny, 100)
            .with_reason("destructive");
        let json = serde_json::to_string(&rule).unwrap();
        let back: PermissionRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }
}
