//! Tool access policy.
//!
//! Decides which tools from the catalog are visible to the model for one
//! message, based on the active profile, tool groups, allow/deny lists,
//! and the elevation flag. Rules are evaluated in a fixed order and the
//! first applicable rule wins.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::directives::ToolProfile;

/// Functional grouping of tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolGroup {
    Fs,
    Web,
    Memory,
    Sessions,
    Ui,
    Automation,
    Messaging,
    Database,
    Storage,
    Scheduler,
    System,
}

impl ToolGroup {
    pub const ALL: [ToolGroup; 11] = [
        ToolGroup::Fs,
        ToolGroup::Web,
        ToolGroup::Memory,
        ToolGroup::Sessions,
        ToolGroup::Ui,
        ToolGroup::Automation,
        ToolGroup::Messaging,
        ToolGroup::Database,
        ToolGroup::Storage,
        ToolGroup::Scheduler,
        ToolGroup::System,
    ];
}

/// Catalog entry describing one tool for policy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub group: Option<ToolGroup>,
    #[serde(default)]
    pub groups: Vec<ToolGroup>,
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default)]
    pub dangerous: bool,
    #[serde(default)]
    pub admin_only: bool,
}

impl ToolInfo {
    pub fn new(name: impl Into<String>, group: Option<ToolGroup>) -> Self {
        Self {
            name: name.into(),
            group,
            groups: Vec::new(),
            approval_required: false,
            dangerous: false,
            admin_only: false,
        }
    }
}

/// Outcome of evaluating a single tool.
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: String,
    pub requires_approval: bool,
    pub requires_elevation: bool,
}

impl PolicyDecision {
    fn allow(reason: impl Into<String>, requires_approval: bool) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            requires_approval,
            requires_elevation: false,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            requires_approval: false,
            requires_elevation: false,
        }
    }

    fn deny_needs_elevation(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            requires_approval: false,
            requires_elevation: true,
        }
    }
}

/// Policy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicyConfig {
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub denylist: Vec<String>,
    /// Set-wise adjustments on top of the profile's default groups.
    #[serde(default)]
    pub group_overrides: HashMap<ToolGroup, bool>,
    #[serde(default)]
    pub dangerous_tools: Vec<String>,
}

/// Evaluates tool availability under a profile and elevation state.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    config: ToolPolicyConfig,
}

impl ToolPolicy {
    pub fn new(config: ToolPolicyConfig) -> Self {
        Self { config }
    }

    /// Groups granted by a profile, after applying configured overrides.
    pub fn allowed_groups(&self, profile: ToolProfile) -> HashSet<ToolGroup> {
        let mut groups: HashSet<ToolGroup> = match profile {
            ToolProfile::Minimal => [ToolGroup::System].into(),
            ToolProfile::Coding => [ToolGroup::System, ToolGroup::Fs, ToolGroup::Database].into(),
            ToolProfile::Messaging => {
                [ToolGroup::System, ToolGroup::Messaging, ToolGroup::Web].into()
            }
            ToolProfile::Full => ToolGroup::ALL.into(),
        };

        for (group, allowed) in &self.config.group_overrides {
            if *allowed {
                groups.insert(*group);
            } else {
                groups.remove(group);
            }
        }

        groups
    }

    /// Evaluate one tool. Rules are checked in order; the first applicable
    /// rule decides.
    pub fn evaluate(&self, tool: &ToolInfo, profile: ToolProfile, elevated: bool) -> PolicyDecision {
        if self.config.denylist.contains(&tool.name) {
            return PolicyDecision::deny(format!("tool '{}' is in denylist", tool.name));
        }

        if self.config.allowlist.contains(&tool.name) {
            return PolicyDecision::allow(
                format!("tool '{}' is in allowlist", tool.name),
                tool.approval_required,
            );
        }

        if tool.admin_only && !elevated {
            return PolicyDecision::deny_needs_elevation(format!(
                "tool '{}' requires admin privileges",
                tool.name
            ));
        }

        if (tool.dangerous || self.config.dangerous_tools.contains(&tool.name)) && !elevated {
            return PolicyDecision::deny_needs_elevation(format!(
                "tool '{}' is marked as dangerous",
                tool.name
            ));
        }

        let allowed_groups = self.allowed_groups(profile);

        if tool.group.is_none() && tool.groups.is_empty() {
            return if profile == ToolProfile::Full {
                PolicyDecision::allow(
                    "ungrouped tool allowed in full profile",
                    tool.approval_required,
                )
            } else {
                PolicyDecision::deny(format!(
                    "tool '{}' has no group and profile is not full",
                    tool.name
                ))
            };
        }

        let group_allowed = tool
            .group
            .iter()
            .chain(tool.groups.iter())
            .any(|g| allowed_groups.contains(g));

        if group_allowed {
            return PolicyDecision::allow(
                format!("tool group allowed in profile {profile:?}"),
                tool.approval_required,
            );
        }

        PolicyDecision::deny(format!(
            "tool '{}' is not allowed in profile {profile:?}",
            tool.name
        ))
    }

    /// Filter a catalog to the allowed tools.
    pub fn filter_tools<'a>(
        &self,
        tools: &'a [ToolInfo],
        profile: ToolProfile,
        elevated: bool,
    ) -> Vec<&'a ToolInfo> {
        let mut allowed = Vec::new();
        for tool in tools {
            let decision = self.evaluate(tool, profile, elevated);
            if decision.allowed {
                allowed.push(tool);
            } else {
                debug!(tool = %tool.name, reason = %decision.reason, "tool filtered");
            }
        }
        allowed
    }

    /// Names of allowed tools, preserving catalog order.
    pub fn tool_names(&self, tools: &[ToolInfo], profile: ToolProfile, elevated: bool) -> Vec<String> {
        self.filter_tools(tools, profile, elevated)
            .into_iter()
            .map(|t| t.name.clone())
            .collect()
    }
}
