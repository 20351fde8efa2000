//! Tool policies consulted before a `tools/call` is dispatched.

use std::collections::BTreeMap;

use config::ToolPolicyConfig;

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyResult {
    /// Whether the call may proceed.
    pub allowed: bool,
    /// Why the call was denied.
    pub reason: Option<String>,
}

impl PolicyResult {
    /// The call may proceed.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// The call is refused.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Decides whether a tool may be called through a connector type.
pub trait ToolPolicy: Send + Sync {
    /// Checks a single tool call. Must not block.
    fn check_tool_policy(&self, tool_name: &str, connector_type: &str) -> PolicyResult;
}

/// Allows every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ToolPolicy for AllowAll {
    fn check_tool_policy(&self, _: &str, _: &str) -> PolicyResult {
        PolicyResult::allow()
    }
}

/// Deny lists from `[gateway.policies.<connector-type>]`.
#[derive(Debug, Clone, Default)]
pub struct ConfigToolPolicy {
    policies: BTreeMap<String, ToolPolicyConfig>,
}

impl ConfigToolPolicy {
    /// Creates a policy from per connector type settings.
    pub fn new(policies: BTreeMap<String, ToolPolicyConfig>) -> Self {
        Self { policies }
    }
}

impl ToolPolicy for ConfigToolPolicy {
    fn check_tool_policy(&self, tool_name: &str, connector_type: &str) -> PolicyResult {
        let denied = self
            .policies
            .get(connector_type)
            .is_some_and(|policy| policy.deny_tools.iter().any(|denied| denied == tool_name));

        if denied {
            PolicyResult::deny(format!(
                "Tool '{tool_name}' is not allowed for '{connector_type}' connectors"
            ))
        } else {
            PolicyResult::allow()
        }
    }
}
