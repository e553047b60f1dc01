//! Permission gate: decides per invocation whether a tool may run without confirmation.
//!
//! `Unchecked → ReadOnlyAllowed | NeedsApproval → Approved | Denied`. The approval callback is
//! the only suspension point and is raced against the invocation's cancellation token.

use serde_json::Value;
use tracing::debug;

use crate::tools::context::ToolUseContext;
use crate::tools::registry::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Unchecked,
    ReadOnlyAllowed,
    NeedsApproval,
    Approved,
    /// `cancelled` is set when the token fired while approval was pending.
    Denied { cancelled: bool },
}

impl PermissionState {
    #[inline]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::ReadOnlyAllowed | Self::Approved)
    }
}

/// Session-scoped gate. Decisions are never persisted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionGate {
    skip_permissions: bool,
}

impl PermissionGate {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trusted run mode: every invocation is approved without asking.
    #[inline]
    pub fn skipping_permissions() -> Self {
        Self {
            skip_permissions: true,
        }
    }

    /// First transition out of `Unchecked`, without prompting.
    pub fn preflight(&self, tool: &dyn Tool, input: &Value, ctx: &ToolUseContext) -> PermissionState {
        if tool.is_read_only() {
            PermissionState::ReadOnlyAllowed
        } else if self.skip_permissions || !tool.needs_permission(input, ctx) {
            PermissionState::Approved
        } else {
            PermissionState::NeedsApproval
        }
    }

    /// Run the state machine to a terminal state. On interactive approval, the tool's
    /// approval scope (if any) is granted for the rest of the session.
    pub async fn authorize(
        &self,
        tool: &dyn Tool,
        input: &Value,
        ctx: &ToolUseContext,
    ) -> PermissionState {
        let state = self.preflight(tool, input, ctx);
        debug!(tool = tool.name(), from = ?PermissionState::Unchecked, to = ?state, "permission");
        if state != PermissionState::NeedsApproval {
            return state;
        }

        let decided = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => PermissionState::Denied { cancelled: true },
            approved = ctx.approver.request(tool.name(), input) => {
                if approved {
                    PermissionState::Approved
                } else {
                    PermissionState::Denied { cancelled: false }
                }
            }
        };
        if decided == PermissionState::Approved {
            if let Some(scope) = tool.approval_scope(input) {
                ctx.session_approvals.grant(scope);
            }
        }
        debug!(tool = tool.name(), from = ?state, to = ?decided, "permission");
        decided
    }
}
