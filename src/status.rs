use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Scheduling,
    Initializing,
    Running,
    Failing,
    Paused,
    ModeratorPaused,
    Completed,
    Stopped,
    Rejected,
    Failed,
    Terminated,
}

/// The active statuses, in lifecycle order. Anything not listed here is
/// terminal.
pub const ACTIVE_STATUSES: &[ExecutionStatus] = &[
    ExecutionStatus::Pending,
    ExecutionStatus::Scheduling,
    ExecutionStatus::Initializing,
    ExecutionStatus::Running,
    ExecutionStatus::Failing,
    ExecutionStatus::Paused,
    ExecutionStatus::ModeratorPaused,
];

pub const TERMINAL_STATUSES: &[ExecutionStatus] = &[
    ExecutionStatus::Completed,
    ExecutionStatus::Stopped,
    ExecutionStatus::Rejected,
    ExecutionStatus::Failed,
    ExecutionStatus::Terminated,
];

impl ExecutionStatus {
    pub fn is_active(self) -> bool {
        ACTIVE_STATUSES.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Scheduling => "scheduling",
            ExecutionStatus::Initializing => "initializing",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Failing => "failing",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::ModeratorPaused => "moderator_paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Stopped => "stopped",
            ExecutionStatus::Rejected => "rejected",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ACTIVE_STATUSES
            .iter()
            .chain(TERMINAL_STATUSES)
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::InvalidStatus(s.to_string()))
    }
}

/// Commands accepted by the notify API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyCommand {
    Stop,
    Pause,
    Resume,
    ModeratorPaused,
    Restart,
    Terminated,
}

impl NotifyCommand {
    /// Status written once the cluster fan-out completes. `Restart` carries
    /// no status of its own.
    pub fn target_status(self) -> Option<ExecutionStatus> {
        match self {
            NotifyCommand::Stop => Some(ExecutionStatus::Stopped),
            NotifyCommand::Pause => Some(ExecutionStatus::Paused),
            NotifyCommand::Resume => Some(ExecutionStatus::Running),
            NotifyCommand::ModeratorPaused => Some(ExecutionStatus::ModeratorPaused),
            NotifyCommand::Terminated => Some(ExecutionStatus::Terminated),
            NotifyCommand::Restart => None,
        }
    }

    /// Message fanned out to the nodes running an execution, and whether it
    /// goes to the slicer node only or to every node.
    pub fn cluster_message(self) -> (ClusterMessage, NotifyTarget) {
        match self {
            NotifyCommand::Pause => (ClusterMessage::Pause, NotifyTarget::SlicerOnly),
            NotifyCommand::Resume => (ClusterMessage::Resume, NotifyTarget::SlicerOnly),
            NotifyCommand::ModeratorPaused => (ClusterMessage::Pause, NotifyTarget::SlicerOnly),
            NotifyCommand::Restart => (ClusterMessage::Restart, NotifyTarget::AllNodes),
            NotifyCommand::Stop => (ClusterMessage::Stop, NotifyTarget::AllNodes),
            NotifyCommand::Terminated => (ClusterMessage::Stop, NotifyTarget::AllNodes),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NotifyCommand::Stop => "stop",
            NotifyCommand::Pause => "pause",
            NotifyCommand::Resume => "resume",
            NotifyCommand::ModeratorPaused => "moderator_paused",
            NotifyCommand::Restart => "restart",
            NotifyCommand::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for NotifyCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotifyCommand {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" => Ok(NotifyCommand::Stop),
            "pause" => Ok(NotifyCommand::Pause),
            "resume" => Ok(NotifyCommand::Resume),
            "moderator_paused" => Ok(NotifyCommand::ModeratorPaused),
            "restart" => Ok(NotifyCommand::Restart),
            "terminated" => Ok(NotifyCommand::Terminated),
            other => Err(CoreError::InvalidCommand(other.to_string())),
        }
    }
}

/// Wire message delivered to cluster nodes for a notify command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterMessage {
    Pause,
    Resume,
    Restart,
    Stop,
}

impl ClusterMessage {
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterMessage::Pause => "cluster:job:pause",
            ClusterMessage::Resume => "cluster:job:resume",
            ClusterMessage::Restart => "cluster:job:restart",
            ClusterMessage::Stop => "cluster:job:stop",
        }
    }
}

impl std::fmt::Display for ClusterMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which nodes a notify command fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyTarget {
    SlicerOnly,
    AllNodes,
}

impl NotifyTarget {
    pub fn slicer_only(self) -> bool {
        self == NotifyTarget::SlicerOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_is_exactly_the_first_seven() {
        assert_eq!(ACTIVE_STATUSES.len(), 7);
        assert_eq!(TERMINAL_STATUSES.len(), 5);
        for status in ACTIVE_STATUSES {
            assert!(status.is_active(), "{status} should be active");
        }
        for status in TERMINAL_STATUSES {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in ACTIVE_STATUSES.iter().chain(TERMINAL_STATUSES) {
            let parsed: ExecutionStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, *status);
        }
        assert!(matches!(
            "bogus".parse::<ExecutionStatus>(),
            Err(CoreError::InvalidStatus(_))
        ));
    }

    #[test]
    fn test_command_status_map() {
        assert_eq!(
            NotifyCommand::Stop.target_status(),
            Some(ExecutionStatus::Stopped)
        );
        assert_eq!(
            NotifyCommand::Pause.target_status(),
            Some(ExecutionStatus::Paused)
        );
        assert_eq!(
            NotifyCommand::Resume.target_status(),
            Some(ExecutionStatus::Running)
        );
        assert_eq!(
            NotifyCommand::ModeratorPaused.target_status(),
            Some(ExecutionStatus::ModeratorPaused)
        );
        assert_eq!(
            NotifyCommand::Terminated.target_status(),
            Some(ExecutionStatus::Terminated)
        );
        assert_eq!(NotifyCommand::Restart.target_status(), None);
    }

    #[test]
    fn test_command_message_map() {
        let (msg, target) = NotifyCommand::Pause.cluster_message();
        assert_eq!(msg, ClusterMessage::Pause);
        assert!(target.slicer_only());

        let (msg, target) = NotifyCommand::ModeratorPaused.cluster_message();
        assert_eq!(msg, ClusterMessage::Pause);
        assert!(target.slicer_only());

        let (msg, target) = NotifyCommand::Stop.cluster_message();
        assert_eq!(msg, ClusterMessage::Stop);
        assert!(!target.slicer_only());

        let (msg, target) = NotifyCommand::Terminated.cluster_message();
        assert_eq!(msg, ClusterMessage::Stop);
        assert!(!target.slicer_only());

        let (msg, target) = NotifyCommand::Restart.cluster_message();
        assert_eq!(msg, ClusterMessage::Restart);
        assert!(!target.slicer_only());
    }

    #[test]
    fn test_unknown_command_is_invalid() {
        assert!(matches!(
            "explode".parse::<NotifyCommand>(),
            Err(CoreError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_cluster_message_names() {
        assert_eq!(ClusterMessage::Pause.as_str(), "cluster:job:pause");
        assert_eq!(ClusterMessage::Resume.as_str(), "cluster:job:resume");
        assert_eq!(ClusterMessage::Restart.as_str(), "cluster:job:restart");
        assert_eq!(ClusterMessage::Stop.as_str(), "cluster:job:stop");
    }
}
