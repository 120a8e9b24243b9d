//! Upstream lifecycle states and the legal transitions between them.

use serde::Serialize;

use crate::config_types::TransportKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamLifecycle {
    /// Accepted by the manager, not yet acted on.
    Pending,
    /// Blocked until every required tool is present in the live catalog.
    Waiting,
    Starting,
    Running,
    /// Backing off after a transient failure; returns to `Starting` when the
    /// delay elapses.
    Retrying,
    /// A login must be driven by an operator or a session; never retried
    /// automatically.
    AuthRequired,
    Stopping,
    Stopped,
    /// Terminal failure; only an explicit restart leaves this state.
    Failed,
}

impl UpstreamLifecycle {
    /// The service's writer task is the only code that moves an upstream,
    /// and it refuses transitions outside this edge set.
    pub fn can_transition_to(self, to: UpstreamLifecycle) -> bool {
        use UpstreamLifecycle::*;
        matches!(
            (self, to),
            (Pending, Starting)
                | (Pending, Waiting)
                | (Pending, Stopped)
                | (Waiting, Starting)
                | (Waiting, Stopping)
                | (Waiting, Stopped)
                | (Stopped, Waiting)
                | (Failed, Waiting)
                | (AuthRequired, Waiting)
                | (Starting, Running)
                | (Starting, Retrying)
                | (Starting, AuthRequired)
                | (Starting, Failed)
                | (Starting, Stopping)
                | (Running, Retrying)
                | (Running, AuthRequired)
                | (Running, Stopping)
                | (Retrying, Starting)
                | (Retrying, Stopping)
                | (AuthRequired, Starting)
                | (AuthRequired, Stopping)
                | (AuthRequired, Stopped)
                | (Stopping, Stopped)
                | (Stopped, Starting)
                | (Failed, Starting)
                | (Failed, Stopping)
        )
    }

    /// Presentation name. The state machine is shared; stdio upstreams read
    /// as processes, http/sse upstreams as connections.
    pub fn display_for(self, transport: TransportKind) -> &'static str {
        use UpstreamLifecycle::*;
        let process_terms = matches!(transport, TransportKind::Stdio);
        match self {
            Pending => "pending",
            Waiting => "waiting",
            Starting => {
                if process_terms {
                    "starting"
                } else {
                    "connecting"
                }
            }
            Running => {
                if process_terms {
                    "running"
                } else {
                    "connected"
                }
            }
            Retrying => "retrying",
            AuthRequired => "auth required",
            Stopping => "stopping",
            Stopped => {
                if process_terms {
                    "stopped"
                } else {
                    "disconnected"
                }
            }
            Failed => "failed",
        }
    }

    pub fn is_running(self) -> bool {
        self == UpstreamLifecycle::Running
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::UpstreamLifecycle;
    use super::UpstreamLifecycle::*;
    use crate::config_types::TransportKind;

    const ALL: [UpstreamLifecycle; 9] = [
        Pending, Waiting, Starting, Running, Retrying, AuthRequired, Stopping, Stopped, Failed,
    ];

    #[test]
    fn happy_path_edges_are_legal() {
        for (from, to) in [
            (Pending, Starting),
            (Starting, Running),
            (Running, Stopping),
            (Stopping, Stopped),
            (Stopped, Starting),
        ] {
            assert!(from.can_transition_to(to), "{from:?} -> {to:?}");
        }
    }

    #[test]
    fn retry_and_auth_edges_are_legal() {
        assert!(Starting.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Starting));
        assert!(Running.can_transition_to(Retrying));
        assert!(Starting.can_transition_to(AuthRequired));
        assert!(Running.can_transition_to(AuthRequired));
        assert!(AuthRequired.can_transition_to(Stopped));
    }

    #[test]
    fn dependency_wait_is_reachable_from_every_restartable_state() {
        // A restart with unmet required tools must be able to park in
        // Waiting rather than wedge.
        for from in [Pending, Stopped, Failed, AuthRequired] {
            assert!(from.can_transition_to(Waiting), "{from:?} -> Waiting");
        }
    }

    #[test]
    fn auth_required_is_not_left_implicitly() {
        // No edge into Running or Retrying: re-auth always goes back through
        // an explicit start.
        assert!(!AuthRequired.can_transition_to(Running));
        assert!(!AuthRequired.can_transition_to(Retrying));
    }

    #[test]
    fn no_state_reenters_itself() {
        for state in ALL {
            assert!(!state.can_transition_to(state), "{state:?} -> {state:?}");
        }
    }

    #[test]
    fn running_is_only_reachable_from_starting() {
        for from in ALL {
            if from != Starting {
                assert!(!from.can_transition_to(Running), "{from:?} -> Running");
            }
        }
    }

    #[test]
    fn presentation_differs_by_transport() {
        assert_eq!(Running.display_for(TransportKind::Stdio), "running");
        assert_eq!(Running.display_for(TransportKind::StreamableHttp), "connected");
        assert_eq!(Stopped.display_for(TransportKind::Sse), "disconnected");
        assert_eq!(Starting.display_for(TransportKind::Stdio), "starting");
        assert_eq!(Starting.display_for(TransportKind::Sse), "connecting");
    }
}
