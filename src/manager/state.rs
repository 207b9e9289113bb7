//! Pure connection-state logic.
//!
//! Status values, transition triggers and the decision function live here
//! with no I/O so they can be tested exhaustively. The connection manager
//! applies the results under its mutex.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of the broker connection.
///
/// The four `*Disconnected`/`WaitingForNetwork` values distinguish WHY the
/// connection is down, which drives whether an automatic reconnect is
/// allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Never attempted a connection yet.
    Initial,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected and subscribed.
    Connected,
    /// Down because no network path exists; reconnects wait for
    /// reachability to return.
    WaitingForNetwork,
    /// Down because the user asked; only an explicit `start()` resumes.
    UserDisconnected,
    /// Down because background data transfer is administratively disabled.
    DataDisabled,
    /// Down for any other reason; the retry clock keeps running.
    UnknownReasonDisconnected,
}

impl ConnectionStatus {
    /// True when automatic reconnection is permitted from this status.
    /// User intent and policy always win over liveness recovery.
    pub fn allows_auto_reconnect(self) -> bool {
        !matches!(
            self,
            ConnectionStatus::UserDisconnected | ConnectionStatus::DataDisabled
        )
    }

    /// Stable lowercase name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Initial => "initial",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::WaitingForNetwork => "waiting_for_network",
            ConnectionStatus::UserDisconnected => "user_disconnected",
            ConnectionStatus::DataDisabled => "data_disabled",
            ConnectionStatus::UnknownReasonDisconnected => "unknown_reason_disconnected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can move the connection between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTrigger {
    /// `start()` was called; carries the reachability snapshot taken at
    /// call time.
    StartRequested { online: bool, data_enabled: bool },
    /// The broker acknowledged a connection attempt.
    ConnectSucceeded,
    /// A connection attempt failed.
    ConnectFailed,
    /// An established connection dropped; carries whether the network was
    /// still reachable when the loss was observed.
    ConnectionLost { online: bool },
    /// The user asked to disconnect.
    UserDisconnect,
    /// Reachability came back after an offline period.
    NetworkAvailable,
}

/// Decide the next status for a trigger, or `None` when the trigger does not
/// apply in the current status. A `Some` result is always a real change;
/// triggers that would land on the current status come back as `None`, so
/// every committed transition deserves exactly one broadcast.
pub fn next_status(
    current: ConnectionStatus,
    trigger: ConnectionTrigger,
) -> Option<ConnectionStatus> {
    decide(current, trigger).filter(|next| *next != current)
}

fn decide(current: ConnectionStatus, trigger: ConnectionTrigger) -> Option<ConnectionStatus> {
    use ConnectionStatus::*;
    use ConnectionTrigger::*;

    match trigger {
        StartRequested {
            online,
            data_enabled,
        } => match current {
            // Already connected or mid-attempt; nothing to decide.
            Connected | Connecting => None,
            _ if !data_enabled => Some(DataDisabled),
            _ if !online => Some(WaitingForNetwork),
            _ => Some(Connecting),
        },
        ConnectSucceeded => match current {
            Connecting => Some(Connected),
            // A success landing after disconnect() bumped the generation
            // never reaches here; anything else is a stale client racing.
            _ => None,
        },
        ConnectFailed => match current {
            Connecting => Some(UnknownReasonDisconnected),
            _ => None,
        },
        ConnectionLost { online } => match current {
            Connected | Connecting => {
                if online {
                    Some(UnknownReasonDisconnected)
                } else {
                    Some(WaitingForNetwork)
                }
            }
            _ => None,
        },
        UserDisconnect => match current {
            UserDisconnected => None,
            _ => Some(UserDisconnected),
        },
        NetworkAvailable => match current {
            // Only statuses where a reconnect is both useful and allowed.
            WaitingForNetwork | UnknownReasonDisconnected => Some(Connecting),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ConnectionStatus::*;
    use ConnectionTrigger::*;

    const ALL_STATUSES: [ConnectionStatus; 7] = [
        Initial,
        Connecting,
        Connected,
        WaitingForNetwork,
        UserDisconnected,
        DataDisabled,
        UnknownReasonDisconnected,
    ];

    fn any_status() -> impl Strategy<Value = ConnectionStatus> {
        prop::sample::select(ALL_STATUSES.as_slice())
    }

    fn any_trigger() -> impl Strategy<Value = ConnectionTrigger> {
        prop_oneof![
            (any::<bool>(), any::<bool>()).prop_map(|(online, data_enabled)| StartRequested {
                online,
                data_enabled
            }),
            Just(ConnectSucceeded),
            Just(ConnectFailed),
            any::<bool>().prop_map(|online| ConnectionLost { online }),
            Just(UserDisconnect),
            Just(NetworkAvailable),
        ]
    }

    #[test]
    fn start_when_online_connects() {
        assert_eq!(
            next_status(
                Initial,
                StartRequested {
                    online: true,
                    data_enabled: true
                }
            ),
            Some(Connecting)
        );
    }

    #[test]
    fn start_when_offline_waits_for_network() {
        assert_eq!(
            next_status(
                Initial,
                StartRequested {
                    online: false,
                    data_enabled: true
                }
            ),
            Some(WaitingForNetwork)
        );
    }

    #[test]
    fn data_disabled_short_circuits_start() {
        // Policy wins even when the network is up.
        assert_eq!(
            next_status(
                UserDisconnected,
                StartRequested {
                    online: true,
                    data_enabled: false
                }
            ),
            Some(DataDisabled)
        );
    }

    #[test]
    fn start_while_connected_is_a_no_op() {
        assert_eq!(
            next_status(
                Connected,
                StartRequested {
                    online: true,
                    data_enabled: true
                }
            ),
            None
        );
    }

    #[test]
    fn start_resumes_from_user_disconnect() {
        assert_eq!(
            next_status(
                UserDisconnected,
                StartRequested {
                    online: true,
                    data_enabled: true
                }
            ),
            Some(Connecting)
        );
    }

    #[test]
    fn connect_outcome_only_applies_while_connecting() {
        assert_eq!(next_status(Connecting, ConnectSucceeded), Some(Connected));
        assert_eq!(
            next_status(Connecting, ConnectFailed),
            Some(UnknownReasonDisconnected)
        );
        for status in ALL_STATUSES {
            if status != Connecting {
                assert_eq!(next_status(status, ConnectSucceeded), None);
                assert_eq!(next_status(status, ConnectFailed), None);
            }
        }
    }

    #[test]
    fn loss_offline_waits_loss_online_retries() {
        assert_eq!(
            next_status(Connected, ConnectionLost { online: false }),
            Some(WaitingForNetwork)
        );
        assert_eq!(
            next_status(Connected, ConnectionLost { online: true }),
            Some(UnknownReasonDisconnected)
        );
    }

    #[test]
    fn loss_ignored_when_already_down() {
        for status in [
            Initial,
            WaitingForNetwork,
            UserDisconnected,
            DataDisabled,
            UnknownReasonDisconnected,
        ] {
            assert_eq!(next_status(status, ConnectionLost { online: true }), None);
        }
    }

    #[test]
    fn network_available_reconnects_only_where_allowed() {
        assert_eq!(
            next_status(WaitingForNetwork, NetworkAvailable),
            Some(Connecting)
        );
        assert_eq!(
            next_status(UnknownReasonDisconnected, NetworkAvailable),
            Some(Connecting)
        );
        for status in [Initial, Connecting, Connected, UserDisconnected, DataDisabled] {
            assert_eq!(next_status(status, NetworkAvailable), None);
        }
    }

    #[test]
    fn display_matches_serialized_form() {
        for status in ALL_STATUSES {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }

    proptest! {
        /// User intent is never overridden by automatic triggers.
        #[test]
        fn user_disconnect_is_sticky(trigger in any_trigger()) {
            let allowed_away = matches!(
                trigger,
                StartRequested { .. } | UserDisconnect
            );
            if let Some(next) = next_status(UserDisconnected, trigger) {
                prop_assert!(allowed_away, "left UserDisconnected via {trigger:?} -> {next:?}");
            }
        }

        /// Only an explicit start can leave DataDisabled.
        #[test]
        fn data_disabled_is_sticky(trigger in any_trigger()) {
            if let Some(next) = next_status(DataDisabled, trigger) {
                prop_assert!(
                    matches!(trigger, StartRequested { .. } | UserDisconnect),
                    "left DataDisabled via {trigger:?} -> {next:?}"
                );
            }
        }

        /// The decision function never produces Connected except from a
        /// successful attempt.
        #[test]
        fn connected_only_via_success(status in any_status(), trigger in any_trigger()) {
            if next_status(status, trigger) == Some(Connected) {
                prop_assert_eq!(status, Connecting);
                prop_assert_eq!(trigger, ConnectSucceeded);
            }
        }

        /// Transitions into Connecting only happen when reconnection is
        /// permitted from the current status.
        #[test]
        fn connecting_respects_reconnect_policy(status in any_status(), trigger in any_trigger()) {
            if next_status(status, trigger) == Some(Connecting)
                && !matches!(trigger, StartRequested { .. })
            {
                prop_assert!(status.allows_auto_reconnect());
            }
        }

        /// A committed transition is always a real change of status.
        #[test]
        fn transitions_change_status(status in any_status(), trigger in any_trigger()) {
            if let Some(next) = next_status(status, trigger) {
                prop_assert_ne!(status, next);
            }
        }
    }
}
