//! Role-based permission tiers.
//!
//! A [`Tier`] names a class of action and the set of [`Role`]s allowed to
//! perform it. Tiers are cumulative upward: every role that may share a
//! screen may also chat, and so on. The sets are explicit rather than
//! derived from an ordering so that `Waiting` is excluded from everything
//! except the waiting tier itself.
//!
//! | Tier | Roles |
//! |------|-------|
//! | `Waiting` | Waiting |
//! | `Participant` | Host, Screenshare, Participant |
//! | `Screenshare` | Host, Screenshare |
//! | `Host` | Host |

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role a client currently holds inside a room.
///
/// A client has exactly one role at a time. Transitions replace the role
/// wholesale; there is no incremental upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Connected but not yet admitted by a host.
    Waiting,
    /// Admitted member of the session.
    Participant,
    /// Admitted member currently allowed to share their screen.
    Screenshare,
    /// Room administrator.
    Host,
}

impl Role {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Waiting => "waiting",
            Role::Participant => "participant",
            Role::Screenshare => "screenshare",
            Role::Host => "host",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability tier: the set of roles authorized for a class of action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Waiting,
    Participant,
    Screenshare,
    Host,
}

impl Tier {
    /// Roles that belong to this tier.
    #[must_use]
    pub const fn roles(self) -> &'static [Role] {
        match self {
            Tier::Waiting => &[Role::Waiting],
            Tier::Participant => &[Role::Host, Role::Screenshare, Role::Participant],
            Tier::Screenshare => &[Role::Host, Role::Screenshare],
            Tier::Host => &[Role::Host],
        }
    }

    /// Whether `role` is a member of this tier.
    #[must_use]
    pub const fn permits(self, role: Role) -> bool {
        matches!(
            (self, role),
            (Tier::Waiting, Role::Waiting)
                | (
                    Tier::Participant,
                    Role::Host | Role::Screenshare | Role::Participant
                )
                | (Tier::Screenshare, Role::Host | Role::Screenshare)
                | (Tier::Host, Role::Host)
        )
    }
}

/// Returns true if `role` is authorized for `tier`.
#[must_use]
pub const fn has_permission(role: Role, tier: Tier) -> bool {
    tier.permits(role)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ALL_ROLES: [Role; 4] = [Role::Waiting, Role::Participant, Role::Screenshare, Role::Host];
    const ALL_TIERS: [Tier; 4] = [Tier::Waiting, Tier::Participant, Tier::Screenshare, Tier::Host];

    #[test]
    fn test_waiting_tier_only_admits_waiting() {
        assert!(has_permission(Role::Waiting, Tier::Waiting));
        assert!(!has_permission(Role::Participant, Tier::Waiting));
        assert!(!has_permission(Role::Screenshare, Tier::Waiting));
        assert!(!has_permission(Role::Host, Tier::Waiting));
    }

    #[test]
    fn test_participant_tier_excludes_waiting() {
        assert!(!has_permission(Role::Waiting, Tier::Participant));
        assert!(has_permission(Role::Participant, Tier::Participant));
        assert!(has_permission(Role::Screenshare, Tier::Participant));
        assert!(has_permission(Role::Host, Tier::Participant));
    }

    #[test]
    fn test_screenshare_and_host_tiers() {
        assert!(!has_permission(Role::Participant, Tier::Screenshare));
        assert!(has_permission(Role::Screenshare, Tier::Screenshare));
        assert!(has_permission(Role::Host, Tier::Screenshare));

        assert!(!has_permission(Role::Screenshare, Tier::Host));
        assert!(has_permission(Role::Host, Tier::Host));
    }

    #[test]
    fn test_permits_agrees_with_role_sets() {
        for tier in ALL_TIERS {
            for role in ALL_ROLES {
                assert_eq!(
                    tier.permits(role),
                    tier.roles().contains(&role),
                    "tier {tier:?} disagrees with its role set for {role:?}"
                );
            }
        }
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Screenshare).unwrap(), "\"screenshare\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"host\"").unwrap(),
            Role::Host
        );
        assert_eq!(Role::Waiting.to_string(), "waiting");
    }
}
