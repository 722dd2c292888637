/// Frontier entry state definitions
///
/// This module defines every state a frontier entry can be in, and the
/// transitions between them that the engine is allowed to make.
use std::fmt;

/// Represents the current state of a frontier entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrontierState {
    // ===== Active States =====
    /// Newly inserted, waiting to be processed
    Discovered,

    /// Depth-0 entry whose probe chain is running (or was interrupted)
    Probing,

    // ===== Classified States =====
    /// Worth exploring further but not itself a listing
    SeedExplored,

    /// Lists job postings with confidence at or above the acceptance threshold
    TargetConfirmed,

    /// Lists job postings, but with confidence below the acceptance threshold
    TargetProvisional,

    // ===== Terminal States =====
    /// Probe chain could not locate a career root
    NoCareerPageFound,

    /// Not a target and has no outbound links
    DeadEnd,

    /// Permanent fetch failure before the entry was ever classified
    Invalid,

    /// A former target that no longer lists job postings
    TargetRevoked,

    /// A former target that can no longer be fetched
    TargetBroken,
}

impl FrontierState {
    /// Returns true for states the ordinary crawl pass never touches again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NoCareerPageFound
                | Self::DeadEnd
                | Self::Invalid
                | Self::TargetRevoked
                | Self::TargetBroken
        )
    }

    /// Returns true if the entry may be picked up as crawl work
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Discovered | Self::Probing)
    }

    /// Returns true for the states downstream consumers treat as targets
    pub fn is_target(&self) -> bool {
        matches!(self, Self::TargetConfirmed | Self::TargetProvisional)
    }

    /// Checks whether an ordinary transition from `self` to `to` is allowed
    ///
    /// Staying in the same state is allowed for active and target states; a
    /// revalidated target refreshes `last_checked_at` this way. Moving back to
    /// `Discovered` is never an ordinary transition; see [`can_retrigger`].
    ///
    /// [`can_retrigger`]: FrontierState::can_retrigger
    pub fn can_transition_to(&self, to: FrontierState) -> bool {
        use FrontierState::*;

        match (self, to) {
            (Discovered, Probing) => true,
            (
                Discovered,
                SeedExplored | TargetConfirmed | TargetProvisional | DeadEnd | Invalid,
            ) => true,
            (Probing, SeedExplored | NoCareerPageFound) => true,
            (
                TargetConfirmed | TargetProvisional,
                TargetConfirmed | TargetProvisional | TargetRevoked | TargetBroken,
            ) => true,
            (from, to) => *from == to && from.is_active(),
        }
    }

    /// Checks whether an explicit external re-trigger may reset this state
    ///
    /// Terminal states may always be re-armed. A depth-0 `SeedExplored` entry
    /// may be re-armed to force rediscovery of the career root.
    pub fn can_retrigger(&self, depth: u32) -> bool {
        self.is_terminal() || (depth == 0 && *self == Self::SeedExplored)
    }

    /// Converts the state to its database representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Probing => "probing",
            Self::SeedExplored => "seed_explored",
            Self::TargetConfirmed => "target_confirmed",
            Self::TargetProvisional => "target_provisional",
            Self::NoCareerPageFound => "no_career_page_found",
            Self::DeadEnd => "dead_end",
            Self::Invalid => "invalid",
            Self::TargetRevoked => "target_revoked",
            Self::TargetBroken => "target_broken",
        }
    }

    /// Parses a state from its database representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(Self::Discovered),
            "probing" => Some(Self::Probing),
            "seed_explored" => Some(Self::SeedExplored),
            "target_confirmed" => Some(Self::TargetConfirmed),
            "target_provisional" => Some(Self::TargetProvisional),
            "no_career_page_found" => Some(Self::NoCareerPageFound),
            "dead_end" => Some(Self::DeadEnd),
            "invalid" => Some(Self::Invalid),
            "target_revoked" => Some(Self::TargetRevoked),
            "target_broken" => Some(Self::TargetBroken),
            _ => None,
        }
    }

    /// Returns all possible states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Discovered,
            Self::Probing,
            Self::SeedExplored,
            Self::TargetConfirmed,
            Self::TargetProvisional,
            Self::NoCareerPageFound,
            Self::DeadEnd,
            Self::Invalid,
            Self::TargetRevoked,
            Self::TargetBroken,
        ]
    }
}

impl fmt::Display for FrontierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
