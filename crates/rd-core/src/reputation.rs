//! Karma → reputation level mapping.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReputationLevel {
    NewUser,
    Regular,
    EstablishedMember,
    TrustedContributor,
    Expert,
    CommunityLeader,
    Legend,
}

/// Ascending `(minimum karma, level)` table.
pub const THRESHOLDS: [(i64, ReputationLevel); 7] = [
    (0, ReputationLevel::NewUser),
    (100, ReputationLevel::Regular),
    (500, ReputationLevel::EstablishedMember),
    (1000, ReputationLevel::TrustedContributor),
    (2500, ReputationLevel::Expert),
    (5000, ReputationLevel::CommunityLeader),
    (10000, ReputationLevel::Legend),
];

/// Label shown for viewers who are not signed in.
pub const GUEST_LABEL: &str = "Guest";

impl ReputationLevel {
    /// Highest level whose threshold is at or below `karma`. Negative karma
    /// stays at the bottom level.
    pub fn for_karma(karma: i64) -> Self {
        THRESHOLDS
            .iter()
            .rev()
            .find(|(min, _)| *min <= karma)
            .map_or(ReputationLevel::NewUser, |(_, level)| *level)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReputationLevel::NewUser => "New User",
            ReputationLevel::Regular => "Regular",
            ReputationLevel::EstablishedMember => "Established Member",
            ReputationLevel::TrustedContributor => "Trusted Contributor",
            ReputationLevel::Expert => "Expert",
            ReputationLevel::CommunityLeader => "Community Leader",
            ReputationLevel::Legend => "Legend",
        }
    }

    pub fn threshold(&self) -> i64 {
        THRESHOLDS[self.index()].0
    }

    pub fn next(&self) -> Option<Self> {
        THRESHOLDS.get(self.index() + 1).map(|(_, level)| *level)
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for ReputationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn reputation_level(karma: i64) -> &'static str {
    ReputationLevel::for_karma(karma).name()
}

/// Percentage of the way from the current level's threshold to the next one,
/// clamped to `[0, 100]`. The top level is always 100.
pub fn reputation_progress(karma: i64) -> f64 {
    let level = ReputationLevel::for_karma(karma);
    let Some(next) = level.next() else {
        return 100.0;
    };
    let current = level.threshold();
    let span = (next.threshold() - current) as f64;
    (((karma - current) as f64 / span) * 100.0).clamp(0.0, 100.0)
}

/// What a profile badge shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reputation {
    pub karma: i64,
    pub level: String,
    pub progress: f64,
}

impl Reputation {
    pub fn for_karma(karma: i64) -> Self {
        Self {
            karma,
            level: reputation_level(karma).to_string(),
            progress: reputation_progress(karma),
        }
    }

    pub fn guest() -> Self {
        Self {
            karma: 0,
            level: GUEST_LABEL.to_string(),
            progress: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_thresholds() {
        assert_eq!(reputation_level(-5), "New User");
        assert_eq!(reputation_level(0), "New User");
        assert_eq!(reputation_level(99), "New User");
        assert_eq!(reputation_level(100), "Regular");
        assert_eq!(reputation_level(999), "Established Member");
        assert_eq!(reputation_level(1000), "Trusted Contributor");
        assert_eq!(reputation_level(2500), "Expert");
        assert_eq!(reputation_level(9999), "Community Leader");
        assert_eq!(reputation_level(10000), "Legend");
        assert_eq!(reputation_level(1_000_000), "Legend");
    }

    #[test]
    fn progress_is_relative_to_the_current_band() {
        assert_eq!(reputation_progress(0), 0.0);
        assert_eq!(reputation_progress(50), 50.0);
        assert_eq!(reputation_progress(300), 50.0);
        assert_eq!(reputation_progress(1750), 50.0);
    }

    #[test]
    fn progress_clamps_and_tops_out() {
        assert_eq!(reputation_progress(-40), 0.0);
        assert_eq!(reputation_progress(10000), 100.0);
        assert_eq!(reputation_progress(25000), 100.0);
    }

    #[test]
    fn next_level_walks_the_table() {
        assert_eq!(ReputationLevel::NewUser.next(), Some(ReputationLevel::Regular));
        assert_eq!(ReputationLevel::Legend.next(), None);
        assert_eq!(ReputationLevel::Expert.threshold(), 2500);
    }

    #[test]
    fn guests_have_no_progress() {
        let guest = Reputation::guest();
        assert_eq!(guest.level, "Guest");
        assert_eq!(guest.progress, 0.0);
    }
}
