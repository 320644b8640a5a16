use crate::{
    error::{Error, Result},
    outcome::{IrregularResult, MatchCategory},
};
use serde::{Deserialize, Serialize};

pub const RATING_MIN: f64 = 0.0;
pub const RATING_MAX: f64 = 100.0;

/// Rating given to a player the first time they are scored.
pub const DEFAULT_RATING: f64 = 50.0;

/// Rating difference at which the stronger team's expected odds are ten to one.
pub const EXPECTATION_SCALE: f64 = 25.0;

/// The K-factor used when none is configured: a 6 point swing between evenly matched teams.
pub const DEFAULT_K_FACTOR: f64 = 12.0;

pub const TOURNAMENT_MULTIPLIER: f64 = 1.2;

/// Applied to walkovers and retirements.
pub const IRREGULAR_DAMPENING: f64 = 0.7;

/// Tunable parameters of the rating system.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct RatingConfig {
    /// Maximum rating change a single ranked match can cause before modifiers.
    pub k_factor: f64,
}

impl RatingConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.k_factor.is_finite() || self.k_factor <= 0.0 {
            return Err(Error::Validation(format!(
                "K-factor must be a positive number, got {}",
                self.k_factor
            )));
        }
        Ok(())
    }
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            k_factor: DEFAULT_K_FACTOR,
        }
    }
}

/// Round to the two decimal places ratings and deltas are stored with.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Keep a rating inside the rating domain.
pub fn clamp(rating: f64) -> f64 {
    if rating.is_nan() {
        RATING_MIN
    } else {
        rating.clamp(RATING_MIN, RATING_MAX)
    }
}

/// The probability that a team rated `rating` beats a team rated `opponent`.
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    let expected = 1.0 / (1.0 + 10f64.powf((opponent - rating) / EXPECTATION_SCALE));
    expected.clamp(0.0, 1.0)
}

/// The mean rating of a team, or `None` for a team with no members.
pub fn team_average(ratings: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = ratings
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), r| (sum + r, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// The signed rating adjustment for every member of a team, rounded to two decimals.
///
/// `team` and `opponent` must both be taken from the same pre-match snapshot, so that the deltas
/// computed for the two sides mirror each other.
pub fn delta(
    config: &RatingConfig,
    team: f64,
    opponent: f64,
    won: bool,
    category: MatchCategory,
    irregular: IrregularResult,
) -> f64 {
    let category_multiplier = match category {
        MatchCategory::Friendly => return 0.0,
        MatchCategory::Ranked => 1.0,
        MatchCategory::Tournament => TOURNAMENT_MULTIPLIER,
    };
    let irregular_multiplier = match irregular {
        IrregularResult::Interrupted => return 0.0,
        IrregularResult::Normal => 1.0,
        IrregularResult::Walkover | IrregularResult::Retirement => IRREGULAR_DAMPENING,
    };

    let actual = if won { 1.0 } else { 0.0 };
    let base = config.k_factor * (actual - expected_score(team, opponent));
    round2(base * category_multiplier * irregular_multiplier)
}
