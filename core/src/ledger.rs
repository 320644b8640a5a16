//! Planning a rating update against the effect ledger.
//!
//! Scoring a match is split into a pure planning step, here, and a persistence step in
//! [`crate::db`]. Planning takes the players' stored ratings and whatever effect rows an earlier
//! result for the same match left behind, backs those effects out, and recomputes every player's
//! rating from the resulting basis.
//!
//! Reversal subtracts the recorded change from the player's *current* rating. That is only the
//! rating the player would have had without the earlier result if no other match of theirs was
//! scored in between; corrections that straddle other matches are approximate.

use crate::{
    error::{Error, Result},
    level,
    message::{MatchRatingEffect, PlayerRating, RatingChange},
    outcome::{PlayerId, PlayerOutcome, Side, Submission},
    rating::{self, clamp, round2, RatingConfig},
};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    /// Updated rows for every player touched, including players only present in reversed effects.
    pub ratings: Vec<PlayerRating>,
    /// The change applied to each player in the submission, in team order.
    pub changes: Vec<RatingChange>,
}

/// Compute the ratings that result from applying `submission` after backing out `prior`.
///
/// `current` must hold a row for every player in the submission and in `prior`.
pub fn plan(
    config: &RatingConfig,
    submission: &Submission,
    mut current: BTreeMap<PlayerId, PlayerRating>,
    prior: &[MatchRatingEffect],
) -> Result<Plan> {
    for effect in prior {
        let row = row_mut(&mut current, &effect.player_id)?;
        row.rating = clamp(round2(row.rating - effect.rating_change));
        row.matches_played = row.matches_played.saturating_sub(1);
        let counter = match effect.outcome {
            PlayerOutcome::Win => &mut row.wins,
            PlayerOutcome::Loss => &mut row.losses,
            PlayerOutcome::Draw => &mut row.draws,
        };
        *counter = counter.saturating_sub(1);
    }

    // Snapshot both averages before any delta is applied.
    let average = |side: Side| -> Result<f64> {
        let ratings = submission
            .team(side)
            .iter()
            .map(|p| row(&current, p).map(|r| r.rating))
            .collect::<Result<Vec<_>>>()?;
        rating::team_average(ratings)
            .ok_or_else(|| Error::Validation(format!("team {side} has no players")))
    };
    let a = average(Side::A)?;
    let b = average(Side::B)?;

    let mut changes = Vec::with_capacity(submission.team_a.len() + submission.team_b.len());
    for (side, player) in submission.players() {
        let (team, opponent) = match side {
            Side::A => (a, b),
            Side::B => (b, a),
        };
        let outcome = PlayerOutcome::for_side(side, submission.winner);
        let delta = rating::delta(
            config,
            team,
            opponent,
            outcome.scored_as_win(),
            submission.match_category,
            submission.irregular_result,
        );

        let row = row_mut(&mut current, player)?;
        let before = row.rating;
        let after = round2(clamp(before + delta));
        row.rating = after;
        row.matches_played += 1;
        match outcome {
            PlayerOutcome::Win => row.wins += 1,
            PlayerOutcome::Loss => row.losses += 1,
            PlayerOutcome::Draw => row.draws += 1,
        }

        let progress = level::progress(after);
        changes.push(RatingChange {
            player_id: player.clone(),
            team: side,
            outcome,
            rating_before: before,
            rating_after: after,
            delta: round2(after - before),
            level: progress.level,
            xp: progress.xp,
        });
    }

    let ratings = current
        .into_values()
        .map(|mut row| {
            let progress = level::progress(row.rating);
            row.level = progress.level;
            row.xp = progress.xp;
            row
        })
        .collect();
    Ok(Plan { ratings, changes })
}

fn row<'a>(
    ratings: &'a BTreeMap<PlayerId, PlayerRating>,
    player: &PlayerId,
) -> Result<&'a PlayerRating> {
    ratings
        .get(player)
        .ok_or_else(|| Error::NotFound(format!("rating for player {player}")))
}

fn row_mut<'a>(
    ratings: &'a mut BTreeMap<PlayerId, PlayerRating>,
    player: &PlayerId,
) -> Result<&'a mut PlayerRating> {
    ratings
        .get_mut(player)
        .ok_or_else(|| Error::NotFound(format!("rating for player {player}")))
}
