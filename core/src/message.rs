use crate::{
    level::Progress,
    outcome::{IrregularResult, MatchCategory, MatchId, PlayerId, PlayerOutcome, Side},
};
use serde::{Deserialize, Serialize};

/// A player's current rating and lifetime counters.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PlayerRating {
    pub player_id: PlayerId,
    pub rating: f64,
    pub matches_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub level: u8,
    pub xp: f64,
    pub updated_at: Option<String>,
}

impl PlayerRating {
    /// The row a player starts with before their first scored match.
    pub fn unrated(player_id: PlayerId, rating: f64) -> Self {
        let Progress { level, xp } = crate::level::progress(rating);
        Self {
            player_id,
            rating,
            matches_played: 0,
            wins: 0,
            losses: 0,
            draws: 0,
            level,
            xp,
            updated_at: None,
        }
    }
}

/// The stored score and team composition of one match.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct MatchResult {
    pub id: i64,
    pub match_id: MatchId,
    pub match_category: MatchCategory,
    pub team_a: Vec<PlayerId>,
    pub team_b: Vec<PlayerId>,
    pub team_a_score: Option<u32>,
    pub team_b_score: Option<u32>,
    pub winner: Option<Side>,
    pub score_description: String,
    pub irregular_result: IrregularResult,
    pub recorded_by: PlayerId,
    /// 1 when first scored, incremented by every correction.
    pub revision: u32,
    pub recorded_at: String,
}

impl MatchResult {
    pub fn is_corrected(&self) -> bool {
        self.revision > 1
    }
}

/// One ledger row: the change a match result applied to one player.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct MatchRatingEffect {
    pub match_result_id: i64,
    pub player_id: PlayerId,
    pub team: Side,
    pub outcome: PlayerOutcome,
    pub rating_before: f64,
    pub rating_after: f64,
    pub rating_change: f64,
    pub created_at: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct HistoryEntry {
    pub id: i64,
    pub player_id: PlayerId,
    pub match_id: MatchId,
    pub rating_before: f64,
    pub rating_after: f64,
    pub rating_change: f64,
    /// Whether this entry was written while correcting an earlier result for the match.
    pub correction: bool,
    pub created_at: String,
}

/// The effect of scoring a match on one player, as reported back to callers.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RatingChange {
    pub player_id: PlayerId,
    pub team: Side,
    pub outcome: PlayerOutcome,
    pub rating_before: f64,
    pub rating_after: f64,
    pub delta: f64,
    pub level: u8,
    pub xp: f64,
}

/// Everything that changed when a match was scored.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Scored {
    pub match_result_id: i64,
    pub match_id: MatchId,
    /// Whether an earlier result for the match was reversed first.
    pub corrected: bool,
    pub changes: Vec<RatingChange>,
}

impl Scored {
    pub fn change_for(&self, player: &PlayerId) -> Option<&RatingChange> {
        self.changes.iter().find(|c| &c.player_id == player)
    }
}

/// Ask the scheduling boundary to accept a match and its participants.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegisterMatch {
    pub match_id: MatchId,
    pub participants: Vec<PlayerId>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Recompute {
    pub match_id: MatchId,
}

/// Request for the external badge evaluator.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct BadgeEvaluation {
    pub match_result_id: i64,
    pub player_ids: Vec<PlayerId>,
}

/// Event handed to the notification dispatcher once a result is committed.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ResultRecorded {
    pub match_id: MatchId,
    pub summary: String,
}

/// An outbound signal, as queued in the outbox.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    BadgeEvaluation(BadgeEvaluation),
    ResultRecorded(ResultRecorded),
}

impl Signal {
    /// Name of the collaborator the signal is meant for.
    pub fn collaborator(&self) -> &'static str {
        match self {
            Self::BadgeEvaluation(_) => "badge evaluator",
            Self::ResultRecorded(_) => "notification dispatcher",
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ErrorReport {
    pub error: String,
    pub retryable: bool,
}
