use crate::error::{Error, Result};
use derive_more::{Display, From, FromStr, Into};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identifier of the externally scheduled match a result belongs to.
#[derive(
    Clone, Copy, Deserialize, Serialize, Debug, Display, From, FromStr, Into, PartialEq, Eq, Hash,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct MatchId(i64);

#[derive(
    Clone,
    Deserialize,
    Serialize,
    Debug,
    Display,
    From,
    FromStr,
    Into,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct PlayerId(String);

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl PlayerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, Display, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum Side {
    #[display("A")]
    A,
    #[display("B")]
    B,
}

impl Side {
    pub fn opponent(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "A" | "a" => Ok(Self::A),
            "B" | "b" => Ok(Self::B),
            _ => Err(Error::Validation(format!("unknown team {s}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Display, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchCategory {
    #[display("ranked")]
    Ranked,
    #[display("friendly")]
    Friendly,
    #[display("tournament")]
    Tournament,
}

impl FromStr for MatchCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ranked" => Ok(Self::Ranked),
            "friendly" => Ok(Self::Friendly),
            "tournament" => Ok(Self::Tournament),
            _ => Err(Error::Validation(format!("unknown match category {s}"))),
        }
    }
}

/// How a match ended, when it did not end by being played out.
#[derive(Clone, Copy, Debug, Display, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IrregularResult {
    #[display("normal")]
    Normal,
    #[display("walkover")]
    Walkover,
    #[display("retirement")]
    Retirement,
    #[display("interrupted")]
    Interrupted,
}

impl FromStr for IrregularResult {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(Self::Normal),
            "walkover" => Ok(Self::Walkover),
            "retirement" => Ok(Self::Retirement),
            "interrupted" => Ok(Self::Interrupted),
            _ => Err(Error::Validation(format!("unknown irregular result {s}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Display, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlayerOutcome {
    #[display("win")]
    Win,
    #[display("loss")]
    Loss,
    #[display("draw")]
    Draw,
}

impl PlayerOutcome {
    /// The outcome for a player on `side`, given the match winner.
    pub fn for_side(side: Side, winner: Option<Side>) -> Self {
        match winner {
            Some(winner) if winner == side => Self::Win,
            Some(_) => Self::Loss,
            None => Self::Draw,
        }
    }

    /// Whether this outcome counts as a win when computing a rating delta.
    ///
    /// Draws are scored exactly like losses for both sides.
    pub fn scored_as_win(self) -> bool {
        matches!(self, Self::Win)
    }
}

impl FromStr for PlayerOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "win" => Ok(Self::Win),
            "loss" => Ok(Self::Loss),
            "draw" => Ok(Self::Draw),
            _ => Err(Error::Validation(format!("unknown outcome {s}"))),
        }
    }
}

/// Sets won on each side of a score description like `6-4,6-3` or `7-6(5) 6-4`.
///
/// `first` counts sets where the first number is higher. Descriptions are written from the
/// winner's point of view, or from team A's when there is no winner.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SetScore {
    pub first: u32,
    pub second: u32,
}

impl SetScore {
    /// Parse a free-text score description, if it is a list of set scores.
    pub fn parse(description: &str) -> Option<Self> {
        let sets = description
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|set| !set.is_empty())
            .map(|set| {
                // Drop tiebreak detail such as the "(5)" in "7-6(5)".
                let set = set.split('(').next().unwrap_or(set);
                let (a, b) = set.split_once('-')?;
                Some((a.trim().parse::<u32>().ok()?, b.trim().parse::<u32>().ok()?))
            })
            .collect::<Option<Vec<_>>>()?;
        if sets.is_empty() {
            return None;
        }

        let mut score = Self {
            first: 0,
            second: 0,
        };
        for (a, b) in sets {
            if a > b {
                score.first += 1;
            } else if b > a {
                score.second += 1;
            }
        }
        Some(score)
    }
}

/// Number of player slots each team has in a stored result.
pub const TEAM_SLOTS: usize = 2;

/// A finished match's score and team composition, as submitted for rating.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Submission {
    pub match_id: MatchId,
    pub team_a: Vec<PlayerId>,
    pub team_b: Vec<PlayerId>,
    pub score_description: String,
    pub winner: Option<Side>,
    pub match_category: MatchCategory,
    pub irregular_result: IrregularResult,
    pub submitted_by: PlayerId,
}

impl Submission {
    pub fn team(&self, side: Side) -> &[PlayerId] {
        match side {
            Side::A => &self.team_a,
            Side::B => &self.team_b,
        }
    }

    /// Every player in the match, paired with their side. Team A comes first.
    pub fn players(&self) -> impl Iterator<Item = (Side, &PlayerId)> {
        self.team_a
            .iter()
            .map(|p| (Side::A, p))
            .chain(self.team_b.iter().map(|p| (Side::B, p)))
    }

    /// Sets won by team A and team B, if the score description lists set scores.
    pub fn team_scores(&self) -> Option<(u32, u32)> {
        let score = SetScore::parse(&self.score_description)?;
        Some(match self.winner {
            Some(Side::B) => (score.second, score.first),
            _ => (score.first, score.second),
        })
    }

    /// Check the shape of the submission without consulting any stored state.
    pub fn validate(&self) -> Result<()> {
        for side in [Side::A, Side::B] {
            let team = self.team(side);
            if team.is_empty() {
                return Err(Error::Validation(format!("team {side} has no players")));
            }
            if team.len() > TEAM_SLOTS {
                return Err(Error::Validation(format!(
                    "team {side} has {} players, at most {TEAM_SLOTS} are allowed",
                    team.len()
                )));
            }
        }
        if let Some((_, player)) = self.players().find(|(_, p)| p.as_str().trim().is_empty()) {
            return Err(Error::Validation(format!("blank player id {player:?}")));
        }

        let mut seen = HashSet::new();
        if let Some((_, dup)) = self.players().find(|(_, p)| !seen.insert(*p)) {
            return Err(Error::Validation(format!(
                "player {dup} appears more than once"
            )));
        }

        if !seen.contains(&self.submitted_by) {
            return Err(Error::Validation(format!(
                "submitter {} did not play in match {}",
                self.submitted_by, self.match_id
            )));
        }
        Ok(())
    }

    /// The players of one team, joined for log lines and summaries.
    pub fn roster(&self, side: Side) -> String {
        self.team(side).iter().join(" & ")
    }

    /// One-line, human-readable account of the result.
    pub fn summary(&self) -> String {
        let a = self.roster(Side::A);
        let b = self.roster(Side::B);
        let score = &self.score_description;
        let line = match self.winner {
            Some(Side::A) => format!("{a} beat {b} {score}"),
            Some(Side::B) => format!("{b} beat {a} {score}"),
            None => format!("{a} drew with {b} {score}"),
        };
        match self.irregular_result {
            IrregularResult::Normal => line,
            irregular => format!("{line} ({irregular})"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn submission() -> Submission {
        Submission {
            match_id: 1.into(),
            team_a: vec!["ana".into(), "bea".into()],
            team_b: vec!["carl".into(), "dani".into()],
            score_description: "6-4,6-3".into(),
            winner: Some(Side::A),
            match_category: MatchCategory::Ranked,
            irregular_result: IrregularResult::Normal,
            submitted_by: "ana".into(),
        }
    }

    #[test]
    fn parses_set_scores() {
        assert_eq!(
            SetScore::parse("6-4,6-3"),
            Some(SetScore {
                first: 2,
                second: 0
            })
        );
        assert_eq!(
            SetScore::parse("4-6 7-6(5) 10-8"),
            Some(SetScore {
                first: 2,
                second: 1
            })
        );
        assert_eq!(SetScore::parse("W/O"), None);
        assert_eq!(SetScore::parse(""), None);
    }

    #[test]
    fn team_scores_follow_the_winner() {
        let mut s = submission();
        assert_eq!(s.team_scores(), Some((2, 0)));

        s.winner = Some(Side::B);
        assert_eq!(s.team_scores(), Some((0, 2)));

        s.winner = None;
        s.score_description = "6-4 4-6".into();
        assert_eq!(s.team_scores(), Some((1, 1)));

        s.score_description = "abandoned, rain".into();
        assert_eq!(s.team_scores(), None);
    }

    #[test]
    fn outcome_for_side() {
        assert_eq!(
            PlayerOutcome::for_side(Side::A, Some(Side::A)),
            PlayerOutcome::Win
        );
        assert_eq!(
            PlayerOutcome::for_side(Side::B, Some(Side::A)),
            PlayerOutcome::Loss
        );
        assert_eq!(PlayerOutcome::for_side(Side::B, None), PlayerOutcome::Draw);
        assert!(!PlayerOutcome::Draw.scored_as_win());
    }

    #[test]
    fn accepts_well_formed_submission() {
        submission().validate().unwrap();
    }

    #[test]
    fn rejects_empty_team() {
        let mut s = submission();
        s.team_b.clear();
        assert!(matches!(s.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_oversized_team() {
        let mut s = submission();
        s.team_a.push("eve".into());
        assert!(matches!(s.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_duplicate_player() {
        let mut s = submission();
        s.team_b[0] = "ana".into();
        assert!(matches!(s.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_outside_submitter() {
        let mut s = submission();
        s.submitted_by = "zoe".into();
        assert!(matches!(s.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn summaries() {
        assert_eq!(submission().summary(), "ana & bea beat carl & dani 6-4,6-3");

        let mut s = submission();
        s.winner = Some(Side::B);
        s.score_description = "W/O".into();
        s.irregular_result = IrregularResult::Walkover;
        assert_eq!(s.summary(), "carl & dani beat ana & bea W/O (walkover)");

        s.winner = None;
        s.score_description = "6-4,3-6".into();
        s.irregular_result = IrregularResult::Interrupted;
        assert_eq!(
            s.summary(),
            "ana & bea drew with carl & dani 6-4,3-6 (interrupted)"
        );
    }

    #[test]
    fn wire_format() {
        let json = serde_json::to_value(submission()).unwrap();
        assert_eq!(json["winner"], "A");
        assert_eq!(json["match_category"], "ranked");
        assert_eq!(json["irregular_result"], "normal");
        assert_eq!(json["team_a"][1], "bea");

        let parsed: Submission = serde_json::from_value(serde_json::json!({
            "match_id": 9,
            "team_a": ["a"],
            "team_b": ["b"],
            "score_description": "6-6",
            "winner": null,
            "match_category": "friendly",
            "irregular_result": "interrupted",
            "submitted_by": "b",
        }))
        .unwrap();
        assert_eq!(parsed.winner, None);
        assert_eq!(parsed.match_category, MatchCategory::Friendly);
        parsed.validate().unwrap();
    }
}
