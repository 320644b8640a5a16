use crate::{
    error::{Error, Result},
    ledger,
    message::{
        BadgeEvaluation, HistoryEntry, MatchRatingEffect, MatchResult, PlayerRating,
        ResultRecorded, Scored, Signal,
    },
    outcome::{MatchId, PlayerId, Side, Submission},
    rating::{round2, RatingConfig, DEFAULT_RATING},
};
use futures::stream::{Stream, StreamExt};
use itertools::Itertools;
use sqlx::{
    migrate, query, query_as,
    sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection},
    ConnectOptions, Connection, FromRow, Transaction,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    str::FromStr,
};

#[derive(Debug)]
pub struct Db {
    conn: SqliteConnection,
}

/// A signal written to the outbox, waiting to be delivered.
#[derive(Clone, Debug, PartialEq)]
pub struct Queued {
    pub id: i64,
    pub signal: Signal,
    pub attempts: u32,
}

impl Db {
    pub async fn open(path: &Path) -> Result<Self> {
        Self::new(
            SqliteConnectOptions::default()
                .filename(path)
                .create_if_missing(true),
        )
        .await
    }

    pub async fn memory() -> Result<Self> {
        Self::new(Default::default()).await
    }

    async fn new(opt: SqliteConnectOptions) -> Result<Self> {
        let mut conn = opt.connect().await?;
        migrate!("db/migrations")
            .run(&mut conn)
            .await
            .map_err(|err| sqlx::Error::Migrate(Box::new(err)))?;
        Ok(Self { conn })
    }

    /// Accept a match and the players allowed to appear in its result.
    ///
    /// Re-registering a match that has not been completed replaces its participants.
    pub async fn register_match(&mut self, id: MatchId, participants: &[PlayerId]) -> Result<()> {
        if participants.is_empty() {
            return Err(Error::Validation(format!("match {id} has no participants")));
        }

        let mut tx = self.conn.begin().await?;
        let status: Option<(String,)> =
            query_as("SELECT status FROM scheduled_match WHERE id = $1 LIMIT 1")
                .bind(i64::from(id))
                .fetch_optional(tx.as_mut())
                .await?;
        if matches!(&status, Some((status,)) if status == "completed") {
            return Err(Error::Validation(format!(
                "match {id} is already completed, its participants are fixed"
            )));
        }

        query("INSERT OR IGNORE INTO scheduled_match (id) VALUES ($1)")
            .bind(i64::from(id))
            .execute(tx.as_mut())
            .await?;
        query("DELETE FROM scheduled_match_player WHERE match_id = $1")
            .bind(i64::from(id))
            .execute(tx.as_mut())
            .await?;
        for player in participants {
            query("INSERT OR IGNORE INTO scheduled_match_player (match_id, player_id) VALUES ($1, $2)")
                .bind(i64::from(id))
                .bind(player.as_str())
                .execute(tx.as_mut())
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(%id, participants = participants.len(), "registered match");
        Ok(())
    }

    /// Score a match, reversing any earlier result recorded for it, as one transaction.
    ///
    /// On success the result, ledger, ratings, history and completion flag are all committed
    /// together with the outbound signals for the result. On error nothing is written.
    pub async fn score_match(
        &mut self,
        submission: &Submission,
        config: &RatingConfig,
    ) -> Result<(Scored, Vec<Queued>)> {
        let id = submission.match_id;
        let mut tx = self.conn.begin().await?;

        check_roster(&mut tx, submission).await?;

        let existing = result_id(tx.as_mut(), id).await?;
        let prior = match existing {
            Some(result_id) => effects(tx.as_mut(), result_id).await?,
            None => vec![],
        };
        let corrected = existing.is_some();

        // Load everyone whose rating this result touches, creating first-timers.
        let players: BTreeSet<PlayerId> = submission
            .players()
            .map(|(_, p)| p.clone())
            .chain(prior.iter().map(|e| e.player_id.clone()))
            .collect();
        let mut current = BTreeMap::new();
        for player in players {
            let rating = get_rating(&mut tx, &player).await?;
            current.insert(player, rating);
        }

        let plan = ledger::plan(config, submission, current.clone(), &prior)?;

        let result_id = upsert_result(&mut tx, submission).await?;
        query("DELETE FROM match_rating_effect WHERE match_result_id = $1")
            .bind(result_id)
            .execute(tx.as_mut())
            .await?;
        for change in &plan.changes {
            query(
                "INSERT INTO match_rating_effect
                    (match_result_id, player_id, team, outcome, rating_before, rating_after, rating_change)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(result_id)
            .bind(change.player_id.as_str())
            .bind(change.team.to_string())
            .bind(change.outcome.to_string())
            .bind(change.rating_before)
            .bind(change.rating_after)
            .bind(change.delta)
            .execute(tx.as_mut())
            .await?;
        }

        for row in &plan.ratings {
            set_rating(&mut tx, row).await?;

            let (before, after) = match plan.changes.iter().find(|c| c.player_id == row.player_id) {
                Some(change) => (change.rating_before, change.rating_after),
                // Only present in the reversed result.
                None => (
                    current.get(&row.player_id).map_or(row.rating, |r| r.rating),
                    row.rating,
                ),
            };
            query(
                "INSERT INTO rating_history
                    (player_id, match_id, rating_before, rating_after, rating_change, correction)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(row.player_id.as_str())
            .bind(i64::from(id))
            .bind(before)
            .bind(after)
            .bind(round2(after - before))
            .bind(corrected)
            .execute(tx.as_mut())
            .await?;
        }

        query("UPDATE scheduled_match SET status = 'completed' WHERE id = $1")
            .bind(i64::from(id))
            .execute(tx.as_mut())
            .await?;

        let signals = [
            Signal::BadgeEvaluation(BadgeEvaluation {
                match_result_id: result_id,
                player_ids: submission.players().map(|(_, p)| p.clone()).collect(),
            }),
            Signal::ResultRecorded(ResultRecorded {
                match_id: id,
                summary: submission.summary(),
            }),
        ];
        let mut queued = Vec::with_capacity(signals.len());
        for signal in signals {
            queued.push(enqueue(&mut tx, signal).await?);
        }

        tx.commit().await?;

        tracing::debug!(%id, result_id, corrected, "scored match");
        Ok((
            Scored {
                match_result_id: result_id,
                match_id: id,
                corrected,
                changes: plan.changes,
            },
            queued,
        ))
    }

    /// Rebuild the submission a stored result was recorded from.
    pub async fn stored_submission(&mut self, id: MatchId) -> Result<Submission> {
        let result = self
            .match_result(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("result for match {id}")))?;
        Ok(Submission {
            match_id: result.match_id,
            team_a: result.team_a,
            team_b: result.team_b,
            score_description: result.score_description,
            winner: result.winner,
            match_category: result.match_category,
            irregular_result: result.irregular_result,
            submitted_by: result.recorded_by,
        })
    }

    pub async fn match_result(&mut self, id: MatchId) -> Result<Option<MatchResult>> {
        let row: Option<ResultRow> = query_as(
            "SELECT id, match_id, category, team_a_player1, team_a_player2, team_b_player1,
                    team_b_player2, team_a_score, team_b_score, winner, score_description,
                    irregular_result, recorded_by, revision, recorded_at
             FROM match_result WHERE match_id = $1 LIMIT 1",
        )
        .bind(i64::from(id))
        .fetch_optional(&mut self.conn)
        .await?;
        row.map(MatchResult::try_from).transpose()
    }

    /// The effect ledger of the result recorded for a match.
    pub async fn match_effects(&mut self, id: MatchId) -> Result<Vec<MatchRatingEffect>> {
        let Some(result_id) = result_id(&mut self.conn, id).await? else {
            return Err(Error::NotFound(format!("result for match {id}")));
        };
        effects(&mut self.conn, result_id).await
    }

    pub async fn player(&mut self, id: &PlayerId) -> Result<Option<PlayerRating>> {
        let row: Option<PlayerRow> = query_as(&format!(
            "SELECT {PLAYER_COLUMNS} FROM player_rating WHERE player_id = $1 LIMIT 1"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut self.conn)
        .await?;
        Ok(row.map(player_rating))
    }

    /// The highest rated players, best first.
    pub async fn leaderboard(&mut self, limit: u32) -> Result<Vec<PlayerRating>> {
        let rows: Vec<PlayerRow> = query_as(&format!(
            "SELECT {PLAYER_COLUMNS} FROM player_rating ORDER BY rating DESC, player_id LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&mut self.conn)
        .await?;
        Ok(rows.into_iter().map(player_rating).collect())
    }

    /// Every rating change recorded for a player, newest first.
    pub fn history(&mut self, player: PlayerId) -> impl '_ + Stream<Item = Result<HistoryEntry>> {
        query_as::<_, HistoryRow>(
            "SELECT id, player_id, match_id, rating_before, rating_after, rating_change, correction, created_at
             FROM rating_history WHERE player_id = $1 ORDER BY id DESC",
        )
        .bind(player.to_string())
        .fetch(&mut self.conn)
        .map(|res| -> Result<HistoryEntry> {
            let (id, player_id, match_id, rating_before, rating_after, rating_change, correction, created_at) =
                res?;
            Ok(HistoryEntry {
                id,
                player_id: player_id.into(),
                match_id: match_id.into(),
                rating_before,
                rating_after,
                rating_change,
                correction,
                created_at,
            })
        })
    }

    /// Outbox entries that have not been delivered yet, oldest first.
    pub async fn pending_signals(&mut self, limit: u32) -> Result<Vec<Queued>> {
        let rows: Vec<(i64, String, i64)> = query_as(
            "SELECT id, payload, attempts FROM outbox
             WHERE dispatched_at IS NULL ORDER BY id LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&mut self.conn)
        .await?;
        rows.into_iter()
            .map(|(id, payload, attempts)| -> Result<Queued> {
                Ok(Queued {
                    id,
                    signal: serde_json::from_str(&payload)
                        .map_err(|err| sqlx::Error::Decode(Box::new(err)))?,
                    attempts: attempts as u32,
                })
            })
            .collect()
    }

    pub async fn mark_dispatched(&mut self, id: i64) -> Result<()> {
        query("UPDATE outbox SET dispatched_at = CURRENT_TIMESTAMP, attempts = attempts + 1, last_error = NULL WHERE id = $1")
            .bind(id)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    pub async fn record_dispatch_failure(&mut self, id: i64, error: &str) -> Result<()> {
        query("UPDATE outbox SET attempts = attempts + 1, last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }
}

const PLAYER_COLUMNS: &str =
    "player_id, rating, matches_played, wins, losses, draws, level, xp, updated_at";

type HistoryRow = (i64, String, i64, f64, f64, f64, bool, String);

type PlayerRow = (String, f64, i64, i64, i64, i64, i64, f64, String);

fn player_rating(
    (player_id, rating, matches_played, wins, losses, draws, level, xp, updated_at): PlayerRow,
) -> PlayerRating {
    PlayerRating {
        player_id: player_id.into(),
        rating,
        matches_played: matches_played as u32,
        wins: wins as u32,
        losses: losses as u32,
        draws: draws as u32,
        level: level as u8,
        xp,
        updated_at: Some(updated_at),
    }
}

#[derive(FromRow)]
struct ResultRow {
    id: i64,
    match_id: i64,
    category: String,
    team_a_player1: String,
    team_a_player2: Option<String>,
    team_b_player1: String,
    team_b_player2: Option<String>,
    team_a_score: Option<i64>,
    team_b_score: Option<i64>,
    winner: Option<String>,
    score_description: String,
    irregular_result: String,
    recorded_by: String,
    revision: i64,
    recorded_at: String,
}

impl TryFrom<ResultRow> for MatchResult {
    type Error = Error;

    fn try_from(row: ResultRow) -> Result<Self> {
        let team = |first: String, second: Option<String>| -> Vec<PlayerId> {
            std::iter::once(first)
                .chain(second)
                .map(PlayerId::from)
                .collect()
        };
        Ok(Self {
            id: row.id,
            match_id: row.match_id.into(),
            match_category: decode(&row.category)?,
            team_a: team(row.team_a_player1, row.team_a_player2),
            team_b: team(row.team_b_player1, row.team_b_player2),
            team_a_score: row.team_a_score.map(|s| s as u32),
            team_b_score: row.team_b_score.map(|s| s as u32),
            winner: row.winner.as_deref().map(decode::<Side>).transpose()?,
            score_description: row.score_description,
            irregular_result: decode(&row.irregular_result)?,
            recorded_by: row.recorded_by.into(),
            revision: row.revision as u32,
            recorded_at: row.recorded_at,
        })
    }
}

/// Parse a stored enum column, treating an unknown value as corrupt data.
fn decode<T: FromStr<Err = Error>>(value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|err: Error| Error::Persistence(sqlx::Error::Decode(Box::new(err))))
}

/// Reject a submission whose players are not exactly the match's accepted participants.
async fn check_roster<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    submission: &Submission,
) -> Result<()> {
    let id = submission.match_id;
    let exists: Option<(i64,)> = query_as("SELECT id FROM scheduled_match WHERE id = $1 LIMIT 1")
        .bind(i64::from(id))
        .fetch_optional(tx.as_mut())
        .await?;
    if exists.is_none() {
        return Err(Error::match_not_found(id));
    }

    let accepted: BTreeSet<PlayerId> =
        query_as::<_, (String,)>("SELECT player_id FROM scheduled_match_player WHERE match_id = $1")
            .bind(i64::from(id))
            .fetch_all(tx.as_mut())
            .await?
            .into_iter()
            .map(|(player,)| player.into())
            .collect();
    let submitted: BTreeSet<PlayerId> = submission.players().map(|(_, p)| p.clone()).collect();

    if accepted != submitted {
        let unknown = submitted.difference(&accepted).join(", ");
        let missing = accepted.difference(&submitted).join(", ");
        return Err(Error::Validation(format!(
            "teams do not match the participants of match {id} (not accepted: [{unknown}], missing: [{missing}])"
        )));
    }
    Ok(())
}

async fn result_id(conn: &mut SqliteConnection, id: MatchId) -> Result<Option<i64>> {
    let row: Option<(i64,)> = query_as("SELECT id FROM match_result WHERE match_id = $1 LIMIT 1")
        .bind(i64::from(id))
        .fetch_optional(conn)
        .await?;
    Ok(row.map(|(id,)| id))
}

async fn effects(conn: &mut SqliteConnection, result_id: i64) -> Result<Vec<MatchRatingEffect>> {
    let rows: Vec<(i64, String, String, String, f64, f64, f64, String)> = query_as(
        "SELECT match_result_id, player_id, team, outcome, rating_before, rating_after, rating_change, created_at
         FROM match_rating_effect WHERE match_result_id = $1 ORDER BY rowid",
    )
    .bind(result_id)
    .fetch_all(conn)
    .await?;
    rows.into_iter()
        .map(
            |(match_result_id, player_id, team, outcome, rating_before, rating_after, rating_change, created_at)|
             -> Result<MatchRatingEffect> {
                Ok(MatchRatingEffect {
                    match_result_id,
                    player_id: player_id.into(),
                    team: decode(&team)?,
                    outcome: decode(&outcome)?,
                    rating_before,
                    rating_after,
                    rating_change,
                    created_at: Some(created_at),
                })
            },
        )
        .collect()
}

/// Load a player's rating, creating it at the default rating if they have never been scored.
async fn get_rating<'c>(
    tx: &mut Transaction<'c, Sqlite>,
    player: &PlayerId,
) -> Result<PlayerRating> {
    let unrated = PlayerRating::unrated(player.clone(), DEFAULT_RATING);
    query("INSERT OR IGNORE INTO player_rating (player_id, rating, level, xp) VALUES ($1, $2, $3, $4)")
        .bind(player.as_str())
        .bind(unrated.rating)
        .bind(unrated.level)
        .bind(unrated.xp)
        .execute(tx.as_mut())
        .await?;
    let row: PlayerRow = query_as(&format!(
        "SELECT {PLAYER_COLUMNS} FROM player_rating WHERE player_id = $1 LIMIT 1"
    ))
    .bind(player.as_str())
    .fetch_one(tx.as_mut())
    .await?;
    Ok(player_rating(row))
}

async fn set_rating<'c>(tx: &mut Transaction<'c, Sqlite>, row: &PlayerRating) -> Result<()> {
    query(
        "UPDATE player_rating
         SET (rating, matches_played, wins, losses, draws, level, xp, updated_at)
           = ($1, $2, $3, $4, $5, $6, $7, CURRENT_TIMESTAMP)
         WHERE player_id = $8",
    )
    .bind(row.rating)
    .bind(row.matches_played)
    .bind(row.wins)
    .bind(row.losses)
    .bind(row.draws)
    .bind(row.level)
    .bind(row.xp)
    .bind(row.player_id.as_str())
    .execute(tx.as_mut())
    .await?;
    Ok(())
}

/// Insert or overwrite the result for the submission's match, returning its row id.
async fn upsert_result<'c>(tx: &mut Transaction<'c, Sqlite>, submission: &Submission) -> Result<i64> {
    let slot = |side: Side, i: usize| submission.team(side).get(i).map(|p| p.to_string());
    let score = submission.team_scores();
    let (id,): (i64,) = query_as(
        "INSERT INTO match_result
            (match_id, category, team_a_player1, team_a_player2, team_b_player1, team_b_player2,
             team_a_score, team_b_score, winner, score_description, irregular_result, recorded_by)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
         ON CONFLICT (match_id) DO UPDATE SET
            category = excluded.category,
            team_a_player1 = excluded.team_a_player1,
            team_a_player2 = excluded.team_a_player2,
            team_b_player1 = excluded.team_b_player1,
            team_b_player2 = excluded.team_b_player2,
            team_a_score = excluded.team_a_score,
            team_b_score = excluded.team_b_score,
            winner = excluded.winner,
            score_description = excluded.score_description,
            irregular_result = excluded.irregular_result,
            recorded_by = excluded.recorded_by,
            revision = match_result.revision + 1,
            recorded_at = CURRENT_TIMESTAMP
         RETURNING id",
    )
    .bind(i64::from(submission.match_id))
    .bind(submission.match_category.to_string())
    .bind(slot(Side::A, 0))
    .bind(slot(Side::A, 1))
    .bind(slot(Side::B, 0))
    .bind(slot(Side::B, 1))
    .bind(score.map(|(a, _)| a))
    .bind(score.map(|(_, b)| b))
    .bind(submission.winner.map(|side| side.to_string()))
    .bind(submission.score_description.as_str())
    .bind(submission.irregular_result.to_string())
    .bind(submission.submitted_by.as_str())
    .fetch_one(tx.as_mut())
    .await?;
    Ok(id)
}

async fn enqueue<'c>(tx: &mut Transaction<'c, Sqlite>, signal: Signal) -> Result<Queued> {
    let payload =
        serde_json::to_string(&signal).map_err(|err| sqlx::Error::Encode(Box::new(err)))?;
    let (id,): (i64,) = query_as("INSERT INTO outbox (payload) VALUES ($1) RETURNING id")
        .bind(payload)
        .fetch_one(tx.as_mut())
        .await?;
    Ok(Queued {
        id,
        signal,
        attempts: 0,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::outcome::{IrregularResult, MatchCategory};

    fn singles(winner: Side) -> Submission {
        Submission {
            match_id: 1.into(),
            team_a: vec!["ana".into()],
            team_b: vec!["carl".into()],
            score_description: "6-2,6-2".into(),
            winner: Some(winner),
            match_category: MatchCategory::Ranked,
            irregular_result: IrregularResult::Normal,
            submitted_by: "ana".into(),
        }
    }

    async fn rows(db: &mut Db, table: &str) -> i64 {
        let (count,): (i64,) = query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&mut db.conn)
            .await
            .unwrap();
        count
    }

    async fn fail_history_writes(db: &mut Db) {
        query(
            "CREATE TRIGGER reject_history BEFORE INSERT ON rating_history
             BEGIN SELECT RAISE(ABORT, 'history unavailable'); END",
        )
        .execute(&mut db.conn)
        .await
        .unwrap();
    }

    const TABLES: [&str; 5] = [
        "match_result",
        "match_rating_effect",
        "player_rating",
        "rating_history",
        "outbox",
    ];

    #[tokio::test]
    async fn failed_write_leaves_nothing_behind() {
        let mut db = Db::memory().await.unwrap();
        db.register_match(1.into(), &["ana".into(), "carl".into()])
            .await
            .unwrap();
        fail_history_writes(&mut db).await;

        let err = db
            .score_match(&singles(Side::A), &RatingConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)), "{err}");
        assert!(err.is_retryable());

        for table in TABLES {
            assert_eq!(rows(&mut db, table).await, 0, "{table}");
        }
        let (status,): (String,) = query_as("SELECT status FROM scheduled_match WHERE id = 1")
            .fetch_one(&mut db.conn)
            .await
            .unwrap();
        assert_eq!(status, "open");
    }

    #[tokio::test]
    async fn failed_correction_keeps_the_previous_result() {
        let mut db = Db::memory().await.unwrap();
        db.register_match(1.into(), &["ana".into(), "carl".into()])
            .await
            .unwrap();
        db.score_match(&singles(Side::A), &RatingConfig::default())
            .await
            .unwrap();

        let mut before = vec![];
        for table in TABLES {
            before.push(rows(&mut db, table).await);
        }
        let ana = db.player(&"ana".into()).await.unwrap().unwrap();

        fail_history_writes(&mut db).await;
        let err = db
            .score_match(&singles(Side::B), &RatingConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)), "{err}");

        let mut after = vec![];
        for table in TABLES {
            after.push(rows(&mut db, table).await);
        }
        assert_eq!(before, after);
        assert_eq!(db.player(&"ana".into()).await.unwrap().unwrap(), ana);

        let result = db.match_result(1.into()).await.unwrap().unwrap();
        assert_eq!(result.winner, Some(Side::A));
        assert_eq!(result.revision, 1);
        let effects = db.match_effects(1.into()).await.unwrap();
        let ana_effect = effects
            .iter()
            .find(|e| e.player_id == PlayerId::from("ana"))
            .unwrap();
        assert_eq!(ana_effect.rating_change, 6.0);
    }
}
