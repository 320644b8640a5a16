//! The only path by which ratings change.
//!
//! [`Scorer`] serializes work per match, runs the scoring transaction, and then hands the signals
//! the transaction queued to the [`Notifier`]. Delivery happens after the commit, once the match
//! is released, and each delivery is bounded by the delivery timeout. Its outcome never changes
//! what the caller is told: a signal that cannot be delivered is logged, left in the outbox, and
//! picked up again by [`Scorer::dispatch_pending`].

use crate::{
    db::{Db, Queued},
    error::{Error, Result},
    message::{RatingChange, RegisterMatch, Scored},
    notify::{self, Notifier},
    outcome::{MatchId, Side, Submission},
    rating::RatingConfig,
};
use dashmap::DashSet;
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::timeout};

/// How long a collaborator gets to accept one signal before the attempt counts as failed.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Scorer<N> {
    db: Arc<Mutex<Db>>,
    config: RatingConfig,
    notifier: N,
    delivery_timeout: Duration,
    in_flight: Arc<DashSet<MatchId>>,
}

impl<N: Clone> Clone for Scorer<N> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            config: self.config,
            notifier: self.notifier.clone(),
            delivery_timeout: self.delivery_timeout,
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<N: Notifier> Scorer<N> {
    pub fn new(db: Db, config: RatingConfig, notifier: N) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            config,
            notifier,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            in_flight: Default::default(),
        })
    }

    pub fn with_delivery_timeout(mut self, delivery_timeout: Duration) -> Self {
        self.delivery_timeout = delivery_timeout;
        self
    }

    pub fn config(&self) -> &RatingConfig {
        &self.config
    }

    /// Shared handle to the database, for read-only queries.
    pub fn db(&self) -> &Arc<Mutex<Db>> {
        &self.db
    }

    pub async fn register_match(&self, req: &RegisterMatch) -> Result<()> {
        let _claim = self.claim(req.match_id)?;
        self.db
            .lock()
            .await
            .register_match(req.match_id, &req.participants)
            .await
    }

    /// Score or correct a match, returning the submitting player's own change.
    pub async fn submit(&self, submission: &Submission) -> Result<RatingChange> {
        submission.validate()?;
        let (scored, queued) = {
            let _claim = self.claim(submission.match_id)?;
            self.score(submission).await?
        };

        self.dispatch(queued).await;
        scored
            .change_for(&submission.submitted_by)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("change for {}", submission.submitted_by)))
    }

    /// Score a match again from the result already stored for it.
    pub async fn recompute(&self, id: MatchId) -> Result<Scored> {
        let (scored, queued) = {
            let _claim = self.claim(id)?;
            let submission = self.db.lock().await.stored_submission(id).await?;
            self.score(&submission).await?
        };

        self.dispatch(queued).await;
        Ok(scored)
    }

    /// Try once more to deliver signals that could not be delivered when they were queued.
    ///
    /// Returns the number delivered.
    pub async fn dispatch_pending(&self, limit: u32) -> Result<usize> {
        let pending = self.db.lock().await.pending_signals(limit).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        tracing::debug!(pending = pending.len(), "redelivering signals");
        Ok(self.dispatch(pending).await)
    }

    async fn score(&self, submission: &Submission) -> Result<(Scored, Vec<Queued>)> {
        let id = submission.match_id;
        let (scored, queued) = self
            .db
            .lock()
            .await
            .score_match(submission, &self.config)
            .await?;

        tracing::info!(
            %id,
            corrected = scored.corrected,
            category = %submission.match_category,
            irregular = %submission.irregular_result,
            team_a = %submission.roster(Side::A),
            team_b = %submission.roster(Side::B),
            "rated match"
        );

        Ok((scored, queued))
    }

    async fn dispatch(&self, queued: Vec<Queued>) -> usize {
        let mut delivered = 0;
        for Queued {
            id,
            signal,
            attempts,
        } in queued
        {
            let delivery = timeout(self.delivery_timeout, notify::deliver(&self.notifier, &signal));
            let res = delivery.await.unwrap_or_else(|_| {
                Err(Error::Collaborator {
                    collaborator: signal.collaborator(),
                    message: format!("no response within {:?}", self.delivery_timeout),
                })
            });
            match res {
                Ok(()) => {
                    delivered += 1;
                    if let Err(err) = self.db.lock().await.mark_dispatched(id).await {
                        tracing::warn!(id, "signal delivered but not marked, it will be resent: {err:#}");
                    }
                }
                Err(err) => {
                    tracing::error!(id, attempts = attempts + 1, "{err:#}");
                    if let Err(err) = self
                        .db
                        .lock()
                        .await
                        .record_dispatch_failure(id, &err.to_string())
                        .await
                    {
                        tracing::warn!(id, "could not record delivery failure: {err:#}");
                    }
                }
            }
        }
        delivered
    }

    fn claim(&self, id: MatchId) -> Result<Claim> {
        if !self.in_flight.insert(id) {
            tracing::warn!(%id, "rejecting concurrent request for match");
            return Err(Error::Conflict(id));
        }
        Ok(Claim {
            in_flight: self.in_flight.clone(),
            id,
        })
    }
}

/// Exclusive right to work on one match, released on drop.
struct Claim {
    in_flight: Arc<DashSet<MatchId>>,
    id: MatchId,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::notify::LogNotifier;

    #[tokio::test]
    async fn second_claim_on_a_match_conflicts() {
        let scorer = Scorer::new(Db::memory().await.unwrap(), Default::default(), LogNotifier)
            .unwrap();

        let claim = scorer.claim(7.into()).unwrap();
        assert!(matches!(scorer.claim(7.into()), Err(Error::Conflict(id)) if id == 7.into()));

        // Other matches are unaffected.
        scorer.claim(8.into()).unwrap();

        drop(claim);
        scorer.claim(7.into()).unwrap();
    }

    #[tokio::test]
    async fn rejects_bad_k_factor() {
        let err = Scorer::new(
            Db::memory().await.unwrap(),
            RatingConfig { k_factor: 0.0 },
            LogNotifier,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
