use crate::{
    error::Error,
    message::{BadgeEvaluation, ResultRecorded, Signal},
};
use futures::future::Future;

/// The external collaborators told about every committed result.
pub trait Notifier {
    fn evaluate_badges(
        &self,
        request: &BadgeEvaluation,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn result_recorded(
        &self,
        event: &ResultRecorded,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Hand a queued signal to the collaborator it is meant for.
pub async fn deliver(notifier: &impl Notifier, signal: &Signal) -> Result<(), Error> {
    let res = match signal {
        Signal::BadgeEvaluation(request) => notifier.evaluate_badges(request).await,
        Signal::ResultRecorded(event) => notifier.result_recorded(event).await,
    };
    res.map_err(|err| Error::Collaborator {
        collaborator: signal.collaborator(),
        message: format!("{err:#}"),
    })
}

/// A notifier with no collaborators behind it, which only logs what it would have sent.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn evaluate_badges(&self, request: &BadgeEvaluation) -> anyhow::Result<()> {
        tracing::info!(
            match_result_id = request.match_result_id,
            players = ?request.player_ids,
            "badge evaluation requested"
        );
        Ok(())
    }

    async fn result_recorded(&self, event: &ResultRecorded) -> anyhow::Result<()> {
        tracing::info!(match_id = %event.match_id, summary = %event.summary, "result recorded");
        Ok(())
    }
}
