use futures::stream::TryStreamExt;
use hyper::{Body, Method, Request, Response, StatusCode};
use rallyrank_core::{
    message::{ErrorReport, Recompute, RegisterMatch},
    notify::Notifier,
    outcome::{MatchId, PlayerId, Submission},
    scorer::Scorer,
    Error,
};
use serde::{de::DeserializeOwned, Serialize};

const DEFAULT_LEADERBOARD_SIZE: u32 = 20;
const MAX_LEADERBOARD_SIZE: u32 = 500;

pub struct App<N> {
    scorer: Scorer<N>,
}

impl<N: Notifier> App<N> {
    pub fn new(scorer: Scorer<N>) -> Self {
        Self { scorer }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        match self.route(req).await {
            Ok(res) => res,
            Err(err) => {
                match &err {
                    Error::Persistence(_) => tracing::error!(%method, %path, "{err:#}"),
                    _ => tracing::info!(%method, %path, "rejected: {err}"),
                }
                error_response(&err)
            }
        }
    }

    async fn route(&self, req: Request<Body>) -> Result<Response<Body>, Error> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or_default().to_string();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match (method, segments.as_slice()) {
            (Method::POST, ["matches"]) => {
                let register: RegisterMatch = body(req).await?;
                self.scorer.register_match(&register).await?;
                Ok(empty(StatusCode::NO_CONTENT))
            }
            (Method::POST, ["results"]) => {
                let submission: Submission = body(req).await?;
                let change = self.scorer.submit(&submission).await?;
                json(StatusCode::OK, &change)
            }
            (Method::POST, ["recompute"]) => {
                let Recompute { match_id } = body(req).await?;
                let scored = self.scorer.recompute(match_id).await?;
                json(StatusCode::OK, &scored)
            }
            (Method::GET, ["matches", id, "result"]) => {
                let id = match_id(id)?;
                let result = self
                    .scorer
                    .db()
                    .lock()
                    .await
                    .match_result(id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("result for match {id}")))?;
                json(StatusCode::OK, &result)
            }
            (Method::GET, ["matches", id, "effects"]) => {
                let id = match_id(id)?;
                let effects = self.scorer.db().lock().await.match_effects(id).await?;
                json(StatusCode::OK, &effects)
            }
            (Method::GET, ["players", id]) => {
                let id = PlayerId::from(*id);
                let rating = self
                    .scorer
                    .db()
                    .lock()
                    .await
                    .player(&id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("player {id}")))?;
                json(StatusCode::OK, &rating)
            }
            (Method::GET, ["players", id, "history"]) => {
                let mut db = self.scorer.db().lock().await;
                let history: Vec<_> = db.history(PlayerId::from(*id)).try_collect().await?;
                json(StatusCode::OK, &history)
            }
            (Method::GET, ["leaderboard"]) => {
                let limit = leaderboard_size(&query)?;
                let board = self.scorer.db().lock().await.leaderboard(limit).await?;
                json(StatusCode::OK, &board)
            }
            (Method::GET, ["health"]) => Ok(empty(StatusCode::OK)),
            (method, _) => Err(Error::NotFound(format!("route {method} {path}"))),
        }
    }
}

async fn body<T: DeserializeOwned>(req: Request<Body>) -> Result<T, Error> {
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|err| Error::Validation(format!("unreadable request body: {err}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| Error::Validation(format!("malformed request: {err}")))
}

fn match_id(segment: &str) -> Result<MatchId, Error> {
    segment
        .parse()
        .map_err(|_| Error::Validation(format!("invalid match id {segment:?}")))
}

fn leaderboard_size(query: &str) -> Result<u32, Error> {
    let Some((_, limit)) = url::form_urlencoded::parse(query.as_bytes()).find(|(k, _)| k == "limit")
    else {
        return Ok(DEFAULT_LEADERBOARD_SIZE);
    };
    let limit: u32 = limit
        .parse()
        .map_err(|_| Error::Validation(format!("invalid limit {limit:?}")))?;
    Ok(limit.clamp(1, MAX_LEADERBOARD_SIZE))
}

fn json(status: StatusCode, payload: &impl Serialize) -> Result<Response<Body>, Error> {
    match serde_json::to_vec(payload) {
        Ok(body) => Ok(respond(status, Body::from(body))),
        Err(err) => {
            tracing::error!("unable to encode response: {err}");
            Ok(empty(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

fn empty(status: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = status;
    res
}

fn respond(status: StatusCode, body: Body) -> Response<Body> {
    let mut res = Response::new(body);
    *res.status_mut() = status;
    res.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    res
}

/// Map a failure onto the status a caller should act on.
pub fn status(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Collaborator { .. } => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(err: &Error) -> Response<Body> {
    let report = ErrorReport {
        // Storage details stay in the log.
        error: match err {
            Error::Persistence(_) => "temporarily unable to record result, retry".to_string(),
            _ => err.to_string(),
        },
        retryable: err.is_retryable(),
    };
    let body = serde_json::to_vec(&report).unwrap_or_default();
    respond(status(err), Body::from(body))
}

#[cfg(test)]
mod test {
    use super::*;
    use rallyrank_core::{
        db::Db,
        message::{HistoryEntry, MatchResult, PlayerRating, RatingChange},
        notify::LogNotifier,
    };
    use serde_json::json;

    async fn app() -> App<LogNotifier> {
        let db = Db::memory().await.unwrap();
        App::new(Scorer::new(db, Default::default(), LogNotifier).unwrap())
    }

    async fn call(
        app: &App<LogNotifier>,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, Vec<u8>) {
        let body = match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(body)
            .unwrap();
        let res = app.handle(req).await;
        let status = res.status();
        let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn register(app: &App<LogNotifier>, id: i64, players: &[&str]) {
        let (status, _) = call(
            app,
            Method::POST,
            "/matches",
            Some(json!({ "match_id": id, "participants": players })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    fn doubles(id: i64, winner: &str, score: &str) -> serde_json::Value {
        json!({
            "match_id": id,
            "team_a": ["ana", "bea"],
            "team_b": ["carl", "dani"],
            "score_description": score,
            "winner": winner,
            "match_category": "ranked",
            "irregular_result": "normal",
            "submitted_by": "ana",
        })
    }

    #[tokio::test]
    async fn submit_and_query() {
        let app = app().await;
        register(&app, 1, &["ana", "bea", "carl", "dani"]).await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/results",
            Some(doubles(1, "A", "6-4, 6-3")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let change: RatingChange = serde_json::from_slice(&body).unwrap();
        assert_eq!(change.player_id, "ana".into());
        assert_eq!(change.rating_after, 56.0);

        let (status, body) = call(&app, Method::GET, "/players/carl", None).await;
        assert_eq!(status, StatusCode::OK);
        let carl: PlayerRating = serde_json::from_slice(&body).unwrap();
        assert_eq!(carl.rating, 44.0);
        assert_eq!(carl.losses, 1);

        let (status, body) = call(&app, Method::GET, "/matches/1/result", None).await;
        assert_eq!(status, StatusCode::OK);
        let result: MatchResult = serde_json::from_slice(&body).unwrap();
        assert_eq!(result.team_a_score, Some(2));
        assert_eq!(result.revision, 1);

        let (status, body) = call(&app, Method::GET, "/players/bea/history", None).await;
        assert_eq!(status, StatusCode::OK);
        let history: Vec<HistoryEntry> = serde_json::from_slice(&body).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].rating_change, 6.0);

        let (status, body) = call(&app, Method::GET, "/leaderboard?limit=2", None).await;
        assert_eq!(status, StatusCode::OK);
        let board: Vec<PlayerRating> = serde_json::from_slice(&body).unwrap();
        assert_eq!(board.len(), 2);
        assert!(board.iter().all(|p| p.rating == 56.0));
    }

    #[tokio::test]
    async fn error_statuses() {
        let app = app().await;

        // Unscheduled match.
        let (status, body) = call(
            &app,
            Method::POST,
            "/results",
            Some(doubles(9, "A", "6-0")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let report: ErrorReport = serde_json::from_slice(&body).unwrap();
        assert_eq!(report.error, "match 9 not found");
        assert!(!report.retryable);

        // Malformed body.
        let (status, _) = call(
            &app,
            Method::POST,
            "/results",
            Some(json!({ "match_id": "nine" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Empty team.
        register(&app, 2, &["ana", "carl"]).await;
        let mut body = doubles(2, "B", "6-4");
        body["team_a"] = json!([]);
        let (status, _) = call(&app, Method::POST, "/results", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::GET, "/players/nobody", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, Method::GET, "/matches/abc/result", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::GET, "/leaderboard?limit=lots", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, Method::DELETE, "/players/ana", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn storage_failures_are_retryable_and_opaque() {
        let migration = sqlx::migrate::MigrateError::VersionMissing(1);
        for err in [
            Error::Persistence(sqlx::Error::PoolTimedOut),
            Error::from(sqlx::Error::Migrate(Box::new(migration))),
        ] {
            let res = error_response(&err);
            assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
            let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
            let report: ErrorReport = serde_json::from_slice(&body).unwrap();
            assert_eq!(report.error, "temporarily unable to record result, retry");
            assert!(report.retryable);
        }
        assert_eq!(status(&Error::Conflict(4.into())), StatusCode::CONFLICT);
    }

    #[test]
    fn leaderboard_limits() {
        assert_eq!(leaderboard_size("").unwrap(), DEFAULT_LEADERBOARD_SIZE);
        assert_eq!(leaderboard_size("limit=0").unwrap(), 1);
        assert_eq!(leaderboard_size("limit=100000").unwrap(), MAX_LEADERBOARD_SIZE);
        assert_eq!(leaderboard_size("other=3&limit=7").unwrap(), 7);
    }
}
