use clap::{Parser, Subcommand};
use rallyrank_client::Client;
use rallyrank_core::outcome::{IrregularResult, MatchCategory, MatchId, PlayerId, Side, Submission};
use std::process::exit;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Record match results and inspect ratings.
#[derive(Parser)]
struct Options {
    /// Base URL of the rating service.
    #[clap(
        short,
        long,
        env = "RALLYRANK_URL",
        default_value = "http://localhost:8080"
    )]
    url: Url,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Schedule a match and the players allowed in its result.
    Register {
        id: MatchId,
        #[clap(required = true)]
        players: Vec<PlayerId>,
    },

    /// Submit the result of a match, or correct one already submitted.
    Submit {
        id: MatchId,

        /// Players on team A, comma separated.
        #[clap(short = 'a', long, value_delimiter = ',', required = true)]
        team_a: Vec<PlayerId>,

        /// Players on team B, comma separated.
        #[clap(short = 'b', long, value_delimiter = ',', required = true)]
        team_b: Vec<PlayerId>,

        /// Set scores from the winner's point of view, e.g. "6-4, 7-6(5)".
        #[clap(short, long, default_value = "")]
        score: String,

        /// Winning team (A or B). Omit for a draw.
        #[clap(short, long)]
        winner: Option<Side>,

        #[clap(short, long, default_value = "ranked")]
        category: MatchCategory,

        #[clap(short, long, default_value = "normal")]
        irregular: IrregularResult,

        /// Player submitting the result.
        #[clap(long = "by")]
        submitted_by: PlayerId,
    },

    /// Score a match again from its stored result.
    Recompute { id: MatchId },

    /// Show a player's rating, level and record.
    Player { id: PlayerId },

    /// List a player's rating changes, newest first.
    History { id: PlayerId },

    /// Show the highest rated players.
    Leaderboard {
        #[clap(short = 'n', long, default_value = "20")]
        limit: u32,
    },

    /// Show the stored result of a match.
    Result { id: MatchId },

    /// Show what a match did to each player's rating.
    Effects { id: MatchId },
}

impl Command {
    async fn run(self, client: &Client) -> anyhow::Result<()> {
        match self {
            Self::Register { id, players } => {
                client.register_match(id, players).await?;
                println!("match {id} registered");
            }
            Self::Submit {
                id,
                team_a,
                team_b,
                score,
                winner,
                category,
                irregular,
                submitted_by,
            } => {
                let submission = Submission {
                    match_id: id,
                    team_a,
                    team_b,
                    score_description: score,
                    winner,
                    match_category: category,
                    irregular_result: irregular,
                    submitted_by,
                };
                let change = client.submit(&submission).await?;
                println!("{}", submission.summary());
                println!(
                    "{}: {:.2} -> {:.2} ({:+.2}), level {} ({:.2} xp)",
                    change.player_id,
                    change.rating_before,
                    change.rating_after,
                    change.delta,
                    change.level,
                    change.xp
                );
            }
            Self::Recompute { id } => {
                let scored = client.recompute(id).await?;
                for change in scored.changes {
                    println!(
                        "{} ({}): {:.2} -> {:.2} ({:+.2})",
                        change.player_id,
                        change.outcome,
                        change.rating_before,
                        change.rating_after,
                        change.delta
                    );
                }
            }
            Self::Player { id } => {
                let player = client.player(&id).await?;
                println!(
                    "{}: {:.2}, level {} ({:.2} xp), {} played, {}-{}-{}",
                    player.player_id,
                    player.rating,
                    player.level,
                    player.xp,
                    player.matches_played,
                    player.wins,
                    player.losses,
                    player.draws
                );
            }
            Self::History { id } => {
                for entry in client.history(&id).await? {
                    let correction = if entry.correction { " (correction)" } else { "" };
                    println!(
                        "{} match {}: {:.2} -> {:.2} ({:+.2}){correction}",
                        entry.created_at,
                        entry.match_id,
                        entry.rating_before,
                        entry.rating_after,
                        entry.rating_change
                    );
                }
            }
            Self::Leaderboard { limit } => {
                for (rank, player) in client.leaderboard(limit).await?.iter().enumerate() {
                    println!(
                        "{:>3}. {} {:.2} (level {})",
                        rank + 1,
                        player.player_id,
                        player.rating,
                        player.level
                    );
                }
            }
            Self::Result { id } => {
                let result = client.match_result(id).await?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            Self::Effects { id } => {
                for effect in client.match_effects(id).await? {
                    println!(
                        "{} (team {}, {}): {:.2} -> {:.2} ({:+.2})",
                        effect.player_id,
                        effect.team,
                        effect.outcome,
                        effect.rating_before,
                        effect.rating_after,
                        effect.rating_change
                    );
                }
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let opt = Options::parse();

    let client = Client::new(opt.url);
    if let Err(err) = opt.command.run(&client).await {
        eprintln!("{err:#}");
        exit(1);
    }
}
