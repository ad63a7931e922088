use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use server_api::{
    cleanup_expired, create_lobby, get_game, get_results, join_lobby, start_game, submit_entry,
    ApiContext, GameRules,
};
use shared::{
    domain::{EntryKind, LobbyCode, RoundType},
    error::{ApiError, ApiException},
};
use storage::open_store;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SAMPLE_DRAWING: &str = "data:image/png;base64,iVBORw0KGgo=";

#[derive(Parser, Debug)]
struct Cli {
    /// `memory` or a sqlite url / file path.
    #[arg(long, global = true, default_value = "memory")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Plays a whole game with scripted players and prints every pack.
    Simulate {
        #[arg(long, default_value_t = 4)]
        players: usize,
    },
    /// Prints the stored lobby, game and progress for one code.
    Show {
        #[arg(long)]
        code: String,
    },
    /// Deletes every expired session.
    Sweep,
}

fn api(err: ApiError) -> anyhow::Error {
    ApiException::from(err).into()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let store = open_store(&cli.database_url).await?;
    let ctx = ApiContext::new(store, GameRules::default());

    match cli.command {
        Command::Simulate { players } => simulate(&ctx, players).await?,
        Command::Show { code } => {
            let code = LobbyCode::normalized(&code);
            let snapshot = ctx.store.load_session(&code).await?;
            let Some(lobby) = snapshot.lobby else {
                bail!("no session stored for {code}");
            };
            let dump = serde_json::json!({
                "lobby": lobby,
                "gameState": snapshot.game,
                "progress": snapshot.progress,
            });
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
        Command::Sweep => {
            let removed = cleanup_expired(&ctx, Utc::now()).await.map_err(api)?;
            println!("removed {} expired session(s)", removed.len());
            for code in removed {
                println!("  {code}");
            }
        }
    }

    Ok(())
}

async fn simulate(ctx: &ApiContext, players: usize) -> Result<()> {
    if players < ctx.rules.min_players {
        bail!("a game needs at least {} players", ctx.rules.min_players);
    }

    let created = create_lobby(ctx, "Player 1").await.map_err(api)?;
    let code = created.lobby_code.to_string();
    let mut ids = vec![created.player_id];
    for seat in 2..=players {
        let joined = join_lobby(ctx, &code, &format!("Player {seat}"))
            .await
            .map_err(api)?;
        ids.push(joined.player_id);
    }
    info!(%code, players, "lobby seated");

    start_game(ctx, &code, &ids[0]).await.map_err(api)?;
    loop {
        let game = get_game(ctx, &code).await.map_err(api)?;
        if game.is_finished() {
            break;
        }
        let round = game.current_round;
        for (seat, id) in ids.iter().enumerate() {
            let (kind, content) = match game.round_type {
                RoundType::Write => (
                    EntryKind::Text,
                    format!("phrase {round} from seat {}", seat + 1),
                ),
                RoundType::Draw => (EntryKind::Drawing, SAMPLE_DRAWING.to_string()),
            };
            submit_entry(ctx, &code, id, &content, kind)
                .await
                .map_err(api)?;
        }
        info!(%code, round, "round played");
    }

    let results = get_results(ctx, &code).await.map_err(api)?;
    println!("game {} finished", results.lobby_code);
    for pack in results.packs {
        println!(
            "pack {} (started by {})",
            pack.pack_id, pack.starting_player_name
        );
        for entry in pack.entries {
            let shown = match entry.kind {
                EntryKind::Text => entry.content,
                EntryKind::Drawing => format!("<drawing, {} bytes>", entry.content.len()),
            };
            println!("  {}: {shown}", entry.player_name);
        }
    }
    Ok(())
}
