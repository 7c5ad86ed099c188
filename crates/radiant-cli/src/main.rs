// Radiant watcher entry point.
//
// Startup sequence:
// 1. Parse arguments
// 2. Initialize tracing (log file under logs/, or stderr)
// 3. Load config
// 4. Build the API client, connection manager and user cache
// 5. Track the requested tournament / draft / hero draft
// 6. Log every store update until Ctrl+C
// 7. Reset the store so its channel is released

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use directories::ProjectDirs;
use radiant_app::{ApiClient, BackendApi, HeroDraftStore, Slice, StoreUpdate, TeamDraftStore, TournamentStore};
use radiant_core::config::{self, Config};
use radiant_core::{Pk, UserCache};
use radiant_ws::{ConnectionManager, TungsteniteConnector};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "radiant")]
#[command(about = "Follow a tournament, team draft or hero draft and log live updates", long_about = None)]
#[command(group(ArgGroup::new("target").required(true).args(["tournament", "draft", "hero_draft"])))]
struct Args {
    /// Tournament id to follow
    #[arg(short, long)]
    tournament: Option<Pk>,

    /// Team-draft id to follow
    #[arg(short, long)]
    draft: Option<Pk>,

    /// Hero-draft id to follow
    #[arg(long)]
    hero_draft: Option<Pk>,

    /// Directory holding defaults/ and config/ (default: current directory)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Your user pk, for "your turn" reporting
    #[arg(long)]
    me: Option<Pk>,

    /// Log to stderr instead of logs/radiant.log
    #[arg(long)]
    stderr: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let base_dir = resolve_base_dir(args.config_dir.as_deref())?;
    init_tracing(&base_dir, args.stderr)?;
    info!("Radiant starting up");

    let (config, created) = config::load_or_init(&base_dir).context("failed to load configuration")?;
    if let Some(path) = created {
        info!("Created {} from defaults", path.display());
    }
    info!(
        api = %config.api.base_url,
        websocket = %config.websocket.base_url,
        max_attempts = config.websocket.reconnect.max_attempts,
        "Config loaded"
    );

    let api: Arc<dyn BackendApi> =
        Arc::new(ApiClient::from_config(&config.api).context("failed to build HTTP client")?);
    let manager = ConnectionManager::new(
        config.websocket.base_url.clone(),
        config.websocket.reconnect.clone(),
        Arc::new(TungsteniteConnector),
    );

    if let Some(id) = args.tournament {
        watch_tournament(id, api, manager, &config).await
    } else if let Some(id) = args.draft {
        watch_draft(id, args.me, api, manager).await
    } else if let Some(id) = args.hero_draft {
        watch_hero_draft(id, args.me, api, manager).await
    } else {
        anyhow::bail!("one of --tournament, --draft or --hero-draft is required")
    }
}

/// `--config-dir`, else the current directory when it holds config, else the
/// per-user config directory.
fn resolve_base_dir(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    if cwd.join("defaults").exists() || cwd.join("config").exists() {
        return Ok(cwd);
    }
    ProjectDirs::from("gg", "radiant", "radiant")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .context("no config directory found; pass --config-dir")
}

/// Log to `logs/radiant.log` under the base directory, or to stderr.
fn init_tracing(base_dir: &Path, to_stderr: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("radiant=info,warn"));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true);

    if to_stderr {
        let subscriber = builder.with_writer(std::io::stderr).finish();
        tracing::subscriber::set_global_default(subscriber)
            .context("failed to set tracing subscriber")?;
    } else {
        let log_dir = base_dir.join("logs");
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("failed to create {}", log_dir.display()))?;
        let log_file = std::fs::File::create(log_dir.join("radiant.log"))?;
        let subscriber = builder
            .with_writer(log_file)
            .with_ansi(false)
            .with_thread_ids(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .context("failed to set tracing subscriber")?;
    }
    Ok(())
}

async fn watch_tournament(
    id: Pk,
    api: Arc<dyn BackendApi>,
    manager: ConnectionManager,
    config: &Config,
) -> anyhow::Result<()> {
    let cache = UserCache::with_stale_after(config.cache.stale_after()).shared();
    let mut store = TournamentStore::new(api, manager, cache);
    store.set_tracked_id(Some(id));

    loop {
        let update = tokio::select! {
            update = store.next_update() => update,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(update) = update else { break };
        log_update(&update);
        if let StoreUpdate::Loaded(_) | StoreUpdate::Pushed { .. } = update {
            info!(
                name = store.metadata().map(|m| m.name.as_str()).unwrap_or("?"),
                users = store.user_ids().len(),
                teams = store.teams_state().len(),
                games = store.games_state().len(),
                pending = store.pending_games().len(),
                "Tournament"
            );
        }
        if let StoreUpdate::Loaded(Slice::Users | Slice::Metadata) = update {
            log_roster(&store);
        }
    }

    store.reset();
    info!("Radiant shut down cleanly");
    Ok(())
}

async fn watch_draft(
    id: Pk,
    me: Option<Pk>,
    api: Arc<dyn BackendApi>,
    manager: ConnectionManager,
) -> anyhow::Result<()> {
    let mut store = TeamDraftStore::new(api, manager);
    store.set_current_user(me);
    store.set_tracked_id(Some(id));

    loop {
        let update = tokio::select! {
            update = store.next_update() => update,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(update) = update else { break };
        log_update(&update);
        if let StoreUpdate::Loaded(_) | StoreUpdate::Pushed { .. } = update {
            info!(
                round = ?store.current_round().map(|r| r.pick_number),
                team = ?store.current_team(),
                picks = store.picks_made(),
                remaining = store.rounds_remaining(),
                available = store.users_remaining().len(),
                my_turn = store.is_my_turn(),
                "Draft"
            );
        }
    }

    store.reset();
    info!("Radiant shut down cleanly");
    Ok(())
}

async fn watch_hero_draft(
    id: Pk,
    me: Option<Pk>,
    api: Arc<dyn BackendApi>,
    manager: ConnectionManager,
) -> anyhow::Result<()> {
    let mut store = HeroDraftStore::new(api, manager);
    store.set_current_user(me);
    store.set_tracked_id(Some(id));

    loop {
        let update = tokio::select! {
            update = store.next_update() => update,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(update) = update else { break };
        match update {
            // Once a second; keep it out of the info log.
            StoreUpdate::Ticked => tracing::debug!(
                grace_ms = ?store.grace_time_remaining_ms(),
                active_team = ?store.active_team(),
                "Tick"
            ),
            StoreUpdate::Loaded(_) | StoreUpdate::Pushed { .. } => {
                log_update(&update);
                info!(
                    phase = ?store.phase(),
                    round = ?store.current_round().map(|r| r.round_number),
                    banned = ?store.banned_hero_ids(),
                    picked = ?store.picked_hero_ids(),
                    my_turn = store.is_my_turn(),
                    "Hero draft"
                );
            }
            other => log_update(&other),
        }
    }

    store.reset();
    info!("Radiant shut down cleanly");
    Ok(())
}

/// One line per participant, with the rating for this tournament's scope.
fn log_roster(store: &TournamentStore) {
    let context = store.cache_context();
    for user in store.users() {
        info!(pk = user.core.pk, name = user.display_name(), mmr = ?user.mmr_in(context), "Participant");
    }
}

fn log_update(update: &StoreUpdate) {
    match update {
        StoreUpdate::Connection(state) => info!(%state, "Connection"),
        StoreUpdate::Pushed { kind, sequence } => info!(kind, sequence = ?sequence, "Push applied"),
        StoreUpdate::Ticked => {}
        StoreUpdate::Loaded(slice) => info!(%slice, "Loaded"),
        StoreUpdate::LoadFailed { slice, error: e } => error!(%slice, error = %e, "Load failed"),
        StoreUpdate::StaleHttpSkipped(slice) => info!(%slice, "Skipped stale HTTP snapshot"),
        StoreUpdate::Discarded(slice) => warn!(%slice, "Discarded fetch for previous target"),
        StoreUpdate::Rejected(reason) => warn!(%reason, "Rejected push frame"),
    }
}
