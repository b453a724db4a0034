//! HTTP request handlers

use crate::api::server::AppContext;
use crate::blacklist::{BlacklistKind, BlacklistPage};
use crate::engine::{PlayOutcome, PlayRequest, QueueSnapshot};
use crate::error::Error;
use crate::stats::StatsSnapshot;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use jockey_common::{GuildId, PlaybackState, Track};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How many pending tracks the queue listing shows.
const QUEUE_PAGE_SIZE: usize = 10;

/// Blacklist listing page size.
const BLACKLIST_PAGE_SIZE: usize = 10;

type ErrResp = (StatusCode, Json<ErrorResponse>);
type HandlerResult<T> = std::result::Result<T, ErrResp>;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
    message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

/// Caller identity attached to every command (body for POST, query
/// string for GET/DELETE).
#[derive(Debug, Deserialize)]
pub struct CommandMeta {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiPlayRequest {
    pub query: String,
    pub user_id: String,
    /// Display tag shown as the requester on queue listings
    pub requested_by: String,
    pub endpoint: String,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    pub user_id: String,
    pub volume: u8,
}

#[derive(Debug, Deserialize)]
pub struct BassBoostRequest {
    pub user_id: String,
    pub level: u8,
}

#[derive(Debug, Deserialize)]
pub struct SkipToRequest {
    pub user_id: String,
    pub position: usize,
}

#[derive(Debug, Serialize)]
pub struct LoopResponse {
    pub loop_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct RemovedResponse {
    pub removed: Track,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub current: Option<Track>,
    /// Front of the pending list, at most [`QUEUE_PAGE_SIZE`] entries
    pub up_next: Vec<Track>,
    /// Pending tracks beyond the listed page
    pub more: usize,
    pub state: PlaybackState,
    pub loop_enabled: bool,
    pub volume: u8,
    pub bass_boost: u8,
}

impl From<QueueSnapshot> for QueueResponse {
    fn from(snapshot: QueueSnapshot) -> Self {
        let more = snapshot.pending.len().saturating_sub(QUEUE_PAGE_SIZE);
        let up_next = snapshot
            .pending
            .into_iter()
            .take(QUEUE_PAGE_SIZE)
            .collect();
        Self {
            current: snapshot.current,
            up_next,
            more,
            state: snapshot.state,
            loop_enabled: snapshot.loop_enabled,
            volume: snapshot.volume,
            bass_boost: snapshot.bass_boost,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BlacklistAddRequest {
    pub id: String,
    /// Display name shown in listings
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: usize,
}

fn default_page() -> usize {
    1
}

// ============================================================================
// Error mapping
// ============================================================================

/// Map a domain error onto an HTTP status + JSON body. The `error`
/// field is a stable machine-readable tag; `message` is for humans.
fn error_response(err: Error) -> ErrResp {
    let (status, tag) = match &err {
        Error::InvalidSource(_) => (StatusCode::BAD_REQUEST, "invalid_source"),
        Error::NoResults(_) => (StatusCode::NOT_FOUND, "no_results"),
        Error::ResolutionTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "resolution_timeout"),
        Error::OutOfRange { .. } => (StatusCode::BAD_REQUEST, "out_of_range"),
        Error::InsufficientItems => (StatusCode::BAD_REQUEST, "insufficient_items"),
        Error::InvalidRange(_) => (StatusCode::BAD_REQUEST, "invalid_range"),
        Error::NotPlaying => (StatusCode::CONFLICT, "not_playing"),
        Error::NotPaused => (StatusCode::CONFLICT, "not_paused"),
        Error::NoActivePlayback => (StatusCode::CONFLICT, "no_active_playback"),
        Error::NoPlayer => (StatusCode::CONFLICT, "no_player"),
        Error::EmptyQueue => (StatusCode::CONFLICT, "empty_queue"),
        Error::TransportFailure(_) => (StatusCode::BAD_GATEWAY, "transport_failure"),
        Error::NotImplemented(_) => (StatusCode::NOT_IMPLEMENTED, "not_implemented"),
        Error::Blacklisted { .. } => (StatusCode::FORBIDDEN, "blacklisted"),
        Error::Config(_) | Error::Io(_) | Error::Json(_) => {
            warn!("Internal error serving request: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: tag.to_string(),
            message: err.to_string(),
        }),
    )
}

/// Per-command gate: refuse blacklisted callers, count the command.
async fn admit(ctx: &AppContext, guild: GuildId, user_id: &str) -> HandlerResult<()> {
    ctx.stats.record_command();
    ctx.blacklist
        .check(&guild.to_string(), user_id)
        .await
        .map_err(error_response)
}

fn parse_kind(kind: &str) -> HandlerResult<BlacklistKind> {
    match kind {
        "users" => Ok(BlacklistKind::User),
        "guilds" => Ok(BlacklistKind::Guild),
        other => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "unknown_blacklist".to_string(),
                message: format!("no blacklist named '{other}'"),
            }),
        )),
    }
}

// ============================================================================
// Service endpoints
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "jockey-qd".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /stats
pub async fn get_stats(State(ctx): State<AppContext>) -> Json<StatsSnapshot> {
    Json(ctx.stats.snapshot(ctx.engine.registry()).await)
}

// ============================================================================
// Playback commands
// ============================================================================

/// POST /guilds/:guild_id/play
pub async fn play(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Json(req): Json<ApiPlayRequest>,
) -> HandlerResult<Json<PlayOutcome>> {
    let guild = GuildId(guild_id);
    admit(&ctx, guild, &req.user_id).await?;
    let outcome = ctx
        .engine
        .play(
            guild,
            PlayRequest {
                query: req.query,
                requested_by: req.requested_by,
                endpoint: req.endpoint,
            },
        )
        .await
        .map_err(error_response)?;
    Ok(Json(outcome))
}

/// POST /guilds/:guild_id/pause
pub async fn pause(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Json(meta): Json<CommandMeta>,
) -> HandlerResult<Json<StatusResponse>> {
    let guild = GuildId(guild_id);
    admit(&ctx, guild, &meta.user_id).await?;
    ctx.engine.pause(guild).await.map_err(error_response)?;
    Ok(Json(StatusResponse {
        status: "paused".to_string(),
    }))
}

/// POST /guilds/:guild_id/resume
pub async fn resume(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Json(meta): Json<CommandMeta>,
) -> HandlerResult<Json<StatusResponse>> {
    let guild = GuildId(guild_id);
    admit(&ctx, guild, &meta.user_id).await?;
    ctx.engine.resume(guild).await.map_err(error_response)?;
    Ok(Json(StatusResponse {
        status: "resumed".to_string(),
    }))
}

/// POST /guilds/:guild_id/skip
pub async fn skip(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Json(meta): Json<CommandMeta>,
) -> HandlerResult<Json<StatusResponse>> {
    let guild = GuildId(guild_id);
    admit(&ctx, guild, &meta.user_id).await?;
    ctx.engine.skip(guild).await.map_err(error_response)?;
    Ok(Json(StatusResponse {
        status: "skipped".to_string(),
    }))
}

/// POST /guilds/:guild_id/stop
pub async fn stop(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Json(meta): Json<CommandMeta>,
) -> HandlerResult<Json<StatusResponse>> {
    let guild = GuildId(guild_id);
    admit(&ctx, guild, &meta.user_id).await?;
    ctx.engine.stop(guild).await.map_err(error_response)?;
    Ok(Json(StatusResponse {
        status: "stopped".to_string(),
    }))
}

/// GET /guilds/:guild_id/queue
pub async fn get_queue(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Query(meta): Query<CommandMeta>,
) -> HandlerResult<Json<QueueResponse>> {
    let guild = GuildId(guild_id);
    admit(&ctx, guild, &meta.user_id).await?;
    let snapshot = ctx
        .engine
        .queue_snapshot(guild)
        .await
        .map_err(error_response)?;
    Ok(Json(snapshot.into()))
}

/// GET /guilds/:guild_id/now-playing
pub async fn now_playing(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Query(meta): Query<CommandMeta>,
) -> HandlerResult<Json<QueueResponse>> {
    let guild = GuildId(guild_id);
    admit(&ctx, guild, &meta.user_id).await?;
    let snapshot = ctx
        .engine
        .now_playing(guild)
        .await
        .map_err(error_response)?;
    Ok(Json(snapshot.into()))
}

/// POST /guilds/:guild_id/queue/clear
pub async fn clear_queue(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Json(meta): Json<CommandMeta>,
) -> HandlerResult<Json<StatusResponse>> {
    let guild = GuildId(guild_id);
    admit(&ctx, guild, &meta.user_id).await?;
    ctx.engine.clear(guild).await.map_err(error_response)?;
    Ok(Json(StatusResponse {
        status: "cleared".to_string(),
    }))
}

/// POST /guilds/:guild_id/queue/shuffle
pub async fn shuffle_queue(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Json(meta): Json<CommandMeta>,
) -> HandlerResult<Json<StatusResponse>> {
    let guild = GuildId(guild_id);
    admit(&ctx, guild, &meta.user_id).await?;
    ctx.engine.shuffle(guild).await.map_err(error_response)?;
    Ok(Json(StatusResponse {
        status: "shuffled".to_string(),
    }))
}

/// POST /guilds/:guild_id/queue/skip-to
pub async fn skip_to(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Json(req): Json<SkipToRequest>,
) -> HandlerResult<Json<StatusResponse>> {
    let guild = GuildId(guild_id);
    admit(&ctx, guild, &req.user_id).await?;
    ctx.engine
        .skip_to(guild, req.position)
        .await
        .map_err(error_response)?;
    Ok(Json(StatusResponse {
        status: "skipped".to_string(),
    }))
}

/// DELETE /guilds/:guild_id/queue/:position
pub async fn remove_track(
    State(ctx): State<AppContext>,
    Path((guild_id, position)): Path<(u64, usize)>,
    Query(meta): Query<CommandMeta>,
) -> HandlerResult<Json<RemovedResponse>> {
    let guild = GuildId(guild_id);
    admit(&ctx, guild, &meta.user_id).await?;
    let removed = ctx
        .engine
        .remove_track(guild, position)
        .await
        .map_err(error_response)?;
    Ok(Json(RemovedResponse { removed }))
}

/// POST /guilds/:guild_id/volume
pub async fn set_volume(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Json(req): Json<VolumeRequest>,
) -> HandlerResult<Json<StatusResponse>> {
    let guild = GuildId(guild_id);
    admit(&ctx, guild, &req.user_id).await?;
    ctx.engine
        .set_volume(guild, req.volume)
        .await
        .map_err(error_response)?;
    Ok(Json(StatusResponse {
        status: "volume set".to_string(),
    }))
}

/// POST /guilds/:guild_id/bass-boost
pub async fn set_bass_boost(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Json(req): Json<BassBoostRequest>,
) -> HandlerResult<Json<StatusResponse>> {
    let guild = GuildId(guild_id);
    admit(&ctx, guild, &req.user_id).await?;
    ctx.engine
        .set_bass_boost(guild, req.level)
        .await
        .map_err(error_response)?;
    Ok(Json(StatusResponse {
        status: "bass boost set".to_string(),
    }))
}

/// POST /guilds/:guild_id/loop
pub async fn toggle_loop(
    State(ctx): State<AppContext>,
    Path(guild_id): Path<u64>,
    Json(meta): Json<CommandMeta>,
) -> HandlerResult<Json<LoopResponse>> {
    let guild = GuildId(guild_id);
    admit(&ctx, guild, &meta.user_id).await?;
    let loop_enabled = ctx
        .engine
        .toggle_loop(guild)
        .await
        .map_err(error_response)?;
    Ok(Json(LoopResponse { loop_enabled }))
}

// ============================================================================
// Declared-but-unimplemented commands
// ============================================================================

/// POST /guilds/:guild_id/seek
pub async fn seek() -> ErrResp {
    error_response(Error::NotImplemented("seek"))
}

/// POST /guilds/:guild_id/previous
pub async fn previous() -> ErrResp {
    error_response(Error::NotImplemented("previous"))
}

/// GET /guilds/:guild_id/lyrics
pub async fn lyrics() -> ErrResp {
    error_response(Error::NotImplemented("lyrics"))
}

// ============================================================================
// Blacklist administration
// ============================================================================

/// GET /blacklist/:kind?page=N
pub async fn list_blacklist(
    State(ctx): State<AppContext>,
    Path(kind): Path<String>,
    Query(query): Query<PageQuery>,
) -> HandlerResult<Json<BlacklistPage>> {
    let kind = parse_kind(&kind)?;
    let page = ctx
        .blacklist
        .page(kind, query.page.max(1), BLACKLIST_PAGE_SIZE)
        .await;
    Ok(Json(page))
}

/// POST /blacklist/:kind
pub async fn add_to_blacklist(
    State(ctx): State<AppContext>,
    Path(kind): Path<String>,
    Json(req): Json<BlacklistAddRequest>,
) -> HandlerResult<(StatusCode, Json<StatusResponse>)> {
    let kind = parse_kind(&kind)?;
    let added = ctx
        .blacklist
        .add(kind, &req.id, &req.name)
        .await
        .map_err(error_response)?;
    let (status, body) = if added {
        (StatusCode::CREATED, "added")
    } else {
        (StatusCode::OK, "already blacklisted")
    };
    Ok((
        status,
        Json(StatusResponse {
            status: body.to_string(),
        }),
    ))
}

/// DELETE /blacklist/:kind/:id
pub async fn remove_from_blacklist(
    State(ctx): State<AppContext>,
    Path((kind, id)): Path<(String, String)>,
) -> HandlerResult<Json<StatusResponse>> {
    let kind = parse_kind(&kind)?;
    let removed = ctx
        .blacklist
        .remove(kind, &id)
        .await
        .map_err(error_response)?;
    if !removed {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "not_blacklisted".to_string(),
                message: format!("{} {} is not blacklisted", kind.as_str(), id),
            }),
        ));
    }
    Ok(Json(StatusResponse {
        status: "removed".to_string(),
    }))
}
