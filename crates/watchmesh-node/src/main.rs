mod notify;
mod plugin;

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dashmap::DashMap;
use prometheus::Registry;
use tracing_subscriber::EnvFilter;

use watchmesh_config::ClusterConfig;
use watchmesh_core::authority::AuthorityManager;
use watchmesh_core::cluster_listener::{ClusterListener, PeerTarget};
use watchmesh_core::config_distributor::ConfigDistributor;
use watchmesh_core::dispatch::{self, HandlerContext};
use watchmesh_core::endpoint::Endpoint;
use watchmesh_core::error::ClusterError;
use watchmesh_core::event_bus::Signal;
use watchmesh_core::expiry::{run_expiry_sweep, run_replay_log_gc};
use watchmesh_core::metrics::Metrics;
use watchmesh_core::notification::{Notification, NotificationEngine};
use watchmesh_core::registry::TypeRegistry;
use watchmesh_core::replay_log::{ReplayLog, SecurityDescriptor};
use watchmesh_core::router::MessageRouter;
use watchmesh_core::scheduler::Scheduler;
use watchmesh_types::{CheckableKind, CheckableRef, Privilege};

use notify::ProcessNotificationRunner;
use plugin::ProcessPluginRunner;

#[derive(Parser, Debug)]
#[command(name = "watchmesh-node", about = "Cluster monitoring engine node")]
struct Args {
    /// Path to this node's TOML configuration file.
    #[arg(long)]
    config: std::path::PathBuf,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = ClusterConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    tracing::info!(identity = %config.identity, "starting watchmesh node");

    let registry = Registry::new();
    let metrics = Arc::new(Metrics::new(&registry));
    let type_registry = Arc::new(TypeRegistry::new());
    let endpoints: Arc<DashMap<String, Arc<Endpoint>>> = Arc::new(DashMap::new());

    let replay_log = Arc::new(
        ReplayLog::open(
            config.state_dir.join("cluster/log"),
            config.parameters.replay_log_segment_size,
        )
        .context("opening replay log")?,
    );

    let server_config = watchmesh_tls::server_config(&config.tls.cert_path, &config.tls.key_path, &config.tls.ca_path)
        .context("building server TLS config")?;
    let client_config = watchmesh_tls::client_config(&config.tls.cert_path, &config.tls.key_path, &config.tls.ca_path)
        .context("building client TLS config")?;

    let bind_address = config
        .bind_address
        .to_socket_addrs()
        .context("resolving bind_address")?
        .next()
        .context("bind_address resolved to no addresses")?;

    let dial_targets: Vec<PeerTarget> = config
        .peers
        .iter()
        .filter(|p| p.name != config.identity)
        .filter_map(|p| {
            p.address()
                .to_socket_addrs()
                .ok()
                .and_then(|mut it| it.next())
                .map(|address| PeerTarget {
                    name: p.name.clone(),
                    address,
                })
        })
        .collect();

    let scheduler = Arc::new(Scheduler::new(
        type_registry.clone(),
        Arc::new(ProcessPluginRunner),
        config.identity.clone(),
        config.parameters.default_check_timeout,
        config.parameters.max_concurrent_checks,
        metrics.clone(),
    ));

    let config_distributor = Arc::new(ConfigDistributor::new(config.state_dir.clone(), config.accept_config.clone()));

    let router = Arc::new(MessageRouter::new(config.identity.clone(), endpoints.clone(), replay_log.clone()));

    let notification_engine = Arc::new(NotificationEngine::new(
        Arc::new(ProcessNotificationRunner::new(type_registry.clone())),
        metrics.clone(),
    ));

    let handlers = Arc::new(build_handler_table(
        scheduler.clone(),
        config_distributor.clone(),
        router.clone(),
    ));

    let listener = Arc::new(ClusterListener::new(
        config.identity.clone(),
        bind_address,
        server_config,
        client_config,
        endpoints.clone(),
        config.accept_config.clone(),
        handlers,
        type_registry.clone(),
        replay_log.clone(),
        config.state_dir.clone(),
        config.config_sync_globs.clone(),
        config.parameters.log_position_ack_threshold,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let authority_manager = AuthorityManager::new(
        type_registry.clone(),
        config.identity.clone(),
        config.parameters.authority_election_interval,
        {
            let endpoints = endpoints.clone();
            let self_identity = config.identity.clone();
            move |feature: &str| {
                let mut members: Vec<String> = endpoints
                    .iter()
                    .filter(|e| e.is_connected() && e.supports(feature))
                    .map(|e| e.key().clone())
                    .collect();
                members.push(self_identity.clone());
                members
            }
        },
    );

    let mut tasks = tokio::task::JoinSet::new();

    tasks.spawn({
        let listener = listener.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move {
            if let Err(e) = listener.listen(shutdown_rx).await {
                tracing::error!(error = %e, "cluster listener exited");
            }
        }
    });

    tasks.spawn({
        let listener = listener.clone();
        let dial_interval = config.parameters.dial_interval;
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            let mut ticker = tokio::time::interval(dial_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => listener.dial_all(&dial_targets).await,
                    _ = shutdown_rx.changed() => if *shutdown_rx.borrow() { return; },
                }
            }
        }
    });

    tasks.spawn({
        let scheduler = scheduler.clone();
        let tick = config.parameters.scheduler_tick;
        let shutdown_rx = shutdown_rx.clone();
        async move { scheduler.run(tick, shutdown_rx).await }
    });

    tasks.spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { authority_manager.run(shutdown_rx).await }
    });

    tasks.spawn({
        let type_registry = type_registry.clone();
        let interval = config.parameters.expiry_sweep_interval;
        let shutdown_rx = shutdown_rx.clone();
        async move { run_expiry_sweep(type_registry, interval, shutdown_rx).await }
    });

    tasks.spawn({
        let replay_log = replay_log.clone();
        let endpoints = endpoints.clone();
        let self_identity = config.identity.clone();
        let interval = config.parameters.gc_interval;
        let shutdown_rx = shutdown_rx.clone();
        async move { run_replay_log_gc(replay_log, endpoints, self_identity, interval, shutdown_rx).await }
    });

    // Advertises this node's supported features to every connected peer
    // on `heartbeat_interval` (spec §4.4).
    tasks.spawn({
        let router = router.clone();
        let self_identity = config.identity.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        let heartbeat_interval = config.parameters.heartbeat_interval;
        async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let params = serde_json::json!({
                            "identity": self_identity,
                            "features": [watchmesh_core::authority::FEATURE_CHECKER, watchmesh_core::authority::FEATURE_NOTIFICATION],
                        });
                        if let Err(e) = router.relay(None, "cluster::HeartBeat", params, false, None) {
                            tracing::warn!(error = %e, "failed to relay heartbeat");
                        }
                    }
                    _ = shutdown_rx.changed() => if *shutdown_rx.borrow() { return; },
                }
            }
        }
    });

    // Drains the event bus every Checkable publishes to: durable
    // state-change signals get tagged and fanned out to peers through the
    // MessageRouter (spec §2, §4.7); NotificationsRequested feeds the
    // NotificationEngine (spec §4.3). Queue-then-drain, so a slow relay
    // never blocks the checkable that emitted the signal.
    tasks.spawn({
        let router = router.clone();
        let type_registry = type_registry.clone();
        let notification_engine = notification_engine.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        let mut events = type_registry.events().subscribe();
        async move {
            loop {
                tokio::select! {
                    signal = events.recv() => {
                        match signal {
                            Ok(signal) => handle_signal(signal, &router, &type_registry, &notification_engine).await,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::warn!(skipped, "event bus subscriber lagged, signals dropped");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown_rx.changed() => if *shutdown_rx.borrow() { return; },
                }
            }
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested, stopping all tasks");
    let _ = shutdown_tx.send(true);

    let shutdown_timeout = Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    Ok(())
}

/// Builds the inbound message handler table (spec §9 "Message dispatch
/// dynamism"), layering the checkable- and config-mutating handlers this
/// binary owns on top of the registry-only handlers `watchmesh-core` ships.
fn build_handler_table(
    scheduler: Arc<Scheduler<ProcessPluginRunner>>,
    config_distributor: Arc<ConfigDistributor>,
    router: Arc<MessageRouter>,
) -> dispatch::MessageHandlerTable {
    let mut table = dispatch::standard_handlers();

    table.register(
        "cluster::CheckResult",
        Arc::new(move |ctx: &HandlerContext, params: &serde_json::Value| {
            let checkable_ref: CheckableRef = serde_json::from_value(
                params.get("checkable").cloned().unwrap_or(serde_json::Value::Null),
            )
            .map_err(|e| protocol_violation(ctx, format!("malformed checkable reference: {e}")))?;
            let mut result: watchmesh_types::CheckResult =
                serde_json::from_value(params.get("result").cloned().unwrap_or(serde_json::Value::Null))
                    .map_err(|e| protocol_violation(ctx, format!("malformed check result: {e}")))?;

            let Some(checkable) = ctx.registry.get(&checkable_ref) else {
                return Err(protocol_violation(ctx, format!("unknown checkable {checkable_ref}")));
            };

            let sec = SecurityDescriptor {
                object_type: checkable_kind_str(&checkable_ref).to_string(),
                name: checkable_ref.canonical_name(),
                privs: Privilege::COMMAND,
            };
            let granted = checkable.config.privileges_for(&ctx.sender.name);
            if let Err(e) = router.authorize(&ctx.sender.name, granted, &sec) {
                tracing::debug!(peer = %ctx.sender.name, error = %e, "dropping unauthorized passive check result");
                return Ok(());
            }

            result.check_source = Some(ctx.sender.name.clone());
            scheduler.accept_passive_result(&checkable, result, &ctx.sender.name);
            Ok(())
        }),
    );

    table.register(
        "cluster::Config",
        Arc::new(move |ctx: &HandlerContext, params: &serde_json::Value| {
            let files: std::collections::BTreeMap<String, String> =
                serde_json::from_value(params.get("files").cloned().unwrap_or(serde_json::Value::Null))
                    .map_err(|e| protocol_violation(ctx, format!("malformed config bundle: {e}")))?;
            let changed = config_distributor
                .apply(&ctx.sender.name, &files)
                .map_err(|e| protocol_violation(ctx, e.to_string()))?;
            if changed {
                tracing::info!(peer = %ctx.sender.name, "applied updated config from peer");
            }
            Ok(())
        }),
    );

    table
}

fn protocol_violation(ctx: &HandlerContext, reason: String) -> ClusterError {
    ClusterError::ProtocolViolation {
        peer: ctx.sender.name.clone(),
        reason,
    }
}

fn checkable_kind_str(checkable: &CheckableRef) -> &'static str {
    match checkable.kind() {
        CheckableKind::Host => "host",
        CheckableKind::Service => "service",
    }
}

/// Turns one [`Signal`] into durable wire traffic and/or a notification
/// request. Source-suppressed: a result that arrived passively from peer
/// `X` carries `check_source = Some(X)`, so re-relaying here naturally
/// excludes only the peer it came from (spec §2 "flooding with source
/// suppression").
async fn handle_signal(
    signal: Signal,
    router: &Arc<MessageRouter>,
    type_registry: &Arc<TypeRegistry>,
    notification_engine: &Arc<NotificationEngine<ProcessNotificationRunner>>,
) {
    match signal {
        Signal::NewCheckResult { checkable, .. } => {
            let Some(object) = type_registry.get(&checkable) else { return };
            let Some(result) = object.last_check_result() else { return };
            let source = result.check_source.clone();
            let sec = SecurityDescriptor {
                object_type: checkable_kind_str(&checkable).to_string(),
                name: checkable.canonical_name(),
                privs: Privilege::COMMAND,
            };
            let params = serde_json::json!({ "checkable": checkable, "result": result });
            if let Err(e) = router.relay(source.as_deref(), "cluster::CheckResult", params, true, Some(sec)) {
                tracing::warn!(error = %e, checkable = %checkable, "failed to relay check result");
            }
        }
        Signal::AcknowledgementSet { checkable, .. } => {
            let Some(object) = type_registry.get(&checkable) else { return };
            let Some(ack) = object.acknowledgement() else { return };
            let sec = command_security(&checkable);
            let params = serde_json::json!({ "checkable": checkable, "acknowledgement": ack });
            if let Err(e) = router.relay(None, "cluster::SetAcknowledgement", params, true, Some(sec)) {
                tracing::warn!(error = %e, checkable = %checkable, "failed to relay acknowledgement");
            }
        }
        Signal::AcknowledgementCleared { checkable } => {
            let sec = command_security(&checkable);
            let params = serde_json::json!({ "checkable": checkable });
            if let Err(e) = router.relay(None, "cluster::ClearAcknowledgement", params, true, Some(sec)) {
                tracing::warn!(error = %e, checkable = %checkable, "failed to relay acknowledgement clear");
            }
        }
        Signal::CommentAdded { checkable, comment_id } => {
            let Some(object) = type_registry.get(&checkable) else { return };
            let Some(comment) = object.comment(comment_id) else { return };
            let sec = command_security(&checkable);
            let params = serde_json::json!({ "checkable": checkable, "comment": comment });
            if let Err(e) = router.relay(None, "cluster::AddComment", params, true, Some(sec)) {
                tracing::warn!(error = %e, checkable = %checkable, "failed to relay comment");
            }
        }
        Signal::CommentRemoved { checkable, comment_id } => {
            let sec = command_security(&checkable);
            let params = serde_json::json!({ "checkable": checkable, "id": comment_id });
            if let Err(e) = router.relay(None, "cluster::RemoveComment", params, true, Some(sec)) {
                tracing::warn!(error = %e, checkable = %checkable, "failed to relay comment removal");
            }
        }
        Signal::DowntimeAdded { checkable, downtime_id } => {
            let Some(object) = type_registry.get(&checkable) else { return };
            let Some(downtime) = object.downtime(downtime_id) else { return };
            let sec = command_security(&checkable);
            let params = serde_json::json!({ "checkable": checkable, "downtime": downtime });
            if let Err(e) = router.relay(None, "cluster::AddDowntime", params, true, Some(sec)) {
                tracing::warn!(error = %e, checkable = %checkable, "failed to relay downtime");
            }
        }
        Signal::DowntimeRemoved { checkable, downtime_id } => {
            let sec = command_security(&checkable);
            let params = serde_json::json!({ "checkable": checkable, "id": downtime_id });
            if let Err(e) = router.relay(None, "cluster::RemoveDowntime", params, true, Some(sec)) {
                tracing::warn!(error = %e, checkable = %checkable, "failed to relay downtime removal");
            }
        }
        Signal::NotificationsRequested { checkable, kind } => {
            let Some(object) = type_registry.get(&checkable) else { return };
            let notification = Notification {
                targets: object.config.notification_targets.clone(),
            };
            if notification.targets.is_empty() {
                return;
            }
            let Some(result) = object.last_check_result() else { return };
            notification_engine
                .request_notifications(
                    &checkable,
                    &notification,
                    kind,
                    result.state,
                    chrono::Utc::now(),
                    false,
                    &result.output,
                    |_user| true,
                )
                .await;
        }
        _ => {}
    }
}

fn command_security(checkable: &CheckableRef) -> SecurityDescriptor {
    SecurityDescriptor {
        object_type: checkable_kind_str(checkable).to_string(),
        name: checkable.canonical_name(),
        privs: Privilege::COMMAND,
    }
}
