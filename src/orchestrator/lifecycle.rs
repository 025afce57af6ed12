//! Lifecycle polling loop.
//!
//! Periodically lists every session, derives its status from live signals
//! (runtime liveness, agent activity, PR / CI / review state), and reacts to
//! status transitions: persist the new status, emit an event, then either run
//! the configured reaction or notify a human. Tracked statuses and reaction
//! attempt counters live only in memory and are rebuilt from persisted
//! session status after a restart.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::bounded;
use super::reactions::{
    event_type_for_status, infer_priority, reaction_key_for_event, reaction_key_for_status,
    should_escalate, ReactionTracker, ALL_COMPLETE,
};
use super::session_manager::SessionManager;
use crate::config::OrchestratorConfig;
use crate::events::EventLogger;
use crate::models::event::{types, EventPriority, OrchestratorEvent};
use crate::models::reaction::{ReactionAction, ReactionConfig};
use crate::models::session::{keys, ActivityState, Session, SessionStatus};
use crate::plugins::{CiStatus, PluginRegistry, PrState, ReviewDecision};
use crate::{AppError, Result};

/// Session id used for fleet-wide events.
pub const SYSTEM_SESSION: &str = "system";

/// Project id used for fleet-wide events.
pub const ALL_PROJECTS: &str = "all";

/// Reaction key fired when a PR starts conflicting with its base.
const MERGE_CONFLICTS: &str = "merge-conflicts";

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// `tokio::time::interval` rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

type TrackerKey = (String, String);

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    config: Arc<OrchestratorConfig>,
    registry: Arc<PluginRegistry>,
    sessions: SessionManager,
    states: Mutex<HashMap<String, SessionStatus>>,
    trackers: Mutex<HashMap<TrackerKey, ReactionTracker>>,
    conflicted: Mutex<HashSet<String>>,
    all_complete: AtomicBool,
    event_logger: std::sync::Mutex<Option<Arc<dyn EventLogger>>>,
    events: broadcast::Sender<OrchestratorEvent>,
    poll: std::sync::Mutex<Option<PollTask>>,
}

/// Outcome of evaluating the PR flow for one session.
struct PrObservation {
    status: SessionStatus,
    conflicts: Option<bool>,
}

/// Handle to the lifecycle engine. Cloning shares the same state.
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

impl LifecycleManager {
    /// Engine over an explicit configuration, registry, and session manager.
    #[must_use]
    pub fn new(
        config: Arc<OrchestratorConfig>,
        registry: Arc<PluginRegistry>,
        sessions: SessionManager,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                sessions,
                states: Mutex::new(HashMap::new()),
                trackers: Mutex::new(HashMap::new()),
                conflicted: Mutex::new(HashSet::new()),
                all_complete: AtomicBool::new(false),
                event_logger: std::sync::Mutex::new(None),
                events,
                poll: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Attach a durable event log. Released again by [`stop`](Self::stop).
    pub fn set_event_logger(&self, logger: Arc<dyn EventLogger>) {
        if let Ok(mut slot) = self.inner.event_logger.lock() {
            *slot = Some(logger);
        }
    }

    /// Receive every event emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    /// Start polling: one pass immediately, then one every `interval`.
    /// Calling it while the loop runs does nothing.
    pub fn start(&self, interval: Duration) {
        let Ok(mut poll) = self.inner.poll.lock() else {
            warn!("lifecycle poll state poisoned, not starting");
            return;
        };
        if poll.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            debug!("lifecycle loop already running");
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let this = self.clone();
        let period = interval.max(MIN_INTERVAL);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                this.poll_all().await;
            }
            info!("lifecycle loop stopped");
        });

        info!(interval = ?period, "lifecycle loop started");
        *poll = Some(PollTask { cancel, handle });
    }

    /// Stop polling and release the event logger. A pass already in flight
    /// finishes; no new pass starts. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(task) = self.take_task() {
            task.cancel.cancel();
        }
        self.release_logger();
    }

    /// [`stop`](Self::stop), then wait for the in-flight pass to finish.
    pub async fn stop_and_wait(&self) {
        if let Some(task) = self.take_task() {
            task.cancel.cancel();
            if let Err(err) = task.handle.await {
                warn!(%err, "lifecycle loop ended abnormally");
            }
        }
        self.release_logger();
    }

    /// Whether the polling loop is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .poll
            .lock()
            .is_ok_and(|poll| poll.as_ref().is_some_and(|task| !task.handle.is_finished()))
    }

    /// Copy of the tracked status per session id.
    pub async fn get_states(&self) -> HashMap<String, SessionStatus> {
        self.inner.states.lock().await.clone()
    }

    /// Re-evaluate one session now and react if its status changed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions and any error from
    /// loading the session.
    pub async fn check(&self, session_id: &str) -> Result<SessionStatus> {
        let session = self
            .inner
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        Ok(self.check_session(session).await)
    }

    /// One polling pass over every session.
    pub async fn poll_all(&self) {
        let sessions = match self.inner.sessions.list(None).await {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(%err, "failed to list sessions, skipping poll");
                return;
            }
        };

        let tracked = self.get_states().await;
        let due: Vec<Session> = sessions
            .iter()
            .filter(|s| {
                let known = tracked
                    .get(&s.id)
                    .copied()
                    .unwrap_or_else(|| persisted_status(s));
                !known.is_terminal() || known != s.status
            })
            .cloned()
            .collect();

        join_all(due.into_iter().map(|session| self.check_session(session))).await;

        let live: HashSet<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        let states = {
            let mut states = self.inner.states.lock().await;
            states.retain(|id, _| live.contains(id.as_str()));
            states.clone()
        };
        self.inner
            .trackers
            .lock()
            .await
            .retain(|(id, _), _| id == SYSTEM_SESSION || live.contains(id.as_str()));
        self.inner
            .conflicted
            .lock()
            .await
            .retain(|id| live.contains(id.as_str()));

        let all_terminal = !sessions.is_empty()
            && sessions.iter().all(|s| {
                states
                    .get(&s.id)
                    .copied()
                    .unwrap_or(s.status)
                    .is_terminal()
            });

        if all_terminal {
            if !self.inner.all_complete.swap(true, Ordering::SeqCst) {
                self.fire_all_complete(sessions.len()).await;
            }
        } else if !sessions.is_empty() && self.inner.all_complete.swap(false, Ordering::SeqCst) {
            debug!("active sessions reappeared, all-complete armed again");
            self.inner
                .trackers
                .lock()
                .await
                .remove(&(SYSTEM_SESSION.to_owned(), ALL_COMPLETE.to_owned()));
        }
    }

    /// Never fails: every backend error inside degrades to a safe default,
    /// so one session cannot stall the rest of a pass.
    async fn check_session(&self, mut session: Session) -> SessionStatus {
        let span = info_span!(
            "check_session",
            session_id = session.id,
            project_id = session.project_id
        );
        async move {
            let persisted = persisted_status(&session);
            let tracked = self.inner.states.lock().await.get(&session.id).copied();
            let old = tracked.unwrap_or(persisted);

            let (new, conflicts) = self.determine_status(&mut session, old, persisted).await;
            self.inner
                .states
                .lock()
                .await
                .insert(session.id.clone(), new);

            if new != old {
                info!(old = %old, new = %new, "status transition");
                self.on_transition(&session, old, new).await;
            }
            if let Some(conflicted) = conflicts {
                self.on_conflicts(&session, conflicted).await;
            }
            new
        }
        .instrument(span)
        .await
    }

    /// Status decision tree, strongest signal first.
    async fn determine_status(
        &self,
        session: &mut Session,
        current: SessionStatus,
        persisted: SessionStatus,
    ) -> (SessionStatus, Option<bool>) {
        if current == SessionStatus::Merged || persisted == SessionStatus::Merged {
            return (SessionStatus::Merged, None);
        }
        let sessions = &self.inner.sessions;

        match sessions.runtime_alive(session).await {
            Ok(false) => {
                session.activity = ActivityState::Exited;
                return (SessionStatus::Killed, None);
            }
            Ok(true) => {}
            Err(err) => warn!(%err, "runtime liveness probe failed"),
        }

        if session.runtime_handle.is_some() {
            match sessions.probe_activity(session).await {
                Err(err) => {
                    if matches!(current, SessionStatus::Stuck | SessionStatus::NeedsInput) {
                        debug!(%err, "activity probe failed, keeping {current}");
                        return (current, None);
                    }
                    debug!(%err, "activity probe inconclusive");
                }
                Ok(activity) => {
                    session.activity = activity;
                    match activity {
                        ActivityState::WaitingInput => return (SessionStatus::NeedsInput, None),
                        ActivityState::Blocked => return (SessionStatus::Stuck, None),
                        ActivityState::Exited => return (SessionStatus::Killed, None),
                        ActivityState::Idle | ActivityState::Active => {
                            match sessions.agent_process_running(session).await {
                                Ok(false) => {
                                    session.activity = ActivityState::Exited;
                                    return (SessionStatus::Killed, None);
                                }
                                Ok(true) => {}
                                Err(err) => debug!(%err, "agent process probe failed"),
                            }
                        }
                    }
                }
            }
        }

        match self.observe_pr(session).await {
            Ok(Some(observation)) => return (observation.status, observation.conflicts),
            Ok(None) => {}
            Err(err) => warn!(%err, "pull request probe failed"),
        }

        let fallback = match persisted {
            SessionStatus::Spawning
            | SessionStatus::Stuck
            | SessionStatus::NeedsInput
            | SessionStatus::Killed => SessionStatus::Working,
            other => other,
        };
        (fallback, None)
    }

    async fn observe_pr(&self, session: &mut Session) -> Result<Option<PrObservation>> {
        let sessions = &self.inner.sessions;
        let project = sessions.project(&session.project_id)?;
        let Some(scm) = sessions.scm_for(project)? else {
            return Ok(None);
        };
        let limit = self.inner.config.action_timeout();

        if session.pr.is_none() {
            if let Some(pr) = bounded(limit, "pr detection", scm.detect_pr(session, project)).await?
            {
                sessions.attach_pr(&session.id, &pr)?;
                info!(pr = pr.url, "pull request detected");
                session.pr = Some(pr);
            }
        }
        let Some(pr) = &session.pr else {
            return Ok(None);
        };

        let status = match bounded(limit, "pr state", scm.pr_state(pr)).await? {
            PrState::Merged => SessionStatus::Merged,
            PrState::Closed => SessionStatus::Killed,
            PrState::Open => {
                if bounded(limit, "ci summary", scm.ci_summary(pr)).await? == CiStatus::Failing {
                    SessionStatus::CiFailed
                } else if pr.is_draft {
                    SessionStatus::PrOpen
                } else {
                    let readiness = bounded(limit, "mergeability", scm.mergeability(pr)).await?;
                    let status = match bounded(limit, "review", scm.review_decision(pr)).await? {
                        ReviewDecision::ChangesRequested => SessionStatus::ChangesRequested,
                        ReviewDecision::Approved if readiness.is_ready() => {
                            SessionStatus::Mergeable
                        }
                        ReviewDecision::Approved => SessionStatus::Approved,
                        ReviewDecision::Pending => SessionStatus::ReviewPending,
                        ReviewDecision::None => SessionStatus::PrOpen,
                    };
                    return Ok(Some(PrObservation {
                        status,
                        conflicts: Some(!readiness.no_conflicts),
                    }));
                }
            }
        };
        Ok(Some(PrObservation {
            status,
            conflicts: None,
        }))
    }

    async fn on_transition(&self, session: &Session, old: SessionStatus, new: SessionStatus) {
        if let Some(key) = reaction_key_for_status(old) {
            self.inner
                .trackers
                .lock()
                .await
                .remove(&(session.id.clone(), key.to_owned()));
        }

        if let Err(err) = self.inner.sessions.update_status(&session.id, new) {
            warn!(%err, "failed to persist status");
        }

        let Some(event_type) = event_type_for_status(new) else {
            return;
        };
        let event = OrchestratorEvent::new(
            event_type,
            infer_priority(event_type),
            &session.id,
            &session.project_id,
            format!("{}: {old} -> {new}", session.id),
        )
        .with_data("oldStatus", old.as_str())
        .with_data("newStatus", new.as_str());
        self.emit(&event);

        self.react_or_notify(&session.id, &session.project_id, &event)
            .await;
    }

    async fn on_conflicts(&self, session: &Session, conflicted: bool) {
        let newly = {
            let mut set = self.inner.conflicted.lock().await;
            if conflicted {
                set.insert(session.id.clone())
            } else {
                set.remove(&session.id);
                false
            }
        };

        if !conflicted {
            self.inner
                .trackers
                .lock()
                .await
                .remove(&(session.id.clone(), MERGE_CONFLICTS.to_owned()));
            return;
        }
        if newly {
            let event = OrchestratorEvent::new(
                types::MERGE_CONFLICTS,
                infer_priority(types::MERGE_CONFLICTS),
                &session.id,
                &session.project_id,
                format!("{}: pull request has merge conflicts", session.id),
            );
            self.emit(&event);
            self.react_or_notify(&session.id, &session.project_id, &event)
                .await;
        }
    }

    async fn fire_all_complete(&self, count: usize) {
        info!(sessions = count, "all sessions complete");
        let event = OrchestratorEvent::new(
            types::ALL_COMPLETE,
            infer_priority(types::ALL_COMPLETE),
            SYSTEM_SESSION,
            ALL_PROJECTS,
            format!("all {count} sessions are complete"),
        )
        .with_data("sessions", count);
        self.emit(&event);
        self.react_or_notify(SYSTEM_SESSION, ALL_PROJECTS, &event)
            .await;
    }

    /// Run the reaction configured for the event, or notify a human when
    /// there is none (or it is not automatic).
    async fn react_or_notify(&self, session_id: &str, project_id: &str, event: &OrchestratorEvent) {
        if let Some(key) = reaction_key_for_event(&event.event_type) {
            if let Some(reaction) = self.inner.config.reaction_for(project_id, key) {
                if reaction.is_auto() {
                    self.execute_reaction(session_id, project_id, key, &reaction)
                        .await;
                    return;
                }
            }
        }
        self.notify_human(event).await;
    }

    async fn execute_reaction(
        &self,
        session_id: &str,
        project_id: &str,
        key: &str,
        reaction: &ReactionConfig,
    ) {
        let now = Utc::now();
        let tracker = *self
            .inner
            .trackers
            .lock()
            .await
            .entry((session_id.to_owned(), key.to_owned()))
            .and_modify(|t| t.attempts += 1)
            .or_insert_with(|| ReactionTracker::first(now));

        if should_escalate(&tracker, reaction, now) {
            warn!(
                session_id,
                reaction_key = key,
                attempts = tracker.attempts,
                "reaction escalated to a human"
            );
            let event = OrchestratorEvent::new(
                types::REACTION_ESCALATED,
                EventPriority::Urgent,
                session_id,
                project_id,
                format!(
                    "{session_id}: reaction {key} escalated after {} attempts",
                    tracker.attempts
                ),
            )
            .with_data("reactionKey", key)
            .with_data("attempts", tracker.attempts);
            self.emit(&event);
            self.notify_human(&event).await;
            return;
        }

        let limit = self.inner.config.action_timeout();
        match reaction.action.unwrap_or(ReactionAction::Notify) {
            ReactionAction::SendToAgent => {
                let Some(message) = reaction.message.as_deref() else {
                    warn!(session_id, reaction_key = key, "send-to-agent reaction has no message");
                    return;
                };
                match bounded(limit, "send-to-agent", self.inner.sessions.send(session_id, message))
                    .await
                {
                    Ok(()) => info!(
                        session_id,
                        reaction_key = key,
                        attempt = tracker.attempts,
                        "reaction message sent"
                    ),
                    Err(err) => warn!(session_id, reaction_key = key, %err, "reaction send failed"),
                }
            }
            ReactionAction::AutoMerge => {
                match bounded(limit, "auto-merge", self.inner.sessions.merge_pr(session_id)).await {
                    Ok(()) => {
                        let event = triggered(
                            session_id,
                            project_id,
                            key,
                            EventPriority::Action,
                            tracker.attempts,
                        );
                        self.emit(&event);
                        self.notify_human(&event).await;
                    }
                    Err(err) => warn!(session_id, reaction_key = key, %err, "auto-merge failed"),
                }
            }
            ReactionAction::Notify => {
                let priority = reaction.priority.unwrap_or(EventPriority::Info);
                let event = triggered(session_id, project_id, key, priority, tracker.attempts);
                self.emit(&event);
                self.notify_human(&event).await;
            }
        }
    }

    /// Dispatch to every notifier routed for the event's priority. Info
    /// events are never dispatched.
    async fn notify_human(&self, event: &OrchestratorEvent) {
        if event.priority == EventPriority::Info {
            debug!(event_type = event.event_type, "info event, not dispatched");
            return;
        }

        let limit = self.inner.config.action_timeout();
        let deliveries = self
            .inner
            .config
            .notifiers_for(event.priority)
            .iter()
            .map(|name| async move {
                let notifier = self.inner.registry.notifier(name)?;
                bounded(limit, "notifier", notifier.notify(event)).await
            });

        let names = self.inner.config.notifiers_for(event.priority);
        for (name, result) in names.iter().zip(join_all(deliveries).await) {
            if let Err(err) = result {
                warn!(notifier = name, event_type = event.event_type, %err, "notification failed");
            }
        }
    }

    /// Append to the event log and broadcast to subscribers.
    fn emit(&self, event: &OrchestratorEvent) {
        let logger = self
            .inner
            .event_logger
            .lock()
            .ok()
            .and_then(|slot| slot.clone());
        if let Some(logger) = logger {
            if let Err(err) = logger.log_event(event) {
                warn!(%err, event_type = event.event_type, "failed to log event");
            }
        }
        if self.inner.events.send(event.clone()).is_err() {
            debug!(event_type = event.event_type, "no event subscribers");
        }
    }

    fn take_task(&self) -> Option<PollTask> {
        self.inner.poll.lock().ok().and_then(|mut poll| poll.take())
    }

    fn release_logger(&self) {
        if let Ok(mut slot) = self.inner.event_logger.lock() {
            slot.take();
        }
    }
}

fn triggered(
    session_id: &str,
    project_id: &str,
    key: &str,
    priority: EventPriority,
    attempts: u32,
) -> OrchestratorEvent {
    OrchestratorEvent::new(
        types::REACTION_TRIGGERED,
        priority,
        session_id,
        project_id,
        format!("{session_id}: reaction {key} triggered"),
    )
    .with_data("reactionKey", key)
    .with_data("attempts", attempts)
}

/// Status last written to the session's record.
fn persisted_status(session: &Session) -> SessionStatus {
    session
        .metadata
        .get(keys::STATUS)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(session.status)
}
