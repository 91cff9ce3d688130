//! Call Session Registry
//!
//! The process-wide store of call sessions and the only component allowed to
//! create, mutate or retire them. Each session sits behind its own mutex, so
//! operations on one call are serialized while different calls proceed
//! independently; the outer map lock is only held long enough to find or
//! insert a session handle.

use crate::agent::{AgentCatalog, AgentKind};
use crate::context::ContextUpdate;
use crate::error::RegistryError;
use crate::pipeline::VoicePipeline;
use crate::session::{CallSession, CallStatus, CallSummary};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

type SessionHandle = Arc<Mutex<CallSession>>;

fn lock(handle: &SessionHandle) -> MutexGuard<'_, CallSession> {
    handle.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Admission limit for calls that have not ended yet.
    pub max_concurrent_calls: usize,
    /// How long an ended call stays queryable before it may be purged.
    pub ended_retention: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 100,
            ended_retention: Duration::from_secs(3600),
        }
    }
}

/// Counters describing the registry's current and historical load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RegistryStats {
    pub total_created: u64,
    /// Calls that have not ended.
    pub live: usize,
    pub created: usize,
    pub active: usize,
    /// Ended calls still within the retention window.
    pub ended: usize,
    pub rejected: u64,
    pub failed: u64,
    pub handoffs: u64,
}

pub struct CallRegistry {
    catalog: Arc<AgentCatalog>,
    pipeline: Arc<dyn VoicePipeline>,
    config: RegistryConfig,
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
    live: AtomicUsize,
    total_created: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    handoffs: AtomicU64,
}

impl CallRegistry {
    pub fn new(
        catalog: Arc<AgentCatalog>,
        pipeline: Arc<dyn VoicePipeline>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            catalog,
            pipeline,
            config,
            sessions: RwLock::new(HashMap::new()),
            live: AtomicUsize::new(0),
            total_created: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            handoffs: AtomicU64::new(0),
        }
    }

    pub fn catalog(&self) -> &Arc<AgentCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn handle(&self, call_id: Uuid) -> Result<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&call_id)
            .cloned()
            .ok_or(RegistryError::NotFound(call_id))
    }

    fn handles(&self) -> Vec<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Runs `f` with exclusive access to one session.
    fn with_session<T>(
        &self,
        call_id: Uuid,
        f: impl FnOnce(&mut CallSession) -> Result<T>,
    ) -> Result<T> {
        let handle = self.handle(call_id)?;
        let mut session = lock(&handle);
        f(&mut session)
    }

    /// Starts a new call owned by the triage agent.
    pub fn create(&self, patient_name: Option<String>) -> Result<CallSummary> {
        self.create_with_metadata(patient_name, BTreeMap::new())
    }

    pub fn create_with_metadata(
        &self,
        patient_name: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<CallSummary> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());

        let limit = self.config.max_concurrent_calls;
        if self.live.load(Ordering::SeqCst) >= limit {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(limit, "Rejecting new call: concurrent call limit reached");
            return Err(RegistryError::CapacityExceeded { limit });
        }

        let mut call_id = Uuid::new_v4();
        while sessions.contains_key(&call_id) {
            call_id = Uuid::new_v4();
        }

        let session = CallSession::new(
            call_id,
            self.catalog.initial().clone(),
            patient_name,
            metadata,
            Utc::now(),
        );
        let summary = session.summary();
        sessions.insert(call_id, Arc::new(Mutex::new(session)));
        self.live.fetch_add(1, Ordering::SeqCst);
        self.total_created.fetch_add(1, Ordering::Relaxed);

        info!(call_id = %call_id, room = %summary.room_name, "Call created");
        Ok(summary)
    }

    pub fn get(&self, call_id: Uuid) -> Result<CallSummary> {
        self.with_session(call_id, |session| Ok(session.summary()))
    }

    /// Snapshots of every tracked call, including ended calls within the
    /// retention window. Each summary is read under its session's lock.
    pub fn list(&self) -> Vec<CallSummary> {
        self.handles()
            .iter()
            .map(|handle| lock(handle).summary())
            .collect()
    }

    /// Looks up a call by its room name.
    pub fn find_by_room(&self, room_name: &str) -> Option<Uuid> {
        let call_id = room_name
            .strip_prefix("medical-")
            .and_then(|id| Uuid::try_parse(id).ok())?;
        let handle = self.handle(call_id).ok()?;
        let matches = lock(&handle).room_name() == room_name;
        matches.then_some(call_id)
    }

    /// Reports that a voice pipeline attached to the call. Repeated reports
    /// for an active call are accepted and change nothing.
    pub fn mark_active(&self, call_id: Uuid) -> Result<CallSummary> {
        let (activated, summary) = self.with_session(call_id, |session| {
            let activated = session.activate(Utc::now())?;
            Ok((activated, session.summary()))
        })?;
        if activated {
            info!(call_id = %call_id, "Call active");
        }
        Ok(summary)
    }

    /// Ends a call and asks the pipeline to tear it down.
    ///
    /// Ending an ended call fails with `AlreadyEnded`. If the pipeline
    /// cannot tear down, the call stays ended and the failure is returned.
    pub fn end(&self, call_id: Uuid) -> Result<CallSummary> {
        let summary = self.with_session(call_id, |session| {
            session.end(Utc::now())?;
            Ok(session.summary())
        })?;
        self.live.fetch_sub(1, Ordering::SeqCst);
        info!(call_id = %call_id, agent = %summary.agent, "Call ended");

        if let Err(e) = self.pipeline.teardown(call_id) {
            self.failed.fetch_add(1, Ordering::Relaxed);
            error!(call_id = %call_id, error = %e, "Pipeline teardown failed");
            return Err(RegistryError::UpstreamAdapterFailure {
                call_id,
                reason: e.to_string(),
            });
        }
        Ok(summary)
    }

    /// Hands the call over to `next`, leaving the caller context intact.
    ///
    /// The pipeline is told about the new agent before the session lock is
    /// released, so concurrent handoffs on one call reach it in the order
    /// they were applied.
    pub fn apply_handoff(&self, call_id: Uuid, next: AgentKind) -> Result<CallSummary> {
        let target = self.catalog.get(next).clone();
        let (from, summary, notified) = self
            .with_session(call_id, |session| {
                let from = session.current_agent().kind;
                session.hand_off(target.clone(), Utc::now())?;
                let summary = session.summary();
                let notified = self.pipeline.agent_changed(call_id, &target, &summary.context);
                Ok((from, summary, notified))
            })
            .inspect_err(|e| {
                if let RegistryError::InvalidTransition { from, to, .. } = e {
                    warn!(call_id = %call_id, from = %from, to = %to, "Rejected handoff");
                }
            })?;
        self.handoffs.fetch_add(1, Ordering::Relaxed);
        info!(call_id = %call_id, from = %from, to = %next, "Agent handoff applied");

        // The handoff stands either way; a pipeline that lost the event is
        // disconnected and reports its own failure.
        if let Err(e) = notified {
            warn!(call_id = %call_id, to = %next, error = %e, "Pipeline missed agent change");
        }
        Ok(summary)
    }

    pub fn update_context(&self, call_id: Uuid, update: ContextUpdate) -> Result<CallSummary> {
        self.with_session(call_id, |session| {
            session.update_context(update, Utc::now())?;
            Ok(session.summary())
        })
    }

    pub fn record_participant(&self, call_id: Uuid, identity: &str) -> Result<CallSummary> {
        self.with_session(call_id, |session| {
            session.add_participant(identity, Utc::now())?;
            Ok(session.summary())
        })
    }

    /// Records that the pipeline for a call failed to attach or keep
    /// running. The call is ended rather than left in limbo, and the error
    /// to surface to the caller is returned.
    pub fn report_adapter_failure(&self, call_id: Uuid, reason: impl Into<String>) -> RegistryError {
        let reason = reason.into();
        if let Err(e) = self.with_session(call_id, |session| session.end(Utc::now())) {
            return e;
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::Relaxed);
        error!(call_id = %call_id, reason = %reason, "Voice pipeline failed; call ended");

        if let Err(e) = self.pipeline.teardown(call_id) {
            warn!(call_id = %call_id, error = %e, "Teardown after pipeline failure also failed");
        }
        RegistryError::UpstreamAdapterFailure { call_id, reason }
    }

    /// Drops ended calls whose retention window has passed. Returns the
    /// number of calls removed.
    pub fn purge_ended(&self, now: DateTime<Utc>) -> usize {
        let retention = TimeDelta::from_std(self.config.ended_retention).unwrap_or(TimeDelta::MAX);
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, handle| match lock(handle).ended_at() {
            Some(ended_at) => now.signed_duration_since(ended_at) < retention,
            None => true,
        });
        let purged = before - sessions.len();
        if purged > 0 {
            info!(purged, "Purged ended calls past retention");
        }
        purged
    }

    /// Ends every call that has not ended yet. Returns how many were ended.
    pub fn shutdown(&self) -> usize {
        let call_ids: Vec<Uuid> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();

        let ended = call_ids
            .into_iter()
            .filter(|call_id| {
                matches!(
                    self.end(*call_id),
                    Ok(_) | Err(RegistryError::UpstreamAdapterFailure { .. })
                )
            })
            .count();
        info!(ended, "Registry drained");
        ended
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total_created: self.total_created.load(Ordering::Relaxed),
            live: self.live.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
            ..Default::default()
        };
        for handle in self.handles() {
            match lock(&handle).status() {
                CallStatus::Created => stats.created += 1,
                CallStatus::Active => stats.active += 1,
                CallStatus::Ended => stats.ended += 1,
            }
        }
        stats
    }
}
