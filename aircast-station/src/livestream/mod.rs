use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use aircast_core::{
    store::{Lease, StateStore, StoreError},
    Config, DisconnectReason, Event, LivestreamEndedData, LivestreamStartedData, SourceMetadata,
};

use crate::{db::Database, AuthError, StationContext};

/// The mixer-side id of the live input, as addressed over the command
/// channel.
const LIVE_INPUT_ID: &str = "live";

const SLOT_KEY: &str = "slot";
const ACTIVE_FLAG_KEY: &str = "livestream:active_flag";
const WATCHDOG_LEASE_KEY: &str = "lease:watchdog";

type Result<T> = std::result::Result<T, LivestreamError>;

#[derive(Debug, Error)]
pub enum LivestreamError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// The single global broadcast slot, stored as one JSON value so
/// reservation stays a single atomic operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotState {
    pub principal_id: String,
    pub session_id: String,
    pub show_name: Option<String>,
    pub max_streaming_seconds: u64,
    pub min_recording_duration: u64,
    /// Set once the mixer confirms the session; absent while reserved
    pub connected_at: Option<DateTime<Utc>>,
}

/// The outcome of an auth callback.
#[derive(Debug, Clone)]
pub struct AuthDecision {
    pub accept: bool,
    pub reason: Option<String>,
    pub session_id: Option<String>,
}

impl AuthDecision {
    fn reject(reason: impl Into<String>) -> Self {
        Self {
            accept: false,
            reason: Some(reason.into()),
            session_id: None,
        }
    }

    fn accept(session_id: String) -> Self {
        Self {
            accept: true,
            reason: None,
            session_id: Some(session_id),
        }
    }
}

/// First-come-first-served arbitration of the live slot, cumulative time
/// accounting across reconnects, and the time-limit watchdog.
pub struct LivestreamArbiter<S, Db> {
    context: StationContext<S, Db>,
}

impl<S, Db> LivestreamArbiter<S, Db>
where
    S: StateStore,
    Db: Database,
{
    pub fn new(context: &StationContext<S, Db>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    fn store(&self) -> &S {
        &self.context.store
    }

    /// Validates a broadcaster credential and atomically reserves the slot.
    /// Two concurrent calls never both succeed.
    pub async fn authenticate(&self, _user: &str, password: &str) -> Result<AuthDecision> {
        let claims = match self.context.auth.verify_livestream_token(password) {
            Ok(claims) => claims,
            Err(AuthError::Expired) => return Ok(AuthDecision::reject("Token has expired")),
            Err(_) => return Ok(AuthDecision::reject("Invalid token")),
        };

        let used = self.ledger_seconds(&claims.user_id).await?;
        if used >= claims.max_streaming_seconds {
            return Ok(AuthDecision::reject(format!(
                "Streaming time limit exceeded ({used}/{}s)",
                claims.max_streaming_seconds
            )));
        }

        let slot = SlotState {
            principal_id: claims.user_id.clone(),
            session_id: Uuid::new_v4().to_string(),
            show_name: claims.show_name.clone(),
            max_streaming_seconds: claims.max_streaming_seconds,
            min_recording_duration: claims.min_recording_duration,
            connected_at: None,
        };

        let payload = serde_json::to_string(&slot)
            .map_err(|e| StoreError::Unavailable(Box::new(e)))?;

        let reserved = self
            .store()
            .set_if_absent(SLOT_KEY, &payload, Some(Config::SLOT_RESERVATION_TTL))
            .await?;

        if reserved {
            info!(
                "Livestream slot reserved for {} (show: {:?})",
                claims.user_id, claims.show_name
            );
            return Ok(AuthDecision::accept(slot.session_id));
        }

        // The slot is taken. The same broadcaster reconnecting within their
        // session window keeps their reservation.
        match self.slot().await? {
            Some(existing) if existing.principal_id == claims.user_id => {
                Ok(AuthDecision::accept(existing.session_id))
            }
            Some(_) => Ok(AuthDecision::reject(
                "Streaming slot is already occupied by another user",
            )),
            None => Ok(AuthDecision::reject("Streaming slot is occupied")),
        }
    }

    /// Confirms that the reserved session is on air. Idempotent; a connect
    /// with no matching reservation is ignored.
    pub async fn connect(&self, session_id: &str) -> Result<()> {
        let Some(mut slot) = self.slot().await? else {
            warn!("Ignoring connect for unknown session {session_id}");
            return Ok(());
        };

        if slot.session_id != session_id {
            warn!(
                "Ignoring connect for session {session_id}, slot is held by {}",
                slot.session_id
            );
            return Ok(());
        }

        let first_connect = slot.connected_at.is_none();

        if first_connect {
            slot.connected_at = Some(Utc::now());
        }

        let payload = serde_json::to_string(&slot)
            .map_err(|e| StoreError::Unavailable(Box::new(e)))?;

        self.store()
            .set_ex(SLOT_KEY, &payload, Config::SLOT_SESSION_TTL)
            .await?;
        self.store()
            .set_ex(ACTIVE_FLAG_KEY, "1", Config::SLOT_SESSION_TTL)
            .await?;

        if first_connect {
            self.context
                .events
                .publish(Event::LivestreamStarted(LivestreamStartedData {
                    principal_id: slot.principal_id.clone(),
                    session_id: slot.session_id.clone(),
                    show_name: slot.show_name.clone(),
                    min_recording_duration: slot.min_recording_duration,
                }))
                .await;
        }

        Ok(())
    }

    /// Ends a session: accounts the elapsed time exactly once, releases the
    /// slot, and publishes `livestream_ended`. Tolerates arriving before or
    /// after the watchdog's enforcement of the same session.
    pub async fn disconnect(&self, session_id: &str, reason: DisconnectReason) -> Result<()> {
        let slot = match self.slot().await? {
            Some(slot) if slot.session_id == session_id => slot,
            Some(_) => {
                debug!("Ignoring disconnect for stale session {session_id}");
                return Ok(());
            }
            None => {
                debug!("Disconnect for {session_id} found no slot, nothing to release");
                return Ok(());
            }
        };

        self.finish_session(&slot, reason).await
    }

    /// Runs one finished session through accounting and teardown. The
    /// per-session end marker guarantees this happens exactly once even
    /// when the disconnect callback and the watchdog race.
    async fn finish_session(&self, slot: &SlotState, reason: DisconnectReason) -> Result<()> {
        let claimed = self
            .store()
            .set_if_absent(
                &format!("session:{}:ended", slot.session_id),
                "1",
                Some(Duration::from_secs(3600)),
            )
            .await?;

        if !claimed {
            // The other side of the race already accounted this session;
            // just make sure the slot is not left behind.
            self.release_slot().await?;
            return Ok(());
        }

        let elapsed = slot
            .connected_at
            .map(|connected_at| (Utc::now() - connected_at).num_seconds().max(0) as u64)
            .unwrap_or(0);

        if elapsed > 0 {
            let ledger_key = format!("ledger:{}", slot.principal_id);
            let total = self.store().incr_by(&ledger_key, elapsed as i64).await?;
            self.store().expire(&ledger_key, Config::LEDGER_TTL).await?;

            info!(
                "Livestream session ended for {}: {elapsed}s (total: {total}s)",
                slot.principal_id
            );
        }

        self.release_slot().await?;

        self.context
            .events
            .publish(Event::LivestreamEnded(LivestreamEndedData {
                principal_id: slot.principal_id.clone(),
                session_id: slot.session_id.clone(),
                duration_seconds: elapsed,
                reason,
            }))
            .await;

        Ok(())
    }

    async fn release_slot(&self) -> Result<()> {
        self.store().del(SLOT_KEY).await?;
        self.store().del(ACTIVE_FLAG_KEY).await?;
        // Stale metadata must not leak into the next stream
        self.store().del("metadata:livestream").await?;
        Ok(())
    }

    /// One watchdog tick: if the current holder has spent their allowance,
    /// issue the forced disconnect and account the session. The disconnect
    /// callback remains welcome afterwards; the end marker makes it a
    /// no-op.
    pub async fn enforce_time_limit(&self) -> Result<()> {
        let Some(slot) = self.slot().await? else {
            return Ok(());
        };

        let Some(connected_at) = slot.connected_at else {
            // Reserved but never confirmed; the reservation TTL handles it
            return Ok(());
        };

        let elapsed = (Utc::now() - connected_at).num_seconds().max(0) as u64;
        let previous = self.ledger_seconds(&slot.principal_id).await?;
        let total = previous + elapsed;

        if total < slot.max_streaming_seconds {
            debug!(
                "Time check for {}: {total}/{}s",
                slot.principal_id, slot.max_streaming_seconds
            );
            return Ok(());
        }

        warn!(
            "{} exceeded the streaming limit ({total}/{}s), disconnecting",
            slot.principal_id, slot.max_streaming_seconds
        );

        // Fire the command without waiting on confirmation; the callback is
        // the source of truth and the end marker resolves the race.
        if let Err(e) = self.context.live_control.disconnect(LIVE_INPUT_ID).await {
            warn!("Failed to issue forced disconnect: {e}");
        }

        self.finish_session(&slot, DisconnectReason::Limit).await
    }

    /// The watchdog loop. Holds a state-store lease so only one replica
    /// enforces; losing the lease suspends enforcement until re-acquired.
    pub async fn run_watchdog(&self) {
        let interval = self.context.config.watchdog_interval;
        let lease = Lease::new(WATCHDOG_LEASE_KEY, interval * 2);

        info!("Time-limit watchdog started");

        loop {
            tokio::time::sleep(interval).await;

            match lease.acquire(self.store()).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Watchdog lease held elsewhere, skipping tick");
                    continue;
                }
                Err(e) => {
                    warn!("Watchdog lease check failed: {e}");
                    continue;
                }
            }

            if let Err(e) = self.enforce_time_limit().await {
                warn!("Watchdog tick failed: {e}");
            }
        }
    }

    /// Metadata reported by the mixer mid-stream. Non-empty fields are
    /// merged over what was last seen, and the liveness flag is refreshed.
    pub async fn update_metadata(&self, update: SourceMetadata) -> Result<()> {
        let existing = self
            .store()
            .get("metadata:livestream")
            .await?
            .and_then(|raw| serde_json::from_str::<SourceMetadata>(&raw).ok())
            .unwrap_or_default();

        let merged = SourceMetadata {
            title: update.title.or(existing.title),
            artist: update.artist.or(existing.artist),
            genre: update.genre.or(existing.genre),
            description: update.description.or(existing.description),
        };

        let payload = serde_json::to_string(&merged)
            .map_err(|e| StoreError::Unavailable(Box::new(e)))?;

        self.store().set("metadata:livestream", &payload).await?;

        if self.store().get(ACTIVE_FLAG_KEY).await?.is_some() {
            self.store()
                .expire(ACTIVE_FLAG_KEY, Duration::from_secs(60))
                .await?;
        }

        info!("Updated livestream metadata: {merged:?}");
        Ok(())
    }

    pub async fn slot(&self) -> Result<Option<SlotState>> {
        let raw = self.store().get(SLOT_KEY).await?;

        Ok(raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(slot) => Some(slot),
            Err(e) => {
                warn!("Discarding unreadable slot state: {e}");
                None
            }
        }))
    }

    /// Whether a live session is currently on air.
    pub async fn is_live(&self) -> Result<bool> {
        Ok(self.store().get(ACTIVE_FLAG_KEY).await?.is_some())
    }

    async fn ledger_seconds(&self, principal_id: &str) -> Result<u64> {
        let raw = self.store().get(&format!("ledger:{principal_id}")).await?;
        Ok(raw.and_then(|raw| raw.parse().ok()).unwrap_or(0))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{test_station, TestMediaTools, TestStation};

    use aircast_core::{
        store::{StateStore as _, Subscription},
        Envelope, EventType,
    };

    fn arbiter(
        station: &TestStation,
    ) -> LivestreamArbiter<aircast_core::store::MemoryStore, crate::db::MemoryDatabase> {
        LivestreamArbiter::new(&station.context)
    }

    fn issue_token(station: &TestStation, max_streaming_seconds: u64) -> String {
        station
            .context
            .auth
            .issue_livestream_token(max_streaming_seconds, Some("night show".to_string()), 10)
            .unwrap()
            .0
    }

    async fn ended_events(subscription: &mut Subscription) -> Vec<Envelope> {
        let mut events = vec![];

        while let Ok(Some(message)) = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            subscription.next_message(),
        )
        .await
        {
            events.push(serde_json::from_str(&message.payload).unwrap());
        }

        events
    }

    /// Rewrites the stored slot as if the session connected in the past.
    async fn backdate_connection(station: &TestStation, seconds: i64) {
        let raw = station.context.store.get(SLOT_KEY).await.unwrap().unwrap();
        let mut slot: SlotState = serde_json::from_str(&raw).unwrap();

        slot.connected_at = Some(Utc::now() - chrono::Duration::seconds(seconds));

        station
            .context
            .store
            .set(SLOT_KEY, &serde_json::to_string(&slot).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_auth_has_a_single_winner() {
        let station = test_station(TestMediaTools::new(180.0));
        let arbiter = std::sync::Arc::new(arbiter(&station));

        let first_token = issue_token(&station, 60);
        let second_token = issue_token(&station, 60);

        let (first, second) = tokio::join!(
            arbiter.authenticate("source", &first_token),
            arbiter.authenticate("source", &second_token),
        );

        let accepts = [first.unwrap(), second.unwrap()]
            .iter()
            .filter(|decision| decision.accept)
            .count();

        assert_eq!(accepts, 1, "exactly one concurrent auth may win the slot");
    }

    #[tokio::test]
    async fn test_loser_wins_after_winner_disconnects() {
        let station = test_station(TestMediaTools::new(180.0));
        let arbiter = arbiter(&station);

        let winner = arbiter
            .authenticate("source", &issue_token(&station, 60))
            .await
            .unwrap();
        assert!(winner.accept);

        let loser_token = issue_token(&station, 60);
        let refused = arbiter.authenticate("source", &loser_token).await.unwrap();
        assert!(!refused.accept);

        let session_id = winner.session_id.unwrap();
        arbiter.connect(&session_id).await.unwrap();
        arbiter
            .disconnect(&session_id, DisconnectReason::Client)
            .await
            .unwrap();

        let retry = arbiter.authenticate("source", &loser_token).await.unwrap();
        assert!(retry.accept, "the freed slot should be reservable again");
    }

    #[tokio::test]
    async fn test_rejects_invalid_and_spent_credentials() {
        let station = test_station(TestMediaTools::new(180.0));
        let arbiter = arbiter(&station);

        let garbage = arbiter.authenticate("source", "not-a-token").await.unwrap();
        assert!(!garbage.accept);
        assert!(garbage.reason.is_some());

        // A broadcaster who already spent their allowance is refused before
        // the slot is even considered
        let token = issue_token(&station, 60);
        let decision = arbiter.authenticate("source", &token).await.unwrap();
        let principal = {
            let raw = station.context.store.get(SLOT_KEY).await.unwrap().unwrap();
            serde_json::from_str::<SlotState>(&raw).unwrap().principal_id
        };

        arbiter
            .disconnect(&decision.session_id.unwrap(), DisconnectReason::Client)
            .await
            .unwrap();

        station
            .context
            .store
            .set(&format!("ledger:{principal}"), "60")
            .await
            .unwrap();

        let spent = arbiter.authenticate("source", &token).await.unwrap();
        assert!(!spent.accept, "a spent allowance should be refused");
        assert!(spent.reason.unwrap().contains("limit exceeded"));
    }

    #[tokio::test]
    async fn test_connect_before_auth_is_ignored() {
        let station = test_station(TestMediaTools::new(180.0));
        let arbiter = arbiter(&station);

        let mut subscription = station
            .context
            .events
            .subscribe(&[EventType::LivestreamStarted])
            .await
            .unwrap();

        arbiter.connect("never-reserved").await.unwrap();

        assert!(
            ended_events(&mut subscription).await.is_empty(),
            "an out-of-order connect must not start a session"
        );
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let station = test_station(TestMediaTools::new(180.0));
        let arbiter = arbiter(&station);

        let decision = arbiter
            .authenticate("source", &issue_token(&station, 60))
            .await
            .unwrap();
        let session_id = decision.session_id.unwrap();

        let mut subscription = station
            .context
            .events
            .subscribe(&[EventType::LivestreamStarted])
            .await
            .unwrap();

        arbiter.connect(&session_id).await.unwrap();
        arbiter.connect(&session_id).await.unwrap();

        assert_eq!(
            ended_events(&mut subscription).await.len(),
            1,
            "a session may start at most once"
        );
    }

    #[tokio::test]
    async fn test_disconnect_accounts_elapsed_time_once() {
        let station = test_station(TestMediaTools::new(180.0));
        let arbiter = arbiter(&station);

        let decision = arbiter
            .authenticate("source", &issue_token(&station, 600))
            .await
            .unwrap();
        let session_id = decision.session_id.unwrap();

        arbiter.connect(&session_id).await.unwrap();
        backdate_connection(&station, 90).await;

        let principal = {
            let raw = station.context.store.get(SLOT_KEY).await.unwrap().unwrap();
            serde_json::from_str::<SlotState>(&raw).unwrap().principal_id
        };

        let mut subscription = station
            .context
            .events
            .subscribe(&[EventType::LivestreamEnded])
            .await
            .unwrap();

        arbiter
            .disconnect(&session_id, DisconnectReason::Client)
            .await
            .unwrap();
        // A duplicate callback must not double-account
        arbiter
            .disconnect(&session_id, DisconnectReason::Client)
            .await
            .unwrap();

        let ledger: u64 = station
            .context
            .store
            .get(&format!("ledger:{principal}"))
            .await
            .unwrap()
            .unwrap()
            .parse()
            .unwrap();

        assert!(
            (90..=91).contains(&ledger),
            "the ledger should hold the elapsed session time, got {ledger}"
        );

        let events = ended_events(&mut subscription).await;
        assert_eq!(events.len(), 1, "exactly one livestream_ended per session");
        assert_eq!(events[0].data["reason"], "client");
        assert!(events[0].data["duration_seconds"].as_u64().unwrap() >= 90);

        assert!(
            station.context.store.get(SLOT_KEY).await.unwrap().is_none(),
            "the slot should be released"
        );
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_releases_the_slot() {
        let station = test_station(TestMediaTools::new(180.0));
        let arbiter = arbiter(&station);

        let decision = arbiter
            .authenticate("source", &issue_token(&station, 60))
            .await
            .unwrap();

        let mut subscription = station
            .context
            .events
            .subscribe(&[EventType::LivestreamEnded])
            .await
            .unwrap();

        arbiter
            .disconnect(&decision.session_id.unwrap(), DisconnectReason::Client)
            .await
            .unwrap();

        let events = ended_events(&mut subscription).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].data["duration_seconds"], 0,
            "a session that never connected has no airtime"
        );
        assert!(station.context.store.get(SLOT_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_watchdog_enforces_the_limit() {
        let station = test_station(TestMediaTools::new(180.0));
        let arbiter = arbiter(&station);

        let decision = arbiter
            .authenticate("source", &issue_token(&station, 120))
            .await
            .unwrap();
        let session_id = decision.session_id.unwrap();

        arbiter.connect(&session_id).await.unwrap();

        let principal = {
            let raw = station.context.store.get(SLOT_KEY).await.unwrap().unwrap();
            serde_json::from_str::<SlotState>(&raw).unwrap().principal_id
        };

        // 100s already on the ledger plus 30s of session beats the 120s cap
        station
            .context
            .store
            .set(&format!("ledger:{principal}"), "100")
            .await
            .unwrap();
        backdate_connection(&station, 30).await;

        let mut subscription = station
            .context
            .events
            .subscribe(&[EventType::LivestreamEnded])
            .await
            .unwrap();

        arbiter.enforce_time_limit().await.unwrap();

        assert_eq!(
            station.live_control.disconnects(),
            vec!["live"],
            "the watchdog should kick the live input"
        );

        let events = ended_events(&mut subscription).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["reason"], "limit");

        let ledger: u64 = station
            .context
            .store
            .get(&format!("ledger:{principal}"))
            .await
            .unwrap()
            .unwrap()
            .parse()
            .unwrap();
        assert!(ledger >= 130, "ledger should include the enforced session");

        // The late disconnect callback finds the session already accounted
        arbiter
            .disconnect(&session_id, DisconnectReason::Client)
            .await
            .unwrap();

        assert!(
            ended_events(&mut subscription).await.is_empty(),
            "the callback after enforcement must not emit a second ending"
        );
    }

    #[tokio::test]
    async fn test_watchdog_leaves_sessions_under_the_limit_alone() {
        let station = test_station(TestMediaTools::new(180.0));
        let arbiter = arbiter(&station);

        let decision = arbiter
            .authenticate("source", &issue_token(&station, 600))
            .await
            .unwrap();
        arbiter.connect(&decision.session_id.unwrap()).await.unwrap();

        arbiter.enforce_time_limit().await.unwrap();

        assert!(
            station.live_control.disconnects().is_empty(),
            "a session within its limit must not be kicked"
        );
        assert!(station.context.store.get(SLOT_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_metadata_merges_and_clears_with_the_session() {
        let station = test_station(TestMediaTools::new(180.0));
        let arbiter = arbiter(&station);

        arbiter
            .update_metadata(SourceMetadata {
                title: Some("Opening".to_string()),
                artist: Some("The Host".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        arbiter
            .update_metadata(SourceMetadata {
                title: Some("Second Song".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let stored: SourceMetadata = serde_json::from_str(
            &station
                .context
                .store
                .get("metadata:livestream")
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap();

        assert_eq!(stored.title.as_deref(), Some("Second Song"));
        assert_eq!(
            stored.artist.as_deref(),
            Some("The Host"),
            "fields absent from an update keep their last-seen value"
        );

        // Ending a session clears the metadata for the next stream
        let decision = arbiter
            .authenticate("source", &issue_token(&station, 60))
            .await
            .unwrap();
        let session_id = decision.session_id.unwrap();
        arbiter.connect(&session_id).await.unwrap();
        arbiter
            .disconnect(&session_id, DisconnectReason::Client)
            .await
            .unwrap();

        assert!(
            station
                .context
                .store
                .get("metadata:livestream")
                .await
                .unwrap()
                .is_none(),
            "stale metadata must not leak into the next stream"
        );
    }
}
