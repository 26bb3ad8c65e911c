//! Background delivery of membership work
//!
//! Host events arrive over HTTP and are queued here, so the request returns
//! immediately. The sweep scheduler runs the bulk reconciliation on a fixed
//! interval. Both read the settings snapshot at the moment they act.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{membership::MembershipService, settings::SettingsHandle};
use crate::{models::MembershipEvent, Error, Result};

/// Default capacity of the event queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Sending half of the event queue
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    tx: mpsc::Sender<MembershipEvent>,
}

impl EventDispatcher {
    /// Start the worker that applies queued events.
    ///
    /// The worker stops when the token is cancelled or every sender is
    /// dropped; in the latter case queued events are drained first.
    pub fn spawn(
        service: MembershipService,
        settings: SettingsHandle,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<MembershipEvent>(capacity.max(1));

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                debug!(?event, "Applying membership event");
                let snapshot = settings.current();
                if let Err(e) = service.handle_event(&snapshot, &event).await {
                    warn!(?event, error = %e, "Membership event failed");
                }
            }
            info!("Membership event worker stopped");
        });

        (Self { tx }, handle)
    }

    /// Queue an event without waiting
    pub fn try_dispatch(&self, event: MembershipEvent) -> Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::Internal("membership event queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::Internal("membership event worker is not running".to_string())
            }
        })
    }
}

/// Periodic bulk sweep
#[derive(Debug, Clone)]
pub struct SweepScheduler {
    service: MembershipService,
    settings: SettingsHandle,
    interval: Duration,
    run_on_startup: bool,
}

impl SweepScheduler {
    #[must_use]
    pub fn new(
        service: MembershipService,
        settings: SettingsHandle,
        interval: Duration,
        run_on_startup: bool,
    ) -> Self {
        Self {
            service,
            settings,
            interval: interval.max(Duration::from_secs(1)),
            run_on_startup,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !self.run_on_startup {
            // The first tick completes immediately
            ticker.tick().await;
        }

        info!(interval_secs = self.interval.as_secs(), "Membership sweep scheduler started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = self.settings.current();
            if !snapshot.enabled {
                continue;
            }
            if let Err(e) = self.service.sync_all(&snapshot).await {
                warn!(error = %e, "Membership sweep failed");
            }
        }
        info!("Membership sweep scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{GroupId, UserId},
        test_helpers::{fixture, settings, user, STREAMERS_GROUP},
    };

    #[tokio::test]
    async fn test_dispatcher_drains_queue_on_close() {
        let (store, directory) = fixture();
        directory.insert_user(user(1, "alice", 3));
        let service = MembershipService::new(directory.clone(), store.clone());

        let (dispatcher, handle) = EventDispatcher::spawn(
            service,
            SettingsHandle::new(settings()),
            8,
            CancellationToken::new(),
        );
        dispatcher
            .try_dispatch(MembershipEvent::UserCreated { user_id: UserId(1) })
            .unwrap();
        drop(dispatcher);
        handle.await.unwrap();

        assert!(directory.members_of(GroupId(STREAMERS_GROUP)).contains(&UserId(1)));
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_fails() {
        let (store, directory) = fixture();
        let shutdown = CancellationToken::new();
        let (dispatcher, handle) = EventDispatcher::spawn(
            MembershipService::new(directory, store),
            SettingsHandle::new(settings()),
            1,
            shutdown.clone(),
        );

        shutdown.cancel();
        handle.await.unwrap();

        let err = dispatcher
            .try_dispatch(MembershipEvent::UserCreated { user_id: UserId(1) })
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_sweeps_on_interval() {
        let (store, directory) = fixture();
        directory.insert_user(user(1, "alice", 3));
        let shutdown = CancellationToken::new();
        let handle = SweepScheduler::new(
            MembershipService::new(directory.clone(), store.clone()),
            SettingsHandle::new(settings()),
            Duration::from_secs(60),
            true,
        )
        .spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(directory.members_of(GroupId(STREAMERS_GROUP)).contains(&UserId(1)));

        directory.insert_user(user(2, "bob", 3));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!directory.members_of(GroupId(STREAMERS_GROUP)).contains(&UserId(2)));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(directory.members_of(GroupId(STREAMERS_GROUP)).contains(&UserId(2)));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_can_skip_startup_sweep() {
        let (store, directory) = fixture();
        directory.insert_user(user(1, "alice", 3));
        let shutdown = CancellationToken::new();
        let handle = SweepScheduler::new(
            MembershipService::new(directory.clone(), store),
            SettingsHandle::new(settings()),
            Duration::from_secs(60),
            false,
        )
        .spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(directory.members_of(GroupId(STREAMERS_GROUP)).is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
