//! The single place session state is written out.
//!
//! Two triggers share [`Flusher::flush`]: an opportunistic call after each
//! user action and a fixed-interval ticker for surfaces that may vanish
//! without notice. Both are harmless to race because the gateway merges.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::session::Session;
use crate::store::{KeyValueStore, PersistenceGateway};

pub struct Flusher<S> {
    session: Arc<Mutex<Session>>,
    gateway: Arc<PersistenceGateway<S>>,
    ticker: Option<JoinHandle<()>>,
}

impl<S: KeyValueStore + 'static> Flusher<S> {
    pub fn new(session: Arc<Mutex<Session>>, gateway: Arc<PersistenceGateway<S>>) -> Self {
        Self {
            session,
            gateway,
            ticker: None,
        }
    }

    /// Flush every `every` until stopped or dropped.
    pub fn start_periodic(&mut self, every: Duration) {
        self.stop_periodic();
        let session = self.session.clone();
        let gateway = self.gateway.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                flush_once(&session, &gateway).await;
            }
        }));
        debug!(?every, "periodic flush started");
    }

    pub fn stop_periodic(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    /// Save the session if anything changed since the last successful save.
    pub async fn flush(&self) -> bool {
        flush_once(&self.session, &self.gateway).await
    }

    /// Stop the ticker and write one last time.
    pub async fn teardown(mut self) {
        self.stop_periodic();
        self.flush().await;
        debug!("surface torn down");
    }
}

impl<S> Drop for Flusher<S> {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

async fn flush_once<S: KeyValueStore>(
    session: &Mutex<Session>,
    gateway: &PersistenceGateway<S>,
) -> bool {
    let mut session = session.lock().await;
    if !session.is_dirty() {
        return false;
    }
    let saved = gateway.save(&session).await;
    if saved {
        session.mark_clean();
    }
    saved
}
