//! Per-key registry of in-flight fetches.
//!
//! The first caller for a key becomes the leader and receives a
//! [`FlightGuard`]; later callers receive a receiver on the same channel.
//! Dropping the guard, whether after publishing or during a panic,
//! unregisters the key, and a receiver whose sender vanished without a value
//! reports the flight as aborted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pitwall_core::{FetchError, PitwallError, PitwallResult, SessionKey};
use tokio::sync::watch;

use super::freshness::TableRead;

pub(crate) type FlightResult = Option<PitwallResult<TableRead>>;

#[derive(Default)]
pub(crate) struct Flights {
    inner: Mutex<HashMap<SessionKey, watch::Receiver<FlightResult>>>,
}

pub(crate) enum Join {
    Leader(FlightGuard, watch::Receiver<FlightResult>),
    Follower(watch::Receiver<FlightResult>),
}

impl Flights {
    pub(crate) fn lock(&self) -> FlightsLock<'_> {
        FlightsLock(self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().0.len()
    }
}

/// Held while deciding whether to lead or follow, so no second leader can
/// appear between the check and the registration.
pub(crate) struct FlightsLock<'a>(MutexGuard<'a, HashMap<SessionKey, watch::Receiver<FlightResult>>>);

impl FlightsLock<'_> {
    pub(crate) fn join(mut self, flights: &Arc<Flights>, key: SessionKey) -> Join {
        if let Some(rx) = self.0.get(&key) {
            return Join::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        self.0.insert(key, rx.clone());
        Join::Leader(
            FlightGuard {
                key,
                tx,
                flights: Arc::clone(flights),
            },
            rx,
        )
    }
}

/// Leader's handle on a flight.
pub(crate) struct FlightGuard {
    key: SessionKey,
    tx: watch::Sender<FlightResult>,
    flights: Arc<Flights>,
}

impl FlightGuard {
    /// Hand `result` to every waiter and unregister the flight.
    pub(crate) fn publish(self, result: PitwallResult<TableRead>) {
        self.tx.send_replace(Some(result));
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut flights = self.flights.lock();
        let ours = flights
            .0
            .get(&self.key)
            .is_some_and(|rx| rx.same_channel(&self.tx.subscribe()));
        if ours {
            flights.0.remove(&self.key);
        }
    }
}

/// Wait for the flight behind `rx` to publish.
pub(crate) async fn wait(
    key: SessionKey,
    mut rx: watch::Receiver<FlightResult>,
) -> PitwallResult<TableRead> {
    match rx.wait_for(Option::is_some).await {
        Ok(result) => result
            .clone()
            .unwrap_or_else(|| Err(PitwallError::Fetch(FetchError::Aborted { key }))),
        Err(_) => Err(FetchError::Aborted { key }.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::freshness::ReadSource;
    use chrono::Utc;
    use pitwall_test_utils::fixtures::{cache_entry, enriched_table, RACE_2024_R05};

    fn read() -> TableRead {
        TableRead::new(
            cache_entry(enriched_table(RACE_2024_R05, 1), Utc::now(), chrono::Duration::hours(1)),
            ReadSource::Fetched,
        )
    }

    #[tokio::test]
    async fn test_second_join_follows_first() {
        let flights = Arc::new(Flights::default());
        let leader = flights.lock().join(&flights, RACE_2024_R05);
        let follower = flights.lock().join(&flights, RACE_2024_R05);

        let (guard, leader_rx) = match leader {
            Join::Leader(guard, rx) => (guard, rx),
            Join::Follower(_) => panic!("first join must lead"),
        };
        let follower_rx = match follower {
            Join::Follower(rx) => rx,
            Join::Leader(..) => panic!("second join must follow"),
        };
        assert_eq!(flights.len(), 1);

        guard.publish(Ok(read()));
        assert_eq!(flights.len(), 0);
        assert!(wait(RACE_2024_R05, leader_rx).await.is_ok());
        assert!(wait(RACE_2024_R05, follower_rx).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_guard_aborts_waiters() {
        let flights = Arc::new(Flights::default());
        let rx = match flights.lock().join(&flights, RACE_2024_R05) {
            Join::Leader(guard, rx) => {
                drop(guard);
                rx
            }
            Join::Follower(_) => panic!("first join must lead"),
        };

        assert_eq!(flights.len(), 0);
        assert!(matches!(
            wait(RACE_2024_R05, rx).await,
            Err(PitwallError::Fetch(FetchError::Aborted { .. }))
        ));
    }
}
