//! UTXO reservations across concurrent send attempts.
//!
//! A send reserves the outpoints it selected and receives a guard. Dropping
//! the guard releases them; after a successful broadcast the guard is turned
//! into a timed hold so the spent outputs are not re-selected while the
//! explorer still reports them as unspent.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

use crate::wallet::types::OutPoint;

#[derive(Debug, Clone)]
struct Reservation {
    attempt: Uuid,
    /// `None` while the owning attempt is still running.
    hold_until: Option<Instant>,
}

impl Reservation {
    fn is_active(&self, now: Instant) -> bool {
        self.hold_until.map_or(true, |until| now < until)
    }
}

/// Registry of reserved outpoints, shared by every orchestrator of a wallet.
#[derive(Debug, Clone, Default)]
pub struct UtxoReservations {
    entries: Arc<DashMap<OutPoint, Reservation>>,
}

impl UtxoReservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve all of `outpoints` or none of them.
    ///
    /// On conflict, returns the outpoints already held by another attempt.
    /// Expired holds are purged first.
    pub fn reserve(&self, outpoints: &[OutPoint]) -> Result<ReservationGuard, Vec<OutPoint>> {
        let attempt = Uuid::new_v4();
        let now = Instant::now();
        self.purge_expired_at(now);
        let mut taken = Vec::with_capacity(outpoints.len());
        let mut conflicts = Vec::new();

        for outpoint in outpoints {
            match self.entries.entry(outpoint.clone()) {
                Entry::Occupied(mut occupied) => {
                    if occupied.get().is_active(now) {
                        conflicts.push(outpoint.clone());
                    } else {
                        occupied.insert(Reservation {
                            attempt,
                            hold_until: None,
                        });
                        taken.push(outpoint.clone());
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(Reservation {
                        attempt,
                        hold_until: None,
                    });
                    taken.push(outpoint.clone());
                }
            }
        }

        if !conflicts.is_empty() {
            release(&self.entries, attempt, &taken);
            return Err(conflicts);
        }

        tracing::debug!(attempt = %attempt, count = taken.len(), "Reserved outputs");
        Ok(ReservationGuard {
            entries: Arc::clone(&self.entries),
            attempt,
            outpoints: taken,
            hold: None,
        })
    }

    pub fn is_reserved(&self, outpoint: &OutPoint) -> bool {
        let now = Instant::now();
        self.entries
            .get(outpoint)
            .is_some_and(|r| r.is_active(now))
    }

    /// Drop holds that have expired.
    pub fn purge_expired(&self) {
        self.purge_expired_at(Instant::now());
    }

    fn purge_expired_at(&self, now: Instant) {
        self.entries.retain(|_, r| r.is_active(now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn release(entries: &DashMap<OutPoint, Reservation>, attempt: Uuid, outpoints: &[OutPoint]) {
    for outpoint in outpoints {
        entries.remove_if(outpoint, |_, r| r.attempt == attempt);
    }
}

/// Releases its outpoints when dropped, unless converted into a hold.
#[derive(Debug)]
pub struct ReservationGuard {
    entries: Arc<DashMap<OutPoint, Reservation>>,
    attempt: Uuid,
    outpoints: Vec<OutPoint>,
    hold: Option<Duration>,
}

impl ReservationGuard {
    pub fn attempt(&self) -> Uuid {
        self.attempt
    }

    pub fn outpoints(&self) -> &[OutPoint] {
        &self.outpoints
    }

    /// Keep the outpoints reserved for `duration` after the guard goes away.
    pub fn hold_for(mut self, duration: Duration) {
        self.hold = Some(duration);
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        match self.hold {
            Some(duration) => {
                let until = Instant::now() + duration;
                for outpoint in &self.outpoints {
                    if let Some(mut r) = self.entries.get_mut(outpoint) {
                        if r.attempt == self.attempt {
                            r.hold_until = Some(until);
                        }
                    }
                }
                tracing::debug!(attempt = %self.attempt, hold_secs = duration.as_secs(), "Holding spent outputs");
            }
            None => {
                release(&self.entries, self.attempt, &self.outpoints);
                tracing::trace!(attempt = %self.attempt, "Released outputs");
            }
        }
    }
}
