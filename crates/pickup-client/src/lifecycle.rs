//! Disposal item lifecycle: `stored -> requested -> picked_up`
//!
//! The lifecycle is the only writer of item status. Every write names the
//! status it expects to find; a mismatch is a [`LifecycleError::StateConflict`]
//! rather than an overwrite.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use wastetrack_common::{DisposalItem, DisposalItemId, DisposalStatus, LifecycleError};

/// Items held by pickup creations that have not resolved yet
type ReservedSet = Arc<StdMutex<HashSet<DisposalItemId>>>;

/// Items held for one pending pickup creation
///
/// Hand it to [`DisposalLifecycle::commit_reservation`] once the pickup
/// exists. Dropping it any other way frees the items untouched.
#[derive(Debug)]
#[must_use]
pub struct Reservation {
    item_ids: Vec<DisposalItemId>,
    reserved: ReservedSet,
}

impl Reservation {
    pub fn item_ids(&self) -> &[DisposalItemId] {
        &self.item_ids
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        for id in &self.item_ids {
            reserved.remove(id);
        }
    }
}

/// Per-item status tracking
pub struct DisposalLifecycle {
    items: Mutex<HashMap<DisposalItemId, DisposalItem>>,
    reserved: ReservedSet,
}

impl DisposalLifecycle {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            reserved: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Start tracking an item, or refresh a tracked one
    ///
    /// A refresh may only carry the status forward.
    pub async fn track(&self, item: DisposalItem) -> Result<(), LifecycleError> {
        let mut items = self.items.lock().await;

        if let Some(existing) = items.get(&item.id) {
            if rank(existing.status) > rank(item.status) {
                return Err(LifecycleError::StateConflict {
                    item_id: item.id,
                    expected: item.status,
                    actual: existing.status,
                });
            }
        }

        debug!("Tracking disposal item {} ({})", item.id, item.status);
        items.insert(item.id, item);
        Ok(())
    }

    pub async fn status(&self, item_id: DisposalItemId) -> Option<DisposalStatus> {
        self.items
            .lock()
            .await
            .get(&item_id)
            .map(|item| item.status)
    }

    pub async fn item(&self, item_id: DisposalItemId) -> Option<DisposalItem> {
        self.items.lock().await.get(&item_id).cloned()
    }

    /// Hold every item for a pickup creation, all or nothing
    ///
    /// Each item must be tracked, `stored`, and not held by another pending
    /// creation.
    pub async fn reserve_for_pickup(
        &self,
        item_ids: &[DisposalItemId],
    ) -> Result<Reservation, LifecycleError> {
        let items = self.items.lock().await;
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);

        for id in item_ids {
            let item = items.get(id).ok_or(LifecycleError::UnknownItem(*id))?;

            if item.status != DisposalStatus::Stored {
                return Err(LifecycleError::StateConflict {
                    item_id: *id,
                    expected: DisposalStatus::Stored,
                    actual: item.status,
                });
            }

            if reserved.contains(id) {
                return Err(LifecycleError::ItemBusy(*id));
            }
        }

        reserved.extend(item_ids.iter().copied());

        Ok(Reservation {
            item_ids: item_ids.to_vec(),
            reserved: Arc::clone(&self.reserved),
        })
    }

    /// The pickup was created remotely: move the held items to `requested`
    ///
    /// Items the server has already carried further keep their status.
    pub async fn commit_reservation(&self, reservation: Reservation) {
        let mut items = self.items.lock().await;

        for id in reservation.item_ids() {
            if let Some(item) = items.get_mut(id) {
                if item.status == DisposalStatus::Stored {
                    item.status = DisposalStatus::Requested;
                }
            }
        }

        info!(
            "Disposal items {:?} moved to {}",
            reservation.item_ids(),
            DisposalStatus::Requested
        );
        drop(reservation);
    }

    /// The pickup creation failed: free the held items untouched
    pub async fn release_reservation(&self, reservation: Reservation) {
        debug!("Releasing disposal items {:?}", reservation.item_ids());
        drop(reservation);
    }

    /// Apply a confirmed pickup: `requested -> picked_up`
    ///
    /// Items this device does not track report [`LifecycleError::UnknownItem`]
    /// and are left alone.
    pub async fn confirm_picked_up(&self, item_id: DisposalItemId) -> Result<(), LifecycleError> {
        let mut items = self.items.lock().await;

        match items.get_mut(&item_id) {
            Some(item) if item.status == DisposalStatus::Requested => {
                item.status = DisposalStatus::PickedUp;
                info!("Disposal item {} picked up", item_id);
                Ok(())
            }
            Some(item) => {
                warn!(
                    "Refusing pickup confirmation for item {} in state {}",
                    item_id, item.status
                );
                Err(LifecycleError::StateConflict {
                    item_id,
                    expected: DisposalStatus::Requested,
                    actual: item.status,
                })
            }
            None => {
                debug!("Confirmed item {} was not tracked locally", item_id);
                Err(LifecycleError::UnknownItem(item_id))
            }
        }
    }

    /// Catch a stale item up with a status the backend reported
    ///
    /// Skipped steps are allowed; moving backwards is a
    /// [`LifecycleError::StateConflict`].
    pub async fn catch_up(
        &self,
        item_id: DisposalItemId,
        status: DisposalStatus,
    ) -> Result<(), LifecycleError> {
        let mut items = self.items.lock().await;
        let item = items
            .get_mut(&item_id)
            .ok_or(LifecycleError::UnknownItem(item_id))?;

        if rank(item.status) > rank(status) {
            return Err(LifecycleError::StateConflict {
                item_id,
                expected: status,
                actual: item.status,
            });
        }

        if item.status != status {
            warn!(
                "Disposal item {} was {} locally, backend reports {}",
                item_id, item.status, status
            );
            item.status = status;
        }
        Ok(())
    }
}

impl Default for DisposalLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

fn rank(status: DisposalStatus) -> u8 {
    match status {
        DisposalStatus::Stored => 0,
        DisposalStatus::Requested => 1,
        DisposalStatus::PickedUp => 2,
    }
}
