//! Pickup request status machine
//!
//! `requested -> processing -> completed`, with `canceled` reachable from
//! either non-terminal state. Local status only changes after the backend
//! accepted the transition. Transitions of one pickup are serialised;
//! different pickups advance independently. Once a request is sent, its
//! outcome is applied locally even if the caller stops waiting.
//!
//! The machine also keeps the pickup -> disposal items correlation used to
//! join the two lifecycles. It never completes a pickup on its own when
//! its last item is picked up; that stays an operator decision.

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use wastetrack_common::wire::{CreatePickupRequest, ErrorCode, PickupStatusResponse, UpdatePickupRequest};
use wastetrack_common::{
    DisposalItemId, DisposalStatus, LabId, PickupError, PickupId, PickupRequest, PickupStatus,
};

use crate::api::{ApiError, PickupApi};
use crate::flight::{KeyedGuard, KeyedLocks};
use crate::lifecycle::{DisposalLifecycle, Reservation};

type PickupMap = Arc<Mutex<HashMap<PickupId, PickupRequest>>>;

/// How far the items of one pickup have got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickupProgress {
    pub total: usize,
    pub picked_up: usize,
}

impl PickupProgress {
    pub fn all_picked_up(&self) -> bool {
        self.total > 0 && self.picked_up == self.total
    }
}

pub struct PickupStatusMachine {
    api: Arc<dyn PickupApi>,
    lifecycle: Arc<DisposalLifecycle>,
    pickups: PickupMap,
    locks: KeyedLocks<PickupId>,
}

impl PickupStatusMachine {
    pub fn new(api: Arc<dyn PickupApi>, lifecycle: Arc<DisposalLifecycle>) -> Self {
        Self {
            api,
            lifecycle,
            pickups: Arc::new(Mutex::new(HashMap::new())),
            locks: KeyedLocks::new(),
        }
    }

    /// Create a pickup request and move its items to `requested`
    ///
    /// The items are held while `POST /pickups` is in flight, so a second
    /// concurrent creation cannot claim them too. Nothing changes locally if
    /// the backend refuses.
    pub async fn create(
        &self,
        lab_id: LabId,
        request_date: NaiveDate,
        disposal_item_ids: Vec<DisposalItemId>,
    ) -> Result<PickupRequest, PickupError> {
        validate_new(lab_id, &disposal_item_ids)?;

        let reservation = self.lifecycle.reserve_for_pickup(&disposal_item_ids).await?;

        let request = CreatePickupRequest {
            lab_id,
            request_date,
            disposal_item_ids,
        };

        let task = tokio::spawn(submit_pickup(
            Arc::clone(&self.api),
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.pickups),
            reservation,
            request,
        ));

        task.await.unwrap_or_else(|e| {
            Err(PickupError::NetworkFailure(format!(
                "pickup creation task failed: {}",
                e
            )))
        })
    }

    /// Adopt a pickup request loaded from the backend
    pub async fn track(&self, pickup: PickupRequest) {
        self.pickups.lock().await.insert(pickup.id, pickup);
    }

    pub async fn get(&self, pickup_id: PickupId) -> Option<PickupRequest> {
        self.pickups.lock().await.get(&pickup_id).cloned()
    }

    pub async fn status(&self, pickup_id: PickupId) -> Option<PickupStatus> {
        self.pickups
            .lock()
            .await
            .get(&pickup_id)
            .map(|pickup| pickup.status)
    }

    /// Move a pickup to `target`
    pub async fn advance(
        &self,
        pickup_id: PickupId,
        target: PickupStatus,
    ) -> Result<PickupRequest, PickupError> {
        let guard = self.locks.acquire(&pickup_id).await;

        let current = self
            .status(pickup_id)
            .await
            .ok_or(PickupError::UnknownPickup(pickup_id))?;

        if !current.can_transition_to(target) {
            warn!(
                "Rejected transition for pickup {}: {} -> {}",
                pickup_id, current, target
            );
            return Err(PickupError::InvalidTransition {
                pickup_id,
                from: current,
                to: target,
            });
        }

        let task = tokio::spawn(submit_transition(
            Arc::clone(&self.api),
            Arc::clone(&self.pickups),
            guard,
            pickup_id,
            current,
            target,
        ));

        task.await.unwrap_or_else(|e| {
            Err(PickupError::NetworkFailure(format!(
                "pickup update task failed: {}",
                e
            )))
        })
    }

    /// Disposal items included in a pickup
    pub async fn items_of(&self, pickup_id: PickupId) -> Option<Vec<DisposalItemId>> {
        self.pickups
            .lock()
            .await
            .get(&pickup_id)
            .map(|pickup| pickup.disposal_item_ids.clone())
    }

    /// The pickup a disposal item belongs to
    pub async fn pickup_of(&self, item_id: DisposalItemId) -> Option<PickupId> {
        self.pickups
            .lock()
            .await
            .values()
            .find(|pickup| pickup.disposal_item_ids.contains(&item_id))
            .map(|pickup| pickup.id)
    }

    /// Join a pickup with its items' lifecycle
    pub async fn progress(&self, pickup_id: PickupId) -> Option<PickupProgress> {
        let items = self.items_of(pickup_id).await?;

        let mut picked_up = 0;
        for id in &items {
            if self.lifecycle.status(*id).await == Some(DisposalStatus::PickedUp) {
                picked_up += 1;
            }
        }

        Some(PickupProgress {
            total: items.len(),
            picked_up,
        })
    }
}

async fn submit_pickup(
    api: Arc<dyn PickupApi>,
    lifecycle: Arc<DisposalLifecycle>,
    pickups: PickupMap,
    reservation: Reservation,
    request: CreatePickupRequest,
) -> Result<PickupRequest, PickupError> {
    let lab_id = request.lab_id;

    let created = match api.create_pickup(&request).await {
        Ok(response) => check_created(&pickups, response).await,
        Err(e) => Err(classify(e, None)),
    };

    let (id, status) = match created {
        Ok(created) => created,
        Err(err) => {
            warn!("Pickup creation for lab {} failed: {}", lab_id, err);
            lifecycle.release_reservation(reservation).await;
            return Err(err);
        }
    };

    lifecycle.commit_reservation(reservation).await;

    let pickup = PickupRequest {
        id,
        lab_id,
        request_date: request.request_date,
        disposal_item_ids: request.disposal_item_ids,
        status,
    };
    pickups.lock().await.insert(id, pickup.clone());

    info!(
        "Created pickup {} for lab {} with items {:?}",
        id, lab_id, pickup.disposal_item_ids
    );
    Ok(pickup)
}

async fn check_created(
    pickups: &PickupMap,
    response: PickupStatusResponse,
) -> Result<(PickupId, PickupStatus), PickupError> {
    if response.id == 0 {
        return Err(PickupError::ProtocolError(
            "pickup id must be positive".to_string(),
        ));
    }
    if pickups.lock().await.contains_key(&response.id) {
        return Err(PickupError::ProtocolError(format!(
            "server reused pickup id {}",
            response.id
        )));
    }

    let status = parse_status(&response.status)?;
    if status != PickupStatus::Requested {
        return Err(PickupError::ProtocolError(format!(
            "new pickup reported as {}",
            status
        )));
    }
    Ok((response.id, status))
}

/// Send one transition and apply the confirmed status
///
/// Holds the pickup's lock until the local update has landed.
async fn submit_transition(
    api: Arc<dyn PickupApi>,
    pickups: PickupMap,
    _guard: KeyedGuard<PickupId>,
    pickup_id: PickupId,
    current: PickupStatus,
    target: PickupStatus,
) -> Result<PickupRequest, PickupError> {
    let response = api
        .update_pickup(pickup_id, &UpdatePickupRequest { status: target })
        .await
        .map_err(|e| classify(e, Some((pickup_id, current, target))))?;

    if response.id != pickup_id {
        return Err(PickupError::ProtocolError(format!(
            "asked to update pickup {}, server answered for {}",
            pickup_id, response.id
        )));
    }
    let confirmed = parse_status(&response.status)?;
    if confirmed != target {
        return Err(PickupError::ProtocolError(format!(
            "asked for {}, server reported {}",
            target, confirmed
        )));
    }

    let mut pickups = pickups.lock().await;
    let pickup = pickups
        .get_mut(&pickup_id)
        .ok_or(PickupError::UnknownPickup(pickup_id))?;
    pickup.status = confirmed;

    info!("Pickup {}: {} -> {}", pickup_id, current, confirmed);
    Ok(pickup.clone())
}

fn validate_new(lab_id: LabId, disposal_item_ids: &[DisposalItemId]) -> Result<(), PickupError> {
    if lab_id == 0 {
        return Err(PickupError::InvalidRequest(
            "lab id must be positive".to_string(),
        ));
    }
    if disposal_item_ids.is_empty() {
        return Err(PickupError::InvalidRequest(
            "a pickup needs at least one disposal item".to_string(),
        ));
    }
    if disposal_item_ids.contains(&0) {
        return Err(PickupError::InvalidRequest(
            "disposal item ids must be positive".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    if let Some(dup) = disposal_item_ids.iter().find(|id| !seen.insert(**id)) {
        return Err(PickupError::InvalidRequest(format!(
            "disposal item {} listed twice",
            dup
        )));
    }
    Ok(())
}

fn parse_status(token: &str) -> Result<PickupStatus, PickupError> {
    token
        .parse()
        .map_err(|_| PickupError::ProtocolError(format!("unrecognized status token {:?}", token)))
}

/// Map a transport failure onto the pickup taxonomy
///
/// `edge` is the attempted transition, when there is one.
fn classify(
    err: ApiError,
    edge: Option<(PickupId, PickupStatus, PickupStatus)>,
) -> PickupError {
    if err.is_transient() {
        return PickupError::NetworkFailure(err.to_string());
    }

    let message = match &err {
        ApiError::Rejected { message, .. } => message.clone(),
        other => other.to_string(),
    };

    match (err.code(), edge) {
        (Some(ErrorCode::InvalidTransition), Some((pickup_id, from, to))) => {
            PickupError::InvalidTransition {
                pickup_id,
                from,
                to,
            }
        }
        (Some(ErrorCode::NotFound), Some((pickup_id, _, _))) => {
            PickupError::UnknownPickup(pickup_id)
        }
        (Some(ErrorCode::StateConflict), _) => PickupError::StateConflict(message),
        (Some(ErrorCode::BadRequest), _) => PickupError::InvalidRequest(message),
        _ if matches!(err, ApiError::Decode(_)) => PickupError::ProtocolError(message),
        _ => PickupError::Rejected(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_api::MockPickupApi;
    use rust_decimal::Decimal;
    use std::time::Duration;
    use wastetrack_common::{DisposalItem, WeightUnit};

    const ALL: [PickupStatus; 4] = [
        PickupStatus::Requested,
        PickupStatus::Processing,
        PickupStatus::Completed,
        PickupStatus::Canceled,
    ];

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
    }

    type Setup = (Arc<MockPickupApi>, Arc<DisposalLifecycle>, PickupStatusMachine);

    async fn setup(item_ids: &[DisposalItemId]) -> Setup {
        setup_with_latency(item_ids, Duration::from_millis(5)).await
    }

    async fn setup_with_latency(item_ids: &[DisposalItemId], latency: Duration) -> Setup {
        let api = Arc::new(MockPickupApi::new().with_latency(latency));
        let lifecycle = Arc::new(DisposalLifecycle::new());

        for id in item_ids {
            let item = DisposalItem::new(*id, 1, "Formalin", Decimal::new(3, 0), WeightUnit::Kilogram);
            api.register_item(item.clone()).await;
            lifecycle.track(item).await.unwrap();
        }

        let machine = PickupStatusMachine::new(api.clone(), lifecycle.clone());
        (api, lifecycle, machine)
    }

    /// Pickup in `status`, reached through legal edges
    async fn pickup_in(status: PickupStatus) -> (Arc<MockPickupApi>, PickupStatusMachine, PickupId) {
        let (api, _lifecycle, machine) = setup(&[1]).await;
        let pickup = machine.create(1, date(), vec![1]).await.unwrap();

        let path: &[PickupStatus] = match status {
            PickupStatus::Requested => &[],
            PickupStatus::Processing => &[PickupStatus::Processing],
            PickupStatus::Completed => &[PickupStatus::Processing, PickupStatus::Completed],
            PickupStatus::Canceled => &[PickupStatus::Canceled],
        };
        for step in path {
            machine.advance(pickup.id, *step).await.unwrap();
        }
        (api, machine, pickup.id)
    }

    #[tokio::test]
    async fn test_create_moves_items_to_requested() {
        let (api, lifecycle, machine) = setup(&[101, 102]).await;
        api.set_next_pickup_id(7).await;

        let pickup = machine.create(3, date(), vec![101, 102]).await.unwrap();

        assert_eq!(pickup.id, 7);
        assert_eq!(pickup.status, PickupStatus::Requested);
        assert_eq!(lifecycle.status(101).await, Some(DisposalStatus::Requested));
        assert_eq!(lifecycle.status(102).await, Some(DisposalStatus::Requested));
        assert_eq!(machine.items_of(7).await, Some(vec![101, 102]));
        assert_eq!(machine.pickup_of(102).await, Some(7));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (api, _lifecycle, machine) = setup(&[1, 2]).await;

        for (lab, items) in [(1, vec![]), (0, vec![1]), (1, vec![1, 1]), (1, vec![0])] {
            let err = machine.create(lab, date(), items).await.unwrap_err();
            assert!(matches!(err, PickupError::InvalidRequest(_)), "{:?}", err);
        }
        assert_eq!(api.create_pickup_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_create_releases_items() {
        let (api, lifecycle, machine) = setup(&[1]).await;
        api.script_create_pickup(Err(ApiError::Transport("reset".into())))
            .await;

        let err = machine.create(1, date(), vec![1]).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(lifecycle.status(1).await, Some(DisposalStatus::Stored));

        machine.create(1, date(), vec![1]).await.unwrap();
        assert_eq!(lifecycle.status(1).await, Some(DisposalStatus::Requested));
    }

    #[tokio::test]
    async fn test_abandoned_create_still_lands() {
        let (api, lifecycle, machine) = setup_with_latency(&[1], Duration::from_millis(100)).await;
        api.set_next_pickup_id(9).await;

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), machine.create(1, date(), vec![1])).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(lifecycle.status(1).await, Some(DisposalStatus::Requested));
        assert_eq!(machine.status(9).await, Some(PickupStatus::Requested));
        assert_eq!(machine.pickup_of(1).await, Some(9));

        // the item is spoken for, not stuck
        let err = machine.create(1, date(), vec![1]).await.unwrap_err();
        assert!(matches!(err, PickupError::StateConflict(_)));
        assert!(!err.to_string().contains("another pickup request"));
    }

    #[tokio::test]
    async fn test_abandoned_failed_create_frees_items() {
        let (api, lifecycle, machine) = setup_with_latency(&[1], Duration::from_millis(100)).await;
        api.script_create_pickup(Err(ApiError::Transport("reset".into())))
            .await;

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), machine.create(1, date(), vec![1])).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(lifecycle.status(1).await, Some(DisposalStatus::Stored));

        machine.create(1, date(), vec![1]).await.unwrap();
        assert_eq!(lifecycle.status(1).await, Some(DisposalStatus::Requested));
    }

    #[tokio::test]
    async fn test_abandoned_advance_still_applied() {
        let (api, _lifecycle, machine) = setup_with_latency(&[1], Duration::from_millis(100)).await;
        let pickup = machine.create(1, date(), vec![1]).await.unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            machine.advance(pickup.id, PickupStatus::Processing),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(api.pickup(pickup.id).await.unwrap().status, PickupStatus::Processing);
        assert_eq!(machine.status(pickup.id).await, Some(PickupStatus::Processing));

        machine
            .advance(pickup.id, PickupStatus::Completed)
            .await
            .unwrap();
        assert_eq!(machine.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_creates_cannot_share_items() {
        let (api, lifecycle, machine) = setup(&[1, 2, 3]).await;

        let (a, b) = tokio::join!(
            machine.create(1, date(), vec![1, 2]),
            machine.create(1, date(), vec![2, 3])
        );

        assert!(a.is_ok() ^ b.is_ok());
        let err = a.err().or(b.err()).unwrap();
        assert!(matches!(err, PickupError::StateConflict(_)));
        assert_eq!(api.create_pickup_calls(), 1);
        assert_eq!(lifecycle.status(2).await, Some(DisposalStatus::Requested));
    }

    #[tokio::test]
    async fn test_item_in_requested_pickup_cannot_be_added_again() {
        let (_api, _lifecycle, machine) = setup(&[1]).await;
        machine.create(1, date(), vec![1]).await.unwrap();

        let err = machine.create(1, date(), vec![1]).await.unwrap_err();
        assert!(matches!(err, PickupError::StateConflict(_)));
    }

    #[tokio::test]
    async fn test_advance_rejects_every_illegal_edge() {
        for from in ALL {
            for to in ALL {
                if from.can_transition_to(to) {
                    continue;
                }
                let (api, machine, id) = pickup_in(from).await;
                let calls_before = api.update_pickup_calls();

                let err = machine.advance(id, to).await.unwrap_err();
                assert_eq!(
                    err,
                    PickupError::InvalidTransition {
                        pickup_id: id,
                        from,
                        to
                    }
                );
                assert_eq!(machine.status(id).await, Some(from));
                assert_eq!(api.update_pickup_calls(), calls_before);
            }
        }
    }

    #[tokio::test]
    async fn test_advance_accepts_legal_edges() {
        for (from, to) in [
            (PickupStatus::Requested, PickupStatus::Processing),
            (PickupStatus::Processing, PickupStatus::Completed),
            (PickupStatus::Requested, PickupStatus::Canceled),
            (PickupStatus::Processing, PickupStatus::Canceled),
        ] {
            let (_api, machine, id) = pickup_in(from).await;
            let pickup = machine.advance(id, to).await.unwrap();
            assert_eq!(pickup.status, to);
        }
    }

    #[tokio::test]
    async fn test_no_optimistic_update_on_failure() {
        let (api, machine, id) = pickup_in(PickupStatus::Requested).await;
        api.script_update_pickup(Err(ApiError::rejected(
            503,
            ErrorCode::Internal,
            "maintenance",
        )))
        .await;

        let err = machine
            .advance(id, PickupStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, PickupError::NetworkFailure(_)));
        assert_eq!(machine.status(id).await, Some(PickupStatus::Requested));
    }

    #[tokio::test]
    async fn test_mismatched_response_is_protocol_error() {
        let (api, machine, id) = pickup_in(PickupStatus::Requested).await;
        api.script_update_pickup(Ok(PickupStatusResponse {
            id,
            status: "DONE".into(),
        }))
        .await;

        let err = machine
            .advance(id, PickupStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, PickupError::ProtocolError(_)));
        assert_eq!(machine.status(id).await, Some(PickupStatus::Requested));

        api.script_update_pickup(Ok(PickupStatusResponse {
            id,
            status: "CANCELED".into(),
        }))
        .await;
        let err = machine
            .advance(id, PickupStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, PickupError::ProtocolError(_)));
    }

    #[tokio::test]
    async fn test_concurrent_advances_of_one_pickup_serialise() {
        let (api, machine, id) = pickup_in(PickupStatus::Requested).await;

        let (a, b) = tokio::join!(
            machine.advance(id, PickupStatus::Processing),
            machine.advance(id, PickupStatus::Processing)
        );

        assert!(a.is_ok() ^ b.is_ok());
        assert!(matches!(
            a.err().or(b.err()).unwrap(),
            PickupError::InvalidTransition { .. }
        ));
        // the loser was refused locally
        assert_eq!(api.update_pickup_calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_pickup() {
        let (_api, _lifecycle, machine) = setup(&[]).await;
        let err = machine
            .advance(42, PickupStatus::Processing)
            .await
            .unwrap_err();
        assert_eq!(err, PickupError::UnknownPickup(42));
    }

    #[tokio::test]
    async fn test_progress_does_not_auto_complete() {
        let (_api, lifecycle, machine) = setup(&[1, 2]).await;
        let pickup = machine.create(1, date(), vec![1, 2]).await.unwrap();

        lifecycle.confirm_picked_up(1).await.unwrap();
        lifecycle.confirm_picked_up(2).await.unwrap();

        let progress = machine.progress(pickup.id).await.unwrap();
        assert_eq!(progress, PickupProgress { total: 2, picked_up: 2 });
        assert!(progress.all_picked_up());
        assert_eq!(
            machine.status(pickup.id).await,
            Some(PickupStatus::Requested)
        );
    }
}
