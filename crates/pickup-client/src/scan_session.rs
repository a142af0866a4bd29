//! Scan session controller
//!
//! Gates decode callbacks from the capture driver. A session is `Active` on
//! entry; forwarding a decoded payload flips it to `Paused` in the same
//! atomic step, and every callback that arrives while paused is dropped.
//! A code held in front of the camera for many frames therefore reaches the
//! confirmation protocol once.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use tracing::{debug, info, trace};
use wastetrack_common::{ConfirmError, ResumePolicy, ScanEvent};

use crate::confirmation::{Confirmation, PickupConfirmation, ScanInput};

/// External capture driver (camera plumbing)
pub trait CaptureDriver: Send + Sync {
    /// Stop delivering frames
    fn stop(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Paused,
    /// Torn down; nothing is forwarded any more
    Closed,
}

const ACTIVE: u8 = 0;
const PAUSED: u8 = 1;
const CLOSED: u8 = 2;

/// Result of one forwarded scan, as seen by the view layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub result: Result<Confirmation, ConfirmError>,
    /// Whether the session went back to scanning on its own
    pub resumed: bool,
}

pub struct ScanSession<D: CaptureDriver> {
    state: AtomicU8,
    driver: D,
    dropped: AtomicUsize,
}

impl<D: CaptureDriver> ScanSession<D> {
    pub fn new(driver: D) -> Self {
        Self {
            state: AtomicU8::new(ACTIVE),
            driver,
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::SeqCst) {
            ACTIVE => SessionState::Active,
            PAUSED => SessionState::Paused,
            _ => SessionState::Closed,
        }
    }

    /// `Active -> Paused`; false if the session was not active
    pub fn pause(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, PAUSED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// `Paused -> Active`; a closed session stays closed
    pub fn resume(&self) -> bool {
        self.state
            .compare_exchange(PAUSED, ACTIVE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Decode callback from the capture driver
    ///
    /// Returns the event to forward, or `None` when the callback is dropped.
    pub fn on_decoded(&self, payload: &str) -> Option<ScanEvent> {
        if self.pause() {
            debug!("Forwarding decoded payload, scanning paused");
            Some(ScanEvent::new(payload))
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Dropping decode callback in state {:?}", self.state());
            None
        }
    }

    /// Number of callbacks dropped so far
    pub fn dropped_callbacks(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Leave the scan screen: stop the driver and close the session
    pub fn teardown(&self) {
        if self.state.swap(CLOSED, Ordering::SeqCst) != CLOSED {
            info!("Scan session closed, stopping capture driver");
            self.driver.stop();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Forward a decode callback to the confirmation protocol
    ///
    /// `None` when the callback was dropped, or when the session was torn
    /// down before the confirmation resolved (its state change still lands,
    /// only the UI effect is discarded).
    pub async fn handle_decoded(
        &self,
        payload: &str,
        confirmation: &PickupConfirmation,
    ) -> Option<ScanOutcome> {
        let event = self.on_decoded(payload)?;
        let result = confirmation.confirm(ScanInput::Code(event.payload)).await;
        self.settle(result)
    }

    /// Confirm a still photo picked from the gallery
    pub async fn handle_photo(
        &self,
        image: Vec<u8>,
        confirmation: &PickupConfirmation,
    ) -> Option<ScanOutcome> {
        if !self.pause() {
            debug!("Ignoring photo, session is {:?}", self.state());
            return None;
        }
        let result = confirmation.confirm(ScanInput::Image(image)).await;
        self.settle(result)
    }

    fn settle(&self, result: Result<Confirmation, ConfirmError>) -> Option<ScanOutcome> {
        if self.is_closed() {
            debug!("Session closed while confirming, discarding outcome");
            return None;
        }

        // Successes and terminal errors wait for the operator to acknowledge
        let resumed = match &result {
            Err(err) if err.resume_policy() == ResumePolicy::ResumeImmediately => self.resume(),
            _ => false,
        };

        Some(ScanOutcome { result, resumed })
    }
}

impl<D: CaptureDriver> Drop for ScanSession<D> {
    fn drop(&mut self) {
        self.teardown();
    }
}
