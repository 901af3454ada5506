//! Frame dispatch: turns the link's byte stream into responses and tag
//! observations.
//!
//! The dispatch task owns the [`FrameBuffer`]. It reacts to two independent
//! sources, the inbound byte broadcast and the connection-state watch, and
//! never blocks on either beyond awaiting the next item.
//!
//! Responses are matched against the single pending-request slot; tag
//! notices go to the polling broadcast while polling is active or a
//! verification is observing.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use uhflib_core::error::{Error, Result};
use uhflib_core::events::ReaderEvent;
use uhflib_core::types::{ConnectionState, ConnectionStatus, TagPollData};

use crate::commands::{ERROR_RESPONSE, SINGLE_POLL, START_POLL, parse_tag_poll_data};
use crate::frame::{Frame, FrameBuffer, FrameType};

/// Capacity of the tag and event broadcast channels.
pub(crate) const STREAM_CAPACITY: usize = 256;

/// The request currently awaiting a response.
struct Pending {
    id: u64,
    command: u8,
    reply: oneshot::Sender<Frame>,
}

impl Pending {
    fn accepts(&self, frame: &Frame) -> bool {
        match frame.frame_type() {
            FrameType::Response => frame.command() == self.command || frame.command() == ERROR_RESPONSE,
            // Some firmware reports a single-poll tag as a notice.
            FrameType::Notice => self.command == SINGLE_POLL && frame.command() == SINGLE_POLL,
            FrameType::Command => false,
        }
    }
}

/// State shared between the reader handle and its dispatch task.
pub(crate) struct Shared {
    pending: Mutex<Option<Pending>>,
    next_id: AtomicU64,
    polling: AtomicBool,
    /// Number of active `verify_epc` calls.
    observers: AtomicUsize,
    tag_tx: broadcast::Sender<TagPollData>,
    event_tx: broadcast::Sender<ReaderEvent>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        let (tag_tx, _) = broadcast::channel(STREAM_CAPACITY);
        let (event_tx, _) = broadcast::channel(STREAM_CAPACITY);
        Shared {
            pending: Mutex::new(None),
            next_id: AtomicU64::new(1),
            polling: AtomicBool::new(false),
            observers: AtomicUsize::new(0),
            tag_tx,
            event_tx,
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the single request slot for `command`.
    ///
    /// Fails with [`Error::Busy`] while another request is in flight. The
    /// returned guard frees the slot when dropped, so an abandoned request
    /// (timeout, cancelled future) never blocks the next one.
    pub(crate) fn claim(
        self: &Arc<Self>,
        command: u8,
    ) -> Result<(PendingGuard, oneshot::Receiver<Frame>)> {
        let mut pending = self.lock_pending();
        if let Some(current) = pending.as_ref() {
            debug!(
                command,
                in_flight = current.command,
                "command rejected, another is in flight"
            );
            return Err(Error::Busy);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, reply_rx) = oneshot::channel();
        *pending = Some(Pending { id, command, reply });
        Ok((
            PendingGuard {
                shared: Arc::clone(self),
                id,
            },
            reply_rx,
        ))
    }

    /// Drop the pending request, failing its waiter.
    pub(crate) fn fail_pending(&self) {
        if let Some(pending) = self.lock_pending().take() {
            debug!(command = pending.command, "failing pending request");
        }
    }

    /// Hand `frame` to the pending request if it is the awaited reply.
    fn deliver(&self, frame: Frame) -> std::result::Result<(), Frame> {
        let mut slot = self.lock_pending();
        match slot.take_if(|pending| pending.accepts(&frame)) {
            Some(pending) => {
                // The waiter may already have timed out; that is fine.
                let _ = pending.reply.send(frame);
                Ok(())
            }
            None => Err(frame),
        }
    }

    pub(crate) fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    /// Mark polling active. Returns `false` if it already was.
    pub(crate) fn begin_polling(&self) -> bool {
        self.polling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark polling inactive. Returns `false` if it already was.
    pub(crate) fn end_polling(&self) -> bool {
        self.polling.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn subscribe_tags(&self) -> broadcast::Receiver<TagPollData> {
        self.tag_tx.subscribe()
    }

    pub(crate) fn subscribe_events(&self) -> broadcast::Receiver<ReaderEvent> {
        self.event_tx.subscribe()
    }

    /// Register a tag observer; notices flow while the guard lives.
    pub(crate) fn observe(self: &Arc<Self>) -> ObserverGuard {
        self.observers.fetch_add(1, Ordering::AcqRel);
        ObserverGuard {
            shared: Arc::clone(self),
        }
    }

    fn emit(&self, event: ReaderEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Route one decoded frame.
    fn dispatch(&self, frame: Frame) {
        if !frame.checksum_valid() {
            warn!(
                command = frame.command(),
                frame = %frame.describe(),
                "checksum mismatch, dispatching anyway"
            );
            self.emit(ReaderEvent::ChecksumMismatch {
                command: frame.command(),
            });
        }

        match frame.frame_type() {
            FrameType::Notice if frame.command() == START_POLL => self.dispatch_tag_notice(&frame),
            FrameType::Response | FrameType::Notice => {
                if let Err(frame) = self.deliver(frame) {
                    debug!(frame = %frame.describe(), "unsolicited frame dropped");
                }
            }
            FrameType::Command => {
                trace!(command = frame.command(), "ignoring command frame from module");
            }
        }
    }

    fn dispatch_tag_notice(&self, frame: &Frame) {
        let observed = self.observers.load(Ordering::Acquire) > 0;
        if !self.is_polling() && !observed {
            trace!("tag notice outside polling dropped");
            return;
        }
        match parse_tag_poll_data(frame) {
            Some(tag) => {
                debug!(epc = %tag.epc_hex(), rssi = tag.rssi, "tag observed");
                let _ = self.tag_tx.send(tag);
                self.emit(ReaderEvent::TagRead(tag));
            }
            None => debug!(frame = %frame.describe(), "tag notice without a full EPC"),
        }
    }
}

/// Frees the pending slot it claimed when dropped.
pub(crate) struct PendingGuard {
    shared: Arc<Shared>,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut slot = self.shared.lock_pending();
        let _ = slot.take_if(|pending| pending.id == self.id);
    }
}

/// Keeps tag notices flowing while alive.
pub(crate) struct ObserverGuard {
    shared: Arc<Shared>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.shared.observers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The dispatch loop. Runs as a spawned Tokio task for the reader's lifetime.
pub(crate) async fn dispatch_loop(
    shared: Arc<Shared>,
    mut bytes_rx: broadcast::Receiver<Bytes>,
    mut state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut buffer = FrameBuffer::new();
    let mut last_status = state_rx.borrow_and_update().status;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("dispatch task cancelled");
                break;
            }

            changed = state_rx.changed() => {
                if changed.is_err() {
                    debug!("link dropped, exiting dispatch task");
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                if state.status != last_status {
                    on_state_change(&shared, &mut buffer, last_status, &state);
                    last_status = state.status;
                }
            }

            chunk = bytes_rx.recv() => {
                match chunk {
                    Ok(chunk) => {
                        trace!(bytes = chunk.len(), "dispatching inbound chunk");
                        for frame in buffer.push(&chunk) {
                            shared.dispatch(frame);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "byte stream lagged, dropping partial frame");
                        buffer.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("byte stream closed, exiting dispatch task");
                        break;
                    }
                }
            }
        }
    }
}

fn on_state_change(
    shared: &Shared,
    buffer: &mut FrameBuffer,
    previous: ConnectionStatus,
    state: &ConnectionState,
) {
    debug!(from = %previous, to = %state, "reader link state changed");

    if previous == ConnectionStatus::Connected {
        shared.fail_pending();
        if shared.end_polling() {
            debug!("polling stopped by link change");
        }
    }
    buffer.clear();

    match state.status {
        ConnectionStatus::Connected => shared.emit(ReaderEvent::Connected),
        ConnectionStatus::Disconnected => shared.emit(ReaderEvent::Disconnected),
        ConnectionStatus::Error => shared.emit(ReaderEvent::ConnectionError {
            message: state.error_message.clone().unwrap_or_default(),
        }),
        ConnectionStatus::Connecting => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{GET_RF_POWER, WRITE_EPC};
    use crate::frame::{build_notice, build_response, parse_frame};
    use uhflib_core::types::ResponseCode;

    fn frame(bytes: Vec<u8>) -> Frame {
        parse_frame(&bytes).unwrap()
    }

    fn tag_notice() -> Frame {
        let mut params = vec![0xC8, 0x30, 0x00];
        params.extend_from_slice(&[0x52, 0x46, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x07]);
        frame(build_notice(START_POLL, &params).unwrap())
    }

    #[tokio::test]
    async fn response_resolves_matching_pending() {
        let shared = Arc::new(Shared::new());
        let (_guard, rx) = shared.claim(GET_RF_POWER).unwrap();

        shared.dispatch(frame(build_response(GET_RF_POWER, &[0x10, 0x07, 0xD0]).unwrap()));
        let reply = rx.await.unwrap();
        assert_eq!(reply.command(), GET_RF_POWER);
        assert!(shared.lock_pending().is_none());
    }

    #[tokio::test]
    async fn response_for_other_command_is_dropped() {
        let shared = Arc::new(Shared::new());
        let (_guard, mut rx) = shared.claim(WRITE_EPC).unwrap();

        shared.dispatch(frame(build_response(GET_RF_POWER, &[0x10]).unwrap()));
        assert!(rx.try_recv().is_err());
        assert!(shared.lock_pending().is_some());
    }

    #[tokio::test]
    async fn error_response_resolves_any_pending() {
        let shared = Arc::new(Shared::new());
        let (_guard, rx) = shared.claim(WRITE_EPC).unwrap();

        shared.dispatch(frame(build_response(ERROR_RESPONSE, &[0x15]).unwrap()));
        let reply = rx.await.unwrap();
        assert_eq!(reply.response_code(), Some(ResponseCode::TagNotFound));
    }

    #[tokio::test]
    async fn second_claim_is_busy_until_guard_drops() {
        let shared = Arc::new(Shared::new());
        let (guard, _rx) = shared.claim(WRITE_EPC).unwrap();
        assert!(matches!(shared.claim(GET_RF_POWER), Err(Error::Busy)));
        drop(guard);
        assert!(shared.claim(GET_RF_POWER).is_ok());
    }

    #[tokio::test]
    async fn stale_guard_does_not_free_newer_request() {
        let shared = Arc::new(Shared::new());
        let (old_guard, _old_rx) = shared.claim(WRITE_EPC).unwrap();
        shared.fail_pending();
        let (_new_guard, _new_rx) = shared.claim(GET_RF_POWER).unwrap();
        drop(old_guard);
        assert!(shared.lock_pending().is_some());
    }

    #[tokio::test]
    async fn fail_pending_wakes_waiter() {
        let shared = Arc::new(Shared::new());
        let (_guard, rx) = shared.claim(WRITE_EPC).unwrap();
        shared.fail_pending();
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn notices_require_polling_or_observer() {
        let shared = Arc::new(Shared::new());
        let mut tags = shared.subscribe_tags();

        shared.dispatch(tag_notice());
        assert!(tags.try_recv().is_err());

        assert!(shared.begin_polling());
        assert!(!shared.begin_polling());
        shared.dispatch(tag_notice());
        assert_eq!(tags.try_recv().unwrap().epc[11], 0x07);

        assert!(shared.end_polling());
        let guard = shared.observe();
        shared.dispatch(tag_notice());
        assert!(tags.try_recv().is_ok());
        drop(guard);
        shared.dispatch(tag_notice());
        assert!(tags.try_recv().is_err());
    }

    #[tokio::test]
    async fn bad_checksum_still_dispatched() {
        let shared = Arc::new(Shared::new());
        let mut events = shared.subscribe_events();
        let mut tags = shared.subscribe_tags();
        shared.begin_polling();

        let mut bytes = tag_notice().encode().unwrap();
        let at = bytes.len() - 2;
        bytes[at] = bytes[at].wrapping_add(1);
        shared.dispatch(frame(bytes));

        assert_eq!(
            events.try_recv().unwrap(),
            ReaderEvent::ChecksumMismatch {
                command: START_POLL
            }
        );
        assert!(tags.try_recv().is_ok());
    }

    #[test]
    fn link_loss_fails_pending_and_stops_polling() {
        let shared = Arc::new(Shared::new());
        let mut events = shared.subscribe_events();
        let (_guard, mut rx) = shared.claim(WRITE_EPC).unwrap();
        shared.begin_polling();
        let mut buffer = FrameBuffer::new();
        buffer.push(&[0xBB, 0x02]);

        on_state_change(
            &shared,
            &mut buffer,
            ConnectionStatus::Connected,
            &ConnectionState::error(Some("COM3"), Some(115_200), "device removed"),
        );

        assert!(rx.try_recv().is_err());
        assert!(shared.lock_pending().is_none());
        assert!(!shared.is_polling());
        assert!(buffer.is_empty());
        assert_eq!(
            events.try_recv().unwrap(),
            ReaderEvent::ConnectionError {
                message: "device removed".into()
            }
        );
    }
}
