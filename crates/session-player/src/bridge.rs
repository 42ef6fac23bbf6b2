//! Event bridge between engine threads and the control thread.
//!
//! Engine threads post through an [`EventPoster`]; the control thread drains the
//! [`EventBridge`] receiver. Delivery is FIFO across all posters. Every envelope carries
//! the [`SessionToken`] of the session that posted it, and envelopes whose token was
//! released are dropped before reaching a handler.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender};
use playback_proto::TextEncoding;

use crate::event::{EngineEvent, NativePayload};

/// Identity of one opened session.
#[derive(Clone, Debug)]
pub struct SessionToken {
    id: u64,
    released: Arc<AtomicBool>,
}

impl SessionToken {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mark the session torn down. Pending and future events for it are dropped.
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// One queued engine notification.
#[derive(Debug)]
pub struct Envelope {
    token: SessionToken,
    event: EngineEvent,
}

impl Envelope {
    pub fn session_id(&self) -> u64 {
        self.token.id
    }

    pub fn event(&self) -> &EngineEvent {
        &self.event
    }
}

/// Multi-producer, single-consumer event queue owned by the control thread.
pub struct EventBridge {
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBridge {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Handle used by the controller to mint per-session posters.
    pub fn sender(&self) -> BridgeSender {
        BridgeSender {
            tx: self.tx.clone(),
        }
    }

    /// Raw receiver, for hosts that `select!` over it alongside their own channels.
    pub fn receiver(&self) -> &Receiver<Envelope> {
        &self.rx
    }

    /// Hand one envelope to `handler` unless its session was released.
    ///
    /// Returns `true` when the handler ran.
    pub fn deliver<H>(envelope: Envelope, handler: &mut H) -> bool
    where
        H: FnMut(&SessionToken, EngineEvent),
    {
        if envelope.token.is_released() {
            tracing::debug!(
                session = envelope.token.id,
                event = ?envelope.event,
                "dropping event for released session"
            );
            return false;
        }
        handler(&envelope.token, envelope.event);
        true
    }

    /// Deliver everything queued right now without blocking.
    ///
    /// Returns the number of events handed to `handler`.
    pub fn dispatch_pending<H>(&self, mut handler: H) -> usize
    where
        H: FnMut(&SessionToken, EngineEvent),
    {
        let mut delivered = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            if Self::deliver(envelope, &mut handler) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Block and deliver events until `handler` breaks.
    pub fn dispatch_loop<H>(&self, mut handler: H)
    where
        H: FnMut(&SessionToken, EngineEvent) -> ControlFlow<()>,
    {
        while let Ok(envelope) = self.rx.recv() {
            if envelope.token.is_released() {
                tracing::debug!(session = envelope.token.id, "dropping event for released session");
                continue;
            }
            if handler(&envelope.token, envelope.event).is_break() {
                break;
            }
        }
    }
}

/// Cloneable sending half of an [`EventBridge`].
#[derive(Clone)]
pub struct BridgeSender {
    tx: Sender<Envelope>,
}

impl BridgeSender {
    pub fn poster(&self, token: SessionToken, text_encoding: TextEncoding) -> EventPoster {
        EventPoster {
            token,
            tx: Some(self.tx.clone()),
            text_encoding,
        }
    }
}

/// Session-bound posting handle given to the engine. Callable from any thread.
#[derive(Clone, Debug)]
pub struct EventPoster {
    token: SessionToken,
    tx: Option<Sender<Envelope>>,
    text_encoding: TextEncoding,
}

impl EventPoster {
    /// A poster with no control loop attached; every post is dropped with a warning.
    pub fn detached(token: SessionToken) -> Self {
        Self {
            token,
            tx: None,
            text_encoding: TextEncoding::default(),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.token.id
    }

    pub fn is_released(&self) -> bool {
        self.token.is_released()
    }

    pub fn post(&self, event: EngineEvent) {
        if self.token.is_released() {
            tracing::debug!(session = self.token.id, "session released; event dropped");
            return;
        }
        let Some(tx) = &self.tx else {
            tracing::warn!(session = self.token.id, event = ?event, "no control loop attached; event dropped");
            return;
        };
        let envelope = Envelope {
            token: self.token.clone(),
            event,
        };
        if tx.send(envelope).is_err() {
            tracing::warn!(session = self.token.id, "control loop gone; event dropped");
        }
    }

    /// Post a raw engine message, decoding it first.
    pub fn post_native(&self, what: i32, arg1: i32, arg2: i32, payload: NativePayload) {
        match EngineEvent::from_native(what, arg1, arg2, payload, self.text_encoding) {
            Ok(Some(event)) => self.post(event),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(session = self.token.id, what, arg1, arg2, "bad engine message: {e}")
            }
        }
    }
}
