//! Single-slot delivery of downlink payloads to the application.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Downlink handler: decrypted payload and the port it arrived on. The payload is only
/// borrowed for the duration of the call.
pub type MessageCallback = Box<dyn FnMut(&[u8], u8) + Send>;

#[derive(Default)]
struct Slot {
    callback: Option<MessageCallback>,
    generation: u64,
}

/// Holds the one registered [`MessageCallback`].
///
/// The callback is taken out of the slot while it runs, so it may register a
/// replacement (or call back into the node) without deadlocking. A replacement
/// registered during the call wins over the callback being restored.
#[derive(Default)]
pub struct Dispatcher {
    slot: Mutex<Slot>,
}

impl Dispatcher {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `callback`, replacing any previous one.
    pub fn register(&self, callback: MessageCallback) {
        let mut slot = self.lock();
        slot.callback = Some(callback);
        slot.generation = slot.generation.wrapping_add(1);
    }

    /// Is a callback installed?
    pub fn is_registered(&self) -> bool {
        self.lock().callback.is_some()
    }

    /// Hand `payload` to the callback. Returns `false` when nothing is registered.
    pub fn dispatch(&self, payload: &[u8], port: u8) -> bool {
        let (mut callback, generation) = {
            let mut slot = self.lock();
            match slot.callback.take() {
                Some(callback) => (callback, slot.generation),
                None => {
                    debug!("no handler for {} bytes on port {}", payload.len(), port);
                    return false;
                }
            }
        };
        callback(payload, port);
        let mut slot = self.lock();
        if slot.generation == generation && slot.callback.is_none() {
            slot.callback = Some(callback);
        }
        true
    }
}
