use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::AuthError;
use crate::provider::AuthStateChange;

type Registration = (u64, mpsc::UnboundedSender<AuthStateChange>);

/// Holds the one auth-state listener a process may have.
#[derive(Debug, Default)]
pub(crate) struct ListenerSlot {
    current: Mutex<Option<Registration>>,
    next_id: AtomicU64,
}

impl ListenerSlot {
    pub(crate) fn register(self: &Arc<Self>) -> Result<AuthSubscription, AuthError> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, ref sender)) = *current {
            if !sender.is_closed() {
                return Err(AuthError::ListenerActive);
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *current = Some((id, tx));
        debug!(id, "Auth state listener registered");

        Ok(AuthSubscription {
            id,
            rx,
            slot: Arc::downgrade(self),
        })
    }

    pub(crate) fn notify(&self, change: AuthStateChange) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((id, ref sender)) = *current {
            if sender.send(change).is_err() {
                debug!(id, "Auth state listener gone, dropping registration");
                *current = None;
            }
        }
    }

    fn release(&self, id: u64) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*current, Some((current_id, _)) if current_id == id) {
            *current = None;
            debug!(id, "Auth state listener deregistered");
        }
    }

    #[cfg(test)]
    pub(crate) fn is_registered(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Live registration for auth-state changes. Dropping it deregisters.
#[derive(Debug)]
pub struct AuthSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<AuthStateChange>,
    slot: Weak<ListenerSlot>,
}

impl AuthSubscription {
    /// Wait for the next change. Returns `None` once the service is gone.
    pub async fn recv(&mut self) -> Option<AuthStateChange> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<AuthStateChange> {
        self.rx.try_recv().ok()
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.upgrade() {
            slot.release(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AuthEvent;

    #[test]
    fn test_single_subscriber() {
        let slot = Arc::new(ListenerSlot::default());
        let first = slot.register().unwrap();
        assert!(matches!(slot.register(), Err(AuthError::ListenerActive)));

        drop(first);
        assert!(!slot.is_registered());
        assert!(slot.register().is_ok());
    }

    #[test]
    fn test_notify_delivers_in_order() {
        let slot = Arc::new(ListenerSlot::default());
        let mut sub = slot.register().unwrap();

        slot.notify(AuthStateChange::new(AuthEvent::SignedIn, None));
        slot.notify(AuthStateChange::new(AuthEvent::SignedOut, None));

        assert_eq!(sub.try_recv().unwrap().event, AuthEvent::SignedIn);
        assert_eq!(sub.try_recv().unwrap().event, AuthEvent::SignedOut);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_notify_without_listener_is_noop() {
        let slot = ListenerSlot::default();
        slot.notify(AuthStateChange::new(AuthEvent::SignedIn, None));
        assert!(!slot.is_registered());
    }
}
