//! In-memory provider for exercising listeners without a platform service.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::{
    LocationProvider, LocationResult, Position, ProviderDelegate, ProviderEvent, UpdateRequest,
};

/// A [`LocationProvider`] that records every call made to it.
///
/// Events are injected with [`emit`](Self::emit). Nothing is delivered
/// unless a test asks for it.
#[derive(Default)]
pub struct MockProvider {
    connected: AtomicBool,
    connect_on_request: bool,
    calls: Mutex<Vec<&'static str>>,
    delegate: Mutex<Option<Arc<dyn ProviderDelegate>>>,
    cached: Mutex<Option<Position>>,
    last_request: Mutex<Option<UpdateRequest>>,
}

impl fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProvider")
            .field("connected", &self.is_connected())
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl MockProvider {
    /// A provider that is already connected.
    #[must_use]
    pub fn connected() -> Arc<Self> {
        let provider = Self::default();
        provider.set_connected(true);
        Arc::new(provider)
    }

    /// A provider that stays disconnected until [`set_connected`](Self::set_connected).
    #[must_use]
    pub fn disconnected() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A provider whose `connect` succeeds and emits `Connected` before returning.
    #[must_use]
    pub fn connecting_synchronously() -> Arc<Self> {
        Arc::new(Self {
            connect_on_request: true,
            ..Self::default()
        })
    }

    /// Flips the connection state without emitting an event.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Delivers `event` to the registered delegate.
    ///
    /// # Panics
    ///
    /// Panics if no delegate has been registered.
    pub fn emit(&self, event: ProviderEvent) {
        let delegate = self
            .delegate
            .lock()
            .expect("mock delegate mutex poisoned")
            .clone();
        delegate.expect("delegate registered").on_event(event);
    }

    /// Names of the provider calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("mock calls mutex poisoned").clone()
    }

    /// Sets the fix returned by `last_location`.
    pub fn set_cached(&self, position: Position) {
        *self.cached.lock().expect("mock cache mutex poisoned") = Some(position);
    }

    /// The parameters of the most recent update request.
    #[must_use]
    pub fn last_request(&self) -> Option<UpdateRequest> {
        self.last_request
            .lock()
            .expect("mock request mutex poisoned")
            .clone()
    }

    fn record(&self, call: &'static str) {
        self.calls
            .lock()
            .expect("mock calls mutex poisoned")
            .push(call);
    }
}

impl LocationProvider for MockProvider {
    fn set_delegate(&self, delegate: Arc<dyn ProviderDelegate>) {
        *self.delegate.lock().expect("mock delegate mutex poisoned") = Some(delegate);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) -> LocationResult<()> {
        self.record("connect");
        if self.connect_on_request {
            self.set_connected(true);
            self.emit(ProviderEvent::Connected);
        }
        Ok(())
    }

    fn request_updates(&self, request: &UpdateRequest) -> LocationResult<()> {
        self.record("request_updates");
        *self
            .last_request
            .lock()
            .expect("mock request mutex poisoned") = Some(request.clone());
        Ok(())
    }

    fn remove_updates(&self) {
        self.record("remove_updates");
    }

    fn last_location(&self) -> Option<Position> {
        self.cached.lock().expect("mock cache mutex poisoned").clone()
    }
}
