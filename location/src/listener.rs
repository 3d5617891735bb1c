use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};
use std::time::Duration;

use geobridge_permission::{LOCATION_PERMISSIONS, PermissionChecker, is_any_granted};
use log::{debug, warn};

use crate::timeout::TimeoutGuard;
use crate::{
    LocationError, LocationProvider, LocationResult, Position, PositionError, ProviderDelegate,
    ProviderEvent, UpdateRequest,
};

/// A consumer of position fixes.
///
/// `keep_callback` is `true` for watches, which stay registered after the
/// delivery, and `false` for one-shot requests, which are removed.
pub trait PositionCallback: Send + Sync {
    /// A new fix.
    fn on_position(&self, position: &Position, keep_callback: bool);
    /// A failure.
    fn on_error(&self, error: &PositionError, keep_callback: bool);
}

type Callback = Arc<dyn PositionCallback>;

struct PendingFix {
    ticket: u64,
    callback: Callback,
    // Dropping the guard disarms the timeout.
    _timeout: TimeoutGuard,
}

#[derive(Default)]
struct ListenerState {
    watches: HashMap<String, Callback>,
    pending: Vec<PendingFix>,
    /// The consumers want a subscription.
    running: bool,
    /// The provider accepted an update request that has not been removed.
    subscribed: bool,
    /// `running` changed since the provider was last brought in line.
    resync: bool,
    last_known: Option<Position>,
    next_ticket: u64,
}

impl ListenerState {
    fn size(&self) -> usize {
        self.watches.len() + self.pending.len()
    }

    fn take_pending(&mut self) -> Vec<Callback> {
        self.pending
            .drain(..)
            .map(|pending| pending.callback)
            .collect()
    }

    fn watch_callbacks(&self) -> Vec<Callback> {
        self.watches.values().cloned().collect()
    }

    /// Consumes a pending resync and returns the provider call it needs.
    fn next_transition(&mut self) -> Option<Transition> {
        if !std::mem::take(&mut self.resync) {
            return None;
        }
        let wanted = self.running && self.size() > 0;
        Some(match (wanted, self.subscribed) {
            (true, false) => Transition::Subscribe,
            (false, true) => Transition::Unsubscribe,
            _ => Transition::Settled,
        })
    }
}

enum Transition {
    Subscribe,
    Unsubscribe,
    Settled,
}

struct Shared {
    provider: Arc<dyn LocationProvider>,
    permissions: Arc<dyn PermissionChecker>,
    request: UpdateRequest,
    state: Mutex<ListenerState>,
    // Held while talking to the provider so start and stop never interleave.
    transition: Mutex<()>,
}

/// Multiplexes one-shot requests and watches onto one provider subscription.
///
/// The subscription is started when the first consumer arrives and stopped
/// when the last one leaves. Every fix is delivered once to each pending
/// one-shot request, which is then dropped, and to every watch, which stays.
/// A one-shot request that sees no fix within its timeout receives
/// [`PositionErrorCode::Timeout`](crate::PositionErrorCode::Timeout).
///
/// Callbacks run after the listener's internal lock is released, so they may
/// call back into the listener.
#[derive(Clone)]
pub struct LocationListener {
    shared: Arc<Shared>,
}

impl fmt::Debug for LocationListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("LocationListener")
            .field("provider", &self.shared.provider)
            .field("watches", &state.watches.len())
            .field("pending", &state.pending.len())
            .field("running", &state.running)
            .field("subscribed", &state.subscribed)
            .finish_non_exhaustive()
    }
}

impl LocationListener {
    /// Creates a listener over `provider` and starts connecting it.
    ///
    /// Updates are only ever requested while `permissions` reports coarse or
    /// fine location as granted.
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        permissions: Arc<dyn PermissionChecker>,
        request: UpdateRequest,
    ) -> Self {
        let shared = Arc::new(Shared {
            provider,
            permissions,
            request,
            state: Mutex::new(ListenerState::default()),
            transition: Mutex::new(()),
        });

        shared.provider.set_delegate(Arc::new(ListenerDelegate {
            shared: Arc::downgrade(&shared),
        }));

        if !shared.provider.is_connected() {
            if let Err(err) = shared.provider.connect() {
                warn!("failed to connect location provider: {err}");
            }
        }

        Self { shared }
    }

    /// Number of outstanding consumers: watches plus pending one-shot requests.
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.lock().size()
    }

    /// Whether the consumers want the provider subscription.
    ///
    /// This turns `true` as soon as the first consumer arrives, before the
    /// provider has connected.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Whether a watch with `id` is registered.
    #[must_use]
    pub fn has_watch(&self, id: &str) -> bool {
        self.shared.lock().watches.contains_key(id)
    }

    /// Registers a watch that receives every fix until [`clear_watch`](Self::clear_watch).
    ///
    /// Registering an existing `id` replaces its callback.
    pub fn add_watch(&self, id: impl Into<String>, callback: Arc<dyn PositionCallback>) {
        let id = id.into();
        debug!("adding location watch {id}");

        let start = {
            let mut state = self.shared.lock();
            state.watches.insert(id, callback);
            claim_start(&mut state)
        };

        if start {
            self.shared.sync_subscription();
        }
    }

    /// Registers a one-shot request for the next fix.
    ///
    /// If no fix arrives within `timeout` the callback receives a timeout
    /// error instead.
    pub fn add_callback(&self, callback: Arc<dyn PositionCallback>, timeout: Duration) {
        debug!("adding one-shot location request, timeout {timeout:?}");

        let start = {
            let mut state = self.shared.lock();
            let ticket = state.next_ticket;
            state.next_ticket += 1;

            let shared = Arc::downgrade(&self.shared);
            let guard = TimeoutGuard::arm(timeout, move || {
                if let Some(shared) = shared.upgrade() {
                    shared.expire(ticket);
                }
            });

            state.pending.push(PendingFix {
                ticket,
                callback,
                _timeout: guard,
            });
            claim_start(&mut state)
        };

        if start {
            self.shared.sync_subscription();
        }
    }

    /// Removes the watch registered under `id`.
    ///
    /// Returns whether a watch was removed. The subscription stops once no
    /// consumer remains, whether or not `id` was known.
    pub fn clear_watch(&self, id: &str) -> bool {
        let (removed, stop) = {
            let mut state = self.shared.lock();
            let removed = state.watches.remove(id).is_some();
            (removed, claim_stop(&mut state))
        };

        debug!("cleared location watch {id} (known: {removed})");
        if stop {
            self.shared.sync_subscription();
        }
        removed
    }

    /// The most recent fix seen by this listener, or the provider's cached fix.
    #[must_use]
    pub fn last_known_location(&self) -> Option<Position> {
        let cached = self.shared.lock().last_known.clone();
        cached.or_else(|| self.shared.provider.last_location())
    }

    /// Stops the subscription and drops every consumer without notifying them.
    pub fn destroy(&self) {
        let dropped = {
            let mut state = self.shared.lock();
            state.running = false;
            state.resync = true;
            state.watches.clear();
            std::mem::take(&mut state.pending)
        };

        debug!(
            "destroying location listener, dropping {} pending requests",
            dropped.len()
        );
        drop(dropped);

        self.shared.sync_subscription();
    }
}

/// Marks the subscription as wanted if it is idle and has consumers.
fn claim_start(state: &mut ListenerState) -> bool {
    if state.running || state.size() == 0 {
        return false;
    }
    state.running = true;
    state.resync = true;
    true
}

/// Marks the subscription as unwanted if it is running with no consumers left.
fn claim_stop(state: &mut ListenerState) -> bool {
    if !state.running || state.size() != 0 {
        return false;
    }
    state.running = false;
    state.resync = true;
    true
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().expect("listener state mutex poisoned")
    }

    /// Brings the provider in line with `running`.
    ///
    /// Only one thread talks to the provider at a time. A caller that finds
    /// another thread mid-transition leaves its resync flag behind, and that
    /// thread picks it up before letting go.
    fn sync_subscription(&self) {
        loop {
            let failure = {
                let _transition = match self.transition.try_lock() {
                    Ok(guard) => guard,
                    Err(TryLockError::WouldBlock) => return,
                    Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                };
                self.run_transitions().err()
            };

            if let Some(err) = failure {
                warn!("failed to start location updates: {err}");
                self.fail_all(&PositionError::from(&err));
            }

            if !self.lock().resync {
                return;
            }
        }
    }

    fn run_transitions(&self) -> LocationResult<()> {
        loop {
            let Some(transition) = self.lock().next_transition() else {
                return Ok(());
            };
            match transition {
                Transition::Subscribe => self.subscribe()?,
                Transition::Unsubscribe => self.unsubscribe(),
                Transition::Settled => {}
            }
        }
    }

    fn subscribe(&self) -> LocationResult<()> {
        if !is_any_granted(self.permissions.as_ref(), &LOCATION_PERMISSIONS) {
            debug!("location permission missing, failing consumers");
            return Err(LocationError::PermissionDenied);
        }

        if !self.provider.is_connected() {
            debug!("location provider not connected, connecting first");
            self.provider.connect()?;
            if !self.provider.is_connected() {
                // The Connected event triggers another resync.
                return Ok(());
            }
        }

        debug!("requesting location updates: {:?}", self.request);
        self.provider.request_updates(&self.request)?;
        self.lock().subscribed = true;
        Ok(())
    }

    fn unsubscribe(&self) {
        if self.provider.is_connected() {
            debug!("removing location updates");
            self.provider.remove_updates();
        }
        self.lock().subscribed = false;
    }

    fn handle_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::Connected => {
                self.lock().resync = true;
                self.sync_subscription();
            }
            ProviderEvent::ConnectionSuspended { cause } => {
                debug!("location provider connection suspended (cause {cause})");
            }
            ProviderEvent::ConnectionFailed { message } => {
                let error = LocationError::ProviderDisconnected;
                warn!("{error}: {message}");
                self.fail_all(&PositionError::new(error.code(), message));
            }
            ProviderEvent::Location { position } => self.deliver_fix(position),
        }
    }

    fn deliver_fix(&self, position: Position) {
        let (one_shots, watches, stop) = {
            let mut state = self.lock();
            state.last_known = Some(position.clone());
            let one_shots = state.take_pending();
            let stop = claim_stop(&mut state);
            (one_shots, state.watch_callbacks(), stop)
        };

        if stop {
            self.sync_subscription();
        }

        for callback in one_shots {
            callback.on_position(&position, false);
        }
        for callback in watches {
            callback.on_position(&position, true);
        }
    }

    /// Fails every consumer. One-shot requests are dropped, watches stay.
    ///
    /// A live subscription keeps serving the remaining watches and stops if
    /// none are left. Without one the listener goes idle so the next consumer
    /// retries from scratch.
    fn fail_all(&self, error: &PositionError) {
        let (one_shots, watches, stop) = {
            let mut state = self.lock();
            let one_shots = state.take_pending();
            let stop = if state.subscribed {
                claim_stop(&mut state)
            } else {
                state.running = false;
                false
            };
            (one_shots, state.watch_callbacks(), stop)
        };

        if stop {
            self.sync_subscription();
        }

        for callback in one_shots {
            callback.on_error(error, false);
        }
        for callback in watches {
            callback.on_error(error, true);
        }
    }

    fn expire(&self, ticket: u64) {
        let (expired, stop) = {
            let mut state = self.lock();
            let Some(index) = state
                .pending
                .iter()
                .position(|pending| pending.ticket == ticket)
            else {
                return;
            };
            let expired = state.pending.remove(index);
            (expired, claim_stop(&mut state))
        };

        debug!("one-shot location request {ticket} timed out");
        if stop {
            self.sync_subscription();
        }

        let error = PositionError::from(&LocationError::Timeout);
        expired.callback.on_error(&error, false);
    }
}

struct ListenerDelegate {
    shared: Weak<Shared>,
}

impl ProviderDelegate for ListenerDelegate {
    fn on_event(&self, event: ProviderEvent) {
        if let Some(shared) = self.shared.upgrade() {
            shared.handle_event(event);
        } else {
            debug!("dropping location event for a destroyed listener");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use crate::{Permission, PermissionStatus, PositionErrorCode};

    #[derive(Debug)]
    struct Grants {
        coarse: PermissionStatus,
        fine: PermissionStatus,
    }

    impl Grants {
        fn all() -> Arc<Self> {
            Arc::new(Self {
                coarse: PermissionStatus::Granted,
                fine: PermissionStatus::Granted,
            })
        }

        fn none() -> Arc<Self> {
            Arc::new(Self {
                coarse: PermissionStatus::Denied,
                fine: PermissionStatus::Denied,
            })
        }
    }

    /// Grants everything, but only after a delay.
    #[derive(Debug)]
    struct SlowGrants(Duration);

    impl PermissionChecker for SlowGrants {
        fn status(&self, _permission: Permission) -> PermissionStatus {
            std::thread::sleep(self.0);
            PermissionStatus::Granted
        }
    }

    impl PermissionChecker for Grants {
        fn status(&self, permission: Permission) -> PermissionStatus {
            match permission {
                Permission::CoarseLocation => self.coarse,
                Permission::FineLocation => self.fine,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Delivered {
        Fix(f64, bool),
        Error(PositionErrorCode, bool),
    }

    #[derive(Default)]
    struct Recorder {
        delivered: Mutex<Vec<Delivered>>,
    }

    impl Recorder {
        fn delivered(&self) -> Vec<Delivered> {
            self.delivered.lock().unwrap().clone()
        }
    }

    impl PositionCallback for Recorder {
        fn on_position(&self, position: &Position, keep_callback: bool) {
            self.delivered
                .lock()
                .unwrap()
                .push(Delivered::Fix(position.coords.latitude, keep_callback));
        }

        fn on_error(&self, error: &PositionError, keep_callback: bool) {
            self.delivered
                .lock()
                .unwrap()
                .push(Delivered::Error(error.code, keep_callback));
        }
    }

    fn fix(latitude: f64) -> ProviderEvent {
        ProviderEvent::Location {
            position: Position::new(latitude, 0.0, crate::now_millis()),
        }
    }

    fn listener(
        provider: &Arc<MockProvider>,
        grants: Arc<dyn PermissionChecker>,
    ) -> LocationListener {
        LocationListener::new(provider.clone(), grants, UpdateRequest::default())
    }

    const LONG: Duration = Duration::from_secs(60);

    #[test]
    fn one_shot_runs_the_subscription_for_exactly_one_fix() {
        let provider = MockProvider::connected();
        let listener = listener(&provider, Grants::all());
        let recorder = Arc::new(Recorder::default());

        listener.add_callback(recorder.clone(), LONG);
        assert!(listener.is_running());
        assert_eq!(provider.calls(), vec!["request_updates"]);

        provider.emit(fix(10.0));
        provider.emit(fix(11.0));

        assert_eq!(recorder.delivered(), vec![Delivered::Fix(10.0, false)]);
        assert_eq!(listener.size(), 0);
        assert!(!listener.is_running());
        assert_eq!(provider.calls(), vec!["request_updates", "remove_updates"]);
    }

    #[test]
    fn watches_persist_while_one_shots_are_consumed() {
        let provider = MockProvider::connected();
        let listener = listener(&provider, Grants::all());
        let watch = Arc::new(Recorder::default());
        let once = Arc::new(Recorder::default());

        listener.add_watch("w1", watch.clone());
        listener.add_callback(once.clone(), LONG);
        assert_eq!(listener.size(), 2);

        provider.emit(fix(1.0));
        provider.emit(fix(2.0));

        assert_eq!(once.delivered(), vec![Delivered::Fix(1.0, false)]);
        assert_eq!(
            watch.delivered(),
            vec![Delivered::Fix(1.0, true), Delivered::Fix(2.0, true)]
        );
        assert!(listener.is_running());
        assert_eq!(provider.calls(), vec!["request_updates"]);

        assert!(listener.clear_watch("w1"));
        assert!(!listener.is_running());
        assert_eq!(provider.calls(), vec!["request_updates", "remove_updates"]);
    }

    #[test]
    fn subscription_is_shared_between_consumers() {
        let provider = MockProvider::connected();
        let listener = listener(&provider, Grants::all());

        listener.add_watch("a", Arc::new(Recorder::default()));
        listener.add_watch("b", Arc::new(Recorder::default()));
        listener.add_callback(Arc::new(Recorder::default()), LONG);

        assert_eq!(provider.calls(), vec!["request_updates"]);

        listener.clear_watch("a");
        assert!(listener.is_running());
        assert_eq!(provider.calls(), vec!["request_updates"]);
    }

    #[test]
    fn clearing_an_unknown_watch_is_harmless() {
        let provider = MockProvider::connected();
        let listener = listener(&provider, Grants::all());

        assert!(!listener.clear_watch("missing"));
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn updates_wait_for_the_connection() {
        let provider = MockProvider::disconnected();
        let listener = listener(&provider, Grants::all());
        assert_eq!(provider.calls(), vec!["connect"]);

        let recorder = Arc::new(Recorder::default());
        listener.add_callback(recorder.clone(), LONG);
        assert_eq!(provider.calls(), vec!["connect", "connect"]);

        provider.set_connected(true);
        provider.emit(ProviderEvent::Connected);
        assert_eq!(
            provider.calls(),
            vec!["connect", "connect", "request_updates"]
        );

        provider.emit(fix(5.0));
        assert_eq!(recorder.delivered(), vec![Delivered::Fix(5.0, false)]);
    }

    #[test]
    fn connecting_without_consumers_does_not_subscribe() {
        let provider = MockProvider::disconnected();
        let _listener = listener(&provider, Grants::all());

        provider.set_connected(true);
        provider.emit(ProviderEvent::Connected);

        assert_eq!(provider.calls(), vec!["connect"]);
    }

    #[test]
    fn synchronous_connection_does_not_deadlock() {
        let provider = MockProvider::connecting_synchronously();
        let listener = listener(&provider, Grants::all());
        assert!(provider.is_connected());

        listener.add_watch("w", Arc::new(Recorder::default()));
        assert_eq!(provider.calls(), vec!["connect", "request_updates"]);
    }

    #[test]
    fn one_shot_times_out_and_releases_the_subscription() {
        let provider = MockProvider::connected();
        let listener = listener(&provider, Grants::all());
        let recorder = Arc::new(Recorder::default());

        listener.add_callback(recorder.clone(), Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(400));

        assert_eq!(
            recorder.delivered(),
            vec![Delivered::Error(PositionErrorCode::Timeout, false)]
        );
        assert_eq!(listener.size(), 0);
        assert_eq!(provider.calls(), vec!["request_updates", "remove_updates"]);
    }

    #[test]
    fn timeout_keeps_the_subscription_for_remaining_watches() {
        let provider = MockProvider::connected();
        let listener = listener(&provider, Grants::all());
        let once = Arc::new(Recorder::default());

        listener.add_watch("w", Arc::new(Recorder::default()));
        listener.add_callback(once.clone(), Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(400));

        assert_eq!(
            once.delivered(),
            vec![Delivered::Error(PositionErrorCode::Timeout, false)]
        );
        assert!(listener.is_running());
        assert_eq!(provider.calls(), vec!["request_updates"]);
    }

    #[test]
    fn fix_disarms_the_timeout() {
        let provider = MockProvider::connected();
        let listener = listener(&provider, Grants::all());
        let recorder = Arc::new(Recorder::default());

        listener.add_callback(recorder.clone(), Duration::from_millis(100));
        provider.emit(fix(3.0));
        std::thread::sleep(Duration::from_millis(400));

        assert_eq!(recorder.delivered(), vec![Delivered::Fix(3.0, false)]);
    }

    #[test]
    fn missing_permission_fails_consumers_without_subscribing() {
        let provider = MockProvider::connected();
        let listener = listener(&provider, Grants::none());
        let once = Arc::new(Recorder::default());
        let watch = Arc::new(Recorder::default());

        listener.add_callback(once.clone(), LONG);
        listener.add_watch("w", watch.clone());

        assert_eq!(
            once.delivered(),
            vec![Delivered::Error(PositionErrorCode::PermissionDenied, false)]
        );
        assert_eq!(
            watch.delivered(),
            vec![Delivered::Error(PositionErrorCode::PermissionDenied, true)]
        );
        assert!(listener.has_watch("w"));
        assert!(!listener.is_running());
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn coarse_permission_alone_is_sufficient() {
        let provider = MockProvider::connected();
        let grants = Arc::new(Grants {
            coarse: PermissionStatus::Granted,
            fine: PermissionStatus::Denied,
        });
        let listener = listener(&provider, grants);

        listener.add_watch("w", Arc::new(Recorder::default()));
        assert_eq!(provider.calls(), vec!["request_updates"]);
    }

    #[test]
    fn connection_failure_reports_position_unavailable() {
        let provider = MockProvider::disconnected();
        let listener = listener(&provider, Grants::all());
        let once = Arc::new(Recorder::default());
        let watch = Arc::new(Recorder::default());

        listener.add_watch("w", watch.clone());
        listener.add_callback(once.clone(), LONG);
        provider.emit(ProviderEvent::ConnectionFailed {
            message: "service missing".into(),
        });

        assert_eq!(
            once.delivered(),
            vec![Delivered::Error(
                PositionErrorCode::PositionUnavailable,
                false
            )]
        );
        assert_eq!(
            watch.delivered(),
            vec![Delivered::Error(PositionErrorCode::PositionUnavailable, true)]
        );
        assert_eq!(listener.size(), 1);
        assert!(!listener.is_running());
    }

    #[test]
    fn failure_on_a_live_subscription_still_tears_it_down() {
        let provider = MockProvider::connected();
        let listener = listener(&provider, Grants::all());
        let watch = Arc::new(Recorder::default());

        listener.add_watch("w", watch.clone());
        provider.emit(ProviderEvent::ConnectionFailed {
            message: "location request rejected".into(),
        });

        assert_eq!(
            watch.delivered(),
            vec![Delivered::Error(PositionErrorCode::PositionUnavailable, true)]
        );
        assert!(listener.is_running());
        assert_eq!(provider.calls(), vec!["request_updates"]);

        assert!(listener.clear_watch("w"));
        assert!(!listener.is_running());
        assert_eq!(provider.calls(), vec!["request_updates", "remove_updates"]);
    }

    #[test]
    fn failure_with_only_one_shots_stops_the_subscription() {
        let provider = MockProvider::connected();
        let listener = listener(&provider, Grants::all());
        let once = Arc::new(Recorder::default());

        listener.add_callback(once.clone(), LONG);
        provider.emit(ProviderEvent::ConnectionFailed {
            message: "location request rejected".into(),
        });

        assert_eq!(
            once.delivered(),
            vec![Delivered::Error(
                PositionErrorCode::PositionUnavailable,
                false
            )]
        );
        assert_eq!(listener.size(), 0);
        assert_eq!(provider.calls(), vec!["request_updates", "remove_updates"]);
    }

    #[test]
    fn timeout_during_a_slow_start_still_unsubscribes() {
        let provider = MockProvider::connected();
        let listener = listener(
            &provider,
            Arc::new(SlowGrants(Duration::from_millis(200))),
        );
        let once = Arc::new(Recorder::default());

        // The timeout fires while the start is still checking permissions.
        listener.add_callback(once.clone(), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(
            once.delivered(),
            vec![Delivered::Error(PositionErrorCode::Timeout, false)]
        );
        assert_eq!(listener.size(), 0);
        assert!(!listener.is_running());
        assert_eq!(provider.calls(), vec!["request_updates", "remove_updates"]);
    }

    #[test]
    fn concurrent_consumers_leave_no_subscription_behind() {
        let provider = MockProvider::connected();
        let listener = listener(&provider, Grants::all());

        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let listener = listener.clone();
                std::thread::spawn(move || {
                    for round in 0..50 {
                        let id = format!("{worker}-{round}");
                        listener.add_watch(id.clone(), Arc::new(Recorder::default()));
                        listener.add_callback(
                            Arc::new(Recorder::default()),
                            Duration::from_millis(1),
                        );
                        listener.clear_watch(&id);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked");
        }
        std::thread::sleep(Duration::from_millis(300));

        assert_eq!(listener.size(), 0);
        assert!(!listener.is_running());
        let calls = provider.calls();
        let requested = calls.iter().filter(|call| **call == "request_updates").count();
        let removed = calls.iter().filter(|call| **call == "remove_updates").count();
        assert_eq!(requested, removed);
        assert_eq!(calls.last(), Some(&"remove_updates"));
    }

    struct SelfClearing {
        listener: Mutex<Option<LocationListener>>,
        seen: Recorder,
    }

    impl PositionCallback for SelfClearing {
        fn on_position(&self, position: &Position, keep_callback: bool) {
            self.seen.on_position(position, keep_callback);
            if let Some(listener) = self.listener.lock().unwrap().take() {
                listener.clear_watch("self");
            }
        }

        fn on_error(&self, error: &PositionError, keep_callback: bool) {
            self.seen.on_error(error, keep_callback);
        }
    }

    #[test]
    fn callbacks_may_reenter_the_listener() {
        let provider = MockProvider::connected();
        let listener = listener(&provider, Grants::all());
        let callback = Arc::new(SelfClearing {
            listener: Mutex::new(Some(listener.clone())),
            seen: Recorder::default(),
        });

        listener.add_watch("self", callback.clone());
        provider.emit(fix(7.0));

        assert_eq!(callback.seen.delivered(), vec![Delivered::Fix(7.0, true)]);
        assert_eq!(listener.size(), 0);
        assert_eq!(provider.calls(), vec!["request_updates", "remove_updates"]);
    }

    #[test]
    fn last_known_prefers_the_listeners_own_fix() {
        let provider = MockProvider::connected();
        let listener = listener(&provider, Grants::all());
        assert_eq!(listener.last_known_location(), None);

        provider.set_cached(Position::new(-1.0, -1.0, 1));
        assert_eq!(
            listener.last_known_location().map(|p| p.coords.latitude),
            Some(-1.0)
        );

        provider.emit(fix(9.0));
        assert_eq!(
            listener.last_known_location().map(|p| p.coords.latitude),
            Some(9.0)
        );
    }

    #[test]
    fn destroy_stops_and_forgets_consumers() {
        let provider = MockProvider::connected();
        let listener = listener(&provider, Grants::all());
        let recorder = Arc::new(Recorder::default());

        listener.add_watch("w", recorder.clone());
        listener.add_callback(recorder.clone(), Duration::from_millis(20));
        listener.destroy();
        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(listener.size(), 0);
        assert!(recorder.delivered().is_empty());
        assert_eq!(provider.calls(), vec!["request_updates", "remove_updates"]);
    }
}
