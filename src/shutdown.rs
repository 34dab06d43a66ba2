//! Graceful shutdown of the fixture server.
//!
//! This is handled through a [`Manager`], which tracks the [`State`] of the server
//! and counts the connections in flight. Listeners stop accepting as soon as the state
//! leaves [`State::Running`]; the shutdown then waits for the count to reach zero,
//! up to a grace period.
use crate::prelude::{threading::*, *};

/// The lifecycle of a server.
///
/// `Stopped → Starting → Running → Stopping → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not listening.
    Stopped,
    /// Binding listeners and loading the package unit.
    Starting,
    /// Accepting connections.
    Running,
    /// No longer accepting; waiting for in-flight connections.
    Stopping,
}

/// Shutdown manager.
/// Contains the state of the server and a counter of connections.
///
/// Waiting on state changes is handled using [`tokio::sync::watch`].
#[derive(Debug)]
#[must_use]
pub struct Manager {
    state: watch::Sender<State>,
    connections: AtomicUsize,
    idle: Notify,
}
impl Manager {
    /// Creates a new manager in [`State::Stopped`].
    pub fn new() -> Self {
        Self {
            state: watch::channel(State::Stopped).0,
            connections: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }
    /// Wraps [`Self`] in a [`Arc`] to use across [`tokio::task`]s.
    #[must_use]
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> State {
        *self.state.borrow()
    }
    /// Sets the state, notifying everyone waiting on it.
    pub fn set_state(&self, state: State) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Server state {previous:?} -> {state:?}");
        }
    }
    /// Gets a receiver of state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }
    /// Initiates a shutdown: listeners stop accepting immediately.
    ///
    /// Does nothing if the server is already stopping or stopped.
    pub fn shutdown(&self) {
        self.state.send_if_modified(|state| match state {
            State::Starting | State::Running => {
                info!("Initiating shutdown");
                *state = State::Stopping;
                true
            }
            State::Stopping | State::Stopped => false,
        });
    }

    /// Adds to the count of connections.
    /// The count is decreased when the returned guard is dropped.
    pub fn add_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.connections.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard(Arc::clone(self))
    }
    /// The number of connections in flight.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }
    /// Waits until no connections are in flight, for at most `grace`.
    ///
    /// Returns whether the count reached zero in time.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking, so a notification in between isn't lost.
            notified.as_mut().enable();
            if self.connections() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.connections() == 0;
            }
        }
    }
}
impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves when `state` leaves [`State::Starting`] and [`State::Running`],
/// or when the [`Manager`] is dropped.
pub async fn stopping(state: &mut watch::Receiver<State>) {
    loop {
        if matches!(*state.borrow_and_update(), State::Stopping | State::Stopped) {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

/// A connection counted by the [`Manager`]. Dropping it ends the connection's count.
#[derive(Debug)]
#[must_use]
pub struct ConnectionGuard(Arc<Manager>);
impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        // - 1 because fetch returns the old value.
        let connections = self.0.connections.fetch_sub(1, Ordering::AcqRel) - 1;
        if connections == 0 {
            trace!("Connection count is 0.");
            self.0.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        let manager = Manager::new();
        assert_eq!(manager.state(), State::Stopped);
        // a stopped server can't be shut down
        manager.shutdown();
        assert_eq!(manager.state(), State::Stopped);

        manager.set_state(State::Running);
        manager.shutdown();
        assert_eq!(manager.state(), State::Stopping);
    }

    #[tokio::test]
    async fn stopping_resolves() {
        let manager = Manager::new().build();
        manager.set_state(State::Running);
        let mut state = manager.subscribe();
        let waiter = spawn(async move { stopping(&mut state).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        manager.shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn waits_for_connections() {
        let manager = Manager::new().build();
        assert!(manager.wait_idle(Duration::ZERO).await);

        let guard = manager.add_connection();
        let second = manager.add_connection();
        assert_eq!(manager.connections(), 2);
        drop(second);
        assert!(!manager.wait_idle(Duration::from_millis(30)).await);

        spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(guard);
        });
        assert!(manager.wait_idle(Duration::from_secs(2)).await);
        assert_eq!(manager.connections(), 0);
    }
}
