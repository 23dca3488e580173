//! # Mock Framework
//!
//! `MockClient<T>` hands out a real [`ResourceClient<T>`] whose requests are answered from
//! a queue of expectations instead of a running [`ResourceActor`](super::ResourceActor).
//! It is how tests simulate a store that times out, drops writes or refuses updates.
//!
//! | | MockClient | Real actor |
//! |---|---|---|
//! | **State** | none (scripted answers) | real documents |
//! | **Error injection** | `return_err` | hard |
//! | **Use case** | failure policies around the store | happy paths, end-to-end flows |
//!
//! ```rust,ignore
//! let mut snapshots = MockClient::<TrackingSnapshot>::new();
//! snapshots.expect_get(order_id.clone()).return_ok(None);
//! snapshots.expect_merge(order_id.clone()).return_err(FrameworkError::ActorClosed);
//!
//! let gateway = InMemoryGateway::new(snapshots.client(), orders.client());
//! // ... drive the relay ...
//! snapshots.verify();
//! ```
//!
//! Expectations are answered strictly in the order they were registered. A request that
//! does not match the next expectation is a test bug and panics the mock task; the caller
//! then observes `ActorDropped`/`ActorClosed`.
//!
//! `delayed` holds an answer back, which is how a hung store is simulated. Later requests
//! are still answered on time.

use crate::framework::{ActorEntity, FrameworkError, ResourceClient, ResourceRequest};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

// =============================================================================
// EXPECTATION BUILDER API
// =============================================================================

enum Expectation<T: ActorEntity> {
    Create {
        id: T::Id,
        response: Result<T, FrameworkError>,
    },
    Get {
        id: T::Id,
        response: Result<Option<T>, FrameworkError>,
    },
    Update {
        id: T::Id,
        response: Result<T, FrameworkError>,
    },
    Merge {
        id: T::Id,
        response: Result<T, FrameworkError>,
    },
}

type Expectations<T> = Arc<Mutex<VecDeque<(Expectation<T>, Duration)>>>;

fn reply<R: Send + 'static>(respond_to: oneshot::Sender<R>, response: R, delay: Duration) {
    if delay.is_zero() {
        let _ = respond_to.send(response);
        return;
    }
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = respond_to.send(response);
    });
}

/// A mock client with expectation tracking for fluent testing.
pub struct MockClient<T: ActorEntity> {
    client: ResourceClient<T>,
    expectations: Expectations<T>,
    _handle: tokio::task::JoinHandle<()>,
}

impl<T: ActorEntity> Default for MockClient<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ActorEntity> MockClient<T> {
    /// Creates a new mock client with no expectations.
    pub fn new() -> Self {
        let (sender, mut receiver) = mpsc::channel::<ResourceRequest<T>>(100);
        let expectations: Expectations<T> = Arc::new(Mutex::new(VecDeque::new()));
        let queue = expectations.clone();

        let handle = tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                let (expectation, delay) = match queue.lock().pop_front() {
                    Some((expectation, delay)) => (Some(expectation), delay),
                    None => (None, Duration::ZERO),
                };

                match (request, expectation) {
                    (
                        ResourceRequest::Create { id, respond_to, .. },
                        Some(Expectation::Create { id: expected, response }),
                    ) if id == expected => reply(respond_to, response, delay),
                    (
                        ResourceRequest::Get { id, respond_to },
                        Some(Expectation::Get { id: expected, response }),
                    ) if id == expected => reply(respond_to, response, delay),
                    (
                        ResourceRequest::Update { id, respond_to, .. },
                        Some(Expectation::Update { id: expected, response }),
                    ) if id == expected => reply(respond_to, response, delay),
                    (
                        ResourceRequest::Merge { id, respond_to, .. },
                        Some(Expectation::Merge { id: expected, response }),
                    ) if id == expected => reply(respond_to, response, delay),
                    (request, _) => {
                        panic!("Unexpected request or expectation mismatch: {:?}", request);
                    }
                }
            }
        });

        Self {
            client: ResourceClient::new(sender),
            expectations,
            _handle: handle,
        }
    }

    /// Returns the client for use in tests.
    pub fn client(&self) -> ResourceClient<T> {
        self.client.clone()
    }

    pub fn expect_create(&mut self, id: T::Id) -> ExpectationBuilder<T, T> {
        self.builder(id, |id, response| Expectation::Create { id, response })
    }

    pub fn expect_get(&mut self, id: T::Id) -> ExpectationBuilder<T, Option<T>> {
        self.builder(id, |id, response| Expectation::Get { id, response })
    }

    pub fn expect_update(&mut self, id: T::Id) -> ExpectationBuilder<T, T> {
        self.builder(id, |id, response| Expectation::Update { id, response })
    }

    pub fn expect_merge(&mut self, id: T::Id) -> ExpectationBuilder<T, T> {
        self.builder(id, |id, response| Expectation::Merge { id, response })
    }

    /// Number of expectations not consumed yet.
    pub fn pending(&self) -> usize {
        self.expectations.lock().len()
    }

    /// Verifies that all expectations were met.
    pub fn verify(&self) {
        let remaining = self.pending();
        if remaining > 0 {
            panic!("Not all expectations were met. {} remaining", remaining);
        }
    }

    fn builder<R>(
        &self,
        id: T::Id,
        make: fn(T::Id, Result<R, FrameworkError>) -> Expectation<T>,
    ) -> ExpectationBuilder<T, R> {
        ExpectationBuilder {
            id,
            make,
            delay: Duration::ZERO,
            expectations: self.expectations.clone(),
        }
    }
}

/// Builder returned by the `expect_*` methods; finish it with `return_ok` or `return_err`.
pub struct ExpectationBuilder<T: ActorEntity, R> {
    id: T::Id,
    make: fn(T::Id, Result<R, FrameworkError>) -> Expectation<T>,
    delay: Duration,
    expectations: Expectations<T>,
}

impl<T: ActorEntity, R> ExpectationBuilder<T, R> {
    /// Answer only after `delay` has passed.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the expectation to return a successful result.
    pub fn return_ok(self, value: R) {
        let expectation = (self.make)(self.id, Ok(value));
        self.expectations.lock().push_back((expectation, self.delay));
    }

    /// Sets the expectation to return an error.
    pub fn return_err(self, error: FrameworkError) {
        let expectation = (self.make)(self.id, Err(error));
        self.expectations.lock().push_back((expectation, self.delay));
    }
}
