//! A lazily-resolved, memoized handle to an eventually-available result.
//!
//! Backing file systems hand out [`Deferred`] values so that fetching file
//! contents does not block the caller until the result is actually needed.
//! The first call to [`Deferred::get`] drives the underlying resolver to
//! completion and memoizes the outcome, errors included; subsequent calls
//! return the memoized result without re-running the resolver.

use std::future::Future;

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use crate::error::FsContents;

enum State<T> {
    Resolved(FsContents<T>),
    Pending(BoxFuture<'static, FsContents<T>>),
}

/// A value that is either already available or will be produced by a pending
/// computation, run at most once.
pub struct Deferred<T> {
    state: Mutex<State<T>>,
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred").finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    /// Creates an already-resolved deferred value.
    pub fn resolved(value: T) -> Self {
        Self::from_contents(Ok(value))
    }

    /// Creates a deferred value holding an already-known outcome.
    pub fn from_contents(contents: FsContents<T>) -> Self {
        Deferred {
            state: Mutex::new(State::Resolved(contents)),
        }
    }

    /// Creates a deferred value backed by a resolver future.
    ///
    /// The future is not polled until the first call to [`get`](Self::get).
    pub fn new(resolver: impl Future<Output = FsContents<T>> + Send + 'static) -> Self {
        Deferred {
            state: Mutex::new(State::Pending(Box::pin(resolver))),
        }
    }

    /// Resolves this deferred value, blocking on the pending computation if
    /// it has not run yet.
    ///
    /// The outcome of the first resolution is memoized, so calling this
    /// repeatedly yields identical results without re-running the resolver.
    pub async fn get(&self) -> FsContents<T> {
        let mut state = self.state.lock().await;
        match &mut *state {
            State::Resolved(contents) => contents.clone(),
            State::Pending(resolver) => {
                let contents = resolver.await;
                *state = State::Resolved(contents.clone());
                contents
            }
        }
    }

    /// Derives a new deferred value by transforming the resolved result.
    pub fn map<U, F>(self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Deferred::new(async move { self.get().await.map(f) })
    }
}
