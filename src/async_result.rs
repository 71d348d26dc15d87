//! A single-assignment result of an asynchronous computation.
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::{Error, Result};

type Continuation<T> = Box<dyn FnOnce(&Result<T>) + Send>;

struct State<T> {
    /// `None` until the result is completed.
    result: Option<Result<T>>,
    continuations: Vec<Continuation<T>>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    completed: Condvar,
}

/// The eventual outcome of an asynchronous operation.
///
/// `AsyncResult` completes at most once: the first call to [`AsyncResult::complete`] or
/// [`AsyncResult::complete_with_error`] wins and later calls are ignored. Cloning an `AsyncResult`
/// produces another handle to the same result, so one clone can be completed from a worker thread
/// while others wait on it.
///
/// There is no cancellation. Once an operation has been started it runs to completion.
///
/// # Examples
/// ```
/// # use skylab::AsyncResult;
/// let result = AsyncResult::new();
/// let completer = result.clone();
/// std::thread::spawn(move || completer.complete(42));
/// assert_eq!(result.get().unwrap(), 42);
/// ```
pub struct AsyncResult<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        AsyncResult {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for AsyncResult<T> {
    fn default() -> Self {
        AsyncResult {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    result: None,
                    continuations: Vec::new(),
                }),
                completed: Condvar::new(),
            }),
        }
    }
}

impl<T: Clone> std::fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncResult")
            .field("done", &self.is_done())
            .finish()
    }
}

impl<T: Clone> AsyncResult<T> {
    /// Create a new, not yet completed result.
    pub fn new() -> AsyncResult<T> {
        AsyncResult::default()
    }

    /// Create a result that is already completed with `value`.
    pub fn completed(value: T) -> AsyncResult<T> {
        let result = AsyncResult::new();
        result.complete(value);
        result
    }

    /// Create a result that has already failed with `error`.
    pub fn failed(error: Error) -> AsyncResult<T> {
        let result = AsyncResult::new();
        result.complete_with_error(error);
        result
    }

    /// Complete with a value. Returns `false` if the result was already completed.
    pub fn complete(&self, value: T) -> bool {
        self.set(Ok(value))
    }

    /// Complete with an error. Returns `false` if the result was already completed.
    pub fn complete_with_error(&self, error: Error) -> bool {
        self.set(Err(error))
    }

    fn set(&self, result: Result<T>) -> bool {
        let continuations = {
            let mut state = self.lock();
            if state.result.is_some() {
                return false;
            }
            state.result = Some(result.clone());
            std::mem::take(&mut state.continuations)
        };
        self.shared.completed.notify_all();

        // Run continuations outside of the lock, so they may use this result freely.
        for continuation in continuations {
            continuation(&result);
        }
        true
    }

    /// Returns `true` if the result has been completed.
    pub fn is_done(&self) -> bool {
        self.lock().result.is_some()
    }

    /// Always returns `false`: an `AsyncResult` cannot be cancelled.
    pub fn cancel(&self) -> bool {
        false
    }

    /// Always returns `false`: an `AsyncResult` cannot be cancelled.
    pub fn is_cancelled(&self) -> bool {
        false
    }

    /// Block until the result is completed and return it.
    pub fn get(&self) -> Result<T> {
        let mut state = self.lock();
        loop {
            if let Some(result) = &state.result {
                return result.clone();
            }
            state = self
                .shared
                .completed
                .wait(state)
                .map_err(|_| Error::WorkerPanicked)?;
        }
    }

    /// Block until the result is completed or `timeout` elapses.
    ///
    /// Returns [`Error::Timeout`] if the result is not completed in time. A timeout does not
    /// affect the result itself: it may still complete later.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            if let Some(result) = &state.result {
                return result.clone();
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                // Timeout too large to represent. Wait in large steps.
                None => Duration::from_secs(u32::MAX as u64),
            };
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            state = self
                .shared
                .completed
                .wait_timeout(state, remaining)
                .map_err(|_| Error::WorkerPanicked)?
                .0;
        }
    }

    /// Register a callback to run once the result is completed.
    ///
    /// The callback runs on the thread that completes the result, or immediately on the calling
    /// thread if the result is already completed.
    pub fn on_complete(&self, callback: impl FnOnce(&Result<T>) + Send + 'static) {
        let result = {
            let mut state = self.lock();
            match &state.result {
                Some(result) => result.clone(),
                None => {
                    state.continuations.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&result);
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // The lock is never held while running user code, so it cannot be poisoned.
        self.shared
            .state
            .lock()
            .expect("thread holding async result lock should not panic")
    }
}
