//! Single-assignment asynchronous result cell.
//!
//! A [`Deferred`] starts out pending and is settled exactly once, either
//! resolved with a value or rejected with an [`Error`]. Continuations
//! registered while it is pending run later, in registration order, on the
//! call stack of whoever settles it. Continuations registered after settlement
//! run immediately on the caller's stack. Nothing is scheduled.
//!
//! A `Deferred` is reference counted and deliberately `!Send`: it must be
//! created, settled and observed on one thread. The session keeps every
//! deferred on a single `LocalSet`.
//!
//! ```
//! use jetbeep::Deferred;
//!
//! let answer = Deferred::new();
//! let doubled = answer.then(|v: &u32| Ok(v * 2));
//! answer.resolve(21);
//! assert_eq!(doubled.value(), Some(42));
//! ```

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::{Error, Result};

/// Settlement state of a [`Deferred`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Resolved,
    /// Settled with an error.
    Rejected,
}

enum Slot<T> {
    Pending,
    Resolved(Rc<T>),
    Rejected(Error),
}

type ResolveFn<T> = Box<dyn FnOnce(&Rc<T>)>;
type RejectFn = Box<dyn FnOnce(&Error)>;

struct Inner<T> {
    slot: Slot<T>,
    on_resolve: Vec<ResolveFn<T>>,
    on_reject: Vec<RejectFn>,
    wakers: Vec<Waker>,
}

/// A single-assignment asynchronous result with chainable continuations.
pub struct Deferred<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T> Deferred<T> {
    /// Creates a pending deferred.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                slot: Slot::Pending,
                on_resolve: Vec::new(),
                on_reject: Vec::new(),
                wakers: Vec::new(),
            })),
        }
    }

    /// Creates a deferred that is already resolved.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        let deferred = Self::new();
        deferred.resolve(value);
        deferred
    }

    /// Creates a deferred that is already rejected.
    #[must_use]
    pub fn rejected(error: Error) -> Self {
        let deferred = Self::new();
        deferred.reject(error);
        deferred
    }

    /// Creates a settled deferred from a result.
    #[must_use]
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::resolved(value),
            Err(error) => Self::rejected(error),
        }
    }

    /// Returns the current settlement state.
    #[must_use]
    pub fn state(&self) -> DeferredState {
        match self.inner.borrow().slot {
            Slot::Pending => DeferredState::Pending,
            Slot::Resolved(_) => DeferredState::Resolved,
            Slot::Rejected(_) => DeferredState::Rejected,
        }
    }

    /// Returns true while the deferred is not settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state() == DeferredState::Pending
    }

    /// Returns the rejection error, if rejected.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        match &self.inner.borrow().slot {
            Slot::Rejected(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Resolves the deferred and runs every resolve continuation in order.
    ///
    /// # Panics
    ///
    /// Panics if the deferred is already settled. Double settlement is a
    /// programming error, never a runtime condition.
    pub fn resolve(&self, value: T) {
        self.settle_resolved(Rc::new(value));
    }

    /// Rejects the deferred and runs every reject continuation in order.
    ///
    /// # Panics
    ///
    /// Panics if the deferred is already settled.
    pub fn reject(&self, error: Error) {
        let (callbacks, wakers) = {
            let mut inner = self.inner.borrow_mut();
            assert!(
                matches!(inner.slot, Slot::Pending),
                "deferred is already settled"
            );
            inner.slot = Slot::Rejected(error.clone());
            inner.on_resolve.clear();
            (
                std::mem::take(&mut inner.on_reject),
                std::mem::take(&mut inner.wakers),
            )
        };

        for callback in callbacks {
            callback(&error);
        }
        wakers.into_iter().for_each(Waker::wake);
    }

    fn settle_resolved(&self, value: Rc<T>) {
        let (callbacks, wakers) = {
            let mut inner = self.inner.borrow_mut();
            assert!(
                matches!(inner.slot, Slot::Pending),
                "deferred is already settled"
            );
            inner.slot = Slot::Resolved(Rc::clone(&value));
            inner.on_reject.clear();
            (
                std::mem::take(&mut inner.on_resolve),
                std::mem::take(&mut inner.wakers),
            )
        };

        for callback in callbacks {
            callback(&value);
        }
        wakers.into_iter().for_each(Waker::wake);
    }

    /// Registers a pair of continuations. Exactly one of them ever runs.
    fn subscribe(
        &self,
        on_resolve: impl FnOnce(&Rc<T>) + 'static,
        on_reject: impl FnOnce(&Error) + 'static,
    ) where
        T: 'static,
    {
        let settled = {
            let mut inner = self.inner.borrow_mut();
            let settled = match &inner.slot {
                Slot::Pending => None,
                Slot::Resolved(value) => Some(Ok(Rc::clone(value))),
                Slot::Rejected(error) => Some(Err(error.clone())),
            };
            let Some(settled) = settled else {
                inner.on_resolve.push(Box::new(on_resolve));
                inner.on_reject.push(Box::new(on_reject));
                return;
            };
            settled
        };

        // The borrow is released so the continuation may chain on `self`.
        match settled {
            Ok(value) => on_resolve(&value),
            Err(error) => on_reject(&error),
        }
    }

    /// Settles `target` with whatever this deferred settles with.
    fn forward_to(&self, target: Self)
    where
        T: 'static,
    {
        let on_error = target.clone();
        self.subscribe(
            move |value| target.settle_resolved(Rc::clone(value)),
            move |error| on_error.reject(error.clone()),
        );
    }
}

impl<T: 'static> Deferred<T> {
    /// Maps the eventual value through `f`.
    ///
    /// An `Err` returned by `f` rejects the returned deferred; a rejection of
    /// `self` is forwarded unchanged.
    pub fn then<U: 'static>(&self, f: impl FnOnce(&T) -> Result<U> + 'static) -> Deferred<U> {
        let next = Deferred::new();
        let on_value = next.clone();
        let on_error = next.clone();
        self.subscribe(
            move |value| match f(value) {
                Ok(mapped) => on_value.resolve(mapped),
                Err(error) => on_value.reject(error),
            },
            move |error| on_error.reject(error.clone()),
        );
        next
    }

    /// Runs an infallible side effect on the eventual value.
    pub fn then_do(&self, f: impl FnOnce(&T) + 'static) -> Deferred<()> {
        self.then(move |value| {
            f(value);
            Ok(())
        })
    }

    /// Chains an asynchronous step.
    ///
    /// The returned deferred settles when the deferred produced by `f` does,
    /// with its value or error.
    pub fn then_chain<U: 'static>(
        &self,
        f: impl FnOnce(&T) -> Deferred<U> + 'static,
    ) -> Deferred<U> {
        let next = Deferred::new();
        let on_value = next.clone();
        let on_error = next.clone();
        self.subscribe(
            move |value| f(value).forward_to(on_value),
            move |error| on_error.reject(error.clone()),
        );
        next
    }

    /// Terminal sink for rejections.
    pub fn catch(&self, f: impl FnOnce(&Error) + 'static) {
        self.subscribe(|_| {}, f);
    }

    /// Converts a rejection back into a value.
    ///
    /// An `Err` returned by `f` becomes the new rejection.
    pub fn recover(&self, f: impl FnOnce(&Error) -> Result<T> + 'static) -> Self {
        let next = Self::new();
        let on_value = next.clone();
        let on_error = next.clone();
        self.subscribe(
            move |value| on_value.settle_resolved(Rc::clone(value)),
            move |error| match f(error) {
                Ok(value) => on_error.resolve(value),
                Err(error) => on_error.reject(error),
            },
        );
        next
    }

    /// Recovers from a rejection with another asynchronous step.
    pub fn recover_chain(&self, f: impl FnOnce(&Error) -> Self + 'static) -> Self {
        let next = Self::new();
        let on_value = next.clone();
        let on_error = next.clone();
        self.subscribe(
            move |value| on_value.settle_resolved(Rc::clone(value)),
            move |error| f(error).forward_to(on_error),
        );
        next
    }

    /// Observes the outcome whichever way the deferred settles.
    pub fn when_settled(&self, f: impl FnOnce(std::result::Result<&T, &Error>) + 'static) {
        let f = Rc::new(RefCell::new(Some(f)));
        let on_error = Rc::clone(&f);
        self.subscribe(
            move |value| {
                if let Some(f) = f.borrow_mut().take() {
                    f(Ok(value));
                }
            },
            move |error| {
                if let Some(f) = on_error.borrow_mut().take() {
                    f(Err(error));
                }
            },
        );
    }
}

impl<T: Clone> Deferred<T> {
    /// Returns a copy of the value, if resolved.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        match &self.inner.borrow().slot {
            Slot::Resolved(value) => Some(T::clone(value)),
            _ => None,
        }
    }
}

/// Awaiting a deferred yields a copy of its outcome.
///
/// Meant for the outermost integration layer; the session itself only ever
/// registers continuations.
impl<T: Clone> Future for Deferred<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        let ready = match &inner.slot {
            Slot::Resolved(value) => Some(Ok(T::clone(value))),
            Slot::Rejected(error) => Some(Err(error.clone())),
            Slot::Pending => None,
        };
        if let Some(outcome) = ready {
            return Poll::Ready(outcome);
        }
        if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            inner.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        (Rc::clone(&log), log)
    }

    #[test]
    fn test_continuations_run_in_registration_order_after_settlement() {
        let (log, seen) = recorder();
        let deferred = Deferred::<u32>::new();

        for tag in ["a", "b", "c"] {
            let log = Rc::clone(&log);
            deferred.then_do(move |v| log.borrow_mut().push(format!("{tag}{v}")));
        }
        assert!(seen.borrow().is_empty());

        deferred.resolve(1);
        assert_eq!(*seen.borrow(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn test_late_registration_fires_immediately() {
        let deferred = Deferred::resolved(7u8);
        let hit = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hit);
        deferred.then_do(move |v| counter.set(*v));
        assert_eq!(hit.get(), 7);
    }

    #[test]
    fn test_continuations_fire_exactly_once() {
        let deferred = Deferred::<()>::new();
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        deferred.then_do(move |()| counter.set(counter.get() + 1));
        deferred.resolve(());
        let _ = deferred.then(|()| Ok(()));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    #[should_panic(expected = "already settled")]
    fn test_double_resolve_panics() {
        let deferred = Deferred::new();
        deferred.resolve(1);
        deferred.resolve(2);
    }

    #[test]
    #[should_panic(expected = "already settled")]
    fn test_reject_after_resolve_panics() {
        let deferred = Deferred::new();
        deferred.resolve(1);
        deferred.reject(Error::Cancelled);
    }

    #[test]
    fn test_reject_discards_resolve_continuations() {
        let deferred = Deferred::<u32>::new();
        let resolved = Rc::new(Cell::new(false));
        let flag = Rc::clone(&resolved);
        deferred.then_do(move |_| flag.set(true));

        let caught = Rc::new(Cell::new(false));
        let flag = Rc::clone(&caught);
        deferred.catch(move |e| flag.set(matches!(e, Error::DeviceLost)));

        deferred.reject(Error::DeviceLost);
        assert!(!resolved.get());
        assert!(caught.get());
    }

    #[test]
    fn test_catch_never_fires_on_resolution() {
        let deferred = Deferred::<u32>::new();
        let caught = Rc::new(Cell::new(false));
        let flag = Rc::clone(&caught);
        deferred.catch(move |_| flag.set(true));
        deferred.resolve(3);
        assert!(!caught.get());
    }

    #[test]
    fn test_then_error_rejects_next() {
        let deferred = Deferred::resolved(5u32);
        let next: Deferred<u32> = deferred.then(|_| Err(Error::protocol("bad")));
        assert_eq!(next.state(), DeferredState::Rejected);
        assert!(matches!(next.error(), Some(Error::Protocol { .. })));
    }

    #[test]
    fn test_then_forwards_rejection() {
        let deferred = Deferred::<u32>::new();
        let next = deferred.then(|v| Ok(v + 1)).then(|v| Ok(v * 2));
        deferred.reject(Error::NotConnected);
        assert!(matches!(next.error(), Some(Error::NotConnected)));
    }

    #[test]
    fn test_then_chain_waits_for_inner() {
        let outer = Deferred::<u32>::new();
        let inner = Deferred::<String>::new();
        let inner_handle = inner.clone();

        let chained = outer.then_chain(move |_| inner_handle);
        outer.resolve(1);
        assert!(chained.is_pending());

        inner.resolve("done".into());
        assert_eq!(chained.value().as_deref(), Some("done"));
    }

    #[test]
    fn test_then_chain_forwards_inner_rejection() {
        let outer = Deferred::resolved(1u32);
        let chained: Deferred<u32> =
            outer.then_chain(|_| Deferred::rejected(Error::InvalidResponse {
                reason: "err_busy".into(),
            }));
        assert!(matches!(
            chained.error(),
            Some(Error::InvalidResponse { reason }) if reason == "err_busy"
        ));
    }

    #[test]
    fn test_sequential_steps_compose() {
        let (log, seen) = recorder();
        let steps: Vec<Deferred<()>> = (0..3).map(|_| Deferred::new()).collect();

        let mut chain = Deferred::resolved(());
        for (i, step) in steps.iter().enumerate() {
            let step = step.clone();
            let log = Rc::clone(&log);
            chain = chain.then_chain(move |()| {
                log.borrow_mut().push(format!("write {i}"));
                step
            });
        }

        assert_eq!(*seen.borrow(), vec!["write 0"]);
        steps[0].resolve(());
        steps[1].resolve(());
        assert!(chain.is_pending());
        steps[2].resolve(());
        assert_eq!(chain.state(), DeferredState::Resolved);
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn test_recover_turns_rejection_into_value() {
        let deferred = Deferred::<u32>::rejected(Error::Cancelled);
        let recovered = deferred.recover(|_| Ok(9));
        assert_eq!(recovered.value(), Some(9));

        let untouched = Deferred::resolved(1u32).recover(|_| Ok(9));
        assert_eq!(untouched.value(), Some(1));
    }

    #[test]
    fn test_recover_error_is_forwarded() {
        let recovered =
            Deferred::<u32>::rejected(Error::Cancelled).recover(|_| Err(Error::DeviceLost));
        assert!(matches!(recovered.error(), Some(Error::DeviceLost)));
    }

    #[test]
    fn test_recover_chain() {
        let fallback = Deferred::<u32>::new();
        let handle = fallback.clone();
        let recovered = Deferred::<u32>::rejected(Error::Cancelled).recover_chain(move |_| handle);
        assert!(recovered.is_pending());
        fallback.resolve(4);
        assert_eq!(recovered.value(), Some(4));
    }

    #[test]
    fn test_nested_settlement_completes_before_outer_continues() {
        let (log, seen) = recorder();
        let first = Deferred::<()>::new();
        let second = Deferred::<()>::new();

        {
            let log = Rc::clone(&log);
            second.then_do(move |()| log.borrow_mut().push("second".into()));
        }
        {
            let log = Rc::clone(&log);
            let second = second.clone();
            first.then_do(move |()| {
                log.borrow_mut().push("first-a".into());
                second.resolve(());
            });
        }
        {
            let log = Rc::clone(&log);
            first.then_do(move |()| log.borrow_mut().push("first-b".into()));
        }

        first.resolve(());
        assert_eq!(*seen.borrow(), vec!["first-a", "second", "first-b"]);
    }

    #[test]
    fn test_registering_inside_continuation_on_same_deferred() {
        let deferred = Deferred::<u32>::new();
        let hit = Rc::new(Cell::new(0));
        let handle = deferred.clone();
        let counter = Rc::clone(&hit);
        deferred.then_do(move |_| {
            let counter = Rc::clone(&counter);
            handle.then_do(move |v| counter.set(*v));
        });
        deferred.resolve(11);
        assert_eq!(hit.get(), 11);
    }

    #[test]
    fn test_when_settled_sees_either_outcome() {
        let outcome = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&outcome);
        let deferred = Deferred::<u32>::new();
        deferred.when_settled(move |r| *slot.borrow_mut() = Some(r.map(|v| *v).is_ok()));
        deferred.reject(Error::DeviceLost);
        assert_eq!(*outcome.borrow(), Some(false));
    }

    #[tokio::test]
    async fn test_await_deferred() {
        let deferred = Deferred::<String>::new();
        let handle = deferred.clone();
        let local = tokio::task::LocalSet::new();
        let value = local
            .run_until(async move {
                tokio::task::spawn_local(async move {
                    tokio::task::yield_now().await;
                    handle.resolve("token".into());
                });
                deferred.await
            })
            .await;
        assert_eq!(value.unwrap(), "token");
    }
}
