//! Generic "detect the right backend, remember the answer" machinery.
//!
//! Every capability surface in this crate (init system, package manager,
//! privilege-elevation strategy, OS release) is resolved by trying a list
//! of factories in order and keeping whichever one first accepts the host.
//! [`Provider`] is that loop, generalized from the one-off
//! `OnceCell`-memoized static the teacher uses for its own control
//! directory lookup into something reusable across every backend family.
//! [`LazyService`] adds memoization (including memoizing *failure*, so a
//! host with no package manager doesn't get re-probed on every call), and
//! [`Null`] lets an infallible accessor still carry the detection error
//! through to whichever operation is actually attempted.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{declassify, null_context, Error, Result};

/// One factory's probe function: given the probe input, return `Some`
/// backend if this factory recognizes the host, or `None` to let the next
/// factory in the list try.
pub type Factory<I, O> =
    Arc<dyn Fn(I) -> Pin<Box<dyn Future<Output = Result<Option<O>>> + Send>> + Send + Sync>;

/// Tries each registered factory in order and returns the first that
/// accepts. First-accepting-factory-wins, as opposed to e.g. priority
/// scoring — matches how the spec's detection tables read top to bottom.
pub struct Provider<I, O> {
    factories: Vec<Factory<I, O>>,
    not_found: Error,
}

impl<I, O> fmt::Debug for Provider<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("factories", &self.factories.len())
            .finish()
    }
}

impl<I: Clone, O> Provider<I, O> {
    pub fn new(not_found: Error) -> Self {
        Provider {
            factories: Vec::new(),
            not_found,
        }
    }

    /// Register a factory. Order matters: earlier registrations are tried
    /// first.
    pub fn register(&mut self, factory: Factory<I, O>) -> &mut Self {
        self.factories.push(factory);
        self
    }

    /// Run the registered factories in order against `input`, returning
    /// the first accepted backend or `self.not_found`'s clone-equivalent
    /// if none accept.
    pub async fn resolve(&self, input: I) -> Result<O> {
        for factory in &self.factories {
            if let Some(backend) = factory(input.clone()).await? {
                return Ok(backend);
            }
        }
        Err(declassify(&self.not_found))
    }
}

/// Lazily resolves and memoizes one `Arc<dyn T>` (or the error that proved
/// no backend was available), shared by a fallible and an infallible
/// accessor on [`crate::client::Client`] so both observe the same
/// detection outcome for the client's lifetime.
pub struct LazyService<T: ?Sized> {
    cell: OnceCell<std::result::Result<Arc<T>, Arc<Error>>>,
    lock: AsyncMutex<()>,
}

impl<T: ?Sized> fmt::Debug for LazyService<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyService")
            .field("resolved", &self.cell.get().is_some())
            .finish()
    }
}

impl<T: ?Sized> Default for LazyService<T> {
    fn default() -> Self {
        LazyService {
            cell: OnceCell::new(),
            lock: AsyncMutex::new(()),
        }
    }
}

impl<T: ?Sized> LazyService<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve via `init` on first call; every later call (successful or
    /// not) returns the memoized result.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>>>,
    {
        if let Some(result) = self.cell.get() {
            return result.as_ref().map(Arc::clone).map_err(|e| declassify(e));
        }

        let _guard = self.lock.lock().await;
        if let Some(result) = self.cell.get() {
            return result.as_ref().map(Arc::clone).map_err(|e| declassify(e));
        }

        match init().await {
            Ok(value) => {
                let _ = self.cell.set(Ok(value.clone()));
                Ok(value)
            }
            Err(e) => {
                let shared = Arc::new(e);
                let declassified = declassify(&shared);
                let _ = self.cell.set(Err(shared));
                Err(declassified)
            }
        }
    }

    /// Infallible accessor: same memoized resolution as
    /// `get_or_try_init`, but wraps a failed resolution in [`Null`]
    /// instead of surfacing the error immediately.
    pub async fn get_or_null<F, Fut>(&self, op: &'static str, init: F) -> Null<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>>>,
    {
        match self.get_or_try_init(init).await {
            Ok(value) => Null::Present(value),
            Err(e) => Null::Absent(op, e),
        }
    }
}

/// A placeholder returned by an infallible accessor (e.g.
/// `Client::package_manager()`) when detection failed. Calling any
/// operation through it returns the *original* detection error, annotated
/// with which operation was attempted, instead of panicking or silently
/// no-opping.
pub enum Null<T: ?Sized> {
    Present(Arc<T>),
    Absent(&'static str, Error),
}

impl<T: ?Sized> fmt::Debug for Null<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Null::Present(_) => write!(f, "Null::Present"),
            Null::Absent(op, e) => write!(f, "Null::Absent({op:?}, {e})"),
        }
    }
}

impl<T: ?Sized> Null<T> {
    /// Borrow the backend, or produce the classified detection error
    /// annotated with `op` if none was found.
    pub fn get(&self) -> Result<&Arc<T>> {
        match self {
            Null::Present(t) => Ok(t),
            Null::Absent(op, e) => Err(null_context(op, e)),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Null::Present(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Dummy(&'static str);

    #[tokio::test]
    async fn provider_returns_first_accepting_factory() {
        let mut provider: Provider<(), Arc<Dummy>> = Provider::new(Error::NoPackageManager);
        provider.register(Arc::new(|_: ()| {
            Box::pin(async { Ok(None) }) as Pin<Box<dyn Future<Output = Result<Option<Arc<Dummy>>>> + Send>>
        }));
        provider.register(Arc::new(|_: ()| {
            Box::pin(async { Ok(Some(Arc::new(Dummy("second")))) })
                as Pin<Box<dyn Future<Output = Result<Option<Arc<Dummy>>>> + Send>>
        }));
        let resolved = provider.resolve(()).await.unwrap();
        assert_eq!(resolved.0, "second");
    }

    #[tokio::test]
    async fn provider_returns_not_found_when_nothing_accepts() {
        let mut provider: Provider<(), Arc<Dummy>> = Provider::new(Error::NoPackageManager);
        provider.register(Arc::new(|_: ()| {
            Box::pin(async { Ok(None) }) as Pin<Box<dyn Future<Output = Result<Option<Arc<Dummy>>>> + Send>>
        }));
        let err = provider.resolve(()).await.unwrap_err();
        assert!(matches!(err, Error::NoPackageManager));
    }

    #[tokio::test]
    async fn lazy_service_memoizes_success() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let svc: LazyService<Dummy> = LazyService::new();
        for _ in 0..3 {
            let calls = calls.clone();
            svc.get_or_try_init(|| async move {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(Arc::new(Dummy("x")))
            })
            .await
            .unwrap();
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn null_shares_the_same_error_as_try_accessor() {
        let svc: LazyService<Dummy> = LazyService::new();
        let null = svc
            .get_or_null("Sudo", || async { Err(Error::NoSudo) })
            .await;
        let err = null.get().unwrap_err();
        assert!(matches!(err, Error::NoSudo));

        let try_err = svc
            .get_or_try_init(|| async { Err(Error::NoSudo) })
            .await
            .unwrap_err();
        assert!(matches!(try_err, Error::ValidationFailed(_)));
    }
}
