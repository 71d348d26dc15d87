use std::{sync::Arc, time::Duration};

use crate::{AsyncResult, Error};

/// Source of identity and device attributes that are added to every fetch request.
///
/// Each getter is queried at fetch time and may return `None` independently. Values returned here
/// are defaults: fields set explicitly on the client's user take precedence.
///
/// All methods return `None` by default, so implementors only override what they know.
pub trait ContextProvider: Send + Sync {
    /// User id.
    fn user_id(&self) -> Option<String> {
        None
    }
    /// Device id.
    fn device_id(&self) -> Option<String> {
        None
    }
    /// Platform name.
    fn platform(&self) -> Option<String> {
        None
    }
    /// Application version.
    fn version(&self) -> Option<String> {
        None
    }
    /// Language.
    fn language(&self) -> Option<String> {
        None
    }
    /// Operating system.
    fn os(&self) -> Option<String> {
        None
    }
    /// Device brand.
    fn brand(&self) -> Option<String> {
        None
    }
    /// Device manufacturer.
    fn manufacturer(&self) -> Option<String> {
        None
    }
    /// Device model.
    fn model(&self) -> Option<String> {
        None
    }
    /// Network carrier.
    fn carrier(&self) -> Option<String> {
        None
    }

    /// Query every getter once. The client calls this once per request.
    ///
    /// Override it when the getters share an expensive step, so that step runs once per request
    /// instead of once per getter.
    fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            user_id: self.user_id(),
            device_id: self.device_id(),
            platform: self.platform(),
            version: self.version(),
            language: self.language(),
            os: self.os(),
            brand: self.brand(),
            manufacturer: self.manufacturer(),
            model: self.model(),
            carrier: self.carrier(),
        }
    }
}

/// Values of all [`ContextProvider`] getters, taken at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct ContextSnapshot {
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    pub platform: Option<String>,
    pub version: Option<String>,
    pub language: Option<String>,
    pub os: Option<String>,
    pub brand: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub carrier: Option<String>,
}

impl<P: ContextProvider + ?Sized> ContextProvider for Arc<P> {
    fn user_id(&self) -> Option<String> {
        (**self).user_id()
    }
    fn device_id(&self) -> Option<String> {
        (**self).device_id()
    }
    fn platform(&self) -> Option<String> {
        (**self).platform()
    }
    fn version(&self) -> Option<String> {
        (**self).version()
    }
    fn language(&self) -> Option<String> {
        (**self).language()
    }
    fn os(&self) -> Option<String> {
        (**self).os()
    }
    fn brand(&self) -> Option<String> {
        (**self).brand()
    }
    fn manufacturer(&self) -> Option<String> {
        (**self).manufacturer()
    }
    fn model(&self) -> Option<String> {
        (**self).model()
    }
    fn carrier(&self) -> Option<String> {
        (**self).carrier()
    }
    fn snapshot(&self) -> ContextSnapshot {
        (**self).snapshot()
    }
}

/// A [`ContextProvider`] for an identity source that becomes available some time after the
/// client is configured (e.g., an analytics SDK that initializes in the background).
///
/// The real provider is published exactly once with [`DeferredContextProvider::publish`]. Until
/// then, getters block on the readiness signal for at most `wait` and return `None` if the
/// provider is still not ready. [`ContextProvider::snapshot`] waits once for all getters, so a
/// request is delayed by at most `wait`.
///
/// ```
/// # use std::time::Duration;
/// # use skylab::{ContextProvider, DeferredContextProvider};
/// struct Analytics;
/// impl ContextProvider for Analytics {
///     fn device_id(&self) -> Option<String> {
///         Some("device-1".to_owned())
///     }
/// }
///
/// let provider = DeferredContextProvider::new(Duration::from_secs(1));
/// provider.publish(Analytics);
/// assert_eq!(provider.device_id().as_deref(), Some("device-1"));
/// ```
#[derive(Clone)]
pub struct DeferredContextProvider {
    ready: AsyncResult<Arc<dyn ContextProvider>>,
    wait: Duration,
}

impl DeferredContextProvider {
    /// Create a provider that waits up to `wait` for the real provider on every query.
    pub fn new(wait: Duration) -> DeferredContextProvider {
        DeferredContextProvider {
            ready: AsyncResult::new(),
            wait,
        }
    }

    /// Publish the real provider, waking up every waiting getter. Returns `false` if a provider
    /// was already published, in which case `provider` is dropped.
    pub fn publish(&self, provider: impl ContextProvider + 'static) -> bool {
        self.ready.complete(Arc::new(provider))
    }

    /// Returns `true` once a provider has been published.
    pub fn is_ready(&self) -> bool {
        self.ready.is_done()
    }

    fn provider(&self) -> Option<Arc<dyn ContextProvider>> {
        match self.ready.get_timeout(self.wait) {
            Ok(provider) => Some(provider),
            Err(Error::Timeout) => {
                log::warn!(target: "skylab", "context provider is not ready after {:?}", self.wait);
                None
            }
            Err(err) => {
                log::warn!(target: "skylab", "context provider failed: {:?}", err);
                None
            }
        }
    }
}

macro_rules! delegate {
    ($($method:ident),* $(,)?) => {
        $(
            fn $method(&self) -> Option<String> {
                self.provider()?.$method()
            }
        )*
    };
}

impl ContextProvider for DeferredContextProvider {
    delegate!(
        user_id,
        device_id,
        platform,
        version,
        language,
        os,
        brand,
        manufacturer,
        model,
        carrier,
    );

    fn snapshot(&self) -> ContextSnapshot {
        self.provider()
            .map(|provider| provider.snapshot())
            .unwrap_or_default()
    }
}
