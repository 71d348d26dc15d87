use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, RwLock, Weak},
    time::{Duration, Instant},
};

use crate::{
    fetcher::{FetchResponse, VariantFetcher},
    scheduler::{PollHandle, Scheduler},
    storage::VariantCache,
    AsyncResult, ContextProvider, Error, ExperimentConfig, Result, SharedResources, Storage,
    UserContext, Variant, VariantListener,
};

/// Library tag sent with every request.
pub const LIBRARY: &str = concat!("skylab-rust/", env!("CARGO_PKG_VERSION"));

/// Successful outcome of a fetch.
///
/// Server-side failures are not errors: the cached variants are left as they are and the fetch
/// completes with [`FetchOutcome::Rejected`] or [`FetchOutcome::Malformed`]. Only transport
/// failures complete the fetch with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The cache was replaced with `flags` variants.
    Updated {
        /// Number of variants received.
        flags: usize,
    },
    /// The user did not change, no request was made.
    Unchanged,
    /// The server answered with a non-2xx `status`.
    Rejected {
        /// HTTP status code.
        status: u16,
    },
    /// The server response could not be parsed.
    Malformed,
}

/// A client that fetches variants for a user and serves them from a local cache.
///
/// Use a [`Registry`](crate::Registry) to create clients. Cloning an `ExperimentClient` produces
/// another handle to the same client.
///
/// # Fetching
///
/// [`ExperimentClient::start`], [`ExperimentClient::set_user`], and
/// [`ExperimentClient::refetch_all`] request all variants for the current user in the background
/// and return an [`AsyncResult`] that completes when the request finishes. A successful response
/// replaces the cached variants as a whole and is passed to the [`VariantListener`], if any.
///
/// Responses of overlapping fetches are applied in completion order: the last response to arrive
/// wins, even if it belongs to an earlier request.
///
/// # Reading variants
///
/// [`ExperimentClient::get_variant`] and [`ExperimentClient::get_variants`] never block on the
/// network. They return whatever is cached at the time of the call.
#[derive(Clone)]
pub struct ExperimentClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ExperimentConfig,
    fetcher: VariantFetcher,
    scheduler: Scheduler,
    cache: VariantCache,
    user: RwLock<Option<UserContext>>,
    listener: RwLock<Option<Arc<dyn VariantListener>>>,
    context_provider: RwLock<Option<Arc<dyn ContextProvider>>>,
    poller: Mutex<Option<PollHandle>>,
}

impl ExperimentClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if `api_key` is blank.
    /// - [`Error::InvalidServerUrl`] if the configured server URL is not a valid base URL.
    pub fn new(
        api_key: impl Into<String>,
        config: ExperimentConfig,
        storage: impl Storage + 'static,
        resources: &SharedResources,
    ) -> Result<ExperimentClient> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Configuration(
                "client initialized with an empty api key".to_owned(),
            ));
        }

        let fetcher = VariantFetcher::new(
            resources.http_client().clone(),
            config.server_url(),
            api_key,
            config.fetch_timeout(),
        )?;

        Ok(ExperimentClient {
            inner: Arc::new(ClientInner {
                fetcher,
                scheduler: resources.scheduler().clone(),
                cache: VariantCache::new(storage),
                user: RwLock::new(None),
                listener: RwLock::new(None),
                context_provider: RwLock::new(None),
                poller: Mutex::new(None),
                config,
            }),
        })
    }

    /// Normalized name of this client instance.
    pub fn instance_name(&self) -> &str {
        self.inner.config.instance_name()
    }

    /// Configuration of this client.
    pub fn config(&self) -> &ExperimentConfig {
        &self.inner.config
    }

    /// Set the user and fetch variants for it.
    ///
    /// Unlike [`ExperimentClient::set_user`], the cache is not cleared: previously cached variants
    /// are served until the fetch completes.
    pub fn start(&self, user: Option<UserContext>) -> AsyncResult<FetchOutcome> {
        *self.inner.user.write().expect("thread holding user lock should not panic") = user;
        self.inner.fetch()
    }

    /// Set the user and block for up to `timeout` waiting for its variants.
    ///
    /// Errors and timeouts are logged. Variant lookups made afterwards return whatever has been
    /// cached so far, which might be fallbacks if the fetch has not completed.
    pub fn start_and_wait(&self, user: Option<UserContext>, timeout: Duration) {
        match self.start(user).get_timeout(timeout) {
            Ok(_) => {}
            Err(Error::Timeout) => {
                log::info!(target: "skylab", instance_name = self.instance_name(); "timeout while initializing client, variants may not be ready");
            }
            Err(err) => {
                log::warn!(target: "skylab", instance_name = self.instance_name(); "error while initializing client: {:?}", err);
            }
        }
    }

    /// Change the user and fetch variants for it.
    ///
    /// If `user` equals the current user, nothing happens and the returned result is already
    /// completed with [`FetchOutcome::Unchanged`]. Otherwise, the cache is cleared before the
    /// fetch starts, so variants of the previous user are never served for the new one.
    pub fn set_user(&self, user: Option<UserContext>) -> AsyncResult<FetchOutcome> {
        {
            let mut current = self
                .inner
                .user
                .write()
                .expect("thread holding user lock should not panic");
            if *current == user {
                return AsyncResult::completed(FetchOutcome::Unchanged);
            }
            *current = user;
        }

        self.inner.cache.clear();
        self.inner.fetch()
    }

    /// The user set with [`ExperimentClient::start`] or [`ExperimentClient::set_user`].
    pub fn get_user(&self) -> Option<UserContext> {
        self.inner.current_user()
    }

    /// The user that is sent to the server: context provider values overlaid with the current
    /// user.
    ///
    /// Values from the [`ContextProvider`] are defaults. Any field set on the current user takes
    /// precedence over the provider's value.
    pub fn get_user_with_context(&self) -> UserContext {
        self.inner.user_with_context(self.inner.current_user().as_ref())
    }

    /// Fetch variants for the current user without clearing the cache.
    pub fn refetch_all(&self) -> AsyncResult<FetchOutcome> {
        self.inner.fetch()
    }

    /// Start fetching variants every [`ExperimentConfig::poll_interval`]. The first poll happens
    /// one interval from now.
    ///
    /// Does nothing if the client is already polling. Failed polls are logged and do not stop
    /// polling.
    ///
    /// # Errors
    ///
    /// - [`Error::Shutdown`] if the registry has been shut down.
    /// - [`Error::Configuration`] if the poll interval is zero.
    /// - [`Error::Io`] if the timer thread failed to start.
    pub fn start_polling(&self) -> Result<()> {
        let mut poller = self.inner.poller();
        if poller.is_some() {
            return Ok(());
        }

        let interval = self.inner.config.poll_interval();
        log::debug!(target: "skylab", instance_name = self.instance_name(); "starting polling every {:?}", interval);

        let client = Arc::downgrade(&self.inner);
        let handle = self
            .inner
            .scheduler
            .schedule_at_fixed_rate(interval, move || poll(&client))?;
        *poller = Some(handle);
        Ok(())
    }

    /// Stop polling. Does nothing if the client is not polling.
    ///
    /// A fetch that is already in flight still completes and updates the cache.
    pub fn stop_polling(&self) {
        if let Some(handle) = self.inner.poller().take() {
            log::debug!(target: "skylab", instance_name = self.instance_name(); "stopping polling");
            handle.cancel();
        }
    }

    /// Returns `true` if the client is polling.
    pub fn is_polling(&self) -> bool {
        self.inner.poller().is_some()
    }

    /// Get the variant for `flag_key`, or the configured fallback variant if there is none.
    pub fn get_variant(&self, flag_key: &str) -> Variant {
        self.get_variant_or(flag_key, self.inner.config.fallback_variant().clone())
    }

    /// Get the variant for `flag_key`, or `fallback` if there is none.
    ///
    /// A cached variant without a value counts as no variant.
    pub fn get_variant_or(&self, flag_key: &str, fallback: Variant) -> Variant {
        let variant = self.inner.cache.get(flag_key);
        if variant.is_empty() {
            log::trace!(target: "skylab", flag_key, fallback:serde; "variant not found, returning fallback");
            return fallback;
        }
        variant
    }

    /// Get a snapshot of all cached variants.
    pub fn get_variants(&self) -> HashMap<String, Variant> {
        self.inner.cache.get_all()
    }

    /// Set the provider of identity and device attributes added to every request.
    pub fn set_context_provider(&self, provider: impl ContextProvider + 'static) {
        *self
            .inner
            .context_provider
            .write()
            .expect("thread holding context provider lock should not panic") =
            Some(Arc::new(provider));
    }

    /// Remove the context provider.
    pub fn clear_context_provider(&self) {
        *self
            .inner
            .context_provider
            .write()
            .expect("thread holding context provider lock should not panic") = None;
    }

    /// Set the listener called after every successful fetch.
    pub fn set_listener(&self, listener: impl VariantListener + 'static) {
        *self
            .inner
            .listener
            .write()
            .expect("thread holding listener lock should not panic") = Some(Arc::new(listener));
    }

    /// Remove the listener.
    pub fn clear_listener(&self) {
        *self
            .inner
            .listener
            .write()
            .expect("thread holding listener lock should not panic") = None;
    }
}

impl std::fmt::Debug for ExperimentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentClient")
            .field("instance_name", &self.instance_name())
            .field("polling", &self.is_polling())
            .finish_non_exhaustive()
    }
}

fn poll(client: &Weak<ClientInner>) {
    // The client may be gone while the timer is still winding down.
    if let Some(client) = client.upgrade() {
        log::debug!(target: "skylab", instance_name = client.config.instance_name(); "polling variants");
        client.fetch();
    }
}

impl ClientInner {
    fn current_user(&self) -> Option<UserContext> {
        self.user
            .read()
            .expect("thread holding user lock should not panic")
            .clone()
    }

    fn poller(&self) -> std::sync::MutexGuard<'_, Option<PollHandle>> {
        self.poller
            .lock()
            .expect("thread holding poller lock should not panic")
    }

    fn user_with_context(&self, user: Option<&UserContext>) -> UserContext {
        let provider = self
            .context_provider
            .read()
            .expect("thread holding context provider lock should not panic")
            .clone();

        let mut builder = UserContext::builder();
        if let Some(provider) = provider {
            let context = provider.snapshot();
            macro_rules! from_context {
                ($($field:ident => $setter:ident),* $(,)?) => {
                    $(
                        if let Some(value) = context.$field.filter(|value| !value.is_empty()) {
                            builder = builder.$setter(value);
                        }
                    )*
                };
            }
            from_context!(
                device_id => device_id,
                user_id => user_id,
                platform => platform,
                version => version,
                language => language,
                os => os,
                brand => device_brand,
                manufacturer => device_manufacturer,
                model => device_model,
                carrier => carrier,
            );
        }
        builder = builder.library(LIBRARY);
        if let Some(user) = user {
            builder = builder.copy_user(user);
        }
        builder.build()
    }

    /// Fetch variants on a scheduler thread.
    fn fetch(self: &Arc<Self>) -> AsyncResult<FetchOutcome> {
        let result = AsyncResult::new();

        let client = Arc::clone(self);
        let completer = result.clone();
        let submitted = self.scheduler.submit(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| client.fetch_blocking()))
                .unwrap_or(Err(Error::WorkerPanicked));
            match outcome {
                Ok(outcome) => completer.complete(outcome),
                Err(err) => {
                    log::error!(target: "skylab", instance_name = client.config.instance_name(); "error while fetching variants: {:?}", err);
                    completer.complete_with_error(err)
                }
            };
        });

        if let Err(err) = submitted {
            log::warn!(target: "skylab", instance_name = self.config.instance_name(); "could not start fetching variants: {:?}", err);
            result.complete_with_error(err);
        }
        result
    }

    fn fetch_blocking(&self) -> Result<FetchOutcome> {
        let start = Instant::now();

        let user = self.current_user();
        let user_with_context = self.user_with_context(user.as_ref());
        if user_with_context.is_anonymous() {
            log::warn!(target: "skylab", instance_name = self.config.instance_name(); "user id and device id are not set, server will not be able to resolve identity");
        }

        let outcome = match self.fetcher.fetch_variants(&user_with_context)? {
            FetchResponse::Variants(variants) => {
                self.cache.replace_all(&variants);
                self.notify(user.as_ref(), &variants);
                FetchOutcome::Updated {
                    flags: variants.len(),
                }
            }
            FetchResponse::Rejected(status) => FetchOutcome::Rejected {
                status: status.as_u16(),
            },
            FetchResponse::Malformed => FetchOutcome::Malformed,
        };

        log::debug!(target: "skylab",
                    instance_name = self.config.instance_name(),
                    user:serde = user_with_context;
                    "fetched variants in {:?}: {:?}", start.elapsed(), outcome);
        Ok(outcome)
    }

    fn notify(&self, user: Option<&UserContext>, variants: &HashMap<String, Variant>) {
        let listener = self
            .listener
            .read()
            .expect("thread holding listener lock should not panic")
            .clone();
        if let Some(listener) = listener {
            listener.on_variants_changed(user, variants);
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Ok(poller) = self.poller.get_mut() {
            if let Some(handle) = poller.take() {
                handle.cancel();
            }
        }
    }
}
