//! A client for Skylab, a feature flagging and experimentation service.
//!
//! # Overview
//!
//! The SDK revolves around an [`ExperimentClient`] that fetches the [`Variant`]s assigned to a
//! user, described by a [`UserContext`], and serves them from a local cache. Variant lookups never
//! block on the network: they return whatever is cached, or a fallback variant.
//!
//! Clients are created through a [`Registry`], which keeps one client per instance name and shares
//! an HTTP connection pool and a [`Scheduler`] between them.
//!
//! ```no_run
//! # fn main() -> skylab::Result<()> {
//! use std::time::Duration;
//! use skylab::{ExperimentConfig, Registry, UserContext, Variant};
//!
//! let registry = Registry::new()?;
//! let client = registry.init(
//!     "api-key",
//!     ExperimentConfig::new().with_fallback_variant(Variant::new("control")),
//! )?;
//!
//! let user = UserContext::builder().user_id("user-1").build();
//! client.start_and_wait(Some(user), Duration::from_secs(5));
//!
//! if client.get_variant("new-checkout").value() == Some("on") {
//!     // ...
//! }
//! # Ok(())
//! # }
//! ```
//!
//! A [`VariantListener`] can be set to be notified of every successful fetch. A
//! [`ContextProvider`] can be set to add device and platform attributes to every request.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Fetches report failures through the returned [`AsyncResult`]. In production, it is recommended
//! to ignore them, as the cached or fallback variants remain available. However, the returned
//! errors are valuable for debugging and usually indicate that developer's attention is needed.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages under the `skylab` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into SDK operations.
//!
//! # Examples
//!
//! Examples can be found in the `demos` directory of the `skylab` crate repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod async_result;
mod client;
mod config;
mod context_provider;
mod durable_storage;
mod error;
mod fetcher;
mod listener;
mod registry;
mod scheduler;
mod storage;
mod user;
mod variant;

pub use async_result::AsyncResult;
pub use client::{ExperimentClient, FetchOutcome, LIBRARY};
pub use config::ExperimentConfig;
pub use context_provider::{ContextProvider, ContextSnapshot, DeferredContextProvider};
pub use durable_storage::{
    storage_namespace, DurableStorage, FileBackend, PersistenceBackend, STORAGE_NAMESPACE_PREFIX,
};
pub use error::{Error, Result};
pub use listener::VariantListener;
pub use registry::{Registry, SharedResources};
pub use scheduler::{PollHandle, Scheduler};
pub use storage::{InMemoryStorage, Storage, VariantCache};
pub use user::{UserContext, UserContextBuilder, UserProperties};
pub use variant::Variant;
