use std::collections::HashMap;

use crate::{UserContext, Variant};

/// Receives the variants of every successful fetch.
///
/// The listener is called once per successful fetch with the complete new set of variants, even
/// if none of them differ from the previously cached ones. It runs synchronously on the thread
/// that completed the fetch, which is not necessarily the thread that started it.
///
/// Closures taking `(Option<&UserContext>, &HashMap<String, Variant>)` implement this trait.
pub trait VariantListener: Send + Sync {
    /// Called with the user the variants were fetched for and the fetched variants.
    fn on_variants_changed(&self, user: Option<&UserContext>, variants: &HashMap<String, Variant>);
}

impl<T> VariantListener for T
where
    T: Fn(Option<&UserContext>, &HashMap<String, Variant>) + Send + Sync,
{
    fn on_variants_changed(&self, user: Option<&UserContext>, variants: &HashMap<String, Variant>) {
        self(user, variants);
    }
}
