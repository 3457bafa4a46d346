//! Provider capability probing and caching.
//!
//! Finding out what a provider script can do means loading and evaluating
//! it, which is far too expensive to repeat on every request. The cache
//! keys each probe result by the modified times of the script and all its
//! included files; as long as none of them changed, lookups are pure map
//! reads with no interpreter work.

mod cache;

pub use cache::{CapabilityCache, Features};

use std::collections::BTreeSet;

use crate::domain::{ProviderData, ProviderFeature};
use crate::script::{ScriptError, ScriptSandbox};

/// Probes a provider script for its feature set.
///
/// The seam that lets cache tests run without an interpreter; the engine
/// wires in the real [`ScriptSandbox`].
pub trait FeatureProbe: Send + Sync {
    /// Load and evaluate the provider's script, returning the features it
    /// declares or implies.
    fn probe(&self, provider: &ProviderData) -> Result<BTreeSet<ProviderFeature>, ScriptError>;
}

impl FeatureProbe for ScriptSandbox {
    fn probe(&self, provider: &ProviderData) -> Result<BTreeSet<ProviderFeature>, ScriptError> {
        self.probe_features(provider)
    }
}
