//! Build-once manifest persistence.
//!
//! The first invocation of an episode builds the manifest (directly from the
//! job parameters, or by listing existing artifacts) and stores it. Later
//! invocations load the stored copy verbatim, even if the underlying
//! artifacts changed in the meantime.

use stepwise_core::{EngineError, ManifestSpec, WorkManifest};
use tracing::{debug, info, warn};

use crate::store::ObjectStore;

pub struct ManifestLoader<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    rebuild_unreadable: bool,
}

impl<'a, S: ObjectStore + ?Sized> ManifestLoader<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            rebuild_unreadable: true,
        }
    }

    /// Whether an undecodable stored manifest may be replaced. Must be off
    /// once an episode has bound its total to the stored copy.
    pub fn rebuild_unreadable(mut self, rebuild: bool) -> Self {
        self.rebuild_unreadable = rebuild;
        self
    }

    /// Load the manifest stored at `key`, or build and store it when none
    /// exists. A failed read never overwrites the stored copy.
    pub fn load_or_build(&self, key: &str, spec: &ManifestSpec) -> Result<WorkManifest, EngineError> {
        if let Some(manifest) = self.load(key)? {
            debug!(key, items = manifest.len(), "reusing stored manifest");
            return Ok(manifest);
        }

        let manifest = self.build(spec)?;
        let body = serde_json::to_vec(&manifest)
            .map_err(|e| EngineError::manifest(format!("encode manifest: {e}")))?;
        self.store
            .put(key, &body)
            .map_err(|e| EngineError::manifest(format!("store manifest at {key}: {e}")))?;

        info!(key, items = manifest.len(), "manifest built and stored");
        Ok(manifest)
    }

    fn load(&self, key: &str) -> Result<Option<WorkManifest>, EngineError> {
        let body = match self.store.get(key) {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(None),
            Err(e) => {
                return Err(EngineError::manifest(format!("read manifest at {key}: {e}")));
            }
        };
        match serde_json::from_slice(&body) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) if self.rebuild_unreadable => {
                warn!(key, error = %e, "stored manifest is unreadable; rebuilding");
                Ok(None)
            }
            Err(e) => Err(EngineError::manifest(format!("decode manifest at {key}: {e}"))),
        }
    }

    fn build(&self, spec: &ManifestSpec) -> Result<WorkManifest, EngineError> {
        match spec {
            ManifestSpec::FrameListing {
                prefix,
                framerate,
                numerator,
                denominator,
            } => {
                let keys = self
                    .store
                    .list(prefix)
                    .map_err(|e| EngineError::manifest(format!("list {prefix}: {e}")))?;
                WorkManifest::from_frame_listing(
                    keys.iter().map(String::as_str),
                    *framerate,
                    *numerator,
                    *denominator,
                )
            }
            other => WorkManifest::build(other),
        }
    }
}
