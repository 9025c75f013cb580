//! Effect library registration types.

use std::sync::Arc;

use crate::EffectError;
use crate::abi::EffectHandle;

/// ABI version the registry accepts.
///
/// Registered libraries must report exactly this version; anything else is
/// treated like a shared object missing its entry symbols and dropped at
/// load time.
pub const EFFECT_ABI_VERSION: u32 = 0x0001_0000;

/// Descriptor block a library exposes about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryDescriptor {
    /// Library name; must match the name it is registered under.
    pub name: String,
    /// Implementor string, informational.
    pub implementor: String,
    /// ABI version the library was built against.
    pub api_version: u32,
}

/// Identifies one effect to its library at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectDescriptor {
    /// Library providing the effect.
    pub library_name: String,
    /// Effect name within the library.
    pub effect_name: String,
}

/// A provider of effect handles.
///
/// The Rust rendering of the loadable effect shared object: registered
/// once at boot, never unloaded while the process runs. `create_effect`
/// and `release_effect` are the mandatory entry points; a handle created
/// here must eventually come back through `release_effect` of the same
/// library.
pub trait EffectLibrary: Send + Sync {
    /// The library's descriptor block.
    fn descriptor(&self) -> &LibraryDescriptor;

    /// Create an effect instance. Failure means the caller skips this
    /// effect; it is never fatal to the chain being built.
    fn create_effect(
        &self,
        descriptor: &EffectDescriptor,
    ) -> Result<Box<dyn EffectHandle>, EffectError>;

    /// Return a handle to the library. The default implementation drops
    /// it; libraries with instance bookkeeping override this.
    fn release_effect(&self, handle: Box<dyn EffectHandle>) {
        drop(handle);
    }
}

/// One library offered to the registry at boot.
#[derive(Clone)]
pub struct LibraryRegistration {
    /// Name the library is registered under.
    pub name: String,
    /// The provider.
    pub library: Arc<dyn EffectLibrary>,
}

impl std::fmt::Debug for LibraryRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryRegistration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Binds an effect name to the library that provides it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectBinding {
    /// Effect name used in chain recipes.
    pub effect_name: String,
    /// Library expected to provide it.
    pub library_name: String,
}
