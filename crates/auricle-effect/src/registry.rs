//! Effect registry: validated libraries and name resolution.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::library::{
    EFFECT_ABI_VERSION, EffectBinding, EffectDescriptor, EffectLibrary, LibraryRegistration,
};
use crate::{EffectError, abi::EffectHandle};

/// Owns the loaded effect libraries and resolves effect names.
///
/// Built once at boot from the policy server's library and effect lists.
/// Libraries failing validation are dropped along with every effect bound
/// to them; the survivors are what chain recipes can reference. Libraries
/// are never unloaded while the process runs.
pub struct EffectRegistry {
    libraries: HashMap<String, Arc<dyn EffectLibrary>>,
    effect_to_library: HashMap<String, String>,
}

impl EffectRegistry {
    /// Validate and index the given libraries and effect bindings.
    pub fn load(registrations: &[LibraryRegistration], bindings: &[EffectBinding]) -> Self {
        let mut libraries: HashMap<String, Arc<dyn EffectLibrary>> = HashMap::new();
        for reg in registrations {
            let desc = reg.library.descriptor();
            if desc.name != reg.name {
                warn!(
                    registered = %reg.name,
                    descriptor = %desc.name,
                    "library descriptor name mismatch, dropping library"
                );
                continue;
            }
            if desc.api_version != EFFECT_ABI_VERSION {
                warn!(
                    library = %reg.name,
                    version = format_args!("{:#x}", desc.api_version),
                    "library built against unsupported ABI version, dropping"
                );
                continue;
            }
            libraries.insert(reg.name.clone(), Arc::clone(&reg.library));
        }

        let mut effect_to_library = HashMap::new();
        for binding in bindings {
            if libraries.contains_key(&binding.library_name) {
                effect_to_library
                    .insert(binding.effect_name.clone(), binding.library_name.clone());
            } else {
                warn!(
                    effect = %binding.effect_name,
                    library = %binding.library_name,
                    "effect depends on a dropped library, dropping effect"
                );
            }
        }

        info!(
            libraries = libraries.len(),
            effects = effect_to_library.len(),
            "effect registry loaded"
        );
        EffectRegistry {
            libraries,
            effect_to_library,
        }
    }

    /// Effect names that survived validation.
    pub fn surviving_effects(&self) -> Vec<&str> {
        self.effect_to_library.keys().map(String::as_str).collect()
    }

    /// True if an effect with this name is available.
    pub fn has_effect(&self, effect_name: &str) -> bool {
        self.effect_to_library.contains_key(effect_name)
    }

    /// Name of the library backing `effect_name`.
    pub fn library_name_of(&self, effect_name: &str) -> Option<&str> {
        self.effect_to_library.get(effect_name).map(String::as_str)
    }

    /// Create an effect instance, returning the handle and the library
    /// that produced it. Callers treat failure as "skip this effect".
    pub fn create_effect(
        &self,
        effect_name: &str,
    ) -> Result<(Box<dyn EffectHandle>, Arc<dyn EffectLibrary>), EffectError> {
        let library_name = self
            .effect_to_library
            .get(effect_name)
            .ok_or_else(|| EffectError::UnknownEffect(effect_name.to_string()))?;
        let library = self
            .libraries
            .get(library_name)
            .ok_or_else(|| EffectError::UnknownLibrary(library_name.clone()))?;
        let descriptor = EffectDescriptor {
            library_name: library_name.clone(),
            effect_name: effect_name.to_string(),
        };
        let handle = library.create_effect(&descriptor)?;
        Ok((handle, Arc::clone(library)))
    }

    /// Number of registered libraries.
    pub fn library_count(&self) -> usize {
        self.libraries.len()
    }
}

impl std::fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRegistry")
            .field("libraries", &self.libraries.keys().collect::<Vec<_>>())
            .field("effects", &self.effect_to_library)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{AudioBuffer, AudioBufferMut, CommandReply, EffectCommand};
    use crate::library::LibraryDescriptor;

    struct NullHandle;

    impl EffectHandle for NullHandle {
        fn command(&mut self, _: EffectCommand<'_>) -> Result<CommandReply, EffectError> {
            Ok(CommandReply::default())
        }
        fn process(
            &mut self,
            _: AudioBuffer<'_>,
            _: AudioBufferMut<'_>,
        ) -> Result<(), EffectError> {
            Ok(())
        }
    }

    struct TestLibrary {
        desc: LibraryDescriptor,
        fail_create: bool,
    }

    impl TestLibrary {
        fn named(name: &str) -> Arc<dyn EffectLibrary> {
            Arc::new(TestLibrary {
                desc: LibraryDescriptor {
                    name: name.to_string(),
                    implementor: "test".to_string(),
                    api_version: EFFECT_ABI_VERSION,
                },
                fail_create: false,
            })
        }

        fn stale(name: &str) -> Arc<dyn EffectLibrary> {
            Arc::new(TestLibrary {
                desc: LibraryDescriptor {
                    name: name.to_string(),
                    implementor: "test".to_string(),
                    api_version: 0xDEAD,
                },
                fail_create: false,
            })
        }
    }

    impl EffectLibrary for TestLibrary {
        fn descriptor(&self) -> &LibraryDescriptor {
            &self.desc
        }
        fn create_effect(
            &self,
            descriptor: &EffectDescriptor,
        ) -> Result<Box<dyn EffectHandle>, EffectError> {
            if self.fail_create {
                return Err(EffectError::Creation {
                    effect: descriptor.effect_name.clone(),
                    library: descriptor.library_name.clone(),
                    reason: "forced failure".to_string(),
                });
            }
            Ok(Box::new(NullHandle))
        }
    }

    fn binding(effect: &str, library: &str) -> EffectBinding {
        EffectBinding {
            effect_name: effect.to_string(),
            library_name: library.to_string(),
        }
    }

    #[test]
    fn valid_library_and_effect_survive() {
        let regs = vec![LibraryRegistration {
            name: "libtest".to_string(),
            library: TestLibrary::named("libtest"),
        }];
        let registry = EffectRegistry::load(&regs, &[binding("eq", "libtest")]);
        assert!(registry.has_effect("eq"));
        assert_eq!(registry.library_name_of("eq"), Some("libtest"));
        assert!(registry.create_effect("eq").is_ok());
    }

    #[test]
    fn bad_abi_version_drops_library_and_effects() {
        let regs = vec![LibraryRegistration {
            name: "libstale".to_string(),
            library: TestLibrary::stale("libstale"),
        }];
        let registry = EffectRegistry::load(&regs, &[binding("eq", "libstale")]);
        assert_eq!(registry.library_count(), 0);
        assert!(!registry.has_effect("eq"));
        assert!(matches!(
            registry.create_effect("eq"),
            Err(EffectError::UnknownEffect(_))
        ));
    }

    #[test]
    fn descriptor_name_mismatch_drops_library() {
        let regs = vec![LibraryRegistration {
            name: "libalias".to_string(),
            library: TestLibrary::named("libother"),
        }];
        let registry = EffectRegistry::load(&regs, &[binding("eq", "libalias")]);
        assert_eq!(registry.library_count(), 0);
        assert!(registry.surviving_effects().is_empty());
    }

    #[test]
    fn effect_bound_to_unknown_library_dropped() {
        let regs = vec![LibraryRegistration {
            name: "libtest".to_string(),
            library: TestLibrary::named("libtest"),
        }];
        let registry = EffectRegistry::load(
            &regs,
            &[binding("eq", "libtest"), binding("verb", "libmissing")],
        );
        assert!(registry.has_effect("eq"));
        assert!(!registry.has_effect("verb"));
    }
}
