mod catalog;
mod entrypoint;
mod services;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

pub use catalog::{ModuleCatalog, ModuleFactory};
pub use entrypoint::{CapabilityHandler, ModuleEntrypoint, capability_candidates};
pub use services::{ModuleEnvironment, ModuleServices};

use crate::config::PlatformConfig;
use crate::models::{CoreError, CoreErrorKind, CoreResult, ModuleManifest};
use crate::providers::Providers;

pub const ENABLE_ALL: &str = "all";
pub const MANIFEST_FILE: &str = "config.yaml";

pub type ModuleTable = BTreeMap<String, ModuleDescriptor>;

#[derive(Clone, Debug)]
pub struct ModuleDescriptor {
    pub name: String,
    pub entrypoint: Arc<ModuleEntrypoint>,
    pub address: String,
    pub tags: Vec<String>,
    pub enabled: bool,
    pub description: Option<String>,
    pub version: Option<String>,
}

pub fn kebab_case(name: &str) -> String {
    name.replace('_', "-")
}

/// Address segment a module is served under, e.g. `/api/face-extraction`.
pub fn module_address(name: &str) -> String {
    format!("/api/{}", kebab_case(name))
}

/// Discovers module units under a root directory and memoizes the result.
pub struct ModuleRegistry {
    root: PathBuf,
    catalog: ModuleCatalog,
    services: ModuleServices,
    discovered: RwLock<Option<Arc<ModuleTable>>>,
}

impl ModuleRegistry {
    pub fn new(
        root: impl Into<PathBuf>,
        catalog: ModuleCatalog,
        environment: ModuleEnvironment,
    ) -> Arc<Self> {
        let root = root.into();
        Arc::new_cyclic(|registry| Self {
            root,
            catalog,
            services: ModuleServices::new(environment, registry.clone()),
            discovered: RwLock::new(None),
        })
    }

    /// Built-in catalog rooted at the configured modules directory.
    pub fn from_config(config: PlatformConfig, providers: Providers) -> Arc<Self> {
        let root = config.modules_dir.clone();
        Self::new(
            root,
            ModuleCatalog::builtin(),
            ModuleEnvironment::new(providers, config),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn services(&self) -> &ModuleServices {
        &self.services
    }

    pub fn is_discovered(&self) -> bool {
        self.discovered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Drops the memoized table so the next lookup rescans the root.
    pub fn reset(&self) {
        *self
            .discovered
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Returns the module table, scanning only on the first call. Later calls
    /// return the cached table whatever `enabled` holds.
    pub fn discover<S: AsRef<str>>(&self, enabled: &[S]) -> Arc<ModuleTable> {
        if let Some(table) = self
            .discovered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return table.clone();
        }

        let mut slot = self
            .discovered
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(table) = slot.as_ref() {
            return table.clone();
        }

        if !self.root.is_dir() {
            tracing::warn!(
                root = %self.root.display(),
                "modules directory does not exist; no modules discovered"
            );
            return Arc::new(ModuleTable::new());
        }

        let enabled: Vec<&str> = enabled.iter().map(AsRef::as_ref).collect();
        let table = Arc::new(self.scan(&enabled));
        tracing::info!(
            root = %self.root.display(),
            modules = ?table.keys().collect::<Vec<_>>(),
            "module discovery complete"
        );
        *slot = Some(table.clone());
        table
    }

    /// All enabled modules, discovering with every module enabled if nothing is cached yet.
    pub fn modules(&self) -> Arc<ModuleTable> {
        self.discover(&[ENABLE_ALL])
    }

    pub fn module(&self, name: &str) -> Option<ModuleDescriptor> {
        self.modules().get(name).cloned()
    }

    fn scan(&self, enabled: &[&str]) -> ModuleTable {
        let include_all = enabled.contains(&ENABLE_ALL);
        let mut table = ModuleTable::new();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(
                    root = %self.root.display(),
                    error = %error,
                    "failed to read modules directory"
                );
                return table;
            }
        };

        let mut units: Vec<(String, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                Some((name, entry.path()))
            })
            .filter(|(name, _)| !name.starts_with('_') && !name.starts_with('.'))
            .collect();
        units.sort();

        for (name, path) in units {
            if !include_all && !enabled.contains(&name.as_str()) {
                continue;
            }

            match self.load_unit(&name, &path) {
                Ok(descriptor) => {
                    tracing::debug!(module = %name, address = %descriptor.address, "module registered");
                    table.insert(name, descriptor);
                }
                Err(error) => tracing::warn!(
                    module = %name,
                    kind = ?error.kind,
                    message = %error.message,
                    "skipping module unit"
                ),
            }
        }

        table
    }

    fn load_unit(&self, name: &str, path: &Path) -> CoreResult<ModuleDescriptor> {
        let factory = self.catalog.factory(name).ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::Discovery,
                format!("no entrypoint is registered for module '{name}'"),
            )
            .for_module(name)
        })?;

        let manifest = read_manifest(name, &path.join(MANIFEST_FILE));
        let entrypoint = factory(&self.services, &manifest).map_err(|error| {
            CoreError {
                kind: CoreErrorKind::Discovery,
                ..error
            }
            .for_module(name)
        })?;

        let tag = manifest
            .module
            .name
            .clone()
            .unwrap_or_else(|| kebab_case(name));

        Ok(ModuleDescriptor {
            name: name.to_string(),
            entrypoint: Arc::new(entrypoint),
            address: module_address(name),
            tags: vec![tag],
            enabled: true,
            description: manifest.module.description.clone(),
            version: manifest.module.version.clone(),
        })
    }
}

fn read_manifest(module: &str, path: &Path) -> ModuleManifest {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return ModuleManifest::default(),
    };

    match ModuleManifest::parse(&raw) {
        Ok(manifest) => manifest,
        Err(error) => {
            tracing::warn!(
                module,
                path = %path.display(),
                error = %error,
                "ignoring malformed module manifest"
            );
            ModuleManifest::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{kebab_case, module_address};

    #[test]
    fn address_and_tag_share_one_transform() {
        assert_eq!(kebab_case("face_extraction"), "face-extraction");
        assert_eq!(module_address("face_extraction"), "/api/face-extraction");
        assert_eq!(module_address("ocr"), "/api/ocr");
    }
}
