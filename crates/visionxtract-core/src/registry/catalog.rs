use std::collections::BTreeMap;

use crate::capabilities::{document_extraction, face_extraction, llm_judge, ocr};
use crate::models::{CoreResult, ModuleManifest};
use crate::registry::{ModuleEntrypoint, ModuleServices};

pub type ModuleFactory = fn(&ModuleServices, &ModuleManifest) -> CoreResult<ModuleEntrypoint>;

const BUILTIN_MODULES: &[(&str, ModuleFactory)] = &[
    (document_extraction::MODULE_NAME, document_extraction::entrypoint),
    (face_extraction::MODULE_NAME, face_extraction::entrypoint),
    (llm_judge::MODULE_NAME, llm_judge::entrypoint),
    (ocr::MODULE_NAME, ocr::entrypoint),
];

/// Static registration table mapping module unit names to entrypoint factories.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: BTreeMap<String, ModuleFactory>,
}

impl ModuleCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        BUILTIN_MODULES
            .iter()
            .fold(Self::empty(), |catalog, (name, factory)| {
                catalog.register(name, *factory)
            })
    }

    pub fn register(mut self, name: &str, factory: ModuleFactory) -> Self {
        self.factories.insert(name.to_string(), factory);
        self
    }

    pub fn factory(&self, name: &str) -> Option<ModuleFactory> {
        self.factories.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
