//! Writer-Module and Payload-Reader Registries
//!
//! One registry value holds both mappings the demultiplexer needs:
//!
//! - module id (`"f142"`) to a factory producing fresh writer-module
//!   instances, used when a job binds its stream placeholders
//! - schema tag (`*b"f142"`) to the payload reader that extracts
//!   `(source_name, timestamp_ns)` for routing
//!
//! The registry is built once at startup, handed to the master by value,
//! and shared read-only with every job from then on. Duplicate
//! registrations fail loudly instead of silently replacing a module.

use std::collections::HashMap;
use std::sync::Arc;

use nexwrite_core::SchemaTag;

use crate::contract::{ModuleError, PayloadReader, Result, WriterModule};
use crate::ev42::{EventReader, EventWriter};
use crate::f142::{LogReader, LogWriter};

type ModuleFactory = Arc<dyn Fn() -> Box<dyn WriterModule> + Send + Sync>;

/// Registry of writer modules and payload readers.
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
    readers: HashMap<SchemaTag, Arc<dyn PayloadReader>>,
}

impl ModuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every module this build ships.
    pub fn with_default_modules() -> Self {
        let mut registry = Self::new();
        registry
            .register_module("f142", Arc::new(|| Box::new(LogWriter::new())))
            .expect("empty registry cannot hold duplicates");
        registry
            .register_module("ev42", Arc::new(|| Box::new(EventWriter::new())))
            .expect("empty registry cannot hold duplicates");
        registry
            .register_reader(nexwrite_core::wire::F142, Arc::new(LogReader))
            .expect("empty registry cannot hold duplicates");
        registry
            .register_reader(nexwrite_core::wire::EV42, Arc::new(EventReader))
            .expect("empty registry cannot hold duplicates");
        registry
    }

    /// Register a writer-module factory under its module id.
    pub fn register_module(&mut self, id: &str, factory: ModuleFactory) -> Result<()> {
        if self.factories.contains_key(id) {
            return Err(ModuleError::AlreadyRegistered(id.to_string()));
        }
        self.factories.insert(id.to_string(), factory);
        Ok(())
    }

    /// Register a payload reader under its schema tag.
    pub fn register_reader(
        &mut self,
        tag: SchemaTag,
        reader: Arc<dyn PayloadReader>,
    ) -> Result<()> {
        if self.readers.contains_key(&tag) {
            return Err(ModuleError::AlreadyRegistered(
                String::from_utf8_lossy(&tag).into_owned(),
            ));
        }
        self.readers.insert(tag, reader);
        Ok(())
    }

    /// Instantiate a fresh writer module.
    pub fn create_module(&self, id: &str) -> Result<Box<dyn WriterModule>> {
        self.factories
            .get(id)
            .map(|factory| factory())
            .ok_or_else(|| ModuleError::UnknownModule(id.to_string()))
    }

    /// The payload reader for a schema tag, if one is registered.
    pub fn reader(&self, tag: SchemaTag) -> Option<Arc<dyn PayloadReader>> {
        self.readers.get(&tag).cloned()
    }

    /// Registered module ids, sorted (used by `--list-modules`).
    pub fn module_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_contents() {
        let registry = ModuleRegistry::with_default_modules();
        assert_eq!(registry.module_ids(), vec!["ev42", "f142"]);
        assert!(registry.reader(nexwrite_core::wire::F142).is_some());
        assert!(registry.reader(nexwrite_core::wire::EV42).is_some());
        assert!(registry.reader(*b"xxxx").is_none());
    }

    #[test]
    fn test_create_module() {
        let registry = ModuleRegistry::with_default_modules();
        let module = registry.create_module("f142").unwrap();
        assert!(!module.accepts_repeated_timestamps());
        let module = registry.create_module("ev42").unwrap();
        assert!(module.accepts_repeated_timestamps());
    }

    #[test]
    fn test_unknown_module() {
        let registry = ModuleRegistry::with_default_modules();
        assert!(matches!(
            registry.create_module("tdct").unwrap_err(),
            ModuleError::UnknownModule(_)
        ));
    }

    #[test]
    fn test_duplicate_module_registration_fails() {
        let mut registry = ModuleRegistry::with_default_modules();
        let err = registry
            .register_module("f142", Arc::new(|| Box::new(LogWriter::new())))
            .unwrap_err();
        assert!(matches!(err, ModuleError::AlreadyRegistered(_)));
    }

    #[test]
    fn test_duplicate_reader_registration_fails() {
        let mut registry = ModuleRegistry::with_default_modules();
        let err = registry
            .register_reader(nexwrite_core::wire::F142, Arc::new(LogReader))
            .unwrap_err();
        assert!(matches!(err, ModuleError::AlreadyRegistered(_)));
    }
}
