//! Context registry.
//!
//! The [`Registry`] maps module names to shared [`Context`]s. Readers take a
//! cheap `Arc` of the current table; writers copy the table, change the copy
//! and swap it in, so a [`RegistrySnapshot`] never changes after it is
//! taken.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::context::Context;
use crate::handle::HandleFactory;
use crate::loader::{EmbeddedResources, check_size, module_from_entry, read_module_file};
use crate::module::compute_hash;
use crate::selector::StrategySelector;
use crate::{Module, ParsedModule};
use modhost_common::{
    DeploymentMode, ExecutionIntent, ExecutionMode, ModuleEntry, ModuleOrigin, PayloadSource,
    RuntimeError,
};

/// Name-keyed contexts in insertion order.
#[derive(Debug, Clone, Default)]
struct Entries {
    order: Vec<String>,
    contexts: HashMap<String, Arc<Context>>,
}

impl Entries {
    /// Insert or replace; a replaced name keeps its position.
    fn insert(&mut self, context: Arc<Context>) -> Option<Arc<Context>> {
        let name = context.name().to_string();
        let previous = self.contexts.insert(name.clone(), context);
        if previous.is_none() {
            self.order.push(name);
        }
        previous
    }

    fn remove(&mut self, name: &str) -> Option<Arc<Context>> {
        let removed = self.contexts.remove(name)?;
        self.order.retain(|n| n != name);
        Some(removed)
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<Context>> {
        self.order.iter().filter_map(|name| self.contexts.get(name))
    }
}

/// An immutable view of the registry at one point in time.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    entries: Arc<Entries>,
}

impl RegistrySnapshot {
    /// Contexts in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Context>> {
        self.entries.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Context>> {
        self.entries.contexts.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contexts.contains_key(name)
    }

    pub fn names(&self) -> &[String] {
        &self.entries.order
    }

    pub fn len(&self) -> usize {
        self.entries.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.order.is_empty()
    }
}

/// Outcome of [`Registry::init`].
#[derive(Debug, Default)]
pub struct InitReport {
    /// Modules registered, in declaration order.
    pub loaded: Vec<String>,
    /// Modules skipped because their payload failed to parse.
    pub rejected: Vec<(String, RuntimeError)>,
}

impl InitReport {
    /// Returns `true` if no module was rejected.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Registry of execution contexts.
///
/// Shared across threads behind an `Arc`. Lookups never block on handle
/// builds, which happen inside each [`Context`].
pub struct Registry {
    selector: StrategySelector,
    factory: Arc<HandleFactory>,
    resources: EmbeddedResources,
    entries: RwLock<Arc<Entries>>,
    /// Names whose artifact came from an `artifact = ...` config entry.
    configured_artifacts: Mutex<HashSet<String>>,
}

impl Registry {
    pub fn new(
        deployment: DeploymentMode,
        factory: Arc<HandleFactory>,
        resources: EmbeddedResources,
    ) -> Self {
        let selector = StrategySelector::new(deployment, factory.artifacts().clone());

        Self {
            selector,
            factory,
            resources,
            entries: RwLock::new(Arc::new(Entries::default())),
            configured_artifacts: Mutex::new(HashSet::new()),
        }
    }

    pub fn deployment(&self) -> DeploymentMode {
        self.selector.deployment()
    }

    pub fn factory(&self) -> &Arc<HandleFactory> {
        &self.factory
    }

    pub fn selector(&self) -> &StrategySelector {
        &self.selector
    }

    /// Build contexts for all configured modules and swap them in.
    ///
    /// The new mapping replaces the current one as a whole. Modules whose
    /// payload fails to parse are skipped and listed in the report.
    /// Artifacts named by the entries are selected against a staged copy of
    /// the artifact table and published only once every entry is accepted;
    /// artifacts configured by a previous `init` whose module is gone are
    /// unregistered.
    ///
    /// # Errors
    ///
    /// Any configuration or I/O error aborts initialization and leaves the
    /// current mapping and the artifact table untouched.
    #[instrument(skip(self, modules), fields(count = modules.len(), deployment = %self.deployment()))]
    pub fn init(&self, modules: &[ModuleEntry]) -> Result<InitReport, RuntimeError> {
        let configured: Vec<(String, PathBuf)> = modules
            .iter()
            .filter_map(|entry| Some((entry.name.clone(), entry.artifact.clone()?)))
            .collect();

        let staged = self.factory.artifacts().fork();
        for (name, path) in &configured {
            staged.register_file(name, path);
        }
        let selector = StrategySelector::new(self.deployment(), staged);

        let mut entries = Entries::default();
        let mut report = InitReport::default();

        for entry in modules {
            let module = match module_from_entry(entry, &self.resources) {
                Ok(module) => module,
                Err(e @ RuntimeError::ParseFailed { .. }) => {
                    error!(module = %entry.name, error = %e, "Module rejected");
                    report.rejected.push((entry.name.clone(), e));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let context = self.context_with(&selector, module)?;
            info!(context = %context, "Module registered");
            report.loaded.push(entry.name.clone());
            entries.insert(Arc::new(context));
        }

        self.publish_artifacts(&configured);
        *self.entries.write() = Arc::new(entries);

        info!(
            loaded = report.loaded.len(),
            rejected = report.rejected.len(),
            "Registry initialized"
        );
        self.log_all();

        Ok(report)
    }

    /// Register configured artifacts on the shared table and drop the ones
    /// a previous `init` configured but this one does not.
    fn publish_artifacts(&self, configured: &[(String, PathBuf)]) {
        let artifacts = self.factory.artifacts();
        let mut previous = self.configured_artifacts.lock();

        let current: HashSet<String> = configured.iter().map(|(name, _)| name.clone()).collect();
        for retired in previous.difference(&current) {
            artifacts.unregister(retired);
            debug!(module = %retired, "Configured artifact retired");
        }
        for (name, path) in configured {
            artifacts.register_file(name, path);
        }

        *previous = current;
    }

    /// Select a strategy for `module` and wrap it in a new context.
    ///
    /// # Errors
    ///
    /// See [`StrategySelector::select`].
    pub fn create_context(&self, module: Module) -> Result<Context, RuntimeError> {
        self.context_with(&self.selector, module)
    }

    fn context_with(
        &self,
        selector: &StrategySelector,
        module: Module,
    ) -> Result<Context, RuntimeError> {
        let strategy = selector.select(module.name(), module.origin(), module.intent())?;
        Ok(Context::new(module, strategy, Arc::clone(&self.factory)))
    }

    /// Insert a context, replacing any context with the same name.
    ///
    /// The replaced context is dropped by the registry; its handle is
    /// released once in-flight callers holding it are done.
    pub fn add(&self, context: Context) -> Arc<Context> {
        let context = Arc::new(context);
        let previous = self.write(|entries| entries.insert(Arc::clone(&context)));

        match previous {
            Some(old) => {
                info!(context = %context, "Context replaced");
                debug!(
                    module = %old.name(),
                    was_resolved = old.is_resolved(),
                    "Previous context discarded"
                );
            }
            None => info!(context = %context, "Context added"),
        }
        self.log_all();

        context
    }

    /// Replace an existing context, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ModuleNotFound`] if no context has that name.
    pub fn replace(&self, context: Context) -> Result<Arc<Context>, RuntimeError> {
        let context = Arc::new(context);
        let name = context.name().to_string();

        let previous = {
            let mut guard = self.entries.write();
            if !guard.contexts.contains_key(&name) {
                return Err(RuntimeError::module_not_found(name));
            }
            Arc::make_mut(&mut guard).insert(Arc::clone(&context))
        };

        info!(context = %context, "Context replaced");
        self.log_all();
        previous.ok_or_else(|| RuntimeError::module_not_found(name))
    }

    /// Look up a context by name.
    pub fn get(&self, name: &str) -> Option<Arc<Context>> {
        self.entries.read().contexts.get(name).cloned()
    }

    /// Remove a context.
    pub fn remove(&self, name: &str) -> Option<Arc<Context>> {
        let removed = self.write(|entries| entries.remove(name));
        if removed.is_some() {
            info!(module = %name, "Context removed");
        }
        removed
    }

    /// Take a snapshot of all contexts.
    pub fn all(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            entries: Arc::clone(&self.entries.read()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().order.is_empty()
    }

    /// Register a runtime-supplied payload as a dynamic module.
    ///
    /// A previously declared dynamic entry keeps its fallback policy and
    /// forced-interpreted functions; `requested_mode` overrides its mode.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::ParseFailed`] if the payload is invalid or too large
    /// - a configuration error if the name belongs to a static module
    #[instrument(skip(self, bytes), fields(bytes_len = bytes.len()))]
    pub fn register_dynamic(
        &self,
        name: &str,
        bytes: &[u8],
        requested_mode: Option<ExecutionMode>,
    ) -> Result<Arc<Context>, RuntimeError> {
        let mut intent = match self.get(name) {
            Some(existing) if existing.origin() == ModuleOrigin::Static => {
                return Err(static_conflict(name));
            }
            Some(existing) => existing.module().intent().clone(),
            None => ExecutionIntent::default(),
        };
        if requested_mode.is_some() {
            intent.mode = requested_mode;
        }

        check_size(name, bytes)?;
        let parsed = ParsedModule::parse(name, bytes)?;
        let module = Module::new_dynamic(name, Some(parsed), intent)?;
        let context = Arc::new(self.create_context(module)?);

        // A static module may have been registered since the intent lookup.
        let previous = self.write(|entries| match entries.contexts.get(name) {
            Some(existing) if existing.origin() == ModuleOrigin::Static => {
                Err(static_conflict(name))
            }
            _ => Ok(entries.insert(Arc::clone(&context))),
        })?;

        match previous {
            Some(_) => info!(context = %context, "Context replaced"),
            None => info!(context = %context, "Context added"),
        }
        self.log_all();

        Ok(context)
    }

    /// Re-read a file-backed module and replace its context if it changed.
    ///
    /// Only active in [`DeploymentMode::Dev`]; elsewhere this is a no-op.
    /// Returns `true` if the context was replaced.
    ///
    /// # Errors
    ///
    /// I/O, parse and selection errors for the changed file. The current
    /// context stays in place when an error is returned.
    pub fn refresh(&self, name: &str) -> Result<bool, RuntimeError> {
        if !self.deployment().is_dev() {
            return Ok(false);
        }

        let Some(current) = self.get(name) else {
            return Ok(false);
        };
        let module = current.module();
        let Some(PayloadSource::File(path)) = module.source() else {
            return Ok(false);
        };

        let bytes = read_module_file(path)?;
        let hash = compute_hash(&bytes);
        if module
            .payload()
            .is_ok_and(|payload| payload.content_hash() == hash)
        {
            return Ok(false);
        }

        let parsed = ParsedModule::parse(name, &bytes)?;
        let reloaded = Module::new_static(
            name,
            parsed,
            module.source().cloned(),
            module.intent().clone(),
        )?;
        let context = self.create_context(reloaded)?;

        warn!(module = %name, path = %path.display(), "Module changed on disk, reloading");
        self.add(context);
        Ok(true)
    }

    /// Log every registered context.
    pub fn log_all(&self) {
        let snapshot = self.all();
        debug!(count = snapshot.len(), "Registered contexts");
        for context in snapshot.iter() {
            debug!(context = %context, "Registered context");
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut Entries) -> R) -> R {
        let mut guard = self.entries.write();
        f(Arc::make_mut(&mut guard))
    }
}

fn static_conflict(name: &str) -> RuntimeError {
    RuntimeError::invalid_config(format!(
        "module '{name}' is static and cannot be replaced at runtime"
    ))
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("deployment", &self.deployment())
            .field("modules", &self.all().names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Strategy;
    use crate::{ArtifactTable, WasmEngine};
    use modhost_common::{EngineConfig, ExecutionConfig};

    fn registry(deployment: DeploymentMode) -> Registry {
        registry_with(deployment, EmbeddedResources::new())
    }

    fn registry_with(deployment: DeploymentMode, resources: EmbeddedResources) -> Registry {
        let engine_config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        let execution = ExecutionConfig::default();
        let engine = WasmEngine::new(&engine_config, &execution).unwrap();
        let factory = Arc::new(HandleFactory::new(engine, ArtifactTable::new(), execution));
        Registry::new(deployment, factory, resources)
    }

    fn const_wasm(value: i32) -> Vec<u8> {
        wat::parse_str(format!(
            r#"(module (func (export "get") (result i32) i32.const {value}))"#
        ))
        .unwrap()
    }

    fn static_context(registry: &Registry, name: &str, value: i32) -> Context {
        let parsed = ParsedModule::parse(name, &const_wasm(value)).unwrap();
        let module = Module::new_static(name, parsed, None, ExecutionIntent::default()).unwrap();
        registry.create_context(module).unwrap()
    }

    #[test]
    fn test_add_and_get() {
        let registry = registry(DeploymentMode::ProdJit);
        let added = registry.add(static_context(&registry, "a", 1));

        let found = registry.get("a").unwrap();
        assert!(Arc::ptr_eq(&added, &found));
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn test_add_replaces_and_keeps_order() {
        let registry = registry(DeploymentMode::ProdJit);
        registry.add(static_context(&registry, "a", 1));
        registry.add(static_context(&registry, "b", 2));
        let old = registry.get("a").unwrap();

        let new = registry.add(static_context(&registry, "a", 3));

        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(registry.all().names(), ["a", "b"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_snapshot_is_immutable() {
        let registry = registry(DeploymentMode::ProdJit);
        registry.add(static_context(&registry, "a", 1));

        let snapshot = registry.all();
        registry.add(static_context(&registry, "b", 2));
        registry.remove("a");

        assert_eq!(snapshot.names(), ["a"]);
        assert!(snapshot.get("a").is_some());
        assert!(!snapshot.contains("b"));
        assert_eq!(registry.all().names(), ["b"]);
    }

    #[test]
    fn test_replace_requires_existing() {
        let registry = registry(DeploymentMode::ProdJit);
        let err = registry
            .replace(static_context(&registry, "a", 1))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ModuleNotFound { .. }));

        let first = registry.add(static_context(&registry, "a", 1));
        let previous = registry
            .replace(static_context(&registry, "a", 2))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &previous));
    }

    #[test]
    fn test_remove() {
        let registry = registry(DeploymentMode::ProdJit);
        registry.add(static_context(&registry, "a", 1));

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_init_reports_rejected_modules() {
        let resources = EmbeddedResources::new()
            .with("good.wasm", const_wasm(7))
            .with("bad.wasm", b"\0asm\x01\0\0\0garbage".to_vec());
        let registry = registry_with(DeploymentMode::ProdJit, resources);

        let report = registry
            .init(&[
                ModuleEntry::resource("good", "good.wasm"),
                ModuleEntry::resource("bad", "bad.wasm"),
                ModuleEntry::dynamic("later"),
            ])
            .unwrap();

        assert_eq!(report.loaded, ["good", "later"]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, "bad");
        assert!(!report.is_clean());
        assert_eq!(registry.all().names(), ["good", "later"]);
    }

    #[test]
    fn test_init_aborts_on_config_error() {
        let registry = registry(DeploymentMode::ProdJit);
        registry.add(static_context(&registry, "kept", 1));

        let err = registry
            .init(&[ModuleEntry::resource("ghost", "missing.wasm")])
            .unwrap_err();

        assert!(err.is_config_error());
        assert!(registry.get("kept").is_some());
    }

    #[test]
    fn test_failed_init_leaves_artifact_table_untouched() {
        let resources = EmbeddedResources::new().with("a.wasm", const_wasm(1));
        let registry = registry_with(DeploymentMode::ProdJit, resources);

        let err = registry
            .init(&[
                ModuleEntry::resource("a", "a.wasm").with_artifact("/nonexistent/x.cwasm"),
                ModuleEntry::resource("ghost", "missing.wasm"),
            ])
            .unwrap_err();

        assert!(err.is_config_error());
        assert!(registry.is_empty());
        assert!(!registry.factory().artifacts().contains("a"));
    }

    #[test]
    fn test_configured_artifact_selected_during_init() {
        let resources = EmbeddedResources::new().with("a.wasm", const_wasm(1));
        let registry = registry_with(DeploymentMode::ProdJit, resources);

        registry
            .init(&[ModuleEntry::resource("a", "a.wasm")
                .with_mode(ExecutionMode::Compiler)
                .with_artifact("/nonexistent/x.cwasm")])
            .unwrap();

        assert_eq!(registry.get("a").unwrap().strategy(), Strategy::precompiled());
        assert!(registry.factory().artifacts().contains("a"));
    }

    #[test]
    fn test_reinit_retires_dropped_artifacts() {
        let resources = EmbeddedResources::new()
            .with("a.wasm", const_wasm(1))
            .with("b.wasm", const_wasm(2));
        let registry = registry_with(DeploymentMode::ProdJit, resources);
        registry
            .factory()
            .artifacts()
            .register("manual", |_| Err(RuntimeError::invalid_config("stub")));

        registry
            .init(&[
                ModuleEntry::resource("a", "a.wasm").with_artifact("/artifacts/a.cwasm"),
                ModuleEntry::resource("b", "b.wasm").with_artifact("/artifacts/b.cwasm"),
            ])
            .unwrap();
        registry
            .init(&[ModuleEntry::resource("b", "b.wasm").with_artifact("/artifacts/b.cwasm")])
            .unwrap();

        let artifacts = registry.factory().artifacts();
        assert!(!artifacts.contains("a"));
        assert!(artifacts.contains("b"));
        assert!(artifacts.contains("manual"));
    }

    #[test]
    fn test_init_swaps_whole_mapping() {
        let resources = EmbeddedResources::new().with("one.wasm", const_wasm(1));
        let registry = registry_with(DeploymentMode::ProdJit, resources);
        registry.add(static_context(&registry, "old", 1));

        registry
            .init(&[ModuleEntry::resource("one", "one.wasm")])
            .unwrap();

        assert!(registry.get("old").is_none());
        assert!(registry.get("one").is_some());
    }

    #[test]
    fn test_register_dynamic() {
        let registry = registry(DeploymentMode::ProdJit);
        registry.init(&[ModuleEntry::dynamic("dyn")]).unwrap();

        let context = registry
            .register_dynamic("dyn", &const_wasm(9), Some(ExecutionMode::Interpreter))
            .unwrap();

        assert_eq!(context.origin(), ModuleOrigin::Dynamic);
        assert_eq!(context.strategy(), Strategy::interpret());
        let outcome = context.call("get", &[]).unwrap();
        assert_eq!(outcome.values, vec![crate::Value::I32(9)]);
    }

    #[test]
    fn test_register_dynamic_rejects_static_name() {
        let registry = registry(DeploymentMode::ProdJit);
        registry.add(static_context(&registry, "fixed", 1));

        let err = registry
            .register_dynamic("fixed", &const_wasm(2), None)
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_register_dynamic_never_shadows_concurrent_static() {
        let registry = Arc::new(registry(DeploymentMode::ProdJit));
        let wasm = const_wasm(2);

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let wasm = wasm.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let _ = registry.register_dynamic("contested", &wasm, None);
                    }
                })
            })
            .collect();
        let fixed = registry.add(static_context(&registry, "contested", 1));
        for writer in writers {
            writer.join().unwrap();
        }

        let current = registry.get("contested").unwrap();
        assert!(Arc::ptr_eq(&current, &fixed));
        assert_eq!(current.origin(), ModuleOrigin::Static);
    }

    #[test]
    fn test_register_dynamic_rejects_invalid_payload() {
        let registry = registry(DeploymentMode::ProdJit);
        let err = registry
            .register_dynamic("dyn", b"junk", None)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ParseFailed { .. }));
        assert!(registry.get("dyn").is_none());
    }

    #[test]
    fn test_refresh_is_noop_outside_dev() {
        let registry = registry(DeploymentMode::ProdJit);
        registry.add(static_context(&registry, "a", 1));
        assert!(!registry.refresh("a").unwrap());
    }
}
