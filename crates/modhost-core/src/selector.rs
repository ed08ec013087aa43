//! Execution strategy selection.
//!
//! Given a module's origin, the deployment mode and the declared intent,
//! [`StrategySelector::select`] decides which backend will run it. The
//! decision is made before any instantiation and is deterministic: the same
//! inputs (including the artifact table contents) always give the same
//! strategy. Rules, first match wins:
//!
//! 1. `Dev`: the declared mode, defaulting to the compiler; always compile
//!    on demand so edited modules are picked up.
//! 2. Dynamic origin in `ProdNative`: interpreter, whatever was requested.
//! 3. Dynamic origin elsewhere: compile on demand unless the interpreter was
//!    requested.
//! 4. Static origin: the declared mode (default compiler). A compiled static
//!    module uses its prebuilt artifact; without one it compiles on demand
//!    with a warning, or fails under [`InterpreterFallback::Fail`]. The
//!    payload is known up front, so this holds in `ProdNative` too.
//!
//! A non-empty set of forced-interpreted functions turns any compiled
//! choice into interpretation, since neither backend mixes per function.

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use modhost_common::{
    DeploymentMode, ExecutionIntent, ExecutionMode, InterpreterFallback, ModuleOrigin, RuntimeError,
};

use crate::ArtifactTable;

/// How an execution handle is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Load the prebuilt artifact registered under the module name.
    Precompiled,
    /// Compile the module now, on first use.
    CompileNow,
    /// Run the module on the interpreter.
    Interpret,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precompiled => write!(f, "precompiled"),
            Self::CompileNow => write!(f, "compile-now"),
            Self::Interpret => write!(f, "interpret"),
        }
    }
}

/// A resolved execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Strategy {
    pub mode: ExecutionMode,
    pub backend: Backend,
}

impl Strategy {
    pub const fn precompiled() -> Self {
        Self {
            mode: ExecutionMode::Compiler,
            backend: Backend::Precompiled,
        }
    }

    pub const fn compile_now() -> Self {
        Self {
            mode: ExecutionMode::Compiler,
            backend: Backend::CompileNow,
        }
    }

    pub const fn interpret() -> Self {
        Self {
            mode: ExecutionMode::Interpreter,
            backend: Backend::Interpret,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mode, self.backend)
    }
}

/// The mode decision table, without artifact availability.
pub fn resolve(
    origin: ModuleOrigin,
    deployment: DeploymentMode,
    configured: Option<ExecutionMode>,
) -> ExecutionMode {
    match (deployment, origin) {
        (DeploymentMode::Dev, _) => configured.unwrap_or(ExecutionMode::Compiler),
        (DeploymentMode::ProdNative, ModuleOrigin::Dynamic) => ExecutionMode::Interpreter,
        (_, ModuleOrigin::Dynamic | ModuleOrigin::Static) => {
            configured.unwrap_or(ExecutionMode::Compiler)
        }
    }
}

/// Chooses a [`Strategy`] for each module.
#[derive(Debug, Clone)]
pub struct StrategySelector {
    deployment: DeploymentMode,
    artifacts: ArtifactTable,
}

impl StrategySelector {
    pub fn new(deployment: DeploymentMode, artifacts: ArtifactTable) -> Self {
        Self {
            deployment,
            artifacts,
        }
    }

    pub fn deployment(&self) -> DeploymentMode {
        self.deployment
    }

    /// Select the strategy for a module.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::MissingArtifact`] for a compiled static module
    /// with no prebuilt artifact when its policy is
    /// [`InterpreterFallback::Fail`].
    pub fn select(
        &self,
        name: &str,
        origin: ModuleOrigin,
        intent: &ExecutionIntent,
    ) -> Result<Strategy, RuntimeError> {
        let requested = intent.mode;
        let mode = resolve(origin, self.deployment, requested);

        if origin == ModuleOrigin::Dynamic
            && self.deployment.is_native()
            && requested == Some(ExecutionMode::Compiler)
        {
            warn!(
                module = %name,
                "Dynamic modules cannot be compiled in a native deployment, using the interpreter"
            );
        }

        if mode == ExecutionMode::Interpreter {
            return Ok(Strategy::interpret());
        }

        if !intent.interpreted_functions.is_empty() {
            warn!(
                module = %name,
                functions = ?intent.interpreted_functions,
                "Functions are forced onto the interpreter, interpreting the whole module"
            );
            return Ok(Strategy::interpret());
        }

        if self.deployment.is_dev() {
            info!(module = %name, "Dev mode enabled, module will be compiled on demand");
            return Ok(Strategy::compile_now());
        }

        match origin {
            ModuleOrigin::Dynamic => Ok(Strategy::compile_now()),
            ModuleOrigin::Static => self.select_static_compiled(name, intent.fallback),
        }
    }

    fn select_static_compiled(
        &self,
        name: &str,
        fallback: InterpreterFallback,
    ) -> Result<Strategy, RuntimeError> {
        if self.artifacts.contains(name) {
            return Ok(Strategy::precompiled());
        }

        if !fallback.allows_fallback() {
            return Err(RuntimeError::MissingArtifact {
                module: name.to_string(),
            });
        }

        warn!(
            module = %name,
            deployment = %self.deployment,
            "No prebuilt artifact, module will be compiled on demand"
        );
        Ok(Strategy::compile_now())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing::Level;
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{self, Layer, SubscriberExt};

    use super::*;

    const ALL_DEPLOYMENTS: [DeploymentMode; 4] = [
        DeploymentMode::Dev,
        DeploymentMode::Test,
        DeploymentMode::ProdJit,
        DeploymentMode::ProdNative,
    ];

    const ALL_CONFIGURED: [Option<ExecutionMode>; 3] = [
        None,
        Some(ExecutionMode::Interpreter),
        Some(ExecutionMode::Compiler),
    ];

    fn selector(deployment: DeploymentMode) -> StrategySelector {
        StrategySelector::new(deployment, ArtifactTable::new())
    }

    /// Records the `module` field of every WARN event.
    #[derive(Clone, Default)]
    struct WarnCapture {
        modules: Arc<Mutex<Vec<String>>>,
    }

    impl WarnCapture {
        fn warnings_for(&self, module: &str) -> usize {
            self.modules.lock().iter().filter(|m| *m == module).count()
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for WarnCapture {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: layer::Context<'_, S>) {
            if *event.metadata().level() != Level::WARN {
                return;
            }
            let mut field = ModuleField(None);
            event.record(&mut field);
            if let Some(module) = field.0 {
                self.modules.lock().push(module);
            }
        }
    }

    struct ModuleField(Option<String>);

    impl Visit for ModuleField {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "module" {
                self.0 = Some(format!("{value:?}"));
            }
        }
    }

    fn stub_artifact(table: &ArtifactTable, name: &str) {
        table.register(name, |_| Err(RuntimeError::compilation_failed("stub")));
    }

    #[test]
    fn test_dynamic_in_native_always_interprets() {
        for configured in ALL_CONFIGURED {
            assert_eq!(
                resolve(ModuleOrigin::Dynamic, DeploymentMode::ProdNative, configured),
                ExecutionMode::Interpreter
            );

            let intent = ExecutionIntent {
                mode: configured,
                ..ExecutionIntent::default()
            };
            let strategy = selector(DeploymentMode::ProdNative)
                .select("m2", ModuleOrigin::Dynamic, &intent)
                .unwrap();
            assert_eq!(strategy, Strategy::interpret());
        }
    }

    #[test]
    fn test_dynamic_elsewhere_defaults_to_compiler() {
        for deployment in [DeploymentMode::Test, DeploymentMode::ProdJit] {
            let s = selector(deployment);
            assert_eq!(
                s.select("d", ModuleOrigin::Dynamic, &ExecutionIntent::default())
                    .unwrap(),
                Strategy::compile_now()
            );
            assert_eq!(
                s.select(
                    "d",
                    ModuleOrigin::Dynamic,
                    &ExecutionIntent::with_mode(ExecutionMode::Interpreter)
                )
                .unwrap(),
                Strategy::interpret()
            );
        }
    }

    #[test]
    fn test_dev_honors_configured_and_never_uses_artifacts() {
        let table = ArtifactTable::new();
        stub_artifact(&table, "s");
        let s = StrategySelector::new(DeploymentMode::Dev, table);

        for origin in [ModuleOrigin::Static, ModuleOrigin::Dynamic] {
            assert_eq!(
                s.select("s", origin, &ExecutionIntent::default()).unwrap(),
                Strategy::compile_now()
            );
            assert_eq!(
                s.select(
                    "s",
                    origin,
                    &ExecutionIntent::with_mode(ExecutionMode::Interpreter)
                )
                .unwrap(),
                Strategy::interpret()
            );
        }
    }

    #[test]
    fn test_static_uses_prebuilt_artifact() {
        let table = ArtifactTable::new();
        stub_artifact(&table, "m1");
        let s = StrategySelector::new(DeploymentMode::ProdJit, table);

        let strategy = s
            .select(
                "m1",
                ModuleOrigin::Static,
                &ExecutionIntent::with_mode(ExecutionMode::Compiler),
            )
            .unwrap();
        assert_eq!(strategy, Strategy::precompiled());
    }

    #[test]
    fn test_static_without_artifact_compiles_on_demand() {
        let strategy = selector(DeploymentMode::ProdJit)
            .select(
                "m1",
                ModuleOrigin::Static,
                &ExecutionIntent::with_mode(ExecutionMode::Compiler),
            )
            .unwrap();
        assert_eq!(strategy, Strategy::compile_now());
    }

    #[test]
    fn test_static_without_artifact_in_native_compiles_on_demand() {
        let strategy = selector(DeploymentMode::ProdNative)
            .select("m1", ModuleOrigin::Static, &ExecutionIntent::default())
            .unwrap();
        assert_eq!(strategy, Strategy::compile_now());
    }

    #[test]
    fn test_compile_on_demand_warns_once() {
        for deployment in [DeploymentMode::ProdJit, DeploymentMode::ProdNative] {
            let capture = WarnCapture::default();
            let strategy = tracing::subscriber::with_default(
                tracing_subscriber::registry().with(capture.clone()),
                || {
                    selector(deployment).select(
                        "m1",
                        ModuleOrigin::Static,
                        &ExecutionIntent::with_mode(ExecutionMode::Compiler),
                    )
                },
            )
            .unwrap();

            assert_eq!(strategy, Strategy::compile_now());
            assert_eq!(capture.warnings_for("m1"), 1, "{deployment}");
        }
    }

    #[test]
    fn test_prebuilt_artifact_does_not_warn() {
        let table = ArtifactTable::new();
        stub_artifact(&table, "m1");
        let s = StrategySelector::new(DeploymentMode::ProdJit, table);

        let capture = WarnCapture::default();
        let strategy = tracing::subscriber::with_default(
            tracing_subscriber::registry().with(capture.clone()),
            || s.select("m1", ModuleOrigin::Static, &ExecutionIntent::default()),
        )
        .unwrap();

        assert_eq!(strategy, Strategy::precompiled());
        assert_eq!(capture.warnings_for("m1"), 0);
    }

    #[test]
    fn test_static_without_artifact_fails_under_fail_policy() {
        let intent = ExecutionIntent::with_mode(ExecutionMode::Compiler)
            .fallback(InterpreterFallback::Fail);

        for deployment in [DeploymentMode::ProdJit, DeploymentMode::ProdNative] {
            let err = selector(deployment)
                .select("m1", ModuleOrigin::Static, &intent)
                .unwrap_err();
            assert!(matches!(err, RuntimeError::MissingArtifact { ref module } if module == "m1"));
            assert!(err.is_config_error());
        }
    }

    #[test]
    fn test_static_interpreter_is_honored() {
        let intent = ExecutionIntent::with_mode(ExecutionMode::Interpreter)
            .fallback(InterpreterFallback::Fail);
        let strategy = selector(DeploymentMode::ProdJit)
            .select("m1", ModuleOrigin::Static, &intent)
            .unwrap();
        assert_eq!(strategy, Strategy::interpret());
    }

    #[test]
    fn test_forced_functions_interpret_whole_module() {
        let table = ArtifactTable::new();
        stub_artifact(&table, "m1");
        let s = StrategySelector::new(DeploymentMode::ProdJit, table);

        let intent = ExecutionIntent::with_mode(ExecutionMode::Compiler).interpret_functions([0]);
        assert_eq!(
            s.select("m1", ModuleOrigin::Static, &intent).unwrap(),
            Strategy::interpret()
        );
    }

    #[test]
    fn test_selection_is_deterministic() {
        for deployment in ALL_DEPLOYMENTS {
            let s = selector(deployment);
            for origin in [ModuleOrigin::Static, ModuleOrigin::Dynamic] {
                for configured in ALL_CONFIGURED {
                    let intent = ExecutionIntent {
                        mode: configured,
                        ..ExecutionIntent::default()
                    };
                    let first = s.select("m", origin, &intent).unwrap();
                    let second = s.select("m", origin, &intent).unwrap();
                    assert_eq!(first, second);
                    assert_eq!(first.mode, resolve(origin, deployment, configured));
                }
            }
        }
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(Strategy::compile_now().to_string(), "compiler/compile-now");
        assert_eq!(Strategy::interpret().to_string(), "interpreter/interpret");
    }
}
