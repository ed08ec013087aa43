//! Execution handles and the factory that builds them.
//!
//! An [`ExecutionHandle`] is the ready-to-call form of a module for one
//! backend. It holds everything that can be prepared once (compiled code,
//! resolved imports) and creates a fresh, isolated store for every call:
//!
//! 1. Create a store with the call's fuel budget
//! 2. Instantiate from the prepared module
//! 3. Check the arguments against the export signature and call it
//! 4. Collect results, guest logs and fuel usage
//!
//! [`HandleFactory`] turns a [`Module`] plus its [`Strategy`] into a handle,
//! falling back to the interpreter when compilation fails and the module's
//! policy allows it.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use wasmtime::{InstancePre, Linker, Trap};

use crate::selector::{Backend, Strategy};
use crate::store::{
    CallContext, LogEntry, calculate_fuel_consumed, create_compiled_store,
    create_interpreted_store,
};
use crate::{ArtifactTable, Module, WasmEngine};
use modhost_common::{ExecutionConfig, ExecutionMode, RuntimeError};

/// A WebAssembly number passed to or returned from an export.
///
/// Serialized externally tagged: `{"i32": 41}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    pub fn ty(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
        }
    }

    fn to_compiled(self) -> wasmtime::Val {
        match self {
            Value::I32(v) => wasmtime::Val::I32(v),
            Value::I64(v) => wasmtime::Val::I64(v),
            Value::F32(v) => wasmtime::Val::F32(v.to_bits()),
            Value::F64(v) => wasmtime::Val::F64(v.to_bits()),
        }
    }

    fn from_compiled(val: &wasmtime::Val) -> Result<Self, RuntimeError> {
        match val {
            wasmtime::Val::I32(v) => Ok(Value::I32(*v)),
            wasmtime::Val::I64(v) => Ok(Value::I64(*v)),
            wasmtime::Val::F32(bits) => Ok(Value::F32(f32::from_bits(*bits))),
            wasmtime::Val::F64(bits) => Ok(Value::F64(f64::from_bits(*bits))),
            other => Err(RuntimeError::trap(format!(
                "unsupported result value: {other:?}"
            ))),
        }
    }

    fn to_interpreted(self) -> wasmi::Val {
        match self {
            Value::I32(v) => wasmi::Val::I32(v),
            Value::I64(v) => wasmi::Val::I64(v),
            Value::F32(v) => wasmi::Val::F32(wasmi::core::F32::from_bits(v.to_bits())),
            Value::F64(v) => wasmi::Val::F64(wasmi::core::F64::from_bits(v.to_bits())),
        }
    }

    fn from_interpreted(val: &wasmi::Val) -> Result<Self, RuntimeError> {
        match val {
            wasmi::Val::I32(v) => Ok(Value::I32(*v)),
            wasmi::Val::I64(v) => Ok(Value::I64(*v)),
            wasmi::Val::F32(v) => Ok(Value::F32(f32::from_bits(v.to_bits()))),
            wasmi::Val::F64(v) => Ok(Value::F64(f64::from_bits(v.to_bits()))),
            other => Err(RuntimeError::trap(format!(
                "unsupported result value: {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}i32"),
            Value::I64(v) => write!(f, "{v}i64"),
            Value::F32(v) => write!(f, "{v}f32"),
            Value::F64(v) => write!(f, "{v}f64"),
        }
    }
}

/// Number types an export may take or return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    fn from_compiled(ty: &wasmtime::ValType) -> Option<Self> {
        match ty {
            wasmtime::ValType::I32 => Some(Self::I32),
            wasmtime::ValType::I64 => Some(Self::I64),
            wasmtime::ValType::F32 => Some(Self::F32),
            wasmtime::ValType::F64 => Some(Self::F64),
            _ => None,
        }
    }

    fn from_interpreted(ty: wasmi::core::ValType) -> Option<Self> {
        match ty {
            wasmi::core::ValType::I32 => Some(Self::I32),
            wasmi::core::ValType::I64 => Some(Self::I64),
            wasmi::core::ValType::F32 => Some(Self::F32),
            wasmi::core::ValType::F64 => Some(Self::F64),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::F32 => write!(f, "f32"),
            Self::F64 => write!(f, "f64"),
        }
    }
}

/// Result of a successful export call.
#[derive(Debug, Clone, Serialize)]
pub struct CallOutcome {
    pub values: Vec<Value>,
    pub logs: Vec<LogEntry>,
    pub fuel_consumed: u64,
    #[serde(skip)]
    pub duration: Duration,
}

enum HandleKind {
    Compiled {
        instance_pre: InstancePre<CallContext>,
    },
    Interpreted {
        module: wasmi::Module,
    },
}

/// A prepared, callable module.
///
/// Shared by every caller of a context through an `Arc`. Each call runs in
/// its own store, so concurrent calls never observe each other's state.
pub struct ExecutionHandle {
    module_name: String,
    strategy: Strategy,
    fell_back: bool,
    factory: Arc<HandleFactory>,
    kind: HandleKind,
    built_at: Instant,
}

impl ExecutionHandle {
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// The strategy the handle was actually built with.
    ///
    /// Differs from the selected one when compilation fell back.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn mode(&self) -> ExecutionMode {
        self.strategy.mode
    }

    pub fn backend(&self) -> Backend {
        self.strategy.backend
    }

    /// Returns `true` if compilation failed and the interpreter took over.
    pub fn fell_back(&self) -> bool {
        self.fell_back
    }

    pub fn built_at(&self) -> Instant {
        self.built_at
    }

    /// Call an exported function.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::ExportNotFound`] if no function has that name
    /// - [`RuntimeError::InvalidArgument`] on arity or type mismatch
    /// - [`RuntimeError::FuelExhausted`] if the fuel budget ran out
    /// - [`RuntimeError::Trap`] for any other guest trap
    #[instrument(skip(self, args), fields(module = %self.module_name, backend = %self.strategy.backend))]
    pub fn call(&self, export: &str, args: &[Value]) -> Result<CallOutcome, RuntimeError> {
        let start = Instant::now();

        let result = match &self.kind {
            HandleKind::Compiled { instance_pre } => self.call_compiled(instance_pre, export, args),
            HandleKind::Interpreted { module } => self.call_interpreted(module, export, args),
        };

        let duration = start.elapsed();
        match &result {
            Ok(outcome) => info!(
                duration_us = duration.as_micros(),
                fuel_consumed = outcome.fuel_consumed,
                "Execution completed successfully"
            ),
            Err(RuntimeError::FuelExhausted) => warn!(
                duration_us = duration.as_micros(),
                "Execution terminated: fuel exhausted"
            ),
            Err(e @ RuntimeError::Trap { .. }) => error!(
                duration_us = duration.as_micros(),
                error = %e,
                "Execution trapped"
            ),
            Err(e) => debug!(error = %e, "Call rejected"),
        }

        result
    }

    fn call_compiled(
        &self,
        instance_pre: &InstancePre<CallContext>,
        export: &str,
        args: &[Value],
    ) -> Result<CallOutcome, RuntimeError> {
        let config = self.factory.execution_config();
        let mut store = create_compiled_store(self.factory.engine(), config)?;

        let instance = instance_pre
            .instantiate(&mut store)
            .map_err(|e| classify_compiled(e, RuntimeError::instantiation_failed))?;

        let func = instance
            .get_func(&mut store, export)
            .ok_or_else(|| self.export_not_found(export))?;

        let ty = func.ty(&store);
        let params = ty
            .params()
            .map(|p| ValueType::from_compiled(&p))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| self.unsupported_signature(export))?;
        if ty.results().any(|r| ValueType::from_compiled(&r).is_none()) {
            return Err(self.unsupported_signature(export));
        }
        check_arguments(export, &params, args)?;

        let params: Vec<wasmtime::Val> = args.iter().map(|a| a.to_compiled()).collect();
        let mut results = vec![wasmtime::Val::I32(0); ty.results().len()];

        let result = func.call(&mut store, &params, &mut results);

        let fuel_consumed = calculate_fuel_consumed(config.max_fuel, store.get_fuel().ok());
        store.data_mut().finalize_metrics(fuel_consumed);

        result.map_err(|e| classify_compiled(e, RuntimeError::trap))?;

        let values = results
            .iter()
            .map(Value::from_compiled)
            .collect::<Result<Vec<_>, _>>()?;
        let context = store.into_data();

        Ok(CallOutcome {
            values,
            fuel_consumed,
            duration: context.elapsed(),
            logs: context.logs,
        })
    }

    fn call_interpreted(
        &self,
        module: &wasmi::Module,
        export: &str,
        args: &[Value],
    ) -> Result<CallOutcome, RuntimeError> {
        let config = self.factory.execution_config();
        let mut store = create_interpreted_store(self.factory.engine(), config)?;

        let instance = self
            .factory
            .interpreter_linker
            .instantiate(&mut store, module)
            .and_then(|pre| pre.start(&mut store))
            .map_err(|e| classify_interpreted(e, RuntimeError::instantiation_failed))?;

        let func = instance
            .get_func(&store, export)
            .ok_or_else(|| self.export_not_found(export))?;

        let ty = func.ty(&store);
        let params = ty
            .params()
            .iter()
            .map(|p| ValueType::from_interpreted(*p))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| self.unsupported_signature(export))?;
        if ty
            .results()
            .iter()
            .any(|r| ValueType::from_interpreted(*r).is_none())
        {
            return Err(self.unsupported_signature(export));
        }
        check_arguments(export, &params, args)?;

        let params: Vec<wasmi::Val> = args.iter().map(|a| a.to_interpreted()).collect();
        let mut results: Vec<wasmi::Val> =
            ty.results().iter().map(|r| wasmi::Val::default(*r)).collect();

        let result = func.call(&mut store, &params, &mut results);

        let fuel_consumed = calculate_fuel_consumed(config.max_fuel, store.get_fuel().ok());
        store.data_mut().finalize_metrics(fuel_consumed);

        result.map_err(|e| classify_interpreted(e, RuntimeError::trap))?;

        let values = results
            .iter()
            .map(Value::from_interpreted)
            .collect::<Result<Vec<_>, _>>()?;
        let context = store.into_data();

        Ok(CallOutcome {
            values,
            fuel_consumed,
            duration: context.elapsed(),
            logs: context.logs,
        })
    }

    fn export_not_found(&self, export: &str) -> RuntimeError {
        RuntimeError::ExportNotFound {
            module: self.module_name.clone(),
            export: export.to_string(),
        }
    }

    fn unsupported_signature(&self, export: &str) -> RuntimeError {
        RuntimeError::invalid_argument(format!(
            "export '{export}' of module '{}' uses non-numeric parameter or result types",
            self.module_name
        ))
    }
}

impl fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("module", &self.module_name)
            .field("strategy", &self.strategy)
            .field("fell_back", &self.fell_back)
            .finish_non_exhaustive()
    }
}

fn check_arguments(export: &str, expected: &[ValueType], args: &[Value]) -> Result<(), RuntimeError> {
    if expected.len() != args.len() {
        return Err(RuntimeError::invalid_argument(format!(
            "export '{export}' takes {} arguments, got {}",
            expected.len(),
            args.len()
        )));
    }

    for (index, (ty, arg)) in expected.iter().zip(args).enumerate() {
        if *ty != arg.ty() {
            return Err(RuntimeError::invalid_argument(format!(
                "argument {index} of export '{export}' must be {ty}, got {}",
                arg.ty()
            )));
        }
    }

    Ok(())
}

/// Map a Wasmtime error, treating fuel exhaustion separately.
fn classify_compiled(error: wasmtime::Error, other: fn(String) -> RuntimeError) -> RuntimeError {
    if error
        .downcast_ref::<Trap>()
        .is_some_and(|trap| *trap == Trap::OutOfFuel)
    {
        return RuntimeError::FuelExhausted;
    }
    other(format!("{error:#}"))
}

/// Map a Wasmi error, treating fuel exhaustion separately.
fn classify_interpreted(error: wasmi::Error, other: fn(String) -> RuntimeError) -> RuntimeError {
    if error.as_trap_code() == Some(wasmi::core::TrapCode::OutOfFuel) {
        return RuntimeError::FuelExhausted;
    }
    other(error.to_string())
}

/// Callback invoked on every handle build attempt.
pub type BuildHook = Arc<dyn Fn(&str, &Strategy) + Send + Sync>;

/// Builds execution handles.
///
/// Owns the host function linkers for both backends. Register host
/// functions through [`HandleFactory::linker_mut`] and
/// [`HandleFactory::interpreter_linker_mut`] before sharing the factory.
pub struct HandleFactory {
    engine: WasmEngine,
    linker: Linker<CallContext>,
    interpreter_linker: wasmi::Linker<CallContext>,
    artifacts: ArtifactTable,
    execution: ExecutionConfig,
    build_hook: Option<BuildHook>,
}

impl HandleFactory {
    pub fn new(engine: WasmEngine, artifacts: ArtifactTable, execution: ExecutionConfig) -> Self {
        let linker = Linker::new(engine.compiler());
        let interpreter_linker = wasmi::Linker::new(engine.interpreter());

        Self {
            engine,
            linker,
            interpreter_linker,
            artifacts,
            execution,
            build_hook: None,
        }
    }

    /// Linker used for compiled handles.
    pub fn linker_mut(&mut self) -> &mut Linker<CallContext> {
        &mut self.linker
    }

    /// Linker used for interpreted handles.
    pub fn interpreter_linker_mut(&mut self) -> &mut wasmi::Linker<CallContext> {
        &mut self.interpreter_linker
    }

    /// Install a callback run on every build attempt.
    pub fn on_build<F>(&mut self, hook: F)
    where
        F: Fn(&str, &Strategy) + Send + Sync + 'static,
    {
        self.build_hook = Some(Arc::new(hook));
    }

    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    pub fn artifacts(&self) -> &ArtifactTable {
        &self.artifacts
    }

    pub fn execution_config(&self) -> &ExecutionConfig {
        &self.execution
    }

    /// Build a handle for `module` using `strategy`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::MissingPayload`] if the module has no payload,
    /// or the compilation or instantiation error when the build fails and no
    /// fallback applies.
    #[instrument(skip(self, module), fields(module = %module.name(), strategy = %strategy))]
    pub fn build(
        self: &Arc<Self>,
        module: &Module,
        strategy: &Strategy,
    ) -> Result<ExecutionHandle, RuntimeError> {
        if let Some(hook) = &self.build_hook {
            hook(module.name(), strategy);
        }

        let start = Instant::now();
        let payload = module.payload()?;

        let (kind, built, fell_back) = match strategy.backend {
            Backend::Interpret => (self.prepare_interpreted(payload.bytes())?, *strategy, false),
            Backend::Precompiled | Backend::CompileNow => {
                match self.prepare_compiled(module.name(), payload.bytes(), strategy.backend) {
                    Ok(kind) => (kind, *strategy, false),
                    Err(e) if module.intent().fallback.allows_fallback() => {
                        warn!(
                            error = %e,
                            "Compilation failed, falling back to the interpreter"
                        );
                        (self.prepare_interpreted(payload.bytes())?, Strategy::interpret(), true)
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        info!(
            backend = %built.backend,
            fell_back,
            duration_ms = start.elapsed().as_millis(),
            "Execution handle built"
        );

        Ok(ExecutionHandle {
            module_name: module.name().to_string(),
            strategy: built,
            fell_back,
            factory: Arc::clone(self),
            kind,
            built_at: Instant::now(),
        })
    }

    fn prepare_compiled(
        &self,
        name: &str,
        bytes: &[u8],
        backend: Backend,
    ) -> Result<HandleKind, RuntimeError> {
        let module = if backend == Backend::Precompiled {
            let factory = self.artifacts.get(name).ok_or_else(|| RuntimeError::MissingArtifact {
                module: name.to_string(),
            })?;
            factory(self.engine.compiler())?
        } else {
            wasmtime::Module::new(self.engine.compiler(), bytes)
                .map_err(|e| RuntimeError::compilation_failed(format!("{e:#}")))?
        };

        let instance_pre = self
            .linker
            .instantiate_pre(&module)
            .map_err(|e| RuntimeError::instantiation_failed(format!("{e:#}")))?;

        Ok(HandleKind::Compiled { instance_pre })
    }

    fn prepare_interpreted(&self, bytes: &[u8]) -> Result<HandleKind, RuntimeError> {
        let module = wasmi::Module::new(self.engine.interpreter(), bytes)
            .map_err(|e| RuntimeError::compilation_failed(e.to_string()))?;

        // Resolve imports now so link errors surface at build, like
        // `instantiate_pre` does for compiled handles. The start function
        // does not run here.
        let mut scratch = create_interpreted_store(&self.engine, &self.execution)?;
        self.interpreter_linker
            .instantiate(&mut scratch, &module)
            .map_err(|e| RuntimeError::instantiation_failed(e.to_string()))?;

        Ok(HandleKind::Interpreted { module })
    }
}

impl fmt::Debug for HandleFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleFactory")
            .field("engine", &self.engine)
            .field("artifacts", &self.artifacts)
            .field("execution", &self.execution)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ParsedModule;
    use modhost_common::{EngineConfig, ExecutionIntent, InterpreterFallback};

    const ADD_WAT: &str = r#"
        (module
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add)
            (func (export "scale") (param f64) (result f64)
                local.get 0
                f64.const 2.5
                f64.mul)
            (func (export "boom")
                unreachable)
            (func (export "spin")
                (loop $l (br $l))))
    "#;

    fn factory_with(max_fuel: u64) -> Arc<HandleFactory> {
        let engine_config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        let execution = ExecutionConfig {
            max_fuel,
            fuel_metering: true,
        };
        let engine = WasmEngine::new(&engine_config, &execution).unwrap();
        Arc::new(HandleFactory::new(engine, ArtifactTable::new(), execution))
    }

    fn factory() -> Arc<HandleFactory> {
        factory_with(1_000_000)
    }

    fn module(intent: ExecutionIntent) -> Module {
        let bytes = wat::parse_str(ADD_WAT).unwrap();
        let parsed = ParsedModule::parse("math", &bytes).unwrap();
        Module::new_static("math", parsed, None, intent).unwrap()
    }

    fn both_backends() -> [Strategy; 2] {
        [Strategy::compile_now(), Strategy::interpret()]
    }

    #[test]
    fn test_add_on_both_backends() {
        let factory = factory();
        let module = module(ExecutionIntent::default());

        for strategy in both_backends() {
            let handle = factory.build(&module, &strategy).unwrap();
            assert_eq!(handle.strategy(), strategy);
            assert!(!handle.fell_back());

            let outcome = handle
                .call("add", &[Value::I32(41), Value::I32(1)])
                .unwrap();
            assert_eq!(outcome.values, vec![Value::I32(42)]);
            assert!(outcome.fuel_consumed > 0);
        }
    }

    #[test]
    fn test_float_arguments() {
        let factory = factory();
        let module = module(ExecutionIntent::default());

        for strategy in both_backends() {
            let handle = factory.build(&module, &strategy).unwrap();
            let outcome = handle.call("scale", &[Value::F64(4.0)]).unwrap();
            assert_eq!(outcome.values, vec![Value::F64(10.0)]);
        }
    }

    #[test]
    fn test_argument_checks() {
        let factory = factory();
        let module = module(ExecutionIntent::default());

        for strategy in both_backends() {
            let handle = factory.build(&module, &strategy).unwrap();

            let err = handle.call("add", &[Value::I32(1)]).unwrap_err();
            assert!(matches!(err, RuntimeError::InvalidArgument { .. }));

            let err = handle
                .call("add", &[Value::I32(1), Value::I64(2)])
                .unwrap_err();
            assert!(err.to_string().contains("argument 1"));
        }
    }

    #[test]
    fn test_export_not_found() {
        let factory = factory();
        let module = module(ExecutionIntent::default());

        for strategy in both_backends() {
            let handle = factory.build(&module, &strategy).unwrap();
            let err = handle.call("missing", &[]).unwrap_err();
            assert!(matches!(err, RuntimeError::ExportNotFound { ref export, .. } if export == "missing"));
            assert!(err.is_not_found());
        }
    }

    #[test]
    fn test_trap_is_reported() {
        let factory = factory();
        let module = module(ExecutionIntent::default());

        for strategy in both_backends() {
            let handle = factory.build(&module, &strategy).unwrap();
            let err = handle.call("boom", &[]).unwrap_err();
            assert!(matches!(err, RuntimeError::Trap { .. }));
        }
    }

    #[test]
    fn test_fuel_exhaustion() {
        let factory = factory_with(10_000);
        let module = module(ExecutionIntent::default());

        for strategy in both_backends() {
            let handle = factory.build(&module, &strategy).unwrap();
            let err = handle.call("spin", &[]).unwrap_err();
            assert!(matches!(err, RuntimeError::FuelExhausted));
            assert!(err.is_resource_limit());
        }
    }

    #[test]
    fn test_calls_are_isolated() {
        let bytes = wat::parse_str(
            r#"
            (module
                (global $n (mut i32) (i32.const 0))
                (func (export "bump") (result i32)
                    global.get $n
                    i32.const 1
                    i32.add
                    global.set $n
                    global.get $n))
            "#,
        )
        .unwrap();
        let parsed = ParsedModule::parse("counter", &bytes).unwrap();
        let module =
            Module::new_static("counter", parsed, None, ExecutionIntent::default()).unwrap();
        let factory = factory();

        for strategy in both_backends() {
            let handle = factory.build(&module, &strategy).unwrap();
            for _ in 0..3 {
                let outcome = handle.call("bump", &[]).unwrap();
                assert_eq!(outcome.values, vec![Value::I32(1)]);
            }
        }
    }

    #[test]
    fn test_failed_artifact_falls_back_to_interpreter() {
        let factory = factory();
        factory
            .artifacts()
            .register("math", |_| Err(RuntimeError::compilation_failed("corrupt artifact")));
        let module = module(ExecutionIntent::default());

        let handle = factory.build(&module, &Strategy::precompiled()).unwrap();
        assert!(handle.fell_back());
        assert_eq!(handle.backend(), Backend::Interpret);
        assert_eq!(handle.mode(), ExecutionMode::Interpreter);

        let outcome = handle
            .call("add", &[Value::I32(2), Value::I32(3)])
            .unwrap();
        assert_eq!(outcome.values, vec![Value::I32(5)]);
    }

    #[test]
    fn test_failed_artifact_with_fail_policy() {
        let factory = factory();
        factory
            .artifacts()
            .register("math", |_| Err(RuntimeError::compilation_failed("corrupt artifact")));
        let module = module(ExecutionIntent::default().fallback(InterpreterFallback::Fail));

        let err = factory.build(&module, &Strategy::precompiled()).unwrap_err();
        assert!(matches!(err, RuntimeError::CompilationFailed { .. }));
    }

    #[test]
    fn test_precompiled_artifact_is_used() {
        let factory = factory();
        let bytes = wat::parse_str(ADD_WAT).unwrap();
        let artifact = factory.engine().precompile(&bytes).unwrap();
        factory.artifacts().register_serialized("math", artifact);
        let module = module(ExecutionIntent::default().fallback(InterpreterFallback::Fail));

        let handle = factory.build(&module, &Strategy::precompiled()).unwrap();
        assert_eq!(handle.backend(), Backend::Precompiled);
        assert!(!handle.fell_back());

        let outcome = handle
            .call("add", &[Value::I32(20), Value::I32(22)])
            .unwrap();
        assert_eq!(outcome.values, vec![Value::I32(42)]);
    }

    #[test]
    fn test_unresolved_import_fails_build() {
        let bytes = wat::parse_str(
            r#"(module (import "env" "missing" (func)) (func (export "f")))"#,
        )
        .unwrap();
        let parsed = ParsedModule::parse("needs_host", &bytes).unwrap();
        let module = Module::new_static(
            "needs_host",
            parsed,
            None,
            ExecutionIntent::default().fallback(InterpreterFallback::Fail),
        )
        .unwrap();
        let factory = factory();

        for strategy in both_backends() {
            let err = factory.build(&module, &strategy).unwrap_err();
            assert!(matches!(err, RuntimeError::InstantiationFailed { .. }));
        }
    }

    #[test]
    fn test_build_hook_counts_attempts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let engine_config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        let execution = ExecutionConfig::default();
        let engine = WasmEngine::new(&engine_config, &execution).unwrap();
        let mut factory = HandleFactory::new(engine, ArtifactTable::new(), execution);
        let seen = Arc::clone(&counter);
        factory.on_build(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let factory = Arc::new(factory);

        let module = module(ExecutionIntent::default());
        factory.build(&module, &Strategy::interpret()).unwrap();
        factory.build(&module, &Strategy::compile_now()).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_payload_is_rejected() {
        let module = Module::new_dynamic("m2", None, ExecutionIntent::default()).unwrap();
        let err = factory()
            .build(&module, &Strategy::interpret())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::MissingPayload { .. }));
    }

    #[test]
    fn test_value_serialization() {
        let json = serde_json::to_string(&Value::I32(41)).unwrap();
        assert_eq!(json, r#"{"i32":41}"#);

        let value: Value = serde_json::from_str(r#"{"f64":1.5}"#).unwrap();
        assert_eq!(value, Value::F64(1.5));
    }
}
