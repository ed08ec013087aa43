//! Parsed modules and the module entity.
//!
//! - [`ParsedModule`]: validated WebAssembly bytes plus the metadata the
//!   runtime needs (exports, function index space, content hash)
//! - [`Module`]: a named, immutable module with its origin and declared
//!   execution intent

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, instrument};
use wasmparser::{Encoding, ExternalKind, Parser, Payload, TypeRef, Validator};

use modhost_common::{ExecutionIntent, ModuleOrigin, PayloadSource, RuntimeError};

/// Kind of an exported item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
    Tag,
}

impl From<ExternalKind> for ExportKind {
    fn from(kind: ExternalKind) -> Self {
        match kind {
            ExternalKind::Func => Self::Func,
            ExternalKind::Table => Self::Table,
            ExternalKind::Memory => Self::Memory,
            ExternalKind::Global => Self::Global,
            ExternalKind::Tag => Self::Tag,
        }
    }
}

/// An export declared by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportInfo {
    pub name: String,
    pub kind: ExportKind,
}

/// A validated WebAssembly core module.
///
/// Parsing is done once; the bytes are kept so either backend can build
/// from them later.
pub struct ParsedModule {
    bytes: Arc<[u8]>,
    content_hash: String,
    exports: Vec<ExportInfo>,
    imported_functions: u32,
    defined_functions: u32,
    parsed_at: Instant,
}

impl ParsedModule {
    /// Validate and scan a binary module.
    ///
    /// # Arguments
    ///
    /// * `name` - Module name, used for error reporting
    /// * `bytes` - The raw WebAssembly bytes
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ParseFailed`] if the bytes are not a valid core
    /// module. Components are rejected.
    #[instrument(skip(bytes), fields(bytes_len = bytes.len()))]
    pub fn parse(name: &str, bytes: &[u8]) -> Result<Self, RuntimeError> {
        validate_wasm_header(name, bytes)?;

        let mut exports = Vec::new();
        let mut imported_functions = 0;
        let mut defined_functions = 0;

        for payload in Parser::new(0).parse_all(bytes) {
            let payload = payload.map_err(|e| RuntimeError::parse_failed(name, e.to_string()))?;
            match payload {
                Payload::Version {
                    encoding: Encoding::Component,
                    ..
                } => {
                    return Err(RuntimeError::parse_failed(
                        name,
                        "components are not supported, expected a core module",
                    ));
                }
                Payload::ImportSection(reader) => {
                    for import in reader {
                        let import =
                            import.map_err(|e| RuntimeError::parse_failed(name, e.to_string()))?;
                        if matches!(import.ty, TypeRef::Func(_)) {
                            imported_functions += 1;
                        }
                    }
                }
                Payload::FunctionSection(reader) => {
                    defined_functions = reader.count();
                }
                Payload::ExportSection(reader) => {
                    for export in reader {
                        let export =
                            export.map_err(|e| RuntimeError::parse_failed(name, e.to_string()))?;
                        exports.push(ExportInfo {
                            name: export.name.to_string(),
                            kind: export.kind.into(),
                        });
                    }
                }
                _ => {}
            }
        }

        Validator::new()
            .validate_all(bytes)
            .map_err(|e| RuntimeError::parse_failed(name, e.to_string()))?;

        let content_hash = compute_hash(bytes);

        debug!(
            content_hash = %content_hash,
            exports = exports.len(),
            functions = imported_functions + defined_functions,
            "Module parsed"
        );

        Ok(Self {
            bytes: Arc::from(bytes),
            content_hash,
            exports,
            imported_functions,
            defined_functions,
            parsed_at: Instant::now(),
        })
    }

    /// The original module bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Hash of the original bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Declared exports, in binary order.
    pub fn exports(&self) -> &[ExportInfo] {
        &self.exports
    }

    /// Names of exported functions.
    pub fn exported_functions(&self) -> impl Iterator<Item = &str> {
        self.exports
            .iter()
            .filter(|e| e.kind == ExportKind::Func)
            .map(|e| e.name.as_str())
    }

    /// Size of the function index space (imports first, then definitions).
    pub fn function_count(&self) -> u32 {
        self.imported_functions + self.defined_functions
    }

    /// When this module was parsed.
    pub fn parsed_at(&self) -> Instant {
        self.parsed_at
    }
}

impl fmt::Debug for ParsedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedModule")
            .field("content_hash", &self.content_hash)
            .field("bytes_len", &self.bytes.len())
            .field("functions", &self.function_count())
            .finish_non_exhaustive()
    }
}

/// A named module with its origin and declared execution intent.
///
/// Immutable once created. A static module always carries a payload; a
/// dynamic one may be created empty and must be replaced by a module with
/// a payload before it can run.
#[derive(Debug, Clone)]
pub struct Module {
    name: String,
    origin: ModuleOrigin,
    payload: Option<Arc<ParsedModule>>,
    source: Option<PayloadSource>,
    intent: ExecutionIntent,
}

impl Module {
    /// Create a static module.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the intent forces interpretation of
    /// a function index outside the module.
    pub fn new_static(
        name: impl Into<String>,
        payload: ParsedModule,
        source: Option<PayloadSource>,
        intent: ExecutionIntent,
    ) -> Result<Self, RuntimeError> {
        let module = Self {
            name: name.into(),
            origin: ModuleOrigin::Static,
            payload: Some(Arc::new(payload)),
            source,
            intent,
        };
        module.check_interpreted_functions()?;
        Ok(module)
    }

    /// Create a dynamic module, with or without its payload.
    ///
    /// # Errors
    ///
    /// Same as [`Module::new_static`].
    pub fn new_dynamic(
        name: impl Into<String>,
        payload: Option<ParsedModule>,
        intent: ExecutionIntent,
    ) -> Result<Self, RuntimeError> {
        let module = Self {
            name: name.into(),
            origin: ModuleOrigin::Dynamic,
            payload: payload.map(Arc::new),
            source: None,
            intent,
        };
        module.check_interpreted_functions()?;
        Ok(module)
    }

    fn check_interpreted_functions(&self) -> Result<(), RuntimeError> {
        let Some(payload) = &self.payload else {
            return Ok(());
        };
        let count = payload.function_count();
        if let Some(index) = self
            .intent
            .interpreted_functions
            .iter()
            .find(|&&index| index >= count)
        {
            return Err(RuntimeError::invalid_config(format!(
                "module '{}' forces function {index} onto the interpreter but only has {count} functions",
                self.name
            )));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> ModuleOrigin {
        self.origin
    }

    pub fn intent(&self) -> &ExecutionIntent {
        &self.intent
    }

    /// Where the payload was loaded from, for static modules.
    pub fn source(&self) -> Option<&PayloadSource> {
        self.source.as_ref()
    }

    /// Returns `true` if the payload is present.
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// The parsed payload.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::MissingPayload`] for a dynamic module whose
    /// payload was never supplied.
    pub fn payload(&self) -> Result<&Arc<ParsedModule>, RuntimeError> {
        self.payload
            .as_ref()
            .ok_or_else(|| RuntimeError::missing_payload(&self.name))
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Module{{name={}", self.origin, self.name)?;
        match &self.payload {
            Some(payload) => write!(f, ", hash={}", payload.content_hash())?,
            None => write!(f, ", payload=<pending>")?,
        }
        if let Some(source) = &self.source {
            write!(f, ", source={source}")?;
        }
        write!(f, "}}")
    }
}

/// Validate WebAssembly header (magic number).
fn validate_wasm_header(name: &str, bytes: &[u8]) -> Result<(), RuntimeError> {
    if bytes.len() < 8 {
        return Err(RuntimeError::parse_failed(name, "file too small"));
    }

    // Check magic number: \0asm
    if &bytes[0..4] != b"\0asm" {
        return Err(RuntimeError::parse_failed(name, "bad magic number"));
    }

    Ok(())
}

/// Compute a hash of the given bytes.
pub(crate) fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
