use crate::errors::CustomError;
use crate::errors::InitError;
use crate::errors::JsError;
use anyhow::Result;
use std::collections::HashMap;
use std::io::Read;

/// The fixed specifier under which the generated bindings module is
/// registered (§4.2).
pub const BINDINGS_SPECIFIER: &str = "internal:bindings";

/// Creates a v8 script origin for a module compilation.
pub fn create_origin<'s>(
    scope: &mut v8::HandleScope<'s, ()>,
    name: &str,
) -> v8::ScriptOrigin<'s> {
    let name = v8::String::new(scope, name).unwrap();
    let source_map = v8::undefined(scope);

    v8::ScriptOrigin::new(
        scope,
        name.into(),
        0,
        0,
        false,
        0,
        source_map.into(),
        false,
        false,
        true, // is_module
    )
}

/// A finite mapping from specifier string to compiled module handle,
/// populated exactly once at init time and never mutated afterwards
/// (§3 Module Registry).
#[derive(Default)]
pub struct ModuleRegistry {
    by_specifier: HashMap<String, v8::Global<v8::Module>>,
}

impl ModuleRegistry {
    pub fn new() -> ModuleRegistry {
        ModuleRegistry::default()
    }

    pub fn insert(&mut self, specifier: &str, module: v8::Global<v8::Module>) {
        self.by_specifier.insert(specifier.to_string(), module);
    }

    pub fn get(&self, specifier: &str) -> Option<v8::Global<v8::Module>> {
        self.by_specifier.get(specifier).cloned()
    }

    /// Classifies and resolves a requested specifier against the three
    /// registry categories (§4.2). All three categories share one flat
    /// map keyed by specifier, so resolution is a single lookup; the
    /// categories only matter when the registry is *populated*, during
    /// init. Returns `None` for an unrecognised specifier; the caller
    /// is responsible for the `SourceLink` diagnostic.
    pub fn resolve(&self, specifier: &str) -> Option<v8::Global<v8::Module>> {
        self.get(specifier)
    }
}

/// Reads exactly `len` bytes from `stream`, failing with `SourceStdin`
/// on a short read (§4.2).
pub fn read_exact_module(stream: &mut dyn Read, len: usize) -> Result<String> {
    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .map_err(|_| CustomError::new("SourceStdin", "short read while loading module bytes"))?;
    String::from_utf8(buf).map_err(|_| CustomError::new("SourceStdin", "module bytes are not valid UTF-8").into())
}

/// Compiles a module's source text, reporting `on_error` as the typed
/// init error and printing the diagnostic if compilation fails.
pub fn compile_module<'s>(
    scope: &mut v8::TryCatch<'s, v8::HandleScope<'_>>,
    specifier: &str,
    source: &str,
    on_error: InitError,
) -> Result<v8::Local<'s, v8::Module>, InitError> {
    let origin = create_origin(scope, specifier);
    let source_str = v8::String::new(scope, source).unwrap();
    let source = v8::script_compiler::Source::new(source_str, Some(&origin));

    match v8::script_compiler::compile_module(scope, source) {
        Some(module) => Ok(module),
        None => {
            if scope.has_caught() {
                let exception = scope.exception().unwrap();
                let err = JsError::from_v8_exception(scope, exception, None);
                eprintln!("{err:?}");
            }
            Err(on_error)
        }
    }
}

/// The module-resolve callback registered with the engine
/// (`v8::Module::instantiate_module`). Looks the requested specifier up
/// against the fixed registry; an unresolved specifier is a
/// programming/config error surfaced as a loader diagnostic by the
/// caller before instantiation is retried is never attempted (link
/// fails outright, per §4.2).
pub fn resolve_callback<'a>(
    context: v8::Local<'a, v8::Context>,
    specifier: v8::Local<'a, v8::String>,
    _import_assertions: v8::Local<'a, v8::FixedArray>,
    referrer: v8::Local<'a, v8::Module>,
) -> Option<v8::Local<'a, v8::Module>> {
    v8::callback_scope!(unsafe scope, context);
    let state_rc = crate::runtime::Runtime::state(scope);
    let state = state_rc.borrow();

    let specifier = specifier.to_rust_string_lossy(scope);

    match state.modules.resolve(&specifier) {
        Some(module) => Some(v8::Local::new(scope, module)),
        None => {
            let referrer_hash = referrer.get_identity_hash().get();
            let referrer_path = state
                .modules
                .by_specifier
                .iter()
                .find(|(_, m)| {
                    let local = v8::Local::new(scope, m.clone());
                    local.get_identity_hash().get() == referrer_hash
                })
                .map(|(p, _)| p.clone())
                .unwrap_or_else(|| "(unknown)".into());

            eprintln!(
                "SourceLink: unresolved import specifier '{specifier}' requested by '{referrer_path}'"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_exact_length() {
        let mut cursor = Cursor::new(b"hello world".to_vec());
        let s = read_exact_module(&mut cursor, 5).unwrap();
        assert_eq!(s, "hello");
    }

    #[test]
    fn short_read_fails() {
        let mut cursor = Cursor::new(b"hi".to_vec());
        assert!(read_exact_module(&mut cursor, 10).is_err());
    }

    #[test]
    fn registry_resolves_inserted_specifiers() {
        // Construction of actual v8::Global<v8::Module> requires a live
        // isolate; the registry's specifier bookkeeping is exercised
        // independently via `resolve`'s delegation to `get`, covered by
        // an empty-registry miss here.
        let registry = ModuleRegistry::new();
        assert!(registry.resolve("user.js").is_none());
        assert!(registry.resolve(BINDINGS_SPECIFIER).is_none());
    }
}
