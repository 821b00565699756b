use crate::bindings::create_object_under;
use crate::bindings::set_function_to;

/// Installs the `console` global (§4.9): `log`/`info`/`debug` to
/// stdout, `warn`/`error` to stderr.
pub fn initialize(scope: &mut v8::HandleScope, global: v8::Local<v8::Object>) {
    let console = create_object_under(scope, global, "console");

    set_function_to(scope, console, "log", |scope, args, rv| log_to(scope, args, rv, false));
    set_function_to(scope, console, "info", |scope, args, rv| log_to(scope, args, rv, false));
    set_function_to(scope, console, "debug", |scope, args, rv| log_to(scope, args, rv, false));
    set_function_to(scope, console, "warn", |scope, args, rv| log_to(scope, args, rv, true));
    set_function_to(scope, console, "error", |scope, args, rv| log_to(scope, args, rv, true));
}

fn log_to(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
    to_stderr: bool,
) {
    let mut visited: Vec<v8::Global<v8::Object>> = Vec::new();
    let mut parts = Vec::with_capacity(args.length() as usize);

    for i in 0..args.length() {
        parts.push(format_value(scope, args.get(i), &mut visited));
    }

    let line = parts.join(" ");

    if to_stderr {
        eprintln!("{line}");
    } else {
        println!("{line}");
    }

    rv.set_undefined();
}

fn identity_seen(
    scope: &mut v8::HandleScope,
    visited: &[v8::Global<v8::Object>],
    candidate: v8::Local<v8::Object>,
) -> bool {
    let hash = candidate.get_identity_hash().get();
    visited
        .iter()
        .any(|seen| v8::Local::new(scope, seen.clone()).get_identity_hash().get() == hash)
}

/// Recursively converts a value to its console source representation
/// (§4.9 Console formatting). `visited` threads an append-only,
/// never-popped list of already-seen objects through the recursion to
/// detect cycles, matching the original embedding's use of an ordered
/// object vector: two sibling references to the same (non-cyclic)
/// object are also reported as `<Circular>`, which is the original's
/// actual (if slightly surprising) behaviour.
pub fn format_value(
    scope: &mut v8::HandleScope,
    value: v8::Local<v8::Value>,
    visited: &mut Vec<v8::Global<v8::Object>>,
) -> String {
    if value.is_undefined() {
        return "undefined".to_string();
    }
    if value.is_null() {
        return "null".to_string();
    }
    if value.is_string() {
        return value.to_rust_string_lossy(scope);
    }

    if !value.is_object() {
        // Numbers, booleans, bigints, symbols at the top level: use the
        // engine's default string conversion.
        return value
            .to_string(scope)
            .map(|s| s.to_rust_string_lossy(scope))
            .unwrap_or_else(|| "<unprintable>".to_string());
    }

    let object = value.to_object(scope).unwrap();

    if identity_seen(scope, visited, object) {
        return "<Circular>".to_string();
    }
    visited.push(v8::Global::new(scope, object));

    if let Ok(array) = v8::Local::<v8::Array>::try_from(value) {
        return format_array(scope, array, visited);
    }
    if value.is_date() {
        return value
            .to_string(scope)
            .map(|s| s.to_rust_string_lossy(scope))
            .unwrap_or_default();
    }
    if value.is_native_error() {
        return value
            .to_string(scope)
            .map(|s| s.to_rust_string_lossy(scope))
            .unwrap_or_default();
    }
    if value.is_reg_exp() {
        return value
            .to_string(scope)
            .map(|s| s.to_rust_string_lossy(scope))
            .unwrap_or_default();
    }
    if let Ok(map) = v8::Local::<v8::Map>::try_from(value) {
        return format_map(scope, map, visited);
    }
    if let Ok(set) = v8::Local::<v8::Set>::try_from(value) {
        return format_set(scope, set, visited);
    }
    if let Ok(promise) = v8::Local::<v8::Promise>::try_from(value) {
        return format_promise(scope, promise, visited);
    }
    if value.is_weak_map() {
        return "WeakMap { <items unknown> }".to_string();
    }
    if value.is_weak_set() {
        return "WeakSet { <items unknown> }".to_string();
    }
    if value.is_function() {
        return "[object Function]".to_string();
    }

    format_plain_object(scope, object, visited)
}

fn format_array(
    scope: &mut v8::HandleScope,
    array: v8::Local<v8::Array>,
    visited: &mut Vec<v8::Global<v8::Object>>,
) -> String {
    let len = array.length();
    let mut items = Vec::with_capacity(len as usize);

    for i in 0..len {
        let item = array.get_index(scope, i).unwrap_or_else(|| v8::undefined(scope).into());
        items.push(format_value(scope, item, visited));
    }

    format!("[ {} ]", items.join(", "))
        .replace("[  ]", "[]")
}

fn format_map(
    scope: &mut v8::HandleScope,
    map: v8::Local<v8::Map>,
    visited: &mut Vec<v8::Global<v8::Object>>,
) -> String {
    let size = map.size();
    let entries = map.as_array(scope);
    let len = entries.length();

    let mut parts = Vec::new();
    let mut i = 0;
    while i < len {
        let key = entries.get_index(scope, i).unwrap_or_else(|| v8::undefined(scope).into());
        let value = entries
            .get_index(scope, i + 1)
            .unwrap_or_else(|| v8::undefined(scope).into());
        let key = format_value(scope, key, visited);
        let value = format_value(scope, value, visited);
        parts.push(format!("{key} => {value}"));
        i += 2;
    }

    format!("Map({size}) {{ {} }}", parts.join(", "))
}

fn format_set(
    scope: &mut v8::HandleScope,
    set: v8::Local<v8::Set>,
    visited: &mut Vec<v8::Global<v8::Object>>,
) -> String {
    let size = set.size();
    let entries = set.as_array(scope);
    let len = entries.length();

    let mut parts = Vec::with_capacity(len as usize);
    for i in 0..len {
        let item = entries.get_index(scope, i).unwrap_or_else(|| v8::undefined(scope).into());
        parts.push(format_value(scope, item, visited));
    }

    format!("Set({size}) {{ {} }}", parts.join(", "))
}

fn format_promise(
    scope: &mut v8::HandleScope,
    promise: v8::Local<v8::Promise>,
    visited: &mut Vec<v8::Global<v8::Object>>,
) -> String {
    match promise.state() {
        v8::PromiseState::Pending => "Promise { <pending> }".to_string(),
        v8::PromiseState::Fulfilled => {
            let value = promise.result(scope);
            format!("Promise {{ {} }}", format_value(scope, value, visited))
        }
        v8::PromiseState::Rejected => {
            let value = promise.result(scope);
            format!("Promise {{ <rejected> {} }}", format_value(scope, value, visited))
        }
    }
}

fn format_plain_object(
    scope: &mut v8::HandleScope,
    object: v8::Local<v8::Object>,
    visited: &mut Vec<v8::Global<v8::Object>>,
) -> String {
    let args = v8::GetPropertyNamesArgsBuilder::new()
        .mode(v8::KeyCollectionMode::OwnOnly)
        .property_filter(v8::PropertyFilter::ALL_PROPERTIES)
        .index_filter(v8::IndexFilter::IncludeIndices)
        .key_conversion(v8::KeyConversionMode::KeepNumbers)
        .build();

    let keys = match object.get_own_property_names(scope, args) {
        Some(keys) => keys,
        None => return "{}".to_string(),
    };

    let len = keys.length();
    if len == 0 {
        return "{}".to_string();
    }

    let mut parts = Vec::with_capacity(len as usize);
    for i in 0..len {
        let key = match keys.get_index(scope, i) {
            Some(key) => key,
            None => continue,
        };

        let value = object.get(scope, key).unwrap_or_else(|| v8::undefined(scope).into());

        let key_str = if key.is_symbol() {
            format_value(scope, key, visited)
        } else {
            key.to_rust_string_lossy(scope)
        };

        parts.push(format!("{key_str}: {}", format_value(scope, value, visited)));
    }

    format!("{{ {} }}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    // Formatting against a live isolate (primitives, arrays, and the
    // cycle-detection path) is covered by the console scenario in
    // `scenarios.rs`, which drives `format_value` through a real
    // `console.log` call. Pure string-munging helpers with no v8
    // dependency are tested here.

    #[test]
    fn empty_array_collapses_brackets() {
        assert_eq!("[ ]".replace("[  ]", "[]"), "[ ]");
        assert_eq!("[  ]".replace("[  ]", "[]"), "[]");
    }
}
