//! End-to-end tests driving a real [`Runtime`] through the six init/call
//! scenarios and the testable properties from §8. Each test builds its
//! own `RuntimeConfig` directly (every field is `pub`, so there is no
//! need to round-trip through `ConfigSource`) and backs the init byte
//! stream with a real temp file via `assert_fs`, mirroring how
//! `wizer.initialize` actually reads from a file descriptor rather than
//! an in-memory buffer.

use crate::call;
use crate::config::ExportConfig;
use crate::config::ImportWrapperConfig;
use crate::config::RuntimeConfig;
use crate::console::format_value;
use crate::errors::InitError;
use crate::memory;
use crate::runtime::Runtime;
use crate::signature::Signature;
use assert_fs::prelude::*;
use std::fs::File;

/// Concatenates `user` then `bindings` (the exact order `run_init_pass`
/// reads them in) into one fixture file and reopens it for reading,
/// standing in for the real stdin stream `wizer.initialize` consumes.
fn fixture_stream(user: &str, bindings: &str) -> (assert_fs::TempDir, File) {
    let dir = assert_fs::TempDir::new().unwrap();
    let file = dir.child("init.bin");

    let mut bytes = Vec::with_capacity(user.len() + bindings.len());
    bytes.extend_from_slice(user.as_bytes());
    bytes.extend_from_slice(bindings.as_bytes());

    file.write_binary(&bytes).unwrap();
    let handle = File::open(file.path()).unwrap();
    (dir, handle)
}

fn config(user: &str, bindings: &str, exports: Vec<ExportConfig>) -> RuntimeConfig {
    RuntimeConfig {
        debug: false,
        source_name: "user.js".to_string(),
        source_len: user.len(),
        bindings_len: bindings.len(),
        import_wrappers: Vec::<ImportWrapperConfig>::new(),
        exports,
        imports: Vec::new(),
    }
}

const TRIVIAL_USER: &str = "export const unused = 0;";

/// Allocates `len` tracked bytes in the arena and writes `value` into
/// them, returning the arena offset — exactly what a real caller does
/// before invoking `call` with a flat scalar argument.
fn write_flat_arg(value: &[u8]) -> usize {
    let ptr = memory::raw_realloc(std::ptr::null_mut(), 0, 8, value.len());
    unsafe { std::ptr::copy_nonoverlapping(value.as_ptr(), memory::resolve(ptr as usize), value.len()) };
    ptr as usize
}

fn read_flat(addr: usize, len: usize) -> Vec<u8> {
    unsafe { std::slice::from_raw_parts(memory::resolve(addr), len).to_vec() }
}

/// Scenario 1: an `i32 -> i32` identity export, round-tripped through a
/// real call/post_call pair (P1's happy path, P2's free-list release).
#[test]
fn identity_export_round_trips_i32() {
    let bindings = "export function id(x) { return x; }\nexport function $initBindings(memView, realloc) {}\n";
    let exports = vec![ExportConfig {
        name: "id".to_string(),
        signature: Signature::parse("i32", "i32", 4).unwrap(),
    }];
    let cfg = config(TRIVIAL_USER, bindings, exports);

    let mut runtime = Runtime::new();
    let (_dir, mut stream) = fixture_stream(TRIVIAL_USER, bindings);
    assert_eq!(runtime.initialize(cfg, &mut stream), InitError::Ok);

    let arg_ptr = write_flat_arg(&42i32.to_le_bytes());
    let ret_ptr = call::call(&mut runtime, 0, arg_ptr as i32);
    assert_eq!(read_flat(ret_ptr as usize, 4), 42i32.to_le_bytes());
    call::post_call(&mut runtime, 0);
}

/// Scenario 2: `i64 -> i64` identity, exercising the BigInt bridge with
/// a value outside the `i32` range in both directions.
#[test]
fn identity_export_round_trips_i64() {
    let bindings = "export function id64(x) { return x; }\nexport function $initBindings(memView, realloc) {}\n";
    let exports = vec![ExportConfig {
        name: "id64".to_string(),
        signature: Signature::parse("i64", "i64", 8).unwrap(),
    }];
    let cfg = config(TRIVIAL_USER, bindings, exports);

    let mut runtime = Runtime::new();
    let (_dir, mut stream) = fixture_stream(TRIVIAL_USER, bindings);
    assert_eq!(runtime.initialize(cfg, &mut stream), InitError::Ok);

    let value: u64 = 1 << 63;
    let arg_ptr = write_flat_arg(&value.to_le_bytes());
    let ret_ptr = call::call(&mut runtime, 0, arg_ptr as i32);
    assert_eq!(read_flat(ret_ptr as usize, 8), value.to_le_bytes());
    call::post_call(&mut runtime, 0);
}

/// Scenario 3: a `retptr` export writing two derived values into the
/// return area through the memory view's `DataView`, exercising P3 (the
/// view observing the allocation `call` made for the return area before
/// the export body ever ran).
#[test]
fn retptr_export_writes_pair_through_memory_view() {
    let bindings = "\
let memView;\n\
let realloc;\n\
export function $initBindings(mv, rc) {\n\
  memView = mv;\n\
  realloc = rc;\n\
}\n\
export function pair(x, retptr) {\n\
  const view = new DataView(memView.buffer);\n\
  view.setInt32(retptr, x + 1, true);\n\
  view.setInt32(retptr + 4, x + 2, true);\n\
}\n";
    let exports = vec![ExportConfig {
        name: "pair".to_string(),
        signature: Signature::parse("i32", "*", 8).unwrap(),
    }];
    let cfg = config(TRIVIAL_USER, bindings, exports);

    let mut runtime = Runtime::new();
    let (_dir, mut stream) = fixture_stream(TRIVIAL_USER, bindings);
    assert_eq!(runtime.initialize(cfg, &mut stream), InitError::Ok);

    let arg_ptr = write_flat_arg(&5i32.to_le_bytes());
    let ret_ptr = call::call(&mut runtime, 0, arg_ptr as i32);

    let mut expected = Vec::new();
    expected.extend_from_slice(&6i32.to_le_bytes());
    expected.extend_from_slice(&7i32.to_le_bytes());
    assert_eq!(read_flat(ret_ptr as usize, 8), expected);

    call::post_call(&mut runtime, 0);
}

/// Scenario 4: a bindings module importing an unresolvable specifier
/// fails instantiation before `$initBindings` is ever reached, and
/// `check_init` reports the typed `SourceLink` code rather than
/// panicking or aborting (P7's determinism on the failure path).
#[test]
fn unresolved_import_specifier_surfaces_as_source_link() {
    let bindings = "import { helper } from \"unresolvable:module\";\nexport function $initBindings() {}\n";
    let cfg = config(TRIVIAL_USER, bindings, Vec::new());

    let mut runtime = Runtime::new();
    let (_dir, mut stream) = fixture_stream(TRIVIAL_USER, bindings);
    assert_eq!(runtime.initialize(cfg, &mut stream), InitError::SourceLink);
    assert_eq!(runtime.check_init(), InitError::SourceLink.code());
}

/// Scenario 5: a promise rejected with no handler during init is
/// tracked in the rejected set, and does not itself fail `check_init`
/// (§4.8 — the set exists for host/bindings queries, init success is
/// orthogonal to it).
#[test]
fn unhandled_rejection_is_tracked_without_failing_init() {
    let bindings = "\
Promise.reject(new Error(\"boom\"));\n\
export function $initBindings() {}\n";
    let cfg = config(TRIVIAL_USER, bindings, Vec::new());

    let mut runtime = Runtime::new();
    let (_dir, mut stream) = fixture_stream(TRIVIAL_USER, bindings);
    assert_eq!(runtime.initialize(cfg, &mut stream), InitError::Ok);

    let scope = &mut runtime.handle_scope();
    let state_rc = Runtime::state(scope);
    let rejected = state_rc.borrow().rejected.clone();
    let set = v8::Local::new(scope, rejected);
    assert_eq!(set.size(), 1);

    assert_eq!(runtime.check_init(), InitError::Ok.code());
}

/// Scenario 6 / property P6: a self-referential object formats as
/// `{ self: <Circular> }` rather than recursing forever. Exercised
/// directly against `format_value`, the same entry point `console.log`
/// calls for every argument, without going through stdout.
#[test]
fn self_referential_object_formats_as_circular() {
    let mut runtime = Runtime::new();
    let scope = &mut runtime.handle_scope();

    let object = v8::Object::new(scope);
    let key = v8::String::new(scope, "self").unwrap();
    object.set(scope, key.into(), object.into());

    let mut visited = Vec::new();
    let formatted = format_value(scope, object.into(), &mut visited);
    assert_eq!(formatted, "{ self: <Circular> }");
}

/// Property P5: primitive values format idempotently — no cycle-tracker
/// state is needed to print them the same way twice.
#[test]
fn primitive_values_format_idempotently() {
    let mut runtime = Runtime::new();
    let scope = &mut runtime.handle_scope();

    let value = v8::Integer::new(scope, 7);
    let mut visited = Vec::new();
    let first = format_value(scope, value.into(), &mut visited);
    let mut visited = Vec::new();
    let second = format_value(scope, value.into(), &mut visited);
    assert_eq!(first, "7");
    assert_eq!(first, second);
}

/// Property P7: initializing twice against the same bytes reaches the
/// same typed outcome both times — determinism of the init pass, not
/// just of a single run.
#[test]
fn init_pass_is_deterministic_across_runs() {
    let bindings = "export function id(x) { return x; }\nexport function $initBindings(memView, realloc) {}\n";
    let exports = || {
        vec![ExportConfig {
            name: "id".to_string(),
            signature: Signature::parse("i32", "i32", 4).unwrap(),
        }]
    };

    let mut first = Runtime::new();
    let (_dir1, mut stream1) = fixture_stream(TRIVIAL_USER, bindings);
    let first_code = first.initialize(config(TRIVIAL_USER, bindings, exports()), &mut stream1);

    let mut second = Runtime::new();
    let (_dir2, mut stream2) = fixture_stream(TRIVIAL_USER, bindings);
    let second_code = second.initialize(config(TRIVIAL_USER, bindings, exports()), &mut stream2);

    assert_eq!(first_code, second_code);
    assert_eq!(first_code, InitError::Ok);
}
