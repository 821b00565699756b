mod bindings;
mod builtins;
mod call;
mod config;
mod console;
mod errors;
mod exports;
mod imports;
mod memory;
mod modules;
mod promise;
mod runtime;
#[cfg(test)]
mod scenarios;
mod signature;

use config::ProcessEnv;
use config::RuntimeConfig;
use errors::InitError;
use runtime::Runtime;
use std::io::Read;

// Re-exported so the four sample functions and the BigInt bridge are
// visible as top-level `#[no_mangle]` symbols of this crate, per §6.
pub use imports::coreabi_sample_f32;
pub use imports::coreabi_sample_f64;
pub use imports::coreabi_sample_i32;
pub use imports::coreabi_sample_i64;

/// The process-wide singleton (§9 Design Notes: "a single struct
/// threaded through the ABI entry points"). The ABI surface is a set
/// of free-standing `extern "C"` exports with no context parameter, so
/// there is nowhere else to put it; §1's Non-goals rule out
/// multi-tenancy and call re-entrancy, which is what makes a bare
/// `static mut` acceptable here — exactly one thread ever calls into
/// this module, one call at a time.
static mut RUNTIME: Option<Runtime> = None;

fn with_runtime<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
    unsafe {
        let runtime = RUNTIME.get_or_insert_with(Runtime::new);
        f(runtime)
    }
}

/// One-shot init (§4.6, §6). Invoked exactly once by the snapshotting
/// tool before the heap is frozen.
#[no_mangle]
#[export_name = "wizer.initialize"]
pub extern "C" fn wizer_initialize() {
    let source = ProcessEnv;
    let config = match RuntimeConfig::read(&source) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("wizer.initialize: {e:?}");
            // No config to run the init pass against, but `check_init`
            // still needs a typed code to report instead of finding an
            // uninitialized runtime (§4.1).
            with_runtime(|runtime| runtime.record_init_error(InitError::TypeParse));
            return;
        }
    };

    let mut stdin = std::io::stdin().lock();
    with_runtime(|runtime| {
        runtime.initialize(config, &mut stdin as &mut dyn Read);
    });
}

/// `check_init() -> i32` (§6).
#[no_mangle]
pub extern "C" fn check_init() -> i32 {
    with_runtime(|runtime| runtime.check_init())
}

/// `call(export_index, arg_ptr) -> i32` (§6, §4.7).
#[no_mangle]
pub extern "C" fn call(export_index: i32, arg_ptr: i32) -> i32 {
    with_runtime(|runtime| call::call(runtime, export_index as u32, arg_ptr))
}

/// `post_call(export_index) -> ()` (§6, §4.7).
#[no_mangle]
pub extern "C" fn post_call(export_index: i32) {
    with_runtime(|runtime| call::post_call(runtime, export_index as u32));
}

/// The standard component-style reallocator, tracked (§4.3, §6).
/// JS-side code reaches the identical behaviour through the `realloc`
/// function installed on `$bindings[1]` (`memory::js_realloc`); this
/// is the ABI-side entry point for the host/caller.
#[no_mangle]
pub extern "C" fn cabi_realloc(ptr: i32, old_size: i32, align: i32, new_size: i32) -> i32 {
    let result = memory::raw_realloc(ptr as *mut u8, old_size as usize, align as usize, new_size as usize);

    if !result.is_null() {
        with_runtime(|runtime| {
            let scope = &mut runtime.handle_scope();
            let state_rc = Runtime::state(scope);
            state_rc.borrow_mut().call.free_list.push(result as usize);
        });
    }

    result as i32
}

/// The untracked variant: identical allocation behaviour, but the
/// returned address is never appended to the Call State free-list
/// (§6). Used by callers managing their own lifetime outside of a
/// single `call`/`post_call` pair — notably the `retptr` return-area
/// allocation in `call.rs`, which allocates directly via
/// [`memory::raw_realloc`] rather than through this export.
#[no_mangle]
pub extern "C" fn cabi_realloc_adapter(ptr: i32, old_size: i32, align: i32, new_size: i32) -> i32 {
    memory::raw_realloc(ptr as *mut u8, old_size as usize, align as usize, new_size as usize) as i32
}

/// Splicer anchor (§4.4, §6): confirms a constructed import wrapper
/// exists at `idx` so post-compilation rewriting has a stable call
/// site to locate and a way to check its presence. `argcnt`/`name` are
/// accepted to match the declared signature; this flat ABI has no way
/// to hand back a real function pointer (there is no linear-memory
/// code segment to point into outside of the real wasm artifact the
/// splicer rewrites), so the return value is a 1-based presence handle
/// — 0 means "no such import" — rather than an address.
#[no_mangle]
pub extern "C" fn coreabi_get_import(idx: i32, argcnt: i32, name: i32) -> i32 {
    let _ = (argcnt, name);

    with_runtime(|runtime| {
        let scope = &mut runtime.handle_scope();
        let state_rc = Runtime::state(scope);
        let state = state_rc.borrow();

        if (idx as usize) < state.import_wrappers.len() {
            idx + 1
        } else {
            0
        }
    })
}

/// Round-trips a raw 64-bit value through the engine's BigInt type,
/// mirroring the validation [`call::call`] performs on every I64
/// argument/return (§4.4, §7): aborts if the value doesn't survive the
/// round trip. Exposed as a flat-ABI pair so splicer-generated glue —
/// which can only call `extern "C"` functions, not ones taking
/// `v8::Local` types — can reach the same bridge the runtime uses
/// internally.
#[no_mangle]
pub extern "C" fn coreabi_to_bigint64(value: i64) -> i64 {
    with_runtime(|runtime| {
        let scope = &mut runtime.handle_scope();
        let bigint = imports::to_bigint64(scope, value as u64);
        imports::from_bigint64(scope, bigint) as i64
    })
}

#[no_mangle]
pub extern "C" fn coreabi_from_bigint64(value: i64) -> i64 {
    coreabi_to_bigint64(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untracked_realloc_does_not_touch_free_list() {
        // cabi_realloc_adapter never consults RuntimeState, so it is
        // exercised directly against the allocator without a live
        // isolate.
        let ptr = cabi_realloc_adapter(0, 0, 8, 16);
        assert_ne!(ptr, 0);
        let freed = cabi_realloc_adapter(ptr, 16, 8, 0);
        assert_eq!(freed, 0);
    }
}
