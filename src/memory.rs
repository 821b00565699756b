use crate::runtime::Runtime;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Once;

/// Size of the fixed arena backing every "linear memory address" this
/// crate hands out. A real wasm32 artifact addresses an actual bounded
/// linear memory starting at offset 0; this native build has no such
/// thing, so it carves one out of the process heap instead and treats
/// offsets into it as the addresses crossing the ABI. 64 MiB is far
/// more than any of this crate's own test fixtures need and comfortably
/// fits every offset in the `i32` the ABI actually uses.
const ARENA_SIZE: usize = 64 * 1024 * 1024;

static ARENA_INIT: Once = Once::new();
static mut ARENA_BASE: *mut u8 = std::ptr::null_mut();

/// Lazily reserves the arena and returns its base pointer. The
/// allocation is leaked deliberately: it backs every linear-memory
/// address for the lifetime of the process, exactly like a wasm
/// module's memory never gets returned to the host mid-run.
fn arena_base() -> *mut u8 {
    ARENA_INIT.call_once(|| {
        let boxed = vec![0u8; ARENA_SIZE].into_boxed_slice();
        unsafe { ARENA_BASE = Box::leak(boxed).as_mut_ptr() };
    });
    unsafe { ARENA_BASE }
}

/// Translates an arena offset (the address value as seen by the ABI
/// and by JS) into a real, dereferenceable pointer. Every caller that
/// directly reads or writes bytes at a `raw_realloc`-issued address —
/// not just `memory.rs` itself — must go through this; the returned
/// `*mut u8` values from `raw_realloc`/`release`/`js_realloc` are arena
/// offsets, not real pointers.
pub(crate) fn resolve(offset: usize) -> *mut u8 {
    unsafe { arena_base().add(offset) }
}

/// The highest offset ever handed out by the reallocator, standing in
/// for the component's program break. On a real wasm build this would
/// instead be observed through the `sbrk` primitive (external
/// collaborator, out of scope per spec.md §1); this process-local
/// high-water mark lets the freshness invariant (P3) be exercised
/// outside of a wasm linear memory.
static LAST_BREAK: AtomicUsize = AtomicUsize::new(0);

/// Returns the current program break, as observed by the Memory Bridge.
pub fn current_break() -> usize {
    LAST_BREAK.load(Ordering::SeqCst)
}

fn bump_break(candidate: usize) {
    LAST_BREAK.fetch_max(candidate, Ordering::SeqCst);
}

/// Every allocation this reallocator hands out is prefixed with an
/// 8-byte header recording its size, so that `post_call`'s free-list
/// (which the spec defines as a bare set of addresses, §3 Call State)
/// can release an address without the caller re-supplying `old_size`.
/// The header slot also fixes this allocator's effective alignment at
/// 8 bytes, which comfortably covers every `CoreType` (§3); a
/// requested `align` beyond that is not supported.
const HEADER: usize = 8;

static CURSOR: AtomicUsize = AtomicUsize::new(0);

fn bump(total: usize) -> usize {
    let start = CURSOR.fetch_add(total, Ordering::SeqCst);
    if start + total > ARENA_SIZE {
        eprintln!("cabi_realloc: linear memory arena exhausted");
        std::process::abort();
    }
    start
}

/// The one legal way for either side of the ABI to allocate memory used
/// across the boundary (§4.3). Hands out offsets into the fixed arena
/// above, standing in for the engine's own heap reallocator (in the
/// real artifact, engine heap and component linear memory are the same
/// wasm address space). Aborts the process on arena exhaustion, per §7.
/// `old_size` is accepted to match the declared ABI signature but is
/// not trusted; the real old size is read back from the header.
///
/// This is a bump allocator: freed space is never reclaimed, which
/// matches a linear-memory program break that only ever grows — the
/// same invariant [`current_break`] exposes to the Memory View.
pub fn raw_realloc(ptr: *mut u8, old_size: usize, align: usize, new_size: usize) -> *mut u8 {
    let _ = (old_size, align);
    let offset = ptr as usize;

    if new_size == 0 {
        return std::ptr::null_mut();
    }

    unsafe {
        let block = bump(HEADER + new_size);
        let data_offset = block + HEADER;

        std::ptr::write(resolve(block) as *mut usize, new_size);

        if offset != 0 {
            let old_stored = std::ptr::read(resolve(offset - HEADER) as *const usize);
            std::ptr::copy_nonoverlapping(resolve(offset), resolve(data_offset), old_stored.min(new_size));
        }

        bump_break(data_offset + new_size);
        data_offset as *mut u8
    }
}

/// Releases a single tracked address via the same reallocator (§4.3
/// Free discipline). Thin wrapper kept distinct from [`raw_realloc`] so
/// `post_call`'s free-list drain reads as "release", not "realloc to
/// zero".
pub fn release(addr: usize) {
    raw_realloc(addr as *mut u8, 0, HEADER, 0);
}

/// The JS-visible `realloc` function: `(ptr, old_size, align, new_size) -> i32`.
/// Behaviourally identical to [`raw_realloc`]; every non-null result is
/// appended to the in-flight call's free-list (§4.3), matching the
/// tracked `cabi_realloc` semantics so JS and ABI callers share one
/// accounting discipline.
pub fn js_realloc(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    let ptr = args.get(0).int32_value(scope).unwrap_or(0);
    let old_size = args.get(1).uint32_value(scope).unwrap_or(0);
    let align = args.get(2).uint32_value(scope).unwrap_or(1);
    let new_size = args.get(3).uint32_value(scope).unwrap_or(0);

    let result = raw_realloc(ptr as *mut u8, old_size as usize, align as usize, new_size as usize);

    if !result.is_null() {
        let state_rc = Runtime::state(scope);
        state_rc.borrow_mut().call.free_list.push(result as usize);
    }

    rv.set_int32(result as i32);
}

/// The memory-view getter: mints a fresh `ArrayBuffer` spanning
/// `[0, current_break)` of the arena whenever the break has grown since
/// the last observation (§4.3 Memory View invariant / P3).
pub fn memory_view_getter(
    scope: &mut v8::HandleScope,
    _key: v8::Local<v8::Name>,
    _args: v8::PropertyCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    let state_rc = Runtime::state(scope);
    let observed_break = current_break();

    let needs_refresh = {
        let state = state_rc.borrow();
        state.memory_view.last_break != observed_break || state.memory_view.buffer.is_none()
    };

    if needs_refresh {
        // The backing base is the arena's own real pointer, mirroring
        // the original embedding's `JS::NewArrayBufferWithUserOwnedContents`:
        // in a wasm32 component the engine and the component share one
        // linear memory starting at offset 0, so the view's base is the
        // module's own address space, not a null-pointer dereference.
        let backing_store = unsafe {
            v8::ArrayBuffer::new_backing_store_from_ptr(
                arena_base() as *mut std::ffi::c_void,
                observed_break,
                |_, _, _| {},
                std::ptr::null_mut(),
            )
        };
        let buffer = v8::ArrayBuffer::with_backing_store(scope, &backing_store.make_shared());
        let global_buffer = v8::Global::new(scope, buffer);

        let mut state = state_rc.borrow_mut();
        state.memory_view.buffer = Some(global_buffer);
        state.memory_view.last_break = observed_break;
    }

    let state = state_rc.borrow();
    let buffer = state.memory_view.buffer.clone().unwrap();
    let local = v8::Local::new(scope, buffer);
    rv.set(local.into());
}

/// Persistent state backing the Memory View object (§3).
#[derive(Default)]
pub struct MemoryView {
    pub buffer: Option<v8::Global<v8::ArrayBuffer>>,
    pub last_break: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_then_shrink_to_zero_frees() {
        let ptr = raw_realloc(std::ptr::null_mut(), 0, 4, 16);
        assert!(!ptr.is_null());
        let freed = raw_realloc(ptr, 16, 4, 0);
        assert!(freed.is_null());
    }

    #[test]
    fn break_only_grows() {
        let before = current_break();
        let ptr = raw_realloc(std::ptr::null_mut(), 0, 4, 64);
        let after = current_break();
        assert!(after >= before + 64 || after >= ptr as usize + 64);
    }

    #[test]
    fn offsets_fit_comfortably_in_i32() {
        let ptr = raw_realloc(std::ptr::null_mut(), 0, 4, 8);
        assert!((ptr as usize) < i32::MAX as usize);
    }

    #[test]
    fn grown_allocation_preserves_prefix() {
        let ptr = raw_realloc(std::ptr::null_mut(), 0, 4, 4);
        unsafe { std::ptr::copy_nonoverlapping(42i32.to_le_bytes().as_ptr(), resolve(ptr as usize), 4) };
        let grown = raw_realloc(ptr, 4, 4, 8);
        let bytes = unsafe { std::slice::from_raw_parts(resolve(grown as usize), 4) };
        assert_eq!(i32::from_le_bytes(bytes.try_into().unwrap()), 42);
    }
}
