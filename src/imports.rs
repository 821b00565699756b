use crate::bindings::throw_type_error;

/// The prime multiplier marking the boundary between the "get" half and
/// the "set" half of the compiled code the splicer derives from the i32
/// sample (§4.4).
pub const SAMPLE_MARKER: i32 = 32771;

/// Constructs the JS function object for one declared import. The
/// function's real dispatch body is installed post-compilation by the
/// splicer; until then, calling it throws. This constructor must not be
/// inlined — the splicer locates its call site in the compiled artifact
/// to know where an import wrapper is being built (§4.4).
#[inline(never)]
pub fn make_import_wrapper<'s>(
    scope: &mut v8::HandleScope<'s>,
    index: u32,
    arity: u32,
    name: &str,
) -> v8::Local<'s, v8::Function> {
    let data = v8::Integer::new(scope, index as i32);
    let builder = v8::FunctionBuilder::new(import_stub).data(data.into());
    let function = v8::FunctionBuilder::<v8::Function>::build(builder, scope).unwrap();

    let name_str = v8::String::new(scope, name).unwrap();
    function.set_name(name_str);

    let _ = arity; // recorded in the declared Import, not on the function object itself.
    function
}

/// Placeholder body for an import wrapper prior to splicing.
fn import_stub(scope: &mut v8::HandleScope, _args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    throw_type_error(
        scope,
        "this import has not been spliced with its generated dispatch code",
    );
}

/// One "sample" function per `CoreType`, used by the splicer as a
/// template for generating per-import get/set dispatch code. Each reads
/// exactly one argument of the matching type and returns a value of the
/// same type; the i32 sample's multiplier is the discriminating marker
/// described in §4.4.
#[no_mangle]
#[inline(never)]
pub extern "C" fn coreabi_sample_i32(arg0: i32) -> i32 {
    arg0.wrapping_mul(SAMPLE_MARKER)
}

#[no_mangle]
#[inline(never)]
pub extern "C" fn coreabi_sample_i64(arg1: i64) -> i64 {
    arg1
}

#[no_mangle]
#[inline(never)]
pub extern "C" fn coreabi_sample_f32(arg2: f32) -> f32 {
    arg2
}

#[no_mangle]
#[inline(never)]
pub extern "C" fn coreabi_sample_f64(arg3: f64) -> f64 {
    arg3
}

/// Bridges an engine `BigInt` to an unsigned 64-bit integer. Aborts if
/// the value does not round-trip (§4.4).
pub fn from_bigint64(_scope: &mut v8::HandleScope, value: v8::Local<v8::BigInt>) -> u64 {
    let (bits, lossless) = value.u64_value();
    if !lossless {
        eprintln!("coreabi_from_bigint64: value does not fit in an unsigned 64-bit integer");
        std::process::abort();
    }
    bits
}

/// Bridges an unsigned 64-bit integer into an engine `BigInt`.
pub fn to_bigint64<'s>(scope: &mut v8::HandleScope<'s>, value: u64) -> v8::Local<'s, v8::BigInt> {
    v8::BigInt::new_from_u64(scope, value)
}

/// A `#[used]` anchor keeping the four sample functions (and the import
/// getter's dependency on them as call targets) reachable through whole
/// program optimisation, since nothing in this crate calls them
/// directly — the splicer is the only intended caller (§4.4, §9).
#[used]
static KEEP_SAMPLES_ALIVE: [extern "C" fn(i32) -> i32; 1] = [coreabi_sample_i32];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_sample_applies_marker() {
        assert_eq!(coreabi_sample_i32(2), 2 * SAMPLE_MARKER);
    }

    #[test]
    fn other_samples_are_identity() {
        assert_eq!(coreabi_sample_i64(42), 42);
        assert_eq!(coreabi_sample_f32(1.5), 1.5);
        assert_eq!(coreabi_sample_f64(2.5), 2.5);
    }
}
