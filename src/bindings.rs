use std::ffi::c_void;

/// Adds a read-only property with the given name and value, into the
/// given object.
pub fn set_constant_to(
    scope: &mut v8::HandleScope<'_>,
    target: v8::Local<v8::Object>,
    name: &str,
    value: v8::Local<v8::Value>,
) {
    let key = v8::String::new(scope, name).unwrap();
    target.define_own_property(scope, key.into(), value, v8::PropertyAttribute::READ_ONLY);
}

/// Adds a `Function` object which calls the given Rust function.
pub fn set_function_to(
    scope: &mut v8::HandleScope<'_>,
    target: v8::Local<v8::Object>,
    name: &str,
    callback: impl v8::MapFnTo<v8::FunctionCallback>,
) {
    let key = v8::String::new(scope, name).unwrap();
    let template = v8::FunctionTemplate::new(scope, callback);
    let val = template.get_function(scope).unwrap();

    target.set(scope, key.into(), val.into());
}

/// Adds a getter-only accessor property, backed by a Rust function, to
/// the given object. Used for the memory view's `buffer` property.
pub fn set_accessor_to(
    scope: &mut v8::HandleScope<'_>,
    target: v8::Local<v8::Object>,
    name: &str,
    getter: impl v8::MapFnTo<v8::AccessorNameGetterCallback>,
) {
    let key = v8::String::new(scope, name).unwrap();
    target.set_accessor(scope, key.into(), getter);
}

/// Creates a plain object with a given name under a `target` object.
pub fn create_object_under<'s>(
    scope: &mut v8::HandleScope<'s>,
    target: v8::Local<v8::Object>,
    name: &str,
) -> v8::Local<'s, v8::Object> {
    let template = v8::ObjectTemplate::new(scope);
    let key = v8::String::new(scope, name).unwrap();
    let value = template.new_instance(scope).unwrap();

    target.set(scope, key.into(), value.into());
    value
}

/// Stores a Rust value inside a v8 object's internal field. The object
/// must have been created from a template reserving at least
/// `index + 1` internal field slots.
pub fn set_internal_ref<T>(
    scope: &mut v8::HandleScope<'_>,
    target: v8::Local<v8::Object>,
    index: usize,
    data: T,
) {
    let boxed_ref = Box::new(data);
    let addr = Box::leak(boxed_ref) as *mut T as *mut c_void;
    let v8_ext = v8::External::new(scope, addr);

    target.set_internal_field(index, v8_ext.into());
}

/// Retrieves a previously stored Rust value from a v8 object.
pub fn get_internal_ref<'s, T>(
    scope: &mut v8::HandleScope<'s>,
    source: v8::Local<v8::Object>,
    index: usize,
) -> &'s mut T {
    let v8_ref = source.get_internal_field(scope, index).unwrap();
    let stored_item = unsafe { v8::Local::<v8::External>::cast(v8_ref) };
    let stored_item = stored_item.value() as *mut T;

    unsafe { &mut *stored_item }
}

/// Throws a v8 `Error` exception with the given message.
pub fn throw_exception(scope: &mut v8::HandleScope, message: &str) {
    let message = v8::String::new(scope, message).unwrap();
    let exception = v8::Exception::error(scope, message);
    scope.throw_exception(exception);
}

/// Throws a v8 `TypeError` exception with the given message.
pub fn throw_type_error(scope: &mut v8::HandleScope, message: &str) {
    let message = v8::String::new(scope, message).unwrap();
    let exception = v8::Exception::type_error(scope, message);
    scope.throw_exception(exception);
}
