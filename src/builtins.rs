use crate::bindings::get_internal_ref;
use crate::bindings::set_constant_to;
use crate::bindings::set_internal_ref;
use crate::bindings::throw_type_error;

/// Installs `TextEncoder`, `TextDecoder`, and `URL` on the global object,
/// alongside `console` (installed separately by `console::initialize`).
/// UTF-8 only; no options objects are honoured (§4.9).
pub fn initialize(scope: &mut v8::HandleScope, global: v8::Local<v8::Object>) {
    install_text_encoder(scope, global);
    install_text_decoder(scope, global);
    install_url(scope, global);
}

fn install_text_encoder(scope: &mut v8::HandleScope, global: v8::Local<v8::Object>) {
    let template = v8::FunctionTemplate::new(scope, text_encoder_ctor);
    let name = v8::String::new(scope, "TextEncoder").unwrap();
    template.set_class_name(name);

    let instance_template = template.instance_template(scope);
    let encode_key = v8::String::new(scope, "encode").unwrap();
    let encode_fn = v8::FunctionTemplate::new(scope, text_encoder_encode);
    instance_template.set(encode_key.into(), encode_fn.into());

    let ctor = template.get_function(scope).unwrap();
    let key = v8::String::new(scope, "TextEncoder").unwrap();
    global.set(scope, key.into(), ctor.into());
}

fn text_encoder_ctor(
    scope: &mut v8::HandleScope,
    _args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    let this = v8::Object::new(scope);
    let encoding_val = v8::String::new(scope, "utf-8").unwrap();
    set_constant_to(scope, this, "encoding", encoding_val.into());
    rv.set(this.into());
}

fn text_encoder_encode(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    let input = if args.length() > 0 {
        args.get(0).to_rust_string_lossy(scope)
    } else {
        String::new()
    };

    let bytes = input.into_bytes();
    let len = bytes.len();

    let backing_store = v8::ArrayBuffer::new_backing_store(scope, len).make_shared();
    unsafe {
        let dest = backing_store.data().map(|p| p.as_ptr() as *mut u8);
        if let Some(dest) = dest {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dest, len);
        }
    }
    let buffer = v8::ArrayBuffer::with_backing_store(scope, &backing_store);
    let array = v8::Uint8Array::new(scope, buffer, 0, len).unwrap();

    rv.set(array.into());
}

fn install_text_decoder(scope: &mut v8::HandleScope, global: v8::Local<v8::Object>) {
    let template = v8::FunctionTemplate::new(scope, text_decoder_ctor);
    let name = v8::String::new(scope, "TextDecoder").unwrap();
    template.set_class_name(name);

    let instance_template = template.instance_template(scope);
    let decode_key = v8::String::new(scope, "decode").unwrap();
    let decode_fn = v8::FunctionTemplate::new(scope, text_decoder_decode);
    instance_template.set(decode_key.into(), decode_fn.into());

    let ctor = template.get_function(scope).unwrap();
    let key = v8::String::new(scope, "TextDecoder").unwrap();
    global.set(scope, key.into(), ctor.into());
}

fn text_decoder_ctor(
    scope: &mut v8::HandleScope,
    _args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    let this = v8::Object::new(scope);
    let encoding_val = v8::String::new(scope, "utf-8").unwrap();
    set_constant_to(scope, this, "encoding", encoding_val.into());
    rv.set(this.into());
}

fn text_decoder_decode(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    let bytes = read_bytes(scope, args.get(0));
    let text = String::from_utf8_lossy(&bytes).into_owned();
    let out = v8::String::new(scope, &text).unwrap();
    rv.set(out.into());
}

fn read_bytes(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Vec<u8> {
    if let Ok(view) = v8::Local::<v8::ArrayBufferView>::try_from(value) {
        let len = view.byte_length();
        let mut out = vec![0u8; len];
        view.copy_contents(&mut out);
        return out;
    }
    if let Ok(buffer) = v8::Local::<v8::ArrayBuffer>::try_from(value) {
        let backing = buffer.get_backing_store();
        let len = backing.byte_length();
        let mut out = vec![0u8; len];
        unsafe {
            if let Some(data) = backing.data() {
                std::ptr::copy_nonoverlapping(data.as_ptr() as *const u8, out.as_mut_ptr(), len);
            }
        }
        return out;
    }
    let _ = scope;
    Vec::new()
}

fn install_url(scope: &mut v8::HandleScope, global: v8::Local<v8::Object>) {
    let template = v8::FunctionTemplate::new(scope, url_ctor);
    let name = v8::String::new(scope, "URL").unwrap();
    template.set_class_name(name);

    let instance_template = template.instance_template(scope);
    instance_template.set_internal_field_count(1);

    for (prop, getter) in URL_ACCESSORS {
        let key = v8::String::new(scope, prop).unwrap();
        instance_template.set_accessor(key.into(), *getter);
    }

    let to_string_key = v8::String::new(scope, "toString").unwrap();
    let to_string_fn = v8::FunctionTemplate::new(scope, url_to_string);
    instance_template.set(to_string_key.into(), to_string_fn.into());

    let ctor = template.get_function(scope).unwrap();
    let key = v8::String::new(scope, "URL").unwrap();
    global.set(scope, key.into(), ctor.into());
}

type UrlAccessor = fn(&mut v8::HandleScope, v8::Local<v8::Name>, v8::PropertyCallbackArguments, v8::ReturnValue);

const URL_ACCESSORS: &[(&str, &UrlAccessor)] = &[
    ("href", &(url_prop_href as UrlAccessor)),
    ("protocol", &(url_prop_protocol as UrlAccessor)),
    ("host", &(url_prop_host as UrlAccessor)),
    ("hostname", &(url_prop_hostname as UrlAccessor)),
    ("port", &(url_prop_port as UrlAccessor)),
    ("pathname", &(url_prop_pathname as UrlAccessor)),
    ("search", &(url_prop_search as UrlAccessor)),
    ("hash", &(url_prop_hash as UrlAccessor)),
    ("origin", &(url_prop_origin as UrlAccessor)),
];

fn url_ctor(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let href = args.get(0).to_rust_string_lossy(scope);

    let parsed = if args.length() > 1 && !args.get(1).is_undefined() {
        let base_str = args.get(1).to_rust_string_lossy(scope);
        url::Url::parse(&base_str).and_then(|base| base.join(&href))
    } else {
        url::Url::parse(&href)
    };

    let parsed = match parsed {
        Ok(url) => url,
        Err(e) => {
            throw_type_error(scope, &format!("invalid URL: {e}"));
            return;
        }
    };

    let this = args.this();
    set_internal_ref(scope, this, 0, parsed);
    rv.set(this.into());
}

fn url_to_string(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let this = args.this();
    let parsed: &url::Url = get_internal_ref(scope, this, 0);
    let out = v8::String::new(scope, parsed.as_str()).unwrap();
    rv.set(out.into());
}

fn set_string_result(scope: &mut v8::HandleScope, mut rv: v8::ReturnValue, value: &str) {
    let out = v8::String::new(scope, value).unwrap();
    rv.set(out.into());
}

fn url_this<'s>(scope: &mut v8::HandleScope<'s>, args: &v8::PropertyCallbackArguments) -> &'s mut url::Url {
    let this = args.this();
    get_internal_ref(scope, this, 0)
}

fn url_prop_href(scope: &mut v8::HandleScope, _key: v8::Local<v8::Name>, args: v8::PropertyCallbackArguments, rv: v8::ReturnValue) {
    let parsed = url_this(scope, &args);
    set_string_result(scope, rv, parsed.as_str());
}

fn url_prop_protocol(scope: &mut v8::HandleScope, _key: v8::Local<v8::Name>, args: v8::PropertyCallbackArguments, rv: v8::ReturnValue) {
    let parsed = url_this(scope, &args);
    set_string_result(scope, rv, &format!("{}:", parsed.scheme()));
}

fn url_prop_host(scope: &mut v8::HandleScope, _key: v8::Local<v8::Name>, args: v8::PropertyCallbackArguments, rv: v8::ReturnValue) {
    let parsed = url_this(scope, &args);
    set_string_result(scope, rv, parsed.host_str().unwrap_or(""));
}

fn url_prop_hostname(scope: &mut v8::HandleScope, _key: v8::Local<v8::Name>, args: v8::PropertyCallbackArguments, rv: v8::ReturnValue) {
    let parsed = url_this(scope, &args);
    set_string_result(scope, rv, parsed.host_str().unwrap_or(""));
}

fn url_prop_port(scope: &mut v8::HandleScope, _key: v8::Local<v8::Name>, args: v8::PropertyCallbackArguments, rv: v8::ReturnValue) {
    let parsed = url_this(scope, &args);
    let port = parsed.port().map(|p| p.to_string()).unwrap_or_default();
    set_string_result(scope, rv, &port);
}

fn url_prop_pathname(scope: &mut v8::HandleScope, _key: v8::Local<v8::Name>, args: v8::PropertyCallbackArguments, rv: v8::ReturnValue) {
    let parsed = url_this(scope, &args);
    set_string_result(scope, rv, parsed.path());
}

fn url_prop_search(scope: &mut v8::HandleScope, _key: v8::Local<v8::Name>, args: v8::PropertyCallbackArguments, rv: v8::ReturnValue) {
    let parsed = url_this(scope, &args);
    let search = parsed.query().map(|q| format!("?{q}")).unwrap_or_default();
    set_string_result(scope, rv, &search);
}

fn url_prop_hash(scope: &mut v8::HandleScope, _key: v8::Local<v8::Name>, args: v8::PropertyCallbackArguments, rv: v8::ReturnValue) {
    let parsed = url_this(scope, &args);
    let hash = parsed.fragment().map(|f| format!("#{f}")).unwrap_or_default();
    set_string_result(scope, rv, &hash);
}

fn url_prop_origin(scope: &mut v8::HandleScope, _key: v8::Local<v8::Name>, args: v8::PropertyCallbackArguments, rv: v8::ReturnValue) {
    let parsed = url_this(scope, &args);
    set_string_result(scope, rv, &parsed.origin().ascii_serialization());
}

#[cfg(test)]
mod tests {
    #[test]
    fn url_crate_parses_and_joins() {
        let base = url::Url::parse("https://example.com/a/").unwrap();
        let joined = base.join("b").unwrap();
        assert_eq!(joined.as_str(), "https://example.com/a/b");
    }

    #[test]
    fn url_crate_rejects_garbage() {
        assert!(url::Url::parse("not a url").is_err());
    }
}
