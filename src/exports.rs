use crate::errors::InitError;
use crate::signature::Signature;

/// A resolved export: a persistent root for the JS callable plus its
/// flattened ABI signature (§3 Export).
pub struct Export {
    pub func: v8::Global<v8::Function>,
    pub signature: Signature,
}

/// Looks up every declared export's property on the bindings module's
/// namespace object, in declaration order, and holds each as a
/// persistent root (§4.5).
pub fn resolve_exports(
    scope: &mut v8::HandleScope,
    namespace: v8::Local<v8::Object>,
    declared: &[crate::config::ExportConfig],
) -> Result<Vec<Export>, InitError> {
    let mut exports = Vec::with_capacity(declared.len());

    for export in declared {
        let key = v8::String::new(scope, &export.name).unwrap();
        let value = match namespace.get(scope, key.into()) {
            Some(value) => value,
            None => return Err(InitError::FnList),
        };

        let func: v8::Local<v8::Function> = match value.try_into() {
            Ok(func) => func,
            Err(_) => return Err(InitError::FnList),
        };

        exports.push(Export {
            func: v8::Global::new(scope, func),
            signature: export.signature.clone(),
        });
    }

    Ok(exports)
}
