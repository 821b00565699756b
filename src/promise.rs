use crate::runtime::Runtime;

/// Registers the promise rejection tracker with the engine (§4.8),
/// the second-to-last step of the ordered init pass (§4.6): the set it
/// populates must already exist in `RuntimeState` by the time any
/// promise created during init can reject.
pub fn register(scope: &mut v8::HandleScope) {
    scope.set_promise_reject_callback(on_promise_reject);
}

/// Adds a promise to the unhandled-rejection set the first time it
/// rejects with no handler attached, and removes it if a handler is
/// attached later (§4.8). The runtime never reads this set itself —
/// it exists purely for the bindings module or host tooling to query.
extern "C" fn on_promise_reject(message: v8::PromiseRejectMessage) {
    v8::callback_scope!(unsafe scope, &message);
    let promise = message.get_promise();

    let rejected = {
        let state_rc = Runtime::state(scope);
        let state = state_rc.borrow();
        state.rejected.clone()
    };
    let set = v8::Local::new(scope, rejected);
    let value: v8::Local<v8::Value> = promise.into();

    match message.get_event() {
        v8::PromiseRejectEvent::PromiseRejectWithNoHandler => {
            set.add(scope, value);
        }
        v8::PromiseRejectEvent::PromiseHandlerAddedAfterReject => {
            set.delete(scope, value);
        }
        // Resolution-after-settle events carry no handled-ness change
        // relevant to this tracker.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    // Exercising the real callback requires a live isolate driving an
    // actual promise rejection; covered by the "unhandled rejection"
    // scenario in `scenarios.rs`, built on top of a real
    // `Runtime::initialize` call.
}
