#![no_main]

use classweave::weave::{CallbackHook, CodeUnitRewriter, DefaultSelector, HookChain};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(chain) = HookChain::new().with(CallbackHook::new("fuzz/Trace").with_return_value(true))
    else {
        return;
    };
    let _ = CodeUnitRewriter::new(&chain, &DefaultSelector).rewrite(data);
});
