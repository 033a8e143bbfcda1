//! Reference hook policy that reports every event to static methods of a runtime class.

use crate::{
    weave::{
        emitter::HookEmitter,
        hooks::{HookPolicy, HookSite},
    },
    Result,
};

const ENTER_DESCRIPTOR: &str = "(Ljava/lang/String;Ljava/lang/String;)V";
const RETURN_VALUE_DESCRIPTOR: &str = "(Ljava/lang/String;Ljava/lang/String;Ljava/lang/Object;)V";
const ERROR_DESCRIPTOR: &str = "(Ljava/lang/String;Ljava/lang/String;Ljava/lang/Throwable;)V";

/// Calls `static` methods of a runtime class at every injection point.
///
/// With the default names, an instrumented method `add` of `com/example/Calc` calls:
///
/// - `onMethodEnter("com/example/Calc", "add")` on entry
/// - `onMethodReturn("com/example/Calc", "add")` before every return, or
///   `onMethodReturn("com/example/Calc", "add", boxedValue)` when
///   [`CallbackHook::with_return_value`] is enabled (`null` for `void` methods)
/// - `onMethodError("com/example/Calc", "add", exception)` before the exception is rethrown
///
/// Every event can be switched off by clearing its method name.
///
/// # Usage Examples
///
/// ```rust
/// use classweave::weave::{CallbackHook, HookChain};
///
/// let hook = CallbackHook::new("com/example/Trace")
///     .with_return_value(true)
///     .on_error(None);
///
/// let chain = HookChain::new().with(hook)?;
/// assert_eq!(chain.len(), 1);
/// # Ok::<(), classweave::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackHook {
    name: String,
    runtime_class: String,
    enter: Option<String>,
    exit: Option<String>,
    error: Option<String>,
    return_value: bool,
}

impl CallbackHook {
    /// Creates a hook calling `onMethodEnter`, `onMethodReturn` and `onMethodError` of
    /// `runtime_class` (an internal name such as `com/example/Trace`).
    #[must_use]
    pub fn new(runtime_class: &str) -> Self {
        CallbackHook {
            name: format!("callback:{}", runtime_class),
            runtime_class: runtime_class.to_string(),
            enter: Some("onMethodEnter".to_string()),
            exit: Some("onMethodReturn".to_string()),
            error: Some("onMethodError".to_string()),
            return_value: false,
        }
    }

    /// Sets the method called on entry, `None` to skip the event.
    #[must_use]
    pub fn on_enter(mut self, method: Option<&str>) -> Self {
        self.enter = method.map(str::to_string);
        self
    }

    /// Sets the method called before each return, `None` to skip the event.
    #[must_use]
    pub fn on_return(mut self, method: Option<&str>) -> Self {
        self.exit = method.map(str::to_string);
        self
    }

    /// Sets the method called on exceptional exit, `None` to skip the event.
    #[must_use]
    pub fn on_error(mut self, method: Option<&str>) -> Self {
        self.error = method.map(str::to_string);
        self
    }

    /// Passes the boxed return value as a third argument to the return callback.
    #[must_use]
    pub fn with_return_value(mut self, enabled: bool) -> Self {
        self.return_value = enabled;
        self
    }

    /// Overrides the policy name (defaults to `callback:<runtime class>`).
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Emits `class, method` as two strings, then moves the value below them to the top.
    ///
    /// Expects one single-slot value on the policy stack.
    fn push_identity_under(site: &HookSite<'_>, emit: &mut HookEmitter<'_>) -> Result<()> {
        emit.push_string(site.class)?;
        emit.swap()?;
        emit.push_string(site.method)?;
        emit.swap()
    }
}

impl HookPolicy for CallbackHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_enter(&self, site: &HookSite<'_>, emit: &mut HookEmitter<'_>) -> Result<()> {
        let Some(method) = &self.enter else {
            return Ok(());
        };

        emit.push_string(site.class)?;
        emit.push_string(site.method)?;
        emit.invoke_static(&self.runtime_class, method, ENTER_DESCRIPTOR)
    }

    fn on_return(&self, site: &HookSite<'_>, emit: &mut HookEmitter<'_>) -> Result<()> {
        let Some(method) = &self.exit else {
            return Ok(());
        };

        if !self.return_value {
            emit.push_string(site.class)?;
            emit.push_string(site.method)?;
            return emit.invoke_static(&self.runtime_class, method, ENTER_DESCRIPTOR);
        }

        match site.return_type {
            Some(ty) => {
                emit.dup_return_value()?;
                emit.box_value(ty)?;
                Self::push_identity_under(site, emit)?;
            }
            None => {
                emit.push_string(site.class)?;
                emit.push_string(site.method)?;
                emit.push_null()?;
            }
        }
        emit.invoke_static(&self.runtime_class, method, RETURN_VALUE_DESCRIPTOR)
    }

    fn on_error(&self, site: &HookSite<'_>, emit: &mut HookEmitter<'_>) -> Result<()> {
        let Some(method) = &self.error else {
            return Ok(());
        };

        emit.dup_exception()?;
        Self::push_identity_under(site, emit)?;
        emit.invoke_static(&self.runtime_class, method, ERROR_DESCRIPTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{opcodes, Operand},
        classfile::{constpool::ConstantPool, descriptor::FieldType},
        weave::hooks::{HookChain, HookEvent},
    };

    fn site(event: HookEvent, return_type: Option<&FieldType>) -> HookSite<'_> {
        HookSite {
            class: "com/example/Calc",
            method: "add",
            descriptor: "(II)I",
            event,
            return_type,
        }
    }

    fn invoked(pool: &ConstantPool, hook: &crate::weave::hooks::EmittedHook) -> Vec<String> {
        hook.instructions
            .iter()
            .filter(|i| i.opcode == opcodes::INVOKESTATIC)
            .map(|i| match i.operand {
                Operand::Constant(index) => {
                    let (owner, name, desc) = pool.member_ref(index).unwrap();
                    format!("{}.{}{}", owner, name, desc)
                }
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn enter_calls_runtime() {
        let chain = HookChain::new().with(CallbackHook::new("rt/Trace")).unwrap();
        let mut pool = ConstantPool::new();
        let hook = chain.emit(&site(HookEvent::Enter, None), &mut pool).unwrap();

        assert_eq!(hook.instructions.len(), 3);
        assert_eq!(hook.max_stack, 2);
        assert_eq!(
            invoked(&pool, &hook),
            vec![format!("rt/Trace.onMethodEnter{}", ENTER_DESCRIPTOR)]
        );
    }

    #[test]
    fn return_value_is_boxed_and_ordered() {
        let chain = HookChain::new()
            .with(CallbackHook::new("rt/Trace").with_return_value(true))
            .unwrap();
        let mut pool = ConstantPool::new();
        let int = FieldType::Int;
        let hook = chain
            .emit(&site(HookEvent::Return, Some(&int)), &mut pool)
            .unwrap();

        assert_eq!(
            invoked(&pool, &hook),
            vec![
                "java/lang/Integer.valueOf(I)Ljava/lang/Integer;".to_string(),
                format!("rt/Trace.onMethodReturn{}", RETURN_VALUE_DESCRIPTOR),
            ]
        );
        assert_eq!(hook.instructions[0].opcode, opcodes::DUP);
        assert_eq!(hook.max_stack, 3);
    }

    #[test]
    fn void_return_passes_null() {
        let chain = HookChain::new()
            .with(CallbackHook::new("rt/Trace").with_return_value(true))
            .unwrap();
        let mut pool = ConstantPool::new();
        let hook = chain.emit(&site(HookEvent::Return, None), &mut pool).unwrap();
        assert!(hook
            .instructions
            .iter()
            .any(|i| i.opcode == opcodes::ACONST_NULL));
    }

    #[test]
    fn error_passes_exception() {
        let chain = HookChain::new().with(CallbackHook::new("rt/Trace")).unwrap();
        let mut pool = ConstantPool::new();
        let hook = chain.emit(&site(HookEvent::Error, None), &mut pool).unwrap();

        assert_eq!(hook.instructions[0].opcode, opcodes::DUP);
        assert_eq!(hook.max_stack, 3);
        assert_eq!(
            invoked(&pool, &hook),
            vec![format!("rt/Trace.onMethodError{}", ERROR_DESCRIPTOR)]
        );
    }

    #[test]
    fn disabled_events_emit_nothing() {
        let hook = CallbackHook::new("rt/Trace")
            .on_enter(None)
            .on_return(None)
            .on_error(None)
            .named("quiet");
        let chain = HookChain::new().with(hook).unwrap();
        assert_eq!(chain.names(), vec!["quiet"]);

        let mut pool = ConstantPool::new();
        for event in [HookEvent::Enter, HookEvent::Return, HookEvent::Error] {
            let hook = chain.emit(&site(event, None), &mut pool).unwrap();
            assert!(hook.instructions.is_empty());
        }
    }
}
