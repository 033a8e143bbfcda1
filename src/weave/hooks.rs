//! Hook policies and their ordered composition.
//!
//! A [`crate::weave::HookPolicy`] decides what code runs at the three injection points of an
//! instrumented method. Policies never touch the method body directly: the rewriter hands
//! them a [`crate::weave::HookEmitter`] positioned at the injection point, and whatever they
//! emit through it is spliced in place.
//!
//! Policies are composed into a [`crate::weave::HookChain`], which runs them in registration
//! order at every injection point, once per return site for [`HookEvent::Return`].
//!
//! # Usage Examples
//!
//! ```rust
//! use classweave::weave::{CallbackHook, HookChain};
//!
//! let mut chain = HookChain::new();
//! chain.push(CallbackHook::new("com/example/Trace"))?;
//! assert_eq!(chain.names(), vec!["callback:com/example/Trace"]);
//!
//! // Names are unique within a chain
//! assert!(chain.push(CallbackHook::new("com/example/Trace")).is_err());
//! # Ok::<(), classweave::Error>(())
//! ```

use std::{fmt, sync::Arc};

use strum::{Display, EnumIter};

use crate::{
    assembly::Instruction,
    classfile::{constpool::ConstantPool, descriptor::FieldType},
    weave::emitter::HookEmitter,
    Result,
};

/// The three injection points of an instrumented method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum HookEvent {
    /// Before the first original instruction
    Enter,
    /// Before each return instruction, with the return value (if any) on the stack
    Return,
    /// In the catch-all handler, with the thrown exception on the stack
    Error,
}

/// Identity of the method and injection point a hook is emitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookSite<'a> {
    /// Internal name of the declaring class (`com/example/Foo`)
    pub class: &'a str,
    /// Method name
    pub method: &'a str,
    /// Method descriptor
    pub descriptor: &'a str,
    /// Injection point
    pub event: HookEvent,
    /// Declared return type, `None` for `void`
    pub return_type: Option<&'a FieldType>,
}

impl fmt::Display for HookSite<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}{} @ {}",
            self.class, self.method, self.descriptor, self.event
        )
    }
}

/// An instrumentation policy.
///
/// Each callback receives the site and an emitter. A callback that emits nothing leaves
/// the injection point untouched. Errors returned by a callback abort the rewrite of the
/// method and, through it, the whole run.
pub trait HookPolicy: Send + Sync {
    /// Unique name of the policy within a chain, used in error messages.
    fn name(&self) -> &str;

    /// Emits code that runs once, before the original body.
    ///
    /// # Errors
    /// Implementations return [`crate::Error::HookPolicy`] (usually via the emitter).
    fn on_enter(&self, _site: &HookSite<'_>, _emit: &mut HookEmitter<'_>) -> Result<()> {
        Ok(())
    }

    /// Emits code that runs before a return instruction.
    ///
    /// # Errors
    /// Implementations return [`crate::Error::HookPolicy`] (usually via the emitter).
    fn on_return(&self, _site: &HookSite<'_>, _emit: &mut HookEmitter<'_>) -> Result<()> {
        Ok(())
    }

    /// Emits code that runs when the method exits by an exception.
    ///
    /// # Errors
    /// Implementations return [`crate::Error::HookPolicy`] (usually via the emitter).
    fn on_error(&self, _site: &HookSite<'_>, _emit: &mut HookEmitter<'_>) -> Result<()> {
        Ok(())
    }
}

/// Instructions emitted by a chain for one injection point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmittedHook {
    /// Straight-line, stack-neutral code
    pub instructions: Vec<Instruction>,
    /// Deepest operand stack growth above the stack at the injection point, in slots
    pub max_stack: u16,
}

/// An ordered, name-unique collection of hook policies.
#[derive(Clone, Default)]
pub struct HookChain {
    policies: Vec<Arc<dyn HookPolicy>>,
}

impl HookChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        HookChain::default()
    }

    /// Appends a policy.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookPolicy`] if a policy with the same name is already
    /// registered.
    pub fn push(&mut self, policy: impl HookPolicy + 'static) -> Result<()> {
        self.push_shared(Arc::new(policy))
    }

    /// Appends a policy that is shared with other chains.
    ///
    /// # Errors
    /// See [`HookChain::push`].
    pub fn push_shared(&mut self, policy: Arc<dyn HookPolicy>) -> Result<()> {
        if self.policies.iter().any(|p| p.name() == policy.name()) {
            return Err(hook_error!(
                policy.name(),
                "a policy with this name is already registered"
            ));
        }

        self.policies.push(policy);
        Ok(())
    }

    /// Builder form of [`HookChain::push`].
    ///
    /// # Errors
    /// See [`HookChain::push`].
    pub fn with(mut self, policy: impl HookPolicy + 'static) -> Result<Self> {
        self.push(policy)?;
        Ok(self)
    }

    /// Number of registered policies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Returns `true` if no policy is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Policy names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    /// Runs every policy for `site` and concatenates what they emit.
    ///
    /// Each policy gets its own emitter, so one policy cannot consume values pushed by
    /// another. New constants are added to `pool`.
    ///
    /// # Errors
    /// Returns the first policy error; the output of earlier policies is discarded.
    pub fn emit(&self, site: &HookSite<'_>, pool: &mut ConstantPool) -> Result<EmittedHook> {
        let mut emitted = EmittedHook::default();

        for policy in &self.policies {
            let mut emitter = HookEmitter::new(pool, policy.name(), site);
            match site.event {
                HookEvent::Enter => policy.on_enter(site, &mut emitter)?,
                HookEvent::Return => policy.on_return(site, &mut emitter)?,
                HookEvent::Error => policy.on_error(site, &mut emitter)?,
            }

            let part = emitter.finish()?;
            emitted.max_stack = emitted.max_stack.max(part.max_stack);
            emitted.instructions.extend(part.instructions);
        }

        Ok(emitted)
    }
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
