//! Rewriting every eligible method of one class.

use crate::{
    classfile::{
        attributes::CodeAttribute, constpool::ConstantPool, ClassAccessFlags, ClassFile,
        MethodAccessFlags,
    },
    method::MethodBody,
    weave::{
        hooks::HookChain,
        method::{MethodRewriter, MethodTarget},
    },
    Error, Result,
};

/// What a [`MethodSelector`] gets to see about a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodCandidate<'a> {
    /// Internal name of the declaring class
    pub class: &'a str,
    /// Access flags of the declaring class
    pub class_flags: ClassAccessFlags,
    /// Method name
    pub name: &'a str,
    /// Method descriptor
    pub descriptor: &'a str,
    /// Method access flags
    pub flags: MethodAccessFlags,
    /// Whether the method has a `Code` attribute
    pub has_code: bool,
}

/// Decides which methods get instrumented.
///
/// Methods without code are never rewritten, whatever the selector says.
///
/// Closures taking a [`MethodCandidate`] implement this trait:
///
/// ```rust
/// use classweave::{
///     classfile::MethodAccessFlags,
///     weave::{MethodCandidate, MethodSelector},
/// };
///
/// let only_public = |m: &MethodCandidate<'_>| m.flags.contains(MethodAccessFlags::PUBLIC);
/// fn assert_selector(_: &impl MethodSelector) {}
/// assert_selector(&only_public);
/// ```
pub trait MethodSelector: Send + Sync {
    /// Returns `true` if `candidate` should be instrumented.
    fn select(&self, candidate: &MethodCandidate<'_>) -> bool;
}

impl<F> MethodSelector for F
where
    F: Fn(&MethodCandidate<'_>) -> bool + Send + Sync,
{
    fn select(&self, candidate: &MethodCandidate<'_>) -> bool {
        self(candidate)
    }
}

/// Selects every method that has code, except instance initialisers.
///
/// `<init>` is skipped because the code before the super constructor call runs with an
/// uninitialised `this`, which a catch-all region over the whole body cannot describe in a
/// single stack map frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultSelector;

impl MethodSelector for DefaultSelector {
    fn select(&self, candidate: &MethodCandidate<'_>) -> bool {
        candidate.has_code
            && candidate.name != "<init>"
            && !candidate
                .flags
                .intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE)
    }
}

/// Result of rewriting one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// At least one method was instrumented
    Rewritten {
        /// The new class file
        bytes: Vec<u8>,
        /// Number of instrumented methods
        methods: usize,
        /// Number of instrumented return instructions
        return_sites: usize,
    },
    /// Nothing was eligible; the original bytes remain valid
    Unchanged,
}

/// Applies a [`MethodRewriter`] to every selected method of a class.
///
/// # Usage Examples
///
/// ```rust,no_run
/// use classweave::weave::{CallbackHook, CodeUnitRewriter, DefaultSelector, HookChain, UnitOutcome};
///
/// let chain = HookChain::new().with(CallbackHook::new("com/example/Trace"))?;
/// let rewriter = CodeUnitRewriter::new(&chain, &DefaultSelector);
///
/// let bytes = std::fs::read("Foo.class")?;
/// if let UnitOutcome::Rewritten { bytes, methods, .. } = rewriter.rewrite(&bytes)? {
///     println!("instrumented {} methods", methods);
///     std::fs::write("Foo.class", bytes)?;
/// }
/// # Ok::<(), classweave::Error>(())
/// ```
#[derive(Clone, Copy)]
pub struct CodeUnitRewriter<'a> {
    chain: &'a HookChain,
    selector: &'a dyn MethodSelector,
}

impl<'a> CodeUnitRewriter<'a> {
    /// Creates a unit rewriter.
    #[must_use]
    pub fn new(chain: &'a HookChain, selector: &'a dyn MethodSelector) -> Self {
        CodeUnitRewriter { chain, selector }
    }

    /// Instruments one class file.
    ///
    /// # Errors
    /// Returns parse errors of the class itself unwrapped, and failures inside a method as
    /// [`crate::Error::Method`].
    pub fn rewrite(&self, bytes: &[u8]) -> Result<UnitOutcome> {
        let mut class = ClassFile::parse(bytes)?;
        if self.chain.is_empty() {
            return Ok(UnitOutcome::Unchanged);
        }

        let class_name = class.name()?;
        let rewriter = MethodRewriter::new(self.chain).require_frames(class.requires_stack_maps());

        let mut methods = 0;
        let mut return_sites = 0;

        let ClassFile {
            constant_pool,
            methods: members,
            access_flags,
            ..
        } = &mut class;

        for member in members.iter_mut() {
            let name = constant_pool.utf8(member.name_index)?;
            let descriptor = constant_pool.utf8(member.descriptor_index)?;
            let code_index = member.code_index(constant_pool);

            let candidate = MethodCandidate {
                class: &class_name,
                class_flags: *access_flags,
                name: &name,
                descriptor: &descriptor,
                flags: member.method_flags(),
                has_code: code_index.is_some(),
            };
            let Some(code_index) = code_index else {
                continue;
            };
            if !self.selector.select(&candidate) {
                continue;
            }

            let target = MethodTarget {
                class: &class_name,
                method: &name,
                descriptor: &descriptor,
            };
            let attribute = &mut member.attributes[code_index];

            let (info, sites) = rewrite_method(&rewriter, &target, &attribute.info, constant_pool)
                .map_err(|source| Error::Method {
                    class: class_name.clone(),
                    method: format!("{}{}", name, descriptor),
                    source: Box::new(source),
                })?;

            attribute.info = info;
            methods += 1;
            return_sites += sites;
        }

        if methods == 0 {
            return Ok(UnitOutcome::Unchanged);
        }

        log::debug!(
            "Rewrote {} ({} methods, {} return sites)",
            class_name,
            methods,
            return_sites
        );

        Ok(UnitOutcome::Rewritten {
            bytes: class.to_bytes()?,
            methods,
            return_sites,
        })
    }
}

/// Rewrites one encoded `Code` attribute, returning the new payload and its return sites.
fn rewrite_method(
    rewriter: &MethodRewriter<'_>,
    target: &MethodTarget<'_>,
    info: &[u8],
    pool: &mut ConstantPool,
) -> Result<(Vec<u8>, usize)> {
    let code = CodeAttribute::parse(info)?;
    let body = MethodBody::from_code(&code, pool)?;
    let rewritten = rewriter.rewrite(body, target, pool)?;
    let code = rewritten.body.to_code(pool)?;
    Ok((code.to_bytes()?, rewritten.return_sites))
}
