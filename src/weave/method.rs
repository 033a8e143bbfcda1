//! Weaving hooks into a single method body.
//!
//! The rewritten method has this shape:
//!
//! ```text
//!         <enter hook>
//! start:  <original code, with the return hook in front of every return>
//! end:
//! handler:
//!         <error hook>
//!         athrow
//!
//! exception table: ...original entries..., [start, end) -> handler, any
//! ```
//!
//! The catch-all region is appended after every original entry, so each original handler
//! still gets the first chance to catch exceptions from the code it covers. The handler
//! always rethrows, which makes it behave like a `finally` block that only runs on the
//! exceptional path.
//!
//! Original regions are split around the return hook code they would otherwise cover. An
//! exception thrown by a return hook therefore reaches the error hook and never the
//! method's own handlers.

use std::collections::HashMap;

use crate::{
    assembly::{opcodes, Instruction, Label},
    classfile::{
        attributes::names,
        constpool::ConstantPool,
        descriptor::MethodDescriptor,
        stackmap::{FrameKind, StackMapFrame, VerificationType},
    },
    method::{HandlerRegion, MethodBody, Node},
    weave::hooks::{EmittedHook, HookChain, HookEvent, HookSite},
    Error, Result,
};

/// Identity of the method being rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodTarget<'a> {
    /// Internal name of the declaring class
    pub class: &'a str,
    /// Method name
    pub method: &'a str,
    /// Method descriptor
    pub descriptor: &'a str,
}

/// Result of [`MethodRewriter::rewrite`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenMethod {
    /// The instrumented body
    pub body: MethodBody,
    /// Number of return instructions that received the return hook
    pub return_sites: usize,
}

/// Weaves a [`HookChain`] into method bodies.
#[derive(Debug, Clone, Copy)]
pub struct MethodRewriter<'a> {
    chain: &'a HookChain,
    require_frames: bool,
}

impl<'a> MethodRewriter<'a> {
    /// Creates a rewriter for `chain`.
    #[must_use]
    pub fn new(chain: &'a HookChain) -> Self {
        MethodRewriter {
            chain,
            require_frames: false,
        }
    }

    /// Adds a stack map frame for the handler even if the method has no `StackMapTable`.
    ///
    /// Required for class files of version 51 and later.
    #[must_use]
    pub fn require_frames(mut self, required: bool) -> Self {
        self.require_frames = required;
        self
    }

    /// Instruments `body`.
    ///
    /// New constants (hook strings, method references, `java/lang/Throwable`) are added to
    /// `pool`, which must be the pool of the class `body` belongs to.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookPolicy`] if a policy fails,
    /// [`crate::Error::Malformed`] for an invalid descriptor and
    /// [`crate::Error::NotSupported`] if the grown method exceeds the operand stack limit.
    pub fn rewrite(
        &self,
        mut body: MethodBody,
        target: &MethodTarget<'_>,
        pool: &mut ConstantPool,
    ) -> Result<RewrittenMethod> {
        let descriptor = MethodDescriptor::parse(target.descriptor)?;
        let site = |event| HookSite {
            class: target.class,
            method: target.method,
            descriptor: target.descriptor,
            event,
            return_type: descriptor.return_type.as_ref(),
        };

        let return_sites = body.return_count();
        let enter = self.chain.emit(&site(HookEvent::Enter), pool)?;
        let exit = if return_sites > 0 {
            self.chain.emit(&site(HookEvent::Return), pool)?
        } else {
            EmittedHook::default()
        };
        let error = self.chain.emit(&site(HookEvent::Error), pool)?;

        let start = body.new_label();
        let end = body.new_label();
        let handler = body.new_label();

        let original = std::mem::take(&mut body.nodes);
        let mut nodes = Vec::with_capacity(
            original.len()
                + enter.instructions.len()
                + return_sites * exit.instructions.len()
                + error.instructions.len()
                + 4,
        );

        nodes.extend(enter.instructions.iter().cloned().map(Node::Instruction));
        nodes.push(Node::Label(start));
        let mut hook_spans = Vec::new();
        for node in original {
            let is_return =
                matches!(&node, Node::Instruction(instruction) if instruction.is_return());
            if is_return && !exit.instructions.is_empty() {
                let begin = body.new_label();
                let resume = body.new_label();
                nodes.push(Node::Label(begin));
                nodes.extend(exit.instructions.iter().cloned().map(Node::Instruction));
                nodes.push(Node::Label(resume));
                hook_spans.push((begin, resume));
            }
            nodes.push(node);
        }
        nodes.push(Node::Label(end));
        nodes.push(Node::Label(handler));
        nodes.extend(error.instructions.iter().cloned().map(Node::Instruction));
        nodes.push(Node::Instruction(Instruction::simple(opcodes::ATHROW)));

        body.nodes = nodes;
        // Only the catch-all may see exceptions thrown by return hook code
        body.handlers = exclude_spans(&body.nodes, &body.handlers, &hook_spans)?;
        body.handlers.push(HandlerRegion::catch_all(start, end, handler));

        let normal = u32::from(body.max_stack) + u32::from(enter.max_stack.max(exit.max_stack));
        let exceptional = 1 + u32::from(error.max_stack);
        body.max_stack = u16::try_from(normal.max(exceptional)).map_err(|_| {
            Error::NotSupported(format!(
                "{}.{}{} needs an operand stack of {} slots",
                target.class,
                target.method,
                target.descriptor,
                normal.max(exceptional)
            ))
        })?;

        if self.require_frames || body.frames.is_some() {
            let throwable = pool.add_class("java/lang/Throwable")?;
            body.frames.get_or_insert_with(Vec::new).push(StackMapFrame {
                position: handler,
                kind: FrameKind::Full {
                    locals: Vec::new(),
                    stack: vec![VerificationType::Object(throwable)],
                },
            });
        }

        // Type annotations address bytecode offsets directly and cannot follow the labels
        let before = body.other_attributes.len();
        body.other_attributes.retain(|attribute| {
            !attribute.is(pool, names::RUNTIME_VISIBLE_TYPE_ANNOTATIONS)
                && !attribute.is(pool, names::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS)
        });
        if body.other_attributes.len() != before {
            log::debug!(
                "Dropped code type annotations of {}.{}{}",
                target.class,
                target.method,
                target.descriptor
            );
        }

        log::trace!(
            "Instrumented {}.{}{} ({} return sites, max stack {})",
            target.class,
            target.method,
            target.descriptor,
            return_sites,
            body.max_stack
        );

        Ok(RewrittenMethod { body, return_sites })
    }
}

/// Splits every region that covers one of `spans` (`[begin, resume)` label pairs, in node
/// order) into the pieces before and after it. Pieces that would cover no instruction are
/// dropped; the pieces keep the position of their region in the list.
fn exclude_spans(
    nodes: &[Node],
    regions: &[HandlerRegion],
    spans: &[(Label, Label)],
) -> Result<Vec<HandlerRegion>> {
    if spans.is_empty() {
        return Ok(regions.to_vec());
    }

    // Number of instructions in front of each label
    let mut positions = HashMap::new();
    let mut count = 0usize;
    for node in nodes {
        match node {
            Node::Label(label) => {
                positions.insert(*label, count);
            }
            Node::Instruction(_) => count += 1,
        }
    }
    let position = |label: &Label| -> Result<usize> {
        positions
            .get(label)
            .copied()
            .ok_or(Error::UndefinedLabel(label.0))
    };

    let mut split = Vec::with_capacity(regions.len());
    for region in regions {
        let end = position(&region.end)?;
        let mut cursor = region.start;
        for (begin, resume) in spans {
            if position(begin)? < position(&cursor)? || position(resume)? > end {
                continue;
            }
            if position(&cursor)? < position(begin)? {
                split.push(HandlerRegion {
                    start: cursor,
                    end: *begin,
                    ..*region
                });
            }
            cursor = *resume;
        }
        if position(&cursor)? < end {
            split.push(HandlerRegion {
                start: cursor,
                ..*region
            });
        }
    }
    Ok(split)
}
