//! Stack-checked code emission for hook policies.
//!
//! Hook code is spliced into arbitrary positions of a method: before the first instruction,
//! right before a return with the return value on the stack, and at the start of the
//! catch-all handler with the exception on the stack. The rewriter only stays correct if
//! that code is straight-line, does not touch local variables and leaves the operand stack
//! exactly as it found it. [`crate::weave::HookEmitter`] enforces all three while the
//! policy emits, so a broken policy fails at rewrite time instead of producing a class
//! that does not verify.

use crate::{
    assembly::{opcodes, FlowType, Instruction, Operand},
    classfile::{
        constpool::{Constant, ConstantPool},
        descriptor::{FieldType, MethodDescriptor, ValueKind},
    },
    weave::hooks::{EmittedHook, HookEvent, HookSite},
    Result,
};

/// Emits instructions for one policy at one injection point.
///
/// The emitter tracks the kinds of the values the policy pushed. Values that were on the
/// stack before the injection point (the return value or the exception) can be copied with
/// [`HookEmitter::dup_return_value`] / [`HookEmitter::dup_exception`] but never consumed.
pub struct HookEmitter<'a> {
    pool: &'a mut ConstantPool,
    policy: &'a str,
    event: HookEvent,
    base: Option<ValueKind>,
    stack: Vec<ValueKind>,
    depth: u16,
    max_depth: u16,
    instructions: Vec<Instruction>,
}

impl<'a> HookEmitter<'a> {
    /// Creates an emitter for `policy` at `site`.
    pub fn new(pool: &'a mut ConstantPool, policy: &'a str, site: &HookSite<'_>) -> Self {
        let base = match site.event {
            HookEvent::Enter => None,
            HookEvent::Return => site.return_type.map(FieldType::kind),
            HookEvent::Error => Some(ValueKind::Reference),
        };

        HookEmitter {
            pool,
            policy,
            event: site.event,
            base,
            stack: Vec::new(),
            depth: 0,
            max_depth: 0,
            instructions: Vec::new(),
        }
    }

    /// Current stack growth in slots.
    #[must_use]
    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Kind of the value on top of the policy's own stack.
    #[must_use]
    pub fn top(&self) -> Option<ValueKind> {
        self.stack.last().copied()
    }

    /// Direct access to the constant pool of the class being rewritten.
    pub fn pool(&mut self) -> &mut ConstantPool {
        self.pool
    }

    fn push_kind(&mut self, kind: ValueKind) {
        self.stack.push(kind);
        self.depth += kind.slots();
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn pop_kind(&mut self, expected: ValueKind) -> Result<()> {
        match self.stack.pop() {
            Some(kind) if kind == expected => {
                self.depth -= kind.slots();
                Ok(())
            }
            Some(kind) => Err(hook_error!(
                self.policy,
                "expected {} on the stack, found {}",
                expected,
                kind
            )),
            None => Err(hook_error!(
                self.policy,
                "pops {} below the values it pushed",
                expected
            )),
        }
    }

    /// Pushes an `int` constant with the shortest encoding.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookPolicy`] if the constant pool is full.
    pub fn push_int(&mut self, value: i32) -> Result<()> {
        let instruction = match value {
            -1..=5 => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let opcode = (i32::from(opcodes::ICONST_0) + value) as u8;
                Instruction::simple(opcode)
            }
            v if i8::try_from(v).is_ok() => {
                #[allow(clippy::cast_possible_truncation)]
                Instruction::new(opcodes::BIPUSH, Operand::Byte(v as i8))
            }
            v if i16::try_from(v).is_ok() => {
                #[allow(clippy::cast_possible_truncation)]
                Instruction::new(opcodes::SIPUSH, Operand::Short(v as i16))
            }
            v => {
                let index = self.constant(Constant::Integer(v))?;
                Instruction::new(opcodes::LDC, Operand::Constant(index))
            }
        };

        self.instructions.push(instruction);
        self.push_kind(ValueKind::Int);
        Ok(())
    }

    /// Pushes a `String` constant.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookPolicy`] if the constant pool is full.
    pub fn push_string(&mut self, value: &str) -> Result<()> {
        let index = self
            .pool
            .add_string(value)
            .map_err(|e| hook_error!(self.policy, "cannot add string constant: {}", e))?;
        self.instructions
            .push(Instruction::new(opcodes::LDC, Operand::Constant(index)));
        self.push_kind(ValueKind::Reference);
        Ok(())
    }

    /// Pushes `null`.
    ///
    /// # Errors
    /// Never fails; returns `Result` for symmetry with the other push operations.
    pub fn push_null(&mut self) -> Result<()> {
        self.instructions
            .push(Instruction::simple(opcodes::ACONST_NULL));
        self.push_kind(ValueKind::Reference);
        Ok(())
    }

    fn constant(&mut self, constant: Constant) -> Result<u16> {
        self.pool
            .add(constant)
            .map_err(|e| hook_error!(self.policy, "cannot add constant: {}", e))
    }

    /// Pushes a copy of the value about to be returned.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookPolicy`] outside of a return hook, for `void` methods, or
    /// if the policy already pushed values on top of the return value.
    pub fn dup_return_value(&mut self) -> Result<()> {
        if self.event != HookEvent::Return {
            return Err(hook_error!(
                self.policy,
                "no return value in a {} hook",
                self.event
            ));
        }
        let Some(kind) = self.base else {
            return Err(hook_error!(self.policy, "method returns void"));
        };
        self.dup_base(kind)
    }

    /// Pushes a copy of the exception that is propagating.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookPolicy`] outside of an error hook or if the policy
    /// already pushed values on top of the exception.
    pub fn dup_exception(&mut self) -> Result<()> {
        if self.event != HookEvent::Error {
            return Err(hook_error!(
                self.policy,
                "no exception in a {} hook",
                self.event
            ));
        }
        self.dup_base(ValueKind::Reference)
    }

    fn dup_base(&mut self, kind: ValueKind) -> Result<()> {
        if !self.stack.is_empty() {
            return Err(hook_error!(
                self.policy,
                "value is no longer on top of the stack"
            ));
        }

        let opcode = if kind.slots() == 2 {
            opcodes::DUP2
        } else {
            opcodes::DUP
        };
        self.instructions.push(Instruction::simple(opcode));
        self.push_kind(kind);
        Ok(())
    }

    /// Replaces a primitive of type `ty` on top of the stack by its wrapper object.
    ///
    /// References are left as they are.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookPolicy`] if the top of the stack does not hold a `ty`.
    pub fn box_value(&mut self, ty: &FieldType) -> Result<()> {
        match ty.boxing() {
            Some((wrapper, descriptor)) => self.invoke_static(wrapper, "valueOf", descriptor),
            None => {
                if self.top() == Some(ValueKind::Reference) {
                    Ok(())
                } else {
                    Err(hook_error!(self.policy, "no reference on top of the stack"))
                }
            }
        }
    }

    /// Calls a static method, consuming its arguments and pushing its result.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookPolicy`] if `descriptor` is invalid or the arguments on
    /// the stack do not match it.
    pub fn invoke_static(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<()> {
        let parsed = MethodDescriptor::parse(descriptor)
            .map_err(|e| hook_error!(self.policy, "invalid descriptor: {}", e))?;

        for parameter in parsed.parameters.iter().rev() {
            self.pop_kind(parameter.kind())?;
        }

        let index = self
            .pool
            .add_methodref(owner, name, descriptor)
            .map_err(|e| hook_error!(self.policy, "cannot add method reference: {}", e))?;
        self.instructions
            .push(Instruction::new(opcodes::INVOKESTATIC, Operand::Constant(index)));

        if let Some(kind) = parsed.return_kind() {
            self.push_kind(kind);
        }
        Ok(())
    }

    /// Casts the reference on top of the stack to `class`.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookPolicy`] if the top of the stack is not a reference.
    pub fn checkcast(&mut self, class: &str) -> Result<()> {
        self.pop_kind(ValueKind::Reference)?;
        let index = self
            .pool
            .add_class(class)
            .map_err(|e| hook_error!(self.policy, "cannot add class constant: {}", e))?;
        self.instructions
            .push(Instruction::new(opcodes::CHECKCAST, Operand::Constant(index)));
        self.push_kind(ValueKind::Reference);
        Ok(())
    }

    /// Discards the value on top of the stack.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookPolicy`] if the policy has nothing left to pop.
    pub fn pop(&mut self) -> Result<()> {
        let Some(kind) = self.top() else {
            return Err(hook_error!(self.policy, "pop on an empty hook stack"));
        };
        self.pop_kind(kind)?;

        let opcode = if kind.slots() == 2 {
            opcodes::POP2
        } else {
            opcodes::POP
        };
        self.instructions.push(Instruction::simple(opcode));
        Ok(())
    }

    /// Swaps the two single-slot values on top of the stack.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookPolicy`] if there are fewer than two values or either
    /// takes two slots.
    pub fn swap(&mut self) -> Result<()> {
        let len = self.stack.len();
        if len < 2 || self.stack[len - 2..].iter().any(|kind| kind.slots() != 1) {
            return Err(hook_error!(
                self.policy,
                "swap needs two single-slot values"
            ));
        }

        self.stack.swap(len - 1, len - 2);
        self.instructions.push(Instruction::simple(opcodes::SWAP));
        Ok(())
    }

    /// Emits any straight-line instruction with an explicitly declared stack effect.
    ///
    /// `pops` and `pushes` are listed bottom to top.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookPolicy`] for branches, switches, returns, `athrow`,
    /// subroutines, local variable access and stack effects that do not match the current
    /// stack.
    pub fn raw(
        &mut self,
        instruction: Instruction,
        pops: &[ValueKind],
        pushes: &[ValueKind],
    ) -> Result<()> {
        let info = instruction
            .info()
            .map_err(|e| hook_error!(self.policy, "{}", e))?;

        if !matches!(info.flow, FlowType::Sequential | FlowType::Call) {
            return Err(hook_error!(
                self.policy,
                "'{}' changes control flow",
                info.mnemonic
            ));
        }

        let touches_locals = matches!(
            instruction.opcode,
            opcodes::ILOAD..=opcodes::ALOAD_3 | opcodes::ISTORE..=opcodes::ASTORE_3 | opcodes::IINC
        );
        if touches_locals {
            return Err(hook_error!(
                self.policy,
                "'{}' accesses local variables",
                info.mnemonic
            ));
        }

        for kind in pops.iter().rev() {
            self.pop_kind(*kind)?;
        }
        self.instructions.push(instruction);
        for kind in pushes {
            self.push_kind(*kind);
        }
        Ok(())
    }

    /// Completes emission.
    ///
    /// # Errors
    /// Returns [`crate::Error::HookPolicy`] if the policy left values on the stack.
    pub fn finish(self) -> Result<EmittedHook> {
        if !self.stack.is_empty() {
            return Err(hook_error!(
                self.policy,
                "leaves {} value(s) on the stack",
                self.stack.len()
            ));
        }

        Ok(EmittedHook {
            instructions: self.instructions,
            max_stack: self.max_depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn site(event: HookEvent, return_type: Option<&FieldType>) -> HookSite<'_> {
        HookSite {
            class: "a/B",
            method: "m",
            descriptor: "()V",
            event,
            return_type,
        }
    }

    fn opcodes_of(hook: &EmittedHook) -> Vec<u8> {
        hook.instructions.iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn int_constants_use_shortest_form() {
        let mut pool = ConstantPool::new();
        let site = site(HookEvent::Enter, None);
        let mut emit = HookEmitter::new(&mut pool, "p", &site);
        for value in [-1, 5, 100, -200, 1_000_000] {
            emit.push_int(value).unwrap();
            emit.pop().unwrap();
        }
        let hook = emit.finish().unwrap();
        assert_eq!(
            opcodes_of(&hook),
            vec![
                opcodes::ICONST_M1,
                opcodes::POP,
                opcodes::ICONST_5,
                opcodes::POP,
                opcodes::BIPUSH,
                opcodes::POP,
                opcodes::SIPUSH,
                opcodes::POP,
                opcodes::LDC,
                opcodes::POP,
            ]
        );
        assert_eq!(hook.max_stack, 1);
    }

    #[test]
    fn boxes_long_return_value() {
        let mut pool = ConstantPool::new();
        let long = FieldType::Long;
        let site = site(HookEvent::Return, Some(&long));
        let mut emit = HookEmitter::new(&mut pool, "p", &site);

        emit.dup_return_value().unwrap();
        assert_eq!(emit.depth(), 2);
        emit.box_value(&long).unwrap();
        assert_eq!(emit.top(), Some(ValueKind::Reference));
        emit.push_string("x").unwrap();
        emit.swap().unwrap();
        emit.invoke_static("rt/Hooks", "seen", "(Ljava/lang/String;Ljava/lang/Object;)V")
            .unwrap();

        let hook = emit.finish().unwrap();
        assert_eq!(
            opcodes_of(&hook),
            vec![
                opcodes::DUP2,
                opcodes::INVOKESTATIC,
                opcodes::LDC,
                opcodes::SWAP,
                opcodes::INVOKESTATIC,
            ]
        );
        assert_eq!(hook.max_stack, 2);
    }

    #[test]
    fn base_value_cannot_be_consumed() {
        let mut pool = ConstantPool::new();
        let site = site(HookEvent::Error, None);
        let mut emit = HookEmitter::new(&mut pool, "p", &site);
        assert!(matches!(emit.pop(), Err(Error::HookPolicy { .. })));

        emit.push_null().unwrap();
        // The exception is no longer on top
        assert!(emit.dup_exception().is_err());
    }

    #[test]
    fn event_specific_values() {
        let mut pool = ConstantPool::new();
        let enter = site(HookEvent::Enter, None);
        let mut emit = HookEmitter::new(&mut pool, "p", &enter);
        assert!(emit.dup_return_value().is_err());
        assert!(emit.dup_exception().is_err());

        let void_return = site(HookEvent::Return, None);
        let mut emit = HookEmitter::new(&mut pool, "p", &void_return);
        assert!(emit.dup_return_value().is_err());
    }

    #[test]
    fn argument_mismatch_rejected() {
        let mut pool = ConstantPool::new();
        let site = site(HookEvent::Enter, None);
        let mut emit = HookEmitter::new(&mut pool, "p", &site);
        emit.push_int(1).unwrap();
        let err = emit
            .invoke_static("rt/Hooks", "take", "(Ljava/lang/Object;)V")
            .unwrap_err();
        assert!(matches!(err, Error::HookPolicy { .. }));
    }

    #[test]
    fn raw_rejects_control_flow_and_locals() {
        let mut pool = ConstantPool::new();
        let site = site(HookEvent::Enter, None);
        let mut emit = HookEmitter::new(&mut pool, "p", &site);

        assert!(emit
            .raw(Instruction::simple(opcodes::RETURN), &[], &[])
            .is_err());
        assert!(emit
            .raw(Instruction::simple(opcodes::ALOAD_0), &[], &[ValueKind::Reference])
            .is_err());
        assert!(emit
            .raw(
                Instruction::new(opcodes::ISTORE, Operand::Local(4)),
                &[ValueKind::Int],
                &[]
            )
            .is_err());

        emit.raw(Instruction::simple(opcodes::ICONST_2), &[], &[ValueKind::Int])
            .unwrap();
        emit.raw(Instruction::simple(opcodes::I2L), &[ValueKind::Int], &[ValueKind::Long])
            .unwrap();
        assert_eq!(emit.depth(), 2);
        emit.pop().unwrap();
        assert_eq!(opcodes_of(&emit.finish().unwrap()).last(), Some(&opcodes::POP2));
    }

    #[test]
    fn checkcast_keeps_reference() {
        let mut pool = ConstantPool::new();
        let site = site(HookEvent::Error, None);
        let mut emit = HookEmitter::new(&mut pool, "p", &site);
        emit.dup_exception().unwrap();
        emit.checkcast("java/lang/Exception").unwrap();
        emit.pop().unwrap();
        assert!(emit.finish().is_ok());
    }
}
