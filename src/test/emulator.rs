//! A small bytecode interpreter for checking woven methods end to end.
//!
//! Executes static methods of one class over a subset of the instruction set: int
//! arithmetic, locals, branches, string constants, exception objects and static calls.
//! Calls to the configured runtime class are recorded instead of executed, which is how
//! tests observe the hooks a rewritten method fires.

use std::collections::HashMap;

use crate::{
    assembly::{decode_stream, opcodes, Instruction, Operand},
    classfile::{constpool::Constant, descriptor::MethodDescriptor, ClassFile, MethodAccessFlags},
    Error, Result,
};

const STEP_LIMIT: usize = 100_000;

/// A runtime value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Null,
    Str(String),
    /// Index into the emulator heap
    Ref(usize),
}

/// A heap object: an exception or a boxed integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub class: String,
    pub message: Option<String>,
    pub boxed: Option<i32>,
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Returned(Option<Value>),
    Threw(Value),
}

/// One recorded call into the runtime class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCall {
    pub method: String,
    pub args: Vec<Value>,
}

pub struct Emulator<'a> {
    class: &'a ClassFile,
    class_name: String,
    runtime: String,
    failing: Option<String>,
    pub calls: Vec<RuntimeCall>,
    pub heap: Vec<Object>,
}

impl<'a> Emulator<'a> {
    pub fn new(class: &'a ClassFile, runtime: &str) -> Result<Self> {
        Ok(Emulator {
            class_name: class.name()?,
            class,
            runtime: runtime.to_string(),
            failing: None,
            calls: Vec::new(),
            heap: Vec::new(),
        })
    }

    /// Makes calls to `method` of the runtime class throw after being recorded.
    pub fn fail_on(&mut self, method: &str) {
        self.failing = Some(method.to_string());
    }

    /// Recorded calls as `method(arg, ...)` with strings unquoted and heap objects shown as
    /// `Class("message")` or their boxed value.
    pub fn trace(&self) -> Vec<String> {
        self.calls
            .iter()
            .map(|call| {
                let args: Vec<String> = call.args.iter().map(|v| self.render(v)).collect();
                format!("{}({})", call.method, args.join(", "))
            })
            .collect()
    }

    pub fn render(&self, value: &Value) -> String {
        match value {
            Value::Int(v) => v.to_string(),
            Value::Null => "null".to_string(),
            Value::Str(s) => s.clone(),
            Value::Ref(index) => {
                let object = &self.heap[*index];
                match (&object.boxed, &object.message) {
                    (Some(v), _) => v.to_string(),
                    (None, Some(message)) => format!("{}(\"{}\")", object.class, message),
                    (None, None) => object.class.clone(),
                }
            }
        }
    }

    fn alloc(&mut self, object: Object) -> Value {
        self.heap.push(object);
        Value::Ref(self.heap.len() - 1)
    }

    fn exception(&mut self, class: &str, message: &str) -> Value {
        self.alloc(Object {
            class: class.to_string(),
            message: Some(message.to_string()),
            boxed: None,
        })
    }

    fn class_of(&self, value: &Value) -> Option<&str> {
        match value {
            Value::Ref(index) => Some(self.heap[*index].class.as_str()),
            _ => None,
        }
    }

    /// Invokes a static method of the class.
    pub fn invoke(&mut self, name: &str, descriptor: &str, args: &[Value]) -> Result<Outcome> {
        let class = self.class;
        let pool = &class.constant_pool;
        let method = class
            .methods
            .iter()
            .find(|m| pool.utf8_eq(m.name_index, name) && pool.utf8_eq(m.descriptor_index, descriptor))
            .ok_or_else(|| Error::Error(format!("no method {}{}", name, descriptor)))?;

        if !method.method_flags().contains(MethodAccessFlags::STATIC) {
            return Err(Error::NotSupported(format!("instance method {}", name)));
        }

        let code = class
            .code(method)?
            .ok_or_else(|| Error::Error(format!("{} has no code", name)))?;
        let instructions = decode_stream(&code.code)?;
        let index_of: HashMap<u16, usize> = instructions
            .iter()
            .enumerate()
            .map(|(index, (offset, _))| (*offset, index))
            .collect();

        let mut locals = vec![Value::Null; usize::from(code.max_locals).max(args.len())];
        locals[..args.len()].clone_from_slice(args);
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0usize;

        for _ in 0..STEP_LIMIT {
            let (offset, instruction) = instructions
                .get(pc)
                .ok_or_else(|| malformed_error!("Execution fell off the end of {}", name))?;
            let offset = *offset;

            let thrown = match self.step(instruction, &mut stack, &mut locals)? {
                Step::Next => {
                    pc += 1;
                    continue;
                }
                Step::Jump(target) => {
                    pc = index_of[&target];
                    continue;
                }
                Step::Return(value) => return Ok(Outcome::Returned(value)),
                Step::Throw(value) => value,
            };

            let handler = code.exception_table.iter().find(|entry| {
                (entry.start_pc..entry.end_pc).contains(&offset)
                    && (entry.catch_type == 0
                        || pool.class_name(entry.catch_type).ok().as_deref()
                            == self.class_of(&thrown))
            });
            match handler {
                Some(entry) => {
                    stack.clear();
                    stack.push(thrown);
                    pc = index_of[&entry.handler_pc];
                }
                None => return Ok(Outcome::Threw(thrown)),
            }
        }

        Err(Error::Error(format!("{} exceeded the step limit", name)))
    }

    fn step(
        &mut self,
        instruction: &Instruction<u16>,
        stack: &mut Vec<Value>,
        locals: &mut [Value],
    ) -> Result<Step> {
        let class = self.class;
        let pool = &class.constant_pool;
        let op = instruction.opcode;

        match (op, &instruction.operand) {
            (opcodes::NOP, _) => {}
            (opcodes::ACONST_NULL, _) => stack.push(Value::Null),
            (opcodes::ICONST_M1..=opcodes::ICONST_5, _) => {
                stack.push(Value::Int(i32::from(op) - i32::from(opcodes::ICONST_0)));
            }
            (opcodes::BIPUSH, Operand::Byte(v)) => stack.push(Value::Int(i32::from(*v))),
            (opcodes::SIPUSH, Operand::Short(v)) => stack.push(Value::Int(i32::from(*v))),
            (opcodes::LDC | opcodes::LDC_W, Operand::Constant(index)) => {
                let value = match pool.get(*index)? {
                    Constant::Integer(v) => Value::Int(*v),
                    Constant::String(utf8) => Value::Str(pool.utf8(*utf8)?),
                    other => return Err(Error::NotSupported(format!("ldc {:?}", other))),
                };
                stack.push(value);
            }
            (opcodes::ILOAD | opcodes::ALOAD, Operand::Local(index)) => {
                stack.push(locals[usize::from(*index)].clone());
            }
            (opcodes::ILOAD_0..=opcodes::ILOAD_3, _) => {
                stack.push(locals[usize::from(op - opcodes::ILOAD_0)].clone());
            }
            (opcodes::ALOAD_0..=opcodes::ALOAD_3, _) => {
                stack.push(locals[usize::from(op - opcodes::ALOAD_0)].clone());
            }
            (opcodes::ISTORE | opcodes::ASTORE, Operand::Local(index)) => {
                locals[usize::from(*index)] = pop(stack)?;
            }
            (opcodes::ISTORE_0..=opcodes::ISTORE_3, _) => {
                locals[usize::from(op - opcodes::ISTORE_0)] = pop(stack)?;
            }
            (opcodes::ASTORE_0..=opcodes::ASTORE_3, _) => {
                locals[usize::from(op - opcodes::ASTORE_0)] = pop(stack)?;
            }
            (opcodes::IINC, Operand::Iinc { index, delta }) => {
                match &mut locals[usize::from(*index)] {
                    Value::Int(v) => *v = v.wrapping_add(i32::from(*delta)),
                    other => return Err(malformed_error!("iinc on {:?}", other)),
                }
            }
            (opcodes::IADD | opcodes::ISUB | opcodes::IMUL | opcodes::IDIV, _) => {
                let b = pop_int(stack)?;
                let a = pop_int(stack)?;
                let result = match op {
                    opcodes::IADD => a.wrapping_add(b),
                    opcodes::ISUB => a.wrapping_sub(b),
                    opcodes::IMUL => a.wrapping_mul(b),
                    _ if b == 0 => {
                        return Ok(Step::Throw(
                            self.exception("java/lang/ArithmeticException", "/ by zero"),
                        ))
                    }
                    _ => a.wrapping_div(b),
                };
                stack.push(Value::Int(result));
            }
            (opcodes::DUP, _) => {
                let top = stack
                    .last()
                    .cloned()
                    .ok_or_else(|| malformed_error!("dup on empty stack"))?;
                stack.push(top);
            }
            (opcodes::POP, _) => {
                pop(stack)?;
            }
            (opcodes::SWAP, _) => {
                let a = pop(stack)?;
                let b = pop(stack)?;
                stack.push(a);
                stack.push(b);
            }
            (opcodes::IFEQ..=opcodes::IFLE, Operand::Branch(target)) => {
                let v = pop_int(stack)?;
                let taken = match op {
                    opcodes::IFEQ => v == 0,
                    opcodes::IFNE => v != 0,
                    opcodes::IFLT => v < 0,
                    opcodes::IFGE => v >= 0,
                    opcodes::IFGT => v > 0,
                    _ => v <= 0,
                };
                if taken {
                    return Ok(Step::Jump(*target));
                }
            }
            (opcodes::IF_ICMPEQ..=opcodes::IF_ICMPLE, Operand::Branch(target)) => {
                let b = pop_int(stack)?;
                let a = pop_int(stack)?;
                let taken = match op {
                    opcodes::IF_ICMPEQ => a == b,
                    opcodes::IF_ICMPNE => a != b,
                    opcodes::IF_ICMPLT => a < b,
                    opcodes::IF_ICMPGE => a >= b,
                    opcodes::IF_ICMPGT => a > b,
                    _ => a <= b,
                };
                if taken {
                    return Ok(Step::Jump(*target));
                }
            }
            (opcodes::IFNULL | opcodes::IFNONNULL, Operand::Branch(target)) => {
                let is_null = pop(stack)? == Value::Null;
                if is_null == (op == opcodes::IFNULL) {
                    return Ok(Step::Jump(*target));
                }
            }
            (opcodes::GOTO | opcodes::GOTO_W, Operand::Branch(target)) => {
                return Ok(Step::Jump(*target));
            }
            (opcodes::IRETURN | opcodes::ARETURN, _) => {
                return Ok(Step::Return(Some(pop(stack)?)));
            }
            (opcodes::RETURN, _) => return Ok(Step::Return(None)),
            (opcodes::ATHROW, _) => {
                let thrown = match pop(stack)? {
                    Value::Null => self.exception("java/lang/NullPointerException", "athrow"),
                    value => value,
                };
                return Ok(Step::Throw(thrown));
            }
            (opcodes::CHECKCAST, _) => {}
            (opcodes::NEW, Operand::Constant(index)) => {
                let class = pool.class_name(*index)?;
                let object = self.alloc(Object {
                    class,
                    message: None,
                    boxed: None,
                });
                stack.push(object);
            }
            (opcodes::INVOKESPECIAL, Operand::Constant(index)) => {
                let (_, name, descriptor) = pool.member_ref(*index)?;
                if name != "<init>" {
                    return Err(Error::NotSupported(format!("invokespecial {}", name)));
                }
                let args = pop_args(stack, &descriptor)?;
                let Value::Ref(target) = pop(stack)? else {
                    return Err(malformed_error!("<init> on a non-object"));
                };
                if let Some(Value::Str(message)) = args.first() {
                    self.heap[target].message = Some(message.clone());
                }
            }
            (opcodes::INVOKESTATIC, Operand::Constant(index)) => {
                let (owner, name, descriptor) = pool.member_ref(*index)?;
                let args = pop_args(stack, &descriptor)?;

                if owner == self.runtime {
                    let fails = self.failing.as_deref() == Some(name.as_str());
                    self.calls.push(RuntimeCall { method: name, args });
                    if fails {
                        let thrown = self.exception("java/lang/RuntimeException", "hook");
                        return Ok(Step::Throw(thrown));
                    }
                } else if owner == "java/lang/Integer" && name == "valueOf" {
                    let [Value::Int(v)] = args.as_slice() else {
                        return Err(malformed_error!("Integer.valueOf({:?})", args));
                    };
                    let boxed = self.alloc(Object {
                        class: owner,
                        message: None,
                        boxed: Some(*v),
                    });
                    stack.push(boxed);
                } else if owner == self.class_name {
                    match self.invoke(&name, &descriptor, &args)? {
                        Outcome::Returned(Some(value)) => stack.push(value),
                        Outcome::Returned(None) => {}
                        Outcome::Threw(value) => return Ok(Step::Throw(value)),
                    }
                } else {
                    return Err(Error::NotSupported(format!(
                        "invokestatic {}.{}{}",
                        owner, name, descriptor
                    )));
                }
            }
            _ => {
                return Err(Error::NotSupported(format!(
                    "opcode {}",
                    instruction.mnemonic()
                )))
            }
        }

        Ok(Step::Next)
    }
}

enum Step {
    Next,
    Jump(u16),
    Return(Option<Value>),
    Throw(Value),
}

fn pop(stack: &mut Vec<Value>) -> Result<Value> {
    stack
        .pop()
        .ok_or_else(|| malformed_error!("Operand stack underflow"))
}

fn pop_int(stack: &mut Vec<Value>) -> Result<i32> {
    match pop(stack)? {
        Value::Int(v) => Ok(v),
        other => Err(malformed_error!("Expected int, found {:?}", other)),
    }
}

fn pop_args(stack: &mut Vec<Value>, descriptor: &str) -> Result<Vec<Value>> {
    let count = MethodDescriptor::parse(descriptor)?.parameters.len();
    if stack.len() < count {
        return Err(malformed_error!("Operand stack underflow"));
    }
    Ok(stack.split_off(stack.len() - count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::builders::{add_method, fail_method, pick_method, ClassBuilder};

    #[test]
    fn runs_unmodified_methods() {
        let class = pick_method(fail_method(add_method(ClassBuilder::new("t/Calc")))).build_class();
        let mut emulator = Emulator::new(&class, "rt/Trace").unwrap();

        assert_eq!(
            emulator
                .invoke("add", "(II)I", &[Value::Int(2), Value::Int(3)])
                .unwrap(),
            Outcome::Returned(Some(Value::Int(5)))
        );
        assert_eq!(
            emulator.invoke("pick", "(Z)I", &[Value::Int(0)]).unwrap(),
            Outcome::Returned(Some(Value::Int(2)))
        );

        let Outcome::Threw(exception) = emulator.invoke("fail", "()V", &[]).unwrap() else {
            panic!("fail() must throw");
        };
        assert_eq!(
            emulator.render(&exception),
            "java/lang/IllegalStateException(\"x\")"
        );
        assert!(emulator.calls.is_empty());
    }

    #[test]
    fn catch_all_handler_catches() {
        // try { 1 / 0 } catch (any) { return -1 }
        let class = ClassBuilder::new("t/Div")
            .method_with("div", "()I", MethodAccessFlags::STATIC, |_| {
                crate::test::builders::TestCode::new(
                    2,
                    0,
                    vec![0x04, 0x03, 0x6C, 0xAC, 0x57, 0x02, 0xAC],
                )
                .handler(0, 4, 4, 0)
            })
            .build_class();
        let mut emulator = Emulator::new(&class, "rt/Trace").unwrap();
        assert_eq!(
            emulator.invoke("div", "()I", &[]).unwrap(),
            Outcome::Returned(Some(Value::Int(-1)))
        );
    }
}
