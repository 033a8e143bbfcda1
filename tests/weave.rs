//! Integration tests for hook policies and the rewriters, through the public API only.

mod common;

use std::fs;

use classweave::{
    assembly::{decode_stream, opcodes, Operand},
    classfile::constpool::ConstantPool,
    prelude::*,
};
use common::{calc_class, write_file};

/// Calls `rt/Clock.mark(I)V` with a per-event marker.
struct Marker {
    name: &'static str,
    owner: &'static str,
}

impl Marker {
    fn mark(&self, emit: &mut HookEmitter<'_>, value: i32) -> Result<()> {
        emit.push_int(value)?;
        emit.invoke_static(self.owner, "mark", "(I)V")
    }
}

impl HookPolicy for Marker {
    fn name(&self) -> &str {
        self.name
    }

    fn on_enter(&self, _site: &HookSite<'_>, emit: &mut HookEmitter<'_>) -> Result<()> {
        self.mark(emit, 1)
    }

    fn on_return(&self, _site: &HookSite<'_>, emit: &mut HookEmitter<'_>) -> Result<()> {
        self.mark(emit, 2)
    }

    fn on_error(&self, _site: &HookSite<'_>, emit: &mut HookEmitter<'_>) -> Result<()> {
        self.mark(emit, 3)
    }
}

/// Owners of every `invokestatic` in `add`, in code order.
fn static_calls(bytes: &[u8]) -> Result<Vec<String>> {
    let class = ClassFile::parse(bytes)?;
    let add = &class.methods[0];
    let code = class.code(add)?.expect("add has code");

    let mut owners = Vec::new();
    for (_, instruction) in decode_stream(&code.code)? {
        if instruction.opcode != opcodes::INVOKESTATIC {
            continue;
        }
        if let Operand::Constant(index) = instruction.operand {
            let (owner, name, _) = class.constant_pool.member_ref(index)?;
            owners.push(format!("{}.{}", owner, name));
        }
    }
    Ok(owners)
}

#[test]
fn test_custom_policies_run_in_order() -> Result<()> {
    let chain = HookChain::new()
        .with(Marker {
            name: "first",
            owner: "rt/First",
        })?
        .with(Marker {
            name: "second",
            owner: "rt/Second",
        })?;
    let rewriter = CodeUnitRewriter::new(&chain, &DefaultSelector);

    let UnitOutcome::Rewritten {
        bytes,
        methods,
        return_sites,
    } = rewriter.rewrite(&calc_class("p/Calc"))?
    else {
        panic!("add must be rewritten");
    };
    assert_eq!((methods, return_sites), (1, 1));

    assert_eq!(
        static_calls(&bytes)?,
        vec![
            "rt/First.mark",
            "rt/Second.mark",
            "rt/First.mark",
            "rt/Second.mark",
            "rt/First.mark",
            "rt/Second.mark",
        ]
    );
    Ok(())
}

#[test]
fn test_method_rewriter_on_body() -> Result<()> {
    let class = ClassFile::parse(&calc_class("p/Calc"))?;
    let mut pool: ConstantPool = class.constant_pool.clone();
    let code = class.code(&class.methods[0])?.expect("add has code");
    let body = MethodBody::from_code(&code, &pool)?;
    let original = body.instructions().count();

    let chain = HookChain::new().with(CallbackHook::new("rt/Trace"))?;
    let rewritten = MethodRewriter::new(&chain).require_frames(true).rewrite(
        body,
        &MethodTarget {
            class: "p/Calc",
            method: "add",
            descriptor: "(II)I",
        },
        &mut pool,
    )?;

    assert_eq!(rewritten.return_sites, 1);
    rewritten.body.validate()?;
    assert!(rewritten.body.instructions().count() > original);
    assert!(rewritten.body.handlers.last().is_some_and(|h| h.is_catch_all()));

    let encoded = rewritten.body.to_code(&mut pool)?;
    assert!(encoded.max_stack >= code.max_stack);
    assert_eq!(encoded.exception_table.len(), 1);
    Ok(())
}

#[test]
fn test_selector_excludes_everything() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let classes = dir.path().join("classes");
    let original = calc_class("p/Calc");
    write_file(&classes.join("p/Calc.class"), &original);

    let layout = OutputLayout::new(dir.path().join("out"));
    let input: InputSource = DirectoryInput::new(&classes).into();
    let out = layout.resolve(input.name(), input.tags(), input.format())?;

    let report = Dispatcher::new(layout, HookChain::new().with(CallbackHook::new("rt/Trace"))?)
        .with_selector(|m: &MethodCandidate<'_>| m.name.starts_with("test"))
        .run(&[input], BuildMode::Full)?;

    assert_eq!(report.units_rewritten, 0);
    assert_eq!(report.units_unchanged, 1);
    assert_eq!(fs::read(out.join("p/Calc.class"))?, original);
    Ok(())
}

#[test]
fn test_unbalanced_policy_is_fatal() -> Result<()> {
    struct Leaky;
    impl HookPolicy for Leaky {
        fn name(&self) -> &str {
            "leaky"
        }
        fn on_return(&self, _site: &HookSite<'_>, emit: &mut HookEmitter<'_>) -> Result<()> {
            emit.push_int(7)
        }
    }

    let chain = HookChain::new().with(Leaky)?;
    let err = CodeUnitRewriter::new(&chain, &DefaultSelector)
        .rewrite(&calc_class("p/Calc"))
        .unwrap_err();
    assert!(err.to_string().contains("p/Calc"));
    assert!(matches!(
        err,
        Error::Method { source, .. } if matches!(*source, Error::HookPolicy { .. })
    ));
    Ok(())
}
