//! Class file builder for unit tests.
//!
//! Produces small but complete class files directly through the public model, so tests do
//! not depend on checked-in `.class` samples.

use crate::classfile::{
    attributes::{
        line_numbers_to_bytes, names, AttributeInfo, CodeAttribute, ExceptionTableEntry,
        LineNumberEntry,
    },
    constpool::ConstantPool,
    stackmap::{stack_map_to_bytes, StackMapFrame},
    ClassAccessFlags, ClassFile, MemberInfo, MethodAccessFlags,
};

/// A method body under construction.
#[derive(Debug, Clone, Default)]
pub struct TestCode {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub line_numbers: Vec<(u16, u16)>,
    pub frames: Vec<StackMapFrame>,
}

impl TestCode {
    pub fn new(max_stack: u16, max_locals: u16, code: Vec<u8>) -> Self {
        TestCode {
            max_stack,
            max_locals,
            code,
            ..Self::default()
        }
    }

    pub fn handler(mut self, start_pc: u16, end_pc: u16, handler_pc: u16, catch_type: u16) -> Self {
        self.exception_table.push(ExceptionTableEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        });
        self
    }

    pub fn line(mut self, start_pc: u16, line: u16) -> Self {
        self.line_numbers.push((start_pc, line));
        self
    }

    pub fn frame(mut self, frame: StackMapFrame) -> Self {
        self.frames.push(frame);
        self
    }
}

/// Builds a class extending `java/lang/Object`.
pub struct ClassBuilder {
    name: String,
    major: u16,
    pool: ConstantPool,
    methods: Vec<MemberInfo>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        ClassBuilder {
            name: name.to_string(),
            major: 50,
            pool: ConstantPool::new(),
            methods: Vec::new(),
        }
    }

    /// Sets the major version; 51 and above require stack map frames.
    pub fn version(mut self, major: u16) -> Self {
        self.major = major;
        self
    }

    /// Adds a method with a plain code array.
    pub fn method(
        self,
        name: &str,
        descriptor: &str,
        flags: MethodAccessFlags,
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
    ) -> Self {
        self.method_with(name, descriptor, flags, |_| {
            TestCode::new(max_stack, max_locals, code)
        })
    }

    /// Adds a method whose code needs constant pool entries.
    pub fn method_with(
        mut self,
        name: &str,
        descriptor: &str,
        flags: MethodAccessFlags,
        build: impl FnOnce(&mut ConstantPool) -> TestCode,
    ) -> Self {
        let code = build(&mut self.pool);

        let mut attributes = Vec::new();
        if !code.line_numbers.is_empty() {
            let entries: Vec<LineNumberEntry> = code
                .line_numbers
                .iter()
                .map(|&(start_pc, line_number)| LineNumberEntry {
                    start_pc,
                    line_number,
                })
                .collect();
            attributes.push(self.attribute(
                names::LINE_NUMBER_TABLE,
                line_numbers_to_bytes(&entries).unwrap(),
            ));
        }
        if !code.frames.is_empty() {
            attributes.push(
                self.attribute(names::STACK_MAP_TABLE, stack_map_to_bytes(&code.frames).unwrap()),
            );
        }

        let info = CodeAttribute {
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            code: code.code,
            exception_table: code.exception_table,
            attributes,
        }
        .to_bytes()
        .unwrap();

        let code_attribute = self.attribute(names::CODE, info);
        self.push_method(name, descriptor, flags, vec![code_attribute]);
        self
    }

    /// Adds an abstract method without code.
    pub fn abstract_method(mut self, name: &str, descriptor: &str) -> Self {
        self.push_method(
            name,
            descriptor,
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            Vec::new(),
        );
        self
    }

    /// Adds `<init>()V` calling the `Object` constructor.
    pub fn constructor(self) -> Self {
        self.method_with("<init>", "()V", MethodAccessFlags::PUBLIC, |pool| {
            let init = pool
                .add_methodref("java/lang/Object", "<init>", "()V")
                .unwrap()
                .to_be_bytes();
            TestCode::new(1, 1, vec![0x2A, 0xB7, init[0], init[1], 0xB1])
        })
    }

    fn attribute(&mut self, name: &str, info: Vec<u8>) -> AttributeInfo {
        AttributeInfo {
            name_index: self.pool.add_utf8(name).unwrap(),
            info,
        }
    }

    fn push_method(
        &mut self,
        name: &str,
        descriptor: &str,
        flags: MethodAccessFlags,
        attributes: Vec<AttributeInfo>,
    ) {
        let name_index = self.pool.add_utf8(name).unwrap();
        let descriptor_index = self.pool.add_utf8(descriptor).unwrap();
        self.methods.push(MemberInfo {
            access_flags: flags.bits(),
            name_index,
            descriptor_index,
            attributes,
        });
    }

    pub fn build_class(mut self) -> ClassFile {
        let this_class = self.pool.add_class(&self.name).unwrap();
        let super_class = self.pool.add_class("java/lang/Object").unwrap();

        ClassFile {
            minor_version: 0,
            major_version: self.major,
            constant_pool: self.pool,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: self.methods,
            attributes: Vec::new(),
        }
    }

    pub fn build(self) -> Vec<u8> {
        self.build_class().to_bytes().unwrap()
    }
}

/// `static int add(int, int)`
pub fn add_method(builder: ClassBuilder) -> ClassBuilder {
    builder.method(
        "add",
        "(II)I",
        MethodAccessFlags::STATIC,
        2,
        2,
        vec![0x1A, 0x1B, 0x60, 0xAC],
    )
}

/// `static void fail()` throwing `new IllegalStateException("x")`
pub fn fail_method(builder: ClassBuilder) -> ClassBuilder {
    builder.method_with("fail", "()V", MethodAccessFlags::STATIC, |pool| {
        let class = pool
            .add_class("java/lang/IllegalStateException")
            .unwrap()
            .to_be_bytes();
        let message = u8::try_from(pool.add_string("x").unwrap()).unwrap();
        let init = pool
            .add_methodref(
                "java/lang/IllegalStateException",
                "<init>",
                "(Ljava/lang/String;)V",
            )
            .unwrap()
            .to_be_bytes();

        TestCode::new(
            3,
            0,
            vec![
                0xBB, class[0], class[1], // new
                0x59, // dup
                0x12, message, // ldc "x"
                0xB7, init[0], init[1], // invokespecial <init>
                0xBF, // athrow
            ],
        )
    })
}

/// `static int pick(boolean c) { if (c) return 1; return 2; }`
///
/// Carries a stack map frame for the branch target, so it is valid at any version.
pub fn pick_method(builder: ClassBuilder) -> ClassBuilder {
    builder.method_with("pick", "(Z)I", MethodAccessFlags::STATIC, |_| {
        TestCode::new(
            1,
            1,
            vec![
                0x1A, // iload_0
                0x99, 0x00, 0x05, // ifeq +5
                0x04, // iconst_1
                0xAC, // ireturn
                0x05, // iconst_2
                0xAC, // ireturn
            ],
        )
        .line(0, 10)
        .line(6, 11)
        .frame(StackMapFrame {
            position: 6,
            kind: crate::classfile::stackmap::FrameKind::Same,
        })
    })
}
