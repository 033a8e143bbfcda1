//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::{
    fs::{self, File},
    io::{Read, Write},
    path::Path,
};

use classweave::{
    classfile::{
        attributes::{names, AttributeInfo, CodeAttribute},
        constpool::ConstantPool,
        ClassAccessFlags, MemberInfo, MethodAccessFlags,
    },
    ClassFile,
};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

/// A class with `static int add(int, int)` and a default constructor.
pub fn calc_class(name: &str) -> Vec<u8> {
    let mut pool = ConstantPool::new();
    let code_name = pool.add_utf8(names::CODE).unwrap();

    let method = |pool: &mut ConstantPool,
                  name: &str,
                  descriptor: &str,
                  flags: MethodAccessFlags,
                  code: CodeAttribute| MemberInfo {
        access_flags: flags.bits(),
        name_index: pool.add_utf8(name).unwrap(),
        descriptor_index: pool.add_utf8(descriptor).unwrap(),
        attributes: vec![AttributeInfo {
            name_index: code_name,
            info: code.to_bytes().unwrap(),
        }],
    };

    let add = method(
        &mut pool,
        "add",
        "(II)I",
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        CodeAttribute {
            max_stack: 2,
            max_locals: 2,
            code: vec![0x1A, 0x1B, 0x60, 0xAC],
            exception_table: Vec::new(),
            attributes: Vec::new(),
        },
    );

    let init = pool
        .add_methodref("java/lang/Object", "<init>", "()V")
        .unwrap()
        .to_be_bytes();
    let constructor = method(
        &mut pool,
        "<init>",
        "()V",
        MethodAccessFlags::PUBLIC,
        CodeAttribute {
            max_stack: 1,
            max_locals: 1,
            code: vec![0x2A, 0xB7, init[0], init[1], 0xB1],
            exception_table: Vec::new(),
            attributes: Vec::new(),
        },
    );

    let this_class = pool.add_class(name).unwrap();
    let super_class = pool.add_class("java/lang/Object").unwrap();
    ClassFile {
        minor_version: 0,
        major_version: 52,
        constant_pool: pool,
        access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        this_class,
        super_class,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: vec![add, constructor],
        attributes: Vec::new(),
    }
    .to_bytes()
    .unwrap()
}

/// Returns `true` if `add` of the class carries the catch-all region.
pub fn is_instrumented(bytes: &[u8]) -> bool {
    let class = ClassFile::parse(bytes).unwrap();
    let add = class
        .methods
        .iter()
        .find(|m| class.member_name(m).unwrap() == "add")
        .unwrap();
    let code = class.code(add).unwrap().unwrap();
    code.exception_table
        .last()
        .is_some_and(|entry| entry.catch_type == 0)
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

pub fn write_jar(path: &Path, entries: &[(&str, Vec<u8>)]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        writer
            .start_file(
                *name,
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
            )
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

pub fn read_jar(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|index| {
            let mut entry = archive.by_index(index).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (entry.name().to_string(), data)
        })
        .collect()
}
