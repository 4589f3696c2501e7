//! Binary class artifact model.
//!
//! Compiled classes are stored as `.cwc` artifacts: a compact big-endian
//! format with a magic number, a format version, and length-prefixed UTF-8
//! strings. Method bodies are serialized as the typed instruction set from
//! [crate::ir] rather than raw bytecode, so the weaver can rewrite them
//! without a constant-pool layer.

use crate::error::ClassFileError;
use crate::ir::{Const, FieldRef, Insn, MethodRef};
use std::fs;
use std::path::Path;

/// Magic number at the start of every class artifact.
pub const MAGIC: u32 = 0xC01D_C1A5;

/// Current artifact format version.
pub const FORMAT_VERSION: u16 = 1;

/// File extension of class artifacts, without the leading dot.
pub const CLASS_FILE_EXTENSION: &str = "cwc";

/// Access and property flags for classes, fields and methods.
pub mod flags {
    pub const ACC_PUBLIC: u16 = 0x0001;
    pub const ACC_PRIVATE: u16 = 0x0002;
    pub const ACC_PROTECTED: u16 = 0x0004;
    pub const ACC_STATIC: u16 = 0x0008;
    pub const ACC_FINAL: u16 = 0x0010;
    pub const ACC_SYNTHETIC: u16 = 0x1000;

    /// Whether the flags denote package-private visibility.
    pub fn is_package_private(access: u16) -> bool {
        access & (ACC_PUBLIC | ACC_PRIVATE | ACC_PROTECTED) == 0
    }
}

/// One field of a class, with its source-level annotations recorded as
/// binary type descriptors.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct FieldInfo {
    pub name: String,
    pub descriptor: String,
    pub access: u16,
    pub annotations: Vec<String>,
}

impl FieldInfo {
    pub fn has_annotation(&self, descriptor: &str) -> bool {
        self.annotations.iter().any(|a| a == descriptor)
    }
}

/// One method of a class.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct MethodInfo {
    pub name: String,
    pub descriptor: String,
    pub access: u16,
    pub code: Vec<Insn>,
}

/// An in-memory class artifact.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct ClassFile {
    /// Slash-separated internal class name.
    pub name: String,
    pub access: u16,
    /// Internal names of implemented interfaces.
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
}

impl ClassFile {
    pub fn new(name: impl Into<String>, access: u16) -> Self {
        Self {
            name: name.into(),
            access,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
        }
    }

    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Writer::default();
        out.u32(MAGIC);
        out.u16(FORMAT_VERSION);
        out.str(&self.name);
        out.u16(self.access);

        out.u16(self.interfaces.len() as u16);
        for interface in &self.interfaces {
            out.str(interface);
        }

        out.u16(self.fields.len() as u16);
        for field in &self.fields {
            out.str(&field.name);
            out.str(&field.descriptor);
            out.u16(field.access);
            out.u16(field.annotations.len() as u16);
            for annotation in &field.annotations {
                out.str(annotation);
            }
        }

        out.u16(self.methods.len() as u16);
        for method in &self.methods {
            out.str(&method.name);
            out.str(&method.descriptor);
            out.u16(method.access);
            out.u16(method.code.len() as u16);
            for insn in &method.code {
                out.insn(insn);
            }
        }

        out.bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ClassFileError> {
        let mut reader = Reader { bytes, at: 0 };

        let magic = reader.u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic(magic));
        }
        let version = reader.u16()?;
        if version != FORMAT_VERSION {
            return Err(ClassFileError::UnsupportedVersion(version));
        }

        let name = reader.str()?;
        let access = reader.u16()?;

        let interface_count = reader.u16()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(reader.str()?);
        }

        let field_count = reader.u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let name = reader.str()?;
            let descriptor = reader.str()?;
            let access = reader.u16()?;
            let annotation_count = reader.u16()?;
            let mut annotations = Vec::with_capacity(annotation_count as usize);
            for _ in 0..annotation_count {
                annotations.push(reader.str()?);
            }
            fields.push(FieldInfo {
                name,
                descriptor,
                access,
                annotations,
            });
        }

        let method_count = reader.u16()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            let name = reader.str()?;
            let descriptor = reader.str()?;
            let access = reader.u16()?;
            let insn_count = reader.u16()?;
            let mut code = Vec::with_capacity(insn_count as usize);
            for _ in 0..insn_count {
                code.push(reader.insn()?);
            }
            methods.push(MethodInfo {
                name,
                descriptor,
                access,
                code,
            });
        }

        Ok(Self {
            name,
            access,
            interfaces,
            fields,
            methods,
        })
    }

    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, ClassFileError> {
        Self::from_bytes(&fs::read(path)?)
    }

    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<(), ClassFileError> {
        Ok(fs::write(path, self.to_bytes())?)
    }
}

mod opcode {
    pub const LOAD_THIS: u8 = 0x01;
    pub const LOAD_ARG: u8 = 0x02;
    pub const CONST_NULL: u8 = 0x03;
    pub const CONST_INT: u8 = 0x04;
    pub const CONST_STR: u8 = 0x05;
    pub const NEW: u8 = 0x06;
    pub const DUP: u8 = 0x07;
    pub const GET_STATIC: u8 = 0x08;
    pub const PUT_STATIC: u8 = 0x09;
    pub const GET_FIELD: u8 = 0x0a;
    pub const PUT_FIELD: u8 = 0x0b;
    pub const INVOKE_SPECIAL: u8 = 0x0c;
    pub const INVOKE_VIRTUAL: u8 = 0x0d;
    pub const INVOKE_STATIC: u8 = 0x0e;
    pub const RETURN: u8 = 0x0f;
    pub const RETURN_VALUE: u8 = 0x10;
}

#[derive(Default)]
struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    fn u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    fn i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    fn str(&mut self, value: &str) {
        self.u16(value.len() as u16);
        self.bytes.extend_from_slice(value.as_bytes());
    }

    fn field_ref(&mut self, field: &FieldRef) {
        self.str(&field.owner);
        self.str(&field.name);
        self.str(&field.descriptor);
    }

    fn method_ref(&mut self, method: &MethodRef) {
        self.str(&method.owner);
        self.str(&method.name);
        self.str(&method.descriptor);
    }

    fn insn(&mut self, insn: &Insn) {
        match insn {
            Insn::LoadThis => self.u8(opcode::LOAD_THIS),
            Insn::LoadArg(index) => {
                self.u8(opcode::LOAD_ARG);
                self.u16(*index);
            }
            Insn::LoadConst(Const::Null) => self.u8(opcode::CONST_NULL),
            Insn::LoadConst(Const::Int(value)) => {
                self.u8(opcode::CONST_INT);
                self.i32(*value);
            }
            Insn::LoadConst(Const::Str(value)) => {
                self.u8(opcode::CONST_STR);
                self.str(value);
            }
            Insn::New(class) => {
                self.u8(opcode::NEW);
                self.str(class);
            }
            Insn::Dup => self.u8(opcode::DUP),
            Insn::GetStatic(field) => {
                self.u8(opcode::GET_STATIC);
                self.field_ref(field);
            }
            Insn::PutStatic(field) => {
                self.u8(opcode::PUT_STATIC);
                self.field_ref(field);
            }
            Insn::GetField(field) => {
                self.u8(opcode::GET_FIELD);
                self.field_ref(field);
            }
            Insn::PutField(field) => {
                self.u8(opcode::PUT_FIELD);
                self.field_ref(field);
            }
            Insn::InvokeSpecial(method) => {
                self.u8(opcode::INVOKE_SPECIAL);
                self.method_ref(method);
            }
            Insn::InvokeVirtual(method) => {
                self.u8(opcode::INVOKE_VIRTUAL);
                self.method_ref(method);
            }
            Insn::InvokeStatic(method) => {
                self.u8(opcode::INVOKE_STATIC);
                self.method_ref(method);
            }
            Insn::Return => self.u8(opcode::RETURN),
            Insn::ReturnValue => self.u8(opcode::RETURN_VALUE),
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl Reader<'_> {
    fn take(&mut self, count: usize) -> Result<&[u8], ClassFileError> {
        let slice = self
            .bytes
            .get(self.at..self.at + count)
            .ok_or(ClassFileError::Truncated)?;
        self.at += count;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ClassFileError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ClassFileError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, ClassFileError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, ClassFileError> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn str(&mut self) -> Result<String, ClassFileError> {
        let len = self.u16()? as usize;
        std::str::from_utf8(self.take(len)?)
            .map(str::to_string)
            .map_err(|_| ClassFileError::InvalidUtf8)
    }

    fn field_ref(&mut self) -> Result<FieldRef, ClassFileError> {
        Ok(FieldRef {
            owner: self.str()?,
            name: self.str()?,
            descriptor: self.str()?,
        })
    }

    fn method_ref(&mut self) -> Result<MethodRef, ClassFileError> {
        Ok(MethodRef {
            owner: self.str()?,
            name: self.str()?,
            descriptor: self.str()?,
        })
    }

    fn insn(&mut self) -> Result<Insn, ClassFileError> {
        let op = self.u8()?;
        Ok(match op {
            opcode::LOAD_THIS => Insn::LoadThis,
            opcode::LOAD_ARG => Insn::LoadArg(self.u16()?),
            opcode::CONST_NULL => Insn::LoadConst(Const::Null),
            opcode::CONST_INT => Insn::LoadConst(Const::Int(self.i32()?)),
            opcode::CONST_STR => Insn::LoadConst(Const::Str(self.str()?)),
            opcode::NEW => Insn::New(self.str()?),
            opcode::DUP => Insn::Dup,
            opcode::GET_STATIC => Insn::GetStatic(self.field_ref()?),
            opcode::PUT_STATIC => Insn::PutStatic(self.field_ref()?),
            opcode::GET_FIELD => Insn::GetField(self.field_ref()?),
            opcode::PUT_FIELD => Insn::PutField(self.field_ref()?),
            opcode::INVOKE_SPECIAL => Insn::InvokeSpecial(self.method_ref()?),
            opcode::INVOKE_VIRTUAL => Insn::InvokeVirtual(self.method_ref()?),
            opcode::INVOKE_STATIC => Insn::InvokeStatic(self.method_ref()?),
            opcode::RETURN => Insn::Return,
            opcode::RETURN_VALUE => Insn::ReturnValue,
            other => return Err(ClassFileError::UnknownOpcode(other)),
        })
    }
}
