//! Typed instruction IR with an explicit operand-stack model.
//!
//! Method bodies are sequences of [Insn] values working against JVM-style
//! binary type descriptors. Instead of emitting raw bytes with hand-tracked
//! stack depth, callers build instruction sequences (optionally through
//! [MethodBuilder]) and run [verify] before emission; the verifier simulates
//! the operand stack per instruction and rejects underflow, descriptor
//! mismatches and malformed control flow early.

use crate::classfile::MethodInfo;
use crate::error::VerifyError;
use std::fmt::{self, Display, Formatter};

/// A parsed binary type descriptor.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum TypeDesc {
    Void,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// Slash-separated internal class name.
    Object(String),
    Array(Box<TypeDesc>),
}

impl TypeDesc {
    pub fn is_primitive(&self) -> bool {
        !matches!(self, TypeDesc::Void | TypeDesc::Object(_) | TypeDesc::Array(_))
    }

    /// Renders the descriptor back to its binary form.
    pub fn descriptor(&self) -> String {
        match self {
            TypeDesc::Void => "V".to_string(),
            TypeDesc::Boolean => "Z".to_string(),
            TypeDesc::Byte => "B".to_string(),
            TypeDesc::Char => "C".to_string(),
            TypeDesc::Short => "S".to_string(),
            TypeDesc::Int => "I".to_string(),
            TypeDesc::Long => "J".to_string(),
            TypeDesc::Float => "F".to_string(),
            TypeDesc::Double => "D".to_string(),
            TypeDesc::Object(name) => format!("L{name};"),
            TypeDesc::Array(element) => format!("[{}", element.descriptor()),
        }
    }
}

impl Display for TypeDesc {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

/// Parses a single type descriptor, e.g. `Lcom/example/Repo;` or `I`.
pub fn parse_type(descriptor: &str) -> Result<TypeDesc, VerifyError> {
    let mut chars = descriptor.chars();
    let parsed = parse_one(&mut chars, descriptor)?;
    if chars.next().is_some() {
        return Err(VerifyError::InvalidDescriptor(descriptor.to_string()));
    }
    Ok(parsed)
}

/// Parses a method descriptor, e.g. `(Lcom/example/Repo;I)V`, into its
/// parameter types and return type.
pub fn parse_method(descriptor: &str) -> Result<(Vec<TypeDesc>, TypeDesc), VerifyError> {
    let invalid = || VerifyError::InvalidDescriptor(descriptor.to_string());

    let rest = descriptor.strip_prefix('(').ok_or_else(invalid)?;
    let (params_part, return_part) = rest.split_once(')').ok_or_else(invalid)?;

    let mut params = vec![];
    let mut chars = params_part.chars();
    while chars.clone().next().is_some() {
        params.push(parse_one(&mut chars, descriptor)?);
    }

    Ok((params, parse_type(return_part)?))
}

fn parse_one(chars: &mut std::str::Chars<'_>, full: &str) -> Result<TypeDesc, VerifyError> {
    let invalid = || VerifyError::InvalidDescriptor(full.to_string());

    match chars.next().ok_or_else(invalid)? {
        'V' => Ok(TypeDesc::Void),
        'Z' => Ok(TypeDesc::Boolean),
        'B' => Ok(TypeDesc::Byte),
        'C' => Ok(TypeDesc::Char),
        'S' => Ok(TypeDesc::Short),
        'I' => Ok(TypeDesc::Int),
        'J' => Ok(TypeDesc::Long),
        'F' => Ok(TypeDesc::Float),
        'D' => Ok(TypeDesc::Double),
        'L' => {
            let name: String = chars.take_while(|c| *c != ';').collect();
            if name.is_empty() {
                return Err(invalid());
            }
            Ok(TypeDesc::Object(name))
        }
        '[' => Ok(TypeDesc::Array(Box::new(parse_one(chars, full)?))),
        _ => Err(invalid()),
    }
}

/// Whether a field descriptor denotes a configuration value rather than a
/// component dependency: primitives and `String` are value injections.
pub fn is_value_descriptor(descriptor: &str) -> bool {
    matches!(
        parse_type(descriptor),
        Ok(kind) if kind.is_primitive() || kind == TypeDesc::Object("java/lang/String".to_string())
    )
}

/// A symbolic field reference.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// A symbolic method reference.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// A loadable constant.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Const {
    Null,
    Int(i32),
    Str(String),
}

/// One typed instruction.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Insn {
    /// Pushes the receiver; invalid in static methods.
    LoadThis,
    /// Pushes the n-th method argument (0-based, receiver excluded).
    LoadArg(u16),
    LoadConst(Const),
    New(String),
    Dup,
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    GetField(FieldRef),
    PutField(FieldRef),
    InvokeSpecial(MethodRef),
    InvokeVirtual(MethodRef),
    InvokeStatic(MethodRef),
    Return,
    ReturnValue,
}

#[derive(Clone, Eq, PartialEq, Debug)]
enum StackSlot {
    Ty(TypeDesc),
    Null,
}

impl Display for StackSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StackSlot::Ty(kind) => kind.fmt(f),
            StackSlot::Null => f.write_str("null"),
        }
    }
}

fn assignable(target: &TypeDesc, slot: &StackSlot) -> bool {
    match slot {
        StackSlot::Null => matches!(target, TypeDesc::Object(_) | TypeDesc::Array(_)),
        StackSlot::Ty(found) => match (target, found) {
            // no class hierarchy knowledge at this level; any reference type
            // satisfies a reference target
            (TypeDesc::Object(_), TypeDesc::Object(_) | TypeDesc::Array(_)) => true,
            (TypeDesc::Array(_), TypeDesc::Array(_)) => true,
            _ => target == found,
        },
    }
}

struct Verifier<'a> {
    params: Vec<TypeDesc>,
    return_type: TypeDesc,
    is_static: bool,
    owner: &'a str,
    descriptor: &'a str,
    stack: Vec<StackSlot>,
    max_stack: usize,
}

impl<'a> Verifier<'a> {
    fn push(&mut self, slot: StackSlot) {
        self.stack.push(slot);
        self.max_stack = self.max_stack.max(self.stack.len());
    }

    fn pop(&mut self, at: usize) -> Result<StackSlot, VerifyError> {
        self.stack.pop().ok_or(VerifyError::StackUnderflow { at })
    }

    fn pop_matching(&mut self, at: usize, expected: &TypeDesc) -> Result<(), VerifyError> {
        let found = self.pop(at)?;
        if !assignable(expected, &found) {
            return Err(VerifyError::TypeMismatch {
                at,
                expected: expected.descriptor(),
                found: found.to_string(),
            });
        }
        Ok(())
    }

    fn pop_reference(&mut self, at: usize) -> Result<(), VerifyError> {
        let found = self.pop(at)?;
        if !matches!(
            found,
            StackSlot::Null | StackSlot::Ty(TypeDesc::Object(_)) | StackSlot::Ty(TypeDesc::Array(_))
        ) {
            return Err(VerifyError::TypeMismatch {
                at,
                expected: "a reference type".to_string(),
                found: found.to_string(),
            });
        }
        Ok(())
    }

    fn pop_invocation_args(&mut self, at: usize, descriptor: &str) -> Result<TypeDesc, VerifyError> {
        let (params, return_type) = parse_method(descriptor)?;
        for param in params.iter().rev() {
            self.pop_matching(at, param)?;
        }
        Ok(return_type)
    }

    fn step(&mut self, at: usize, insn: &Insn) -> Result<bool, VerifyError> {
        match insn {
            Insn::LoadThis => {
                if self.is_static {
                    return Err(VerifyError::ThisInStaticMethod);
                }
                self.push(StackSlot::Ty(TypeDesc::Object(self.owner.to_string())));
            }
            Insn::LoadArg(index) => {
                let param = self.params.get(*index as usize).cloned().ok_or_else(|| {
                    VerifyError::ArgOutOfRange {
                        index: *index,
                        descriptor: self.descriptor.to_string(),
                    }
                })?;
                self.push(StackSlot::Ty(param));
            }
            Insn::LoadConst(Const::Null) => self.push(StackSlot::Null),
            Insn::LoadConst(Const::Int(_)) => self.push(StackSlot::Ty(TypeDesc::Int)),
            Insn::LoadConst(Const::Str(_)) => self.push(StackSlot::Ty(TypeDesc::Object(
                "java/lang/String".to_string(),
            ))),
            Insn::New(class) => self.push(StackSlot::Ty(TypeDesc::Object(class.clone()))),
            Insn::Dup => {
                let top = self.stack.last().cloned().ok_or(VerifyError::StackUnderflow { at })?;
                self.push(top);
            }
            Insn::GetStatic(field) => {
                let kind = parse_type(&field.descriptor)?;
                self.push(StackSlot::Ty(kind));
            }
            Insn::PutStatic(field) => {
                let kind = parse_type(&field.descriptor)?;
                self.pop_matching(at, &kind)?;
            }
            Insn::GetField(field) => {
                self.pop_reference(at)?;
                let kind = parse_type(&field.descriptor)?;
                self.push(StackSlot::Ty(kind));
            }
            Insn::PutField(field) => {
                let kind = parse_type(&field.descriptor)?;
                self.pop_matching(at, &kind)?;
                self.pop_reference(at)?;
            }
            Insn::InvokeSpecial(method) | Insn::InvokeVirtual(method) => {
                let return_type = self.pop_invocation_args(at, &method.descriptor)?;
                self.pop_reference(at)?;
                if return_type != TypeDesc::Void {
                    self.push(StackSlot::Ty(return_type));
                }
            }
            Insn::InvokeStatic(method) => {
                let return_type = self.pop_invocation_args(at, &method.descriptor)?;
                if return_type != TypeDesc::Void {
                    self.push(StackSlot::Ty(return_type));
                }
            }
            Insn::Return => {
                if self.return_type != TypeDesc::Void {
                    return Err(VerifyError::TypeMismatch {
                        at,
                        expected: self.return_type.descriptor(),
                        found: "void return".to_string(),
                    });
                }
                if !self.stack.is_empty() {
                    return Err(VerifyError::ResidualStack {
                        depth: self.stack.len(),
                    });
                }
                return Ok(true);
            }
            Insn::ReturnValue => {
                let expected = self.return_type.clone();
                if expected == TypeDesc::Void {
                    return Err(VerifyError::TypeMismatch {
                        at,
                        expected: "a non-void return type".to_string(),
                        found: "V".to_string(),
                    });
                }
                self.pop_matching(at, &expected)?;
                if !self.stack.is_empty() {
                    return Err(VerifyError::ResidualStack {
                        depth: self.stack.len(),
                    });
                }
                return Ok(true);
            }
        }

        Ok(false)
    }
}

/// Verifies a method body against its descriptor, returning the maximum
/// operand stack depth on success.
pub fn verify(
    owner: &str,
    descriptor: &str,
    is_static: bool,
    code: &[Insn],
) -> Result<u16, VerifyError> {
    let (params, return_type) = parse_method(descriptor)?;
    let mut verifier = Verifier {
        params,
        return_type,
        is_static,
        owner,
        descriptor,
        stack: vec![],
        max_stack: 0,
    };

    let mut returned = false;
    for (at, insn) in code.iter().enumerate() {
        if returned {
            return Err(VerifyError::CodeAfterReturn { at });
        }
        returned = verifier.step(at, insn)?;
    }

    if !returned {
        return Err(VerifyError::MissingReturn);
    }

    Ok(verifier.max_stack as u16)
}

/// Incremental builder for verified method bodies.
#[derive(Clone, Debug)]
pub struct MethodBuilder {
    name: String,
    descriptor: String,
    access: u16,
    code: Vec<Insn>,
}

impl MethodBuilder {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, access: u16) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            code: vec![],
        }
    }

    pub fn insn(mut self, insn: Insn) -> Self {
        self.code.push(insn);
        self
    }

    pub fn load_this(self) -> Self {
        self.insn(Insn::LoadThis)
    }

    pub fn load_arg(self, index: u16) -> Self {
        self.insn(Insn::LoadArg(index))
    }

    pub fn put_field(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.insn(Insn::PutField(FieldRef {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }))
    }

    pub fn put_static(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.insn(Insn::PutStatic(FieldRef {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }))
    }

    pub fn ret(self) -> Self {
        self.insn(Insn::Return)
    }

    /// Verifies the accumulated body and produces the final method.
    pub fn build(self, owner: &str) -> Result<MethodInfo, VerifyError> {
        use crate::classfile::flags::ACC_STATIC;

        verify(
            owner,
            &self.descriptor,
            self.access & ACC_STATIC != 0,
            &self.code,
        )?;

        Ok(MethodInfo {
            name: self.name,
            descriptor: self.descriptor,
            access: self.access,
            code: self.code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::flags::{ACC_PUBLIC, ACC_STATIC};

    #[test]
    fn should_parse_descriptors() {
        assert_eq!(parse_type("I").unwrap(), TypeDesc::Int);
        assert_eq!(
            parse_type("Lcom/example/Repo;").unwrap(),
            TypeDesc::Object("com/example/Repo".to_string())
        );
        assert_eq!(
            parse_type("[[J").unwrap(),
            TypeDesc::Array(Box::new(TypeDesc::Array(Box::new(TypeDesc::Long))))
        );
        assert!(parse_type("Q").is_err());
        assert!(parse_type("II").is_err());
    }

    #[test]
    fn should_parse_method_descriptors() {
        let (params, ret) = parse_method("(Lcom/example/Repo;I)V").unwrap();
        assert_eq!(
            params,
            vec![
                TypeDesc::Object("com/example/Repo".to_string()),
                TypeDesc::Int
            ]
        );
        assert_eq!(ret, TypeDesc::Void);

        assert!(parse_method("Lcom/example/Repo;").is_err());
        assert!(parse_method("(L)V").is_err());
    }

    #[test]
    fn should_classify_value_descriptors() {
        assert!(is_value_descriptor("I"));
        assert!(is_value_descriptor("Z"));
        assert!(is_value_descriptor("Ljava/lang/String;"));
        assert!(!is_value_descriptor("Lcom/example/Repo;"));
        assert!(!is_value_descriptor("[I"));
        assert!(!is_value_descriptor("not a descriptor"));
    }

    #[test]
    fn should_verify_instance_setter_body() {
        let method = MethodBuilder::new("__di_set_repo", "(Lcom/example/Repo;)V", ACC_PUBLIC)
            .load_this()
            .load_arg(0)
            .put_field("com/example/Service", "repo", "Lcom/example/Repo;")
            .ret()
            .build("com/example/Service")
            .unwrap();

        assert_eq!(method.code.len(), 4);
    }

    #[test]
    fn should_reject_stack_underflow() {
        let result = MethodBuilder::new("bad", "(Lcom/example/Repo;)V", ACC_PUBLIC)
            .put_field("com/example/Service", "repo", "Lcom/example/Repo;")
            .ret()
            .build("com/example/Service");

        assert!(matches!(
            result.unwrap_err(),
            VerifyError::StackUnderflow { .. }
        ));
    }

    #[test]
    fn should_reject_type_mismatch() {
        let result = MethodBuilder::new("bad", "(I)V", ACC_PUBLIC)
            .load_this()
            .load_arg(0)
            .put_field("com/example/Service", "repo", "Lcom/example/Repo;")
            .ret()
            .build("com/example/Service");

        assert!(matches!(
            result.unwrap_err(),
            VerifyError::TypeMismatch { at: 2, .. }
        ));
    }

    #[test]
    fn should_reject_missing_return() {
        let result = verify(
            "com/example/Service",
            "()V",
            false,
            &[Insn::LoadThis, Insn::LoadConst(Const::Null)],
        );
        assert!(matches!(result.unwrap_err(), VerifyError::MissingReturn));
    }

    #[test]
    fn should_reject_residual_stack_at_return() {
        let result = verify(
            "com/example/Service",
            "()V",
            false,
            &[Insn::LoadThis, Insn::Return],
        );
        assert!(matches!(
            result.unwrap_err(),
            VerifyError::ResidualStack { depth: 1 }
        ));
    }

    #[test]
    fn should_reject_this_in_static_method() {
        let result = verify("com/example/Service", "()V", true, &[Insn::LoadThis]);
        assert!(matches!(
            result.unwrap_err(),
            VerifyError::ThisInStaticMethod
        ));
    }

    #[test]
    fn should_verify_static_setter_body() {
        let max_stack = verify(
            "com/example/Service",
            "(Lcom/example/Repo;)V",
            true,
            &[
                Insn::LoadArg(0),
                Insn::PutStatic(FieldRef {
                    owner: "com/example/Service".to_string(),
                    name: "repo".to_string(),
                    descriptor: "Lcom/example/Repo;".to_string(),
                }),
                Insn::Return,
            ],
        )
        .unwrap();
        assert_eq!(max_stack, 1);

        // ACC_STATIC is honored by the builder as well
        let method = MethodBuilder::new(
            "__di_set_repo",
            "(Lcom/example/Repo;)V",
            ACC_PUBLIC | ACC_STATIC,
        )
        .load_arg(0)
        .put_static("com/example/Service", "repo", "Lcom/example/Repo;")
        .ret()
        .build("com/example/Service")
        .unwrap();
        assert!(method.access & ACC_STATIC != 0);
    }

    #[test]
    fn should_verify_constructor_invocation() {
        let max_stack = verify(
            "com/example/Boot",
            "()V",
            true,
            &[
                Insn::New("com/example/Repo".to_string()),
                Insn::Dup,
                Insn::InvokeSpecial(MethodRef {
                    owner: "com/example/Repo".to_string(),
                    name: "<init>".to_string(),
                    descriptor: "()V".to_string(),
                }),
                Insn::PutStatic(FieldRef {
                    owner: "com/example/Boot".to_string(),
                    name: "_repo".to_string(),
                    descriptor: "Lcom/example/Repo;".to_string(),
                }),
                Insn::Return,
            ],
        )
        .unwrap();
        assert_eq!(max_stack, 2);
    }

    #[test]
    fn should_reject_code_after_return() {
        let result = verify(
            "com/example/Service",
            "()V",
            false,
            &[Insn::Return, Insn::Return],
        );
        assert!(matches!(
            result.unwrap_err(),
            VerifyError::CodeAfterReturn { at: 1 }
        ));
    }
}
