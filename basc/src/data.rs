//! Shared compiler/assembler state: constants, variables, user functions.

use crate::op::Code;
use abasic::{address, Type, Value};

/// A value paired with its declared type, as it appears in the constant
/// pool.
#[derive(Clone, Debug, PartialEq)]
pub struct TypedValue {
    pub ty: Type,
    pub value: Value,
}

impl TypedValue {
    pub fn int(v: i32) -> TypedValue {
        TypedValue {
            ty: Type::Int32,
            value: Value::Int32(v),
        }
    }

    pub fn double(v: f64) -> TypedValue {
        TypedValue {
            ty: Type::Double,
            value: Value::Double(v),
        }
    }

    pub fn string<S: Into<String>>(v: S) -> TypedValue {
        TypedValue {
            ty: Type::Str,
            value: Value::Str(v.into()),
        }
    }
}

/// A named, immutable sequence of typed values destined for the text
/// segment.
#[derive(Clone, Debug, PartialEq)]
pub struct Constant {
    name: String,
    ty: Type,
    addr: u32,
    values: Vec<TypedValue>,
}

impl Constant {
    pub fn string<S: Into<String>>(name: S, v: &str) -> Constant {
        Constant {
            name: name.into(),
            ty: Type::Str,
            addr: 0,
            values: vec![TypedValue::string(v)],
        }
    }

    pub fn int<S: Into<String>>(name: S, v: i32) -> Constant {
        Constant {
            name: name.into(),
            ty: Type::Int32,
            addr: 0,
            values: vec![TypedValue::int(v)],
        }
    }

    pub fn double<S: Into<String>>(name: S, v: f64) -> Constant {
        Constant {
            name: name.into(),
            ty: Type::Double,
            addr: 0,
            values: vec![TypedValue::double(v)],
        }
    }

    pub fn array<S: Into<String>>(name: S, values: Vec<TypedValue>, ty: Type) -> Constant {
        Constant {
            name: name.into(),
            ty,
            addr: 0,
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> Type {
        self.ty
    }

    /// The tagged constant address assigned during assembly.
    pub fn address(&self) -> u32 {
        address::constant(self.addr)
    }

    pub fn set_address(&mut self, a: u32) {
        self.addr = a;
    }

    pub fn values(&self) -> &[TypedValue] {
        &self.values[..]
    }

    fn is_anonymous(&self) -> bool {
        self.name.starts_with('$')
    }
}

/// The constant pool under construction. Anonymous string literals are
/// de-duplicated by value.
#[derive(Default)]
pub struct Constants {
    list: Vec<Constant>,
    tmp_counter: u32,
}

impl Constants {
    pub fn clear(&mut self) {
        self.list.clear();
        self.tmp_counter = 0;
    }

    /// Adds a constant and returns its pool index.
    pub fn add(&mut self, c: Constant) -> u32 {
        self.list.push(c);
        (self.list.len() - 1) as u32
    }

    /// Adds an anonymous string literal, reusing an existing anonymous
    /// constant with the same value.
    pub fn add_string(&mut self, v: &str) -> u32 {
        let existing = self.list.iter().position(|c| {
            c.is_anonymous()
                && c.value_type() == Type::Str
                && c.values().first().map(|t| &t.value) == Some(&Value::Str(v.to_string()))
        });
        if let Some(index) = existing {
            return index as u32;
        }
        let name = format!("${}", self.tmp_counter);
        self.tmp_counter += 1;
        self.add(Constant::string(name, v))
    }

    pub fn find(&self, name: &str) -> Option<&Constant> {
        self.list.iter().find(|c| c.name() == name)
    }

    pub fn constants(&self) -> &[Constant] {
        &self.list[..]
    }

    pub fn constants_mut(&mut self) -> &mut [Constant] {
        &mut self.list[..]
    }
}

/// A global variable with its assigned chunk address.
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    name: String,
    ty: Type,
    addr: u32,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> Type {
        self.ty
    }

    /// The tagged global address.
    pub fn address(&self) -> u32 {
        address::global(self.addr)
    }
}

/// Declaration-ordered list of global variables; addresses are assigned on
/// insertion.
#[derive(Default)]
pub struct VariableList {
    addr: u32,
    list: Vec<Variable>,
}

impl VariableList {
    pub fn clear(&mut self) {
        self.list.clear();
        self.addr = 0;
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn add<S: Into<String>>(&mut self, name: S, ty: Type) -> &Variable {
        let v = Variable {
            name: name.into(),
            ty,
            addr: self.addr,
        };
        self.addr += 1;
        self.list.push(v);
        self.list.last().unwrap()
    }

    pub fn find(&self, name: &str) -> Option<&Variable> {
        self.list.iter().find(|v| v.name() == name)
    }

    /// The number of chunks the VM must allocate.
    pub fn numeric_block_size(&self) -> u32 {
        self.addr
    }

    pub fn variables(&self) -> &[Variable] {
        &self.list[..]
    }
}

/// A user-defined function (`DEF FN`).
pub struct Function {
    pub name: String,
    /// Name of the bound argument variable (already renamed to its local
    /// form).
    pub var: String,
    pub rettype: Type,
    pub code: Code,
    /// Label of the function entry point.
    pub label: i32,
}

#[derive(Default)]
pub struct FunctionList {
    list: Vec<Function>,
}

impl FunctionList {
    pub fn clear(&mut self) {
        self.list.clear();
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Function names must be unique; returns false on redefinition.
    pub fn add(&mut self, f: Function) -> bool {
        if self.list.iter().any(|existing| existing.name == f.name) {
            return false;
        }
        self.list.push(f);
        true
    }

    pub fn find(&self, name: &str) -> Option<&Function> {
        self.list.iter().find(|f| f.name == name)
    }

    pub fn functions(&self) -> &[Function] {
        &self.list[..]
    }
}

/// Everything the assembler needs from a finished compilation pass.
#[derive(Default)]
pub struct CompilerData {
    pub constants: Constants,
    pub functions: FunctionList,
    pub variables: VariableList,
    pub code: Code,
    /// Strip `LINE` debug ops from the emitted image.
    pub no_debug: bool,
}

impl CompilerData {
    pub fn clear(&mut self) {
        self.constants.clear();
        self.functions.clear();
        self.variables.clear();
        self.code.clear();
    }
}
