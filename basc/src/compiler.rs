//! Lowers parsed BASIC into IR.
//!
//! The compiler walks the pest parse tree in a single left-to-right pass and
//! emits [`Op`](struct.Op.html)s into the active code buffer: the main block,
//! the body of the `DEF FN` currently being defined, or the index side
//! buffer of an `INPUT` target. A shadow type stack mirrors what the value
//! stack will hold at runtime and drives `CAST` emission and the type tags
//! of emitted ops.
//!
//! Control flow is lowered to labels: line numbers label their first
//! instruction, and internal labels (>= 0x10000) are allocated for `IF`,
//! `ON ... GOTO` and user function entry points. The assembler resolves all
//! of them to code offsets.

use crate::data::{CompilerData, Constant, Function};
use crate::op::{Code, Op};
use crate::parser::Rule;
use abasic::{address, library, Opcode, Type};
use matches::debug_assert_matches;
use pest::iterators::Pair;
use std::collections::HashSet;

pub(crate) const START_INTERNAL_LABEL_COUNTER: i32 = 0x10000;
const READ_INDEX_VAR: &str = "__readIndex%";
/// Applesoft gives undeclared arrays eleven elements per dimension.
const IMPLICIT_DIM: i32 = 11;

/// A semantic error; aborts compilation.
#[derive(Debug)]
pub struct CompileError {
    pub line: i32,
    pub message: String,
}

type CResult<T> = Result<T, CompileError>;

/// Which code buffer receives emitted ops.
enum Context {
    Main,
    Function,
    Input,
}

#[derive(Clone, Copy)]
struct IfData {
    false_label: i32,
    end_label: i32,
}

struct InputData {
    var: String,
    ty: Type,
    /// Index-computing code captured for array targets.
    code: Code,
    types: Vec<Type>,
}

struct UserFunctionData {
    name: String,
    var: String,
    rettype: Type,
    label: i32,
    code: Code,
    types: Vec<Type>,
}

pub struct Compiler {
    pub data: CompilerData,
    initcode: Code,
    main_types: Vec<Type>,
    context: Context,
    current_line: i32,
    labels: HashSet<i32>,
    if_data: Vec<IfData>,
    input_data: Vec<InputData>,
    user_function: Option<UserFunctionData>,
    print_count: i32,
    internal_label_counter: i32,
    on_go_label: i32,
    on_go_index: i32,
    data_counter: i32,
}

impl Default for Compiler {
    fn default() -> Compiler {
        Compiler::new()
    }
}

impl Compiler {
    pub fn new() -> Compiler {
        Compiler {
            data: CompilerData::default(),
            initcode: Vec::new(),
            main_types: Vec::new(),
            context: Context::Main,
            current_line: -1,
            labels: HashSet::new(),
            if_data: Vec::new(),
            input_data: Vec::new(),
            user_function: None,
            print_count: 0,
            internal_label_counter: START_INTERNAL_LABEL_COUNTER,
            on_go_label: 0,
            on_go_index: 0,
            data_counter: 0,
        }
    }

    /// Compiles a parsed program into `self.data`.
    pub fn run(&mut self, program: Pair<Rule>) -> CResult<()> {
        debug_assert_matches!(program.as_rule(), Rule::program);
        self.data.variables.add(READ_INDEX_VAR, Type::Int32);
        self.restore_data()?;
        for line in program.into_inner() {
            if line.as_rule() == Rule::line {
                self.compile_line(line)?;
            }
        }
        // Start every run from deterministic state: clear all scalar
        // variables up front. Arrays are cleared by the RSZ that creates
        // them.
        let clears: Vec<Op> = self
            .data
            .variables
            .variables()
            .iter()
            .filter(|v| !v.value_type().is_array())
            .map(|v| {
                Op::typed(Opcode::CLR, v.value_type().scalar_type())
                    .with_int(v.address() as i32)
            })
            .collect();
        self.initcode.extend(clears);
        let main = std::mem::replace(&mut self.data.code, Vec::new());
        let mut code = std::mem::replace(&mut self.initcode, Vec::new());
        code.extend(main);
        self.data.code = code;
        Ok(())
    }

    fn compile_line(&mut self, line: Pair<Rule>) -> CResult<()> {
        let mut pairs = line.into_inner();
        let number = pairs.next().unwrap();
        let lineno: i32 = number
            .as_str()
            .parse()
            .map_err(|_| self.err("Line number out of range"))?;
        if lineno >= START_INTERNAL_LABEL_COUNTER {
            return Err(self.err(format!("Line number too large: {}", lineno)));
        }
        self.current_line = lineno;
        self.create_label(lineno)?;
        let statements = pairs.next().unwrap();
        for statement in statements.into_inner() {
            self.compile_statement(statement)?;
        }
        // IF scopes end with the line.
        while self.is_if() {
            self.end_if()?;
        }
        Ok(())
    }

    fn compile_statement(&mut self, statement: Pair<Rule>) -> CResult<()> {
        debug_assert_matches!(statement.as_rule(), Rule::statement);
        let inner = statement.into_inner().next().unwrap();
        match inner.as_rule() {
            Rule::rem_stmt => {}
            Rule::if_stmt => self.compile_if(inner)?,
            Rule::for_stmt => self.compile_for(inner)?,
            Rule::next_stmt => {
                let count = inner.into_inner().count().max(1);
                for _ in 0..count {
                    self.push_op(Op::new(Opcode::NEXT));
                }
            }
            Rule::onerr_stmt => {
                let target = line_ref_value(inner)?;
                self.push_op(Op::new(Opcode::ERRHDL).with_int(target));
            }
            Rule::on_goto_stmt => self.compile_on(inner, false)?,
            Rule::on_gosub_stmt => self.compile_on(inner, true)?,
            Rule::goto_stmt => {
                let target = line_ref_value(inner)?;
                self.create_goto(target);
            }
            Rule::gosub_stmt => {
                let target = line_ref_value(inner)?;
                self.create_gosub(target);
            }
            Rule::return_stmt => self.push_op(Op::new(Opcode::RET)),
            Rule::dim_stmt => {
                for decl in inner.into_inner() {
                    self.compile_dim(decl)?;
                }
            }
            Rule::read_stmt => {
                for target in inner.into_inner() {
                    self.compile_read_target(target)?;
                }
            }
            Rule::data_stmt => {
                for item in inner.into_inner() {
                    self.compile_data_item(item);
                }
            }
            Rule::restore_stmt => self.restore_data()?,
            Rule::def_stmt => self.compile_def(inner)?,
            Rule::end_stmt => self.push_op(Op::new(Opcode::END)),
            Rule::print_using_stmt => self.compile_print_using(inner)?,
            Rule::print_stmt => self.compile_print(inner)?,
            Rule::input_stmt => self.compile_input(inner)?,
            Rule::get_stmt => self.compile_get(inner)?,
            Rule::poke_stmt => {
                let mut pairs = inner.into_inner();
                self.compile_expr(pairs.next().unwrap())?;
                self.compile_expr(pairs.next().unwrap())?;
                self.call_function("poke", 2)?;
            }
            Rule::vtab_stmt => {
                self.compile_expr(inner.into_inner().next().unwrap())?;
                self.call_function("vtab", 1)?;
            }
            Rule::htab_stmt => {
                self.compile_expr(inner.into_inner().next().unwrap())?;
                self.call_function("htab", 1)?;
            }
            Rule::home_stmt => self.call_function("home", 0)?,
            Rule::text_stmt => self.call_function("text", 0)?,
            Rule::inverse_stmt => self.call_function("inverse", 0)?,
            Rule::normal_stmt => self.call_function("normal", 0)?,
            Rule::flash_stmt => self.call_function("flash", 0)?,
            Rule::let_stmt => self.compile_let(inner)?,
            _ => unreachable!(),
        }
        Ok(())
    }

    fn compile_if(&mut self, stmt: Pair<Rule>) -> CResult<()> {
        let mut pairs = stmt.into_inner();
        self.compile_expr(pairs.next().unwrap())?;
        let clause = pairs.next().unwrap();
        self.start_if()?;
        match clause.as_rule() {
            Rule::goto_clause => {
                let target = line_ref_value(clause)?;
                self.create_goto(target);
            }
            Rule::then_clause => {
                let mut inner = clause.into_inner();
                let branch = inner.next().unwrap();
                self.compile_branch(branch)?;
                if let Some(else_branch) = inner.next() {
                    self.else_if()?;
                    self.compile_branch(else_branch)?;
                }
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn compile_branch(&mut self, branch: Pair<Rule>) -> CResult<()> {
        match branch.as_rule() {
            Rule::line_ref => {
                let target: i32 = branch
                    .as_str()
                    .parse()
                    .map_err(|_| self.err("Line number out of range"))?;
                self.create_goto(target);
                Ok(())
            }
            Rule::statements => {
                for statement in branch.into_inner() {
                    self.compile_statement(statement)?;
                }
                Ok(())
            }
            _ => unreachable!(),
        }
    }

    fn compile_for(&mut self, stmt: Pair<Rule>) -> CResult<()> {
        let mut pairs = stmt.into_inner();
        let var = pairs.next().unwrap().as_str().to_string();
        self.compile_expr(pairs.next().unwrap())?;
        self.store_var(&var, true)?;
        let depth = self.types().len();
        self.compile_expr(pairs.next().unwrap())?;
        match pairs.next() {
            Some(step) => self.compile_expr(step)?,
            None => self.create_push_int(1),
        }
        let (addr, _) = self.find_and_create_var(&var, true);
        self.push_op(Op::new(Opcode::FOR).with_int(addr as i32));
        // FOR consumes the limit and step at runtime.
        self.types().truncate(depth);
        Ok(())
    }

    fn compile_on(&mut self, stmt: Pair<Rule>, gosub: bool) -> CResult<()> {
        let mut pairs = stmt.into_inner();
        self.compile_expr(pairs.next().unwrap())?;
        self.start_on_goto();
        for target in pairs {
            let lineno: i32 = target
                .as_str()
                .parse()
                .map_err(|_| self.err("Line number out of range"))?;
            if gosub {
                self.add_on_gosub(lineno)?;
            } else {
                self.add_on_goto(lineno)?;
            }
        }
        self.end_on_goto()
    }

    fn compile_dim(&mut self, decl: Pair<Rule>) -> CResult<()> {
        let mut pairs = decl.into_inner();
        let name = pairs.next().unwrap().as_str().to_string();
        let sizes: Vec<Pair<Rule>> = pairs.collect();
        let ndim = sizes.len();
        let depth = self.types().len();
        for size in sizes {
            self.compile_expr(size)?;
        }
        self.create_dim_var(&name, ndim)?;
        self.types().truncate(depth);
        Ok(())
    }

    fn compile_read_target(&mut self, target: Pair<Rule>) -> CResult<()> {
        let (name, subscript) = split_lvalue(target);
        let base = Type::from_suffix(&name);
        match subscript {
            Some(sub) => {
                let exprs: Vec<Pair<Rule>> = sub.into_inner().collect();
                let ndim = exprs.len();
                for e in exprs {
                    self.compile_expr(e)?;
                }
                self.create_array_offset(&name, ndim)?;
                self.read_var(&name, base.array_type())
            }
            None => self.read_var(&name, base),
        }
    }

    fn compile_data_item(&mut self, item: Pair<Rule>) {
        debug_assert_matches!(item.as_rule(), Rule::data_item);
        match item.into_inner().next() {
            Some(inner) if inner.as_rule() == Rule::string => {
                let text = string_text(inner);
                self.create_data_string(&text);
            }
            Some(inner) => {
                let text = inner.as_str().trim().to_string();
                match text.parse::<f64>() {
                    Ok(v) => self.create_data_number(v),
                    Err(_) => self.create_data_string(&text),
                }
            }
            None => self.create_data_string(""),
        }
    }

    fn compile_def(&mut self, stmt: Pair<Rule>) -> CResult<()> {
        let mut pairs = stmt.into_inner();
        let name = pairs.next().unwrap().as_str().to_string();
        let var = pairs.next().unwrap().as_str().to_string();
        self.start_user_function(&name, &var)?;
        self.compile_expr(pairs.next().unwrap())?;
        self.end_user_function()
    }

    fn compile_print_using(&mut self, stmt: Pair<Rule>) -> CResult<()> {
        let items: Vec<Pair<Rule>> = stmt.into_inner().collect();
        let last = items.len() - 1;
        for (i, item) in items.into_iter().enumerate() {
            self.compile_expr(item)?;
            self.call_printf(i == last)?;
        }
        Ok(())
    }

    fn compile_print(&mut self, stmt: Pair<Rule>) -> CResult<()> {
        let mut newline = true;
        if let Some(list) = stmt.into_inner().next() {
            let mut trailing_sep = false;
            for item in list.into_inner() {
                match item.as_rule() {
                    Rule::print_item => {
                        trailing_sep = false;
                        let inner = item.into_inner().next().unwrap();
                        if inner.as_rule() == Rule::tab_item {
                            self.compile_expr(inner.into_inner().next().unwrap())?;
                            self.call_print_tab()?;
                        } else {
                            self.compile_expr(inner)?;
                            self.call_print()?;
                        }
                    }
                    Rule::print_sep => {
                        trailing_sep = true;
                        if item.as_str() == "," {
                            self.create_push_str("\t");
                            self.call_print()?;
                        }
                    }
                    _ => unreachable!(),
                }
            }
            newline = !trailing_sep;
        }
        if newline {
            self.create_push_str("\n");
            self.call_print()?;
        }
        Ok(())
    }

    fn compile_input(&mut self, stmt: Pair<Rule>) -> CResult<()> {
        let mut prompt_flag = 1;
        let mut pairs = stmt.into_inner().peekable();
        if pairs.peek().map(|p| p.as_rule()) == Some(Rule::string) {
            let text = string_text(pairs.next().unwrap());
            self.create_push_str(&text);
            self.call_print()?;
            prompt_flag = 0;
        }
        self.start_input();
        for lvalue in pairs {
            self.compile_input_target(lvalue)?;
        }
        self.end_input(prompt_flag)
    }

    fn compile_get(&mut self, stmt: Pair<Rule>) -> CResult<()> {
        self.start_input();
        let lvalue = stmt.into_inner().next().unwrap();
        self.compile_input_target(lvalue)?;
        self.end_get()
    }

    fn compile_input_target(&mut self, lvalue: Pair<Rule>) -> CResult<()> {
        let (name, subscript) = split_lvalue(lvalue);
        self.add_input(&name, Type::from_suffix(&name));
        if let Some(sub) = subscript {
            let exprs: Vec<Pair<Rule>> = sub.into_inner().collect();
            let ndim = exprs.len();
            for e in exprs {
                self.compile_expr(e)?;
            }
            self.create_input_array_offset(ndim)?;
        }
        self.added_input();
        Ok(())
    }

    fn compile_let(&mut self, stmt: Pair<Rule>) -> CResult<()> {
        let mut pairs = stmt.into_inner();
        let (name, subscript) = split_lvalue(pairs.next().unwrap());
        let expr = pairs.next().unwrap();
        if let Some(sub) = subscript {
            let exprs: Vec<Pair<Rule>> = sub.into_inner().collect();
            let ndim = exprs.len();
            for e in exprs {
                self.compile_expr(e)?;
            }
            self.create_array_offset(&name, ndim)?;
        }
        self.compile_expr(expr)?;
        self.store_var(&name, true)
    }

    // ---- expressions ----------------------------------------------------

    fn compile_expr(&mut self, pair: Pair<Rule>) -> CResult<()> {
        match pair.as_rule() {
            Rule::expr => self.compile_chain(pair, "||"),
            Rule::and_expr => self.compile_chain(pair, "&&"),
            Rule::not_expr => {
                let inner = pair.into_inner().next().unwrap();
                if inner.as_rule() == Rule::not_expr {
                    self.compile_expr(inner)?;
                    self.create_not();
                    Ok(())
                } else {
                    self.compile_expr(inner)
                }
            }
            Rule::rel_expr | Rule::add_expr | Rule::mul_expr => {
                let mut pairs = pair.into_inner();
                self.compile_expr(pairs.next().unwrap())?;
                while let Some(op) = pairs.next() {
                    let operand = pairs.next().unwrap();
                    let op_text = normalize_operator(op.as_str());
                    self.compile_expr(operand)?;
                    self.create_operator(op_text)?;
                }
                Ok(())
            }
            Rule::pow_expr => {
                let mut pairs = pair.into_inner();
                self.compile_expr(pairs.next().unwrap())?;
                for operand in pairs {
                    self.compile_expr(operand)?;
                    self.call_function("pow", 2)?;
                }
                Ok(())
            }
            Rule::unary_expr => {
                let mut pairs = pair.into_inner();
                let first = pairs.next().unwrap();
                match first.as_rule() {
                    Rule::minus_op => {
                        self.compile_expr(pairs.next().unwrap())?;
                        self.create_negate();
                        Ok(())
                    }
                    Rule::plus_op => self.compile_expr(pairs.next().unwrap()),
                    _ => self.compile_expr(first),
                }
            }
            Rule::primary => {
                let inner = pair.into_inner().next().unwrap();
                match inner.as_rule() {
                    Rule::number => self.compile_number(inner),
                    Rule::string => {
                        let text = string_text(inner);
                        self.create_push_str(&text);
                        Ok(())
                    }
                    Rule::fn_call => {
                        let mut pairs = inner.into_inner();
                        let name = pairs.next().unwrap().as_str().to_lowercase();
                        self.compile_expr(pairs.next().unwrap())?;
                        self.call_function(&name, 1)
                    }
                    Rule::call_or_ref => self.compile_call_or_ref(inner),
                    Rule::expr => self.compile_expr(inner),
                    _ => unreachable!(),
                }
            }
            _ => unreachable!(),
        }
    }

    fn compile_chain(&mut self, pair: Pair<Rule>, op: &str) -> CResult<()> {
        let mut pairs = pair.into_inner();
        self.compile_expr(pairs.next().unwrap())?;
        for operand in pairs {
            self.compile_expr(operand)?;
            self.create_operator(op)?;
        }
        Ok(())
    }

    fn compile_number(&mut self, pair: Pair<Rule>) -> CResult<()> {
        let text = pair.as_str();
        if !text.contains('.') && !text.contains('e') && !text.contains('E') {
            if let Ok(v) = text.parse::<i32>() {
                self.create_push_int(v);
                return Ok(());
            }
        }
        let v: f64 = text
            .parse()
            .map_err(|_| self.err(format!("Malformed number: {}", text)))?;
        self.create_push_double(v);
        Ok(())
    }

    fn compile_call_or_ref(&mut self, pair: Pair<Rule>) -> CResult<()> {
        let mut pairs = pair.into_inner();
        let ident = pairs.next().unwrap().as_str().to_string();
        let args: Vec<Pair<Rule>> = pairs.collect();
        if args.is_empty() {
            return self.recall_var(&ident);
        }
        let mut lib_name = ident.to_lowercase();
        // MID$ with two arguments takes the rest of the string.
        if lib_name == "mid$" && args.len() == 2 {
            lib_name = "mid1$".to_string();
        }
        if library::find_function(&lib_name).is_some() {
            let count = args.len();
            for arg in args {
                self.compile_expr(arg)?;
            }
            self.call_function(&lib_name, count)
        } else {
            let ndim = args.len();
            if ndim > 2 {
                return Err(self.err(format!("Too many array indices for '{}'", ident)));
            }
            for arg in args {
                self.compile_expr(arg)?;
            }
            self.create_array_offset(&ident, ndim)?;
            self.recall_var(&ident)
        }
    }

    // ---- emitter --------------------------------------------------------

    fn code(&mut self) -> &mut Code {
        match self.context {
            Context::Main => &mut self.data.code,
            Context::Function => &mut self.user_function.as_mut().unwrap().code,
            Context::Input => &mut self.input_data.last_mut().unwrap().code,
        }
    }

    fn types(&mut self) -> &mut Vec<Type> {
        match self.context {
            Context::Main => &mut self.main_types,
            Context::Function => &mut self.user_function.as_mut().unwrap().types,
            Context::Input => &mut self.input_data.last_mut().unwrap().types,
        }
    }

    fn push_op(&mut self, op: Op) {
        self.code().push(op);
    }

    fn next_label(&mut self) -> i32 {
        self.internal_label_counter += 1;
        self.internal_label_counter
    }

    fn err<S: Into<String>>(&self, message: S) -> CompileError {
        CompileError {
            line: self.current_line,
            message: message.into(),
        }
    }

    /// Binds `label` to the next emitted instruction. Line numbers also get
    /// a `LINE` debug marker.
    fn create_label(&mut self, label: i32) -> CResult<()> {
        if label < START_INTERNAL_LABEL_COUNTER {
            self.push_op(Op::new(Opcode::LINE).with_int(label));
        }
        if !self.labels.insert(label) {
            return Err(if label >= START_INTERNAL_LABEL_COUNTER {
                self.err("Duplicate internal label")
            } else {
                self.err(format!("Duplicate line number: {}", label))
            });
        }
        let mut op = Op::new(Opcode::NOP);
        op.set_label(label);
        self.push_op(op);
        Ok(())
    }

    fn create_goto(&mut self, lineno: i32) {
        self.push_op(Op::new(Opcode::JUMP).with_int(lineno));
    }

    fn create_gosub(&mut self, lineno: i32) {
        self.push_op(Op::new(Opcode::JSR).with_int(lineno));
    }

    fn create_push_int(&mut self, v: i32) {
        self.push_op(Op::typed(Opcode::PUSH, Type::Int32).with_int(v));
        self.types().push(Type::Int32);
    }

    fn create_push_double(&mut self, v: f64) {
        self.push_op(Op::typed(Opcode::PUSH, Type::Double).with_double(v));
        self.types().push(Type::Double);
    }

    fn create_push_str(&mut self, s: &str) {
        let index = self.data.constants.add_string(s);
        let addr = address::constant(index);
        self.push_op(Op::typed(Opcode::PUSH, Type::Str).with_int(addr as i32));
        self.types().push(Type::Str);
    }

    fn create_operator(&mut self, op: &str) -> CResult<()> {
        if self.types().len() < 2 {
            return Err(self.err("Stack underflow in arithmetic/logical operation"));
        }
        let t2 = self.types().pop().unwrap();
        let t1 = self.types().pop().unwrap();
        let mut result = Type::result_type(t1, t2);
        let mnemonic = match op {
            "+" => Opcode::ARIADD,
            "-" => Opcode::ARISUB,
            "*" => Opcode::ARIMUL,
            "/" => Opcode::ARIDIV,
            "=" => {
                result = Type::Int32;
                Opcode::ARIEQ
            }
            "<>" => {
                result = Type::Int32;
                Opcode::ARINE
            }
            ">" => {
                result = Type::Int32;
                Opcode::ARIGT
            }
            "<" => {
                result = Type::Int32;
                Opcode::ARILT
            }
            ">=" => {
                result = Type::Int32;
                Opcode::ARIGE
            }
            "<=" => {
                result = Type::Int32;
                Opcode::ARILE
            }
            "&&" => {
                result = Type::Int32;
                Opcode::AND
            }
            "||" => {
                result = Type::Int32;
                Opcode::OR
            }
            _ => return Err(self.err(format!("Unknown operator '{}'", op))),
        };
        self.push_op(Op::new(mnemonic));
        self.types().push(result);
        Ok(())
    }

    fn create_negate(&mut self) {
        if self.types().last().map(|t| t.is_numeric()).unwrap_or(false) {
            self.push_op(Op::new(Opcode::NEG));
        }
    }

    fn create_not(&mut self) {
        let top = self.types().last().copied();
        if top.map(|t| t.is_numeric()).unwrap_or(false) {
            if top == Some(Type::Double) {
                self.push_op(Op::typed(Opcode::CAST, Type::Int32));
                *self.types().last_mut().unwrap() = Type::Int32;
            }
            self.push_op(Op::new(Opcode::ARINOT));
        }
    }

    /// Ensures `name` exists as an array and leaves the element offset on
    /// the stack (folding a second dimension via `dim1`, column major).
    fn create_array_offset(&mut self, raw: &str, ndim: usize) -> CResult<()> {
        let name = self.normalize_var(raw);
        let existing = self
            .data
            .variables
            .find(&name)
            .map(|v| (v.address(), v.value_type()));
        match existing {
            Some((_, ty)) if !ty.is_array() => {
                return Err(self.err(format!(
                    "Variable '{}' is already used as a scalar variable",
                    raw
                )));
            }
            Some(_) => {}
            None => {
                let ty = Type::from_suffix(&name).array_type();
                self.data.variables.add(name.clone(), ty);
                self.data.variables.add(format!("{}dim1", name), Type::Int32);
                let mut size = IMPLICIT_DIM;
                if ndim == 2 {
                    self.data.variables.add(format!("{}dim2", name), Type::Int32);
                    size *= IMPLICIT_DIM;
                }
                let (addr, ty) = self.variable(&name);
                self.initcode
                    .push(Op::typed(Opcode::PUSH, Type::Int32).with_int(size));
                self.initcode
                    .push(Op::typed(Opcode::RSZ, ty.scalar_type()).with_int(addr as i32));
            }
        }
        if ndim == 2 {
            let dim1 = format!("{}dim1", name);
            let (addr, ty) = self.variable(&dim1);
            self.recall_resolved(addr, ty)?;
            self.create_operator("*")?;
            self.create_operator("+")?;
        }
        if self.types().last() != Some(&Type::Int32) {
            self.push_op(Op::typed(Opcode::CAST, Type::Int32));
            if let Some(top) = self.types().last_mut() {
                *top = Type::Int32;
            }
        }
        Ok(())
    }

    /// Looks up an existing variable; the caller guarantees it exists.
    fn variable(&self, name: &str) -> (u32, Type) {
        let v = self.data.variables.find(name).unwrap();
        (v.address(), v.value_type())
    }

    fn find_and_create_var(&mut self, raw: &str, normalize: bool) -> (u32, Type) {
        let mut var = if normalize {
            self.normalize_var(raw)
        } else {
            raw.to_string()
        };
        if let Some(uf) = &self.user_function {
            if var == uf.var {
                // Simulate a local binding for the function argument.
                var = format!("__{}_{}", uf.name, var);
            }
        }
        if let Some(v) = self.data.variables.find(&var) {
            return (v.address(), v.value_type());
        }
        let ty = Type::from_suffix(&var);
        let v = self.data.variables.add(var, ty);
        (v.address(), v.value_type())
    }

    fn store_var(&mut self, raw: &str, swap: bool) -> CResult<()> {
        let (addr, ty) = self.find_and_create_var(raw, true);
        self.store_resolved(addr, ty, swap)
    }

    fn store_resolved(&mut self, addr: u32, ty: Type, swap: bool) -> CResult<()> {
        if ty.is_array() {
            if self.types().len() < 2 {
                return Err(self.err("Stack underflow in store: missing array index?"));
            }
            if swap {
                // Value arrived on top of the index; bring the index up.
                let t = *self.types().last().unwrap();
                self.push_op(Op::typed(Opcode::SWAP, t));
            }
            self.types().pop();
            self.types().pop();
            self.push_op(Op::typed(Opcode::STOI, ty.scalar_type()).with_int(addr as i32));
        } else {
            if self.types().is_empty() {
                return Err(self.err("Stack underflow in store"));
            }
            self.types().pop();
            self.push_op(Op::typed(Opcode::STO, ty).with_int(addr as i32));
        }
        Ok(())
    }

    fn recall_var(&mut self, raw: &str) -> CResult<()> {
        let (addr, ty) = self.find_and_create_var(raw, true);
        self.recall_resolved(addr, ty)
    }

    fn recall_resolved(&mut self, addr: u32, ty: Type) -> CResult<()> {
        if ty.is_array() {
            if self.types().is_empty() {
                return Err(self.err("Stack underflow in recall: missing array index?"));
            }
            self.types().pop();
            self.push_op(Op::typed(Opcode::RCLI, ty.scalar_type()).with_int(addr as i32));
            self.types().push(ty.scalar_type());
        } else {
            self.push_op(Op::typed(Opcode::RCL, ty).with_int(addr as i32));
            self.types().push(ty);
        }
        Ok(())
    }

    /// Emits one `print` call for the value on top of the stack.
    fn call_print(&mut self) -> CResult<()> {
        let t = self
            .types()
            .pop()
            .ok_or_else(|| self.err("Stack underflow in print"))?;
        self.push_op(Op::typed(Opcode::PUSH, Type::Int32).with_int(t.id() as i32));
        self.push_op(Op::typed(Opcode::PUSH, Type::Int32).with_int(1));
        self.call_function_typed("print")?;
        Ok(())
    }

    fn call_print_tab(&mut self) -> CResult<()> {
        self.types()
            .pop()
            .ok_or_else(|| self.err("Stack underflow in print"))?;
        self.call_function_typed("tab")?;
        Ok(())
    }

    /// Accumulates `PRINT USING` arguments; the final call carries the
    /// argument count and invokes `printf`.
    fn call_printf(&mut self, last: bool) -> CResult<()> {
        let t = self
            .types()
            .pop()
            .ok_or_else(|| self.err("Stack underflow in print using"))?;
        self.push_op(Op::typed(Opcode::PUSH, Type::Int32).with_int(t.id() as i32));
        self.print_count += 1;
        if last {
            let count = self.print_count;
            self.push_op(Op::typed(Opcode::PUSH, Type::Int32).with_int(count));
            self.call_function_typed("printf")?;
            self.print_count = 0;
        }
        Ok(())
    }

    fn start_input(&mut self) {
        self.input_data.clear();
    }

    fn add_input(&mut self, raw: &str, ty: Type) {
        let var = self.normalize_var(raw);
        self.input_data.push(InputData {
            var,
            ty,
            code: Vec::new(),
            types: Vec::new(),
        });
        self.context = Context::Input;
    }

    fn added_input(&mut self) {
        self.context = Context::Main;
    }

    fn create_input_array_offset(&mut self, ndim: usize) -> CResult<()> {
        let var = {
            let id = self.input_data.last_mut().unwrap();
            id.ty = id.ty.array_type();
            id.var.clone()
        };
        self.create_array_offset(&var, ndim)
    }

    fn end_input(&mut self, prompt_flag: i32) -> CResult<()> {
        let tags: Vec<i32> = self
            .input_data
            .iter()
            .map(|id| id.ty.scalar_type().id() as i32)
            .collect();
        let count = tags.len() as i32;
        for tag in tags {
            self.push_op(Op::typed(Opcode::PUSH, Type::Int32).with_int(tag));
        }
        self.push_op(Op::typed(Opcode::PUSH, Type::Int32).with_int(count));
        self.push_op(Op::typed(Opcode::PUSH, Type::Int32).with_int(prompt_flag));
        let t = self.call_function_typed("input")?;
        self.push_op(Op::typed(Opcode::POP, t));
        let mut list = std::mem::replace(&mut self.input_data, Vec::new());
        // Values come back in push order, so targets store in reverse.
        list.reverse();
        for id in list {
            let InputData {
                var,
                ty,
                code,
                types,
            } = id;
            self.types().push(ty.scalar_type());
            if ty.is_array() {
                self.code().extend(code);
                self.types().push(types.last().copied().unwrap_or(Type::Int32));
            }
            self.store_var(&var, false)?;
        }
        Ok(())
    }

    fn end_get(&mut self) -> CResult<()> {
        let mut list = std::mem::replace(&mut self.input_data, Vec::new());
        let id = list.remove(0);
        let InputData {
            var,
            ty,
            code,
            types,
        } = id;
        self.push_op(
            Op::typed(Opcode::PUSH, Type::Int32).with_int(ty.scalar_type().id() as i32),
        );
        self.call_function_typed("get")?;
        self.types().push(ty.scalar_type());
        if ty.is_array() {
            self.code().extend(code);
            self.types().push(types.last().copied().unwrap_or(Type::Int32));
        }
        self.store_var(&var, false)
    }

    fn start_if(&mut self) -> CResult<()> {
        let false_label = self.next_label();
        let end_label = self.next_label();
        if self.types().last() != Some(&Type::Int32) {
            self.types().pop();
            self.push_op(Op::typed(Opcode::CAST, Type::Int32));
            self.types().push(Type::Int32);
        }
        // JZ consumes the condition.
        self.types().pop();
        self.push_op(Op::new(Opcode::JZ).with_int(false_label));
        self.if_data.push(IfData {
            false_label,
            end_label,
        });
        Ok(())
    }

    fn else_if(&mut self) -> CResult<()> {
        let id = *self.if_data.last().unwrap();
        // The true branch jumps over the else part.
        self.push_op(Op::new(Opcode::JUMP).with_int(id.end_label));
        self.create_label(id.false_label)?;
        self.if_data.last_mut().unwrap().false_label = 0;
        Ok(())
    }

    fn end_if(&mut self) -> CResult<()> {
        let id = self.if_data.pop().unwrap();
        self.create_label(if id.false_label == 0 {
            id.end_label
        } else {
            id.false_label
        })
    }

    fn is_if(&self) -> bool {
        !self.if_data.is_empty()
    }

    fn start_on_goto(&mut self) {
        self.on_go_label = self.next_label();
        self.on_go_index = 1;
        // Calculated jumps select on an integer.
        self.types().pop();
        self.push_op(Op::typed(Opcode::CAST, Type::Int32));
        self.types().push(Type::Int32);
    }

    fn add_on_goto(&mut self, lineno: i32) -> CResult<()> {
        let label = self.compare_on_selector()?;
        self.create_goto(lineno);
        self.create_label(label)
    }

    fn add_on_gosub(&mut self, lineno: i32) -> CResult<()> {
        let label = self.compare_on_selector()?;
        self.create_gosub(lineno);
        // After the subroutine returns, skip the remaining alternatives.
        self.create_goto(self.on_go_label);
        self.create_label(label)
    }

    /// Duplicates the selector, compares it to the running index and emits
    /// the branch to the next alternative. Leaves the matched path with the
    /// selector discarded.
    fn compare_on_selector(&mut self) -> CResult<i32> {
        let t = *self.types().last().unwrap();
        self.push_op(Op::typed(Opcode::DUP, t));
        self.types().push(t);
        let index = self.on_go_index;
        self.on_go_index += 1;
        self.create_push_int(index);
        self.create_operator("=")?;
        let label = self.next_label();
        self.types().pop();
        self.push_op(Op::new(Opcode::JZ).with_int(label));
        self.push_op(Op::typed(Opcode::POP, t));
        Ok(label)
    }

    fn end_on_goto(&mut self) -> CResult<()> {
        let t = *self.types().last().unwrap();
        self.push_op(Op::typed(Opcode::POP, t));
        self.types().pop();
        self.create_label(self.on_go_label)
    }

    fn restore_data(&mut self) -> CResult<()> {
        self.create_push_int(0);
        let (addr, ty) = self.variable(READ_INDEX_VAR);
        self.store_resolved(addr, ty, true)
    }

    fn create_data_number(&mut self, v: f64) {
        let name = format!("DATA_{}", self.data_counter);
        self.data.constants.add(Constant::double(name, v));
        self.data_counter += 1;
    }

    fn create_data_string(&mut self, v: &str) {
        let name = format!("DATA_{}", self.data_counter);
        self.data.constants.add(Constant::string(name, v));
        self.data_counter += 1;
    }

    /// `READ target`: fetch the constant named by the read index, store it
    /// and advance the index.
    fn read_var(&mut self, raw: &str, ty: Type) -> CResult<()> {
        let (ri_addr, ri_ty) = self.variable(READ_INDEX_VAR);
        self.recall_resolved(ri_addr, ri_ty)?;
        self.types().pop();
        self.push_op(
            Op::typed(Opcode::PUSH, Type::Int32).with_int(ty.scalar_type().id() as i32),
        );
        self.call_function_typed("read")?;
        self.types().push(ty.scalar_type());
        self.store_var(raw, true)?;
        self.push_op(Op::typed(Opcode::INC, ri_ty).with_int(ri_addr as i32));
        Ok(())
    }

    fn create_dim_var(&mut self, raw: &str, ndim: usize) -> CResult<()> {
        let name = self.normalize_var(raw);
        match self.data.variables.find(&name) {
            Some(v) if !v.value_type().is_array() => {
                return Err(self.err(format!(
                    "Cannot change dimension on variable '{}' because it is already used",
                    raw
                )));
            }
            Some(_) => {}
            None => {
                let ty = Type::from_suffix(&name).array_type();
                self.data.variables.add(name.clone(), ty);
            }
        }
        if self.data.variables.find(&format!("{}dim1", name)).is_none() {
            self.data.variables.add(format!("{}dim1", name), Type::Int32);
        }
        if ndim == 2 && self.data.variables.find(&format!("{}dim2", name)).is_none() {
            self.data.variables.add(format!("{}dim2", name), Type::Int32);
        }
        // The DIM value is the last valid index; element counts are one
        // larger.
        if ndim == 2 {
            self.create_push_int(1);
            self.push_op(Op::new(Opcode::ARIADD));
            self.push_op(Op::typed(Opcode::DUP, Type::Int32));
            let (addr, ty) = self.variable(&format!("{}dim2", name));
            self.push_op(Op::typed(Opcode::STO, ty).with_int(addr as i32));
            self.push_op(Op::typed(Opcode::SWAP, Type::Int32));
        }
        self.create_push_int(1);
        self.push_op(Op::new(Opcode::ARIADD));
        self.push_op(Op::typed(Opcode::DUP, Type::Int32));
        let (addr, ty) = self.variable(&format!("{}dim1", name));
        self.push_op(Op::typed(Opcode::STO, ty).with_int(addr as i32));
        if ndim == 2 {
            self.push_op(Op::new(Opcode::ARIMUL));
        }
        let (addr, ty) = self.variable(&name);
        self.push_op(Op::typed(Opcode::RSZ, ty.scalar_type()).with_int(addr as i32));
        Ok(())
    }

    fn call_function(&mut self, name: &str, npar: usize) -> CResult<()> {
        if self.types().len() < npar {
            return Err(self.err(format!(
                "Not enough parameters in call to function '{}'",
                name
            )));
        }
        for _ in 0..npar {
            self.types().pop();
        }
        let t = self.call_function_typed(name)?;
        if t != Type::Undefined {
            self.types().push(t);
        }
        Ok(())
    }

    fn call_function_typed(&mut self, name: &str) -> CResult<Type> {
        if let Some((label, rettype)) = self
            .data
            .functions
            .find(name)
            .map(|f| (f.label, f.rettype))
        {
            self.create_gosub(label);
            return Ok(rettype);
        }
        match library::find_function(name) {
            Some(f) => {
                self.push_op(Op::new(Opcode::CALL).with_int(i32::from(f.id)));
                Ok(f.rettype)
            }
            None => Err(self.err(format!("Undefined function '{}'", name))),
        }
    }

    fn start_user_function(&mut self, name: &str, var: &str) -> CResult<()> {
        if self.user_function.is_some() {
            return Err(self.err("Nested function definition"));
        }
        let label = self.next_label();
        let norm_var = self.normalize_var(var);
        self.user_function = Some(UserFunctionData {
            name: name.to_lowercase(),
            var: norm_var.clone(),
            rettype: Type::Double,
            label,
            code: Vec::new(),
            types: Vec::new(),
        });
        self.context = Context::Function;
        self.create_label(label)?;
        // The caller's argument sits under the return address.
        self.push_op(Op::new(Opcode::SWAP));
        let (addr, ty) = self.find_and_create_var(&norm_var, false);
        self.push_op(Op::typed(Opcode::STO, ty).with_int(addr as i32));
        Ok(())
    }

    fn end_user_function(&mut self) -> CResult<()> {
        // Bring the return address back on top before returning.
        self.push_op(Op::new(Opcode::SWAP));
        self.push_op(Op::new(Opcode::RET));
        self.context = Context::Main;
        let uf = self.user_function.take().unwrap();
        let f = Function {
            name: uf.name,
            var: uf.var,
            rettype: uf.rettype,
            code: uf.code,
            label: uf.label,
        };
        if !self.data.functions.add(f) {
            return Err(self.err("Redefinition of user function not allowed"));
        }
        Ok(())
    }

    fn normalize_var(&self, raw: &str) -> String {
        if raw.starts_with("__") {
            return raw.to_string();
        }
        let mut var = raw.to_lowercase();
        let mut suffix = '\0';
        if let Some(n) = var.find('%') {
            suffix = '%';
            var.truncate(n);
        } else if let Some(n) = var.find('$') {
            suffix = '$';
            var.truncate(n);
        }
        if var.len() > 2 {
            var.truncate(2);
        }
        if suffix != '\0' {
            var.push(suffix);
        }
        var
    }
}

fn split_lvalue(pair: Pair<Rule>) -> (String, Option<Pair<Rule>>) {
    debug_assert_matches!(pair.as_rule(), Rule::lvalue);
    let mut pairs = pair.into_inner();
    let name = pairs.next().unwrap().as_str().to_string();
    (name, pairs.next())
}

fn string_text(pair: Pair<Rule>) -> String {
    pair.into_inner().next().unwrap().as_str().to_string()
}

fn line_ref_value(pair: Pair<Rule>) -> Result<i32, CompileError> {
    let inner = pair.into_inner().next().unwrap();
    inner.as_str().parse().map_err(|_| CompileError {
        line: -1,
        message: "Line number out of range".to_string(),
    })
}

fn normalize_operator(op: &str) -> &str {
    match op {
        "><" => "<>",
        "=<" => "<=",
        "=>" => ">=",
        other => other,
    }
}
