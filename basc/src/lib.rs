//! Compiler for Applesoft BASIC.
//!
//! The main entry point is [`compile`](fn.compile.html), which accepts a
//! BASIC source text and returns the assembled
//! [`Executable`](../abasic/struct.Executable.html) together with any
//! warnings raised along the way.
//!
//! Parsing is implemented with [pest]; the lexical failure mode is a
//! [`pest::error::Error`] carrying the offending span, so all of pest's
//! pretty formatting is available to embedders.
//!
//! Compilation is two-pass: the [`Compiler`](compiler/struct.Compiler.html)
//! lowers the parse tree to a typed IR in one left-to-right sweep, and the
//! [assembler](assembler/fn.assemble.html) lays the IR out into the final
//! image, resolving line numbers and internal labels to code offsets.
//!
//! [pest]: https://docs.rs/pest/

pub mod assembler;
pub mod compiler;
pub mod data;
pub mod errors;
pub mod op;
pub mod parser;

#[cfg(test)]
mod test;

use abasic::Executable;
use pest::Parser;
use std::fmt;

pub use crate::errors::{Errors, Level, Message};
pub use crate::parser::{BasicParser, Rule};

#[derive(Debug)]
pub enum Error {
    /// Lexical/syntactic failure with source span.
    Parse(Box<pest::error::Error<Rule>>),
    /// Semantic failure(s); parsing succeeded.
    Compile(Errors),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Parse(err) => write!(f, "{}", err),
            Error::Compile(errors) => {
                for message in errors.messages() {
                    writeln!(f, "{}", message)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {}

/// Compiles a BASIC program into an executable image.
pub fn compile(source: &str) -> Result<(Executable, Errors), Error> {
    compile_with(source, false)
}

/// Compiles with the option to strip `LINE` debug markers from the image.
pub fn compile_with(source: &str, no_debug: bool) -> Result<(Executable, Errors), Error> {
    let program = BasicParser::parse(Rule::program, source)
        .map_err(|err| Error::Parse(Box::new(err)))?
        .next()
        .unwrap();
    let mut compiler = compiler::Compiler::new();
    compiler.data.no_debug = no_debug;
    if let Err(err) = compiler.run(program) {
        let mut errors = Errors::new();
        errors.add_error(err.line, err.message);
        return Err(Error::Compile(errors));
    }
    let (executable, errors) = assembler::assemble(&mut compiler.data);
    match executable {
        Some(x) if !errors.has_errors() => Ok((x, errors)),
        _ => Err(Error::Compile(errors)),
    }
}
