#[macro_use]
extern crate clap;

use clap::Arg;
use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Debug)]
enum Error {
    Io(std::io::Error, PathBuf),
    Basc(basc::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err, path) => {
                writeln!(f, "File \"{}\": {}", path.display(), err)
            }
            Error::Basc(err) => write!(f, "{}", err),
        }
    }
}

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("Sets the BASIC source file to compile")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("OUTPUT")
                .help("Sets the image file to write to"),
        )
        .arg(
            Arg::with_name("no_debug")
                .short("d")
                .long("no-debug")
                .help("Strips line debug info from the image"),
        )
        .get_matches();

    let input = matches.value_of("INPUT").unwrap();
    let output = matches.value_of("output");
    let no_debug = matches.is_present("no_debug");

    if let Err(err) = basc(input, output, no_debug) {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn basc(input: &str, output: Option<&str>, no_debug: bool) -> Result<(), Error> {
    let input_path = Path::new(input);
    let file = File::open(input_path)
        .map_err(|err| Error::Io(err, input_path.to_owned()))?;
    let mut source = String::new();
    BufReader::new(file)
        .read_to_string(&mut source)
        .map_err(|err| Error::Io(err, input_path.to_owned()))?;

    let (executable, warnings) =
        basc::compile_with(&source, no_debug).map_err(Error::Basc)?;
    for message in warnings.messages() {
        eprintln!("{}", message);
    }

    let output_path: PathBuf = output
        .map(PathBuf::from)
        .unwrap_or_else(|| input_path.with_extension("bex"));
    executable
        .save_file(&output_path)
        .map_err(|err| Error::Io(err, output_path))?;
    Ok(())
}
