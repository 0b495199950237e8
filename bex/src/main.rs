#[macro_use]
extern crate clap;

mod console;

use abasic::diskfile::DiskFile;
use abasic::{disassembler, Executable, Vm};
use clap::{Arg, ArgGroup};
use console::{ConsoleSink, StdinSource};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
enum Error {
    Io(std::io::Error, PathBuf),
    Compile(basc::Error),
    Load(abasic::LoadError),
    Run(abasic::VmError),
    Clap(clap::Error),
    ChainNotFound(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err, path) => writeln!(f, "File \"{}\": {}", path.display(), err),
            Error::Compile(err) => write!(f, "{}", err),
            Error::Load(err) => write!(f, "{}", err),
            Error::Run(err) => write!(f, "{}", err),
            Error::Clap(err) => write!(f, "{}", err),
            Error::ChainNotFound(name) => {
                write!(f, "Chained program \"{}\" not found", name)
            }
        }
    }
}

fn main() {
    env_logger::init();
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("SCRIPT")
                .help("Sets the BASIC source file to run")
                .index(1),
        )
        .arg(
            Arg::with_name("image")
                .short("i")
                .long("image")
                .takes_value(true)
                .value_name("IMAGE")
                .help("Sets a compiled image to run instead of a script"),
        )
        .arg(
            Arg::with_name("disk")
                .short("D")
                .long("disk")
                .takes_value(true)
                .value_name("DISK")
                .help("Sets the disk directory for DOS file commands"),
        )
        .arg(
            Arg::with_name("slowdown")
                .short("s")
                .long("slowdown")
                .takes_value(true)
                .value_name("MICROSECONDS")
                .default_value("0")
                .help("Sets the per-instruction delay in microseconds"),
        )
        .arg(
            Arg::with_name("disassemble")
                .short("l")
                .long("disassemble")
                .help("Prints the compiled code instead of running it"),
        )
        .group(
            ArgGroup::with_name("input")
                .args(&["SCRIPT", "image"])
                .required(true),
        )
        .get_matches();

    let result = (|| {
        let slowdown =
            value_t!(matches.value_of("slowdown"), u32).map_err(Error::Clap)?;
        let disk = matches.value_of("disk").unwrap_or(".").to_string();
        let executable = match matches.value_of("SCRIPT") {
            Some(script) => compile_file(Path::new(script))?,
            None => {
                let image = matches.value_of("image").unwrap();
                Executable::load_file(image).map_err(Error::Load)?
            }
        };
        if matches.is_present("disassemble") {
            let stdout = std::io::stdout();
            return disassembler::disassemble(&executable, &mut stdout.lock())
                .map_err(|err| Error::Io(err, PathBuf::new()));
        }
        run_chained(executable, &disk, slowdown)
    })();

    if let Err(err) = result {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn compile_file(path: &Path) -> Result<Executable, Error> {
    let source =
        fs::read_to_string(path).map_err(|err| Error::Io(err, path.to_owned()))?;
    let (executable, warnings) = basc::compile(&source).map_err(Error::Compile)?;
    for message in warnings.messages() {
        eprintln!("{}", message);
    }
    Ok(executable)
}

/// Runs the executable; when the program chains to another file via DOS
/// `RUN`, compiles and runs that file in the same VM until no chain is
/// pending.
fn run_chained(executable: Executable, disk: &str, slowdown: u32) -> Result<(), Error> {
    let input = Arc::new(StdinSource::new());
    let out = Arc::new(ConsoleSink::new());
    let mut vm = Vm::new(input, out);
    vm.set_disk(disk);
    vm.set_slowdown(slowdown);
    let mut executable = executable;
    loop {
        vm.run_executable(Arc::new(executable)).map_err(Error::Run)?;
        let chain = vm.chained_file().to_string();
        if chain.is_empty() {
            return Ok(());
        }
        debug!("chaining to {}", chain);
        let path = resolve_chain(Path::new(disk), &chain)
            .ok_or_else(|| Error::ChainNotFound(chain.clone()))?;
        executable = compile_file(&path)?;
        vm.set_disk(disk);
    }
}

/// Maps a DOS `RUN` argument onto the disk directory, trying the corrected
/// file name as is and with a `.bas` extension.
fn resolve_chain(disk: &Path, name: &str) -> Option<PathBuf> {
    let corrected = DiskFile::correct_filename(name);
    let candidates = [
        disk.join(&corrected),
        disk.join(format!("{}.bas", corrected)),
        disk.join(name),
    ];
    candidates.iter().find(|p| p.is_file()).cloned()
}
