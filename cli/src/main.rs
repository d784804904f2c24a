#[macro_use]
extern crate clap;

use asm8085::CpuMode;
use asmsrc::AssembleFailure;
use clap::Arg;
use std::fs::File;
use std::io::prelude::*;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::exit;

#[derive(Debug)]
enum IOErrorContext {
    ReadInput,
    WriteOutput,
}

#[derive(Debug)]
enum Error {
    Assemble(AssembleFailure),
    Io(std::io::Error, IOErrorContext, PathBuf),
    BadCpu(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err, context, path) => write!(
                f,
                "{} file \"{}\" failed: {}",
                match context {
                    IOErrorContext::ReadInput => "reading input",
                    IOErrorContext::WriteOutput => "writing output",
                },
                path.display(),
                err
            ),
            Error::Assemble(err) => write!(f, "{}", err),
            Error::BadCpu(got) => write!(f, "unknown cpu \"{}\", expected 8080 or 8085", got),
        }
    }
}

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("SOURCE")
                .help("Sets the source file to assemble")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("OUT")
                .help("Sets the binary output file to write to (default: SOURCE with a .bin extension)"),
        )
        .arg(
            Arg::with_name("listing")
                .short("l")
                .long("listing")
                .takes_value(true)
                .value_name("LIST")
                .help("Writes an assembly listing and symbol table to this file"),
        )
        .arg(
            Arg::with_name("cpu")
                .long("cpu")
                .takes_value(true)
                .value_name("8080|8085")
                .possible_values(&["8080", "8085"])
                .default_value("8085")
                .help("Selects the starting cpu mode (a `cpu` directive can still switch it)"),
        )
        .get_matches();

    let source = matches.value_of("SOURCE").unwrap();
    let output = matches.value_of("output");
    let listing = matches.value_of("listing");
    let cpu = matches.value_of("cpu").unwrap();

    match run(source, output, listing, cpu) {
        Ok(()) => {}
        Err(err @ Error::Assemble(AssembleFailure::SecondPass(_))) => {
            eprintln!("{}", err);
            exit(2);
        }
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    }
}

fn run(source: &str, output: Option<&str>, listing: Option<&str>, cpu: &str) -> Result<(), Error> {
    let cpu_mode = match cpu {
        "8080" => CpuMode::Intel8080,
        "8085" => CpuMode::Intel8085,
        other => return Err(Error::BadCpu(other.to_string())),
    };

    let source_path = Path::new(source);
    let mut input_file = File::open(source_path)
        .map_err(|err| Error::Io(err, IOErrorContext::ReadInput, source_path.to_owned()))?;
    let mut text = String::new();
    input_file
        .read_to_string(&mut text)
        .map_err(|err| Error::Io(err, IOErrorContext::ReadInput, source_path.to_owned()))?;

    let assembled = asmsrc::assemble_with_cpu(&text, source, cpu_mode).map_err(Error::Assemble)?;

    let image = vexfile::emit_binary(&assembled.list)
        .map_err(|message| Error::Assemble(AssembleFailure::SecondPass(vec![asmsrc::AssembleError::new(source, 0, message)])))?;

    let output_path: PathBuf = output.map(PathBuf::from).unwrap_or_else(|| source_path.with_extension("bin"));
    let mut output_file = File::create(&output_path)
        .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, output_path.clone()))?;
    output_file
        .write_all(&image)
        .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, output_path.clone()))?;

    if let Some(listing_path_str) = listing {
        let listing_path = PathBuf::from(listing_path_str);
        let text = vexfile::format_listing(&assembled.list, &assembled.knowns);
        let mut writer = BufWriter::new(
            File::create(&listing_path)
                .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, listing_path.clone()))?,
        );
        writer
            .write_all(text.as_bytes())
            .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, listing_path.clone()))?;
    }

    for warning in &assembled.warnings {
        eprintln!("warning: {}", warning);
    }

    Ok(())
}
