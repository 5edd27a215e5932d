//! Smoke-test harness for `pdfcrypt-core`, not a supported tool: loads a
//! PDF, walks its `/Prev` chain, and reports what the xref cache and
//! security handler found. Useful for poking at a real file by hand while
//! developing the library; not wired into anything else.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};

use pdfcrypt_core::error::CoreError;
use pdfcrypt_core::handlers::HandlerRegistry;
use pdfcrypt_core::reader::PdfReader;
use pdfcrypt_core::syntax::BasicParser;

#[derive(Parser)]
#[command(name = "pdfutil", about = "Inspect a PDF's xref history and encryption dictionary")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the revision count, trailer keys and handler kind for a file.
    Inspect { path: PathBuf },
    /// Attempt password authentication against the `/Standard` handler.
    Auth {
        path: PathBuf,
        #[arg(long, default_value = "")]
        password: String,
    },
    /// List the references reachable from `/Root` as of a given revision.
    Deps {
        path: PathBuf,
        #[arg(long, default_value_t = 0)]
        revision: usize,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Inspect { path } => inspect(&path),
        Command::Auth { path, password } => auth(&path, &password),
        Command::Deps { path, revision } => deps(&path, revision),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn read_file(path: &PathBuf) -> Result<Vec<u8>, CoreError> {
    std::fs::read(path).map_err(|e| CoreError::Read(pdfcrypt_core::error::ReadError::Io(e)))
}

fn inspect(path: &PathBuf) -> Result<(), CoreError> {
    let buffer = read_file(path)?;
    let parser = BasicParser::new();
    let mut reader = PdfReader::new(&buffer, &parser, HandlerRegistry::with_defaults());
    reader.load()?;

    info!("{} revision(s) recovered", reader.total_revisions());
    println!("revisions: {}", reader.total_revisions());

    let trailer = reader.trailer();
    println!("newest trailer keys:");
    for (key, _) in trailer.iter() {
        println!("  /{}", String::from_utf8_lossy(key));
    }

    match reader.handler() {
        Some(pdfcrypt_core::handlers::Handler::Standard(_)) => println!("handler: /Standard"),
        Some(pdfcrypt_core::handlers::Handler::PublicKey(_)) => println!("handler: /Adobe.PubSec"),
        None => println!("handler: none (document is not encrypted)"),
    }

    Ok(())
}

fn auth(path: &PathBuf, password: &str) -> Result<(), CoreError> {
    let buffer = read_file(path)?;
    let parser = BasicParser::new();
    let mut reader = PdfReader::new(&buffer, &parser, HandlerRegistry::with_defaults());
    reader.load()?;

    let result = reader.authenticate_text(password)?;
    println!("{result:?}");
    Ok(())
}

fn deps(path: &PathBuf, revision: usize) -> Result<(), CoreError> {
    let buffer = read_file(path)?;
    let parser = BasicParser::new();
    let mut reader = PdfReader::new(&buffer, &parser, HandlerRegistry::with_defaults());
    reader.load()?;

    let root = reader.trailer().get(b"Root")?.as_reference()?;
    let resolver = reader.get_historical_resolver(revision.min(reader.total_revisions().saturating_sub(1)));
    let dependencies = resolver.collect_dependencies(root)?;

    println!("/Root at revision {revision}: {} direct reference(s)", dependencies.len());
    for (id, generation) in dependencies {
        println!("  {id} {generation} R");
    }
    Ok(())
}
