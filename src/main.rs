// main.rs - boots the virtual machine on stdin/stdout.

use anyhow::Result;
use clap::Parser;
use eforth16::vm::Forth;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "eforth16", version, about = "A self-hosting 16-bit eForth")]
struct Args {
    /// Forth source interpreted ahead of terminal input
    script: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let input: Box<dyn Read + Send> = match &args.script {
        Some(path) => {
            let text = fs::read(path)?;
            Box::new(io::Cursor::new(text).chain(io::stdin()))
        }
        None => Box::new(io::stdin()),
    };

    let mut forth = Forth::new(input, Box::new(io::stdout()))?;
    forth.run()?;
    Ok(())
}
