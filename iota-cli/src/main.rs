use anyhow::{bail, Context};
use clap::Parser;
use iota_compiler::backend::{AllocatorKind, MarvinEmitter};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "iotac")]
#[command(about = "Compiler for the iota language targeting the Marvin machine")]
struct Args {
    /// The .iota source file to compile
    file: PathBuf,

    /// Allocate registers by graph coloring (default: naive round-robin)
    #[arg(short = 'g')]
    graph: bool,

    /// Directory for the output .marv file
    #[arg(short = 'd', value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Dump intermediate representations and liveness information
    #[arg(short = 'v')]
    verbose: bool,
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.file.extension().map_or(true, |e| e != "iota") {
        bail!("source file must have an .iota extension");
    }
    let source = fs::read_to_string(&args.file)
        .with_context(|| format!("cannot read {}", args.file.display()))?;

    let class = iota_compiler::compile_to_class(&source)?;

    let allocator = if args.graph {
        AllocatorKind::Graph
    } else {
        AllocatorKind::Naive
    };
    let mut emitter = MarvinEmitter::new(allocator, args.verbose);
    emitter.compile(&class)?;

    if args.verbose {
        print!("{}", emitter.dump_output());
    }

    let out_path = emitter.write_file(&args.file, &args.output_dir)?;
    println!("wrote {}", out_path.display());
    Ok(())
}
