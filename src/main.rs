use cfront::{CompilerConfig, MacroDefine};
use clap::Parser as ClapParser;
use std::path::PathBuf;
use std::process;

/// A small C front end: preprocess, parse, and type-check a translation
/// unit, producing diagnostics on any error.
#[derive(ClapParser)]
#[command(name = "cfrontc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Preprocess, parse, and semantically check a C source file", long_about = None)]
struct Cli {
    /// Input source file.
    input: PathBuf,

    /// Output path. Defaults to stdout when omitted.
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Add a directory to the user include search path (searched before
    /// the builtin system paths, in the order given).
    #[arg(short = 'I', value_name = "DIR")]
    include_paths: Vec<PathBuf>,

    /// Define a macro: `-DNAME` or `-DNAME=VALUE`.
    #[arg(short = 'D', value_name = "NAME[=VALUE]")]
    defines: Vec<String>,

    /// Undefine a predefined or command-line macro.
    #[arg(short = 'U', value_name = "NAME")]
    undefines: Vec<String>,

    /// Stop after preprocessing and emit the preprocessed source.
    #[arg(short = 'E')]
    preprocess_only: bool,

    /// Load a `cfront.toml` config file; flags on the command line are
    /// applied on top of (and after) its settings.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn build_config(cli: &Cli) -> Result<CompilerConfig, String> {
    let mut config = CompilerConfig::new();
    if let Some(path) = &cli.config {
        config = config.merge_toml_file(path)?;
    }
    config = config.preprocess_only(cli.preprocess_only);
    for path in &cli.include_paths {
        config = config.with_user_include_path(path.clone());
    }
    for spec in &cli.defines {
        config = config.with_define(MacroDefine::parse(spec)?);
    }
    for name in &cli.undefines {
        config = config.with_undefine(name.clone());
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<(), String> {
    let config = build_config(&cli)?;

    if cli.preprocess_only {
        let (text, diagnostics) = cfront::preprocess_file(&cli.input, &config)?;
        for diag in diagnostics.iter() {
            eprintln!("{diag}");
        }
        if diagnostics.had_fatal() {
            return Err("preprocessing failed".to_string());
        }
        write_output(&cli.output, &text)
    } else {
        let arena = bumpalo::Bump::new();
        let tu = cfront::compile_file(&cli.input, &config, &arena)?;
        for diag in tu.diagnostics.iter() {
            eprintln!("{diag}");
        }
        if tu.has_errors() {
            return Err(format!("compilation failed with {} error(s)", tu.diagnostics.error_count()));
        }
        let mut dump = String::new();
        for def in &tu.function_defs {
            dump.push_str(&format!("{}\n", def.name));
        }
        write_output(&cli.output, &dump)
    }
}

fn write_output(output: &Option<PathBuf>, text: &str) -> Result<(), String> {
    match output {
        Some(path) => std::fs::write(path, text).map_err(|e| format!("failed to write '{}': {e}", path.display())),
        None => {
            print!("{text}");
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
