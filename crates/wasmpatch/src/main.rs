use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use wasmpatch::{patch_file, ImportRemap, PatchOptions, DEFAULT_INITIAL_PAGES};

/// wasmpatch — resize the initial memory and remap host imports of a compiled
/// WebAssembly module.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input WebAssembly binary (.wasm)
    input: PathBuf,

    /// Output file (defaults to rewriting the input in place)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Initial linear memory in 64 KiB pages
    #[arg(long, env = "INITIAL_PAGES", default_value_t = DEFAULT_INITIAL_PAGES)]
    initial_pages: u32,

    /// Leave the memory declaration untouched
    #[arg(long)]
    keep_memory: bool,

    /// Rename an import (repeatable, applied in order)
    #[arg(long = "remap", value_name = "OLD_MODULE:OLD_FIELD=NEW_MODULE:NEW_FIELD")]
    remaps: Vec<ImportRemap>,

    /// Remove every custom section with this name (repeatable)
    #[arg(long = "strip-custom", value_name = "NAME")]
    strip_custom: Vec<String>,

    /// Skip re-reading the output with an independent parser
    #[arg(long)]
    no_verify: bool,
}

impl Cli {
    fn options(&self) -> PatchOptions {
        PatchOptions {
            initial_pages: (!self.keep_memory).then_some(self.initial_pages),
            remaps: self.remaps.clone(),
            strip_custom: self.strip_custom.clone(),
            verify: !self.no_verify,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let output = cli.output.clone().unwrap_or_else(|| cli.input.clone());

    log::info!("patching {}", cli.input.display());
    let report = patch_file(&cli.input, &output, &cli.options())?;

    eprintln!(
        "wasmpatch: wrote {} ({} applied, {} skipped)",
        output.display(),
        report.applied(),
        report.skipped()
    );
    Ok(())
}
