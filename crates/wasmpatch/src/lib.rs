//! wasmpatch — post-compilation patcher for WebAssembly modules.
//!
//! The pipeline decodes a binary module into a typed section list, applies
//! an ordered set of patch rules (resize initial memory, remap imports,
//! strip custom sections) and re-encodes it. Each run is a pure function of
//! the input bytes and the options: nothing is written unless every stage
//! succeeded.

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod module;
pub mod patch;
pub mod verify;

use std::fs;
use std::path::Path;

use anyhow::Context;

pub use decoder::decode_module;
pub use encoder::encode_module;
pub use error::{DecodeError, DecodeErrorKind, EncodeError, Error, PatchError};
pub use module::Module;
pub use patch::{ImportName, ImportRemap, Outcome, Patch, PatchReport};

/// Initial memory used when no override is given: 2100 pages, a ~130 MiB heap.
pub const DEFAULT_INITIAL_PAGES: u32 = 2100;

/// Configuration for one patch run.
#[derive(Debug, Clone)]
pub struct PatchOptions {
    /// New minimum page count for memory 0 (`None` leaves memory untouched).
    pub initial_pages: Option<u32>,
    /// Import renames, applied in order after the resize.
    pub remaps: Vec<ImportRemap>,
    /// Custom sections to drop, by name.
    pub strip_custom: Vec<String>,
    /// Re-read the output with `wasmparser` before returning it.
    pub verify: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            initial_pages: None,
            remaps: Vec::new(),
            strip_custom: Vec::new(),
            verify: true,
        }
    }
}

impl PatchOptions {
    /// The ordered patch list these options describe.
    pub fn patches(&self) -> Vec<Patch> {
        let resize = self
            .initial_pages
            .map(|pages| Patch::ResizeMemory { pages });
        let remaps = self.remaps.iter().cloned().map(Patch::RemapImport);
        let strips = self
            .strip_custom
            .iter()
            .map(|name| Patch::RemoveCustomSection { name: name.clone() });
        resize.into_iter().chain(remaps).chain(strips).collect()
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct Patched {
    pub wasm: Vec<u8>,
    pub report: PatchReport,
}

/// Decode, patch and re-encode `wasm_bytes`.
///
/// # Example
/// ```no_run
/// use wasmpatch::{patch_bytes, PatchOptions};
///
/// let input = std::fs::read("mainraw.wasm").unwrap();
/// let options = PatchOptions {
///     initial_pages: Some(2100),
///     remaps: vec!["env:old_fn=env:new_fn".parse().unwrap()],
///     ..PatchOptions::default()
/// };
/// let patched = patch_bytes(&input, &options).unwrap();
/// std::fs::write("main.wasm", patched.wasm).unwrap();
/// ```
pub fn patch_bytes(wasm_bytes: &[u8], options: &PatchOptions) -> Result<Patched, Error> {
    let mut module = decode_module(wasm_bytes)?;
    log::debug!("decoded {} sections", module.sections().len());

    let report = patch::apply(&mut module, &options.patches())?;
    let wasm = encode_module(&module)?;
    if options.verify {
        verify::check_framing(&wasm)?;
    }

    Ok(Patched { wasm, report })
}

/// Patch the module at `input` and write the result to `output`, which may
/// be the same path. The output file is only touched once the whole pipeline
/// has succeeded.
pub fn patch_file(input: &Path, output: &Path, options: &PatchOptions) -> anyhow::Result<PatchReport> {
    let wasm_bytes =
        fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;

    let patched = patch_bytes(&wasm_bytes, options)
        .with_context(|| format!("failed to patch {}", input.display()))?;

    fs::write(output, &patched.wasm)
        .with_context(|| format!("failed to write {}", output.display()))?;
    log::info!(
        "wrote {} ({} bytes, {} patches applied, {} skipped)",
        output.display(),
        patched.wasm.len(),
        patched.report.applied(),
        patched.report.skipped()
    );

    Ok(patched.report)
}
