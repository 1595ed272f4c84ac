//! Patch rules applied to a decoded module before it is re-encoded.
//!
//! Rules run in the order given. Each kind has a fixed failure mode:
//! resizing memory fails hard, while remapping an import or removing a custom
//! section that does not exist is logged and skipped, since which host shims a
//! build imports varies with toolchain and build flags.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::error::PatchError;
use crate::module::{pages_to_bytes, Module, MAX_PAGES};

/// Module namespace and field name identifying an import.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportName {
    pub module: String,
    pub field: String,
}

impl ImportName {
    pub fn new(module: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for ImportName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.field)
    }
}

/// Rewrite the import named `from` to `to`, keeping its position and kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRemap {
    pub from: ImportName,
    pub to: ImportName,
}

impl ImportRemap {
    pub fn new(from: ImportName, to: ImportName) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for ImportRemap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.from, self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid remap {0:?}: expected OLD_MODULE:OLD_FIELD=NEW_MODULE:NEW_FIELD")]
pub struct ParseRemapError(String);

/// Parses `OLD_MODULE:OLD_FIELD=NEW_MODULE:NEW_FIELD`. Each side is split at
/// its first `:`, so field names may themselves contain colons.
impl FromStr for ImportRemap {
    type Err = ParseRemapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseRemapError(s.to_string());
        let (from, to) = s.split_once('=').ok_or_else(err)?;
        let parse_name = |part: &str| -> Result<ImportName, ParseRemapError> {
            let (module, field) = part.split_once(':').ok_or_else(err)?;
            if module.is_empty() || field.is_empty() {
                return Err(err());
            }
            Ok(ImportName::new(module, field))
        };
        Ok(Self {
            from: parse_name(from)?,
            to: parse_name(to)?,
        })
    }
}

/// A single edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    /// Set the minimum page count of memory 0, raising its maximum if needed.
    ResizeMemory { pages: u32 },
    RemapImport(ImportRemap),
    /// Drop every custom section with this name.
    RemoveCustomSection { name: String },
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Patch::ResizeMemory { pages } => write!(f, "resize memory to {pages} pages"),
            Patch::RemapImport(remap) => write!(f, "remap import {remap}"),
            Patch::RemoveCustomSection { name } => write!(f, "remove custom section {name:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Target not present; the module was left as is.
    Skipped,
}

/// Outcome of each patch, in the order the patches were given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub outcomes: Vec<Outcome>,
}

impl PatchReport {
    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| **o == Outcome::Applied)
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.applied()
    }
}

/// Apply `patches` in order. The first hard failure aborts; the module may
/// then be partially patched and must not be encoded.
pub fn apply(module: &mut Module, patches: &[Patch]) -> Result<PatchReport, PatchError> {
    let mut report = PatchReport::default();
    for patch in patches {
        report.outcomes.push(patch.apply(module)?);
    }
    Ok(report)
}

impl Patch {
    pub fn apply(&self, module: &mut Module) -> Result<Outcome, PatchError> {
        match self {
            Patch::ResizeMemory { pages } => resize_memory(module, *pages),
            Patch::RemapImport(remap) => Ok(remap_import(module, remap)),
            Patch::RemoveCustomSection { name } => Ok(remove_custom_section(module, name)),
        }
    }
}

fn resize_memory(module: &mut Module, pages: u32) -> Result<Outcome, PatchError> {
    if pages > MAX_PAGES {
        return Err(PatchError::PagesOutOfRange {
            pages,
            limit: MAX_PAGES,
        });
    }
    let memory = module.memory_type_mut(0).ok_or(PatchError::NoMemory)?;
    let previous = memory.limits.min;
    memory.limits.min = pages;
    // Keep min <= max by widening the ceiling.
    if let Some(max) = memory.limits.max {
        if max < pages {
            log::warn!("raising memory maximum from {max} to {pages} pages");
            memory.limits.max = Some(pages);
        }
    }
    log::info!(
        "initial memory: {previous} -> {pages} pages ({} bytes)",
        pages_to_bytes(pages)
    );
    Ok(Outcome::Applied)
}

fn remap_import(module: &mut Module, remap: &ImportRemap) -> Outcome {
    let target = module
        .imports_mut()
        .iter_mut()
        .find(|i| i.module == remap.from.module && i.field == remap.from.field);
    match target {
        Some(import) => {
            import.module.clone_from(&remap.to.module);
            import.field.clone_from(&remap.to.field);
            log::info!("remapped import {} -> {}", remap.from, remap.to);
            Outcome::Applied
        }
        None => {
            log::warn!("no import {} in module, skipping remap", remap.from);
            Outcome::Skipped
        }
    }
}

fn remove_custom_section(module: &mut Module, name: &str) -> Outcome {
    match module.remove_custom_sections(name) {
        0 => {
            log::warn!("no custom section {name:?} in module, nothing to remove");
            Outcome::Skipped
        }
        n => {
            log::info!("removed {n} custom section(s) {name:?}");
            Outcome::Applied
        }
    }
}
