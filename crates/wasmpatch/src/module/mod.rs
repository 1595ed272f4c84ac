//! In-memory representation of a WebAssembly module.
//!
//! A [`Module`] is an ordered list of [`Section`]s exactly as they appeared in
//! the binary. Index spaces (functions, tables, memories, globals) are never
//! stored on entries: they are derived on demand from the import section
//! followed by the locally defined entries, so renaming or resizing an entry
//! can never shift an index.

use std::fmt;

mod types;
pub use types::*;

/// `\0asm`
pub const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];

/// The only binary format version this crate reads and writes.
pub const WASM_VERSION: u32 = 1;

/// WebAssembly page size: 64 KiB.
pub const PAGE_SIZE: u64 = 65536;

/// Largest page count a 32-bit memory can declare (4 GiB).
pub const MAX_PAGES: u32 = 65536;

/// Size in bytes of `pages` WebAssembly pages.
pub fn pages_to_bytes(pages: u32) -> u64 {
    u64::from(pages) * PAGE_SIZE
}

/// Section kind tags. Unknown ids are kept so future sections round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Custom,
    Type,
    Import,
    Function,
    Table,
    Memory,
    Global,
    Export,
    Start,
    Element,
    Code,
    Data,
    DataCount,
    Unknown(u8),
}

impl SectionKind {
    pub fn from_id(id: u8) -> Self {
        match id {
            0 => SectionKind::Custom,
            1 => SectionKind::Type,
            2 => SectionKind::Import,
            3 => SectionKind::Function,
            4 => SectionKind::Table,
            5 => SectionKind::Memory,
            6 => SectionKind::Global,
            7 => SectionKind::Export,
            8 => SectionKind::Start,
            9 => SectionKind::Element,
            10 => SectionKind::Code,
            11 => SectionKind::Data,
            12 => SectionKind::DataCount,
            other => SectionKind::Unknown(other),
        }
    }

    pub fn id(self) -> u8 {
        match self {
            SectionKind::Custom => 0,
            SectionKind::Type => 1,
            SectionKind::Import => 2,
            SectionKind::Function => 3,
            SectionKind::Table => 4,
            SectionKind::Memory => 5,
            SectionKind::Global => 6,
            SectionKind::Export => 7,
            SectionKind::Start => 8,
            SectionKind::Element => 9,
            SectionKind::Code => 10,
            SectionKind::Data => 11,
            SectionKind::DataCount => 12,
            SectionKind::Unknown(id) => id,
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SectionKind::Custom => "custom",
            SectionKind::Type => "type",
            SectionKind::Import => "import",
            SectionKind::Function => "function",
            SectionKind::Table => "table",
            SectionKind::Memory => "memory",
            SectionKind::Global => "global",
            SectionKind::Export => "export",
            SectionKind::Start => "start",
            SectionKind::Element => "element",
            SectionKind::Code => "code",
            SectionKind::Data => "data",
            SectionKind::DataCount => "data count",
            SectionKind::Unknown(id) => return write!(f, "unknown (id {id})"),
        };
        f.write_str(name)
    }
}

/// One section with its typed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    Custom(CustomSection),
    Type(Vec<FuncType>),
    Import(Vec<Import>),
    /// Type index of each locally defined function.
    Function(Vec<u32>),
    Table(Vec<TableType>),
    Memory(Vec<MemoryType>),
    Global(Vec<Global>),
    Export(Vec<Export>),
    Start(u32),
    Element(Vec<ElementSegment>),
    DataCount(u32),
    Code(Vec<FunctionBody>),
    Data(Vec<DataSegment>),
    /// A section id this crate does not know, preserved byte for byte.
    Unknown { id: u8, payload: Vec<u8> },
}

impl Section {
    pub fn kind(&self) -> SectionKind {
        match self {
            Section::Custom(_) => SectionKind::Custom,
            Section::Type(_) => SectionKind::Type,
            Section::Import(_) => SectionKind::Import,
            Section::Function(_) => SectionKind::Function,
            Section::Table(_) => SectionKind::Table,
            Section::Memory(_) => SectionKind::Memory,
            Section::Global(_) => SectionKind::Global,
            Section::Export(_) => SectionKind::Export,
            Section::Start(_) => SectionKind::Start,
            Section::Element(_) => SectionKind::Element,
            Section::DataCount(_) => SectionKind::DataCount,
            Section::Code(_) => SectionKind::Code,
            Section::Data(_) => SectionKind::Data,
            Section::Unknown { id, .. } => SectionKind::Unknown(*id),
        }
    }
}

/// A decoded module: header version plus sections in binary order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub version: u32,
    sections: Vec<Section>,
}

impl Module {
    pub fn new(sections: Vec<Section>) -> Self {
        Self {
            version: WASM_VERSION,
            sections,
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// First section of the given kind.
    pub fn section(&self, kind: SectionKind) -> Option<&Section> {
        self.sections.iter().find(|s| s.kind() == kind)
    }

    pub fn imports(&self) -> &[Import] {
        self.sections
            .iter()
            .find_map(|s| match s {
                Section::Import(imports) => Some(imports.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Mutable view of the import entries. Entries can be edited in place but
    /// not added or removed, so no index space changes size.
    pub fn imports_mut(&mut self) -> &mut [Import] {
        self.sections
            .iter_mut()
            .find_map(|s| match s {
                Section::Import(imports) => Some(imports.as_mut_slice()),
                _ => None,
            })
            .unwrap_or(&mut [])
    }

    pub fn exports(&self) -> &[Export] {
        match self.section(SectionKind::Export) {
            Some(Section::Export(exports)) => exports,
            _ => &[],
        }
    }

    /// Number of imports of `kind`; these occupy the low indices of the
    /// corresponding index space.
    pub fn imported_count(&self, kind: ExternalKind) -> u32 {
        self.imports()
            .iter()
            .filter(|i| i.desc.kind() == kind)
            .count() as u32
    }

    /// Number of entities of `kind` defined by this module itself.
    pub fn defined_count(&self, kind: ExternalKind) -> u32 {
        let len = self.sections.iter().find_map(|s| match (kind, s) {
            (ExternalKind::Func, Section::Function(f)) => Some(f.len()),
            (ExternalKind::Table, Section::Table(t)) => Some(t.len()),
            (ExternalKind::Memory, Section::Memory(m)) => Some(m.len()),
            (ExternalKind::Global, Section::Global(g)) => Some(g.len()),
            _ => None,
        });
        len.unwrap_or(0) as u32
    }

    pub fn index_space_len(&self, kind: ExternalKind) -> u32 {
        self.imported_count(kind) + self.defined_count(kind)
    }

    /// Index of the import at `position` within its own kind's index space.
    pub fn import_index(&self, position: usize) -> Option<u32> {
        let imports = self.imports();
        let kind = imports.get(position)?.desc.kind();
        Some(
            imports[..position]
                .iter()
                .filter(|i| i.desc.kind() == kind)
                .count() as u32,
        )
    }

    /// Memories in index-space order: imported first, then defined.
    pub fn memories(&self) -> impl Iterator<Item = &MemoryType> {
        let imported = self.imports().iter().filter_map(|i| match &i.desc {
            ImportDesc::Memory(m) => Some(m),
            _ => None,
        });
        let defined = self
            .sections
            .iter()
            .filter_map(|s| match s {
                Section::Memory(m) => Some(m.iter()),
                _ => None,
            })
            .flatten();
        imported.chain(defined)
    }

    pub fn memory_type(&self, index: u32) -> Option<&MemoryType> {
        self.memories().nth(index as usize)
    }

    /// The memory at `index` in the memory index space, wherever it is
    /// declared.
    pub fn memory_type_mut(&mut self, index: u32) -> Option<&mut MemoryType> {
        let imported = self.imported_count(ExternalKind::Memory);
        if index < imported {
            return self
                .imports_mut()
                .iter_mut()
                .filter_map(|i| match &mut i.desc {
                    ImportDesc::Memory(m) => Some(m),
                    _ => None,
                })
                .nth(index as usize);
        }
        self.sections
            .iter_mut()
            .find_map(|s| match s {
                Section::Memory(m) => Some(m),
                _ => None,
            })?
            .get_mut((index - imported) as usize)
    }

    /// Tables in index-space order.
    pub fn tables(&self) -> impl Iterator<Item = &TableType> {
        let imported = self.imports().iter().filter_map(|i| match &i.desc {
            ImportDesc::Table(t) => Some(t),
            _ => None,
        });
        let defined = self
            .sections
            .iter()
            .filter_map(|s| match s {
                Section::Table(t) => Some(t.iter()),
                _ => None,
            })
            .flatten();
        imported.chain(defined)
    }

    pub fn custom_sections<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a CustomSection> + 'a {
        self.sections.iter().filter_map(move |s| match s {
            Section::Custom(c) if c.name == name => Some(c),
            _ => None,
        })
    }

    /// Drops every custom section called `name`, returning how many were
    /// removed. Custom sections take part in no index space.
    pub fn remove_custom_sections(&mut self, name: &str) -> usize {
        let before = self.sections.len();
        self.sections
            .retain(|s| !matches!(s, Section::Custom(c) if c.name == name));
        before - self.sections.len()
    }

    pub(crate) fn from_parts(version: u32, sections: Vec<Section>) -> Self {
        Self { version, sections }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func_import(module: &str, field: &str, ty: u32) -> Import {
        Import {
            module: module.to_string(),
            field: field.to_string(),
            desc: ImportDesc::Func(ty),
        }
    }

    fn memory(min: u32, max: Option<u32>) -> MemoryType {
        MemoryType {
            limits: Limits { min, max },
            shared: false,
        }
    }

    fn sample() -> Module {
        Module::new(vec![
            Section::Type(vec![FuncType::default()]),
            Section::Import(vec![
                func_import("env", "a", 0),
                Import {
                    module: "env".to_string(),
                    field: "memory".to_string(),
                    desc: ImportDesc::Memory(memory(1, None)),
                },
                func_import("env", "b", 0),
            ]),
            Section::Function(vec![0, 0]),
            Section::Memory(vec![memory(3, Some(8))]),
            Section::Custom(CustomSection {
                name: "producers".to_string(),
                data: vec![1, 2, 3],
            }),
            Section::Custom(CustomSection {
                name: "name".to_string(),
                data: vec![],
            }),
        ])
    }

    #[test]
    fn section_kind_ids_round_trip() {
        for id in 0..=20u8 {
            assert_eq!(SectionKind::from_id(id).id(), id);
        }
        assert_eq!(SectionKind::from_id(13), SectionKind::Unknown(13));
    }

    #[test]
    fn index_spaces_count_imports_first() {
        let module = sample();
        assert_eq!(module.imported_count(ExternalKind::Func), 2);
        assert_eq!(module.defined_count(ExternalKind::Func), 2);
        assert_eq!(module.index_space_len(ExternalKind::Func), 4);
        assert_eq!(module.index_space_len(ExternalKind::Memory), 2);
        assert_eq!(module.index_space_len(ExternalKind::Global), 0);
    }

    #[test]
    fn import_index_is_per_kind() {
        let module = sample();
        assert_eq!(module.import_index(0), Some(0));
        assert_eq!(module.import_index(1), Some(0)); // first memory
        assert_eq!(module.import_index(2), Some(1)); // second function
        assert_eq!(module.import_index(3), None);
    }

    #[test]
    fn memory_index_space_prefers_imports() {
        let mut module = sample();
        assert_eq!(module.memory_type(0).unwrap().limits.min, 1);
        assert_eq!(module.memory_type(1).unwrap().limits.min, 3);
        assert!(module.memory_type(2).is_none());

        module.memory_type_mut(1).unwrap().limits.min = 5;
        let mins: Vec<u32> = module.memories().map(|m| m.limits.min).collect();
        assert_eq!(mins, vec![1, 5]);
    }

    #[test]
    fn custom_sections_by_name() {
        let mut module = sample();
        assert_eq!(module.custom_sections("producers").count(), 1);
        assert_eq!(module.remove_custom_sections("producers"), 1);
        assert_eq!(module.remove_custom_sections("producers"), 0);
        assert_eq!(module.sections().len(), 5);
    }

    #[test]
    fn renaming_through_imports_mut_keeps_positions() {
        let mut module = sample();
        module.imports_mut()[2].field = "c".to_string();
        assert_eq!(module.imports().len(), 3);
        assert_eq!(module.imports()[2].desc, ImportDesc::Func(0));
        assert_eq!(module.import_index(2), Some(1));
    }

    #[test]
    fn empty_module_has_no_imports() {
        let mut module = Module::new(vec![]);
        assert!(module.imports().is_empty());
        assert!(module.imports_mut().is_empty());
        assert!(module.memory_type_mut(0).is_none());
    }

    #[test]
    fn pages_convert_to_bytes() {
        assert_eq!(pages_to_bytes(1), 65536);
        assert_eq!(pages_to_bytes(2100), 137_625_600);
        assert_eq!(pages_to_bytes(MAX_PAGES), 1 << 32);
    }
}
