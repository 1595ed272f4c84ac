//! Typed payloads of the known section kinds.

/// Value types (MVP numerics plus SIMD and reference types).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    V128,
    Ref(RefType),
}

impl ValType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x7f => ValType::I32,
            0x7e => ValType::I64,
            0x7d => ValType::F32,
            0x7c => ValType::F64,
            0x7b => ValType::V128,
            _ => ValType::Ref(RefType::from_byte(byte)?),
        })
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ValType::I32 => 0x7f,
            ValType::I64 => 0x7e,
            ValType::F32 => 0x7d,
            ValType::F64 => 0x7c,
            ValType::V128 => 0x7b,
            ValType::Ref(r) => r.to_byte(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefType {
    FuncRef,
    ExternRef,
}

impl RefType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x70 => Some(RefType::FuncRef),
            0x6f => Some(RefType::ExternRef),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            RefType::FuncRef => 0x70,
            RefType::ExternRef => 0x6f,
        }
    }
}

/// A function signature from the type section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FuncType {
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

/// Size bounds of a memory (in pages) or a table (in elements).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    /// `None` = no maximum declared.
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub limits: Limits,
    /// Threads proposal: shared memories must declare a maximum.
    pub shared: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub element: RefType,
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub content: ValType,
    pub mutable: bool,
}

/// The four kinds of entities that can be imported or exported, each with its
/// own index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalKind {
    Func,
    Table,
    Memory,
    Global,
}

impl ExternalKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ExternalKind::Func),
            0x01 => Some(ExternalKind::Table),
            0x02 => Some(ExternalKind::Memory),
            0x03 => Some(ExternalKind::Global),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ExternalKind::Func => 0x00,
            ExternalKind::Table => 0x01,
            ExternalKind::Memory => 0x02,
            ExternalKind::Global => 0x03,
        }
    }
}

/// What an import supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportDesc {
    /// Index into the type section.
    Func(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

impl ImportDesc {
    pub fn kind(&self) -> ExternalKind {
        match self {
            ImportDesc::Func(_) => ExternalKind::Func,
            ImportDesc::Table(_) => ExternalKind::Table,
            ImportDesc::Memory(_) => ExternalKind::Memory,
            ImportDesc::Global(_) => ExternalKind::Global,
        }
    }
}

/// An import entry. Its index within its kind's index space is derived from
/// its position, see [`crate::module::Module::import_index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Module namespace (e.g. `"env"`, `"wasi_snapshot_preview1"`).
    pub module: String,
    pub field: String,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExternalKind,
    pub index: u32,
}

/// One instruction of a constant expression.
///
/// Float immediates are kept as raw bits so NaN payloads survive a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstInstr {
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    GlobalGet(u32),
    RefNull(RefType),
    RefFunc(u32),
    // extended-const
    I32Add,
    I32Sub,
    I32Mul,
    I64Add,
    I64Sub,
    I64Mul,
}

/// A constant expression; the terminating `end` is implicit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConstExpr {
    pub instrs: Vec<ConstInstr>,
}

impl ConstExpr {
    pub fn i32(value: i32) -> Self {
        Self {
            instrs: vec![ConstInstr::I32Const(value)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub ty: GlobalType,
    pub init: ConstExpr,
}

/// How an element segment is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementMode {
    /// Copied into `table` at instantiation. `explicit_table` records whether
    /// the binary spelled out the table index (flags 2 and 6) so the encoder
    /// picks the same form.
    Active {
        table: u32,
        offset: ConstExpr,
        explicit_table: bool,
    },
    Passive,
    Declared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementItems {
    /// Function indices (`elemkind` 0x00).
    Functions(Vec<u32>),
    /// Reference expressions of the given type.
    Expressions(RefType, Vec<ConstExpr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSegment {
    pub mode: ElementMode,
    pub items: ElementItems,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataMode {
    /// `explicit_memory` records whether the binary used form 2 (explicit
    /// memory index) rather than form 0.
    Active {
        memory: u32,
        offset: ConstExpr,
        explicit_memory: bool,
    },
    Passive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    pub mode: DataMode,
    pub data: Vec<u8>,
}

/// A code section entry. The instruction stream is not interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionBody {
    /// Run-length encoded locals exactly as declared: `(count, type)`.
    pub locals: Vec<(u32, ValType)>,
    /// Instruction bytes including the final `end`.
    pub code: Vec<u8>,
}

/// A named section with opaque contents (names, producers, DWARF...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomSection {
    pub name: String,
    pub data: Vec<u8>,
}
