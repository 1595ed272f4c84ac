//! WebAssembly binary decoder.
//!
//! Turns a byte buffer into a [`Module`]. Framing is checked strictly (header,
//! section lengths, LEB128 widths, vector counts) but function bodies are not
//! type-checked. Any error aborts the whole decode.

use std::collections::HashSet;

use crate::error::{DecodeError, DecodeErrorKind};
use crate::module::*;

mod reader;
pub use reader::Reader;
use reader::Result;

/// Decode a complete module.
pub fn decode_module(bytes: &[u8]) -> Result<Module> {
    let mut r = Reader::new(bytes);

    let magic = r.read_bytes(4)?;
    if magic != WASM_MAGIC {
        return Err(DecodeError::new(DecodeErrorKind::BadMagic, 0));
    }
    let version = r.read_fixed_u32()?;
    if version != WASM_VERSION {
        return Err(DecodeError::new(
            DecodeErrorKind::UnsupportedVersion(version),
            4,
        ));
    }

    let mut sections = Vec::new();
    let mut seen = HashSet::new();
    while !r.is_empty() {
        let start = r.offset();
        let kind = SectionKind::from_id(r.read_u8()?);
        let section = decode_section(&mut r, kind).map_err(|e| e.in_section(kind))?;
        // Unrecognized ids may legitimately repeat; only known kinds are unique.
        let repeatable = matches!(kind, SectionKind::Custom | SectionKind::Unknown(_));
        if !repeatable && !seen.insert(kind) {
            return Err(DecodeError::new(DecodeErrorKind::DuplicateSection, start).in_section(kind));
        }
        log::debug!("decoded {kind} section at {start:#x}");
        sections.push(section);
    }

    Ok(Module::from_parts(version, sections))
}

/// Reads the size prefix and payload of one section whose id byte has
/// already been consumed.
fn decode_section(r: &mut Reader, kind: SectionKind) -> Result<Section> {
    let size = r.read_u32()?;
    let mut payload = r.sub_reader(size)?;
    let p = &mut payload;

    let section = match kind {
        SectionKind::Custom => Section::Custom(CustomSection {
            name: p.read_name()?,
            data: p.read_rest().to_vec(),
        }),
        SectionKind::Type => Section::Type(p.read_vec(read_func_type)?),
        SectionKind::Import => Section::Import(p.read_vec(read_import)?),
        SectionKind::Function => Section::Function(p.read_vec(Reader::read_u32)?),
        SectionKind::Table => Section::Table(p.read_vec(read_table_type)?),
        SectionKind::Memory => Section::Memory(p.read_vec(read_memory_type)?),
        SectionKind::Global => Section::Global(p.read_vec(read_global)?),
        SectionKind::Export => Section::Export(p.read_vec(read_export)?),
        SectionKind::Start => Section::Start(p.read_u32()?),
        SectionKind::Element => Section::Element(p.read_vec(read_element)?),
        SectionKind::Code => Section::Code(p.read_vec(read_function_body)?),
        SectionKind::Data => Section::Data(p.read_vec(read_data)?),
        SectionKind::DataCount => Section::DataCount(p.read_u32()?),
        SectionKind::Unknown(id) => Section::Unknown {
            id,
            payload: p.read_rest().to_vec(),
        },
    };

    payload.finish()?;
    Ok(section)
}

fn invalid(r: &Reader, what: &'static str, byte: u8) -> DecodeError {
    // The offending byte has already been consumed.
    DecodeError::new(
        DecodeErrorKind::InvalidByte { what, byte },
        r.offset() - 1,
    )
}

fn read_val_type(r: &mut Reader) -> Result<ValType> {
    let byte = r.read_u8()?;
    ValType::from_byte(byte).ok_or_else(|| invalid(r, "value type", byte))
}

fn read_ref_type(r: &mut Reader) -> Result<RefType> {
    let byte = r.read_u8()?;
    RefType::from_byte(byte).ok_or_else(|| invalid(r, "reference type", byte))
}

fn read_func_type(r: &mut Reader) -> Result<FuncType> {
    match r.read_u8()? {
        0x60 => Ok(FuncType {
            params: r.read_vec(read_val_type)?,
            results: r.read_vec(read_val_type)?,
        }),
        0x4e..=0x50 | 0x5e | 0x5f => {
            Err(r.error(DecodeErrorKind::Unsupported("GC type definition")))
        }
        other => Err(invalid(r, "type form", other)),
    }
}

/// Limits plus the shared flag. 64-bit and custom-page-size memories are
/// refused rather than misread.
fn read_limits(r: &mut Reader) -> Result<(Limits, bool)> {
    let flags = r.read_u8()?;
    if flags & 0x04 != 0 {
        return Err(r.error(DecodeErrorKind::Unsupported("64-bit limits")));
    }
    if flags & !0x03 != 0 {
        return Err(invalid(r, "limits flags", flags));
    }
    let min = r.read_u32()?;
    let max = if flags & 0x01 != 0 {
        Some(r.read_u32()?)
    } else {
        None
    };
    Ok((Limits { min, max }, flags & 0x02 != 0))
}

fn read_memory_type(r: &mut Reader) -> Result<MemoryType> {
    let (limits, shared) = read_limits(r)?;
    Ok(MemoryType { limits, shared })
}

fn read_table_type(r: &mut Reader) -> Result<TableType> {
    let element = read_ref_type(r)?;
    let start = r.offset();
    let (limits, shared) = read_limits(r)?;
    if shared {
        return Err(DecodeError::new(
            DecodeErrorKind::Unsupported("shared table"),
            start,
        ));
    }
    Ok(TableType { element, limits })
}

fn read_global_type(r: &mut Reader) -> Result<GlobalType> {
    let content = read_val_type(r)?;
    let mutable = match r.read_u8()? {
        0x00 => false,
        0x01 => true,
        other => return Err(invalid(r, "global mutability", other)),
    };
    Ok(GlobalType { content, mutable })
}

fn read_external_kind(r: &mut Reader) -> Result<ExternalKind> {
    let byte = r.read_u8()?;
    match ExternalKind::from_byte(byte) {
        Some(kind) => Ok(kind),
        None if byte == 0x04 => Err(DecodeError::new(
            DecodeErrorKind::Unsupported("exception tag"),
            r.offset() - 1,
        )),
        None => Err(invalid(r, "external kind", byte)),
    }
}

fn read_import(r: &mut Reader) -> Result<Import> {
    let module = r.read_name()?;
    let field = r.read_name()?;
    let desc = match read_external_kind(r)? {
        ExternalKind::Func => ImportDesc::Func(r.read_u32()?),
        ExternalKind::Table => ImportDesc::Table(read_table_type(r)?),
        ExternalKind::Memory => ImportDesc::Memory(read_memory_type(r)?),
        ExternalKind::Global => ImportDesc::Global(read_global_type(r)?),
    };
    Ok(Import {
        module,
        field,
        desc,
    })
}

fn read_export(r: &mut Reader) -> Result<Export> {
    Ok(Export {
        name: r.read_name()?,
        kind: read_external_kind(r)?,
        index: r.read_u32()?,
    })
}

fn read_const_expr(r: &mut Reader) -> Result<ConstExpr> {
    let mut instrs = Vec::new();
    loop {
        let instr = match r.read_u8()? {
            0x0b => break,
            0x41 => ConstInstr::I32Const(r.read_i32()?),
            0x42 => ConstInstr::I64Const(r.read_i64()?),
            0x43 => ConstInstr::F32Const(r.read_fixed_u32()?),
            0x44 => {
                let bytes = r.read_bytes(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                ConstInstr::F64Const(u64::from_le_bytes(raw))
            }
            0x23 => ConstInstr::GlobalGet(r.read_u32()?),
            0xd0 => ConstInstr::RefNull(read_ref_type(r)?),
            0xd2 => ConstInstr::RefFunc(r.read_u32()?),
            0x6a => ConstInstr::I32Add,
            0x6b => ConstInstr::I32Sub,
            0x6c => ConstInstr::I32Mul,
            0x7c => ConstInstr::I64Add,
            0x7d => ConstInstr::I64Sub,
            0x7e => ConstInstr::I64Mul,
            other => return Err(invalid(r, "constant expression opcode", other)),
        };
        instrs.push(instr);
    }
    Ok(ConstExpr { instrs })
}

fn read_global(r: &mut Reader) -> Result<Global> {
    Ok(Global {
        ty: read_global_type(r)?,
        init: read_const_expr(r)?,
    })
}

/// `elemkind` byte of the function-index encodings; only `funcref` (0x00)
/// exists.
fn read_elem_kind(r: &mut Reader) -> Result<()> {
    match r.read_u8()? {
        0x00 => Ok(()),
        other => Err(invalid(r, "element kind", other)),
    }
}

/// Element segments come in eight encodings selected by a flags field: bit 0
/// passive/declared, bit 1 explicit table index (or declared when passive),
/// bit 2 expressions instead of function indices.
fn read_element(r: &mut Reader) -> Result<ElementSegment> {
    let start = r.offset();
    let flags = r.read_u32()?;
    if flags > 7 {
        return Err(DecodeError::new(
            DecodeErrorKind::InvalidSegmentFlags {
                what: "element",
                flags,
            },
            start,
        ));
    }
    let passive_or_declared = flags & 0x01 != 0;
    let explicit = flags & 0x02 != 0;
    let expressions = flags & 0x04 != 0;

    let mode = if passive_or_declared {
        if explicit {
            ElementMode::Declared
        } else {
            ElementMode::Passive
        }
    } else {
        let table = if explicit { r.read_u32()? } else { 0 };
        ElementMode::Active {
            table,
            offset: read_const_expr(r)?,
            explicit_table: explicit,
        }
    };

    // Flags 0 and 4 imply funcref and omit the kind/type byte.
    let has_type_byte = passive_or_declared || explicit;
    let items = if expressions {
        let ty = if has_type_byte {
            read_ref_type(r)?
        } else {
            RefType::FuncRef
        };
        ElementItems::Expressions(ty, r.read_vec(read_const_expr)?)
    } else {
        if has_type_byte {
            read_elem_kind(r)?;
        }
        ElementItems::Functions(r.read_vec(Reader::read_u32)?)
    };

    Ok(ElementSegment { mode, items })
}

fn read_data(r: &mut Reader) -> Result<DataSegment> {
    let start = r.offset();
    let mode = match r.read_u32()? {
        0 => DataMode::Active {
            memory: 0,
            offset: read_const_expr(r)?,
            explicit_memory: false,
        },
        1 => DataMode::Passive,
        2 => DataMode::Active {
            memory: r.read_u32()?,
            offset: read_const_expr(r)?,
            explicit_memory: true,
        },
        other => {
            return Err(DecodeError::new(
                DecodeErrorKind::InvalidSegmentFlags {
                    what: "data",
                    flags: other,
                },
                start,
            ))
        }
    };
    Ok(DataSegment {
        mode,
        data: r.read_byte_vec()?.to_vec(),
    })
}

fn read_function_body(r: &mut Reader) -> Result<FunctionBody> {
    let size = r.read_u32()?;
    let mut body = r.sub_reader(size)?;
    let locals = body.read_vec(|b| Ok((b.read_u32()?, read_val_type(b)?)))?;
    Ok(FunctionBody {
        locals,
        code: body.read_rest().to_vec(),
    })
}
