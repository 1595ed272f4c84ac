//! WebAssembly binary encoder.
//!
//! Serializes a [`Module`] section by section in stored order. Every integer
//! is written in minimal LEB128 and every section size is computed from the
//! re-encoded payload, so the output is semantically equal to the decoded
//! input but not necessarily byte-identical.

use crate::error::EncodeError;
use crate::module::*;

mod writer;
use writer::Writer;

type Result<T> = std::result::Result<T, EncodeError>;

/// Encode a module. [`check`] runs first, so an invalid module yields an
/// error and never a partial buffer.
pub fn encode_module(module: &Module) -> Result<Vec<u8>> {
    check(module)?;

    let mut out = Writer::new();
    out.write_bytes(&WASM_MAGIC);
    out.write_bytes(&module.version.to_le_bytes());

    let mut payload = Writer::new();
    for section in module.sections() {
        payload.clear();
        write_section(&mut payload, section)?;
        out.write_u8(section.kind().id());
        out.write_len(payload.len(), "section")?;
        out.write_bytes(payload.as_slice());
    }
    Ok(out.into_inner())
}

/// Verifies the limits invariants of every memory and table in index-space
/// order.
pub fn check(module: &Module) -> Result<()> {
    for (index, memory) in module.memories().enumerate() {
        let index = index as u32;
        let Limits { min, max } = memory.limits;
        for pages in std::iter::once(min).chain(max) {
            if pages > MAX_PAGES {
                return Err(EncodeError::PagesOutOfRange {
                    index,
                    pages,
                    limit: MAX_PAGES,
                });
            }
        }
        match max {
            Some(max) if min > max => {
                return Err(EncodeError::MemoryLimitsInverted { index, min, max });
            }
            None if memory.shared => {
                return Err(EncodeError::SharedMemoryWithoutMax { index });
            }
            _ => {}
        }
    }
    for (index, table) in module.tables().enumerate() {
        if let Limits {
            min,
            max: Some(max),
        } = table.limits
        {
            if min > max {
                return Err(EncodeError::TableLimitsInverted {
                    index: index as u32,
                    min,
                    max,
                });
            }
        }
    }
    Ok(())
}

fn write_section(w: &mut Writer, section: &Section) -> Result<()> {
    match section {
        Section::Custom(custom) => {
            w.write_name(&custom.name)?;
            w.write_bytes(&custom.data);
        }
        Section::Type(types) => w.write_vec(types, "type section", write_func_type)?,
        Section::Import(imports) => w.write_vec(imports, "import section", write_import)?,
        Section::Function(funcs) => w.write_vec(funcs, "function section", |w, &ty| {
            w.write_u32(ty);
            Ok(())
        })?,
        Section::Table(tables) => w.write_vec(tables, "table section", |w, table| {
            write_table_type(w, table);
            Ok(())
        })?,
        Section::Memory(memories) => w.write_vec(memories, "memory section", |w, memory| {
            write_memory_type(w, memory);
            Ok(())
        })?,
        Section::Global(globals) => w.write_vec(globals, "global section", |w, global| {
            write_global_type(w, &global.ty);
            write_const_expr(w, &global.init);
            Ok(())
        })?,
        Section::Export(exports) => w.write_vec(exports, "export section", |w, export| {
            w.write_name(&export.name)?;
            w.write_u8(export.kind.to_byte());
            w.write_u32(export.index);
            Ok(())
        })?,
        Section::Start(func) => w.write_u32(*func),
        Section::Element(segments) => w.write_vec(segments, "element section", write_element)?,
        Section::DataCount(count) => w.write_u32(*count),
        Section::Code(bodies) => w.write_vec(bodies, "code section", write_function_body)?,
        Section::Data(segments) => w.write_vec(segments, "data section", write_data)?,
        Section::Unknown { payload, .. } => w.write_bytes(payload),
    }
    Ok(())
}

fn write_val_types(w: &mut Writer, types: &[ValType]) -> Result<()> {
    w.write_vec(types, "value types", |w, ty| {
        w.write_u8(ty.to_byte());
        Ok(())
    })
}

fn write_func_type(w: &mut Writer, ty: &FuncType) -> Result<()> {
    w.write_u8(0x60);
    write_val_types(w, &ty.params)?;
    write_val_types(w, &ty.results)
}

fn write_limits(w: &mut Writer, limits: &Limits, shared: bool) {
    let mut flags = 0u8;
    if limits.max.is_some() {
        flags |= 0x01;
    }
    if shared {
        flags |= 0x02;
    }
    w.write_u8(flags);
    w.write_u32(limits.min);
    if let Some(max) = limits.max {
        w.write_u32(max);
    }
}

fn write_memory_type(w: &mut Writer, memory: &MemoryType) {
    write_limits(w, &memory.limits, memory.shared);
}

fn write_table_type(w: &mut Writer, table: &TableType) {
    w.write_u8(table.element.to_byte());
    write_limits(w, &table.limits, false);
}

fn write_global_type(w: &mut Writer, ty: &GlobalType) {
    w.write_u8(ty.content.to_byte());
    w.write_u8(u8::from(ty.mutable));
}

fn write_import(w: &mut Writer, import: &Import) -> Result<()> {
    w.write_name(&import.module)?;
    w.write_name(&import.field)?;
    w.write_u8(import.desc.kind().to_byte());
    match &import.desc {
        ImportDesc::Func(ty) => w.write_u32(*ty),
        ImportDesc::Table(table) => write_table_type(w, table),
        ImportDesc::Memory(memory) => write_memory_type(w, memory),
        ImportDesc::Global(global) => write_global_type(w, global),
    }
    Ok(())
}

fn write_const_expr(w: &mut Writer, expr: &ConstExpr) {
    for instr in &expr.instrs {
        match *instr {
            ConstInstr::I32Const(v) => {
                w.write_u8(0x41);
                w.write_i32(v);
            }
            ConstInstr::I64Const(v) => {
                w.write_u8(0x42);
                w.write_i64(v);
            }
            ConstInstr::F32Const(bits) => {
                w.write_u8(0x43);
                w.write_bytes(&bits.to_le_bytes());
            }
            ConstInstr::F64Const(bits) => {
                w.write_u8(0x44);
                w.write_bytes(&bits.to_le_bytes());
            }
            ConstInstr::GlobalGet(index) => {
                w.write_u8(0x23);
                w.write_u32(index);
            }
            ConstInstr::RefNull(ty) => {
                w.write_u8(0xd0);
                w.write_u8(ty.to_byte());
            }
            ConstInstr::RefFunc(index) => {
                w.write_u8(0xd2);
                w.write_u32(index);
            }
            ConstInstr::I32Add => w.write_u8(0x6a),
            ConstInstr::I32Sub => w.write_u8(0x6b),
            ConstInstr::I32Mul => w.write_u8(0x6c),
            ConstInstr::I64Add => w.write_u8(0x7c),
            ConstInstr::I64Sub => w.write_u8(0x7d),
            ConstInstr::I64Mul => w.write_u8(0x7e),
        }
    }
    w.write_u8(0x0b);
}

fn write_element(w: &mut Writer, segment: &ElementSegment) -> Result<()> {
    let expressions = matches!(segment.items, ElementItems::Expressions(..));
    // Flags 0 and 4 are only usable for table 0 with funcref items.
    let implicit_ok = match &segment.items {
        ElementItems::Functions(_) => true,
        ElementItems::Expressions(ty, _) => *ty == RefType::FuncRef,
    };

    let mut flags = match &segment.mode {
        ElementMode::Active {
            table,
            explicit_table,
            ..
        } => {
            if *explicit_table || *table != 0 || !implicit_ok {
                0x02
            } else {
                0x00
            }
        }
        ElementMode::Passive => 0x01,
        ElementMode::Declared => 0x03,
    };
    if expressions {
        flags |= 0x04;
    }
    w.write_u32(flags);

    if let ElementMode::Active { table, offset, .. } = &segment.mode {
        if flags & 0x02 != 0 {
            w.write_u32(*table);
        }
        write_const_expr(w, offset);
    }

    let has_type_byte = flags & 0x03 != 0;
    match &segment.items {
        ElementItems::Functions(funcs) => {
            if has_type_byte {
                w.write_u8(0x00);
            }
            w.write_vec(funcs, "element functions", |w, &f| {
                w.write_u32(f);
                Ok(())
            })
        }
        ElementItems::Expressions(ty, exprs) => {
            if has_type_byte {
                w.write_u8(ty.to_byte());
            }
            w.write_vec(exprs, "element expressions", |w, expr| {
                write_const_expr(w, expr);
                Ok(())
            })
        }
    }
}

fn write_data(w: &mut Writer, segment: &DataSegment) -> Result<()> {
    match &segment.mode {
        DataMode::Active {
            memory,
            offset,
            explicit_memory,
        } => {
            if *explicit_memory || *memory != 0 {
                w.write_u32(2);
                w.write_u32(*memory);
            } else {
                w.write_u32(0);
            }
            write_const_expr(w, offset);
        }
        DataMode::Passive => w.write_u32(1),
    }
    w.write_byte_vec(&segment.data, "data segment")
}

fn write_function_body(w: &mut Writer, body: &FunctionBody) -> Result<()> {
    let mut inner = Writer::new();
    inner.write_vec(&body.locals, "locals", |w, &(count, ty)| {
        w.write_u32(count);
        w.write_u8(ty.to_byte());
        Ok(())
    })?;
    inner.write_bytes(&body.code);
    w.write_byte_vec(inner.as_slice(), "function body")
}
