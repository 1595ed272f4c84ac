//! End-to-end tests for wasmpatch.
//!
//! These tests drive the full pipeline: WAT → binary → decode → patch →
//! encode, and check the output both with our own decoder and with
//! `wasmparser`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use wasmpatch::module::*;
use wasmpatch::{
    decode_module, encode_module, patch_bytes, patch_file, DecodeErrorKind, Error, ImportRemap,
    Outcome, PatchOptions,
};

/// Shaped like TinyGo `-target=wasi` output: WASI imports, one local memory,
/// a funcref table, exports, data and a custom build id section.
const WASI_MODULE: &str = r#"
    (module
        (type $fd_write_t (func (param i32 i32 i32 i32) (result i32)))
        (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (type $fd_write_t)))
        (import "wasi_snapshot_preview1" "fd_filestat_get" (func $fd_filestat_get (param i32 i32) (result i32)))
        (import "wasi_snapshot_preview1" "path_filestat_get"
            (func $path_filestat_get (param i32 i32 i32 i32 i32) (result i32)))
        (import "env" "proxy_log" (func $proxy_log (param i32 i32 i32) (result i32)))
        (memory 2)
        (table 3 3 funcref)
        (global $sp (mut i32) (i32.const 65536))
        (func $main (export "_start")
            (call $fd_filestat_get (i32.const 0) (i32.const 0))
            drop)
        (func $helper (export "helper") (param i32) (result i32)
            local.get 0
            call $path_filestat_get_wrapper)
        (func $path_filestat_get_wrapper (param i32) (result i32)
            (call $path_filestat_get
                (local.get 0) (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0)))
        (export "memory" (memory 0))
        (elem (i32.const 1) $main $helper)
        (data (i32.const 1024) "hello wasi")
        (@custom "build_id" "\de\ad\be\ef")
    )
"#;

fn wasm(wat_source: &str) -> Result<Vec<u8>> {
    wat::parse_str(wat_source).context("failed to parse WAT")
}

fn remap(s: &str) -> ImportRemap {
    s.parse().expect("valid remap")
}

fn options(initial_pages: Option<u32>, remaps: &[&str]) -> PatchOptions {
    PatchOptions {
        initial_pages,
        remaps: remaps.iter().map(|r| remap(r)).collect(),
        ..PatchOptions::default()
    }
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("wasmpatch-{}-{name}", std::process::id()))
}

#[test]
fn round_trip_without_patches_preserves_module() -> Result<()> {
    let input = wasm(WASI_MODULE)?;
    let original = decode_module(&input)?;

    let patched = patch_bytes(&input, &PatchOptions::default())?;
    let decoded = decode_module(&patched.wasm)?;

    assert_eq!(decoded, original);
    let kinds: Vec<SectionKind> = decoded.sections().iter().map(Section::kind).collect();
    let original_kinds: Vec<SectionKind> = original.sections().iter().map(Section::kind).collect();
    assert_eq!(kinds, original_kinds);
    assert!(patched.report.outcomes.is_empty());
    Ok(())
}

#[test]
fn round_trip_of_canonical_input_is_byte_identical() -> Result<()> {
    // wat emits minimal LEB128 everywhere, so re-encoding reproduces it.
    let input = wasm(WASI_MODULE)?;
    let output = encode_module(&decode_module(&input)?)?;
    assert_eq!(output, input);
    Ok(())
}

#[test]
fn tinygo_patch_table() -> Result<()> {
    let input = wasm(WASI_MODULE)?;
    let patched = patch_bytes(
        &input,
        &options(
            Some(2100),
            &[
                "wasi_snapshot_preview1:fd_filestat_get=wasi_snapshot_preview1:fd_fdstat_get",
                "wasi_snapshot_preview1:path_filestat_get=env:proxy_get_header_map_value",
            ],
        ),
    )?;
    assert_eq!(
        patched.report.outcomes,
        vec![Outcome::Applied, Outcome::Applied, Outcome::Applied]
    );

    let module = decode_module(&patched.wasm)?;
    assert_eq!(module.memory_type(0).map(|m| m.limits.min), Some(2100));

    let names: Vec<(&str, &str)> = module
        .imports()
        .iter()
        .map(|i| (i.module.as_str(), i.field.as_str()))
        .collect();
    assert_eq!(
        names,
        vec![
            ("wasi_snapshot_preview1", "fd_write"),
            ("wasi_snapshot_preview1", "fd_fdstat_get"),
            ("env", "proxy_get_header_map_value"),
            ("env", "proxy_log"),
        ]
    );

    wasmparser::Validator::new()
        .validate_all(&patched.wasm)
        .context("patched module should validate")?;
    Ok(())
}

#[test]
fn remap_preserves_every_index() -> Result<()> {
    let input = wasm(WASI_MODULE)?;
    let original = decode_module(&input)?;

    let patched = patch_bytes(
        &input,
        &options(
            None,
            &["wasi_snapshot_preview1:path_filestat_get=env:proxy_get_header_map_value"],
        ),
    )?;
    let module = decode_module(&patched.wasm)?;

    assert_eq!(module.imports().len(), original.imports().len());
    for (position, (after, before)) in module.imports().iter().zip(original.imports()).enumerate() {
        assert_eq!(after.desc, before.desc);
        assert_eq!(module.import_index(position), original.import_index(position));
    }
    for kind in [SectionKind::Export, SectionKind::Element, SectionKind::Code] {
        assert_eq!(module.section(kind), original.section(kind), "{kind} section changed");
    }
    Ok(())
}

#[test]
fn resize_is_idempotent_on_bytes() -> Result<()> {
    let input = wasm(WASI_MODULE)?;
    let opts = options(Some(300), &[]);
    let once = patch_bytes(&input, &opts)?.wasm;
    let twice = patch_bytes(&once, &opts)?.wasm;
    assert_eq!(once, twice);
    Ok(())
}

#[test]
fn resize_raises_declared_maximum() -> Result<()> {
    let input = wasm(r#"(module (memory (export "memory") 1 16))"#)?;
    let patched = patch_bytes(&input, &options(Some(100), &[]))?;
    let module = decode_module(&patched.wasm)?;
    let memory = module.memory_type(0).context("memory 0")?;
    assert_eq!(memory.limits, Limits { min: 100, max: Some(100) });
    Ok(())
}

#[test]
fn resize_without_memory_is_fatal() -> Result<()> {
    let input = wasm(r#"(module (func (export "f")))"#)?;
    let err = patch_bytes(&input, &options(Some(10), &[])).unwrap_err();
    assert!(matches!(err, Error::Patch(wasmpatch::PatchError::NoMemory)));
    Ok(())
}

#[test]
fn missing_remap_target_leaves_output_unchanged() -> Result<()> {
    let input = wasm(WASI_MODULE)?;
    let baseline = patch_bytes(&input, &options(Some(64), &[]))?;
    let with_miss = patch_bytes(&input, &options(Some(64), &["env:does_not_exist=env:x"]))?;
    assert_eq!(with_miss.wasm, baseline.wasm);
    assert_eq!(with_miss.report.outcomes, vec![Outcome::Applied, Outcome::Skipped]);
    Ok(())
}

#[test]
fn imported_memory_scenario() -> Result<()> {
    let input = wasm(
        r#"
        (module
            (import "env" "memory" (memory 2))
            (import "env" "old_fn" (func (param i32) (result i32)))
            (func (export "call") (result i32)
                (call 0 (i32.const 7))))
        "#,
    )?;
    let before = decode_module(&input)?;
    let patched = patch_bytes(&input, &options(Some(2100), &["env:old_fn=env:new_fn"]))?;
    let module = decode_module(&patched.wasm)?;

    assert_eq!(
        module.imports()[0].desc,
        ImportDesc::Memory(MemoryType {
            limits: Limits { min: 2100, max: None },
            shared: false,
        })
    );
    let func = &module.imports()[1];
    assert_eq!((func.module.as_str(), func.field.as_str()), ("env", "new_fn"));
    assert_eq!(func.desc, before.imports()[1].desc);
    assert_eq!(module.import_index(1), Some(0));
    Ok(())
}

#[test]
fn custom_sections_survive_in_order() -> Result<()> {
    let input = wasm(
        r#"
        (module
            (@custom "first" (before first) "a")
            (memory 1)
            (@custom "second" (after memory) "bc")
            (@custom "third" "def"))
        "#,
    )?;
    let patched = patch_bytes(&input, &options(Some(5), &[]))?;
    let module = decode_module(&patched.wasm)?;
    let customs: Vec<(&str, &[u8])> = module
        .sections()
        .iter()
        .filter_map(|s| match s {
            Section::Custom(c) => Some((c.name.as_str(), c.data.as_slice())),
            _ => None,
        })
        .collect();
    assert_eq!(
        customs,
        vec![
            ("first", b"a".as_slice()),
            ("second", b"bc".as_slice()),
            ("third", b"def".as_slice()),
        ]
    );
    assert_eq!(module.sections()[0].kind(), SectionKind::Custom);
    Ok(())
}

#[test]
fn strip_custom_removes_named_section() -> Result<()> {
    let input = wasm(WASI_MODULE)?;
    let opts = PatchOptions {
        strip_custom: vec!["build_id".to_string()],
        ..PatchOptions::default()
    };
    let patched = patch_bytes(&input, &opts)?;
    let module = decode_module(&patched.wasm)?;
    assert_eq!(module.custom_sections("build_id").count(), 0);
    assert_eq!(patched.report.outcomes, vec![Outcome::Applied]);
    Ok(())
}

#[test]
fn truncated_input_is_rejected() -> Result<()> {
    let input = wasm(WASI_MODULE)?;
    let truncated = &input[..input.len() - 1];
    match patch_bytes(truncated, &PatchOptions::default()) {
        Err(Error::Decode(err)) => assert!(matches!(
            err.kind,
            DecodeErrorKind::LengthOverrun { .. } | DecodeErrorKind::UnexpectedEof
        )),
        other => panic!("expected decode error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn overlong_integer_is_rejected() -> Result<()> {
    // memory section whose minimum uses six LEB128 bytes
    let mut input = wasm("(module)")?;
    input.extend_from_slice(&[0x05, 0x08, 0x01, 0x00, 0x82, 0x80, 0x80, 0x80, 0x80, 0x00]);
    match patch_bytes(&input, &PatchOptions::default()) {
        Err(Error::Decode(err)) => {
            assert_eq!(err.kind, DecodeErrorKind::MalformedInteger { bits: 32 });
            assert_eq!(err.section, Some(SectionKind::Memory));
        }
        other => panic!("expected decode error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn patch_file_writes_output() -> Result<()> {
    let input_path = temp_path("in.wasm");
    let output_path = temp_path("out.wasm");
    std::fs::write(&input_path, wasm(WASI_MODULE)?)?;

    let report = patch_file(&input_path, &output_path, &options(Some(42), &[]))?;
    assert_eq!(report.applied(), 1);

    let module = decode_module(&std::fs::read(&output_path)?)?;
    assert_eq!(module.memory_type(0).map(|m| m.limits.min), Some(42));

    std::fs::remove_file(&input_path)?;
    std::fs::remove_file(&output_path)?;
    Ok(())
}

#[test]
fn patch_file_writes_nothing_on_failure() -> Result<()> {
    let input_path = temp_path("bad-in.wasm");
    let output_path = temp_path("bad-out.wasm");
    let _ = std::fs::remove_file(&output_path);
    let mut bytes = wasm(WASI_MODULE)?;
    bytes.truncate(bytes.len() - 3);
    std::fs::write(&input_path, &bytes)?;

    let err = patch_file(&input_path, &output_path, &options(Some(42), &[])).unwrap_err();
    assert!(format!("{err:#}").contains("failed to decode module"));
    assert!(!output_path.exists());

    std::fs::remove_file(&input_path)?;
    Ok(())
}

#[test]
fn patch_file_rewrites_in_place() -> Result<()> {
    let path = temp_path("in-place.wasm");
    std::fs::write(&path, wasm(WASI_MODULE)?)?;

    let opts = options(
        Some(77),
        &["wasi_snapshot_preview1:fd_filestat_get=wasi_snapshot_preview1:fd_fdstat_get"],
    );
    let report = patch_file(&path, &path, &opts)?;
    assert_eq!(report.applied(), 2);

    let module = decode_module(&std::fs::read(&path)?)?;
    assert_eq!(module.memory_type(0).map(|m| m.limits.min), Some(77));
    assert_eq!(module.imports()[1].field, "fd_fdstat_get");

    std::fs::remove_file(&path)?;
    Ok(())
}
