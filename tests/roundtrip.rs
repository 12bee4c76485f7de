//! Export → import round trips and archive guards through the public API.
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::too_many_lines
)]

use bulkport::io::hash::ContentHasher;
use bulkport::io::{ExportService, Format, ImportOptions, ImportService, TransferInput};
use bulkport::{
    Error, ExportAsset, FatalCode, Limits, ParseResult, RowErrorCode, TransferConfig,
};
use std::collections::BTreeMap;
use std::io::Write;
use test_case::test_case;
use zip::write::SimpleFileOptions;

fn sample_assets() -> Vec<ExportAsset> {
    vec![
        ExportAsset::new("a1", "icon", "<svg viewBox=\"0 0 1 1\"/>").with_name("logo.svg"),
        ExportAsset::new("a2", "note", "line one\nline two, with \"quotes\""),
        ExportAsset::new("a3", "font", "Fira & Co; 100% <bold>"),
        ExportAsset::new("a4", "note", "true"),
        ExportAsset::new("a5", "icon", "12345"),
    ]
}

fn multiset(pairs: impl IntoIterator<Item = (String, String)>) -> BTreeMap<(String, String), usize> {
    let mut counts = BTreeMap::new();
    for pair in pairs {
        *counts.entry(pair).or_insert(0) += 1;
    }
    counts
}

fn export_bytes(format: Format, assets: Vec<ExportAsset>) -> Vec<u8> {
    let service = ExportService::new(TransferConfig::default());
    if format.is_binary() {
        service
            .export_artifact(assets, format, "assets")
            .unwrap()
            .decode()
            .unwrap()
    } else {
        let mut out = Vec::new();
        service.export_to_writer(assets, format, &mut out).unwrap();
        out
    }
}

fn import_bytes(format: Format, bytes: Vec<u8>, config: TransferConfig) -> bulkport::Result<ParseResult> {
    let name = format!("assets.{}", format.extension());
    ImportService::new(config).import_all(
        vec![TransferInput::from_bytes(name, bytes)],
        &ImportOptions::default(),
    )
}

#[test_case(Format::Csv ; "csv")]
#[test_case(Format::Tsv ; "tsv")]
#[test_case(Format::Json ; "json")]
#[test_case(Format::Ndjson ; "ndjson")]
#[test_case(Format::Yaml ; "yaml")]
#[test_case(Format::Xml ; "xml")]
#[test_case(Format::Xlsx ; "xlsx")]
#[test_case(Format::Zip ; "zip")]
fn test_roundtrip_preserves_kind_and_content(format: Format) {
    let assets = sample_assets();
    let expected = multiset(assets.iter().map(|a| (a.kind.clone(), a.content.clone())));

    let bytes = export_bytes(format, assets);
    let result = import_bytes(format, bytes, TransferConfig::default()).unwrap();

    assert!(result.is_clean(), "{format}: {:?}", result.errors);
    let actual = multiset(result.items.into_iter().map(|a| (a.kind, a.content)));
    assert_eq!(actual, expected, "{format}");
}

#[test_case(Format::Csv ; "csv")]
#[test_case(Format::Tsv ; "tsv")]
#[test_case(Format::Json ; "json")]
#[test_case(Format::Ndjson ; "ndjson")]
#[test_case(Format::Yaml ; "yaml")]
#[test_case(Format::Xml ; "xml")]
#[test_case(Format::Xlsx ; "xlsx")]
#[test_case(Format::Zip ; "zip")]
fn test_roundtrip_keeps_empty_content(format: Format) {
    let assets = vec![
        ExportAsset::new("e1", "icon", "").with_name("blank.svg"),
        ExportAsset::new("e2", "icon", "x").with_name("x.svg"),
    ];

    let bytes = export_bytes(format, assets);
    let result = import_bytes(format, bytes, TransferConfig::default()).unwrap();

    assert!(result.is_clean(), "{format}: {:?}", result.errors);
    let actual = multiset(result.items.into_iter().map(|a| (a.kind, a.content)));
    let expected = multiset([
        ("icon".to_string(), String::new()),
        ("icon".to_string(), "x".to_string()),
    ]);
    assert_eq!(actual, expected, "{format}");
}

#[test]
fn test_roundtrip_detects_format_without_extension() {
    let bytes = export_bytes(Format::Zip, sample_assets());
    let result = ImportService::new(TransferConfig::default())
        .import_all(vec![TransferInput::anonymous(bytes)], &ImportOptions::default())
        .unwrap();
    assert_eq!(result.items.len(), 5);
}

#[test]
fn test_manifest_zip_is_lossless() {
    let assets = sample_assets();
    let bytes = export_bytes(Format::Zip, assets.clone());
    let result = import_bytes(Format::Zip, bytes, TransferConfig::default()).unwrap();

    assert_eq!(result.items.len(), assets.len());
    for (ordinal, (item, original)) in result.items.iter().zip(&assets).enumerate() {
        assert_eq!(item.ordinal, ordinal as u64 + 1);
        assert_eq!(item.kind, original.kind);
        assert_eq!(item.content, original.content);
        assert_eq!(
            item.hash.as_deref(),
            Some(ContentHasher::hash(original.content.as_bytes()).as_str())
        );
    }
    assert_eq!(result.items[0].name.as_deref(), Some("logo.svg"));
}

#[test]
fn test_manifest_keeps_supplied_hash() {
    let content = "payload";
    let hash = ContentHasher::hash(content.as_bytes()).to_uppercase();
    let bytes = export_bytes(
        Format::Zip,
        vec![ExportAsset::new("1", "doc", content).with_hash(hash)],
    );
    let result = import_bytes(Format::Zip, bytes, TransferConfig::default()).unwrap();
    assert!(result.is_clean(), "{:?}", result.errors);
}

fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

#[test]
fn test_tampered_manifest_entries_are_row_errors() {
    let manifest = serde_json::json!({
        "version": 1,
        "entries": [
            {"name": "good.txt", "kind": "doc", "hash": ContentHasher::hash(b"good"), "size": 4},
            {"name": "bad.txt", "kind": "doc", "hash": ContentHasher::hash(b"original"), "size": 8},
            {"name": "../escape.txt", "kind": "doc", "size": 1},
            {"name": "gone.txt", "kind": "doc", "size": 1},
            {"name": "nokind.txt", "size": 1},
        ]
    });
    let manifest = serde_json::to_vec(&manifest).unwrap();
    let bytes = build_zip(&[
        ("manifest.json", manifest.as_slice()),
        ("good.txt", b"good".as_slice()),
        ("bad.txt", b"tampered".as_slice()),
        ("nokind.txt", b"x".as_slice()),
    ]);

    let result = import_bytes(Format::Zip, bytes, TransferConfig::default()).unwrap();
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].content, "good");

    let codes: Vec<_> = result.errors.iter().map(|e| (e.ordinal, e.code)).collect();
    assert_eq!(
        codes,
        vec![
            (2, RowErrorCode::HashMismatch),
            (3, RowErrorCode::InvalidPath),
            (4, RowErrorCode::Decompress),
            (5, RowErrorCode::MissingKind),
        ]
    );
}

#[test]
fn test_zip_bomb_is_fatal() {
    let bomb = vec![b'a'; 512 * 1024];
    let bytes = build_zip(&[("bomb.txt", bomb.as_slice())]);
    let config = TransferConfig::default().with_limits(Limits {
        compression_ratio: 10,
        ..Limits::default()
    });

    let err = import_bytes(Format::Zip, bytes, config).unwrap_err();
    assert!(
        matches!(err, Error::Fatal(ref fatal) if fatal.code == FatalCode::CompressionRatio),
        "{err}"
    );
}

#[test]
fn test_archive_total_limit_is_fatal() {
    let chunk = vec![b'z'; 4096];
    let bytes = build_zip(&[
        ("a.txt", chunk.as_slice()),
        ("b.txt", chunk.as_slice()),
        ("c.txt", chunk.as_slice()),
    ]);
    let config = TransferConfig::default().with_limits(Limits {
        total_bytes: 6000,
        ..Limits::default()
    });

    let err = import_bytes(Format::Zip, bytes, config).unwrap_err();
    assert!(matches!(err, Error::Fatal(ref fatal) if fatal.code == FatalCode::ArchiveLimit));
}

#[test]
fn test_row_limit_is_fatal() {
    let config = TransferConfig::default().with_limits(Limits {
        max_items: 2,
        ..Limits::default()
    });
    let err = import_bytes(
        Format::Csv,
        b"kind,content\na,1\nb,2\nc,3\n".to_vec(),
        config,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Fatal(ref fatal) if fatal.code == FatalCode::RowLimit));
}

#[test]
fn test_plain_zip_infers_kind_from_extension() {
    let bytes = build_zip(&[
        ("icons/a.svg", b"<svg/>".as_slice()),
        ("readme", b"no extension".as_slice()),
        ("dir/", b"".as_slice()),
    ]);
    let result = import_bytes(Format::Zip, bytes, TransferConfig::default()).unwrap();

    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].kind, "svg");
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].code, RowErrorCode::MissingKind);
}

#[test]
fn test_multiple_inputs_share_one_result() {
    let inputs = vec![
        TransferInput::from_bytes("a.csv", b"kind,content\nicon,a\n".to_vec()),
        TransferInput::from_bytes("b.yaml", b"kind: icon\ncontent: b\n".to_vec()),
        TransferInput::from_bytes("c.txt", b"{\"kind\":\"icon\",\"content\":\"c\"}\n".to_vec()),
    ];
    let result = ImportService::new(TransferConfig::default())
        .import_all(inputs, &ImportOptions::default())
        .unwrap();

    let contents: Vec<_> = result.items.iter().map(|a| a.content.as_str()).collect();
    assert_eq!(contents, vec!["a", "b", "c"]);
}
