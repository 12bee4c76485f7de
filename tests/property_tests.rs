//! Property-based tests for the parse pipeline.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Every source record surfaces as exactly one item or error
//! - Progress counters never decrease and percentage stays in range
//! - Header normalization is idempotent and ignores case and separators

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use bulkport::io::formats::normalize_key;
use bulkport::io::{ImportOptions, ImportService, TransferInput, TransferStream};
use bulkport::{ProgressSettings, RowErrorCode, TransferConfig, TransferEvent};
use proptest::prelude::*;

fn ndjson(records: &[(String, String)]) -> Vec<u8> {
    records
        .iter()
        .map(|(kind, content)| serde_json::json!({ "kind": kind, "content": content }).to_string() + "\n")
        .collect::<String>()
        .into_bytes()
}

proptest! {
    /// Property: items + errors equals the number of records, and only the
    /// kind-less records fail.
    #[test]
    fn prop_row_count_conservation(
        records in prop::collection::vec(("[a-z]{0,4}", "[a-zA-Z0-9 ,]{0,24}"), 0..60)
    ) {
        let input = TransferInput::from_bytes("r.ndjson", ndjson(&records));
        let result = ImportService::new(TransferConfig::default())
            .import_all(vec![input], &ImportOptions::default())
            .unwrap();

        prop_assert_eq!(result.total_rows(), records.len());
        let missing = records.iter().filter(|(kind, _)| kind.is_empty()).count();
        prop_assert_eq!(result.errors.len(), missing);
        prop_assert!(result.errors.iter().all(|e| e.code == RowErrorCode::MissingKind));

        let ordinals: Vec<u64> = result
            .items
            .iter()
            .map(|a| a.ordinal)
            .chain(result.errors.iter().map(|e| e.ordinal))
            .collect();
        let mut sorted = ordinals.clone();
        sorted.sort_unstable();
        prop_assert_eq!(sorted, (1..=records.len() as u64).collect::<Vec<_>>());
    }

    /// Property: progress is monotonic, bounded, and the result comes last.
    #[test]
    fn prop_progress_monotonic(
        rows in 0usize..250,
        row_interval in 1u64..20,
        byte_interval in 16u64..2048,
    ) {
        let mut csv = String::from("kind,content\n");
        for i in 0..rows {
            csv.push_str(&format!("icon,content-{i}\n"));
        }
        let config = TransferConfig::default().with_progress(ProgressSettings {
            row_interval,
            byte_interval,
        });
        let events: Vec<_> = TransferStream::new(
            vec![TransferInput::from_bytes("p.csv", csv.into_bytes())],
            Default::default(),
            &config,
        )
        .collect::<Result<_, _>>()
        .unwrap();

        let mut last_bytes = 0;
        let mut last_rows = 0;
        for event in &events[..events.len() - 1] {
            let TransferEvent::Progress(progress) = event else {
                return Err(TestCaseError::fail("result before end of stream"));
            };
            prop_assert!(progress.bytes_processed >= last_bytes);
            prop_assert!(progress.rows_processed >= last_rows);
            prop_assert!((0.0..=100.0).contains(&progress.percentage));
            prop_assert!(progress.bytes_processed <= progress.total_bytes);
            last_bytes = progress.bytes_processed;
            last_rows = progress.rows_processed;
        }
        prop_assert_eq!(last_rows, rows as u64);
        let is_result = matches!(events.last(), Some(TransferEvent::Result(_)));
        prop_assert!(is_result);
    }

    /// Property: normalization is idempotent.
    #[test]
    fn prop_normalize_idempotent(key in "[ a-zA-Z_-]{0,20}") {
        let once = normalize_key(&key);
        prop_assert_eq!(normalize_key(&once), once);
    }

    /// Property: case and separators never change the normalized key.
    #[test]
    fn prop_normalize_ignores_decoration(
        upper in prop::collection::vec(any::<bool>(), 9),
        separator in prop::sample::select(vec!["", "_", "-", " ", "  "]),
    ) {
        let decorated: String = "assettype"
            .chars()
            .zip(&upper)
            .enumerate()
            .flat_map(|(i, (c, up))| {
                let c = if *up { c.to_ascii_uppercase() } else { c };
                let sep = if i == 5 { separator } else { "" };
                sep.chars().chain(std::iter::once(c)).collect::<Vec<_>>()
            })
            .collect();
        prop_assert_eq!(normalize_key(&decorated), "assettype");
    }
}
