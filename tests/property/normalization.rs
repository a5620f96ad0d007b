//! Property-based tests for reference normalization and output repair

use proptest::prelude::*;
use refereed::references::{
    normalize_title, remap_citations, ReferenceCandidate, ReferenceCanonicalizer,
};
use refereed::schema::{repair_json, ReviewPayload};
use std::collections::HashMap;

proptest! {
    #[test]
    fn normalize_title_is_idempotent(title in "\\PC{0,80}") {
        let once = normalize_title(&title);
        prop_assert_eq!(normalize_title(&once), once);
    }

    #[test]
    fn source_suffix_does_not_change_identity(
        title in "[A-Za-z][A-Za-z ]{0,40}",
        venue in "[A-Z]{2,6} 20[0-9]{2}",
    ) {
        let suffixed = format!("{} | {}", title, venue);
        prop_assert_eq!(normalize_title(&suffixed), normalize_title(&title));
    }

    #[test]
    fn canonical_ids_are_dense_and_stable(titles in prop::collection::vec("[a-e]{1,3}", 1..20)) {
        let mut canon = ReferenceCanonicalizer::new();
        let first: Vec<u32> = titles
            .iter()
            .map(|t| canon.add_reference(&ReferenceCandidate::new(t.clone())))
            .collect();
        let second: Vec<u32> = titles
            .iter()
            .map(|t| canon.add_reference(&ReferenceCandidate::new(t.to_uppercase())))
            .collect();

        prop_assert_eq!(&first, &second);
        prop_assert!(canon.len() <= titles.len());
        let ids: Vec<u32> = canon.references().iter().map(|r| r.id).collect();
        prop_assert_eq!(ids, (1..=canon.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn remapping_is_idempotent_under_identity(text in "[a-z \\[\\],0-9]{0,60}") {
        let mapping: HashMap<u32, u32> = (0..10).map(|n| (n, n)).collect();
        let once = remap_citations(&text, &mapping);
        prop_assert_eq!(remap_citations(&once, &mapping), once);
    }

    #[test]
    fn swapped_mapping_round_trips(a in 1u32..50, b in 1u32..50) {
        prop_assume!(a != b);
        let text = format!("See [{}] then [{}].", a, b);
        let swap = HashMap::from([(a, b), (b, a)]);
        let swapped = remap_citations(&text, &swap);
        prop_assert_eq!(swapped.clone(), format!("See [{}] then [{}].", b, a));
        prop_assert_eq!(remap_citations(&swapped, &swap), text);
    }

    #[test]
    fn repair_never_panics_on_truncated_output(cut in 0usize..200) {
        let full = r#"{"scores": {"accuracy": 8, "clarity": 7.5}, "summary": "Clear \"and\" careful", "weaknesses": ["a", "b"], "detailed_feedback": "ok"}"#;
        let end = cut.min(full.len());
        let _ = repair_json(&full[..end]);
        let review = ReviewPayload::from_output(&full[..end], &["accuracy".to_string()]);
        for score in review.scores.values() {
            prop_assert!((1.0..=10.0).contains(score));
        }
    }
}

