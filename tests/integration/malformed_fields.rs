//! Integration tests for fallbacks on malformed model output

use refereed::schema::{
    repair_json_with_strategy, DraftPayload, ModeratorPayload, RepairStrategy, ReviewPayload,
    ScreeningVerdict, TeamProposal, DEFAULT_SCORE,
};
use refereed::workflow::VerdictDecision;
use serde_json::json;

fn criteria() -> Vec<String> {
    ["accuracy", "clarity", "rigor"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

#[test]
fn test_untitled_sections_get_positional_titles() {
    let sections: Vec<_> = (0..5)
        .map(|i| json!({"content": format!("Body {}", i)}))
        .collect();
    let output = json!({"title": "Untitled Draft", "sections": sections}).to_string();

    let payload = DraftPayload::from_output(&output, "author-lead");
    assert_eq!(payload.sections.len(), 5);
    for (i, section) in payload.sections.iter().enumerate() {
        assert_eq!(section.title, format!("Section {}", i));
        assert_eq!(section.id, format!("section-{}", i));
        assert_eq!(section.content, format!("Body {}", i));
        assert_eq!(section.author_id, "author-lead");
    }
}

#[test]
fn test_null_and_blank_fields_fall_back() {
    let output = r#"{"sections": [{"id": null, "title": "   ", "content": null}], "references": [{}, {"title": "Kept"}]}"#;
    let payload = DraftPayload::from_output(output, "a");

    assert_eq!(payload.title, "");
    assert_eq!(payload.sections[0].id, "section-0");
    assert_eq!(payload.sections[0].title, "Section 0");
    assert_eq!(payload.sections[0].content, "");
    // The empty reference is dropped; the kept one keeps its position-based id
    assert_eq!(payload.references.len(), 1);
    assert_eq!(payload.references[0].local_id, 2);
}

#[test]
fn test_prose_draft_becomes_one_section() {
    let output = "# Sparse Attention\n\nA survey of sparse attention patterns.";
    let payload = DraftPayload::from_output(output, "a");

    assert_eq!(payload.title, "Sparse Attention");
    assert_eq!(payload.sections.len(), 1);
    assert_eq!(payload.sections[0].content, output);
}

#[test]
fn test_fenced_and_truncated_output_is_recovered() {
    let fenced = "Here you go:\n```json\n{\"decision\": \"reject\", \"reason\": \"off topic\"}\n```";
    let (_, strategy) = repair_json_with_strategy(fenced).unwrap();
    assert_eq!(strategy, RepairStrategy::Fenced);
    assert!(!ScreeningVerdict::from_output(fenced).passed);

    let truncated = r#"{"scores": {"accuracy": 9, "clarity": 7}, "summary": "Solid work", "weaknesses": ["terse"#;
    let (_, strategy) = repair_json_with_strategy(truncated).unwrap();
    assert_eq!(strategy, RepairStrategy::Truncated);
    let review = ReviewPayload::from_output(truncated, &criteria());
    assert_eq!(review.scores["accuracy"], 9.0);
    assert_eq!(review.scores["clarity"], 7.0);
    assert_eq!(review.summary, "Solid work");
}

#[test]
fn test_review_scores_are_clamped_and_defaulted() {
    let output = json!({
        "scores": {"accuracy": 14, "clarity": "8/10", "rigor": "excellent"}
    })
    .to_string();
    let review = ReviewPayload::from_output(&output, &criteria());

    assert_eq!(review.scores["accuracy"], 10.0);
    assert_eq!(review.scores["clarity"], 8.0);
    assert_eq!(review.scores["rigor"], DEFAULT_SCORE);
    assert_eq!(review.composite(), 7.7);

    let prose = ReviewPayload::from_output("Looks fine to me.", &criteria());
    assert_eq!(prose.scores.len(), 3);
    assert_eq!(prose.composite(), DEFAULT_SCORE);
}

#[test]
fn test_moderator_without_usable_decision() {
    let vague = ModeratorPayload::from_output(r#"{"decision": "maybe", "confidence": 11}"#);
    assert_eq!(vague.decision, None);
    assert_eq!(vague.confidence, 5);

    let explicit = ModeratorPayload::from_output(r#"{"decision": "ACCEPT"}"#);
    assert_eq!(explicit.decision, Some(VerdictDecision::Accept));
}

#[test]
fn test_team_proposal_without_ids() {
    let output = r#"[{"role": "reviewer"}, {"domain": "Optimization", "role": "Co-Author"}]"#;
    let proposal = TeamProposal::from_output(output);

    assert_eq!(proposal.experts.len(), 2);
    assert_eq!(proposal.experts[0].id, "expert-0");
    assert_eq!(proposal.experts[0].domain, "Expert 0");
    assert_eq!(proposal.experts[1].domain, "Optimization");
    assert_eq!(proposal.experts[1].role, refereed::workflow::ExpertRole::Author);

    assert!(TeamProposal::from_output("no team today").experts.is_empty());
}
