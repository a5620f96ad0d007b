//! Prompt builders, one per role.

use crate::provider::PromptContext;

use super::types::{
    AudienceLevel, ExpertConfig, Manuscript, Recommendation, ReviewRound, WorkflowRequest,
};

fn audience_guidance(audience: AudienceLevel) -> &'static str {
    match audience {
        AudienceLevel::Beginner => "Write for newcomers: define terms and favour intuition over formalism.",
        AudienceLevel::Intermediate => "Write for practitioners with working knowledge of the field.",
        AudienceLevel::Professional => "Write for specialists: be precise, dense and rigorous.",
    }
}

fn describe_expert(expert: &ExpertConfig) -> String {
    if expert.focus_areas.is_empty() {
        expert.domain.clone()
    } else {
        format!("{} (focus: {})", expert.domain, expert.focus_areas.join(", "))
    }
}

pub fn team_composition(request: &WorkflowRequest) -> PromptContext {
    let system = "You assemble expert teams for research reports. Respond with JSON only.";
    let user = format!(
        r#"Topic: {topic}

Propose {team_size} reviewer experts whose domains together cover this topic.
Mark each with "role": "reviewer". Also propose up to {team_size} author experts with "role": "author".

Respond with:
{{
  "analysis": "<brief analysis of the expertise the topic needs>",
  "experts": [
    {{"id": "<short id>", "domain": "<domain>", "role": "reviewer|author", "focus_areas": ["..."], "rationale": "<why>"}}
  ]
}}"#,
        topic = request.topic,
        team_size = request.team_size,
    );
    PromptContext::new(system, user)
}

pub fn draft(
    request: &WorkflowRequest,
    author: &ExpertConfig,
    author_index: usize,
    author_count: usize,
) -> PromptContext {
    let system = format!(
        "You are an expert author in {}. {} Respond with JSON only.",
        describe_expert(author),
        audience_guidance(request.audience)
    );
    let share = if author_count > 1 {
        format!(
            "You are author {} of {}. Write only the sections within your expertise; the others cover theirs.\n",
            author_index + 1,
            author_count
        )
    } else {
        String::new()
    };
    let user = format!(
        r#"Write a research report on: {topic}
{share}
Cite sources inline as [n], numbered by your reference list.

Respond with:
{{
  "title": "<title>",
  "sections": [{{"id": "<short id>", "title": "<heading>", "content": "<markdown>"}}],
  "references": [{{"id": 1, "title": "<title>", "authors": "<authors>", "year": 2024, "doi": "<doi or null>", "url": "<url or null>"}}]
}}"#,
        topic = request.topic,
        share = share,
    );
    PromptContext::new(system, user)
}

pub fn screening(request: &WorkflowRequest, manuscript: &Manuscript) -> PromptContext {
    let system = "You are a desk editor deciding whether a manuscript is fit for peer review. Respond with JSON only.";
    let user = format!(
        r#"Topic: {topic}

Manuscript:
{body}

Reject only if the manuscript is off-topic, empty, or fundamentally unreviewable.

Respond with:
{{"decision": "pass|reject", "reason": "<one sentence>"}}"#,
        topic = request.topic,
        body = manuscript.render_markdown(),
    );
    PromptContext::new(system, user)
}

pub fn review(
    request: &WorkflowRequest,
    manuscript: &Manuscript,
    reviewer: &ExpertConfig,
    round: u32,
    criteria: &[String],
) -> PromptContext {
    let system = format!(
        "You are a peer reviewer with expertise in {}. Score honestly. Respond with JSON only.",
        describe_expert(reviewer)
    );
    let score_fields = criteria
        .iter()
        .map(|c| format!("\"{}\": <1-10>", c))
        .collect::<Vec<_>>()
        .join(", ");
    let user = format!(
        r#"Review round {round} of a manuscript on: {topic}

{body}

Scoring guide: 9-10 exceptional, 7-8 strong, 5-6 adequate, 3-4 weak, 1-2 poor.

Respond with:
{{
  "scores": {{{score_fields}}},
  "summary": "<2-3 sentences>",
  "strengths": ["..."],
  "weaknesses": ["..."],
  "suggestions": ["..."],
  "detailed_feedback": "<paragraph>"
}}"#,
        round = round,
        topic = request.topic,
        body = manuscript.render_markdown(),
        score_fields = score_fields,
    );
    PromptContext::new(system, user)
}

pub fn revision(
    request: &WorkflowRequest,
    manuscript: &Manuscript,
    round: &ReviewRound,
) -> PromptContext {
    let system = format!(
        "You are the lead author revising a manuscript after peer review. {} Respond with JSON only.",
        audience_guidance(request.audience)
    );
    let mut feedback = String::new();
    for review in &round.reviews {
        feedback.push_str(&format!(
            "Reviewer {} (score {:.1}): {}\n",
            review.reviewer_id, review.composite, review.summary
        ));
        for weakness in &review.weaknesses {
            feedback.push_str(&format!("  - weakness: {}\n", weakness));
        }
        for suggestion in &review.suggestions {
            feedback.push_str(&format!("  - suggestion: {}\n", suggestion));
        }
    }
    let section_ids = manuscript
        .sections
        .iter()
        .map(|s| s.id.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let user = format!(
        r#"Round {round} aggregate score: {aggregate:.1}

Reviewer feedback:
{feedback}
Manuscript:
{body}

Revise only the sections the feedback implicates. Section ids: {section_ids}

Respond with:
{{
  "revised_sections": [{{"id": "<existing section id>", "content": "<full revised markdown>"}}],
  "response_to_reviewers": "<how the feedback was addressed>"
}}"#,
        round = round.round,
        aggregate = round.aggregate,
        feedback = feedback,
        body = manuscript.render_markdown(),
        section_ids = section_ids,
    );
    PromptContext::new(system, user)
}

pub fn moderator(
    request: &WorkflowRequest,
    manuscript: &Manuscript,
    rounds: &[ReviewRound],
    recommendation: Recommendation,
) -> PromptContext {
    let system = "You are the handling editor making the final publication decision. Respond with JSON only.";
    let history = rounds
        .iter()
        .map(|r| {
            format!(
                "Round {}: aggregate {:.1} from {} reviews ({} missing)",
                r.round,
                r.aggregate,
                r.reviews.len(),
                r.missing.len()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let default = match recommendation {
        Recommendation::Accept => "accept",
        Recommendation::Reject => "reject",
    };
    let user = format!(
        r#"Topic: {topic}

Review history:
{history}

Score-based recommendation: {default}

Manuscript:
{body}

Confirm or override the recommendation.

Respond with:
{{
  "decision": "ACCEPT|MINOR_REVISION|MAJOR_REVISION|REJECT",
  "confidence": <1-5>,
  "meta_review": "<synthesis of the reviews>",
  "key_strengths": ["..."],
  "key_weaknesses": ["..."],
  "required_changes": ["..."],
  "recommendation": "<guidance to authors>"
}}"#,
        topic = request.topic,
        history = history,
        default = default,
        body = manuscript.render_markdown(),
    );
    PromptContext::new(system, user)
}
