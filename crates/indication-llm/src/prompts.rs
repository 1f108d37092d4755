//! Prompts for the identify and verify task modes.
//!
//! Both prompts ask for a small JSON object so the parsers in
//! [`crate::extraction`] can recover the answer even when the model wraps it
//! in prose.

/// Sentinel the model is told to emit when a document names no indication.
pub const NO_INDICATION: &str = "NO_INDICATION";

/// System prompt shared by both task modes.
pub const SYSTEM_PROMPT: &str = r#"You are a biomedical curator. You read titles and abstracts of scientific articles and decide which medical conditions a substance is used to treat.

Rules:
- Only report therapeutic indications: conditions the substance treats, prevents or manages.
- Do not report adverse effects, contraindications, or conditions merely mentioned in passing.
- Use the condition name as written in the text, without abbreviations where possible.
- Answer with JSON only."#;

/// User prompt for identify mode.
pub fn make_identify_prompt(substance: &str, document_text: &str) -> String {
    format!(
        r#"Substance: {substance}

Article:
"{document_text}"

List every condition the article reports {substance} as a treatment for.
Return a JSON object {{"indications": ["condition", ...]}}.
If the article reports no therapeutic indication for {substance}, return {{"indications": "{NO_INDICATION}"}}."#
    )
}

/// User prompt for verify mode.
pub fn make_verify_prompt(substance: &str, condition: &str, document_text: &str) -> String {
    format!(
        r#"Substance: {substance}
Condition: {condition}

Article:
"{document_text}"

How strongly does this article support {substance} being a treatment for {condition}?
Return a JSON object {{"confidence": <number between 0 and 1>}} where 0 means no support and 1 means direct evidence of therapeutic use."#
    )
}

/// Few-shot examples for identify mode: (substance, document, answer).
pub const IDENTIFY_EXAMPLES: &[(&str, &str, &str)] = &[
    (
        "levothyroxine",
        "Levothyroxine replacement in adults with overt hypothyroidism: a randomized dose-titration trial.",
        r#"{"indications": ["hypothyroidism"]}"#,
    ),
    (
        "metformin",
        "Metformin-associated lactic acidosis in patients with renal impairment: a case series.",
        r#"{"indications": "NO_INDICATION"}"#,
    ),
];

/// Few-shot examples for verify mode: (substance, condition, document, answer).
pub const VERIFY_EXAMPLES: &[(&str, &str, &str, &str)] = &[
    (
        "lisinopril",
        "hypertension",
        "Lisinopril lowered systolic blood pressure by 12 mmHg versus placebo in stage 1 hypertension.",
        r#"{"confidence": 0.95}"#,
    ),
    (
        "lisinopril",
        "angioedema",
        "Angioedema is a rare but serious adverse effect of lisinopril therapy.",
        r#"{"confidence": 0.02}"#,
    ),
];

fn push_turn(prompt: &mut String, role: &str, content: &str) {
    prompt.push_str("<|");
    prompt.push_str(role);
    prompt.push_str("|>\n");
    prompt.push_str(content);
    prompt.push_str("\n<|end|>\n");
}

/// Build a complete identify prompt with system context and optional examples.
pub fn build_identify_prompt(substance: &str, document_text: &str, include_examples: bool) -> String {
    let mut prompt = String::new();
    push_turn(&mut prompt, "system", SYSTEM_PROMPT);

    if include_examples {
        for (example_substance, example_doc, answer) in IDENTIFY_EXAMPLES {
            push_turn(
                &mut prompt,
                "user",
                &make_identify_prompt(example_substance, example_doc),
            );
            push_turn(&mut prompt, "assistant", answer);
        }
    }

    push_turn(&mut prompt, "user", &make_identify_prompt(substance, document_text));
    prompt.push_str("<|assistant|>\n");
    prompt
}

/// Build a complete verify prompt with system context and optional examples.
pub fn build_verify_prompt(
    substance: &str,
    condition: &str,
    document_text: &str,
    include_examples: bool,
) -> String {
    let mut prompt = String::new();
    push_turn(&mut prompt, "system", SYSTEM_PROMPT);

    if include_examples {
        for (example_substance, example_condition, example_doc, answer) in VERIFY_EXAMPLES {
            push_turn(
                &mut prompt,
                "user",
                &make_verify_prompt(example_substance, example_condition, example_doc),
            );
            push_turn(&mut prompt, "assistant", answer);
        }
    }

    push_turn(
        &mut prompt,
        "user",
        &make_verify_prompt(substance, condition, document_text),
    );
    prompt.push_str("<|assistant|>\n");
    prompt
}
