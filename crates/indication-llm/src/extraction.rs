//! Parsing of model output for both task modes.

use serde::Deserialize;

use crate::prompts::NO_INDICATION;
use crate::service::{Identification, InferenceError, InferenceResult};

/// Raw identify output: either a list of strings or the sentinel string.
#[derive(Debug, Deserialize)]
struct IdentifyOutput {
    indications: IndicationsField,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IndicationsField {
    List(Vec<String>),
    Sentinel(String),
}

/// Raw verify output.
#[derive(Debug, Deserialize)]
struct VerifyOutput {
    confidence: f64,
}

/// Slice out the outermost JSON object (the model may add text around it).
fn json_object(text: &str) -> InferenceResult<&str> {
    let start = text
        .find('{')
        .ok_or_else(|| InferenceError::Unparseable("No JSON object found in response".into()))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| InferenceError::Unparseable("No closing brace found in response".into()))?;
    if end < start {
        return Err(InferenceError::Unparseable(
            "Closing brace precedes opening brace".into(),
        ));
    }
    Ok(&text[start..=end])
}

/// Parse identify-mode output into conditions or the no-indication sentinel.
///
/// Blank entries are dropped; an empty list is treated as no indication.
pub fn parse_identify_output(text: &str) -> InferenceResult<Identification> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case(NO_INDICATION) {
        return Ok(Identification::NoIndication);
    }

    let slice = json_object(trimmed)?;
    let output: IdentifyOutput = serde_json::from_str(slice)
        .map_err(|e| InferenceError::Unparseable(format!("identify output: {}", e)))?;

    match output.indications {
        IndicationsField::Sentinel(s) if s.trim().eq_ignore_ascii_case(NO_INDICATION) => {
            Ok(Identification::NoIndication)
        }
        IndicationsField::Sentinel(s) => Err(InferenceError::Unparseable(format!(
            "unexpected indications value: {}",
            s
        ))),
        IndicationsField::List(items) => {
            let conditions: Vec<String> = items
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(NO_INDICATION))
                .collect();
            if conditions.is_empty() {
                Ok(Identification::NoIndication)
            } else {
                Ok(Identification::Conditions(conditions))
            }
        }
    }
}

/// Parse verify-mode output into a confidence in [0, 1].
///
/// Accepts a `{"confidence": x}` object or a bare number. Anything else,
/// including a number outside [0, 1], is an error: no default is guessed.
pub fn parse_verify_output(text: &str) -> InferenceResult<f64> {
    let trimmed = text.trim();

    let value = match json_object(trimmed) {
        Ok(slice) => {
            serde_json::from_str::<VerifyOutput>(slice)
                .map_err(|e| InferenceError::Unparseable(format!("verify output: {}", e)))?
                .confidence
        }
        Err(_) => trimmed
            .parse::<f64>()
            .map_err(|_| InferenceError::Unparseable(format!("verify output: {:?}", trimmed)))?,
    };

    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(InferenceError::Unparseable(format!(
            "confidence out of range: {}",
            value
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identify_list() {
        let out = parse_identify_output(r#"{"indications": ["Hypertension", " heart failure "]}"#)
            .unwrap();
        assert_eq!(
            out,
            Identification::Conditions(vec!["Hypertension".into(), "heart failure".into()])
        );
    }

    #[test]
    fn test_parse_identify_with_prefix() {
        let out = parse_identify_output(
            r#"Here is the answer:
{"indications": ["asthma"]}"#,
        )
        .unwrap();
        assert_eq!(out.conditions(), ["asthma".to_string()]);
    }

    #[test]
    fn test_parse_identify_sentinel() {
        assert_eq!(
            parse_identify_output(r#"{"indications": "NO_INDICATION"}"#).unwrap(),
            Identification::NoIndication
        );
        assert_eq!(
            parse_identify_output("no_indication").unwrap(),
            Identification::NoIndication
        );
        assert_eq!(
            parse_identify_output(r#"{"indications": []}"#).unwrap(),
            Identification::NoIndication
        );
    }

    #[test]
    fn test_parse_identify_garbage() {
        assert!(matches!(
            parse_identify_output("I am not sure."),
            Err(InferenceError::Unparseable(_))
        ));
        assert!(matches!(
            parse_identify_output(r#"{"indications": "maybe"}"#),
            Err(InferenceError::Unparseable(_))
        ));
    }

    #[test]
    fn test_parse_verify() {
        assert_eq!(parse_verify_output(r#"{"confidence": 0.85}"#).unwrap(), 0.85);
        assert_eq!(parse_verify_output("Score: {\"confidence\": 1}").unwrap(), 1.0);
        assert_eq!(parse_verify_output(" 0.3 ").unwrap(), 0.3);
    }

    #[test]
    fn test_parse_verify_never_defaults() {
        assert!(parse_verify_output("high").is_err());
        assert!(parse_verify_output(r#"{"confidence": "high"}"#).is_err());
        assert!(parse_verify_output(r#"{"confidence": 1.5}"#).is_err());
        assert!(parse_verify_output("-0.1").is_err());
        assert!(parse_verify_output("NaN").is_err());
    }
}
