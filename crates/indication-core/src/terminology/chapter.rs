//! Code → chapter table (ICD-10 chapter layout).

use crate::models::Chapter;

/// (id, first code, last code, title). Bounds compare on the three-character
/// category; letters split between chapters (D, H) split on their number.
const CHAPTERS: &[(&str, &str, &str, &str)] = &[
    ("I", "A00", "B99", "Certain infectious and parasitic diseases"),
    ("II", "C00", "D49", "Neoplasms"),
    ("III", "D50", "D99", "Diseases of the blood and blood-forming organs and certain disorders involving the immune mechanism"),
    ("IV", "E00", "E99", "Endocrine, nutritional and metabolic diseases"),
    ("V", "F00", "F99", "Mental and behavioural disorders"),
    ("VI", "G00", "G99", "Diseases of the nervous system"),
    ("VII", "H00", "H59", "Diseases of the eye and adnexa"),
    ("VIII", "H60", "H99", "Diseases of the ear and mastoid process"),
    ("IX", "I00", "I99", "Diseases of the circulatory system"),
    ("X", "J00", "J99", "Diseases of the respiratory system"),
    ("XI", "K00", "K99", "Diseases of the digestive system"),
    ("XII", "L00", "L99", "Diseases of the skin and subcutaneous tissue"),
    ("XIII", "M00", "M99", "Diseases of the musculoskeletal system and connective tissue"),
    ("XIV", "N00", "N99", "Diseases of the genitourinary system"),
    ("XV", "O00", "O99", "Pregnancy, childbirth and the puerperium"),
    ("XVI", "P00", "P99", "Certain conditions originating in the perinatal period"),
    ("XVII", "Q00", "Q99", "Congenital malformations, deformations and chromosomal abnormalities"),
    ("XVIII", "R00", "R99", "Symptoms, signs and abnormal clinical and laboratory findings, not elsewhere classified"),
    ("XIX", "S00", "T99", "Injury, poisoning and certain other consequences of external causes"),
    ("XX", "V00", "Y99", "External causes of morbidity and mortality"),
    ("XXI", "Z00", "Z99", "Factors influencing health status and contact with health services"),
    ("XXII", "U00", "U99", "Codes for special purposes"),
];

/// Chapter of a classification code, or `None` if the code is outside the table.
pub fn chapter_for_code(code: &str) -> Option<Chapter> {
    let category = code_category(code)?;
    CHAPTERS
        .iter()
        .find(|(_, first, last, _)| category.as_str() >= *first && category.as_str() <= *last)
        .map(|(id, first, last, title)| Chapter {
            id: (*id).to_string(),
            range: format!("{}-{}", first, last),
            title: (*title).to_string(),
        })
}

/// Three-character category: a letter, a digit, then a digit or letter ("E03", "C7A").
fn code_category(code: &str) -> Option<String> {
    let mut chars = code.trim().chars().map(|c| c.to_ascii_uppercase());
    let letter = chars.next().filter(|c| c.is_ascii_uppercase())?;
    let tens = chars.next().filter(|c| c.is_ascii_digit())?;
    let units = chars.next().filter(|c| c.is_ascii_alphanumeric())?;
    Some([letter, tens, units].iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter_id(code: &str) -> Option<String> {
        chapter_for_code(code).map(|c| c.id)
    }

    #[test]
    fn test_single_letter_chapters() {
        assert_eq!(chapter_id("E03.9").as_deref(), Some("IV"));
        assert_eq!(chapter_id("I10").as_deref(), Some("IX"));
        assert_eq!(chapter_id("j45.909").as_deref(), Some("X"));
        assert_eq!(chapter_id("A15.0").as_deref(), Some("I"));
        assert_eq!(chapter_id("B20").as_deref(), Some("I"));
        assert_eq!(chapter_id("T39.1").as_deref(), Some("XIX"));
        assert_eq!(chapter_id("W19").as_deref(), Some("XX"));
        assert_eq!(chapter_id("U07.1").as_deref(), Some("XXII"));
    }

    #[test]
    fn test_split_letters() {
        assert_eq!(chapter_id("D32.9").as_deref(), Some("II"));
        assert_eq!(chapter_id("D50.0").as_deref(), Some("III"));
        assert_eq!(chapter_id("H25.9").as_deref(), Some("VII"));
        assert_eq!(chapter_id("H66.9").as_deref(), Some("VIII"));
        assert_eq!(chapter_id("C7A.0").as_deref(), Some("II"));
    }

    #[test]
    fn test_invalid_codes() {
        assert_eq!(chapter_id(""), None);
        assert_eq!(chapter_id("403"), None);
        assert_eq!(chapter_id("E"), None);
        assert_eq!(chapter_id("EX3"), None);
    }

    #[test]
    fn test_table_complete() {
        assert_eq!(CHAPTERS.len(), 22);
        assert_eq!(chapter_for_code("E05").unwrap().range, "E00-E99");
        // Every letter maps somewhere.
        for letter in 'A'..='Z' {
            let code = format!("{}00", letter);
            assert!(chapter_for_code(&code).is_some(), "{} has no chapter", code);
        }
    }
}
