//! Condition text normalizer.
//!
//! Handles:
//! - Case and whitespace folding ("  Type 2   Diabetes" → "type 2 diabetes")
//! - Abbreviation expansion (htn→hypertension, copd→chronic obstructive pulmonary disease)

use std::collections::HashMap;

use crate::models::normalize_text;

/// Normalizer for condition strings.
pub struct TermNormalizer {
    /// Alias map: abbreviation → expanded condition name
    aliases: HashMap<String, String>,
}

impl Default for TermNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TermNormalizer {
    /// Create a new normalizer with default abbreviations.
    pub fn new() -> Self {
        Self {
            aliases: Self::default_aliases(),
        }
    }

    /// Create a normalizer without any abbreviations.
    pub fn without_aliases() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    /// Lowercase, trim, and collapse internal whitespace.
    pub fn normalize(&self, text: &str) -> String {
        normalize_text(text)
    }

    /// Expand a whole normalized string if it is a known abbreviation.
    ///
    /// Returns `None` when there is no alias, so callers can tell an expansion
    /// apart from the text itself.
    pub fn expand_alias(&self, normalized: &str) -> Option<&str> {
        self.aliases
            .get(normalized)
            .map(String::as_str)
            .filter(|expanded| *expanded != normalized)
    }

    /// Add a custom alias mapping.
    pub fn add_alias(&mut self, alias: &str, canonical: &str) {
        self.aliases
            .insert(normalize_text(alias), normalize_text(canonical));
    }

    /// Number of known aliases.
    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    /// Default clinical abbreviations.
    fn default_aliases() -> HashMap<String, String> {
        let mut map = HashMap::new();

        // Cardiovascular
        map.insert("htn".into(), "hypertension".into());
        map.insert("mi".into(), "myocardial infarction".into());
        map.insert("chf".into(), "congestive heart failure".into());
        map.insert("hf".into(), "heart failure".into());
        map.insert("cad".into(), "coronary artery disease".into());
        map.insert("af".into(), "atrial fibrillation".into());
        map.insert("afib".into(), "atrial fibrillation".into());
        map.insert("dvt".into(), "deep vein thrombosis".into());
        map.insert("pe".into(), "pulmonary embolism".into());

        // Endocrine / metabolic
        map.insert("t1dm".into(), "type 1 diabetes mellitus".into());
        map.insert("t2dm".into(), "type 2 diabetes mellitus".into());
        map.insert("dm".into(), "diabetes mellitus".into());

        // Respiratory
        map.insert("copd".into(), "chronic obstructive pulmonary disease".into());
        map.insert("cap".into(), "community-acquired pneumonia".into());
        map.insert("tb".into(), "tuberculosis".into());

        // Digestive
        map.insert("gerd".into(), "gastroesophageal reflux disease".into());
        map.insert("ibd".into(), "inflammatory bowel disease".into());
        map.insert("ibs".into(), "irritable bowel syndrome".into());

        // Renal / urinary
        map.insert("ckd".into(), "chronic kidney disease".into());
        map.insert("aki".into(), "acute kidney injury".into());
        map.insert("uti".into(), "urinary tract infection".into());
        map.insert("bph".into(), "benign prostatic hyperplasia".into());

        // Musculoskeletal / immune
        map.insert("ra".into(), "rheumatoid arthritis".into());
        map.insert("oa".into(), "osteoarthritis".into());
        map.insert("sle".into(), "systemic lupus erythematosus".into());

        // Neurological / psychiatric
        map.insert("ms".into(), "multiple sclerosis".into());
        map.insert("adhd".into(), "attention deficit hyperactivity disorder".into());
        map.insert("mdd".into(), "major depressive disorder".into());
        map.insert("gad".into(), "generalized anxiety disorder".into());
        map.insert("ptsd".into(), "post-traumatic stress disorder".into());
        map.insert("ocd".into(), "obsessive-compulsive disorder".into());

        // Oncology
        map.insert("nsclc".into(), "non-small cell lung cancer".into());
        map.insert("sclc".into(), "small cell lung cancer".into());
        map.insert("aml".into(), "acute myeloid leukemia".into());
        map.insert("cml".into(), "chronic myeloid leukemia".into());
        map.insert("hcc".into(), "hepatocellular carcinoma".into());

        // Infectious
        map.insert("hiv".into(), "hiv infection".into());
        map.insert("hcv".into(), "hepatitis c".into());
        map.insert("hbv".into(), "hepatitis b".into());

        map
    }
}
