use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// OCR/indexing language hint. Mirrors the small, explicit set the frame
/// source and ingestion pipeline are willing to request from the OCR engine;
/// an empty list means "auto-detect".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    Spanish,
    French,
    German,
    Italian,
    Portuguese,
    Japanese,
    Korean,
    Chinese,
}

impl Language {
    pub fn tesseract_code(&self) -> &'static str {
        match self {
            Language::English => "eng",
            Language::Spanish => "spa",
            Language::French => "fra",
            Language::German => "deu",
            Language::Italian => "ita",
            Language::Portuguese => "por",
            Language::Japanese => "jpn",
            Language::Korean => "kor",
            Language::Chinese => "chi_sim",
        }
    }
}

/// Deduplicates a list of requested languages, preserving first-seen order.
pub fn unique_languages(languages: &[Language]) -> Vec<Language> {
    let mut seen = std::collections::HashSet::new();
    languages
        .iter()
        .copied()
        .filter(|lang| seen.insert(*lang))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_preserving_order() {
        let langs = vec![Language::English, Language::French, Language::English];
        assert_eq!(
            unique_languages(&langs),
            vec![Language::English, Language::French]
        );
    }
}
