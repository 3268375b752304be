//! Keyword derivation for index documents and planner domain hints.
//!
//! One canonical abbreviation dictionary feeds both the planner (domain
//! inference hints) and the indexer (keyword expansion); type names map to
//! semantic labels, and sample values are pattern-matched for common shapes
//! (email, url, phone, uuid, currency, date, json). All keywords are
//! lowercased and filtered to length > 2.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

/// The canonical abbreviation dictionary. Expansions may be multi-word.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("acct", "account"),
    ("addr", "address"),
    ("amt", "amount"),
    ("auth", "authentication"),
    ("avg", "average"),
    ("cat", "category"),
    ("cfg", "configuration"),
    ("cnt", "count"),
    ("cust", "customer"),
    ("desc", "description"),
    ("dept", "department"),
    ("dob", "date of birth"),
    ("fk", "foreign key"),
    ("img", "image"),
    ("inv", "invoice"),
    ("msg", "message"),
    ("num", "number"),
    ("org", "organization"),
    ("pk", "primary key"),
    ("prod", "product"),
    ("qty", "quantity"),
    ("ref", "reference"),
    ("svc", "service"),
    ("txn", "transaction"),
    ("usr", "user"),
];

/// Database vocabulary worth keeping from free-text descriptions.
const DB_VOCABULARY: &[&str] = &[
    "table", "column", "record", "identifier", "timestamp", "foreign", "primary", "index",
    "reference", "lookup", "audit", "history", "status", "amount", "total", "count", "flag",
];

pub fn expand_abbreviation(token: &str) -> Option<&'static str> {
    ABBREVIATIONS
        .iter()
        .find(|(abbr, _)| *abbr == token)
        .map(|(_, full)| *full)
}

/// Split an identifier on underscores and camelCase boundaries, lowercased.
pub fn split_identifier(identifier: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for part in identifier.split(['_', '-', '.', ' ']) {
        if part.is_empty() {
            continue;
        }
        let mut current = String::new();
        let chars: Vec<char> = part.chars().collect();
        for (i, &c) in chars.iter().enumerate() {
            let boundary = c.is_uppercase()
                && i > 0
                && (chars[i - 1].is_lowercase()
                    || (i + 1 < chars.len() && chars[i + 1].is_lowercase()));
            if boundary && !current.is_empty() {
                tokens.push(current.to_lowercase());
                current = String::new();
            }
            current.push(c);
        }
        if !current.is_empty() {
            tokens.push(current.to_lowercase());
        }
    }
    tokens
}

/// Semantic labels for a SQL data type.
pub fn type_labels(data_type: &str) -> Vec<&'static str> {
    let t = data_type.to_lowercase();
    if t.contains("timestamp") || t.contains("datetime") {
        vec!["date", "temporal"]
    } else if t.contains("date") || t.contains("time") {
        vec!["temporal"]
    } else if t.contains("uuid") {
        vec!["identifier"]
    } else if t.contains("serial") || (t.contains("int") && t.contains("auto")) {
        vec!["identifier", "numeric"]
    } else if t.contains("int") || t.contains("decimal") || t.contains("numeric")
        || t.contains("real") || t.contains("float") || t.contains("double")
    {
        vec!["numeric"]
    } else if t.contains("bool") {
        vec!["flag", "boolean"]
    } else if t.contains("json") {
        vec!["json", "structured"]
    } else if t.contains("blob") || t.contains("binary") || t.contains("bytea") {
        vec!["binary"]
    } else if t.contains("char") || t.contains("text") || t.contains("clob") {
        vec!["text"]
    } else {
        vec![]
    }
}

fn patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap(), "email"),
            (Regex::new(r"^https?://").unwrap(), "url"),
            (Regex::new(r"^\+?[0-9][0-9 ().-]{6,}$").unwrap(), "phone"),
            (
                Regex::new(
                    r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
                )
                .unwrap(),
                "uuid",
            ),
            (Regex::new(r"^[$€£¥]\s?\d|^\d+\.\d{2}$").unwrap(), "currency"),
            (Regex::new(r"^\d{4}-\d{2}-\d{2}").unwrap(), "date"),
            (Regex::new(r"^\s*[\[{]").unwrap(), "json"),
        ]
    })
}

/// Detect value shapes across a set of sample values.
pub fn value_patterns(samples: &[String]) -> Vec<&'static str> {
    let mut found = BTreeSet::new();
    for sample in samples {
        for (pattern, label) in patterns() {
            if pattern.is_match(sample.trim()) {
                found.insert(*label);
            }
        }
    }
    found.into_iter().collect()
}

/// Noun-ish and database-vocabulary words from a free-text description.
pub fn description_terms(description: &str) -> Vec<String> {
    let word_re: &Regex = {
        static WORD: OnceLock<Regex> = OnceLock::new();
        WORD.get_or_init(|| Regex::new(r"[A-Za-z][A-Za-z0-9]+").unwrap())
    };
    let mut terms = BTreeSet::new();
    for m in word_re.find_iter(description) {
        let word = m.as_str().to_lowercase();
        if word.len() <= 2 {
            continue;
        }
        if DB_VOCABULARY.contains(&word.as_str()) {
            terms.insert(word);
        } else if word.len() >= 5 && !STOPWORDS.contains(&word.as_str()) {
            // Longer content words are usually the nouns worth indexing.
            terms.insert(word);
        }
    }
    terms.into_iter().collect()
}

const STOPWORDS: &[&str] = &[
    "about", "after", "along", "around", "before", "being", "between", "contains", "could",
    "every", "inside", "other", "should", "stores", "their", "there", "these", "this", "those",
    "through", "under", "usually", "where", "which", "while", "whose", "within", "would",
];

/// Inputs to keyword extraction for one index document.
pub struct KeywordInput<'a> {
    /// Identifiers: table/column/domain names.
    pub identifiers: Vec<&'a str>,
    pub data_type: Option<&'a str>,
    pub sample_values: &'a [String],
    pub description: &'a str,
    /// Parent context terms: domain name, parent table.
    pub parent_terms: Vec<&'a str>,
}

/// Build the keyword set for a document: identifier tokens, abbreviation
/// expansions, type labels, value patterns, description vocabulary, and
/// parent context. Lowercased, deduplicated, length > 2.
pub fn extract_keywords(input: &KeywordInput<'_>) -> Vec<String> {
    let mut keywords = BTreeSet::new();

    for identifier in &input.identifiers {
        for token in split_identifier(identifier) {
            if let Some(expansion) = expand_abbreviation(&token) {
                for word in expansion.split(' ') {
                    keywords.insert(word.to_string());
                }
            }
            keywords.insert(token);
        }
    }

    if let Some(data_type) = input.data_type {
        for label in type_labels(data_type) {
            keywords.insert(label.to_string());
        }
    }

    for label in value_patterns(input.sample_values) {
        keywords.insert(label.to_string());
    }

    for term in description_terms(input.description) {
        keywords.insert(term);
    }

    for parent in &input.parent_terms {
        for token in split_identifier(parent) {
            keywords.insert(token);
        }
    }

    keywords.into_iter().filter(|k| k.len() > 2).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_underscores_and_camel_case() {
        assert_eq!(split_identifier("user_id"), vec!["user", "id"]);
        assert_eq!(split_identifier("createdAt"), vec!["created", "at"]);
        assert_eq!(split_identifier("HTTPServerLog"), vec!["http", "server", "log"]);
    }

    #[test]
    fn expands_known_abbreviations() {
        assert_eq!(expand_abbreviation("cust"), Some("customer"));
        assert_eq!(expand_abbreviation("fk"), Some("foreign key"));
        assert_eq!(expand_abbreviation("addr"), Some("address"));
        assert_eq!(expand_abbreviation("zebra"), None);
    }

    #[test]
    fn type_labels_cover_common_types() {
        assert_eq!(type_labels("TIMESTAMP WITH TIME ZONE"), vec!["date", "temporal"]);
        assert_eq!(type_labels("uuid"), vec!["identifier"]);
        assert_eq!(type_labels("DECIMAL(10,2)"), vec!["numeric"]);
        assert_eq!(type_labels("BOOLEAN"), vec!["flag", "boolean"]);
        assert_eq!(type_labels("JSONB"), vec!["json", "structured"]);
    }

    #[test]
    fn detects_value_patterns() {
        let samples = vec![
            "ada@example.com".to_string(),
            "https://example.com/a".to_string(),
            "2024-03-01".to_string(),
            "550e8400-e29b-41d4-a716-446655440000".to_string(),
        ];
        let patterns = value_patterns(&samples);
        assert!(patterns.contains(&"email"));
        assert!(patterns.contains(&"url"));
        assert!(patterns.contains(&"date"));
        assert!(patterns.contains(&"uuid"));
    }

    #[test]
    fn keywords_combine_sources_and_filter_short() {
        let samples = vec!["a@b.co".to_string()];
        let input = KeywordInput {
            identifiers: vec!["cust_email_addr"],
            data_type: Some("VARCHAR(255)"),
            sample_values: &samples,
            description: "Primary contact email for the customer account.",
            parent_terms: vec!["customers"],
        };
        let keywords = extract_keywords(&input);
        assert!(keywords.contains(&"customer".to_string()));
        assert!(keywords.contains(&"email".to_string()));
        assert!(keywords.contains(&"address".to_string()));
        assert!(keywords.contains(&"text".to_string()));
        assert!(keywords.contains(&"customers".to_string()));
        assert!(keywords.iter().all(|k| k.len() > 2));
        // "id"-length tokens are filtered
        assert!(!keywords.iter().any(|k| k == "at"));
    }
}
