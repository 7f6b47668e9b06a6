/// Deterministic keyword derivation for the hybrid retriever: lowercase,
/// split on non-alphanumerics, drop stopwords and single characters.
///
/// The raw query is always used as-is — no model-assisted expansion.
pub fn tokenize(query: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(t))
        .filter(|t| seen.insert(t.to_string()))
        .map(String::from)
        .collect()
}

/// Fraction of query terms present in `haystack` (already lowercased),
/// weighted by rule severity so a matching critical event outranks a
/// matching informational one.
pub fn keyword_score(terms: &[String], haystack: &str, rule_level: i64) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    if matched == 0 {
        return 0.0;
    }
    let coverage = matched as f32 / terms.len() as f32;
    let severity_weight = 0.6 + 0.4 * (rule_level.clamp(0, 15) as f32 / 15.0);
    coverage * severity_weight
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "any", "are", "as", "at", "be", "been", "but", "by",
    "can", "did", "do", "does", "for", "from", "had", "has", "have", "how",
    "if", "in", "into", "is", "it", "its", "me", "my", "no", "not", "of",
    "on", "or", "our", "show", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "to", "was", "we", "were",
    "what", "when", "where", "which", "who", "why", "will", "with", "you",
    "your",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_stopwords_and_duplicates() {
        let terms = tokenize("Is there any SQL injection in the SQL logs?");
        assert_eq!(terms, vec!["sql", "injection", "logs"]);
    }

    #[test]
    fn all_stopword_query_yields_no_terms() {
        assert!(tokenize("is there any of the").is_empty());
    }

    #[test]
    fn score_scales_with_coverage_and_severity() {
        let terms = tokenize("sql injection");
        let full = keyword_score(&terms, "sql injection attempt", 8);
        let half = keyword_score(&terms, "sql syntax error", 8);
        let low_sev = keyword_score(&terms, "sql injection attempt", 0);

        assert!(full > half);
        assert!(full > low_sev);
        // Full coverage at level 8: 1.0 * (0.6 + 0.4 * 8/15).
        assert!((full - (0.6 + 0.4 * 8.0 / 15.0)).abs() < 1e-6);
        assert_eq!(keyword_score(&terms, "nothing relevant", 15), 0.0);
    }
}
