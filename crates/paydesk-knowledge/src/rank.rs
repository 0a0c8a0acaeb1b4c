// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deliberately simple, explainable ranking.
//!
//! A query that is a literal substring of a stored phrasing is a strong
//! match and short-circuits everything else. Otherwise entries are scored
//! by how many query tokens appear anywhere in the entry's combined text,
//! and the best candidate is accepted only above a confidence floor. The
//! floor exists because a low-confidence wrong answer is worse than
//! admitting no match and falling through to the generative backend.

use std::cmp::Ordering;

use crate::store::KnowledgeEntry;

/// Minimum query length (chars) for the substring strong match.
const STRONG_MIN_CHARS: usize = 4;

/// Minimum token length (chars) to count toward scoring.
const TOKEN_MIN_CHARS: usize = 2;

/// Weak acceptance floor: at least this many token hits...
const ACCEPT_MIN_HITS: usize = 2;

/// ...and at least this fraction of query tokens hitting.
const ACCEPT_MIN_RATIO: f64 = 0.4;

#[derive(Debug, Clone)]
struct Scored {
    index: usize,
    strong: bool,
    hits: usize,
    ratio: f64,
}

/// Ranks `entries` against `query` and returns up to `k` accepted results.
///
/// Empty result means no candidate cleared the acceptance threshold.
pub fn rank_entries(entries: &[KnowledgeEntry], query: &str, k: usize) -> Vec<KnowledgeEntry> {
    let query_norm = normalize(query);
    if query_norm.is_empty() || entries.is_empty() {
        return Vec::new();
    }

    // Strong pass: literal substring of a phrasing, original order preserved.
    if query_norm.chars().count() >= STRONG_MIN_CHARS {
        let strong: Vec<KnowledgeEntry> = entries
            .iter()
            .filter(|e| {
                e.questions
                    .iter()
                    .any(|q| normalize(q).contains(&query_norm))
            })
            .cloned()
            .collect();
        if !strong.is_empty() {
            return strong;
        }
    }

    // Token pass.
    let tokens = tokenize(&query_norm);
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<Scored> = entries
        .iter()
        .enumerate()
        .map(|(index, e)| {
            let combined = combined_text(e);
            let hits = tokens.iter().filter(|t| combined.contains(t.as_str())).count();
            Scored {
                index,
                strong: false,
                hits,
                ratio: hits as f64 / tokens.len() as f64,
            }
        })
        .filter(|s| s.hits > 0)
        .collect();

    scored.sort_by(|a, b| {
        b.strong
            .cmp(&a.strong)
            .then(b.hits.cmp(&a.hits))
            .then(b.ratio.partial_cmp(&a.ratio).unwrap_or(Ordering::Equal))
            .then(a.index.cmp(&b.index))
    });

    let accepted = scored
        .first()
        .is_some_and(|best| best.hits >= ACCEPT_MIN_HITS && best.ratio >= ACCEPT_MIN_RATIO);
    if !accepted {
        return Vec::new();
    }

    scored
        .into_iter()
        .take(k)
        .map(|s| entries[s.index].clone())
        .collect()
}

/// Best-scoring entry regardless of the acceptance floor.
///
/// Used to ground the generative fallback: an entry not confident enough
/// to answer with directly can still steer the model toward shop facts.
pub fn best_candidate(entries: &[KnowledgeEntry], query: &str) -> Option<KnowledgeEntry> {
    let query_norm = normalize(query);
    let tokens = tokenize(&query_norm);
    if tokens.is_empty() || entries.is_empty() {
        return None;
    }
    entries
        .iter()
        .map(|e| {
            let combined = combined_text(e);
            let hits = tokens.iter().filter(|t| combined.contains(t.as_str())).count();
            (hits, e)
        })
        .filter(|(hits, _)| *hits > 0)
        .max_by_key(|(hits, _)| *hits)
        .map(|(_, e)| e.clone())
}

/// Case-folds and collapses whitespace runs to single spaces.
fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_was_space = true;
    for c in lowered.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Splits on anything that is neither alphanumeric nor CJK, dropping tokens
/// shorter than [`TOKEN_MIN_CHARS`].
fn tokenize(normalized: &str) -> Vec<String> {
    normalized
        .split(|c: char| !c.is_alphanumeric() && !is_cjk(c))
        .filter(|t| t.chars().count() >= TOKEN_MIN_CHARS)
        .map(|t| t.to_string())
        .collect()
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'       // CJK unified
        | '\u{3400}'..='\u{4DBF}'     // extension A
        | '\u{F900}'..='\u{FAFF}'     // compatibility ideographs
        | '\u{3040}'..='\u{30FF}'     // kana
    )
}

fn combined_text(e: &KnowledgeEntry) -> String {
    let mut combined = String::new();
    for q in &e.questions {
        combined.push_str(&normalize(q));
        combined.push(' ');
    }
    combined.push_str(&normalize(&e.answer));
    for t in &e.tags {
        combined.push(' ');
        combined.push_str(&normalize(t));
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, questions: &[&str], answer: &str, tags: &[&str]) -> KnowledgeEntry {
        KnowledgeEntry {
            id: id.into(),
            questions: questions.iter().map(|s| s.to_string()).collect(),
            answer: answer.into(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            links: vec![],
        }
    }

    fn corpus() -> Vec<KnowledgeEntry> {
        vec![
            entry("ship", &["運費怎麼算", "運費多少"], "滿千免運，未滿收六十元", &["運費"]),
            entry("pickup", &["怎麼取貨", "取貨方式"], "超商取貨或門市自取", &[]),
            entry("hours", &["營業時間"], "每日十點到十八點", &["時間"]),
        ]
    }

    #[test]
    fn verbatim_phrasing_is_strong_match_first() {
        let results = rank_entries(&corpus(), "運費怎麼算", 3);
        assert!(!results.is_empty());
        assert_eq!(results[0].id, "ship");
    }

    #[test]
    fn strong_match_ignores_other_corpus_content() {
        // Substring of a phrasing, length >= 4, short-circuits token scoring.
        let results = rank_entries(&corpus(), "怎麼取貨", 3);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "pickup");
    }

    #[test]
    fn strong_ties_keep_original_order() {
        let entries = vec![
            entry("a", &["退貨流程說明"], "七天內可退", &[]),
            entry("b", &["退貨流程很簡單"], "聯絡客服", &[]),
        ];
        let results = rank_entries(&entries, "退貨流程", 3);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "b");
    }

    #[test]
    fn short_query_skips_strong_path() {
        // Three chars: no strong pass, and one token below the hit floor.
        let results = rank_entries(&corpus(), "運費?", 3);
        assert!(results.is_empty());
    }

    #[test]
    fn token_match_needs_two_hits_and_ratio() {
        let entries = vec![entry(
            "pay",
            &["how do i pay for my order"],
            "bank transfer or cash on pickup",
            &["payment"],
        )];
        // Two of three tokens hit, ratio 0.66: accepted.
        let results = rank_entries(&entries, "pay order now", 3);
        assert_eq!(results.len(), 1);
        // One of four tokens hits: rejected.
        let results = rank_entries(&entries, "cancel ticket refund pay", 3);
        assert!(results.is_empty());
    }

    #[test]
    fn best_candidate_ignores_acceptance_floor() {
        let entries = vec![entry(
            "pay",
            &["how do i pay for my order"],
            "bank transfer or cash on pickup",
            &["payment"],
        )];
        // One of four tokens hits: rejected by rank_entries, but still the
        // best grounding candidate.
        assert!(rank_entries(&entries, "cancel ticket refund pay", 3).is_empty());
        let best = best_candidate(&entries, "cancel ticket refund pay").unwrap();
        assert_eq!(best.id, "pay");
        assert!(best_candidate(&entries, "今天天氣如何").is_none());
    }

    #[test]
    fn unrelated_query_matches_nothing() {
        let results = rank_entries(&corpus(), "今天天氣如何呢", 3);
        assert!(results.is_empty());
    }

    #[test]
    fn normalize_folds_case_and_whitespace() {
        assert_eq!(normalize("  How   ARE\tyou "), "how are you");
    }

    #[test]
    fn tokenize_splits_mixed_script() {
        let tokens = tokenize(&normalize("運費 fee-123 多少?"));
        assert!(tokens.contains(&"運費".to_string()));
        assert!(tokens.contains(&"fee".to_string()));
        assert!(tokens.contains(&"123".to_string()));
        assert!(tokens.contains(&"多少".to_string()));
    }

    #[test]
    fn empty_query_or_corpus_is_empty() {
        assert!(rank_entries(&corpus(), "   ", 3).is_empty());
        assert!(rank_entries(&[], "運費怎麼算", 3).is_empty());
    }
}
