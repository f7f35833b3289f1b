//! Small shared helpers: cached literal matchers, text normalisation for
//! Portuguese input and rounding.

use ahash::AHasher;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

static AC_CACHE: Lazy<DashMap<u64, Arc<AhoCorasick>>> = Lazy::new(DashMap::new);

/// Shared case-insensitive matcher for a literal list, memoised by a hash of
/// the list. Leftmost-longest so "nova nota" wins over "nota".
pub fn ac_for(list: &[String]) -> Arc<AhoCorasick> {
    let mut hasher = AHasher::default();
    for pat in list {
        pat.hash(&mut hasher);
    }
    let key = hasher.finish();
    if let Some(existing) = AC_CACHE.get(&key) {
        return existing.clone();
    }
    let lower: Vec<String> = list.iter().map(|p| p.to_lowercase()).collect();
    let ac = AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .match_kind(MatchKind::LeftmostLongest)
        .build(lower)
        .unwrap();
    let arc = Arc::new(ac);
    AC_CACHE.insert(key, arc.clone());
    arc
}

/// True when any of `list` occurs in `haystack` as a whole word.
pub fn contains_word(list: &[String], haystack: &str) -> bool {
    let ac = ac_for(list);
    ac.find_iter(haystack).any(|m| {
        let before = haystack[..m.start()].chars().next_back();
        let after = haystack[m.end()..].chars().next();
        !before.map_or(false, char::is_alphanumeric) && !after.map_or(false, char::is_alphanumeric)
    })
}

/// Lower-case and strip the diacritics used in Portuguese so that
/// "Matemática" and "matematica" compare equal.
pub fn fold_text(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Round half away from zero to two decimals.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
