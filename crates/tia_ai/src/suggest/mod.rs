//! Follow-up question suggestions for partially typed input, cached per input and
//! language for a few minutes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tia_core::domain::Locale;
use tracing::{debug, warn};

use crate::llm::ModelBackend;
use crate::prompts;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuggestConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Once the cache grows past this, only the newest `retain_entries` survive.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_retain_entries")]
    pub retain_entries: usize,
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
    /// Suggestions this long or longer are discarded.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_min_input_chars")]
    pub min_input_chars: usize,
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_max_entries() -> usize {
    100
}

fn default_retain_entries() -> usize {
    50
}

fn default_max_suggestions() -> usize {
    3
}

fn default_max_chars() -> usize {
    150
}

fn default_min_input_chars() -> usize {
    2
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            retain_entries: default_retain_entries(),
            max_suggestions: default_max_suggestions(),
            max_chars: default_max_chars(),
            min_input_chars: default_min_input_chars(),
        }
    }
}

struct CachedSuggestions {
    suggestions: Vec<String>,
    stored_at: Instant,
}

pub struct SuggestionEngine {
    backend: Arc<dyn ModelBackend>,
    config: SuggestConfig,
    cache: Mutex<HashMap<String, CachedSuggestions>>,
}

fn cache_key(input: &str, locale: Locale) -> String {
    format!("{}_{}", input.trim().to_lowercase(), locale.as_str())
}

/// Drops a leading `1.` style number, then a leading `-` bullet.
fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let after_digits = line.trim_start_matches(|c: char| c.is_ascii_digit());
    let line = if after_digits.len() < line.len() {
        match after_digits.strip_prefix('.') {
            Some(rest) => rest.trim_start(),
            None => line,
        }
    } else {
        line
    };
    match line.strip_prefix('-') {
        Some(rest) => rest.trim(),
        None => line.trim(),
    }
}

/// One suggestion per non-empty reply line, markers removed.
pub fn parse_suggestions(reply: &str, max_suggestions: usize, max_chars: usize) -> Vec<String> {
    reply
        .lines()
        .map(strip_list_marker)
        .filter(|line| {
            let len = line.chars().count();
            len > 0 && len < max_chars
        })
        .take(max_suggestions)
        .map(str::to_string)
        .collect()
}

/// Keeps suggestions mentioning an input word, unless fewer than two do.
pub fn prefer_relevant(input: &str, suggestions: Vec<String>) -> Vec<String> {
    let words: Vec<String> = input
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 1)
        .collect();
    let relevant: Vec<String> = suggestions
        .iter()
        .filter(|s| {
            let lower = s.to_lowercase();
            words.iter().any(|w| lower.contains(w.as_str()))
        })
        .cloned()
        .collect();
    if relevant.len() < 2 {
        suggestions
    } else {
        relevant
    }
}

impl SuggestionEngine {
    pub fn new(backend: Arc<dyn ModelBackend>, config: SuggestConfig) -> Self {
        Self {
            backend,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedSuggestions>> {
        match self.cache.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Never fails: short input, backend errors and unusable replies all give no suggestions.
    pub fn suggest(&self, input: &str, locale: Locale) -> Vec<String> {
        let input = input.trim();
        if input.chars().count() < self.config.min_input_chars {
            return Vec::new();
        }

        let key = cache_key(input, locale);
        if let Some(hit) = self.cached(&key) {
            debug!(key = %key, "suggestion cache hit");
            return hit;
        }

        let reply = match self.backend.complete(&prompts::suggestions(input, locale)) {
            Ok(c) => c.text,
            Err(e) => {
                warn!(code = %e.code, details = ?e.details, "suggestions unavailable");
                return Vec::new();
            }
        };
        let parsed = parse_suggestions(&reply, self.config.max_suggestions, self.config.max_chars);
        let mut chosen = prefer_relevant(input, parsed);
        chosen.truncate(self.config.max_suggestions);

        self.store(key, chosen.clone());
        chosen
    }

    pub fn cached_entries(&self) -> usize {
        self.lock().len()
    }

    fn cached(&self, key: &str) -> Option<Vec<String>> {
        let ttl = Duration::from_secs(self.config.ttl_secs);
        let mut cache = self.lock();
        let fresh = cache.get(key).map(|c| c.stored_at.elapsed() < ttl)?;
        if fresh {
            cache.get(key).map(|c| c.suggestions.clone())
        } else {
            cache.remove(key);
            None
        }
    }

    fn store(&self, key: String, suggestions: Vec<String>) {
        let mut cache = self.lock();
        cache.insert(
            key,
            CachedSuggestions {
                suggestions,
                stored_at: Instant::now(),
            },
        );
        if cache.len() > self.config.max_entries {
            let mut entries: Vec<(String, CachedSuggestions)> = cache.drain().collect();
            entries.sort_by(|a, b| b.1.stored_at.cmp(&a.1.stored_at));
            entries.truncate(self.config.retain_entries);
            cache.extend(entries);
            debug!(kept = cache.len(), "suggestion cache trimmed");
        }
    }
}
