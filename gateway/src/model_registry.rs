//! Model registry & alias resolver.
//!
//! Maps friendly names and smart aliases to a concrete `(provider, model)`
//! pair and validates model strings. Three operations, per the data model:
//! [`resolve_alias`] (name-level rewrite, idempotent), [`resolve_explicit`]
//! (name → concrete target), [`parse_suffix`] (splits a routing suffix off
//! a base model name).

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
    Google,
    Xai,
    Moonshot,
    Local,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::Google => "google",
            Provider::Xai => "xai",
            Provider::Moonshot => "moonshot",
            Provider::Local => "local",
        }
    }

    pub fn parse(s: &str) -> Option<Provider> {
        match s {
            "anthropic" => Some(Provider::Anthropic),
            "openai" => Some(Provider::OpenAi),
            "google" => Some(Provider::Google),
            "xai" => Some(Provider::Xai),
            "moonshot" => Some(Provider::Moonshot),
            "local" => Some(Provider::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingSuffix;

pub const SUFFIXES: [&str; 3] = ["cost", "fast", "quality"];

/// `relayplane:*` namespace aliases rewrite to the corresponding `rp:*` alias.
static NAMESPACE_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("relayplane:auto", "rp:balanced"),
        ("relayplane:cost", "rp:cheap"),
        ("relayplane:fast", "rp:fast"),
        ("relayplane:quality", "rp:best"),
    ])
});

/// `rp:*` synonyms that rewrite to the canonical smart-alias spelling.
static ALIAS_REWRITES: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| HashMap::from([("rp:auto", "rp:balanced")]));

/// Smart aliases — checked before the static table, per the design-notes
/// open-question resolution.
static SMART_ALIASES: Lazy<HashMap<&'static str, (Provider, &'static str)>> = Lazy::new(|| {
    HashMap::from([
        ("rp:best", (Provider::Anthropic, "claude-3-5-sonnet-20241022")),
        ("rp:balanced", (Provider::Anthropic, "claude-3-5-sonnet-20241022")),
        ("rp:fast", (Provider::Anthropic, "claude-3-5-haiku-20241022")),
        ("rp:cheap", (Provider::Anthropic, "claude-3-5-haiku-20241022")),
    ])
});

/// Static friendly-name shortcuts, checked after smart aliases.
static MODEL_MAPPING: Lazy<HashMap<&'static str, (Provider, &'static str)>> = Lazy::new(|| {
    HashMap::from([
        ("sonnet", (Provider::Anthropic, "claude-3-5-sonnet-20241022")),
        ("haiku", (Provider::Anthropic, "claude-3-5-haiku-20241022")),
        ("opus", (Provider::Anthropic, "claude-3-opus-20240229")),
        ("gpt4o", (Provider::OpenAi, "gpt-4o")),
        ("gpt4o-mini", (Provider::OpenAi, "gpt-4o-mini")),
    ])
});

/// Applies namespace then smart-alias rewrites; names with no match are
/// returned unchanged. Idempotent: `resolve_alias(resolve_alias(x)) ==
/// resolve_alias(x)`.
pub fn resolve_alias(name: &str) -> String {
    let step1 = NAMESPACE_ALIASES.get(name).copied().unwrap_or(name);
    let step2 = ALIAS_REWRITES.get(step1).copied().unwrap_or(step1);
    step2.to_string()
}

fn prefix_heuristic(name: &str) -> Option<Provider> {
    if name.starts_with("claude-") {
        return Some(Provider::Anthropic);
    }
    let openai_prefixes =
        ["gpt-", "o1-", "o3-", "chatgpt-", "text-", "dall-e", "whisper", "tts-"];
    if openai_prefixes.iter().any(|p| name.starts_with(p)) {
        return Some(Provider::OpenAi);
    }
    if name.starts_with("gemini-") || name.starts_with("palm-") {
        return Some(Provider::Google);
    }
    if name.starts_with("grok-") {
        return Some(Provider::Xai);
    }
    if name.starts_with("moonshot-") {
        return Some(Provider::Moonshot);
    }
    None
}

/// Resolves `name` (already passed through [`resolve_alias`] by the caller,
/// though this function re-applies it defensively) to a concrete
/// `(provider, model)` pair, or `None` if nothing matches.
pub fn resolve_explicit(name: &str) -> Option<(Provider, String)> {
    let name = resolve_alias(name);

    if let Some((p, m)) = SMART_ALIASES.get(name.as_str()) {
        return Some((*p, m.to_string()));
    }
    if let Some((p, m)) = MODEL_MAPPING.get(name.as_str()) {
        return Some((*p, m.to_string()));
    }
    if let Some(p) = prefix_heuristic(&name) {
        return Some((p, name));
    }
    if let Some((provider_str, model)) = name.split_once('/') {
        if let Some(p) = Provider::parse(provider_str) {
            return Some((p, model.to_string()));
        }
    }
    None
}

/// Splits a `<base>:cost|fast|quality` suffix off `name`. The `relayplane:*`
/// namespace form is never split — its colon belongs to the namespace, not a
/// routing suffix.
pub fn parse_suffix(name: &str) -> (String, Option<String>) {
    if name.starts_with("relayplane:") {
        return (name.to_string(), None);
    }
    if let Some((base, suffix)) = name.rsplit_once(':') {
        if SUFFIXES.contains(&suffix) {
            return (base.to_string(), Some(suffix.to_string()));
        }
    }
    (name.to_string(), None)
}

/// Every name the registry can resolve, used to build "did you mean"
/// suggestions for an unknown-model error.
pub fn known_names() -> Vec<String> {
    let mut names: Vec<String> = SMART_ALIASES.keys().map(|s| s.to_string()).collect();
    names.extend(MODEL_MAPPING.keys().map(|s| s.to_string()));
    names
}

fn lcs_len(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            dp[i][j] = if a[i - 1] == b[j - 1] { dp[i - 1][j - 1] + 1 } else { dp[i - 1][j].max(dp[i][j - 1]) };
        }
    }
    dp[a.len()][b.len()]
}

/// Ranks [`known_names`] by longest-common-subsequence similarity to `name`
/// and returns the top `limit` candidates.
pub fn suggest(name: &str, limit: usize) -> Vec<String> {
    let mut candidates: Vec<(String, usize)> =
        known_names().into_iter().map(|n| { let score = lcs_len(name, &n); (n, score) }).collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    candidates.into_iter().filter(|(_, score)| *score > 0).take(limit).map(|(n, _)| n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s4_resolve_model_alias_relayplane_auto() {
        assert_eq!(resolve_alias("relayplane:auto"), "rp:balanced");
    }

    #[test]
    fn s4_resolve_model_alias_rp_auto() {
        assert_eq!(resolve_alias("rp:auto"), "rp:balanced");
    }

    #[test]
    fn s4_unmatched_name_unchanged() {
        assert_eq!(resolve_alias("claude-sonnet-4"), "claude-sonnet-4");
    }

    #[test]
    fn s4_resolve_explicit_rp_fast_is_haiku() {
        let (provider, model) = resolve_explicit("rp:fast").unwrap();
        assert_eq!(provider.as_str(), "anthropic");
        assert!(model.contains("claude-3-5-haiku-20241022"));
    }

    #[test]
    fn idempotent_alias_resolution() {
        for name in ["relayplane:auto", "relayplane:fast", "rp:auto", "rp:best", "claude-sonnet-4", "gpt-4o"] {
            let once = resolve_alias(name);
            let twice = resolve_alias(&once);
            assert_eq!(once, twice, "not idempotent for {name}");
        }
    }

    #[test]
    fn prefix_heuristic_resolves_known_providers() {
        assert_eq!(resolve_explicit("claude-3-5-sonnet-20241022").unwrap().0.as_str(), "anthropic");
        assert_eq!(resolve_explicit("gpt-4o-mini").unwrap().0.as_str(), "openai");
        assert_eq!(resolve_explicit("gemini-1.5-pro").unwrap().0.as_str(), "google");
        assert_eq!(resolve_explicit("grok-beta").unwrap().0.as_str(), "xai");
        assert_eq!(resolve_explicit("moonshot-v1-8k").unwrap().0.as_str(), "moonshot");
    }

    #[test]
    fn provider_slash_model_form_resolves() {
        let (p, m) = resolve_explicit("openai/gpt-4o-mini").unwrap();
        assert_eq!(p.as_str(), "openai");
        assert_eq!(m, "gpt-4o-mini");
    }

    #[test]
    fn unknown_model_resolves_to_none() {
        assert!(resolve_explicit("totally-unknown-model-xyz").is_none());
    }

    #[test]
    fn parse_suffix_splits_known_suffix() {
        assert_eq!(parse_suffix("gpt-4o:fast"), ("gpt-4o".to_string(), Some("fast".to_string())));
    }

    #[test]
    fn parse_suffix_leaves_namespace_form_unsplit() {
        assert_eq!(parse_suffix("relayplane:quality"), ("relayplane:quality".to_string(), None));
    }

    #[test]
    fn parse_suffix_ignores_unknown_suffix() {
        assert_eq!(parse_suffix("provider/model:v2"), ("provider/model:v2".to_string(), None));
    }

    #[test]
    fn suggest_ranks_closest_match_first() {
        let suggestions = suggest("rp:bst", 3);
        assert!(suggestions.contains(&"rp:best".to_string()));
    }
}
