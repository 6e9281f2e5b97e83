// Model name routing: custom overrides, family groups, static aliases.
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

pub const MODEL_GEMINI_3_PRO: &str = "gemini-3-pro";
pub const MODEL_GEMINI_3_FLASH: &str = "gemini-3-flash";
pub const MODEL_GEMINI_25_PRO: &str = "gemini-2.5-pro";
pub const MODEL_GEMINI_25_FLASH: &str = "gemini-2.5-flash";
pub const MODEL_GEMINI_3_PRO_IMAGE: &str = "gemini-3-pro-image";

pub const MODEL_CLAUDE_SONNET_45: &str = "claude-sonnet-4-5";
pub const MODEL_CLAUDE_SONNET_45_THINKING: &str = "claude-sonnet-4-5-thinking";
pub const MODEL_CLAUDE_OPUS_45_THINKING: &str = "claude-opus-4-5-thinking";
pub const MODEL_CLAUDE_HAIKU_45: &str = "claude-haiku-4-5";

// Family-group keys recognized in the custom/anthropic override maps.
pub const FAMILY_GPT_4: &str = "gpt-4-series";
pub const FAMILY_GPT_4O: &str = "gpt-4o-series";
pub const FAMILY_GPT_5: &str = "gpt-5-series";
pub const FAMILY_CLAUDE_45: &str = "claude-4.5-series";
pub const FAMILY_CLAUDE_35: &str = "claude-3.5-series";
pub const FAMILY_CLAUDE_DEFAULT: &str = "claude-default";

pub const IMAGE_RESOLUTIONS: &[&str] = &["", "-2k", "-4k"];
pub const IMAGE_RATIOS: &[&str] = &["", "-1x1", "-4x3", "-3x4", "-16x9", "-9x16", "-21x9"];

pub fn is_claude_model(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    lower.starts_with("claude-") || lower == "claude"
}

pub fn is_gemini_model(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    lower.starts_with("gemini-") || lower == "gemini"
}

pub fn is_openai_model(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    lower.starts_with("gpt-")
        || lower == "gpt"
        || lower.starts_with("o1")
        || lower.starts_with("o3")
}

pub fn is_image_generation_model(model: &str) -> bool {
    model
        .to_ascii_lowercase()
        .starts_with(MODEL_GEMINI_3_PRO_IMAGE)
}

static CLAUDE_TO_GEMINI: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    // --- Claude family ---
    m.insert("claude", MODEL_CLAUDE_SONNET_45);
    m.insert(MODEL_CLAUDE_SONNET_45, MODEL_CLAUDE_SONNET_45_THINKING);
    m.insert("claude-sonnet-4-5-20250929", MODEL_CLAUDE_SONNET_45_THINKING);
    m.insert(MODEL_CLAUDE_SONNET_45_THINKING, MODEL_CLAUDE_SONNET_45_THINKING);
    m.insert("claude-opus-4-5", MODEL_CLAUDE_OPUS_45_THINKING);
    m.insert("claude-opus-4-5-20251101", MODEL_CLAUDE_OPUS_45_THINKING);
    m.insert(MODEL_CLAUDE_OPUS_45_THINKING, MODEL_CLAUDE_OPUS_45_THINKING);
    m.insert(MODEL_CLAUDE_HAIKU_45, MODEL_CLAUDE_HAIKU_45);
    m.insert("claude-haiku-4-5-20251001", MODEL_CLAUDE_HAIKU_45);
    m.insert("claude-3-5-sonnet-latest", MODEL_CLAUDE_SONNET_45);
    m.insert("claude-3-5-sonnet-20241022", MODEL_CLAUDE_SONNET_45);
    m.insert("claude-3-5-haiku-20241022", MODEL_CLAUDE_HAIKU_45);

    // --- OpenAI family ---
    m.insert("gpt-4", MODEL_GEMINI_3_PRO);
    m.insert("gpt-4-turbo", MODEL_GEMINI_25_FLASH);
    m.insert("gpt-4o", MODEL_GEMINI_25_FLASH);
    m.insert("gpt-4o-mini", MODEL_GEMINI_25_FLASH);
    m.insert("gpt-3.5-turbo", MODEL_GEMINI_25_FLASH);
    m.insert("gpt-5", MODEL_GEMINI_3_PRO);
    m.insert("gpt-5-mini", MODEL_GEMINI_25_FLASH);
    m.insert("o1", MODEL_GEMINI_3_PRO);
    m.insert("o1-preview", MODEL_GEMINI_3_PRO);
    m.insert("o1-mini", MODEL_GEMINI_25_FLASH);
    m.insert("o3", MODEL_GEMINI_3_PRO);
    m.insert("o3-mini", MODEL_GEMINI_25_FLASH);

    // --- Gemini aliases ---
    m.insert("gemini", MODEL_GEMINI_25_FLASH);
    m.insert("gemini-pro", MODEL_GEMINI_3_PRO);
    m.insert("gemini-pro-latest", MODEL_GEMINI_3_PRO);
    m.insert("gemini-flash", MODEL_GEMINI_3_FLASH);
    m.insert("gemini-flash-latest", MODEL_GEMINI_25_FLASH);
    m.insert("gemini-3-pro-image-preview", MODEL_GEMINI_3_PRO_IMAGE);

    m
});

fn strip_models_prefix(model: &str) -> &str {
    model.strip_prefix("models/").unwrap_or(model)
}

// GPT-4 classic line (plus o1/o3 reasoning ids), excluding the 4o / mini /
// turbo / 3.5 blends which route with the lighter group.
fn openai_family_group(lower: &str) -> Option<&'static str> {
    let blended = lower.contains("4o")
        || lower.contains("mini")
        || lower.contains("turbo")
        || lower.contains("3.5");
    if lower.starts_with("gpt-5") {
        return Some(FAMILY_GPT_5);
    }
    if blended {
        return Some(FAMILY_GPT_4O);
    }
    if lower.starts_with("gpt-4") || lower.starts_with("o1") || lower.starts_with("o3") {
        return Some(FAMILY_GPT_4);
    }
    None
}

fn claude_family_group(lower: &str) -> &'static str {
    if lower.contains("4-5") || lower.contains("4.5") {
        FAMILY_CLAUDE_45
    } else if lower.contains("3-5") || lower.contains("3.5") {
        FAMILY_CLAUDE_35
    } else {
        FAMILY_CLAUDE_DEFAULT
    }
}

fn compile_wildcard(pattern: &str) -> Option<Regex> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push_str("(?i)^");
    for (i, part) in pattern.split('*').enumerate() {
        if i > 0 {
            regex.push_str(".*");
        }
        regex.push_str(&regex::escape(part));
    }
    regex.push('$');
    Regex::new(&regex).ok()
}

// Wildcard keys are evaluated before exact keys. When several wildcard
// patterns match, the one carrying the most literal characters wins: it is
// the narrower rule, and the map's iteration order must never decide a
// route.
fn wildcard_lookup(model: &str, mapping: &HashMap<String, String>) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for (pattern, target) in mapping {
        if !pattern.contains('*') {
            continue;
        }
        let Some(re) = compile_wildcard(pattern) else {
            continue;
        };
        if re.is_match(model) {
            let literal_chars = pattern.chars().filter(|c| *c != '*').count();
            if best.map_or(true, |(_, prev)| literal_chars > prev) {
                best = Some((target.as_str(), literal_chars));
            }
        }
    }
    best.map(|(target, _)| target.to_string())
}

// Routing priority: custom (wildcard, then exact) > family group (custom
// map first, then the anthropic map) > static alias table > identity.
pub fn resolve_model_route(
    original_model: &str,
    custom_mapping: &HashMap<String, String>,
    anthropic_mapping: &HashMap<String, String>,
) -> String {
    let model = strip_models_prefix(original_model);

    if let Some(target) = wildcard_lookup(model, custom_mapping) {
        tracing::debug!("[Router] Wildcard mapping: {} -> {}", model, target);
        return target;
    }
    if let Some(target) = custom_mapping.get(model) {
        tracing::debug!("[Router] Exact mapping: {} -> {}", model, target);
        return target.clone();
    }

    let lower = model.to_ascii_lowercase();
    let family = if is_claude_model(&lower) {
        Some(claude_family_group(&lower))
    } else if is_openai_model(&lower) {
        openai_family_group(&lower)
    } else {
        None
    };
    if let Some(family_key) = family {
        let family_target = custom_mapping
            .get(family_key)
            .or_else(|| anthropic_mapping.get(family_key))
            .or_else(|| {
                // GPT-5 routes borrow the GPT-4 rule when no dedicated
                // override exists.
                if family_key == FAMILY_GPT_5 {
                    custom_mapping
                        .get(FAMILY_GPT_4)
                        .or_else(|| anthropic_mapping.get(FAMILY_GPT_4))
                } else {
                    None
                }
            });
        if let Some(target) = family_target {
            tracing::debug!(
                "[Router] Family mapping ({}): {} -> {}",
                family_key,
                model,
                target
            );
            return target.clone();
        }
    }

    if let Some(target) = CLAUDE_TO_GEMINI.get(lower.as_str()) {
        tracing::debug!("[Router] Static mapping: {} -> {}", model, target);
        return target.to_string();
    }

    model.to_string()
}

// Every model id the gateway is willing to advertise: static aliases,
// custom override keys, and the generated image-variant grid.
pub fn all_dynamic_models(custom_mapping: &HashMap<String, String>) -> Vec<String> {
    let mut ids: std::collections::HashSet<String> =
        CLAUDE_TO_GEMINI.keys().map(|k| k.to_string()).collect();

    for key in custom_mapping.keys() {
        if !key.contains('*') {
            ids.insert(key.clone());
        }
    }

    for res in IMAGE_RESOLUTIONS {
        for ratio in IMAGE_RATIOS {
            ids.insert(format!("{}{}{}", MODEL_GEMINI_3_PRO_IMAGE, res, ratio));
        }
    }

    ids.insert(MODEL_GEMINI_3_PRO.to_string());
    ids.insert(MODEL_GEMINI_3_FLASH.to_string());
    ids.insert(MODEL_GEMINI_25_PRO.to_string());
    ids.insert(MODEL_GEMINI_25_FLASH.to_string());

    let mut sorted: Vec<String> = ids.into_iter().collect();
    sorted.sort();
    sorted
}
