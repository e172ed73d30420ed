use std::collections::BTreeSet;

use cerebro_core::domain::intent::{Entity, IntentType};

const TRANSACTIONAL_KEYWORDS: &[&str] = &[
    "create", "open", "book", "schedule", "cancel", "update", "delete", "remove", "send", "submit",
    "pay", "transfer", "buy", "order", "reset", "register", "file", "add", "close", "change",
];

const ANALYTICAL_KEYWORDS: &[&str] = &[
    "analyze", "analyse", "analysis", "compare", "comparison", "trend", "trends", "report",
    "forecast", "breakdown", "statistics", "stats", "summarize", "evaluate", "why", "correlate",
];

const INFORMATIONAL_KEYWORDS: &[&str] = &[
    "what", "who", "where", "when", "how", "which", "show", "tell", "explain", "list", "find",
    "check", "status", "lookup", "describe",
];

const CONVERSATIONAL_KEYWORDS: &[&str] =
    &["hello", "hi", "hey", "thanks", "thank", "bye", "goodbye", "morning", "evening", "cheers"];

const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "finance",
        &[
            "balance", "payment", "invoice", "account", "transfer", "pay", "refund", "price",
            "budget", "money", "bank", "charge", "bill",
        ],
    ),
    ("support", &["ticket", "issue", "bug", "error", "help", "problem", "broken", "support", "outage"]),
    (
        "scheduling",
        &["meeting", "schedule", "calendar", "appointment", "book", "tomorrow", "reschedule", "slot"],
    ),
    (
        "analytics",
        &["report", "trend", "trends", "metrics", "analyze", "compare", "forecast", "statistics", "dashboard"],
    ),
];

pub const GENERAL_DOMAIN: &str = "general";

/// Token segments too generic to identify a tool on their own.
const GENERIC_TOOL_SEGMENTS: &[&str] = &["tool", "tools", "service", "api"];

#[derive(Clone, Debug, PartialEq)]
pub struct MessageAnalysis {
    pub tokens: Vec<String>,
    pub intent_type: IntentType,
    /// Keyword hits backing `intent_type`; zero means no classifier signal at all.
    pub keyword_hits: usize,
    pub domain: String,
    pub entities: Vec<Entity>,
    pub matched_tools: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct MessageAnalyzer;

impl MessageAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, text: &str, available_tools: &[String]) -> MessageAnalysis {
        let tokens = tokenize(text);
        let (intent_type, keyword_hits) = classify_tokens(&tokens);
        let domain = classify_domain(&tokens);
        let matched_tools = matched_tools(available_tools, &tokens);
        let entities = extract_entities(text, &tokens, &matched_tools);

        MessageAnalysis { tokens, intent_type, keyword_hits, domain, entities, matched_tools }
    }
}

/// Lowercased word tokens; `$`, `%` and inner `.` survive so amounts stay intact.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut sanitized = String::with_capacity(text.len());
    for character in text.to_lowercase().chars() {
        if character.is_alphanumeric() || matches!(character, '$' | '%' | '.') {
            sanitized.push(character);
        } else {
            sanitized.push(' ');
        }
    }

    sanitized
        .split_whitespace()
        .map(|token| token.trim_matches('.'))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn classify_tokens(tokens: &[String]) -> (IntentType, usize) {
    let count = |keywords: &[&str]| {
        tokens.iter().filter(|token| keywords.contains(&token.as_str())).count()
    };

    // Ties resolve in table order.
    let scored = [
        (IntentType::Transactional, count(TRANSACTIONAL_KEYWORDS)),
        (IntentType::Analytical, count(ANALYTICAL_KEYWORDS)),
        (IntentType::Informational, count(INFORMATIONAL_KEYWORDS)),
        (IntentType::Conversational, count(CONVERSATIONAL_KEYWORDS)),
    ];

    scored
        .into_iter()
        .fold((IntentType::Conversational, 0), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        })
}

fn classify_domain(tokens: &[String]) -> String {
    let mut best = (GENERAL_DOMAIN, 0usize);
    for (domain, keywords) in DOMAIN_KEYWORDS {
        let hits = tokens.iter().filter(|token| keywords.contains(&token.as_str())).count();
        if hits > best.1 {
            best = (*domain, hits);
        }
    }
    best.0.to_string()
}

/// Name segments that identify a tool, e.g. `ticket` for `ticket-tool`.
pub fn tool_segments(tool_name: &str) -> Vec<String> {
    tool_name
        .to_lowercase()
        .split(|character: char| matches!(character, '-' | '_' | '.'))
        .filter(|segment| !segment.is_empty() && !GENERIC_TOOL_SEGMENTS.contains(segment))
        .map(str::to_string)
        .collect()
}

pub fn tool_matches(tool_name: &str, tokens: &[String]) -> bool {
    tool_segments(tool_name).iter().any(|segment| tokens.iter().any(|token| token == segment))
}

/// Tools mentioned by the message, deduplicated, in catalog order.
pub fn matched_tools(available_tools: &[String], tokens: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    available_tools
        .iter()
        .filter(|tool| tool_matches(tool, tokens))
        .filter(|tool| seen.insert((*tool).clone()))
        .cloned()
        .collect()
}

fn extract_entities(text: &str, tokens: &[String], matched_tools: &[String]) -> Vec<Entity> {
    let mut found: Vec<(&'static str, String, f64)> = Vec::new();

    for token in tokens {
        if token.starts_with('$') {
            if let Some(amount) = parse_money_token(token) {
                found.push(("money", format!("{amount:.2}"), 0.9));
            }
        } else if let Some(raw) = token.strip_suffix('%') {
            if let Ok(percent) = raw.parse::<f64>() {
                found.push(("percent", format!("{percent}"), 0.9));
            }
        } else if token.parse::<f64>().is_ok() {
            found.push(("number", token.clone(), 0.8));
        }
    }

    for phrase in quoted_phrases(text) {
        found.push(("quoted", phrase, 0.7));
    }

    for tool in matched_tools {
        found.push(("capability", tool.clone(), 0.6));
    }

    found
        .into_iter()
        .enumerate()
        .map(|(index, (entity_type, value, confidence))| Entity {
            id: format!("ent_{}", index + 1),
            entity_type: entity_type.to_string(),
            value,
            confidence,
        })
        .collect()
}

fn parse_money_token(token: &str) -> Option<f64> {
    let trimmed = token.trim_start_matches('$');
    if trimmed.is_empty() {
        return None;
    }

    let (number_part, multiplier) = if let Some(prefix) = trimmed.strip_suffix('k') {
        (prefix, 1_000.0)
    } else if let Some(prefix) = trimmed.strip_suffix('m') {
        (prefix, 1_000_000.0)
    } else {
        (trimmed, 1.0)
    };

    number_part.parse::<f64>().ok().map(|amount| amount * multiplier)
}

fn quoted_phrases(text: &str) -> Vec<String> {
    text.split('"')
        .enumerate()
        .filter(|(index, _)| index % 2 == 1)
        .map(|(_, phrase)| phrase.trim().to_string())
        .filter(|phrase| !phrase.is_empty())
        .collect()
}
