//! Prompt injection detection.
//!
//! Matches a fixed list of case-insensitive patterns covering instruction overrides, role-play
//! requests, system prompt extraction, known jailbreak modes, fake system markup and attempts to
//! escape restrictions. Messages dominated by punctuation and symbols are rejected separately as
//! possible encoding attacks.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{GuardrailResult, Severity};

const INJECTION_MESSAGE: &str = "I'm Dave, your career coach at Employa. I'm here to help with your job search and career questions. What can I help you with today?";
const SUSPICIOUS_MESSAGE: &str =
    "I had trouble understanding that message. Could you rephrase your question about career or job search?";

/// Share of non-alphanumeric, non-whitespace characters above which a message is rejected.
const SPECIAL_CHAR_RATIO_LIMIT: f64 = 0.3;

/// A detection pattern.
///
/// Role-play patterns allow a benign continuation ("you are now Dave"): `regex` matches up to
/// the whitespace that follows the trigger phrase and `allowed_continuation` describes what may
/// come right after a single separating space.
struct InjectionPattern {
    name: &'static str,
    regex: Regex,
    allowed_continuation: Option<Regex>,
}

impl InjectionPattern {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            regex: Regex::new(&format!("(?i){pattern}")).expect("Invalid injection pattern"),
            allowed_continuation: None,
        }
    }

    fn with_exception(name: &'static str, pattern: &str, allowed: &str) -> Self {
        Self {
            name,
            regex: Regex::new(&format!("(?i){pattern}")).expect("Invalid injection pattern"),
            allowed_continuation: Some(Regex::new(&format!("(?i)^(?:{allowed})")).expect("Invalid injection pattern")),
        }
    }

    fn matches(&self, message: &str) -> bool {
        let Some(allowed) = &self.allowed_continuation else {
            return self.regex.is_match(message);
        };

        self.regex.find_iter(message).any(|m| {
            let rest = &message[m.end()..];
            let mut chars = rest.char_indices().skip_while(|(_, c)| c.is_whitespace());
            let whitespace_len = chars.next().map(|(i, _)| i).unwrap_or(rest.len());
            let separators = rest[..whitespace_len].chars().count();

            match separators {
                // The trigger phrase must be followed by whitespace
                0 => false,
                // With one separator, the next word decides
                1 => !allowed.is_match(&rest[whitespace_len..]),
                // A second whitespace character can never start an allowed continuation
                _ => true,
            }
        })
    }
}

static PATTERNS: Lazy<Vec<InjectionPattern>> = Lazy::new(|| {
    vec![
        // Override attempts
        InjectionPattern::new(
            "ignore_instructions",
            r"ignore\s+(?:your\s+)?(?:previous|above|all|prior)?\s*(instructions?|prompts?|rules?|guidelines?)",
        ),
        InjectionPattern::new(
            "disregard_prompt",
            r"disregard\s+(the\s+)?(system|previous|above)\s+(prompt|instructions?|rules?)",
        ),
        InjectionPattern::new("forget_everything", r"forget\s+(everything|all|what)\s+(you|i)\s+(told|said|know)"),
        InjectionPattern::new("override_rules", r"override\s+(your|the)\s+(rules?|instructions?|restrictions?)"),
        InjectionPattern::new("bypass_restrictions", r"bypass\s+(your|the|all)\s+(restrictions?|limits?|guardrails?)"),
        // Role-play
        InjectionPattern::with_exception("you_are_now", r"you\s+are\s+now", r"dave|employa"),
        InjectionPattern::with_exception("pretend", r"pretend\s+(?:you\s+are|to\s+be)", r"a\s+career"),
        InjectionPattern::with_exception("act_as", r"act\s+as\s+(?:if\s+you\s+are|a)", r"career|job"),
        InjectionPattern::new("roleplay_as", r"roleplay\s+as"),
        InjectionPattern::new("simulate_being", r"simulate\s+being"),
        // System prompt extraction
        InjectionPattern::new(
            "show_prompt",
            r"(what|show|reveal|display|print)\s+(?:me\s+)?(is|are)?\s*your\s+(system\s+)?prompt",
        ),
        InjectionPattern::new(
            "show_instructions",
            r"(what|show|reveal)\s+(?:me\s+)?(are\s+)?your\s+(initial\s+)?instructions",
        ),
        InjectionPattern::new("repeat_prompt", r"repeat\s+(your|the)\s+(system\s+)?prompt"),
        InjectionPattern::new("output_prompt", r"output\s+(your|the)\s+(hidden|system)\s+(prompt|instructions)"),
        // Jailbreaks
        InjectionPattern::new("named_mode", r"(DAN|STAN|DUDE|OMEGA)\s*mode"),
        InjectionPattern::new("developer_mode", r"developer\s+mode"),
        InjectionPattern::new("jailbreak", r"jailbreak"),
        InjectionPattern::new("do_anything_now", r"do\s+anything\s+now"),
        // Format manipulation
        InjectionPattern::new("new_instructions", r"new\s+instructions?:"),
        InjectionPattern::new("system_tag", r"<\s*/?system\s*>"),
        InjectionPattern::new("system_bracket", r"\[system\]"),
        InjectionPattern::new("system_heading", r"###\s*system"),
        // Boundary escape
        InjectionPattern::new(
            "escape_restrictions",
            r"(exit|leave|escape)\s+(your\s+)?(restrictions?|boundaries|limits)",
        ),
        InjectionPattern::new("break_free", r"break\s+(free|out)\s+of"),
    ]
});

/// Stateless detector over the built-in pattern list.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptInjectionDetector;

impl PromptInjectionDetector {
    pub fn check(&self, message: &str) -> GuardrailResult {
        if let Some(pattern) = PATTERNS.iter().find(|p| p.matches(message)) {
            tracing::debug!(pattern = pattern.name, "Injection pattern matched");
            return GuardrailResult::block("prompt_injection", INJECTION_MESSAGE, Severity::High);
        }

        if special_char_ratio(message) > SPECIAL_CHAR_RATIO_LIMIT {
            return GuardrailResult::block("suspicious_content", SUSPICIOUS_MESSAGE, Severity::Medium);
        }

        GuardrailResult::allow()
    }
}

fn special_char_ratio(message: &str) -> f64 {
    let total = message.chars().count().max(1);
    let special = message.chars().filter(|c| !c.is_alphanumeric() && !c.is_whitespace()).count();
    special as f64 / total as f64
}
