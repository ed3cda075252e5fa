//! Keyword topic classification with polite redirects for off-topic requests.
//!
//! Messages are tokenised into `\w+` words. Entries in the keyword lists that contain spaces or
//! hyphens ("cover letter", "self-harm") can therefore never match a single word; they are kept
//! so the lists read as the topics they describe.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{GuardrailResult, Severity};

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("Invalid word pattern"));

const CAREER_KEYWORDS: &[&str] = &[
    // Job search
    "job", "jobs", "career", "careers", "work", "working", "employment", "employed", "unemployed", "hiring", "hired",
    "hire", "apply", "application", "applying", "position", "role", "opportunity", "opportunities",
    // Resume
    "resume", "cv", "cover letter", "portfolio", "linkedin", "profile",
    // Interview
    "interview", "interviewing", "interviews", "meeting", "call",
    // Skills
    "skill", "skills", "experience", "qualification", "qualifications", "education", "training", "certification",
    "certificate", "degree",
    // Workplace
    "workplace", "office", "coworker", "coworkers", "manager", "boss", "employer", "company", "companies",
    "organization", "business",
    // Compensation
    "salary", "pay", "wage", "wages", "compensation", "benefits", "insurance", "401k", "pto", "vacation",
    // Development
    "promotion", "raise", "growth", "advancement", "development", "networking", "network", "mentor", "mentoring",
    // Recovery and background
    "recovery", "background", "gap", "explanation", "second chance", "fair chance", "background check", "record",
    "conviction",
    // Platform
    "employa", "dave", "match", "matching", "score",
];

/// Off-topic categories, checked in order.
const OFF_TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "medical",
        &[
            "doctor", "hospital", "medicine", "prescription", "symptoms", "diagnosis", "medical", "health condition",
            "treatment plan",
        ],
    ),
    (
        "therapy",
        &[
            "therapist", "counselor", "depression", "anxiety", "trauma", "mental health", "suicidal", "self-harm",
        ],
    ),
    (
        "legal",
        &["lawyer", "attorney", "lawsuit", "sue", "court", "legal advice", "custody", "divorce"],
    ),
    (
        "coding",
        &["python", "javascript", "code", "programming", "debug", "function", "api", "database", "algorithm"],
    ),
];

const MEDICAL_REDIRECT: &str = "I appreciate you sharing that with me. While I care about your wellbeing, I'm best equipped to help with career-related questions. For health concerns, please reach out to a healthcare professional. Now, is there anything I can help you with regarding your job search?";
const THERAPY_REDIRECT: &str = "Thank you for trusting me with that. I want to be honest - I'm a career coach, not a counselor. For personal challenges, please consider speaking with a mental health professional or your support network. In the meantime, how can I support your career goals?";
const LEGAL_REDIRECT: &str = "That sounds like a legal matter that's beyond my expertise. I'd recommend consulting with a lawyer or legal aid organization. What I can help with is navigating the job search process. Is there anything career-related I can assist with?";
const CODING_REDIRECT: &str = "While I'd love to help with coding, my specialty is career coaching and job search support. For programming questions, sites like Stack Overflow are great resources. But if you're looking for tech jobs or want to discuss your career in tech, I'm all ears!";
const GENERAL_REDIRECT: &str = "That's an interesting topic! I'm most helpful with career and job search questions though. Is there anything about your employment journey I can help with today?";

/// Messages shorter than this (after trimming) are treated as greetings.
const GREETING_MAX_LEN: usize = 20;

/// Redirect text for an off-topic category; unknown categories get the general redirect.
pub fn redirect_message(topic: &str) -> &'static str {
    match topic {
        "medical" => MEDICAL_REDIRECT,
        "therapy" => THERAPY_REDIRECT,
        "legal" => LEGAL_REDIRECT,
        "coding" => CODING_REDIRECT,
        _ => GENERAL_REDIRECT,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TopicClassifier;

impl TopicClassifier {
    pub fn check(&self, message: &str) -> GuardrailResult {
        let lowered = message.to_lowercase();
        let words: HashSet<&str> = WORD.find_iter(&lowered).map(|m| m.as_str()).collect();

        if CAREER_KEYWORDS.iter().any(|k| words.contains(k)) {
            return GuardrailResult::allow_with_topic("career");
        }

        for (category, keywords) in OFF_TOPIC_KEYWORDS {
            if keywords.iter().any(|k| words.contains(k)) {
                return GuardrailResult {
                    detected_topic: Some(category.to_string()),
                    ..GuardrailResult::block("off_topic", redirect_message(category), Severity::Low)
                };
            }
        }

        if message.trim().chars().count() < GREETING_MAX_LEN {
            return GuardrailResult::allow_with_topic("greeting");
        }

        // Longer messages without career keywords are still answered
        GuardrailResult::allow_with_topic("general")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_career_keywords_win_over_off_topic() {
        let result = TopicClassifier.check("Can a lawyer help with my job application?");
        assert!(!result.blocked);
        assert_eq!(result.detected_topic.as_deref(), Some("career"));
    }

    #[test]
    fn test_off_topic_categories() {
        let cases = [
            ("My doctor says I need rest", "medical"),
            ("I've been dealing with anxiety lately", "therapy"),
            ("Should I sue my landlord over this?", "legal"),
            ("How do I write a python script for that?", "coding"),
        ];

        for (message, topic) in cases {
            let result = TopicClassifier.check(message);
            assert!(result.blocked, "{message}");
            assert_eq!(result.reason.as_deref(), Some("off_topic"));
            assert_eq!(result.detected_topic.as_deref(), Some(topic));
            assert_eq!(result.message.as_deref(), Some(redirect_message(topic)));
        }
    }

    #[test]
    fn test_multi_word_keywords_never_match() {
        let result = TopicClassifier.check("talk about mental health and self-harm");
        assert!(!result.blocked);
        assert_eq!(result.detected_topic.as_deref(), Some("general"));
    }

    #[test]
    fn test_greeting_and_general() {
        assert_eq!(TopicClassifier.check("  hi there  ").detected_topic.as_deref(), Some("greeting"));
        assert_eq!(
            TopicClassifier.check("Tell me something interesting about the ocean").detected_topic.as_deref(),
            Some("general")
        );
    }

    #[test]
    fn test_unknown_redirect_is_general() {
        assert_eq!(redirect_message("astronomy"), GENERAL_REDIRECT);
    }
}
