//! Rule-based scoring, categorization, and insight flagging (spec §4.7).
//! Pure functions over message text so they're independently testable
//! without a database or LLM in the loop.

const URGENCY_KEYWORDS: &[&str] = &["urgent", "asap", "critical", "emergency"];
const ACTION_KEYWORDS: &[&str] = &["please review", "need your", "action required"];
const MEETING_KEYWORDS: &[&str] = &["meet", "meeting", "call", "calendar", "schedule"];
const FINANCIAL_KEYWORDS: &[&str] = &["invoice", "payment", "$", "usd"];
const DEADLINE_KEYWORDS: &[&str] = &["deadline", "due", "by"];
const AUTOMATED_SENDER_MARKERS: &[&str] = &["noreply", "no-reply", "notifications@"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// Base 0.5, +0.3 urgency keyword, +0.2 action keyword, +0.2 starred. Clamped
/// to `[0,1]` (spec §4.7, scenario 1).
pub fn priority_score(subject: &str, body: &str, is_starred: bool) -> f32 {
    let combined = format!("{subject} {body}");
    let mut score = 0.5_f32;
    if contains_any(&combined, URGENCY_KEYWORDS) {
        score += 0.3;
    }
    if contains_any(&combined, ACTION_KEYWORDS) {
        score += 0.2;
    }
    if is_starred {
        score += 0.2;
    }
    score.clamp(0.0, 1.0)
}

/// First-match-wins category (spec §4.7, scenarios 2/3).
pub fn categorize(subject: &str, body: &str, from_address: &str, in_reply_to_present: bool) -> &'static str {
    let combined = format!("{subject} {body}");
    if contains_any(&combined, MEETING_KEYWORDS) {
        return "meetings";
    }
    if contains_any(&combined, FINANCIAL_KEYWORDS) {
        return "financial";
    }
    if contains_any(&body.to_lowercase(), &["unsubscribe"]) {
        return "newsletters";
    }
    if contains_any(from_address, AUTOMATED_SENDER_MARKERS) {
        return "notifications";
    }
    let trimmed = subject.trim_start();
    if trimmed.starts_with("Re:") || trimmed.starts_with("Fwd:") || in_reply_to_present {
        return "conversation";
    }
    "general"
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InsightFlags {
    pub has_deadline: bool,
    pub has_meeting: bool,
    pub has_financial: bool,
}

/// Boolean OR of keyword sets over subject+body (spec §4.7).
pub fn insight_flags(subject: &str, body: &str) -> InsightFlags {
    let combined = format!("{subject} {body}");
    InsightFlags {
        has_deadline: contains_any(&combined, DEADLINE_KEYWORDS),
        has_meeting: contains_any(&combined, MEETING_KEYWORDS),
        has_financial: contains_any(&combined, FINANCIAL_KEYWORDS),
    }
}

/// Adaptive `max_tokens` budget from word count (spec §4.5, scenario 4).
pub fn summary_max_tokens(word_count: usize) -> usize {
    match word_count {
        0..=50 => 50,
        51..=150 => 80,
        151..=400 => 120,
        401..=800 => 180,
        _ => 250,
    }
}

/// Deterministic keyword-based summary used when no model is activated
/// (spec §4.5 fallback path): the first ~50 stripped words.
pub fn fallback_summary(body: &str) -> String {
    let words: Vec<&str> = body.split_whitespace().take(50).collect();
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_priority_flagging_scenario() {
        let score = priority_score("URGENT: review deck ASAP", "please review", true);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn priority_score_clamps_at_one() {
        let score = priority_score("urgent asap critical emergency", "please review need your action required", true);
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn priority_score_baseline_is_half() {
        let score = priority_score("hello", "just checking in", false);
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn category_meetings_scenario() {
        let cat = categorize("Sync call tomorrow", "calendar invite attached", "a@b.com", false);
        assert_eq!(cat, "meetings");
    }

    #[test]
    fn category_newsletters_scenario() {
        let cat = categorize("Weekly digest", "click here to unsubscribe", "news@b.com", false);
        assert_eq!(cat, "newsletters");
    }

    #[test]
    fn category_financial_beats_notifications() {
        let cat = categorize("Invoice due", "your invoice is attached", "noreply@billing.com", false);
        assert_eq!(cat, "financial");
    }

    #[test]
    fn category_notifications_for_automated_sender() {
        let cat = categorize("Your weekly report", "nothing special here", "notifications@service.com", false);
        assert_eq!(cat, "notifications");
    }

    #[test]
    fn category_conversation_for_reply_subject() {
        let cat = categorize("Re: project plan", "see attached", "a@b.com", false);
        assert_eq!(cat, "conversation");
    }

    #[test]
    fn category_general_default() {
        let cat = categorize("Hello", "just checking in", "a@b.com", false);
        assert_eq!(cat, "general");
    }

    #[test]
    fn insight_flags_meeting_and_financial() {
        let flags = insight_flags("Invoice due by Friday", "let's schedule a call");
        assert!(flags.has_deadline);
        assert!(flags.has_meeting);
        assert!(flags.has_financial);
    }

    #[test]
    fn adaptive_summary_budget_scenario() {
        assert_eq!(summary_max_tokens(42), 50);
        assert_eq!(summary_max_tokens(900), 250);
        assert_eq!(summary_max_tokens(151), 120);
        assert_eq!(summary_max_tokens(400), 120);
        assert_eq!(summary_max_tokens(401), 180);
    }

    #[test]
    fn fallback_summary_truncates_to_fifty_words() {
        let body = (0..100).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let summary = fallback_summary(&body);
        assert_eq!(summary.split_whitespace().count(), 50);
    }
}
