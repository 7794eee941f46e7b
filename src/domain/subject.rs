use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a market question, owned by the settlement layer.
/// The engine treats subjects as read-only input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectStatus {
    Open,
    PendingResolution,
    Resolved,
    Disputed,
    Cancelled,
}

impl SubjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectStatus::Open => "OPEN",
            SubjectStatus::PendingResolution => "PENDING_RESOLUTION",
            SubjectStatus::Resolved => "RESOLVED",
            SubjectStatus::Disputed => "DISPUTED",
            SubjectStatus::Cancelled => "CANCELLED",
        }
    }

    /// Can a resolution attempt be started for a subject in this status?
    pub fn is_resolvable(&self) -> bool {
        matches!(self, SubjectStatus::Open | SubjectStatus::PendingResolution)
    }
}

impl fmt::Display for SubjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Keywords that route a question to market-data providers and trigger the
/// price-trend baseline.
const PRICE_KEYWORDS: &[&str] = &[
    "price", "btc", "bitcoin", "eth", "crypto", "stock", "market", "trading", "usd", "financial",
];

/// Keywords that route a question to news providers and trigger polarity
/// counting.
const EVENT_KEYWORDS: &[&str] = &[
    "news", "election", "announce", "event", "wins", "approve", "release", "launch", "vote",
];

/// Categories whose outcomes swing fast enough to penalize confidence.
const VOLATILE_CATEGORIES: &[&str] = &["crypto", "sports", "weather"];

/// Words implying an upward directional bet in the question phrasing.
const UPWARD_PHRASES: &[&str] = &["above", "exceed", "rise", "reach", "higher", "surpass", "up"];

/// Words implying a downward directional bet.
const DOWNWARD_PHRASES: &[&str] = &["below", "under", "fall", "drop", "lower", "decline", "down"];

/// Direction implied by a question's phrasing, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BetDirection {
    Up,
    Down,
}

/// A prediction-market question to be resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    /// Market identifier
    pub id: String,
    /// The question text
    pub question: String,
    /// Category tag (e.g. "crypto", "politics", "sports")
    pub category: String,
    /// Resolution deadline
    pub deadline: DateTime<Utc>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Current status
    pub status: SubjectStatus,
}

impl Subject {
    fn haystack(&self) -> String {
        format!("{} {}", self.category, self.question).to_lowercase()
    }

    /// Does the category or question text look price/financial?
    pub fn is_price_based(&self) -> bool {
        let text = self.haystack();
        PRICE_KEYWORDS.iter().any(|kw| text.contains(kw))
    }

    /// Does the category or question text look news/event driven?
    pub fn is_event_based(&self) -> bool {
        let text = self.haystack();
        EVENT_KEYWORDS.iter().any(|kw| text.contains(kw))
    }

    /// Categories considered volatile for confidence scoring.
    pub fn is_volatile_category(&self) -> bool {
        let cat = self.category.to_lowercase();
        VOLATILE_CATEGORIES.iter().any(|c| cat.contains(c))
    }

    /// Direction implied by the question phrasing, if it reads as a
    /// directional bet ("will BTC rise above ...", "will turnout fall below ...").
    pub fn implied_direction(&self) -> Option<BetDirection> {
        let text = self.question.to_lowercase();
        if UPWARD_PHRASES.iter().any(|p| text.contains(p)) {
            Some(BetDirection::Up)
        } else if DOWNWARD_PHRASES.iter().any(|p| text.contains(p)) {
            Some(BetDirection::Down)
        } else {
            None
        }
    }

    /// Seconds until the resolution deadline (negative if past).
    pub fn seconds_to_deadline(&self, now: DateTime<Utc>) -> i64 {
        (self.deadline - now).num_seconds()
    }

    /// Age of the subject in seconds.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }
}
