use serde::{Deserialize, Serialize};

/// A set member together with its score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredMember {
    pub member: String,
    pub score: i64,
}

/// Inclusive score bounds with an optional result cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreRange {
    pub low: i64,
    pub high: i64,
    pub limit: Option<usize>,
}

impl ScoreRange {
    pub fn new(low: i64, high: i64) -> Self {
        Self {
            low,
            high,
            limit: None,
        }
    }

    /// Every score
    pub fn all() -> Self {
        Self::new(i64::MIN, i64::MAX)
    }

    /// Scores up to and including `high`
    pub fn up_to(high: i64) -> Self {
        Self::new(i64::MIN, high)
    }

    /// Scores from `low` upward
    pub fn starting_at(low: i64) -> Self {
        Self::new(low, i64::MAX)
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.low > self.high || self.limit == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ranges() {
        assert!(ScoreRange::new(5, 4).is_empty());
        assert!(ScoreRange::all().with_limit(0).is_empty());
        assert!(!ScoreRange::up_to(0).with_limit(1).is_empty());
    }
}
