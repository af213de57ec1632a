use crate::models::{Recommendation, Sentiment};

/// Below this confidence every analysis resolves to hold.
pub const MIN_CONFIDENCE: f64 = 0.3;

pub const LOW_CONFIDENCE_REASON: &str = "insufficient confidence in the analysis";

const BUY_REASONS: [&str; 3] = [
    "positive sentiment in the news",
    "good confidence in the analysis",
    "bullish trend detected",
];

const SELL_REASONS: [&str; 3] = [
    "negative sentiment in the news",
    "good confidence in the analysis",
    "bearish trend detected",
];

const HOLD_REASONS: [&str; 2] = [
    "neutral sentiment in the news",
    "no strong signal detected",
];

/// Action plus the fixed explanation attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Advice {
    pub action: Recommendation,
    pub reasons: Vec<String>,
}

impl Advice {
    fn new(action: Recommendation, reasons: &[&str]) -> Self {
        Self {
            action,
            reasons: reasons.iter().map(|r| r.to_string()).collect(),
        }
    }
}

pub fn recommend(sentiment: Sentiment, confidence: f64) -> Advice {
    if confidence < MIN_CONFIDENCE {
        return Advice::new(Recommendation::Hold, &[LOW_CONFIDENCE_REASON]);
    }

    match sentiment {
        Sentiment::Positive => Advice::new(Recommendation::Buy, &BUY_REASONS),
        Sentiment::Negative => Advice::new(Recommendation::Sell, &SELL_REASONS),
        Sentiment::Neutral => Advice::new(Recommendation::Hold, &HOLD_REASONS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_confidence_always_holds() {
        for sentiment in [Sentiment::Positive, Sentiment::Negative, Sentiment::Neutral] {
            for confidence in [0.0, 0.1, 0.29] {
                let advice = recommend(sentiment, confidence);
                assert_eq!(advice.action, Recommendation::Hold);
                assert_eq!(advice.reasons, vec![LOW_CONFIDENCE_REASON.to_string()]);
            }
        }
    }

    #[test]
    fn dispatches_on_sentiment_above_threshold() {
        assert_eq!(recommend(Sentiment::Positive, 0.5).action, Recommendation::Buy);
        assert_eq!(recommend(Sentiment::Negative, 0.5).action, Recommendation::Sell);
        assert_eq!(recommend(Sentiment::Neutral, 0.5).action, Recommendation::Hold);
    }

    #[test]
    fn threshold_is_inclusive() {
        let advice = recommend(Sentiment::Positive, MIN_CONFIDENCE);
        assert_eq!(advice.action, Recommendation::Buy);
        assert_eq!(advice.reasons.len(), 3);
    }

    #[test]
    fn neutral_hold_carries_two_reasons() {
        let advice = recommend(Sentiment::Neutral, 0.9);
        assert_eq!(advice.reasons, vec![
            "neutral sentiment in the news".to_string(),
            "no strong signal detected".to_string(),
        ]);
    }
}
