use crate::models::{NewsItem, Sentiment, SentimentCounts};

/// Share of items a label must exceed to become the overall sentiment.
const DOMINANCE_RATIO: f64 = 0.6;
/// Item count at which the volume term of the confidence saturates.
const VOLUME_SATURATION: f64 = 10.0;

/// Output of [`aggregate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub counts: SentimentCounts,
    pub sentiment: Sentiment,
    pub confidence: f64,
}

/// Tally labels and derive the overall sentiment and confidence.
///
/// An empty batch is neutral with zero confidence.
pub fn aggregate(items: &[NewsItem]) -> Aggregate {
    let counts = count(items);
    Aggregate {
        counts,
        sentiment: overall_sentiment(&counts),
        confidence: confidence(&counts),
    }
}

pub fn count(items: &[NewsItem]) -> SentimentCounts {
    items.iter().fold(SentimentCounts::default(), |mut acc, item| {
        match item.sentiment {
            Sentiment::Positive => acc.positive += 1,
            Sentiment::Negative => acc.negative += 1,
            Sentiment::Neutral => acc.neutral += 1,
        }
        acc
    })
}

/// Mixed or tied distributions stay neutral.
pub fn overall_sentiment(counts: &SentimentCounts) -> Sentiment {
    let total = counts.total();
    if total == 0 {
        return Sentiment::Neutral;
    }

    let total = total as f64;
    if counts.positive as f64 / total > DOMINANCE_RATIO {
        Sentiment::Positive
    } else if counts.negative as f64 / total > DOMINANCE_RATIO {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    }
}

/// Mean of the volume term and the skew term, rounded to two decimals.
pub fn confidence(counts: &SentimentCounts) -> f64 {
    let total = counts.total();
    if total == 0 {
        return 0.0;
    }

    let total = total as f64;
    let volume = (total / VOLUME_SATURATION).min(1.0);
    let skew = counts.positive.max(counts.negative) as f64 / total;

    round2((volume + skew) / 2.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn items(positive: usize, negative: usize, neutral: usize) -> Vec<NewsItem> {
        let labels = std::iter::repeat(Sentiment::Positive)
            .take(positive)
            .chain(std::iter::repeat(Sentiment::Negative).take(negative))
            .chain(std::iter::repeat(Sentiment::Neutral).take(neutral));

        labels
            .enumerate()
            .map(|(i, sentiment)| NewsItem {
                title: format!("headline {}", i),
                url: format!("https://news.example/{}", i),
                sentiment,
                keyword: "bitcoin".into(),
                created_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn empty_batch_is_neutral_with_zero_confidence() {
        let agg = aggregate(&[]);
        assert_eq!(agg.counts, SentimentCounts::default());
        assert_eq!(agg.sentiment, Sentiment::Neutral);
        assert_eq!(agg.confidence, 0.0);
    }

    #[test]
    fn counts_cover_every_item() {
        for (p, n, u) in [(0, 0, 1), (3, 2, 5), (12, 0, 4), (1, 9, 0)] {
            let batch = items(p, n, u);
            let counts = count(&batch);
            assert_eq!(counts.total(), batch.len());
            assert_eq!((counts.positive, counts.negative, counts.neutral), (p, n, u));
        }
    }

    #[test]
    fn strong_positive_batch() {
        let agg = aggregate(&items(7, 1, 2));
        assert_eq!(agg.sentiment, Sentiment::Positive);
        assert_eq!(agg.confidence, 0.85);
    }

    #[test]
    fn tie_defaults_to_neutral() {
        let agg = aggregate(&items(2, 2, 0));
        assert_eq!(agg.sentiment, Sentiment::Neutral);
        assert_eq!(agg.confidence, 0.45);
    }

    #[test]
    fn exactly_sixty_percent_is_not_dominant() {
        assert_eq!(aggregate(&items(6, 0, 4)).sentiment, Sentiment::Neutral);
        assert_eq!(aggregate(&items(0, 6, 4)).sentiment, Sentiment::Neutral);
        assert_eq!(aggregate(&items(0, 7, 3)).sentiment, Sentiment::Negative);
    }

    #[test]
    fn confidence_grows_with_volume_then_plateaus() {
        // Skew held at 100% positive.
        let mut previous = 0.0;
        for total in 1..=10 {
            let c = aggregate(&items(total, 0, 0)).confidence;
            assert!(c >= previous, "confidence dropped at total={}", total);
            previous = c;
        }
        assert_eq!(previous, 1.0);
        assert_eq!(aggregate(&items(25, 0, 0)).confidence, 1.0);
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        for (p, n, u) in [(1, 0, 0), (0, 0, 30), (5, 5, 5), (40, 1, 0)] {
            let c = aggregate(&items(p, n, u)).confidence;
            assert!((0.0..=1.0).contains(&c));
        }
    }
}
