use vader_sentiment::SentimentIntensityAnalyzer;

use crate::models::SentimentScore;

/// VADER polarity scoring over normalized token sequences
pub struct SentimentScorer {
    analyzer: SentimentIntensityAnalyzer<'static>,
}

impl SentimentScorer {
    pub fn new() -> Self {
        Self {
            analyzer: SentimentIntensityAnalyzer::new(),
        }
    }

    /// Scores a token sequence (tokens are joined back into a single text,
    /// matching how the scores are computed over processed descriptions).
    pub fn score_tokens(&self, tokens: &[String]) -> SentimentScore {
        self.score_text(&tokens.join(" "))
    }

    pub fn score_text(&self, text: &str) -> SentimentScore {
        let scores = self.analyzer.polarity_scores(text);

        SentimentScore {
            neg: scores.get("neg").copied().unwrap_or(0.0),
            neu: scores.get("neu").copied().unwrap_or(0.0),
            pos: scores.get("pos").copied().unwrap_or(0.0),
            compound: scores.get("compound").copied().unwrap_or(0.0),
        }
    }
}

impl Default for SentimentScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_text_scores_positive_compound() {
        let scorer = SentimentScorer::new();
        let score = scorer.score_text("great wonderful amazing");
        assert!(score.compound > 0.0);
    }

    #[test]
    fn negative_text_scores_negative_compound() {
        let scorer = SentimentScorer::new();
        let score = scorer.score_text("terrible awful horrible");
        assert!(score.compound < 0.0);
    }

    #[test]
    fn empty_text_is_neutral() {
        let scorer = SentimentScorer::new();
        let score = scorer.score_text("");
        assert_eq!(score.compound, 0.0);
    }
}
