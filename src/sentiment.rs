use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Market-news lexicon: word -> polarity weight.
static LEXICON: Lazy<HashMap<&'static str, i32>> = Lazy::new(|| {
    [
        ("surge", 2),
        ("surges", 2),
        ("rally", 2),
        ("rallies", 2),
        ("soar", 2),
        ("soars", 2),
        ("gain", 1),
        ("gains", 1),
        ("bullish", 2),
        ("record", 1),
        ("approve", 1),
        ("approved", 2),
        ("approval", 2),
        ("adoption", 1),
        ("partnership", 1),
        ("launch", 1),
        ("upgrade", 1),
        ("recover", 1),
        ("recovers", 1),
        ("breakthrough", 2),
        ("crash", -3),
        ("crashes", -3),
        ("plunge", -2),
        ("plunges", -2),
        ("drop", -1),
        ("drops", -1),
        ("fall", -1),
        ("falls", -1),
        ("bearish", -2),
        ("hack", -3),
        ("hacked", -3),
        ("exploit", -3),
        ("scam", -3),
        ("fraud", -3),
        ("lawsuit", -2),
        ("ban", -2),
        ("banned", -2),
        ("reject", -2),
        ("rejected", -2),
        ("investigation", -1),
        ("liquidation", -2),
        ("selloff", -2),
        ("delay", -1),
        ("delayed", -1),
    ]
    .into_iter()
    .collect()
});

/// Score at which sentiment saturates to +/-1.0.
const SATURATION: f32 = 5.0;

#[derive(Debug, Clone, Default)]
pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    fn word_score(&self, w: &str) -> i32 {
        LEXICON.get(w).copied().unwrap_or(0)
    }

    /// Returns (raw score, token count).
    /// Negation: a negator within the previous 1..=3 tokens flips the word's sign.
    pub fn score_text(&self, text: &str) -> (i32, usize) {
        let tokens: Vec<String> = tokenize(text).collect();
        let mut score: i32 = 0;

        for i in 0..tokens.len() {
            let base = self.word_score(tokens[i].as_str());
            if base == 0 {
                continue;
            }
            let negated = (1..=3).any(|k| i >= k && is_negator(tokens[i - k].as_str()));
            score += if negated { -base } else { base };
        }

        (score, tokens.len())
    }

    /// Raw score squashed into -1.0..=1.0.
    pub fn polarity(&self, text: &str) -> f32 {
        let (score, _) = self.score_text(text);
        (score as f32 / SATURATION).clamp(-1.0, 1.0)
    }
}

/// Alphanumeric, lower-cased tokens.
fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not" | "no" | "never" | "isn't" | "wasn't" | "aren't" | "won't" | "can't" | "cannot"
            | "without"
    )
}
