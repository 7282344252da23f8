// src/ingest/scoring.rs
//! Keyword heuristics applied to every candidate item: importance, coin tags, relevance.

use once_cell::sync::Lazy;
use regex::Regex;

/// Urgency tiers, checked in order; first hit wins.
const URGENCY_TIERS: &[(i32, &[&str])] = &[
    (
        90,
        &[
            "breaking", "urgent", "alert", "crash", "hack", "exploit", "ban", "regulation",
            "sec", "lawsuit", "investigation", "scam",
        ],
    ),
    (
        70,
        &[
            "surge", "rally", "breakthrough", "milestone", "launch", "update", "partnership",
            "acquisition", "investment", "funding", "ipo",
        ],
    ),
    (
        50,
        &[
            "analysis", "report", "study", "research", "interview", "opinion", "prediction",
            "forecast", "trend", "market", "price",
        ],
    ),
];

pub const BASELINE_IMPORTANCE: i32 = 30;

const MAJOR_COINS: &[&str] = &[
    "BTC", "ETH", "BNB", "XRP", "ADA", "SOL", "DOGE", "DOT", "AVAX", "SHIB", "MATIC", "LTC",
    "UNI", "LINK", "ATOM", "NEAR", "ALGO", "VET", "ICP", "FIL", "TRX", "ETC", "HBAR", "XLM",
    "MANA", "SAND", "AXS", "APE", "CRO", "LRC", "ENJ", "CHZ",
];

const COIN_NAMES: &[(&str, &str)] = &[
    ("BITCOIN", "BTC"),
    ("ETHEREUM", "ETH"),
    ("BINANCE", "BNB"),
    ("RIPPLE", "XRP"),
    ("CARDANO", "ADA"),
    ("SOLANA", "SOL"),
    ("DOGECOIN", "DOGE"),
    ("POLKADOT", "DOT"),
];

const MAX_COINS: usize = 5;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9]+").expect("static regex"));

fn words_upper(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD.find_iter(text).map(|m| m.as_str().to_ascii_uppercase())
}

/// Importance on a 0..=100 scale from urgency keywords (whole-word match).
pub fn importance(text: &str) -> i32 {
    let words: Vec<&str> = WORD.find_iter(text).map(|m| m.as_str()).collect();
    for (score, keywords) in URGENCY_TIERS {
        if keywords
            .iter()
            .any(|k| words.iter().any(|w| w.eq_ignore_ascii_case(k)))
        {
            return *score;
        }
    }
    BASELINE_IMPORTANCE
}

/// Ticker symbols mentioned by symbol or by well-known name. At most five, first-seen order.
pub fn extract_coins(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for w in words_upper(text) {
        let sym = if MAJOR_COINS.contains(&w.as_str()) {
            Some(w.as_str())
        } else {
            COIN_NAMES
                .iter()
                .find(|(name, _)| *name == w)
                .map(|(_, sym)| *sym)
        };
        if let Some(sym) = sym {
            if !out.iter().any(|s| s == sym) {
                out.push(sym.to_string());
            }
        }
        if out.len() == MAX_COINS {
            break;
        }
    }
    out
}

/// Empty keyword list accepts everything; otherwise a case-insensitive substring hit is required.
pub fn is_relevant(text: &str, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let lower = text.to_lowercase();
    keywords
        .iter()
        .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
}
