use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const MIN_CODE_LEN: usize = 4;

/// Strips everything but ASCII letters and digits and upper-cases the rest.
/// Anything shorter than [`MIN_CODE_LEN`] afterwards is not a plausible code.
pub fn normalize(raw: &str) -> Option<String> {
    let code: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if code.len() >= MIN_CODE_LEN {
        Some(code)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodePattern {
    pub min_len: usize,
    pub require_digit: bool,
}

impl Default for CodePattern {
    fn default() -> Self {
        CodePattern {
            min_len: MIN_CODE_LEN,
            require_digit: false,
        }
    }
}

impl CodePattern {
    pub fn accepts(&self, code: &str) -> bool {
        code.len() >= self.min_len.max(MIN_CODE_LEN)
            && (!self.require_digit || code.chars().any(|c| c.is_ascii_digit()))
    }
}

/// Pulls candidate codes out of free text, keeping encounter order and repeats.
/// `-` and `.` are treated as part of a code ("06A-906-032"), every other
/// non-alphanumeric character separates tokens.
pub fn extract_codes(text: &str, pattern: &CodePattern) -> Vec<String> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '.'))
        .filter_map(normalize)
        .filter(|code| pattern.accepts(code))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub primary: String,
    pub cross: BTreeSet<String>,
}

/// Most frequent code wins, ties go to the lexicographically smallest.
pub fn select_primary<S: AsRef<str>>(codes: &[S]) -> Option<Identity> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for code in codes {
        *counts.entry(code.as_ref()).or_insert(0) += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for (code, count) in &counts {
        match best {
            Some((_, best_count)) if *count <= best_count => {}
            _ => best = Some((code, *count)),
        }
    }

    let (primary, _) = best?;
    let cross = counts
        .keys()
        .filter(|code| **code != primary)
        .map(|code| code.to_string())
        .collect();
    Some(Identity {
        primary: primary.to_string(),
        cross,
    })
}

/// Where a candidate's identifier comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    /// Raw code tokens found in the listing text, not yet normalized.
    Codes(Vec<String>),
    /// Site-native listing id.
    ListingId(String),
}

impl IdentitySource {
    pub fn identify(&self) -> Option<Identity> {
        match self {
            IdentitySource::Codes(raw) => {
                let codes: Vec<String> = raw.iter().filter_map(|c| normalize(c)).collect();
                select_primary(&codes)
            }
            IdentitySource::ListingId(raw) => {
                let id = raw.trim();
                if id.is_empty() {
                    None
                } else {
                    Some(Identity {
                        primary: id.to_string(),
                        cross: BTreeSet::new(),
                    })
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Price {
    pub amount: f64,
    pub currency: Option<String>,
}

pub struct Extractor {
    symbol_price_regex: Regex,
    plain_amount_regex: Regex,
    year_regex: Regex,
    listing_id_regex: Regex,
}

impl Extractor {
    pub fn new() -> Self {
        Extractor {
            // "€ 1,234.50", "£99", "$ 12"
            symbol_price_regex: Regex::new(r"([€£$])\s?([0-9][0-9\s\u{a0},.]*)").unwrap(),
            // "12 500 EUR", "1234.5"
            plain_amount_regex: Regex::new(r"[0-9][0-9\s\u{a0},.]*").unwrap(),
            year_regex: Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap(),
            listing_id_regex: Regex::new(r"(\d+)(?:\.html?)?/?$").unwrap(),
        }
    }

    pub fn parse_price(&self, text: &str) -> Option<Price> {
        if let Some(cap) = self.symbol_price_regex.captures(text) {
            let currency = match &cap[1] {
                "€" => "EUR",
                "£" => "GBP",
                "$" => "USD",
                other => other,
            };
            return parse_amount(&cap[2]).map(|amount| Price {
                amount,
                currency: Some(currency.to_string()),
            });
        }

        let found = self.plain_amount_regex.find(text)?;
        let amount = parse_amount(found.as_str())?;
        let upper = text.to_uppercase();
        let currency = ["EUR", "PLN", "GBP", "USD"]
            .iter()
            .find(|code| upper.contains(*code))
            .map(|code| code.to_string());
        Some(Price { amount, currency })
    }

    /// Joins every digit in the text, so "123 456 km" reads as 123456.
    pub fn parse_integer(&self, text: &str) -> Option<i64> {
        let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }
        digits.parse().ok()
    }

    pub fn parse_year(&self, text: &str) -> Option<i32> {
        self.year_regex
            .captures(text)
            .and_then(|cap| cap[1].parse().ok())
    }

    pub fn parse_mileage(&self, text: &str) -> Option<i64> {
        if !text.to_lowercase().contains("km") {
            return None;
        }
        self.parse_integer(text)
    }

    pub fn listing_id_from_url(&self, url: &str) -> Option<String> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        self.listing_id_regex
            .captures(path)
            .map(|cap| cap[1].to_string())
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_amount(raw: &str) -> Option<f64> {
    let mut cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    cleaned = cleaned.trim_end_matches(['.', ',']).to_string();

    if cleaned.contains(',') && cleaned.contains('.') {
        cleaned = cleaned.replace(',', "");
    } else if let Some(pos) = cleaned.rfind(',') {
        // Two trailing digits after a lone comma is a decimal comma.
        let decimals = cleaned.len() - pos - 1;
        if decimals == 2 && cleaned.matches(',').count() == 1 {
            cleaned = cleaned.replace(',', ".");
        } else {
            cleaned = cleaned.replace(',', "");
        }
    }
    cleaned.parse().ok()
}
