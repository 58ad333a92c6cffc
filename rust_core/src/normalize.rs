//! Field parsers shared by every source's `normalize`.
//!
//! Marketplaces disagree on shapes (numbers vs. numeric strings, "Near Mint"
//! vs. "NM"), so each helper accepts the spellings seen in the wild and
//! returns a [`NormalizationError`] for anything else.

use crate::error::NormalizationError;
use crate::types::{CanonicalPriceRecord, Condition, Language, RawRecord};
use serde_json::Value;

/// Fetch a required field from a JSON object
pub fn require<'a>(payload: &'a Value, field: &'static str) -> Result<&'a Value, NormalizationError> {
    match payload.get(field) {
        Some(Value::Null) | None => Err(NormalizationError::MissingField(field)),
        Some(v) => Ok(v),
    }
}

/// Number or numeric string. `null`/absent is `None`.
pub fn optional_price(payload: &Value, field: &'static str) -> Result<Option<f64>, NormalizationError> {
    let value = match payload.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v,
    };

    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(p) if p.is_finite() => Ok(Some(p)),
        _ => Err(NormalizationError::InvalidValue {
            field,
            value: value.to_string(),
        }),
    }
}

/// Required, strictly positive price
pub fn positive_price(payload: &Value, field: &'static str) -> Result<f64, NormalizationError> {
    let price = optional_price(payload, field)?.ok_or(NormalizationError::MissingField(field))?;
    if price <= 0.0 {
        return Err(NormalizationError::NonPositivePrice(price));
    }
    Ok(price)
}

pub fn optional_count(payload: &Value, field: &'static str) -> Result<Option<i32>, NormalizationError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .filter(|n| *n >= 0)
            .map(Some)
            .ok_or_else(|| NormalizationError::InvalidValue {
                field,
                value: v.to_string(),
            }),
    }
}

pub fn parse_condition(raw: &str) -> Result<Condition, NormalizationError> {
    let cleaned = raw.trim();
    if let Some(c) = Condition::from_code(&cleaned.to_uppercase()) {
        return Ok(c);
    }
    let condition = match cleaned.to_lowercase().replace(['-', '_'], " ").as_str() {
        "near mint" | "mint" | "nm m" => Condition::NearMint,
        "lightly played" | "excellent" | "ex" => Condition::LightlyPlayed,
        "moderately played" | "good" | "gd" => Condition::ModeratelyPlayed,
        "heavily played" | "played" | "pl" => Condition::HeavilyPlayed,
        "damaged" | "poor" | "po" => Condition::Damaged,
        _ => {
            return Err(NormalizationError::InvalidValue {
                field: "condition",
                value: raw.to_string(),
            })
        }
    };
    Ok(condition)
}

pub fn parse_language(raw: &str) -> Result<Language, NormalizationError> {
    let cleaned = raw.trim().to_lowercase();
    if let Some(l) = Language::from_code(&cleaned) {
        return Ok(l);
    }
    let language = match cleaned.as_str() {
        "english" => Language::English,
        "japanese" => Language::Japanese,
        "german" => Language::German,
        "french" => Language::French,
        "italian" => Language::Italian,
        "spanish" => Language::Spanish,
        "portuguese" => Language::Portuguese,
        "korean" => Language::Korean,
        "chinese simplified" | "s-chinese" | "zh-hans" => Language::ChineseSimplified,
        "chinese traditional" | "t-chinese" | "zh-hant" => Language::ChineseTraditional,
        "russian" => Language::Russian,
        _ => {
            return Err(NormalizationError::InvalidValue {
                field: "language",
                value: raw.to_string(),
            })
        }
    };
    Ok(language)
}

/// ISO 4217: three ASCII letters, upper-cased
pub fn parse_currency(raw: &str) -> Result<String, NormalizationError> {
    let code = raw.trim().to_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(NormalizationError::InvalidValue {
            field: "currency",
            value: raw.to_string(),
        })
    }
}

/// Guard against a record routed to the wrong source's normalizer
pub fn ensure_source(raw: &RawRecord, expected: &str) -> Result<(), NormalizationError> {
    if raw.source_id == expected {
        Ok(())
    } else {
        Err(NormalizationError::WrongSource {
            expected: expected.to_string(),
            found: raw.source_id.clone(),
        })
    }
}

/// Skeleton record carrying the raw record's identity; sources fill in the rest
pub fn base_record(raw: &RawRecord, price: f64, currency: String) -> CanonicalPriceRecord {
    CanonicalPriceRecord {
        item_id: raw.item_id,
        source_id: raw.source_id.clone(),
        observed_at: raw.observed_at,
        price,
        currency,
        condition: Condition::default(),
        is_foil: false,
        language: Language::default(),
        low_price: None,
        mid_price: None,
        high_price: None,
        market_price: None,
        listing_count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_price_accepts_numbers_and_strings() {
        let payload = json!({"a": 1.25, "b": "3.50", "c": null, "d": "", "e": "n/a"});
        assert_eq!(optional_price(&payload, "a").unwrap(), Some(1.25));
        assert_eq!(optional_price(&payload, "b").unwrap(), Some(3.5));
        assert_eq!(optional_price(&payload, "c").unwrap(), None);
        assert_eq!(optional_price(&payload, "d").unwrap(), None);
        assert_eq!(optional_price(&payload, "missing").unwrap(), None);
        assert!(optional_price(&payload, "e").is_err());
    }

    #[test]
    fn test_positive_price_rejects_zero_and_missing() {
        let payload = json!({"zero": 0, "neg": "-2", "ok": "0.10"});
        assert_eq!(
            positive_price(&payload, "zero"),
            Err(NormalizationError::NonPositivePrice(0.0))
        );
        assert!(positive_price(&payload, "neg").is_err());
        assert_eq!(
            positive_price(&payload, "nope"),
            Err(NormalizationError::MissingField("nope"))
        );
        assert_eq!(positive_price(&payload, "ok").unwrap(), 0.10);
    }

    #[test]
    fn test_condition_spellings() {
        assert_eq!(parse_condition("NM").unwrap(), Condition::NearMint);
        assert_eq!(parse_condition("Near Mint").unwrap(), Condition::NearMint);
        assert_eq!(parse_condition("lightly-played").unwrap(), Condition::LightlyPlayed);
        assert_eq!(parse_condition("dmg").unwrap(), Condition::Damaged);
        assert!(parse_condition("pristine").is_err());
    }

    #[test]
    fn test_language_spellings() {
        assert_eq!(parse_language("en").unwrap(), Language::English);
        assert_eq!(parse_language("Japanese").unwrap(), Language::Japanese);
        assert_eq!(parse_language("ZHS").unwrap(), Language::ChineseSimplified);
        assert!(parse_language("klingon").is_err());
    }

    #[test]
    fn test_currency_code() {
        assert_eq!(parse_currency("eur").unwrap(), "EUR");
        assert!(parse_currency("EURO").is_err());
    }

    #[test]
    fn test_count_must_be_non_negative() {
        let payload = json!({"n": 4, "neg": -1, "s": "4"});
        assert_eq!(optional_count(&payload, "n").unwrap(), Some(4));
        assert!(optional_count(&payload, "neg").is_err());
        assert!(optional_count(&payload, "s").is_err());
    }
}
