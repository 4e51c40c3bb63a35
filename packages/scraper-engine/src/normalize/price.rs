//! Price canonicalization from raw page strings.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;

use crate::types::Price;

/// Currency symbols and codes recognized in raw price text.
const CURRENCY_MARKERS: &[(&str, &str)] = &[
    ("$", "USD"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("USD", "USD"),
    ("EUR", "EUR"),
    ("GBP", "GBP"),
    ("CAD", "CAD"),
    ("AUD", "AUD"),
];

fn amount_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Thousands groups with , or . plus an optional decimal part,
        // or a plain integer/decimal.
        Regex::new(r"\d{1,3}(?:[.,]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?")
            .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

/// Markers that explain a second amount as a struck-through reference
/// price rather than a competing live price.
const STRIKE_MARKERS: &[&str] = &["was", "msrp", "list price", "reg.", "orig", "save", "<del", "<s>"];

/// Parse the selling price out of a raw string.
///
/// The first amount in the string wins: listings put the current price
/// before struck-through MSRPs and "was" prices, so `"$14.45 (was
/// $19.99)"` yields 14.45. When several distinct amounts appear with no
/// strike-through marker (a range or a multi-pack), the price is marked
/// [`Price::ambiguous`]. Returns `None` when no amount is present.
pub fn parse_price(raw: &str, default_currency: &str) -> Option<Price> {
    let mut amounts = amount_pattern()
        .find_iter(raw)
        .filter_map(|m| normalize_amount(m.as_str()));
    let amount = amounts.next()?;

    let lowered = raw.to_lowercase();
    let explained = STRIKE_MARKERS.iter().any(|m| lowered.contains(m));
    let ambiguous = !explained && amounts.any(|other| other != amount);

    let currency = CURRENCY_MARKERS
        .iter()
        .find(|(marker, _)| raw.contains(marker))
        .map(|(_, code)| (*code).to_string())
        .unwrap_or_else(|| default_currency.to_string());

    let price = Price::new(amount, currency);
    Some(if ambiguous { price.ambiguous() } else { price })
}

/// Reduce a matched amount to a canonical `1234.56` form, deciding
/// which separator is the decimal point.
fn normalize_amount(matched: &str) -> Option<Decimal> {
    let cleaned = match (matched.rfind('.'), matched.rfind(',')) {
        (Some(dot), Some(comma)) => {
            // Both present: the rightmost one is the decimal separator.
            if dot > comma {
                matched.replace(',', "")
            } else {
                matched.replace('.', "").replace(',', ".")
            }
        }
        (None, Some(comma)) => {
            let decimals = matched.len() - comma - 1;
            if decimals == 3 && matched.matches(',').count() >= 1 && matched.len() > 4 {
                // 1,299 style thousands grouping
                matched.replace(',', "")
            } else {
                matched.replace(',', ".")
            }
        }
        _ => matched.to_string(),
    };
    Decimal::from_str(&cleaned).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(raw: &str) -> Option<Price> {
        parse_price(raw, "USD")
    }

    #[test]
    fn current_price_wins_over_msrp() {
        let price = usd("$14.45 (was $19.99)").unwrap();
        assert_eq!(price.amount, Decimal::from_str("14.45").unwrap());
        assert_eq!(price.currency, "USD");
    }

    #[test]
    fn plain_number_uses_default_currency() {
        let price = parse_price("14.45", "CAD").unwrap();
        assert_eq!(price.currency, "CAD");
    }

    #[test]
    fn euro_symbol_and_comma_decimal() {
        let price = usd("€14,45").unwrap();
        assert_eq!(price.amount, Decimal::from_str("14.45").unwrap());
        assert_eq!(price.currency, "EUR");
    }

    #[test]
    fn thousands_grouping() {
        let price = usd("$1,299.00").unwrap();
        assert_eq!(price.amount, Decimal::from_str("1299.00").unwrap());
    }

    #[test]
    fn european_thousands_grouping() {
        let price = usd("1.299,00 EUR").unwrap();
        assert_eq!(price.amount, Decimal::from_str("1299.00").unwrap());
        assert_eq!(price.currency, "EUR");
    }

    #[test]
    fn range_takes_the_first_amount_and_is_ambiguous() {
        let price = usd("$10.00 - $25.00").unwrap();
        assert_eq!(price.amount, Decimal::from_str("10.00").unwrap());
        assert!(price.ambiguous);
    }

    #[test]
    fn strike_through_second_price_is_not_ambiguous() {
        assert!(!usd("$14.45 (was $19.99)").unwrap().ambiguous);
        assert!(!usd("$89.00 MSRP $120.00").unwrap().ambiguous);
    }

    #[test]
    fn repeated_identical_amount_is_not_ambiguous() {
        assert!(!usd("$25.00 $25.00").unwrap().ambiguous);
    }

    #[test]
    fn single_price_is_not_ambiguous() {
        assert!(!usd("$14.45").unwrap().ambiguous);
    }

    #[test]
    fn no_amount_is_none() {
        assert!(usd("call for pricing").is_none());
        assert!(usd("").is_none());
    }

    #[test]
    fn integer_price() {
        let price = usd("$25").unwrap();
        assert_eq!(price.amount, Decimal::from(25));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn grouped(dollars: u64) -> String {
            let digits = dollars.to_string();
            let mut out = String::new();
            for (i, ch) in digits.chars().enumerate() {
                if i > 0 && (digits.len() - i) % 3 == 0 {
                    out.push(',');
                }
                out.push(ch);
            }
            out
        }

        proptest! {
            #[test]
            fn dollars_and_cents_parse_exactly(dollars in 0u64..1_000_000, cents in 0u32..100) {
                let expected = Decimal::new((dollars * 100 + u64::from(cents)) as i64, 2);
                for raw in [
                    format!("${dollars}.{cents:02}"),
                    format!("${}.{cents:02}", grouped(dollars)),
                ] {
                    let price = parse_price(&raw, "USD").unwrap();
                    prop_assert_eq!(price.amount, expected);
                    prop_assert_eq!(price.currency.as_str(), "USD");
                }
            }

            #[test]
            fn reparsing_a_canonical_price_is_a_fixed_point(
                dollars in 0u64..1_000_000, cents in 0u32..100
            ) {
                let first = parse_price(&format!("${dollars}.{cents:02}"), "USD").unwrap();
                let rendered = format!("{} {}", first.amount, first.currency);
                let second = parse_price(&rendered, &first.currency).unwrap();
                prop_assert_eq!(first, second);
            }
        }
    }
}
