//! pt-BR money formatting and parsing of user-typed amounts

use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

use crate::error::{ReinoError, Result};

/// `1250` -> `R$ 1.250,00`
pub fn format_brl(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{}R$ {}", sign, group_pt_br(rounded.abs(), 2))
}

/// Fraction to percent: `0.7` -> `70,00%`
pub fn format_percent(fraction: Decimal) -> String {
    let pct = fraction
        .checked_mul(Decimal::ONE_HUNDRED)
        .unwrap_or(if fraction.is_sign_negative() {
            Decimal::MIN
        } else {
            Decimal::MAX
        })
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let sign = if pct.is_sign_negative() && !pct.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{}{}%", sign, group_pt_br(pct.abs(), 2))
}

/// Non-negative value with `.` thousands and `,` decimals
fn group_pt_br(value: Decimal, decimals: u32) -> String {
    let mut fixed = value;
    fixed.rescale(decimals);
    let text = fixed.to_string();
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));

    let digits: Vec<char> = int_part.chars().collect();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(*c);
    }

    if decimals == 0 {
        grouped
    } else {
        format!("{},{}", grouped, frac_part)
    }
}

/// Parse an amount typed into a currency field.
///
/// Accepts `R$ 100.000,50`, `100000.50`, `1.500` (thousands) and `1.5`
/// (decimal). A comma always marks the decimal part; dots are thousands
/// separators unless they are followed by something other than groups of
/// three digits.
pub fn parse_brl_amount(raw: &str) -> Result<Decimal> {
    let cleaned: String = raw
        .replace("R$", "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();

    if cleaned.is_empty() {
        return Err(ReinoError::InvalidInput("amount is empty".to_string()));
    }

    let (negative, body) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.as_str()),
    };

    if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return Err(ReinoError::InvalidInput(format!("not an amount: '{}'", raw)));
    }

    let canonical = if body.contains(',') {
        if body.matches(',').count() > 1 {
            return Err(ReinoError::InvalidInput(format!("not an amount: '{}'", raw)));
        }
        body.replace('.', "").replace(',', ".")
    } else if body.contains('.') {
        let mut groups = body.split('.');
        let head = groups.next().unwrap_or_default();
        let tail: Vec<&str> = groups.collect();
        let thousands = !head.is_empty() && tail.iter().all(|g| g.len() == 3);
        if thousands {
            body.replace('.', "")
        } else if tail.len() == 1 {
            body.to_string()
        } else {
            return Err(ReinoError::InvalidInput(format!("not an amount: '{}'", raw)));
        }
    } else {
        body.to_string()
    };

    let value = Decimal::from_str(&canonical)
        .map_err(|e| ReinoError::InvalidInput(format!("not an amount: '{}' ({})", raw, e)))?;
    Ok(if negative { -value } else { value })
}
