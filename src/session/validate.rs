// Client-side input validation for join and bid actions.
//
// This is a UX optimization, not a security boundary: the backend enforces
// its own limits independently. Anything rejected here never reaches the
// network.

use super::error::SessionError;

/// Smallest accepted bid, in currency units.
pub const MIN_BID_AMOUNT: f64 = 5.0;
/// Largest accepted bid.
pub const MAX_BID_AMOUNT: f64 = 10_000.0;
/// Quick-bid buttons offered by the UI.
pub const PRESET_AMOUNTS: [f64; 5] = [5.0, 10.0, 15.0, 20.0, 50.0];

pub const MIN_NAME_CHARS: usize = 2;
pub const MAX_NAME_CHARS: usize = 50;

/// Bid bounds, normally sourced from config with the constants above as
/// defaults.
#[derive(Debug, Clone, Copy)]
pub struct BidLimits {
    pub min: f64,
    pub max: f64,
}

impl Default for BidLimits {
    fn default() -> Self {
        BidLimits {
            min: MIN_BID_AMOUNT,
            max: MAX_BID_AMOUNT,
        }
    }
}

/// Validate and normalize a display name: surrounding whitespace is trimmed,
/// the remainder must be 2–50 characters.
pub fn validate_display_name(raw: &str) -> Result<String, SessionError> {
    let name = raw.trim();
    let len = name.chars().count();
    if len < MIN_NAME_CHARS {
        return Err(SessionError::validation(
            "display_name",
            format!("must be at least {MIN_NAME_CHARS} characters"),
        ));
    }
    if len > MAX_NAME_CHARS {
        return Err(SessionError::validation(
            "display_name",
            format!("must be at most {MAX_NAME_CHARS} characters"),
        ));
    }
    Ok(name.to_string())
}

/// Validate and normalize a mobile number.
///
/// Separators (spaces, dashes, dots, parentheses) are stripped first. Two
/// shapes are accepted:
/// - regional: exactly 10 digits with a leading 6–9
/// - international: `+` followed by 8–15 digits, leading digit nonzero
///
/// Returns the normalized digits (with the `+` retained for international
/// numbers).
pub fn validate_mobile_number(raw: &str) -> Result<String, SessionError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if cleaned.is_empty() {
        return Err(SessionError::validation("mobile_number", "is required"));
    }

    if let Some(rest) = cleaned.strip_prefix('+') {
        let ok = (8..=15).contains(&rest.len())
            && rest.chars().all(|c| c.is_ascii_digit())
            && !rest.starts_with('0');
        if ok {
            return Ok(cleaned);
        }
        return Err(SessionError::validation(
            "mobile_number",
            "international numbers need + and 8-15 digits",
        ));
    }

    let ok = cleaned.len() == 10
        && cleaned.chars().all(|c| c.is_ascii_digit())
        && matches!(cleaned.chars().next(), Some('6'..='9'));
    if ok {
        Ok(cleaned)
    } else {
        Err(SessionError::validation(
            "mobile_number",
            "expected a 10-digit number starting with 6-9, or +country format",
        ))
    }
}

/// Validate a bid amount against the configured bounds.
pub fn validate_bid_amount(amount: f64, limits: BidLimits) -> Result<(), SessionError> {
    if !amount.is_finite() {
        return Err(SessionError::validation("amount", "invalid number"));
    }
    if amount < limits.min {
        return Err(SessionError::validation(
            "amount",
            format!("must be at least {}", limits.min),
        ));
    }
    if amount > limits.max {
        return Err(SessionError::validation(
            "amount",
            format!("cannot exceed {}", limits.max),
        ));
    }
    Ok(())
}

/// Parse and validate a custom amount typed by the user.
pub fn parse_custom_amount(raw: &str, limits: BidLimits) -> Result<f64, SessionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SessionError::validation("amount", "is required"));
    }
    let amount: f64 = trimmed
        .parse()
        .map_err(|_| SessionError::validation("amount", "invalid number format"))?;
    validate_bid_amount(amount, limits)?;
    Ok(amount)
}

/// Normalize a session code for the RPC: trimmed and uppercased.
pub fn normalize_session_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}
