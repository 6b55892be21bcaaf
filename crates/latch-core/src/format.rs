//! Passcode format classification
//!
//! The format is a UI hint (numeric keypad with fixed length vs. free-form
//! secure field). It is inferred from the literal code on every write and
//! never asked of the caller.

use serde::{Deserialize, Serialize};

/// Shape of a stored passcode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "String")]
pub enum PasscodeFormat {
    /// Exactly four decimal digits
    FourDigit,
    /// Exactly six decimal digits
    SixDigit,
    /// Anything else
    Alphanumeric,
}

impl PasscodeFormat {
    /// Classify a raw code
    pub fn classify(code: &str) -> Self {
        let numeric = code.chars().all(|c| c.is_ascii_digit());
        if numeric {
            match code.chars().count() {
                4 => return PasscodeFormat::FourDigit,
                6 => return PasscodeFormat::SixDigit,
                _ => {}
            }
        }
        PasscodeFormat::Alphanumeric
    }

    /// Fixed entry length, if the format has one
    pub fn length(&self) -> Option<usize> {
        match self {
            PasscodeFormat::FourDigit => Some(4),
            PasscodeFormat::SixDigit => Some(6),
            PasscodeFormat::Alphanumeric => None,
        }
    }

    /// Whether the entry UI should offer a numeric keypad
    pub fn is_numeric(&self) -> bool {
        self.length().is_some()
    }

    /// Persisted name of the format
    pub fn as_str(&self) -> &'static str {
        match self {
            PasscodeFormat::FourDigit => "fourDigit",
            PasscodeFormat::SixDigit => "sixDigit",
            PasscodeFormat::Alphanumeric => "alphanumeric",
        }
    }
}

// Unknown names fall back to alphanumeric so a record written by a newer
// version still unlocks with a free-form field.
impl From<String> for PasscodeFormat {
    fn from(s: String) -> Self {
        match s.as_str() {
            "fourDigit" | "fourDigits" => PasscodeFormat::FourDigit,
            "sixDigit" | "sixDigits" => PasscodeFormat::SixDigit,
            _ => PasscodeFormat::Alphanumeric,
        }
    }
}

impl std::fmt::Display for PasscodeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
