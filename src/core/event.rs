//! Canonical keystroke events and the key-label vocabulary.
//!
//! Privacy: a label names ONE physical key (or a coarse class of keys). The
//! vocabulary is closed: anything outside it is recorded as `unknown`, never
//! as the native key code or character.

use crate::collector::types::RawKey;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How much key identity is retained in a label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelPolicy {
    /// Letters and digits keep their identity, punctuation gets named tokens.
    #[default]
    Exact,
    /// Letters, digits and punctuation collapse to `letter`, `digit`, `punct`.
    CharacterClass,
}

impl FromStr for LabelPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Ok(LabelPolicy::Exact),
            "character-class" | "class" => Ok(LabelPolicy::CharacterClass),
            other => Err(format!("unknown label policy: {other}")),
        }
    }
}

/// Punctuation keys on a US layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Punctuation {
    Comma,
    Period,
    Slash,
    Semicolon,
    Quote,
    Minus,
    Equal,
    LeftBracket,
    RightBracket,
    Backslash,
    Grave,
}

impl Punctuation {
    const ALL: [Punctuation; 11] = [
        Punctuation::Comma,
        Punctuation::Period,
        Punctuation::Slash,
        Punctuation::Semicolon,
        Punctuation::Quote,
        Punctuation::Minus,
        Punctuation::Equal,
        Punctuation::LeftBracket,
        Punctuation::RightBracket,
        Punctuation::Backslash,
        Punctuation::Grave,
    ];

    /// The physical key behind a (possibly shifted) punctuation character.
    fn from_char(c: char) -> Option<Self> {
        match c {
            ',' | '<' => Some(Punctuation::Comma),
            '.' | '>' => Some(Punctuation::Period),
            '/' | '?' => Some(Punctuation::Slash),
            ';' | ':' => Some(Punctuation::Semicolon),
            '\'' | '"' => Some(Punctuation::Quote),
            '-' | '_' => Some(Punctuation::Minus),
            '=' | '+' => Some(Punctuation::Equal),
            '[' | '{' => Some(Punctuation::LeftBracket),
            ']' | '}' => Some(Punctuation::RightBracket),
            '\\' | '|' => Some(Punctuation::Backslash),
            '`' | '~' => Some(Punctuation::Grave),
            _ => None,
        }
    }

    fn token(self) -> &'static str {
        match self {
            Punctuation::Comma => "comma",
            Punctuation::Period => "period",
            Punctuation::Slash => "slash",
            Punctuation::Semicolon => "semicolon",
            Punctuation::Quote => "quote",
            Punctuation::Minus => "minus",
            Punctuation::Equal => "equal",
            Punctuation::LeftBracket => "lbracket",
            Punctuation::RightBracket => "rbracket",
            Punctuation::Backslash => "backslash",
            Punctuation::Grave => "grave",
        }
    }
}

/// A label from the fixed key vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyLabel {
    /// `a`-`z` or `0`-`9`
    Char(char),
    Punct(Punctuation),
    Space,
    Enter,
    Backspace,
    Tab,
    Shift,
    Ctrl,
    Cmd,
    Alt,
    Esc,
    Delete,
    /// Character-class tokens
    Letter,
    Digit,
    AnyPunct,
    Unknown,
}

impl KeyLabel {
    /// Map a raw key to a label. Total: every input has exactly one label.
    pub fn from_raw(key: RawKey, policy: LabelPolicy) -> Self {
        let exact = match key {
            RawKey::Char(c) => Self::from_char(c),
            RawKey::Space => KeyLabel::Space,
            RawKey::Enter => KeyLabel::Enter,
            RawKey::Backspace => KeyLabel::Backspace,
            RawKey::Tab => KeyLabel::Tab,
            RawKey::Shift => KeyLabel::Shift,
            RawKey::Control => KeyLabel::Ctrl,
            RawKey::Command => KeyLabel::Cmd,
            RawKey::Alt => KeyLabel::Alt,
            RawKey::Escape => KeyLabel::Esc,
            RawKey::Delete => KeyLabel::Delete,
            RawKey::Unmapped => KeyLabel::Unknown,
        };
        match policy {
            LabelPolicy::Exact => exact,
            LabelPolicy::CharacterClass => exact.coarsen(),
        }
    }

    /// Map a typed character to the label of its physical key.
    fn from_char(c: char) -> Self {
        let lower = c.to_ascii_lowercase();
        if lower.is_ascii_lowercase() || lower.is_ascii_digit() {
            return KeyLabel::Char(lower);
        }
        // Shifted digits on a US layout
        if let Some(pos) = ")!@#$%^&*(".find(c) {
            return KeyLabel::Char(char::from(b'0' + pos as u8));
        }
        match c {
            ' ' => KeyLabel::Space,
            '\n' | '\r' => KeyLabel::Enter,
            '\t' => KeyLabel::Tab,
            _ => Punctuation::from_char(c).map_or(KeyLabel::Unknown, KeyLabel::Punct),
        }
    }

    /// Collapse per-key identity into a character class.
    pub fn coarsen(self) -> Self {
        match self {
            KeyLabel::Char(c) if c.is_ascii_digit() => KeyLabel::Digit,
            KeyLabel::Char(_) => KeyLabel::Letter,
            KeyLabel::Punct(_) => KeyLabel::AnyPunct,
            other => other,
        }
    }

    pub fn is_backspace(self) -> bool {
        self == KeyLabel::Backspace
    }
}

impl fmt::Display for KeyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            KeyLabel::Char(c) => return write!(f, "{c}"),
            KeyLabel::Punct(p) => p.token(),
            KeyLabel::Space => "space",
            KeyLabel::Enter => "enter",
            KeyLabel::Backspace => "backspace",
            KeyLabel::Tab => "tab",
            KeyLabel::Shift => "shift",
            KeyLabel::Ctrl => "ctrl",
            KeyLabel::Cmd => "cmd",
            KeyLabel::Alt => "alt",
            KeyLabel::Esc => "esc",
            KeyLabel::Delete => "delete",
            KeyLabel::Letter => "letter",
            KeyLabel::Digit => "digit",
            KeyLabel::AnyPunct => "punct",
            KeyLabel::Unknown => "unknown",
        };
        f.write_str(token)
    }
}

/// Error for tokens outside the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised key label: {0:?}")]
pub struct UnknownLabel(pub String);

impl FromStr for KeyLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = match s {
            "space" => KeyLabel::Space,
            "enter" => KeyLabel::Enter,
            "backspace" => KeyLabel::Backspace,
            "tab" => KeyLabel::Tab,
            "shift" => KeyLabel::Shift,
            "ctrl" => KeyLabel::Ctrl,
            "cmd" => KeyLabel::Cmd,
            "alt" => KeyLabel::Alt,
            "esc" => KeyLabel::Esc,
            "delete" => KeyLabel::Delete,
            "letter" => KeyLabel::Letter,
            "digit" => KeyLabel::Digit,
            "punct" => KeyLabel::AnyPunct,
            "unknown" => KeyLabel::Unknown,
            // Older logs spelled unmapped keys as `key_<name>`
            _ if s.starts_with("key_") => KeyLabel::Unknown,
            _ => {
                if let Some(p) = Punctuation::ALL.iter().find(|p| p.token() == s) {
                    return Ok(KeyLabel::Punct(*p));
                }
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => match Self::from_char(c) {
                        KeyLabel::Unknown => return Err(UnknownLabel(s.to_string())),
                        label => label,
                    },
                    _ => return Err(UnknownLabel(s.to_string())),
                }
            }
        };
        Ok(label)
    }
}

/// One normalized key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeystrokeEvent {
    /// Local wall-clock time, millisecond precision
    pub timestamp: NaiveDateTime,
    /// Label from the fixed vocabulary
    pub key_label: KeyLabel,
    /// Milliseconds since the previous event; `None` at session start
    pub interval_ms: Option<u64>,
    /// Derived from `key_label`
    pub is_backspace: bool,
}

impl KeystrokeEvent {
    pub fn new(timestamp: NaiveDateTime, key_label: KeyLabel, interval_ms: Option<u64>) -> Self {
        Self {
            timestamp,
            key_label,
            interval_ms,
            is_backspace: key_label.is_backspace(),
        }
    }

    /// Local calendar date of the event; selects its daily log file.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alphanumerics_pass_through_lowercase() {
        assert_eq!(
            KeyLabel::from_raw(RawKey::Char('A'), LabelPolicy::Exact),
            KeyLabel::Char('a')
        );
        assert_eq!(
            KeyLabel::from_raw(RawKey::Char('7'), LabelPolicy::Exact),
            KeyLabel::Char('7')
        );
        assert_eq!(KeyLabel::Char('a').to_string(), "a");
    }

    #[test]
    fn test_shifted_characters_map_to_physical_key() {
        assert_eq!(KeyLabel::from_char('!'), KeyLabel::Char('1'));
        assert_eq!(KeyLabel::from_char(')'), KeyLabel::Char('0'));
        assert_eq!(KeyLabel::from_char('?'), KeyLabel::Punct(Punctuation::Slash));
        assert_eq!(KeyLabel::from_char('<').to_string(), "comma");
    }

    #[test]
    fn test_unmapped_keys_become_unknown() {
        assert_eq!(
            KeyLabel::from_raw(RawKey::Unmapped, LabelPolicy::Exact),
            KeyLabel::Unknown
        );
        assert_eq!(
            KeyLabel::from_raw(RawKey::Char('é'), LabelPolicy::Exact),
            KeyLabel::Unknown
        );
    }

    #[test]
    fn test_character_class_policy_hides_identity() {
        let policy = LabelPolicy::CharacterClass;
        assert_eq!(KeyLabel::from_raw(RawKey::Char('q'), policy), KeyLabel::Letter);
        assert_eq!(KeyLabel::from_raw(RawKey::Char('4'), policy), KeyLabel::Digit);
        assert_eq!(KeyLabel::from_raw(RawKey::Char(';'), policy), KeyLabel::AnyPunct);
        assert_eq!(
            KeyLabel::from_raw(RawKey::Backspace, policy),
            KeyLabel::Backspace
        );
    }

    #[test]
    fn test_tokens_parse_back() {
        let labels = [
            KeyLabel::Char('z'),
            KeyLabel::Char('5'),
            KeyLabel::Punct(Punctuation::Grave),
            KeyLabel::Space,
            KeyLabel::Backspace,
            KeyLabel::Cmd,
            KeyLabel::Letter,
            KeyLabel::AnyPunct,
            KeyLabel::Unknown,
        ];
        for label in labels {
            assert_eq!(label.to_string().parse::<KeyLabel>(), Ok(label));
        }
    }

    #[test]
    fn test_legacy_tokens() {
        assert_eq!(",".parse::<KeyLabel>(), Ok(KeyLabel::Punct(Punctuation::Comma)));
        assert_eq!("key_Key.f1".parse::<KeyLabel>(), Ok(KeyLabel::Unknown));
        assert!("hello".parse::<KeyLabel>().is_err());
    }

    #[test]
    fn test_backspace_flag_is_derived() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        assert!(KeystrokeEvent::new(ts, KeyLabel::Backspace, None).is_backspace);
        assert!(!KeystrokeEvent::new(ts, KeyLabel::Delete, Some(3)).is_backspace);
    }

    #[test]
    fn test_label_policy_parsing() {
        assert_eq!("exact".parse::<LabelPolicy>(), Ok(LabelPolicy::Exact));
        assert_eq!(
            "character-class".parse::<LabelPolicy>(),
            Ok(LabelPolicy::CharacterClass)
        );
        assert!("words".parse::<LabelPolicy>().is_err());
    }
}
