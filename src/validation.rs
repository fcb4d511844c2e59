//! Domain name syntax validation
//!
//! This module is the only gate between a caller-supplied domain string and
//! the scanner command line / result path built from it. It implements the
//! classic hostname label grammar (RFC 1035 / RFC 952 style):
//!
//! - Total length of at most 255 bytes (an empty name is accepted)
//! - Labels separated by `.`, none of them empty
//! - Each label at most 63 bytes of `a-z`, `A-Z`, `0-9` and `-`
//! - No label begins or ends with `-`
//! - The top level label does not begin with a digit
//!
//! Input is treated as raw bytes. The scan is a single left-to-right pass
//! with constant auxiliary state, and the first violated rule is reported
//! as a structured [`ValidationError`].

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Maximum accepted byte length of a whole domain name.
pub const MAX_DOMAIN_LENGTH: usize = 255;

/// Maximum accepted byte length of a single label.
pub const MAX_LABEL_LENGTH: usize = 63;

/// Where in the name a rejected label sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelPosition {
    /// Any label closed by a period.
    Label,
    /// The final label, after the last period.
    TopLevel,
}

impl fmt::Display for LabelPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelPosition::Label => f.write_str("label"),
            LabelPosition::TopLevel => f.write_str("top level domain"),
        }
    }
}

/// The first rule a rejected domain name violated.
///
/// Offsets are byte offsets into the original input. For label rules the
/// offset is the start of the offending label; for [`ValidationError::EmptyLabel`]
/// it is the offset of the period that closed the empty label.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("name length is {length}, can't exceed 255")]
    LengthExceeded { length: usize },

    #[error("invalid character '.' at offset {offset}: label can't begin with a period")]
    EmptyLabel { offset: usize },

    #[error("byte length of {position} '{label}' is {length}, can't exceed 63")]
    LabelTooLong {
        position: LabelPosition,
        label: String,
        offset: usize,
        length: usize,
    },

    #[error("{position} '{label}' at offset {offset} begins with a hyphen")]
    LabelLeadingHyphen {
        position: LabelPosition,
        label: String,
        offset: usize,
    },

    #[error("{position} '{label}' at offset {offset} ends with a hyphen")]
    LabelTrailingHyphen {
        position: LabelPosition,
        label: String,
        offset: usize,
    },

    #[error("missing top level domain, domain can't end with a period")]
    MissingTopLevelLabel { offset: usize },

    #[error("top level domain '{label}' at offset {offset} begins with a digit")]
    TopLevelLabelLeadingDigit { label: String, offset: usize },

    #[error("invalid character '{}' at offset {offset}", .character.escape_debug())]
    InvalidCharacter { character: char, offset: usize },

    #[error("invalid byte sequence at offset {offset}")]
    InvalidByteSequence { offset: usize },

    /// Only produced by [`DomainName::parse`]; [`validate`] accepts empty input.
    #[error("domain name is empty")]
    EmptyDomain,
}

impl ValidationError {
    /// Byte offset at which the violation was detected, if the rule has one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            ValidationError::LengthExceeded { .. } | ValidationError::EmptyDomain => None,
            ValidationError::EmptyLabel { offset }
            | ValidationError::LabelTooLong { offset, .. }
            | ValidationError::LabelLeadingHyphen { offset, .. }
            | ValidationError::LabelTrailingHyphen { offset, .. }
            | ValidationError::MissingTopLevelLabel { offset }
            | ValidationError::TopLevelLabelLeadingDigit { offset, .. }
            | ValidationError::InvalidCharacter { offset, .. }
            | ValidationError::InvalidByteSequence { offset } => Some(*offset),
        }
    }
}

/// Validates a domain name given as raw bytes.
///
/// Returns `Ok(())` exactly when the name satisfies every rule listed in
/// the module documentation. The input need not be UTF-8; invalid or
/// truncated multi-byte sequences are reported, never panicked on.
///
/// # Examples
///
/// ```
/// use cmsgate::validation::{validate, ValidationError};
///
/// assert!(validate(b"ma.rkus.io").is_ok());
/// assert_eq!(
///     validate(b"example..com"),
///     Err(ValidationError::EmptyLabel { offset: 8 })
/// );
/// ```
pub fn validate(name: &[u8]) -> Result<(), ValidationError> {
    // An empty name means a cookie without a domain restriction.
    if name.is_empty() {
        return Ok(());
    }
    if name.len() > MAX_DOMAIN_LENGTH {
        return Err(ValidationError::LengthExceeded { length: name.len() });
    }

    let mut start = 0;
    for (i, &b) in name.iter().enumerate() {
        if b == b'.' {
            if i == start {
                return Err(ValidationError::EmptyLabel { offset: i });
            }
            check_label(name, start, i, LabelPosition::Label)?;
            start = i + 1;
            continue;
        }
        // Ordered by decreasing frequency in real names.
        if !(b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b.is_ascii_uppercase())
        {
            return Err(invalid_character(name, i));
        }
    }

    if start == name.len() {
        return Err(ValidationError::MissingTopLevelLabel { offset: start });
    }
    check_label(name, start, name.len(), LabelPosition::TopLevel)?;
    if name[start].is_ascii_digit() {
        return Err(ValidationError::TopLevelLabelLeadingDigit {
            label: label_text(&name[start..]),
            offset: start,
        });
    }

    Ok(())
}

/// Validates a domain name given as text. See [`validate`].
pub fn validate_domain(domain: &str) -> Result<(), ValidationError> {
    validate(domain.as_bytes())
}

/// Length and hyphen rules for the non-empty label `name[start..end]`.
fn check_label(
    name: &[u8],
    start: usize,
    end: usize,
    position: LabelPosition,
) -> Result<(), ValidationError> {
    let label = &name[start..end];

    if label.len() > MAX_LABEL_LENGTH {
        return Err(ValidationError::LabelTooLong {
            position,
            label: label_text(label),
            offset: start,
            length: label.len(),
        });
    }
    if label[0] == b'-' {
        return Err(ValidationError::LabelLeadingHyphen {
            position,
            label: label_text(label),
            offset: start,
        });
    }
    if label[label.len() - 1] == b'-' {
        return Err(ValidationError::LabelTrailingHyphen {
            position,
            label: label_text(label),
            offset: start,
        });
    }

    Ok(())
}

// Labels reaching the label checks have already passed the character scan,
// so they are plain ASCII.
fn label_text(label: &[u8]) -> String {
    String::from_utf8_lossy(label).into_owned()
}

/// Decodes the scalar value starting at `offset` for the diagnostic.
fn invalid_character(name: &[u8], offset: usize) -> ValidationError {
    let end = name.len().min(offset + 4);
    let window = &name[offset..end];

    let valid = match std::str::from_utf8(window) {
        Ok(text) => text,
        Err(e) => std::str::from_utf8(&window[..e.valid_up_to()]).unwrap_or_default(),
    };

    match valid.chars().next() {
        Some(character) => ValidationError::InvalidCharacter { character, offset },
        None => ValidationError::InvalidByteSequence { offset },
    }
}

/// A domain name that passed [`validate`] and is not empty.
///
/// Holding a `DomainName` guarantees the text consists only of ASCII
/// letters, digits, `-` and `.`, is at most 255 bytes long and has a
/// well-formed label structure. Code that interpolates a domain into a
/// process argument or a filesystem path takes this type, not `&str`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainName(String);

impl DomainName {
    /// Validates `name` and wraps it.
    ///
    /// Unlike [`validate`], an empty input is rejected with
    /// [`ValidationError::EmptyDomain`]: there is nothing to scan.
    pub fn parse(name: impl AsRef<[u8]>) -> Result<Self, ValidationError> {
        let bytes = name.as_ref();
        if bytes.is_empty() {
            return Err(ValidationError::EmptyDomain);
        }
        validate(bytes)?;

        let text = std::str::from_utf8(bytes).map_err(|e| ValidationError::InvalidByteSequence {
            offset: e.valid_up_to(),
        })?;
        Ok(Self(text.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Labels in order, top level label last.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    pub fn top_level_label(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for DomainName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
