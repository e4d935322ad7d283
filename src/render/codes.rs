//! Expected HTTP status code expansion.
//!
//! Health monitors carry their expected codes as a short expression such as
//! `200-204` or `200, 302`. Proxies differ in what they accept: some want the
//! literal codes, SEnginx only understands the `http_Nxx` classes.

use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Errors produced while expanding an expected-codes expression.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExpectedCodesError {
    #[error("invalid status code '{0}' in expected codes")]
    InvalidCode(String),
}

/// Status class a code falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusBucket {
    Http2xx,
    Http3xx,
    Http4xx,
    Http5xx,
}

impl StatusBucket {
    /// Bucket for a status code, `None` outside 200-599.
    pub fn for_code(code: u16) -> Option<Self> {
        match code {
            200..=299 => Some(Self::Http2xx),
            300..=399 => Some(Self::Http3xx),
            400..=499 => Some(Self::Http4xx),
            500..=599 => Some(Self::Http5xx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http2xx => "http_2xx",
            Self::Http3xx => "http_3xx",
            Self::Http4xx => "http_4xx",
            Self::Http5xx => "http_5xx",
        }
    }
}

impl fmt::Display for StatusBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a dialect wants expected codes rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodePolicy {
    /// Every code spelled out
    Literal,
    /// Codes collapsed into `http_Nxx` classes
    Bucketed,
}

impl CodePolicy {
    /// Expand an expression into ordered, de-duplicated tokens.
    pub fn expand(&self, expr: &str) -> Result<Vec<String>, ExpectedCodesError> {
        match self {
            CodePolicy::Literal => Ok(expand_literal(expr)?
                .into_iter()
                .map(|c| c.to_string())
                .collect()),
            CodePolicy::Bucketed => Ok(expand_bucketed(expr)?
                .into_iter()
                .map(|b| b.as_str().to_string())
                .collect()),
        }
    }
}

/// Expand a list of single codes and `low-high` ranges into the literal codes.
///
/// `"200-204"` yields 200 through 204, `"200, 203"` yields 200 and 203.
pub fn expand_literal(expr: &str) -> Result<BTreeSet<u16>, ExpectedCodesError> {
    let mut codes = BTreeSet::new();

    for token in split_tokens(expr) {
        if token.contains('-') {
            codes.extend(parse_range(token)?);
        } else {
            codes.insert(parse_code(token)?);
        }
    }

    Ok(codes)
}

/// Expand an expression into status classes.
///
/// Only one range is honoured: when the expression contains a `-`, the first
/// `low-high` pair wins and the rest is ignored. Codes outside 200-599 are
/// dropped.
pub fn expand_bucketed(expr: &str) -> Result<BTreeSet<StatusBucket>, ExpectedCodesError> {
    let first_range = split_tokens(expr).find(|t| t.contains('-'));

    let codes: Vec<u16> = if let Some(range) = first_range {
        parse_range(range)?.collect()
    } else {
        split_tokens(expr).map(parse_code).collect::<Result<_, _>>()?
    };

    Ok(codes.into_iter().filter_map(StatusBucket::for_code).collect())
}

fn split_tokens(expr: &str) -> impl Iterator<Item = &str> {
    expr.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn parse_range(expr: &str) -> Result<std::ops::RangeInclusive<u16>, ExpectedCodesError> {
    let mut parts = expr.split('-');
    let low = parse_code(parts.next().unwrap_or_default())?;
    let high = parse_code(parts.next().unwrap_or_default())?;
    Ok(low..=high)
}

fn parse_code(token: &str) -> Result<u16, ExpectedCodesError> {
    let token = token.trim();
    token
        .parse()
        .map_err(|_| ExpectedCodesError::InvalidCode(token.to_string()))
}
