//! Series selector parsing
//!
//! Parses Prometheus-style label selectors into matchers.
//!
//! # Supported Syntax
//!
//! ```text
//! {name="value", name!="value", name=~"regex", name!~"regex"}
//! ```
//!
//! Braces are optional, a trailing comma is allowed and `{}` selects
//! everything. Values are double-quoted with `\"`, `\\`, `\n` and `\t`
//! escapes.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, multispace0, satisfy},
    combinator::{opt, recognize, value},
    multi::{many0_count, separated_list0},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::block::error::{StoreError, StoreResult};
use crate::store::matcher::{MatchOp, Matcher};

/// Parse a selector string into matchers
pub fn parse_selector(input: &str) -> StoreResult<Vec<Matcher>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let raw = match parse_matchers(input) {
        Ok((remaining, raw)) if remaining.trim().is_empty() => raw,
        Ok((remaining, _)) => {
            return Err(StoreError::InvalidSelector(format!(
                "Unexpected input after selector: '{}'",
                remaining.trim()
            )))
        }
        Err(e) => {
            return Err(StoreError::InvalidSelector(format!(
                "Parse error in '{}': {:?}",
                input, e
            )))
        }
    };

    raw.into_iter()
        .map(|(name, op, value)| Matcher::new(name, op, value))
        .collect()
}

/// Parse several selectors and concatenate their matchers
pub fn parse_selectors<S: AsRef<str>>(inputs: &[S]) -> StoreResult<Vec<Matcher>> {
    let mut matchers = Vec::new();
    for input in inputs {
        matchers.extend(parse_selector(input.as_ref())?);
    }
    Ok(matchers)
}

type RawMatcher<'a> = (&'a str, MatchOp, String);

fn parse_matchers(input: &str) -> IResult<&str, Vec<RawMatcher<'_>>> {
    alt((
        delimited(
            pair(char('{'), multispace0),
            matcher_list,
            pair(multispace0, char('}')),
        ),
        matcher_list,
    ))(input)
}

fn matcher_list(input: &str) -> IResult<&str, Vec<RawMatcher<'_>>> {
    let (input, list) = separated_list0(
        tuple((multispace0, char(','), multispace0)),
        single_matcher,
    )(input)?;
    let (input, _) = opt(preceded(multispace0, char(',')))(input)?;
    Ok((input, list))
}

fn single_matcher(input: &str) -> IResult<&str, RawMatcher<'_>> {
    tuple((
        label_name,
        delimited(multispace0, match_op, multispace0),
        quoted,
    ))(input)
}

fn label_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        many0_count(satisfy(|c| c.is_ascii_alphanumeric() || c == '_')),
    ))(input)
}

fn match_op(input: &str) -> IResult<&str, MatchOp> {
    alt((
        value(MatchOp::RegexMatch, tag("=~")),
        value(MatchOp::NotRegexMatch, tag("!~")),
        value(MatchOp::NotEqual, tag("!=")),
        value(MatchOp::Equal, tag("=")),
    ))(input)
}

/// Double-quoted string with backslash escapes
fn quoted(input: &str) -> IResult<&str, String> {
    let (rest, _) = char('"')(input)?;

    let mut out = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((&rest[i + 1..], out)),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, '"')) => out.push('"'),
                // Unknown escapes are kept verbatim so regex classes like \d survive
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => break,
            },
            other => out.push(other),
        }
    }

    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}
