use anyhow::{anyhow, Result};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, hex_digit1, multispace1, not_line_ending, u64 as dec_u64},
    combinator::{map, map_res},
    sequence::preceded,
    IResult,
};

use crate::addr::WordAddr;

/// An ordered word-address reference stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceData {
    addrs: Vec<WordAddr>,
}

impl TraceData {
    /// Parses addresses separated by whitespace or commas. Decimal and `0x`
    /// hexadecimal forms are accepted; `#` starts a line comment.
    pub fn parse(src: &str) -> Result<Self> {
        let mut addrs = Vec::new();
        let mut rest = src;
        loop {
            rest = skip_separators(rest);
            if rest.is_empty() {
                break;
            }
            let (r, v) = word_addr(rest).map_err(|n| anyhow!("failed to parse trace: {n}"))?;
            addrs.push(WordAddr::new(v));
            rest = r;
        }
        Ok(Self { addrs })
    }

    pub fn addrs(&self) -> &[WordAddr] {
        &self.addrs
    }

    pub fn into_addrs(self) -> Vec<WordAddr> {
        self.addrs
    }

    pub fn extend(&mut self, other: TraceData) {
        self.addrs.extend(other.addrs);
    }
}

fn skip_separators(mut input: &str) -> &str {
    while let Ok((rest, ())) = separator(input) {
        input = rest;
    }
    input
}

fn separator(input: &str) -> IResult<&str, ()> {
    alt((map(multispace1, |_| ()), map(char(','), |_| ()), comment))(input)
}

fn comment(input: &str) -> IResult<&str, ()> {
    let (input, _) = char('#')(input)?;
    let (input, _) = not_line_ending(input)?;
    Ok((input, ()))
}

fn hex_addr(input: &str) -> IResult<&str, u64> {
    map_res(preceded(tag("0x"), hex_digit1), |digits| {
        u64::from_str_radix(digits, 16)
    })(input)
}

fn word_addr(input: &str) -> IResult<&str, u64> {
    alt((hex_addr, dec_u64))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(v: &[u64]) -> Vec<WordAddr> {
        v.iter().copied().map(WordAddr::new).collect()
    }

    #[test]
    fn parses_comma_and_whitespace_separated_addresses() {
        let t = TraceData::parse("5,6 5\t7\n5").unwrap();
        assert_eq!(t.addrs(), addrs(&[5, 6, 5, 7, 5]));
    }

    #[test]
    fn parses_hex_addresses() {
        let t = TraceData::parse("0x10 16, 0xff").unwrap();
        assert_eq!(t.addrs(), addrs(&[16, 16, 255]));
    }

    #[test]
    fn skips_line_comments() {
        let t = TraceData::parse("# warm-up\n3 180 # the hot loop\n43 2\n").unwrap();
        assert_eq!(t.addrs(), addrs(&[3, 180, 43, 2]));
    }

    #[test]
    fn empty_input_is_an_empty_trace() {
        assert_eq!(TraceData::parse("  \n ").unwrap(), TraceData::default());
    }

    #[test]
    fn rejects_junk() {
        assert!(TraceData::parse("3 four 5").is_err());
        assert!(TraceData::parse("-1").is_err());
    }
}
