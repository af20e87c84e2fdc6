use anyhow::{anyhow, Result};
use regex::Regex;
use std::{fmt, str::FromStr};

/// Number ownership rule of a backend.
///
/// * `*` matches every number
/// * `030*` matches every number starting with `030`
/// * `^0(30|40)\d+$` is a regular expression
/// * anything else must match exactly
#[derive(Clone)]
pub enum NumberPattern {
    Any,
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

impl NumberPattern {
    pub fn matches(&self, number: &str) -> bool {
        match self {
            NumberPattern::Any => true,
            NumberPattern::Exact(exact) => exact == number,
            NumberPattern::Prefix(prefix) => number.starts_with(prefix.as_str()),
            NumberPattern::Regex(re) => re.is_match(number),
        }
    }
}

impl FromStr for NumberPattern {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow!("empty number pattern"));
        }
        if s == "*" {
            return Ok(NumberPattern::Any);
        }
        if s.starts_with('^') {
            let re = Regex::new(s).map_err(|e| anyhow!("invalid number pattern {}: {}", s, e))?;
            return Ok(NumberPattern::Regex(re));
        }
        match s.strip_suffix('*') {
            Some(prefix) if !prefix.contains('*') => Ok(NumberPattern::Prefix(prefix.to_string())),
            Some(_) => Err(anyhow!("wildcard only allowed at the end: {}", s)),
            None => Ok(NumberPattern::Exact(s.to_string())),
        }
    }
}

impl fmt::Debug for NumberPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumberPattern::Any => write!(f, "*"),
            NumberPattern::Exact(exact) => write!(f, "{}", exact),
            NumberPattern::Prefix(prefix) => write!(f, "{}*", prefix),
            NumberPattern::Regex(re) => write!(f, "{}", re.as_str()),
        }
    }
}

pub fn parse_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<NumberPattern>> {
    patterns.iter().map(|p| p.as_ref().parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_kinds() -> Result<()> {
        let any: NumberPattern = "*".parse()?;
        assert!(any.matches("0891234"));

        let prefix: NumberPattern = "030*".parse()?;
        assert!(prefix.matches("030123456"));
        assert!(!prefix.matches("040123456"));

        let internal: NumberPattern = "**610".parse()?;
        assert!(internal.matches("**610"));
        assert!("0*1*".parse::<NumberPattern>().is_err());

        let exact: NumberPattern = "0891234".parse()?;
        assert!(exact.matches("0891234"));
        assert!(!exact.matches("08912345"));

        let re: NumberPattern = r"^0(30|40)\d+$".parse()?;
        assert!(re.matches("0401"));
        assert!(!re.matches("0501"));

        assert!("".parse::<NumberPattern>().is_err());
        assert!("^(".parse::<NumberPattern>().is_err());
        Ok(())
    }
}
