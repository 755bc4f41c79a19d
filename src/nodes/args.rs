//! Filter argument strings.
//!
//! Arguments use the `key=value:key=value` form. Leading values without a
//! key are positional and map to the filter's option order, so
//! `volume=0.5` and `0.5` mean the same thing for the volume filter.

use core::str::FromStr;

use crate::error::FilterError;

/// Parsed arguments of one filter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterArgs {
    filter: String,
    values: Vec<(String, String)>,
}

impl FilterArgs {
    /// Parse `args` for `filter`, assigning positional values to `positional` in order.
    pub fn parse(filter: &str, args: &str, positional: &[&str]) -> Result<Self, FilterError> {
        let mut parsed = Self {
            filter: filter.to_string(),
            values: Vec::new(),
        };
        let mut named_seen = false;

        for (i, part) in args.split(':').map(str::trim).filter(|p| !p.is_empty()).enumerate() {
            let (key, value) = match part.split_once('=') {
                Some((key, value)) => {
                    named_seen = true;
                    (key.trim().to_string(), value.trim().to_string())
                }
                None => {
                    if named_seen {
                        return Err(parsed.invalid(format!("positional value {:?} after named option", part)));
                    }
                    let key = positional
                        .get(i)
                        .ok_or_else(|| parsed.invalid(format!("unexpected value {:?}", part)))?;
                    (key.to_string(), part.to_string())
                }
            };

            if key.is_empty() {
                return Err(parsed.invalid(format!("empty option name in {:?}", part)));
            }
            if parsed.values.iter().any(|(k, _)| *k == key) {
                return Err(parsed.invalid(format!("option {} given twice", key)));
            }
            parsed.values.push((key, value));
        }

        Ok(parsed)
    }

    /// Remove and return the value of the first key present among `keys`.
    pub fn take(&mut self, keys: &[&str]) -> Option<String> {
        let pos = self.values.iter().position(|(k, _)| keys.contains(&k.as_str()))?;
        Some(self.values.remove(pos).1)
    }

    /// Like [`take`](Self::take), parsing the value.
    pub fn take_parsed<T: FromStr>(&mut self, keys: &[&str]) -> Result<Option<T>, FilterError> {
        match self.take(keys) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(format!("invalid value {:?} for {}", raw, keys[0]))),
            None => Ok(None),
        }
    }

    /// Like [`take_parsed`](Self::take_parsed), failing if the option is missing.
    pub fn require<T: FromStr>(&mut self, keys: &[&str]) -> Result<T, FilterError> {
        self.take_parsed(keys)?
            .ok_or_else(|| self.invalid(format!("missing option {}", keys[0])))
    }

    /// Fail if any option was not consumed.
    pub fn finish(self) -> Result<(), FilterError> {
        match self.values.first() {
            Some((key, _)) => Err(self.invalid(format!("option {} not found", key))),
            None => Ok(()),
        }
    }

    pub fn invalid(&self, reason: impl Into<String>) -> FilterError {
        FilterError::InvalidArgument {
            filter: self.filter.clone(),
            reason: reason.into(),
        }
    }
}
