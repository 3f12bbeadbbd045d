//! `key="value"` argument strings, as passed to module loads and used for
//! `*_properties` lists.

use crate::error::CoreError;
use std::collections::BTreeMap;

/// Parsed module arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModArgs {
    values: BTreeMap<String, String>,
}

impl ModArgs {
    /// Parse `args`, rejecting keys not listed in `valid`.
    pub fn parse(args: &str, valid: &[&str]) -> Result<Self, CoreError> {
        let mut values = BTreeMap::new();
        for (key, value) in tokenize(args)? {
            if !valid.contains(&key.as_str()) {
                return Err(CoreError::BadModuleArgs(format!("unknown key '{}'", key)));
            }
            values.insert(key, value);
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_u32(&self, key: &str) -> Result<Option<u32>, CoreError> {
        self.get(key)
            .map(|v| {
                v.parse::<u32>().map_err(|_| {
                    CoreError::BadModuleArgs(format!("{} expects an unsigned integer, got '{}'", key, v))
                })
            })
            .transpose()
    }

    pub fn get_i32(&self, key: &str) -> Result<Option<i32>, CoreError> {
        self.get(key)
            .map(|v| {
                v.parse::<i32>().map_err(|_| {
                    CoreError::BadModuleArgs(format!("{} expects an integer, got '{}'", key, v))
                })
            })
            .transpose()
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, CoreError> {
        self.get(key)
            .map(|v| match v {
                "1" | "yes" | "true" | "on" | "y" | "t" => Ok(true),
                "0" | "no" | "false" | "off" | "n" | "f" => Ok(false),
                other => Err(CoreError::BadModuleArgs(format!(
                    "{} expects a boolean, got '{}'",
                    key, other
                ))),
            })
            .transpose()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Split `input` into `key=value` pairs. Values may be wrapped in single or
/// double quotes; a backslash escapes the next character inside quotes.
pub fn tokenize(input: &str) -> Result<Vec<(String, String)>, CoreError> {
    let mut pairs = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        loop {
            match chars.next() {
                Some('=') => break,
                Some(c) if c.is_whitespace() => {
                    return Err(CoreError::BadModuleArgs(format!("missing '=' after '{}'", key)))
                }
                Some(c) => key.push(c),
                None => {
                    return Err(CoreError::BadModuleArgs(format!("missing '=' after '{}'", key)))
                }
            }
        }
        if key.is_empty() {
            return Err(CoreError::BadModuleArgs("empty key".to_string()));
        }

        let mut value = String::new();
        match chars.peek().copied() {
            Some(quote @ ('"' | '\'')) => {
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == '\\' {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    } else if c == quote {
                        closed = true;
                        break;
                    } else {
                        value.push(c);
                    }
                }
                if !closed {
                    return Err(CoreError::BadModuleArgs(format!(
                        "unterminated quote in value of '{}'",
                        key
                    )));
                }
            }
            _ => {
                while let Some(c) = chars.peek().copied() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }
        }

        pairs.push((key, value));
    }

    Ok(pairs)
}
