//! Analyzer contract
//!
//! An analyzer turns one field value into the token tuples the writer turns
//! into postings. Real linguistic analysis lives outside this crate; the two
//! analyzers here only cover exact values and whitespace-separated text.

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::columns::Value;
use crate::error::{FathomError, Result};

/// One analyzed term occurrence summary for a field value
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub text: Vec<u8>,
    pub frequency: u32,
    pub weight: f32,
    pub payload: Vec<u8>,
}

impl Token {
    pub fn new(text: impl Into<Vec<u8>>, frequency: u32) -> Self {
        Self {
            text: text.into(),
            frequency,
            weight: frequency as f32,
            payload: Vec::new(),
        }
    }
}

pub trait Analyzer: Send + Sync + Debug {
    fn analyze(&self, value: &Value) -> Result<Vec<Token>>;
}

/// Collapse repeated terms, summing frequency and weight
pub(crate) fn fold_tokens(tokens: Vec<Token>) -> Vec<Token> {
    let mut folded: BTreeMap<Vec<u8>, Token> = BTreeMap::new();
    for token in tokens {
        match folded.get_mut(&token.text) {
            Some(existing) => {
                existing.frequency += token.frequency;
                existing.weight += token.weight;
                if existing.payload.is_empty() {
                    existing.payload = token.payload;
                }
            }
            None => {
                folded.insert(token.text.clone(), token);
            }
        }
    }
    folded.into_values().collect()
}

/// Indexes the whole value as a single term
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordAnalyzer;

impl Analyzer for KeywordAnalyzer {
    fn analyze(&self, value: &Value) -> Result<Vec<Token>> {
        match value {
            Value::List(items) => {
                let mut tokens = Vec::with_capacity(items.len());
                for item in items {
                    tokens.extend(self.analyze(item)?);
                }
                Ok(fold_tokens(tokens))
            }
            other => Ok(vec![Token::new(other.sort_bytes(), 1)]),
        }
    }
}

/// Splits UTF-8 text on whitespace and lowercases each term
#[derive(Clone, Copy, Debug, Default)]
pub struct WhitespaceAnalyzer;

impl Analyzer for WhitespaceAnalyzer {
    fn analyze(&self, value: &Value) -> Result<Vec<Token>> {
        let text = value.as_str().ok_or_else(|| {
            FathomError::invalid_value(format!("whitespace analyzer expects text, got {:?}", value))
        })?;
        let tokens = text
            .split_whitespace()
            .map(|word| Token::new(word.to_lowercase().into_bytes(), 1))
            .collect();
        Ok(fold_tokens(tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_single_term() {
        let tokens = KeywordAnalyzer.analyze(&Value::text("New York")).unwrap();
        assert_eq!(tokens, vec![Token::new(b"New York".to_vec(), 1)]);
    }

    #[test]
    fn test_keyword_list_folds_duplicates() {
        let value = Value::List(vec![Value::text("b"), Value::text("a"), Value::text("b")]);
        let tokens = KeywordAnalyzer.analyze(&value).unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].text, b"a");
        assert_eq!(tokens[1].text, b"b");
        assert_eq!(tokens[1].frequency, 2);
        assert_eq!(tokens[1].weight, 2.0);
    }

    #[test]
    fn test_whitespace_counts_terms() {
        let tokens = WhitespaceAnalyzer
            .analyze(&Value::text("the cat  saw The dog"))
            .unwrap();
        let the = tokens.iter().find(|t| t.text == b"the").unwrap();
        assert_eq!(the.frequency, 2);
        assert_eq!(tokens.len(), 4);
        assert!(WhitespaceAnalyzer.analyze(&Value::Int(3)).is_err());
    }
}
