//! Recovery phrases.
//!
//! A recovery phrase is a 12-word BIP39 mnemonic (English word list, 128
//! bits of entropy plus checksum). It is shown to the survey owner once at
//! setup time and never stored; only a `first...last` hint is kept.

use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Number of words in a recovery phrase.
pub const PHRASE_WORDS: usize = 12;

/// A validated 12-word recovery phrase.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RecoveryPhrase {
    words: Vec<String>,
}

impl RecoveryPhrase {
    /// Generates a fresh phrase from 128 bits of OS randomness.
    pub fn generate() -> CryptoResult<Self> {
        let mut entropy = Zeroizing::new([0u8; 16]);
        rand::rng().fill_bytes(&mut entropy[..]);

        let mnemonic = bip39::Mnemonic::from_entropy(&entropy[..])
            .map_err(|e| CryptoError::KeyDerivation(format!("mnemonic generation failed: {e}")))?;
        let phrase = Zeroizing::new(mnemonic.to_string());

        Ok(Self {
            words: phrase.split_whitespace().map(str::to_owned).collect(),
        })
    }

    /// Parses and validates a phrase typed by a user.
    ///
    /// Case and surrounding/internal whitespace are normalized. The phrase
    /// must have exactly twelve words from the word list and a valid
    /// checksum.
    pub fn parse(phrase: &str) -> CryptoResult<Self> {
        let normalized = normalize_phrase(phrase);
        let count = normalized.split(' ').filter(|w| !w.is_empty()).count();
        if count != PHRASE_WORDS {
            return Err(CryptoError::InvalidRecoveryPhrase(format!(
                "expected {PHRASE_WORDS} words, got {count}"
            )));
        }

        bip39::Mnemonic::parse_normalized(&normalized)
            .map_err(|e| CryptoError::InvalidRecoveryPhrase(e.to_string()))?;

        Ok(Self {
            words: normalized.split(' ').map(str::to_owned).collect(),
        })
    }

    /// Builds a phrase from exactly twelve words, validating them.
    pub fn from_words(words: &[String; PHRASE_WORDS]) -> CryptoResult<Self> {
        let joined = Zeroizing::new(words.join(" "));
        Self::parse(&joined)
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// The phrase as the single-spaced lowercase string fed to the KDF.
    pub fn expose(&self) -> Zeroizing<String> {
        Zeroizing::new(self.words.join(" "))
    }

    /// The displayable hint: first and last word only.
    pub fn hint(&self) -> String {
        recovery_hint(&self.words)
    }
}

impl fmt::Debug for RecoveryPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecoveryPhrase({})", self.hint())
    }
}

/// Formats `first...last`. Never includes any middle word.
pub fn recovery_hint(words: &[String]) -> String {
    match (words.first(), words.last()) {
        (Some(first), Some(last)) => format!("{first}...{last}"),
        _ => String::new(),
    }
}

/// Lowercases and collapses whitespace so that the same phrase typed with
/// different spacing or capitalisation derives the same key.
pub fn normalize_phrase(phrase: &str) -> Zeroizing<String> {
    Zeroizing::new(
        phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" "),
    )
}
