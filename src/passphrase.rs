//! Diceware-style passphrase generation.
//!
//! Words are drawn independently and with replacement from [`WORDLIST`]
//! using the operating system's random source, then joined with
//! [`PASSPHRASE_SEPARATOR`].

use rand::rngs::OsRng;
use rand::seq::SliceRandom;

use crate::config::{PASSPHRASE_SEPARATOR, PASSPHRASE_WORDS};
use crate::error::{Error, Result};
use crate::secret::Passphrase;
use crate::wordlist::WORDLIST;

#[derive(Clone, Copy, Debug)]
pub struct PassphraseGenerator {
    words: usize,
}

impl Default for PassphraseGenerator {
    fn default() -> Self {
        Self { words: PASSPHRASE_WORDS }
    }
}

impl PassphraseGenerator {
    pub fn new(words: usize) -> Result<Self> {
        if words == 0 {
            return Err(Error::validation("passphrase needs at least one word"));
        }
        Ok(Self { words })
    }

    #[inline]
    pub fn words(&self) -> usize {
        self.words
    }

    pub fn generate(&self) -> Passphrase {
        let mut rng = OsRng;
        let mut phrase = String::with_capacity(self.words * 7);

        for i in 0..self.words {
            if i > 0 {
                phrase.push(PASSPHRASE_SEPARATOR);
            }
            // WORDLIST is a non-empty constant, so `choose` always yields.
            if let Some(word) = WORDLIST.choose(&mut rng) {
                phrase.push_str(word);
            }
        }

        Passphrase::from_string(phrase)
    }
}
