use alloc::borrow::ToOwned;
use alloc::string::String;
use alloc::vec::Vec;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{FileSeedStore, SeedStore, TokenGenerator};
use crate::{IdentityToken, TokenError};

/// Walks from the left end of the word to the right end.
const SCAN: char = '#';
/// Carries an increment from the right end towards the left.
const CARRY: char = '%';

// -----------------------------------------------------------------------------
// RewriteRule

/// A single `pattern -> replacement` production.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    pattern: String,
    replacement: String,
    terminal: bool,
}

impl RewriteRule {
    /// A production after which rewriting continues.
    #[inline]
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
            terminal: false,
        }
    }

    /// A production after which rewriting stops.
    #[inline]
    pub fn terminal(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            terminal: true,
            ..Self::new(pattern, replacement)
        }
    }

    #[inline]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[inline]
    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }
}

// -----------------------------------------------------------------------------
// RewriteRules

/// An ordered rule set applied as a Markov normal algorithm.
///
/// One step picks the **first** rule whose pattern occurs in the word and
/// replaces the **leftmost** occurrence. Rewriting stops after a terminal
/// rule fires or when no pattern occurs at all. An empty pattern occurs at
/// the start of every word.
///
/// Marker characters used by the rules are declared as *reserved*; they may
/// appear neither in a seed nor in a finished word.
///
/// # Examples
///
/// ```
/// use vc_ident::RewriteRules;
///
/// let rules = RewriteRules::increment("0123456789").unwrap();
/// assert_eq!(rules.rewrite("41").unwrap(), "42");
/// assert_eq!(rules.rewrite("99").unwrap(), "100");
/// ```
#[derive(Debug, Clone)]
pub struct RewriteRules {
    rules: Vec<RewriteRule>,
    reserved: Vec<char>,
    max_steps: usize,
}

impl RewriteRules {
    pub const DEFAULT_MAX_STEPS: usize = 1 << 16;

    /// Creates a rule set from productions in priority order.
    #[inline]
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self {
            rules,
            reserved: Vec::new(),
            max_steps: Self::DEFAULT_MAX_STEPS,
        }
    }

    /// Declares marker characters that must not survive rewriting.
    #[inline]
    #[must_use]
    pub fn with_reserved(mut self, reserved: impl IntoIterator<Item = char>) -> Self {
        self.reserved.extend(reserved);
        self
    }

    /// Bounds the number of steps a single rewrite may take.
    #[inline]
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Builds the rules that count upwards in the positional system whose
    /// digits are the characters of `alphabet`, smallest digit first.
    ///
    /// Every rewrite yields a word that orders strictly after its input
    /// under [`IdentityToken`]'s shortlex order.
    pub fn increment(alphabet: &str) -> Result<Self, TokenError> {
        let digits: Vec<char> = alphabet.chars().collect();
        let invalid = |reason| TokenError::InvalidAlphabet {
            alphabet: alphabet.to_owned(),
            reason,
        };

        if digits.len() < 2 {
            return Err(invalid("at least two digits are required"));
        }
        if digits.iter().any(|&c| c == SCAN || c == CARRY || c.is_whitespace()) {
            return Err(invalid("digits must not be whitespace or rewrite markers"));
        }
        for (i, c) in digits.iter().enumerate() {
            if digits[..i].contains(c) {
                return Err(invalid("digits must be distinct"));
            }
        }

        let zero = digits[0];
        let one = digits[1];
        let max = digits[digits.len() - 1];
        let mut rules = Vec::with_capacity(digits.len() * 2 + 4);

        // Resolve a pending carry: bump the digit left of it ...
        for pair in digits.windows(2) {
            rules.push(RewriteRule::terminal(
                format!("{}{CARRY}", pair[0]),
                pair[1].to_string(),
            ));
        }
        // ... or turn a maximal digit into zero and move the carry on ...
        rules.push(RewriteRule::new(
            format!("{max}{CARRY}"),
            format!("{CARRY}{zero}"),
        ));
        // ... or, having run off the left end, grow the word.
        rules.push(RewriteRule::terminal(CARRY.to_string(), one.to_string()));

        // Move the scanner to the right end, then turn it into a carry.
        for &digit in &digits {
            rules.push(RewriteRule::new(
                format!("{SCAN}{digit}"),
                format!("{digit}{SCAN}"),
            ));
        }
        rules.push(RewriteRule::new(SCAN.to_string(), CARRY.to_string()));

        // Nothing else applies to a plain number: start scanning.
        rules.push(RewriteRule::new("", SCAN.to_string()));

        Ok(Self::new(rules).with_reserved([SCAN, CARRY]))
    }

    /// Returns the productions in priority order.
    #[inline]
    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    fn check(&self, seed: &str, word: &str) -> Result<(), TokenError> {
        if word.is_empty() || word.contains(self.reserved.as_slice()) {
            return Err(TokenError::InvalidSeed {
                seed: seed.to_owned(),
            });
        }
        Ok(())
    }

    /// Rewrites `seed` until a terminal rule fires or no rule applies.
    pub fn rewrite(&self, seed: &str) -> Result<String, TokenError> {
        self.check(seed, seed)?;

        let mut word = seed.to_owned();
        for _ in 0..self.max_steps {
            let Some(rule) = self.rules.iter().find(|rule| word.contains(rule.pattern.as_str())) else {
                self.check(seed, &word)?;
                return Ok(word);
            };

            word = word.replacen(rule.pattern.as_str(), &rule.replacement, 1);

            if rule.terminal {
                self.check(seed, &word)?;
                return Ok(word);
            }
        }

        Err(TokenError::RewriteDiverged {
            seed: seed.to_owned(),
            steps: self.max_steps,
        })
    }
}

// -----------------------------------------------------------------------------
// RewriteGenerator

struct RewriteState {
    current: String,
    poisoned: bool,
}

/// Generates tokens by rewriting a seed string, persisting every step.
///
/// Each call returns the current seed as a token, after the *next* seed has
/// been written to the [`SeedStore`]. A crash right after generation can
/// therefore never make the generator reissue a token it handed out.
///
/// If the store fails, the call returns [`TokenError::Persistence`] and every
/// later call returns [`TokenError::Poisoned`]: a token whose successor is not
/// durable cannot be guaranteed unique after a restart.
///
/// # Examples
///
/// ```
/// use vc_ident::{MemorySeedStore, RewriteGenerator, RewriteRules, TokenGenerator};
///
/// let rules = RewriteRules::increment("0123456789abcdef").unwrap();
/// let generator = RewriteGenerator::open(rules, MemorySeedStore::new(), "f").unwrap();
///
/// assert_eq!(generator.next_token().unwrap().as_str(), "f");
/// assert_eq!(generator.next_token().unwrap().as_str(), "10");
/// assert_eq!(generator.store().current().as_deref(), Some("11"));
/// ```
pub struct RewriteGenerator<S: SeedStore = FileSeedStore> {
    rules: RewriteRules,
    store: S,
    state: Mutex<RewriteState>,
}

impl<S: SeedStore> RewriteGenerator<S> {
    /// Resumes from the seed in `store`, or starts at `initial_seed` if the
    /// store is empty.
    pub fn open(rules: RewriteRules, store: S, initial_seed: &str) -> Result<Self, TokenError> {
        let current = match store.load().map_err(TokenError::Persistence)? {
            Some(seed) => seed,
            None => initial_seed.to_owned(),
        };

        IdentityToken::new(&current)?;
        rules.check(&current, &current)?;

        log::debug!("token rewriting resumes at seed `{current}`");

        Ok(Self {
            rules,
            store,
            state: Mutex::new(RewriteState {
                current,
                poisoned: false,
            }),
        })
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, RewriteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the seed the next token will be made from.
    pub fn current_seed(&self) -> String {
        self.lock().current.clone()
    }

    /// Returns `true` after a persistence failure.
    pub fn is_poisoned(&self) -> bool {
        self.lock().poisoned
    }

    #[inline]
    pub fn rules(&self) -> &RewriteRules {
        &self.rules
    }

    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: SeedStore> TokenGenerator for RewriteGenerator<S> {
    fn next_token(&self) -> Result<IdentityToken, TokenError> {
        let mut state = self.lock();
        if state.poisoned {
            return Err(TokenError::Poisoned);
        }

        let token = IdentityToken::new(&state.current)?;
        let next = self.rules.rewrite(&state.current)?;

        if IdentityToken::new(&next)? <= token {
            return Err(TokenError::NonMonotonic {
                current: state.current.clone(),
                next,
            });
        }

        if let Err(e) = self.store.store(&next) {
            state.poisoned = true;
            log::error!("token generator poisoned, seed `{next}` could not be persisted: {e}");
            return Err(TokenError::Persistence(e));
        }

        state.current = next;
        Ok(token)
    }
}

// -----------------------------------------------------------------------------
// Tests
