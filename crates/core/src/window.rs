//! Window packing: tagged lines into fixed-token-budget training windows.

use crate::{Error, TokenFeature, Tokenizer, CUSTOMER_PREFIX, SESSION_END, WINDOW_TOKEN_BUDGET};

/// Pack-call-local state.
///
/// `primary` holds the lines of the window being assembled; `pending` holds the
/// lines of the current customer-initiated exchange and is cleared whenever a
/// new customer utterance starts. On a forced split `primary` is replaced by a
/// clone of `pending`, so the next window opens with the latest unanswered
/// customer context instead of a reply without its prompt.
#[derive(Debug, Default)]
struct PackState {
    primary: Vec<String>,
    pending: Vec<String>,
    current_tokens: usize,
    reply_count: usize,
    reply_count_next: usize,
}

impl PackState {
    fn reset(&mut self) {
        self.primary.clear();
        self.pending.clear();
        self.current_tokens = 0;
        self.reply_count = 0;
        self.reply_count_next = 0;
    }
}

/// Packs a tagged-line sequence into windows of at most `budget` tokens.
///
/// Windows flush either when the running token count reaches the budget or
/// when a session ends with at least one agent reply accumulated. Encoding is
/// delegated to the [`Tokenizer`] capability, which bounds and pads each
/// window to exactly `budget` tokens. Each `pack` call owns its state, so
/// independent transcripts can be packed concurrently without locking.
#[derive(Debug, Clone)]
pub struct WindowPacker {
    budget: usize,
}

impl Default for WindowPacker {
    fn default() -> Self {
        Self {
            budget: WINDOW_TOKEN_BUDGET,
        }
    }
}

impl WindowPacker {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    /// Pack `lines` into token-bounded windows, in flush order.
    ///
    /// A session-end line flushes the assembled window only if an agent reply
    /// was accumulated since the last customer line, then drops all carried
    /// state. A trailing partial window after the last line is not flushed.
    pub fn pack<T: Tokenizer>(
        &self,
        lines: &[String],
        tokenizer: &T,
    ) -> Result<Vec<TokenFeature>, Error> {
        let mut features: Vec<TokenFeature> = Vec::new();
        let mut state = PackState::default();

        for line in lines {
            if line == SESSION_END {
                if state.reply_count > 0 {
                    features.push(self.encode_window(&state.primary, tokenizer)?);
                }
                state.reset();
                continue;
            }

            if line.starts_with(CUSTOMER_PREFIX) {
                state.pending.clear();
                state.reply_count = 0;
            } else {
                state.reply_count += 1;
                state.reply_count_next += 1;
            }

            state.primary.push(line.clone());
            state.pending.push(line.clone());
            state.current_tokens += tokenizer.token_count(line)?;

            if state.current_tokens >= self.budget {
                features.push(self.encode_window(&state.primary, tokenizer)?);
                // Ownership transfer by clone: pending keeps growing after the
                // split and must not alias the carried lines.
                state.primary = state.pending.clone();
                state.reply_count = state.reply_count_next;
                state.reply_count_next = 0;
                state.current_tokens = tokenizer.token_count(&state.primary.join(" "))?;
                state.pending.clear();
            }
        }

        Ok(features)
    }

    fn encode_window<T: Tokenizer>(
        &self,
        lines: &[String],
        tokenizer: &T,
    ) -> Result<TokenFeature, Error> {
        let encoding = tokenizer.encode_fixed(&lines.join(" "), self.budget)?;
        Ok(TokenFeature::from(encoding))
    }
}
