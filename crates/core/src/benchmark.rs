//! Reply benchmarking: frame prompts at customer turns and sample agent replies.

use std::collections::VecDeque;

use crate::{
    Error, Generator, SamplingOptions, Tokenizer, AGENT_PREFIX, CUSTOMER_PREFIX,
    PROMPT_CHAR_BUDGET, SESSION_END,
};

/// Samples model replies at every customer turn of a tagged-line stream.
///
/// Holds a rolling context of recent lines, bounded by a character budget.
/// At each customer line the remaining context plus the agent prefix is
/// encoded into one prompt and handed to the external [`Generator`]; the
/// deterministic part is only the prompt framing, sampling itself is
/// non-deterministic and opaque to this type.
pub struct ReplyBenchmarker<T, G>
where
    T: Tokenizer,
    G: Generator,
{
    tokenizer: T,
    generator: G,
    char_budget: usize,
    options: SamplingOptions,
    context: VecDeque<String>,
}

impl<T, G> ReplyBenchmarker<T, G>
where
    T: Tokenizer,
    G: Generator,
{
    pub fn new(tokenizer: T, generator: G) -> Self {
        Self {
            tokenizer,
            generator,
            char_budget: PROMPT_CHAR_BUDGET,
            options: SamplingOptions::default(),
            context: VecDeque::new(),
        }
    }

    pub fn with_char_budget(mut self, char_budget: usize) -> Self {
        self.char_budget = char_budget;
        self
    }

    pub fn with_options(mut self, options: SamplingOptions) -> Self {
        self.options = options;
        self
    }

    /// Drop the rolling context, as at a session boundary.
    pub fn reset(&mut self) {
        self.context.clear();
    }

    /// Assemble the prompt for the current context.
    ///
    /// Oldest lines are dropped from the front until the total character
    /// count fits the budget, then the survivors plus the agent prefix are
    /// encoded and concatenated.
    pub fn next_prompt(&mut self) -> Result<Vec<i64>, Error> {
        let mut length: usize = self.context.iter().map(|l| l.chars().count()).sum();
        while length > self.char_budget {
            match self.context.pop_front() {
                Some(dropped) => length -= dropped.chars().count(),
                None => break,
            }
        }

        let mut ids = Vec::new();
        for line in &self.context {
            ids.extend(self.tokenizer.encode(line)?);
        }
        ids.extend(self.tokenizer.encode(AGENT_PREFIX)?);
        Ok(ids)
    }

    /// Walk `lines` and sample replies at every customer turn.
    ///
    /// Returns one cell per input line: sampled continuations rendered as
    /// `"{i}: {text}"` joined with newlines for customer lines, and an empty
    /// cell for agent lines and session-end markers. A session-end marker
    /// clears the rolling context.
    pub fn run(&mut self, lines: &[String]) -> Result<Vec<String>, Error> {
        let mut cells = Vec::with_capacity(lines.len());

        for line in lines {
            if line == SESSION_END {
                self.context.clear();
                cells.push(String::new());
                continue;
            }

            self.context.push_back(line.clone());
            if line.starts_with(CUSTOMER_PREFIX) {
                let prompt = self.next_prompt()?;
                let continuations = self.generator.generate(&prompt, &self.options)?;
                let mut rendered = Vec::with_capacity(continuations.len());
                for (i, sample) in continuations.iter().enumerate() {
                    rendered.push(format!("{}: {}", i, self.tokenizer.decode(sample)?));
                }
                cells.push(rendered.join("\n"));
            } else {
                cells.push(String::new());
            }
        }

        Ok(cells)
    }
}
