//! Generation engine
//!
//! Turns a column of prompts into an aligned column of completions. Every
//! row is generated independently: a failing row (error or panic) becomes a
//! [`Completion::Failed`] and the remaining rows are still processed.

use crate::model::{ModelHandle, SamplingParams};
use crate::prompt::normalize_completion;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use swefix_common::{Completion, GenerationConfig, Result, SwefixError, METRICS};
use tracing::{debug, trace, warn};

/// Row-by-row generation against a loaded model
pub struct GenerationEngine<'a> {
    handle: &'a ModelHandle,
    config: &'a GenerationConfig,
    params: SamplingParams,
}

impl<'a> GenerationEngine<'a> {
    /// Create an engine for a handle and the shared generation config
    pub fn new(handle: &'a ModelHandle, config: &'a GenerationConfig) -> Self {
        let params = SamplingParams::from_config(config, handle.tokenizer.as_ref());
        if params.num_return_sequences > 1 {
            debug!(
                "{} sequences requested per prompt, only the first is kept",
                params.num_return_sequences
            );
        }
        Self {
            handle,
            config,
            params,
        }
    }

    /// Generate one completion per prompt
    ///
    /// The output has the same length and order as `prompts`. Absent or
    /// empty prompts yield [`Completion::Skipped`] without invoking the model.
    /// This call never fails as a whole.
    pub fn generate_many(&self, prompts: &[Option<&str>]) -> Vec<Completion> {
        let start = Instant::now();

        let completions: Vec<Completion> = prompts
            .iter()
            .enumerate()
            .map(|(row, prompt)| self.generate_row(row, *prompt))
            .collect();

        let failed = completions.iter().filter(|c| c.is_failed()).count();
        debug!(
            "Generated {} completions ({} failed) with {} in {:?}",
            completions.len(),
            failed,
            self.config.model_location,
            start.elapsed()
        );

        completions
    }

    fn generate_row(&self, row: usize, prompt: Option<&str>) -> Completion {
        let prompt = match prompt {
            Some(prompt) if !prompt.is_empty() => prompt,
            _ => {
                trace!("Row {}: no prompt, skipping", row);
                METRICS.inference.rows_skipped.inc();
                return Completion::Skipped;
            }
        };

        METRICS.inference.rows_total.inc();
        let start = Instant::now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.generate_one(prompt)))
            .unwrap_or_else(|payload| Err(SwefixError::generation(panic_message(payload.as_ref()))));

        METRICS
            .inference
            .generation_duration
            .observe(start.elapsed().as_secs_f64());

        match outcome {
            Ok(text) => {
                trace!("Row {}: generated {} chars in {:?}", row, text.len(), start.elapsed());
                METRICS.inference.rows_succeeded.inc();
                Completion::Fix(text)
            }
            Err(e) => {
                warn!("Error during generation for row {}: {}", row, e);
                METRICS.inference.rows_failed.inc();
                Completion::Failed(e.to_string())
            }
        }
    }

    /// Tokenize, generate, decode the new span and normalize it
    fn generate_one(&self, prompt: &str) -> Result<String> {
        let tokenizer = self.handle.tokenizer.as_ref();

        let input_ids = tokenizer.encode(prompt)?;
        if input_ids.is_empty() {
            return Err(SwefixError::tokenizer("Prompt produced no tokens"));
        }
        let prompt_len = input_ids.len();

        let sequences = self.handle.model.generate(&input_ids, &self.params)?;
        let first = sequences
            .into_iter()
            .next()
            .ok_or_else(|| SwefixError::generation("Model returned no sequences"))?;

        let new_tokens = first.get(prompt_len..).unwrap_or(&[]);
        METRICS
            .inference
            .tokens_generated_total
            .inc_by(new_tokens.len() as u64);

        let decoded = tokenizer.decode(new_tokens, true)?;
        Ok(normalize_completion(&decoded))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panic: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panic: {}", msg)
    } else {
        "panic during generation".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::*;
    use crate::prompt::format_prompt;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn engine_output(handle: &ModelHandle, prompts: &[Option<&str>]) -> Vec<Completion> {
        let config = GenerationConfig::new("/models/fake");
        GenerationEngine::new(handle, &config).generate_many(prompts)
    }

    #[test]
    fn test_generate_many_cleans_output() {
        let handle = canned_handle("  ```python\nreturn a + b\n```  ");
        let prompt = format_prompt("add is wrong");

        let completions = engine_output(&handle, &[Some(prompt.as_str())]);

        assert_eq!(completions, vec![Completion::Fix("return a + b".to_string())]);
    }

    #[test]
    fn test_order_and_count_preserved() {
        let handle = canned_handle("ok");
        let prompts: Vec<String> = (0..7).map(|i| format!("prompt {}", i)).collect();
        let refs: Vec<Option<&str>> = prompts.iter().map(|p| Some(p.as_str())).collect();

        let completions = engine_output(&handle, &refs);

        assert_eq!(completions.len(), 7);
        assert!(completions.iter().all(|c| *c == Completion::Fix("ok".to_string())));
        assert!(engine_output(&handle, &[]).is_empty());
    }

    #[test]
    fn test_failing_row_is_isolated() {
        let handle = canned_handle("fixed");

        let completions = engine_output(
            &handle,
            &[Some("first"), Some("please FAIL here"), Some("third")],
        );

        assert_eq!(completions[0], Completion::Fix("fixed".to_string()));
        assert_eq!(completions[2], Completion::Fix("fixed".to_string()));
        match &completions[1] {
            Completion::Failed(reason) => assert!(reason.contains("forced failure")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(
            completions[1].clone().into_column().unwrap(),
            "Error: Generation error: forced failure"
        );
    }

    #[test]
    fn test_panicking_row_is_isolated() {
        let handle = canned_handle("fixed");

        let completions = engine_output(&handle, &[Some("PANIC now"), Some("fine")]);

        match &completions[0] {
            Completion::Failed(reason) => assert!(reason.contains("forced panic")),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(completions[1], Completion::Fix("fixed".to_string()));
    }

    #[test]
    fn test_absent_prompt_skips_model() {
        let model = CannedModel::new("fixed");
        let calls = Arc::clone(&model.calls);
        let handle = ModelHandle {
            location: "/models/fake".to_string(),
            tokenizer: Box::new(ByteTokenizer),
            model: Box::new(model),
        };

        let completions = engine_output(&handle, &[None, Some(""), Some("real")]);

        assert_eq!(completions[0], Completion::Skipped);
        assert_eq!(completions[1], Completion::Skipped);
        assert_eq!(completions[2], Completion::Fix("fixed".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_only_first_sequence_is_used() {
        let handle = canned_handle("first");
        let mut config = GenerationConfig::new("/models/fake");
        config.num_return_sequences = 3;

        let completions = GenerationEngine::new(&handle, &config).generate_many(&[Some("p")]);

        assert_eq!(completions, vec![Completion::Fix("first".to_string())]);
    }
}
