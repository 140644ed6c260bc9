//! Second pipeline stage: one generative-model call per document that judges
//! every similarity candidate at once.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::domain::document::Document;
use crate::providers::TextGenerator;

/// Prefix of `raw_response` when the provider could not be reached.
pub const ERROR_PREFIX: &str = "error: ";
/// `raw_response` for items the provider did not answer.
pub const NO_ANSWER: &str = "no answer";

static VERDICT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*[.):-]\s*([A-Za-z]+)").expect("verdict pattern is valid")
});

#[derive(Clone, Debug, PartialEq)]
pub struct VerificationOutcome {
    pub query_text: String,
    pub is_relevant: bool,
    pub raw_response: String,
}

impl VerificationOutcome {
    pub fn is_error(&self) -> bool {
        self.raw_response.starts_with(ERROR_PREFIX)
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_backoff: Duration,
    pub transient_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::MAX_VERIFICATION_ATTEMPTS,
            rate_limit_backoff: Duration::from_secs(30),
            transient_backoff: Duration::from_secs(2),
        }
    }
}

pub struct Verifier<G> {
    generator: G,
    policy: RetryPolicy,
    excerpt_chars: usize,
}

impl<G: TextGenerator> Verifier<G> {
    pub fn new(generator: G, policy: RetryPolicy, excerpt_chars: usize) -> Self {
        Self {
            generator,
            policy,
            excerpt_chars,
        }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Judge `candidates` against `document`. Always returns one outcome per
    /// candidate in input order; provider failures come back as outcomes
    /// carrying an error marker.
    pub async fn verify(
        &self,
        document: &Document,
        candidates: &[String],
    ) -> Vec<VerificationOutcome> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let prompt = build_prompt(
            &document.title,
            &document.content,
            candidates,
            self.excerpt_chars,
        );
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.generator.complete(&prompt).await {
                Ok(response) => {
                    let outcomes = parse_verdicts(&response, candidates);
                    for outcome in &outcomes {
                        log::info!(
                            "Verification for '{}' and '{}': {}",
                            document.title,
                            outcome.query_text,
                            outcome.raw_response
                        );
                    }
                    return outcomes;
                }
                Err(error) => {
                    let retry = attempt < attempts && error.is_retryable();
                    if retry {
                        let delay = if error.is_rate_limited() {
                            self.policy.rate_limit_backoff
                        } else {
                            self.policy.transient_backoff
                        };
                        log::warn!(
                            "Verification attempt {attempt}/{attempts} for '{}' failed: {error}; retrying in {delay:?}",
                            document.title
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        log::error!(
                            "Verification for '{}' failed after {attempt} attempts: {error}",
                            document.title
                        );
                    }
                    last_error = error.to_string();
                    if !retry {
                        break;
                    }
                }
            }
        }

        failed_outcomes(candidates, &last_error)
    }
}

/// First `max_chars` characters of `content`.
fn excerpt(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((index, _)) => &content[..index],
        None => content,
    }
}

pub fn build_prompt(
    title: &str,
    content: &str,
    candidates: &[String],
    excerpt_chars: usize,
) -> String {
    let items = candidates
        .iter()
        .enumerate()
        .map(|(index, text)| format!("{}. {}", index + 1, text.replace('\n', " ")))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Decide whether the article below is relevant to each numbered question or topic.\n\
         Reply with exactly one line per item in the form \"<number>. yes\" or \"<number>. no\".\n\n\
         Article Title: {title}\n\
         Article Content: {}\n\n\
         Questions/Topics:\n{items}\n",
        excerpt(content, excerpt_chars)
    )
}

/// Read `<n>. yes|no` lines out of `response`. Items without a usable answer
/// are reported as not relevant.
pub fn parse_verdicts(response: &str, candidates: &[String]) -> Vec<VerificationOutcome> {
    // (token, decisive) per candidate; a yes/no answer replaces commentary.
    let mut answers: Vec<Option<(String, bool)>> = vec![None; candidates.len()];

    for line in response.lines() {
        let Some(captures) = VERDICT_LINE.captures(line) else {
            continue;
        };
        let Ok(index) = captures[1].parse::<usize>() else {
            continue;
        };
        if index == 0 || index > candidates.len() {
            continue;
        }

        let token = captures[2].to_lowercase();
        let decisive = token == "yes" || token == "no";
        let slot = &mut answers[index - 1];
        match slot.as_ref().map(|(_, seen_decisive)| *seen_decisive) {
            Some(true) => {}
            Some(false) if !decisive => {}
            _ => *slot = Some((token, decisive)),
        }
    }

    candidates
        .iter()
        .zip(answers)
        .map(|(query_text, answer)| {
            let raw_response = answer
                .map(|(token, _)| token)
                .unwrap_or_else(|| NO_ANSWER.to_string());
            VerificationOutcome {
                query_text: query_text.clone(),
                is_relevant: raw_response == "yes",
                raw_response,
            }
        })
        .collect()
}

fn failed_outcomes(candidates: &[String], error: &str) -> Vec<VerificationOutcome> {
    candidates
        .iter()
        .map(|query_text| VerificationOutcome {
            query_text: query_text.clone(),
            is_relevant: false,
            raw_response: format!("{ERROR_PREFIX}{error}"),
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::providers::GenerationError;

    /// Replays queued results and records every prompt it receives.
    #[derive(Default)]
    pub(crate) struct ScriptedGenerator {
        replies: Mutex<VecDeque<Result<String, GenerationError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        pub(crate) fn new(replies: Vec<Result<String, GenerationError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.prompts.lock().expect("prompts mutex poisoned").len()
        }

        pub(crate) fn prompts(&self) -> Vec<String> {
            self.prompts.lock().expect("prompts mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
            self.prompts
                .lock()
                .expect("prompts mutex poisoned")
                .push(prompt.to_string());
            self.replies
                .lock()
                .expect("replies mutex poisoned")
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::Transport("no scripted reply".into())))
        }
    }

    pub(crate) fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            rate_limit_backoff: Duration::ZERO,
            transient_backoff: Duration::ZERO,
        }
    }

    fn article() -> Document {
        Document {
            title: "Rocket reaches orbit".to_string(),
            url: "https://example.com/rocket".to_string(),
            source: "example".to_string(),
            content: "A new launch vehicle reached orbit today.".to_string(),
            published_at: "2024-05-01".to_string(),
        }
    }

    fn candidates(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn parse_verdicts_reads_numbered_answers() {
        let items = candidates(&["space", "cooking", "rockets"]);

        let outcomes = parse_verdicts("1. Yes\n2) no\n3: YES.", &items);

        let relevant: Vec<bool> = outcomes.iter().map(|o| o.is_relevant).collect();
        assert_eq!(relevant, vec![true, false, true]);
        assert_eq!(outcomes[0].raw_response, "yes");
        assert_eq!(outcomes[1].query_text, "cooking");
    }

    #[test]
    fn parse_verdicts_ignores_commentary_and_out_of_range_lines() {
        let items = candidates(&["space", "cooking"]);
        let response = "Here is my assessment:\n\n2. no\n0. yes\n7. yes\n1. yes\nThanks!";

        let outcomes = parse_verdicts(response, &items);

        assert!(outcomes[0].is_relevant);
        assert!(!outcomes[1].is_relevant);
    }

    #[test]
    fn parse_verdicts_defaults_missing_and_unknown_items() {
        let items = candidates(&["space", "cooking", "rockets"]);

        let outcomes = parse_verdicts("1. maybe\n3. yes", &items);

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].raw_response, "maybe");
        assert!(!outcomes[0].is_relevant);
        assert_eq!(outcomes[1].raw_response, NO_ANSWER);
        assert!(!outcomes[1].is_relevant);
        assert!(outcomes[2].is_relevant);
    }

    #[test]
    fn parse_verdicts_prefers_decisive_answer_over_commentary() {
        let items = candidates(&["space"]);

        let outcomes = parse_verdicts("1. The article discusses launches.\n1. yes", &items);

        assert!(outcomes[0].is_relevant);
        assert_eq!(outcomes[0].raw_response, "yes");
    }

    #[test]
    fn prompt_lists_candidates_and_truncates_content() {
        let content = "é".repeat(20);
        let prompt = build_prompt("Title", &content, &candidates(&["a", "b\nc"]), 5);

        assert!(prompt.contains("1. a\n2. b c"));
        assert!(prompt.contains(&format!("Article Content: {}\n", "é".repeat(5))));
        assert!(!prompt.contains(&"é".repeat(6)));
    }

    #[tokio::test]
    async fn verify_issues_one_call_for_all_candidates() {
        let generator = ScriptedGenerator::new(vec![Ok("1. yes\n2. no".to_string())]);
        let verifier = Verifier::new(generator, no_wait(), 1000);

        let outcomes = verifier
            .verify(&article(), &candidates(&["space", "cooking"]))
            .await;

        assert_eq!(verifier.generator.calls(), 1);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_relevant);
        assert!(!outcomes[1].is_relevant);
        assert!(verifier.generator.prompts()[0].contains("Rocket reaches orbit"));
    }

    #[tokio::test]
    async fn verify_skips_provider_for_empty_candidates() {
        let verifier = Verifier::new(ScriptedGenerator::default(), no_wait(), 1000);

        assert!(verifier.verify(&article(), &[]).await.is_empty());
        assert_eq!(verifier.generator.calls(), 0);
    }

    #[tokio::test]
    async fn verify_recovers_after_rate_limits() {
        let generator = ScriptedGenerator::new(vec![
            Err(GenerationError::RateLimited("quota".into())),
            Err(GenerationError::RateLimited("quota".into())),
            Ok("1. yes".to_string()),
        ]);
        let verifier = Verifier::new(generator, no_wait(), 1000);

        let outcomes = verifier.verify(&article(), &candidates(&["space"])).await;

        assert_eq!(verifier.generator.calls(), 3);
        assert!(outcomes[0].is_relevant);
        assert!(!outcomes[0].is_error());
        assert_eq!(outcomes[0].raw_response, "yes");
    }

    #[tokio::test]
    async fn verify_reports_exhausted_retries_as_data() {
        let generator = ScriptedGenerator::new(vec![
            Err(GenerationError::Transport("connection refused".into())),
            Err(GenerationError::RateLimited("quota".into())),
            Err(GenerationError::Transport("connection refused".into())),
            Ok("1. yes".to_string()),
        ]);
        let verifier = Verifier::new(generator, no_wait(), 1000);

        let outcomes = verifier
            .verify(&article(), &candidates(&["space", "rockets"]))
            .await;

        assert_eq!(verifier.generator.calls(), 3);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| !o.is_relevant && o.is_error()));
        assert!(outcomes[0].raw_response.contains("connection refused"));
    }

    #[tokio::test]
    async fn verify_gives_up_at_once_on_client_errors() {
        let generator = ScriptedGenerator::new(vec![
            Err(GenerationError::Provider {
                status: 401,
                body: "API key not valid".into(),
            }),
            Ok("1. yes".to_string()),
        ]);
        let verifier = Verifier::new(generator, no_wait(), 1000);

        let outcomes = verifier.verify(&article(), &candidates(&["space"])).await;

        assert_eq!(verifier.generator.calls(), 1);
        assert!(outcomes[0].is_error());
        assert!(outcomes[0].raw_response.contains("API key not valid"));
    }

    #[tokio::test]
    async fn verify_retries_server_errors() {
        let generator = ScriptedGenerator::new(vec![
            Err(GenerationError::Provider {
                status: 503,
                body: "overloaded".into(),
            }),
            Ok("1. no".to_string()),
        ]);
        let verifier = Verifier::new(generator, no_wait(), 1000);

        let outcomes = verifier.verify(&article(), &candidates(&["space"])).await;

        assert_eq!(verifier.generator.calls(), 2);
        assert!(!outcomes[0].is_error());
        assert!(!outcomes[0].is_relevant);
    }
}
