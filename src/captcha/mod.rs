//! Human-verification challenges.
//!
//! A challenge is deleted on the *first* validation attempt regardless of
//! outcome, so there is no brute-forcing a single challenge. Abandoned
//! challenges are bounded by a background sweep.

use rand::{rngs::OsRng, Rng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;
use ulid::Ulid;

pub const DEFAULT_TTL_SECONDS: i64 = 5 * 60;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Alphabet for code challenges; confusable glyphs are left out.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("captcha token and response are both required")]
    MissingFields,
    #[error("captcha challenge not found")]
    NotFound,
    #[error("captcha challenge expired")]
    Expired,
    #[error("captcha response mismatch")]
    Mismatch,
}

/// What kind of puzzle to issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeKind {
    /// Small arithmetic question, e.g. `What is 7 + 2?`.
    Math,
    /// Short alphanumeric code to type back.
    Code,
}

/// Stored challenge; the expected answer is kept case-folded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptchaChallenge {
    pub token_id: String,
    pub expected_answer: String,
    pub expires_at: i64,
}

/// Challenge as returned to the client. Rendering is plain text; visual
/// presentation is the frontend's concern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedChallenge {
    pub token_id: String,
    pub rendering: String,
    pub expires_at: i64,
}

/// Issues challenges and validates single-use responses.
pub struct CaptchaChallengeService {
    challenges: Mutex<HashMap<String, CaptchaChallenge>>,
    ttl_seconds: i64,
}

impl CaptchaChallengeService {
    #[must_use]
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            challenges: Mutex::new(HashMap::new()),
            ttl_seconds,
        }
    }

    /// Create and store a challenge of the requested kind.
    pub async fn issue(&self, kind: ChallengeKind, now_unix_seconds: i64) -> IssuedChallenge {
        let (rendering, answer) = match kind {
            ChallengeKind::Math => math_challenge(),
            ChallengeKind::Code => code_challenge(),
        };
        let token_id = Ulid::new().to_string();
        let expires_at = now_unix_seconds + self.ttl_seconds;

        let mut challenges = self.challenges.lock().await;
        challenges.insert(
            token_id.clone(),
            CaptchaChallenge {
                token_id: token_id.clone(),
                expected_answer: fold_answer(&answer),
                expires_at,
            },
        );

        IssuedChallenge {
            token_id,
            rendering,
            expires_at,
        }
    }

    /// Validate a response, consuming the challenge either way.
    ///
    /// Comparison is case-insensitive after trimming. The entry is removed
    /// atomically on lookup, so a retry with the same `token_id` sees
    /// [`Error::NotFound`] even when the first response was correct.
    ///
    /// # Errors
    ///
    /// One of [`Error::MissingFields`], [`Error::NotFound`],
    /// [`Error::Expired`], [`Error::Mismatch`].
    pub async fn validate(
        &self,
        token_id: Option<&str>,
        response: Option<&str>,
        now_unix_seconds: i64,
    ) -> Result<(), Error> {
        let (Some(token_id), Some(response)) = (token_id, response) else {
            return Err(Error::MissingFields);
        };
        if token_id.trim().is_empty() || response.trim().is_empty() {
            return Err(Error::MissingFields);
        }

        // Single atomic take: the challenge is gone from here on.
        let challenge = {
            let mut challenges = self.challenges.lock().await;
            challenges.remove(token_id)
        };
        let challenge = challenge.ok_or(Error::NotFound)?;

        if challenge.expires_at <= now_unix_seconds {
            return Err(Error::Expired);
        }
        if fold_answer(response) != challenge.expected_answer {
            return Err(Error::Mismatch);
        }
        Ok(())
    }

    /// Drop expired challenges; returns how many were removed.
    pub async fn sweep(&self, now_unix_seconds: i64) -> usize {
        let mut challenges = self.challenges.lock().await;
        let before = challenges.len();
        challenges.retain(|_, challenge| challenge.expires_at > now_unix_seconds);
        before - challenges.len()
    }
}

/// Periodic sweep independent of request handling, bounding memory no
/// matter how many challenges are abandoned unanswered.
pub fn spawn_sweeper(
    service: Arc<CaptchaChallengeService>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            let removed = service.sweep(crate::clock::unix_now()).await;
            if removed > 0 {
                debug!(removed, "swept expired captcha challenges");
            }
        }
    })
}

fn fold_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

fn math_challenge() -> (String, String) {
    let a = OsRng.gen_range(2..=9);
    let b = OsRng.gen_range(1..a);
    if OsRng.gen_bool(0.5) {
        (format!("What is {a} + {b}?"), (a + b).to_string())
    } else {
        (format!("What is {a} - {b}?"), (a - b).to_string())
    }
}

fn code_challenge() -> (String, String) {
    let code: String = (0..CODE_LENGTH)
        .map(|_| {
            let index = OsRng.gen_range(0..CODE_ALPHABET.len());
            char::from(CODE_ALPHABET[index])
        })
        .collect();
    (format!("Type the code: {code}"), code)
}
