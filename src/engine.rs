//! # Engine — Digest Search Loop
//!
//! Walks the keyspace of a [`SearchJob`] in [`Candidates`] order, hashes every
//! candidate with the job's pluggable [`DigestFn`], and stops on the first
//! candidate whose digest equals the target (compared lower-cased).
//!
//! ## Termination
//!
//! | Outcome | Cause |
//! |---------|-------|
//! | `Found` | a candidate matched; nothing after it is examined |
//! | `Exhausted` | every candidate up to `max_length` was examined |
//! | `BudgetExceeded` | the wall-clock safety budget ran out |
//! | `Cancelled` | the cancellation token fired between two candidates |
//! | `Failed` | the digest function returned an error |
//!
//! ## Progress
//!
//! Every `progress_every` attempts the engine pushes a [`ProgressReport`] into
//! an unbounded channel. The send never blocks, so a slow consumer can delay
//! delivery but never the hashing loop itself. The engine is synchronous and
//! CPU-bound; the registry runs it on Tokio's blocking pool.

use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::digest::DigestFn;
use crate::keyspace::{keyspace_size, Candidates};
use crate::progress::Progress;

/// Default number of attempts between progress reports.
pub const DEFAULT_PROGRESS_EVERY: u64 = 1000;
/// Default wall-clock safety budget (10 minutes).
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(600);
/// The budget clock is read once per this many attempts.
const BUDGET_CHECK_EVERY: u64 = 256;

/// Everything one engine run needs. Validated by the registry before it gets here.
#[derive(Clone)]
pub struct SearchJob {
    pub task_id: String,
    pub hash_type: String,
    pub digest: DigestFn,
    pub target: String,
    pub charset: Vec<char>,
    pub max_length: usize,
}

impl SearchJob {
    pub fn keyspace(&self) -> u128 {
        keyspace_size(self.charset.len(), self.max_length)
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub progress_every: u64,
    pub time_budget: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            progress_every: DEFAULT_PROGRESS_EVERY,
            time_budget: DEFAULT_TIME_BUDGET,
        }
    }
}

/// Snapshot pushed to the progress channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressReport {
    pub percent: u8,
    pub candidate: String,
    pub rate: u64,
    pub tested: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Found(String),
    Exhausted,
    BudgetExceeded,
    Cancelled,
    Failed(String),
}

impl Outcome {
    /// The matched candidate, if any.
    pub fn found(&self) -> Option<&str> {
        match self {
            Outcome::Found(c) => Some(c),
            _ => None,
        }
    }
}

fn digest_matches(digest: &str, target_lower: &str) -> bool {
    if digest.is_ascii() {
        digest.eq_ignore_ascii_case(target_lower)
    } else {
        digest.to_lowercase() == target_lower
    }
}

/// Run a search to completion, cancellation, failure or budget exhaustion.
///
/// `progress` accumulates the attempt count and last candidate; `reports`
/// receives a [`ProgressReport`] every `config.progress_every` attempts. A
/// closed `reports` channel is not an error: the search keeps going.
pub fn run(
    job: &SearchJob,
    config: &EngineConfig,
    cancel: &CancellationToken,
    progress: &Progress,
    reports: &mpsc::UnboundedSender<ProgressReport>,
) -> Outcome {
    let target = job.target.to_lowercase();
    let keyspace = job.keyspace();
    let every = config.progress_every.max(1);

    for candidate in Candidates::new(&job.charset, job.max_length) {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let digest = match (job.digest)(candidate.as_bytes()) {
            Ok(d) => d,
            Err(e) => return Outcome::Failed(format!("{:#}", e)),
        };
        let attempts = progress.tested.fetch_add(1, Ordering::Relaxed) + 1;

        if attempts % every == 0 {
            progress.set_current(&candidate);
            let _ = reports.send(ProgressReport {
                percent: progress.percent_of(keyspace),
                candidate: candidate.clone(),
                rate: progress.rate(),
                tested: attempts,
            });
        }

        if digest_matches(&digest, &target) {
            progress.set_current(&candidate);
            return Outcome::Found(candidate);
        }

        if attempts % BUDGET_CHECK_EVERY == 0 && progress.elapsed() > config.time_budget {
            return Outcome::BudgetExceeded;
        }
    }

    Outcome::Exhausted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestRegistry;
    use std::sync::Arc;

    fn job(hash_type: &str, secret: &str, charset: &str, max_length: usize) -> SearchJob {
        let digests = DigestRegistry::with_builtins();
        SearchJob {
            task_id: "t".into(),
            hash_type: hash_type.into(),
            digest: digests.get(hash_type).unwrap(),
            target: digests.hash_hex(hash_type, secret).unwrap(),
            charset: charset.chars().collect(),
            max_length,
        }
    }

    fn run_collect(job: &SearchJob, config: &EngineConfig) -> (Outcome, Vec<ProgressReport>, u64) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let progress = Progress::new();
        let outcome = run(job, config, &CancellationToken::new(), &progress, &tx);
        drop(tx);
        let mut reports = Vec::new();
        while let Ok(r) = rx.try_recv() {
            reports.push(r);
        }
        (outcome, reports, progress.tested.load(Ordering::Relaxed))
    }

    // ── Matching ────────────────────────────────────────────────────

    /// "ab" is the 4th candidate of {a, b, aa, ab, ba, bb}; nothing after it is hashed.
    #[test]
    fn finds_match_and_stops() {
        let j = job("md5", "ab", "ab", 2);
        let (outcome, _, tested) = run_collect(&j, &EngineConfig::default());
        assert_eq!(outcome, Outcome::Found("ab".into()));
        assert_eq!(tested, 4);
    }

    #[test]
    fn target_comparison_ignores_case() {
        let mut j = job("sha1", "ba", "ab", 2);
        j.target = j.target.to_uppercase();
        let (outcome, _, _) = run_collect(&j, &EngineConfig::default());
        assert_eq!(outcome.found(), Some("ba"));
    }

    #[test]
    fn unmatched_target_exhausts_keyspace() {
        let j = job("sha256", "zzz", "ab", 2);
        let (outcome, _, tested) = run_collect(&j, &EngineConfig::default());
        assert_eq!(outcome, Outcome::Exhausted);
        assert_eq!(tested, 6);
    }

    // ── Progress Cadence ────────────────────────────────────────────

    #[test]
    fn reports_fire_every_n_attempts() {
        let j = job("md5", "not-in-keyspace", "abc", 3);
        let config = EngineConfig {
            progress_every: 10,
            ..EngineConfig::default()
        };
        let (_, reports, tested) = run_collect(&j, &config);
        assert_eq!(tested, 39);
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].tested, 10);
        assert_eq!(reports[2].tested, 30);
    }

    #[test]
    fn reported_percent_is_monotonic_and_below_100() {
        let j = job("md5", "not-in-keyspace", "ab", 6);
        let config = EngineConfig {
            progress_every: 1,
            ..EngineConfig::default()
        };
        let (_, reports, _) = run_collect(&j, &config);
        assert_eq!(reports.len(), 126);
        assert!(reports.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert!(reports.iter().all(|r| r.percent <= 99));
        assert_eq!(reports.last().unwrap().percent, 99);
    }

    #[test]
    fn report_carries_current_candidate() {
        let j = job("md5", "not-in-keyspace", "ab", 2);
        let config = EngineConfig {
            progress_every: 3,
            ..EngineConfig::default()
        };
        let (_, reports, _) = run_collect(&j, &config);
        assert_eq!(reports[0].candidate, "aa");
        assert_eq!(reports[1].candidate, "bb");
    }

    // ── Cancellation, Budget, Failure ───────────────────────────────

    #[test]
    fn cancelled_token_stops_before_first_candidate() {
        let j = job("md5", "a", "ab", 2);
        let (tx, _rx) = mpsc::unbounded_channel();
        let progress = Progress::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = run(&j, &EngineConfig::default(), &cancel, &progress, &tx);
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(progress.tested.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn zero_budget_ends_run_without_match() {
        let j = job("md5", "not-in-keyspace", "abcd", 5);
        let config = EngineConfig {
            time_budget: Duration::ZERO,
            ..EngineConfig::default()
        };
        let (outcome, _, tested) = run_collect(&j, &config);
        assert_eq!(outcome, Outcome::BudgetExceeded);
        assert_eq!(tested, BUDGET_CHECK_EVERY);
    }

    #[test]
    fn digest_error_fails_the_run() {
        let mut j = job("md5", "x", "ab", 2);
        j.digest = Arc::new(|d: &[u8]| -> anyhow::Result<String> {
            if d == b"aa" {
                anyhow::bail!("backend unavailable")
            }
            Ok(String::new())
        });
        let (outcome, _, tested) = run_collect(&j, &EngineConfig::default());
        assert_eq!(outcome, Outcome::Failed("backend unavailable".into()));
        assert_eq!(tested, 2);
    }

    #[test]
    fn closed_report_channel_does_not_stop_search() {
        let j = job("md5", "bb", "ab", 2);
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let config = EngineConfig {
            progress_every: 1,
            ..EngineConfig::default()
        };
        let outcome = run(&j, &config, &CancellationToken::new(), &Progress::new(), &tx);
        assert_eq!(outcome.found(), Some("bb"));
    }
}
