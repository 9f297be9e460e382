//! # Keyspace — Deterministic Candidate Enumeration
//!
//! Candidates are produced shortest first. Within a fixed length the order is
//! an odometer over charset *positions*: the rightmost position turns fastest,
//! and symbol order is the order the caller supplied, not the natural sort
//! order of the symbols. For charset `"ab"` and max length 2:
//!
//! ```text
//! a, b, aa, ab, ba, bb
//! ```
//!
//! [`keyspace_size`] gives the total count Σ(i=1..n) kⁱ used as the progress
//! denominator.

/// Total number of candidates for a charset of `k` symbols up to length `n`.
///
/// Saturates at `u128::MAX` instead of overflowing.
pub fn keyspace_size(k: usize, n: usize) -> u128 {
    let k = k as u128;
    let mut total: u128 = 0;
    let mut power: u128 = 1;
    for _ in 0..n {
        power = power.saturating_mul(k);
        total = total.saturating_add(power);
    }
    total
}

/// Iterator over every candidate string, in enumeration order.
///
/// Holds one index per position; advancing is an odometer increment with carry.
/// When every position has wrapped the length grows by one.
pub struct Candidates {
    charset: Vec<char>,
    max_length: usize,
    indices: Vec<usize>,
    done: bool,
}

impl Candidates {
    pub fn new(charset: &[char], max_length: usize) -> Self {
        Candidates {
            charset: charset.to_vec(),
            max_length,
            indices: vec![0],
            done: charset.is_empty() || max_length == 0,
        }
    }

    fn render(&self) -> String {
        self.indices.iter().map(|&i| self.charset[i]).collect()
    }

    fn advance(&mut self) {
        let k = self.charset.len();
        for slot in self.indices.iter_mut().rev() {
            *slot += 1;
            if *slot < k {
                return;
            }
            *slot = 0;
        }
        // Every position wrapped: move on to the next length.
        if self.indices.len() == self.max_length {
            self.done = true;
        } else {
            self.indices.push(0);
        }
    }
}

impl Iterator for Candidates {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        let candidate = self.render();
        self.advance();
        Some(candidate)
    }
}
