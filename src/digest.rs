//! # Digest — Pluggable Candidate Hashing
//!
//! The search engine never knows which hash it is matching against. It receives
//! a [`DigestFn`] resolved from a [`DigestRegistry`] by symbolic tag
//! (`"md5"`, `"sha256"`, ...) and compares the lower-cased hex output against
//! the target.
//!
//! ## Built-in Algorithms
//!
//! | Tag | Crate |
//! |-----|-------|
//! | `md5` | `md-5` |
//! | `sha1` | `sha1` |
//! | `sha224`, `sha256`, `sha384`, `sha512` | `sha2` |
//!
//! Additional algorithms can be registered at startup with
//! [`DigestRegistry::register`]. Tags are matched case-insensitively.

use sha2::digest::Output;
use sha2::Digest;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A digest function: candidate bytes in, lower-case hex digest out.
///
/// Returning `Err` aborts the run that called it and marks the task FAILED.
pub type DigestFn = Arc<dyn Fn(&[u8]) -> anyhow::Result<String> + Send + Sync>;

fn hex_digest<D: Digest>(data: &[u8]) -> String
where
    Output<D>: fmt::LowerHex,
{
    format!("{:x}", D::digest(data))
}

fn builtin<D: Digest + 'static>() -> DigestFn
where
    Output<D>: fmt::LowerHex,
{
    Arc::new(|data: &[u8]| -> anyhow::Result<String> { Ok(hex_digest::<D>(data)) })
}

/// Tag → digest function lookup table.
#[derive(Clone)]
pub struct DigestRegistry {
    algorithms: BTreeMap<String, DigestFn>,
}

impl fmt::Debug for DigestRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestRegistry")
            .field("algorithms", &self.tags())
            .finish()
    }
}

impl Default for DigestRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl DigestRegistry {
    /// A registry with no algorithms at all.
    pub fn empty() -> Self {
        DigestRegistry {
            algorithms: BTreeMap::new(),
        }
    }

    /// A registry pre-loaded with md5, sha1 and the sha2 family.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("md5", builtin::<md5::Md5>());
        registry.register("sha1", builtin::<sha1::Sha1>());
        registry.register("sha224", builtin::<sha2::Sha224>());
        registry.register("sha256", builtin::<sha2::Sha256>());
        registry.register("sha384", builtin::<sha2::Sha384>());
        registry.register("sha512", builtin::<sha2::Sha512>());
        registry
    }

    /// Register (or replace) an algorithm under `tag`.
    pub fn register(&mut self, tag: &str, f: DigestFn) {
        self.algorithms.insert(tag.to_ascii_lowercase(), f);
    }

    pub fn get(&self, tag: &str) -> Option<DigestFn> {
        self.algorithms.get(&tag.to_ascii_lowercase()).cloned()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.algorithms.contains_key(&tag.to_ascii_lowercase())
    }

    /// Registered tags in sorted order.
    pub fn tags(&self) -> Vec<&str> {
        self.algorithms.keys().map(String::as_str).collect()
    }

    /// Hash `input` with the algorithm registered under `tag`.
    ///
    /// Used by the demo-hash endpoint and the `hash` subcommand.
    pub fn hash_hex(&self, tag: &str, input: &str) -> anyhow::Result<String> {
        let f = self
            .get(tag)
            .ok_or_else(|| anyhow::anyhow!("unsupported digest algorithm: {}", tag))?;
        f(input.as_bytes())
    }
}
