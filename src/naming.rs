use rand::Rng;

use crate::config::MAX_BUCKET_COUNT;
use crate::error::{Error, Result};

/// Number of decimal digits appended to the bucket prefix.
pub const SUFFIX_DIGITS: usize = 10;
const SUFFIX_MIN: u64 = 1_000_000_000;
const SUFFIX_MAX: u64 = 9_999_999_999;

const MAX_BUCKET_NAME_LEN: usize = 63;

/// Generate `count` bucket names of the form `<prefix><10 digits>`.
///
/// Names are drawn until `count` distinct ones are collected, so a run never
/// tries to create the same bucket twice. Callers keep `count` within
/// [`MAX_BUCKET_COUNT`], which [`crate::Config::validate`] enforces.
pub fn generate_bucket_names(prefix: &str, count: usize) -> Vec<String> {
    generate_bucket_names_with(&mut rand::thread_rng(), prefix, count)
}

pub fn generate_bucket_names_with<R: Rng + ?Sized>(
    rng: &mut R,
    prefix: &str,
    count: usize,
) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(count.min(MAX_BUCKET_COUNT));
    while names.len() < count {
        let name = format!("{prefix}{}", rng.gen_range(SUFFIX_MIN..=SUFFIX_MAX));
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// true when `name` is `prefix` followed by exactly ten digits
#[cfg(test)]
pub(crate) fn is_generated_name(prefix: &str, name: &str) -> bool {
    name.strip_prefix(prefix).map_or(false, |suffix| {
        suffix.len() == SUFFIX_DIGITS && suffix.bytes().all(|b| b.is_ascii_digit())
    })
}

/// Check that every name generated from `prefix` is an acceptable S3 bucket name.
///
/// An empty prefix is refused: the reaper deletes every bucket that starts
/// with the prefix, and every bucket starts with "".
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(Error::config("bucket prefix must not be empty"));
    }
    let full_len = prefix.len() + SUFFIX_DIGITS;
    if full_len > MAX_BUCKET_NAME_LEN {
        return Err(Error::config(format!(
            "bucket prefix {prefix:?} is too long: generated names would have {full_len} characters (max {MAX_BUCKET_NAME_LEN})"
        )));
    }
    if let Some(c) = prefix
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.'))
    {
        return Err(Error::config(format!(
            "bucket prefix {prefix:?} contains invalid character {c:?}"
        )));
    }
    if let Some(first) = prefix.chars().next() {
        if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
            return Err(Error::config(format!(
                "bucket prefix {prefix:?} must start with a lowercase letter or digit"
            )));
        }
    }
    if prefix.contains("..") {
        return Err(Error::config(format!(
            "bucket prefix {prefix:?} contains adjacent dots"
        )));
    }
    Ok(())
}
