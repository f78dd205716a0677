// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package version string comparison.

Implements the Debian-style ordering used by opkg: versions decompose as
`[epoch:]upstream[-revision]` and each part is compared by alternating runs
of non-digit and digit characters. The tilde sorts before anything,
including the end of a part, which is what makes `1.0~beta` a pre-release
of `1.0`.
*/

use {crate::error::{OpkgError, Result}, std::cmp::Ordering};

/// Compare two version strings.
///
/// The ordering is total: any pair of strings compares, and strings that
/// are not equal byte-wise may still compare equal (`001` vs `1`).
pub fn compare(a: &str, b: &str) -> Ordering {
    let (epoch_a, rest_a) = split_epoch(a);
    let (epoch_b, rest_b) = split_epoch(b);

    epoch_a
        .cmp(&epoch_b)
        .then_with(|| {
            let (upstream_a, revision_a) = split_revision(rest_a);
            let (upstream_b, revision_b) = split_revision(rest_b);

            compare_part(upstream_a, upstream_b)
                .then_with(|| compare_part(revision_a, revision_b))
        })
}

/// Evaluate a comparison between two version strings using an opkg
/// operator string.
///
/// Supported operators are `<`, `<=`, `=`, `==`, `>`, `>=`, `<<` and `>>`;
/// `<<` and `>>` are aliases for the strict orderings. Anything else fails
/// with [OpkgError::UnsupportedOperator].
pub fn compare_with_operator(a: &str, op: &str, b: &str) -> Result<bool> {
    let ordering = compare(a, b);

    match op {
        "<" | "<<" => Ok(ordering == Ordering::Less),
        "<=" => Ok(ordering != Ordering::Greater),
        "=" | "==" => Ok(ordering == Ordering::Equal),
        ">" | ">>" => Ok(ordering == Ordering::Greater),
        ">=" => Ok(ordering != Ordering::Less),
        _ => Err(OpkgError::UnsupportedOperator(op.to_string())),
    }
}

/// Split the numeric epoch off a version string.
///
/// A missing or non-numeric epoch is 0; in the non-numeric case the whole
/// string, colon included, remains the comparison subject.
fn split_epoch(s: &str) -> (i64, &str) {
    match s.split_once(':') {
        Some((epoch, rest)) => match epoch.parse::<i64>() {
            Ok(epoch) => (epoch, rest),
            Err(_) => (0, s),
        },
        None => (0, s),
    }
}

/// Split the revision off on the last hyphen.
fn split_revision(s: &str) -> (&str, &str) {
    match s.rsplit_once('-') {
        Some((upstream, revision)) => (upstream, revision),
        None => (s, ""),
    }
}

/// Split a string on the first digit character.
///
/// Returns the leading non-digit run and everything afterwards. Either
/// value can be empty.
fn split_first_digit(s: &str) -> (&str, &str) {
    match s.bytes().position(|b| b.is_ascii_digit()) {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => (s, ""),
    }
}

/// Split a string on the first non-digit character.
fn split_first_nondigit(s: &str) -> (&str, &str) {
    match s.bytes().position(|b| !b.is_ascii_digit()) {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => (s, ""),
    }
}

/// Sort weight for a byte in a non-digit run.
///
/// End-of-string is 0 and the tilde is below it, so a part that ends is
/// greater than one continuing with `~` but less than one continuing with
/// anything else.
fn order(b: Option<u8>) -> i32 {
    match b {
        None => 0,
        Some(b'~') => -1,
        Some(b) if b.is_ascii_digit() => i32::from(b),
        Some(b) if b.is_ascii_alphabetic() => i32::from(b.to_ascii_lowercase()) + 256,
        Some(b) => i32::from(b) + 256,
    }
}

fn compare_nondigits(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();

    for pos in 0..a.len().max(b.len()) {
        let ordering = order(a.get(pos).copied()).cmp(&order(b.get(pos).copied()));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

fn compare_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');

    // With leading zeros gone, longer means numerically larger and equal
    // lengths compare lexicographically.
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Compare one version part (upstream or revision) using Debian rules.
fn compare_part(a: &str, b: &str) -> Ordering {
    let mut a_remaining = a;
    let mut b_remaining = b;

    while !a_remaining.is_empty() || !b_remaining.is_empty() {
        let (a_nondigit, a_rest) = split_first_digit(a_remaining);
        let (b_nondigit, b_rest) = split_first_digit(b_remaining);

        if !a_nondigit.is_empty() || !b_nondigit.is_empty() {
            match compare_nondigits(a_nondigit, b_nondigit) {
                Ordering::Equal => {}
                res => return res,
            }

            a_remaining = a_rest;
            b_remaining = b_rest;
            continue;
        }

        let (a_digits, a_rest) = split_first_nondigit(a_remaining);
        let (b_digits, b_rest) = split_first_nondigit(b_remaining);

        match compare_digits(a_digits, b_digits) {
            Ordering::Equal => {}
            res => return res,
        }

        a_remaining = a_rest;
        b_remaining = b_rest;
    }

    Ordering::Equal
}
