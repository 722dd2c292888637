//! URL handling
//!
//! Canonicalization of every URL before it can enter the frontier, plus the
//! small domain helpers used for politeness and robots.txt scoping.

mod domain;
mod normalize;

pub use domain::{extract_domain, origin_of};
pub use normalize::normalize_url;
