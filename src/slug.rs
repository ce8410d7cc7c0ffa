//! Slug generation for books and chapters.

use rand::{RngExt, distr::Alphanumeric};

/// Length of the random disambiguation suffix.
const SUFFIX_LEN: usize = 6;

/// Derive a URL-safe slug from a title.
///
/// Lowercase, hyphenated, ASCII-only, with a random alphanumeric suffix so
/// two books with the same title get distinct slugs without a lookup. Actual
/// uniqueness is enforced by the UNIQUE column; a collision is rejected there.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len() + SUFFIX_LEN + 1);
    let mut last_hyphen = true;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }

    while slug.ends_with('-') {
        slug.pop();
    }

    if !slug.is_empty() {
        slug.push('-');
    }
    slug.push_str(&random_suffix());
    slug
}

/// Random lowercase alphanumeric suffix.
fn random_suffix() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_lowercase_and_hyphenated() {
        let slug = slugify("Le Vieux Moulin");
        let (base, suffix) = slug.rsplit_once('-').unwrap();
        assert_eq!(base, "le-vieux-moulin");
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn slug_strips_punctuation() {
        let slug = slugify("Hello, World! (draft)");
        assert!(slug.starts_with("hello-world-draft-"));
    }

    #[test]
    fn slug_same_title_differs() {
        assert_ne!(slugify("My Book"), slugify("My Book"));
    }

    #[test]
    fn slug_empty_title_is_suffix_only() {
        let slug = slugify("!!!");
        assert_eq!(slug.len(), SUFFIX_LEN);
    }
}
