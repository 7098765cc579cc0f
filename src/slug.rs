//! URL slugs for listings.

/// Used when a title has no letters or digits left after folding.
pub const FALLBACK_SLUG: &str = "bien";

fn fold_diacritic(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'ç' => "c",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'ñ' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => "o",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'ý' | 'ÿ' => "y",
        'œ' => "oe",
        'æ' => "ae",
        _ => return None,
    };
    Some(folded)
}

/// Lowercase, fold accents, collapse every run of other characters into a
/// single `-`, trim dashes at both ends.
pub fn to_slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        let piece: Option<&str> = if c.is_ascii_alphanumeric() {
            None
        } else if let Some(folded) = fold_diacritic(c) {
            Some(folded)
        } else {
            pending_dash = true;
            continue;
        };
        if pending_dash && !slug.is_empty() {
            slug.push('-');
        }
        pending_dash = false;
        match piece {
            Some(folded) => slug.push_str(folded),
            None => slug.push(c),
        }
    }
    slug
}

/// `base`, `base-1`, `base-2`, ...
pub fn slug_candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(base.to_string()).chain((1u64..).map(move |n| format!("{base}-{n}")))
}

/// Slug of `title`, or [`FALLBACK_SLUG`] when nothing usable is left.
pub fn slug_base(title: &str) -> String {
    let slug = to_slug(title);
    if slug.is_empty() {
        return FALLBACK_SLUG.to_string();
    }
    slug
}
