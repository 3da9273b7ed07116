// Slug generation shared by every listing table

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::SqliteConnection;

use crate::error::AppResult;

pub const MAX_SLUG_BASE_LEN: usize = 120;

static NON_SLUG_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9_\s-]").expect("valid slug character class"));
static SEPARATOR_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-\s]+").expect("valid separator pattern"));

/// Base letter of an accented Latin letter. Letters that do not decompose into an
/// ASCII base plus accents (`ß`, `ø`, `æ`) have none and are dropped later.
fn ascii_fold(c: char) -> Option<char> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
        'ď' => 'd',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => 'g',
        'ĥ' => 'h',
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' => 'i',
        'ĵ' => 'j',
        'ķ' => 'k',
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' => 'l',
        'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ō' | 'ŏ' | 'ő' => 'o',
        'ŕ' | 'ŗ' | 'ř' => 'r',
        'ś' | 'ŝ' | 'ş' | 'š' => 's',
        'ţ' | 'ť' => 't',
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'ŵ' => 'w',
        'ý' | 'ÿ' | 'ŷ' => 'y',
        'ź' | 'ż' | 'ž' => 'z',
        _ => return None,
    };
    Some(folded)
}

/// Lower-case and fold accented letters to ASCII, drop anything that is not ASCII
/// alphanumeric, underscore, hyphen or whitespace, then collapse whitespace/hyphen
/// runs into single hyphens.
pub fn slugify(value: &str) -> String {
    let lowered: String = value
        .to_lowercase()
        .chars()
        .map(|c| ascii_fold(c).unwrap_or(c))
        .collect();
    let cleaned = NON_SLUG_CHARS.replace_all(&lowered, "");
    let hyphenated = SEPARATOR_RUNS.replace_all(cleaned.trim(), "-");
    hyphenated.trim_matches(|c| c == '-' || c == '_').to_string()
}

/// Slug derived from a title: slugified, capped at 120 chars, `fallback` when empty.
pub fn base_slug(title: &str, fallback: &str) -> String {
    let slug: String = slugify(title).chars().take(MAX_SLUG_BASE_LEN).collect();
    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}

/// The n-th candidate for a base slug: `base`, `base-2`, `base-3`, ...
pub fn slug_candidate(base: &str, attempt: u32) -> String {
    if attempt < 2 {
        base.to_string()
    } else {
        format!("{}-{}", base, attempt)
    }
}

/// First candidate of `base` not yet used in `table`.
///
/// `table` must be one of the crate's own listing tables; it is interpolated into the SQL.
pub async fn next_free_slug(
    conn: &mut SqliteConnection,
    table: &'static str,
    base: &str,
) -> AppResult<String> {
    let sql = format!("SELECT 1 FROM {} WHERE slug = ? LIMIT 1", table);
    let mut attempt = 1;
    loop {
        let candidate = slug_candidate(base, attempt);
        let taken = sqlx::query(&sql)
            .bind(&candidate)
            .fetch_optional(&mut *conn)
            .await?
            .is_some();
        if !taken {
            return Ok(candidate);
        }
        attempt += 1;
    }
}
