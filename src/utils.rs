//! Utility functions for path layout, slugs and sizes

use crate::types::Item;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Maximum number of suffixes tried when resolving a file collision
pub const MAX_RENAME_ATTEMPTS: u32 = 9999;

#[allow(clippy::expect_used)]
static NON_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("slug pattern is valid"));

/// Turn a display name into a lowercase, dash-separated path component
///
/// Non-ASCII text is transliterated first. The result is empty when nothing
/// in `name` maps to a letter or digit.
///
/// # Examples
///
/// ```
/// use bundle_mirror::utils::slugify;
///
/// assert_eq!(slugify("Humble Indie Bundle 12"), "humble-indie-bundle-12");
/// assert_eq!(slugify("Assassin's Creed: Origins"), "assassins-creed-origins");
/// assert_eq!(slugify("Pokémon Café"), "pokemon-cafe");
/// ```
#[must_use]
pub fn slugify(name: &str) -> String {
    let lowered = deunicode::deunicode(name).to_lowercase().replace('\'', "");
    NON_SLUG
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// Extract the file name from a download URL, dropping query string and fragment
///
/// # Examples
///
/// ```
/// use bundle_mirror::utils::filename_from_url;
///
/// assert_eq!(
///     filename_from_url("https://dl.example.com/a/b/game_1.0.tar.gz?gamekey=x&ttl=1"),
///     "game_1.0.tar.gz"
/// );
/// ```
#[must_use]
pub fn filename_from_url(url: &str) -> String {
    if let Ok(parsed_url) = url::Url::parse(url)
        && let Some(mut segments) = parsed_url.path_segments()
        && let Some(last_segment) = segments.next_back()
        && !last_segment.is_empty()
    {
        return last_segment.to_string();
    }

    // Not an absolute URL, fall back to plain string handling
    let without_query = url.split(['?', '#']).next().unwrap_or("");
    match without_query.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "download".to_string(),
    }
}

/// Path of an item relative to the mirror root:
/// `<platform>/<YYYY-MM-DD> <slug(order)>/<slug(item)>/<file>`
///
/// The item directory falls back to the slug of the machine name, then to the
/// MD5, so it is never empty. An order name without a usable slug leaves just
/// the date.
#[must_use]
pub fn item_relative_path(item: &Item) -> PathBuf {
    let date = item.date.format("%Y-%m-%d");
    let order_dir = match slugify(&item.bundle_name) {
        slug if slug.is_empty() => date.to_string(),
        slug => format!("{date} {slug}"),
    };

    let item_dir = [item.name.as_str(), item.machine_name.as_str()]
        .into_iter()
        .map(slugify)
        .find(|slug| !slug.is_empty())
        .unwrap_or_else(|| item.md5().to_string());

    PathBuf::from(item.platform.as_str())
        .join(order_dir)
        .join(item_dir)
        .join(filename_from_url(&item.url))
}

/// Get a path that does not exist yet, appending `.1`, `.2`, ... to the file name
///
/// Gives up with `AlreadyExists` after [`MAX_RENAME_ATTEMPTS`] candidates.
pub fn unique_suffixed_path(path: &Path) -> std::io::Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let file_name = path.file_name().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let mut candidate_name = file_name.to_os_string();
        candidate_name.push(format!(".{i}"));
        let candidate = path.with_file_name(candidate_name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!(
            "could not find a free name for {} after {} attempts",
            path.display(),
            MAX_RENAME_ATTEMPTS
        ),
    ))
}

/// Format a byte count with binary units, e.g. `1.50 MiB`
#[must_use]
pub fn human_size(bytes: u64) -> String {
    const SUFFIXES: [&str; 5] = ["B", "kiB", "MiB", "GiB", "TiB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let exponent = ((63 - bytes.leading_zeros()) / 10).min(SUFFIXES.len() as u32 - 1);
    let value = bytes as f64 / f64::from(1u32 << 10).powi(exponent as i32);
    format!("{:.2} {}", value, SUFFIXES[exponent as usize])
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewItem, Platform};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn slugify_collapses_punctuation_and_case() {
        assert_eq!(slugify("  Hello,  World!! "), "hello-world");
        assert_eq!(slugify("FTL: Faster Than Light"), "ftl-faster-than-light");
        assert_eq!(slugify("Don't Starve"), "dont-starve");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn slugify_transliterates_non_ascii() {
        assert_eq!(slugify("Pokémon"), "pokemon");
        assert_eq!(slugify("Ōkami HD"), "okami-hd");
        assert_eq!(slugify("Don\u{2019}t Starve"), "dont-starve");
        assert!(!slugify("東方紅魔郷").is_empty());
    }

    #[test]
    fn filename_from_url_handles_missing_query() {
        assert_eq!(
            filename_from_url("https://dl.example.com/files/book.epub"),
            "book.epub"
        );
        assert_eq!(filename_from_url("files/book.pdf?x=1#frag"), "book.pdf");
        assert_eq!(filename_from_url("https://dl.example.com/"), "download");
    }

    #[test]
    fn item_relative_path_follows_layout() {
        let item: Item = NewItem {
            md5: "abc".into(),
            size: 1,
            name: "Some Game: Deluxe".into(),
            machine_name: "somegame_linux".into(),
            platform: Platform::Linux,
            url: "https://dl.example.com/x/somegame-1.2.tar.gz?gamekey=k&ttl=3".into(),
            bundle_name: "Humble Bundle #4".into(),
            date: chrono::NaiveDate::from_ymd_opt(2021, 6, 1)
                .unwrap()
                .and_hms_opt(13, 5, 0)
                .unwrap(),
        }
        .into();

        assert_eq!(
            item_relative_path(&item),
            PathBuf::from("linux")
                .join("2021-06-01 humble-bundle-4")
                .join("some-game-deluxe")
                .join("somegame-1.2.tar.gz")
        );
    }

    fn item_named(name: &str, machine_name: &str, bundle_name: &str) -> Item {
        NewItem {
            md5: "0cc175b9c0f1b6a831c399e269772661".into(),
            size: 1,
            name: name.into(),
            machine_name: machine_name.into(),
            platform: Platform::Audio,
            url: "https://dl.example.com/x/ost.zip".into(),
            bundle_name: bundle_name.into(),
            date: chrono::NaiveDate::from_ymd_opt(2021, 3, 4)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
        .into()
    }

    #[test]
    fn item_directory_is_never_empty() {
        let by_machine_name = item_named("!!!", "ost_flac", "Bundle");
        assert_eq!(
            item_relative_path(&by_machine_name),
            PathBuf::from("audio")
                .join("2021-03-04 bundle")
                .join("ost-flac")
                .join("ost.zip")
        );

        let by_md5 = item_named("???", "", "Bundle");
        assert_eq!(
            item_relative_path(&by_md5),
            PathBuf::from("audio")
                .join("2021-03-04 bundle")
                .join("0cc175b9c0f1b6a831c399e269772661")
                .join("ost.zip")
        );
    }

    #[test]
    fn unsluggable_order_name_keeps_the_date() {
        let item = item_named("Soundtrack", "ost", "***");
        assert_eq!(
            item_relative_path(&item),
            PathBuf::from("audio")
                .join("2021-03-04")
                .join("soundtrack")
                .join("ost.zip")
        );
    }

    #[test]
    fn unique_suffixed_path_returns_original_when_free() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file.zip");
        assert_eq!(unique_suffixed_path(&path).unwrap(), path);
    }

    #[test]
    fn unique_suffixed_path_increments_counter() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file.zip");
        fs::write(&path, "original").unwrap();

        let first = unique_suffixed_path(&path).unwrap();
        assert_eq!(first, temp_dir.path().join("file.zip.1"));

        fs::write(&first, "first").unwrap();
        let second = unique_suffixed_path(&path).unwrap();
        assert_eq!(second, temp_dir.path().join("file.zip.2"));
    }

    #[test]
    fn human_size_formats_binary_units() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(512), "512.00 B");
        assert_eq!(human_size(1024), "1.00 kiB");
        assert_eq!(human_size(1536 * 1024), "1.50 MiB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024), "3.00 GiB");
    }
}
