//! Depot, build and file selection.
//!
//! Pure functions over decoded manifests. Nothing here performs I/O or keeps
//! state; every function returns a new selection and logs the counts.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::manifest::{Build, Depot, FileEntry, Product, ProductManifest, WILDCARD_LANGUAGE};

/// Build generation preferred when the caller does not say otherwise.
pub const DEFAULT_GENERATION: u32 = 2;

/// Return the first build of `preferred_generation`.
///
/// Never falls back to another generation: a listing with only generation 1
/// builds yields `None` when generation 2 is requested.
pub fn select_build(builds: &[Build], preferred_generation: u32) -> Option<&Build> {
    let selected = builds.iter().find(|b| b.generation == preferred_generation);
    log_selection(builds, preferred_generation, None, selected);
    selected
}

/// Like [`select_build`] but also requires a platform match
/// (case-insensitive).
pub fn select_build_for_platform<'a>(
    builds: &'a [Build],
    preferred_generation: u32,
    platform: &str,
) -> Option<&'a Build> {
    let selected = builds.iter().find(|b| {
        b.generation == preferred_generation && b.platform.eq_ignore_ascii_case(platform)
    });
    log_selection(builds, preferred_generation, Some(platform), selected);
    selected
}

fn log_selection(builds: &[Build], generation: u32, platform: Option<&str>, selected: Option<&Build>) {
    match selected {
        Some(build) => debug!(
            build_id = %build.build_id,
            generation = build.generation,
            platform = %build.platform,
            "Selected build"
        ),
        None => {
            let available: Vec<String> = builds
                .iter()
                .map(|b| format!("gen{}/{}", b.generation, b.platform))
                .collect();
            warn!(
                generation,
                platform = platform.unwrap_or("any"),
                available = ?available,
                "No matching build"
            );
        }
    }
}

/// Keep depots whose languages contain the wildcard or exactly `language`.
pub fn filter_by_language<'a>(depots: &'a [Depot], language: &str) -> Vec<&'a Depot> {
    let filtered: Vec<_> = depots
        .iter()
        .filter(|d| {
            d.languages
                .iter()
                .any(|l| l == WILDCARD_LANGUAGE || l == language)
        })
        .collect();
    debug!(kept = filtered.len(), total = depots.len(), language, "Filtered depots by language");
    filtered
}

/// Keep depots without a bitness restriction or whose list contains `bitness`.
pub fn filter_by_bitness<'a, D>(depots: D, bitness: &str) -> Vec<&'a Depot>
where
    D: IntoIterator<Item = &'a Depot>,
{
    let (kept, dropped): (Vec<_>, Vec<_>) = depots.into_iter().partition(|d| match &d.bitness {
        None => true,
        Some(list) => list.iter().any(|b| b == bitness),
    });
    debug!(kept = kept.len(), dropped = dropped.len(), bitness, "Filtered depots by bitness");
    kept
}

/// Keep depots whose product is owned.
pub fn filter_by_ownership<'a, D>(depots: D, owned_product_ids: &HashSet<String>) -> Vec<&'a Depot>
where
    D: IntoIterator<Item = &'a Depot>,
{
    let (kept, dropped): (Vec<_>, Vec<_>) = depots
        .into_iter()
        .partition(|d| owned_product_ids.contains(&d.product_id));
    debug!(kept = kept.len(), dropped = dropped.len(), "Filtered depots by ownership");
    kept
}

/// Split files into `(base, dlc)`. Files without a product id belong to the
/// base game.
pub fn separate_base_and_dlc<'a>(
    files: &'a [FileEntry],
    base_product_id: &str,
) -> (Vec<&'a FileEntry>, Vec<&'a FileEntry>) {
    let (base, dlc): (Vec<_>, Vec<_>) = files
        .iter()
        .partition(|f| f.product_id().map_or(true, |id| id == base_product_id));
    debug!(base = base.len(), dlc = dlc.len(), "Separated base and DLC files");
    (base, dlc)
}

/// Split files into `(game, support)`.
pub fn separate_support_files<'a, F>(files: F) -> (Vec<&'a FileEntry>, Vec<&'a FileEntry>)
where
    F: IntoIterator<Item = &'a FileEntry>,
{
    let (support, game): (Vec<_>, Vec<_>) = files.into_iter().partition(|f| f.is_support());
    debug!(game = game.len(), support = support.len(), "Separated support files");
    (game, support)
}

/// Every declared product other than the base product.
pub fn find_dlc_products(manifest: &ProductManifest) -> Vec<&Product> {
    manifest
        .products
        .iter()
        .filter(|p| p.product_id != manifest.base_product_id)
        .collect()
}

pub fn has_dlc(manifest: &ProductManifest) -> bool {
    !find_dlc_products(manifest).is_empty()
}

/// Files carrying at least one of `tags`.
pub fn files_with_tags<'a>(files: &'a [FileEntry], tags: &[String]) -> Vec<&'a FileEntry> {
    files
        .iter()
        .filter(|f| f.install_tags().iter().any(|t| tags.contains(t)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(id: &str, generation: u32, platform: &str) -> Build {
        Build {
            build_id: id.to_string(),
            product_id: "1".to_string(),
            platform: platform.to_string(),
            generation,
            version_name: String::new(),
            branch: None,
            link: String::new(),
            legacy_build_id: None,
        }
    }

    fn depot(product: &str, languages: &[&str], bitness: Option<&[&str]>) -> Depot {
        Depot {
            product_id: product.to_string(),
            languages: languages.iter().map(|s| s.to_string()).collect(),
            bitness: bitness.map(|b| b.iter().map(|s| s.to_string()).collect()),
            manifest: String::new(),
            size: 0,
            compressed_size: 0,
        }
    }

    #[test]
    fn test_select_build_prefers_requested_generation() {
        let builds = vec![build("old", 1, "windows"), build("new", 2, "windows")];
        assert_eq!(select_build(&builds, 2).unwrap().build_id, "new");
        assert_eq!(select_build(&builds, 1).unwrap().build_id, "old");
    }

    #[test]
    fn test_select_build_never_falls_back() {
        let builds = vec![build("old", 1, "windows")];
        assert!(select_build(&builds, 2).is_none());
        assert!(select_build(&[], DEFAULT_GENERATION).is_none());
    }

    #[test]
    fn test_select_build_for_platform() {
        let builds = vec![build("mac", 2, "osx"), build("win", 2, "Windows")];
        assert_eq!(
            select_build_for_platform(&builds, 2, "windows").unwrap().build_id,
            "win"
        );
        assert!(select_build_for_platform(&builds, 2, "linux").is_none());
    }

    #[test]
    fn test_language_filter_is_case_sensitive() {
        let depots = vec![
            depot("1", &["en-US"], None),
            depot("1", &["*"], None),
            depot("1", &["de-DE"], None),
        ];
        assert_eq!(filter_by_language(&depots, "en-US").len(), 2);
        assert_eq!(filter_by_language(&depots, "EN-us").len(), 1);
    }

    #[test]
    fn test_bitness_filter() {
        let depots = vec![
            depot("1", &["*"], None),
            depot("1", &["*"], Some(&["64"])),
            depot("1", &["*"], Some(&["32"])),
        ];
        let kept = filter_by_bitness(&depots, "64");
        assert_eq!(kept.len(), 2);
        assert!(kept[0].bitness.is_none());
        assert_eq!(kept[1].bitness.as_deref(), Some(&["64".to_string()][..]));
    }

    #[test]
    fn test_ownership_filter() {
        let depots = vec![depot("1", &["*"], None), depot("2", &["*"], None)];
        let owned: HashSet<String> = ["2".to_string()].into_iter().collect();
        let kept = filter_by_ownership(&depots, &owned);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].product_id, "2");
    }

    #[test]
    fn test_separate_base_and_dlc() {
        let files = vec![
            FileEntry::builder("a").build().unwrap(),
            FileEntry::builder("b")
                .product_id(Some("base".into()))
                .build()
                .unwrap(),
            FileEntry::builder("c")
                .product_id(Some("dlc".into()))
                .build()
                .unwrap(),
        ];
        let (base, dlc) = separate_base_and_dlc(&files, "base");
        assert_eq!(base.len(), 2);
        assert_eq!(dlc[0].path(), "c");
    }

    #[test]
    fn test_separate_support_files() {
        let files = vec![
            FileEntry::builder("game.exe").build().unwrap(),
            FileEntry::builder("__redist/vc.exe").build().unwrap(),
        ];
        let (game, support) = separate_support_files(&files);
        assert_eq!(game[0].path(), "game.exe");
        assert_eq!(support[0].path(), "__redist/vc.exe");
    }

    #[test]
    fn test_find_dlc_products() {
        let manifest = ProductManifest {
            base_product_id: "1".into(),
            install_directory: String::new(),
            depots: vec![],
            dependencies: vec![],
            products: vec![
                Product {
                    product_id: "1".into(),
                    name: "Base".into(),
                },
                Product {
                    product_id: "2".into(),
                    name: "DLC".into(),
                },
            ],
            timestamp: None,
            generation: 2,
        };
        let dlc = find_dlc_products(&manifest);
        assert_eq!(dlc.len(), 1);
        assert_eq!(dlc[0].name, "DLC");
        assert!(has_dlc(&manifest));
    }

    #[test]
    fn test_files_with_tags() {
        let files = vec![
            FileEntry::builder("a")
                .install_tags(vec!["ja".into()])
                .build()
                .unwrap(),
            FileEntry::builder("b").build().unwrap(),
        ];
        assert_eq!(files_with_tags(&files, &["ja".to_string()]).len(), 1);
    }
}
