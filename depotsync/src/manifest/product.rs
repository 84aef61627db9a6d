//! Product-level manifests and the build listing.
//!
//! A product manifest names the depots of one build and the products (base
//! game and DLC) they belong to. The per-depot file lists are separate
//! documents decoded by [`super::decode`].

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::compression::decompress;
use super::error::ManifestResult;
use super::json::{opt_string_or_number, string_or_number};

/// Language tag meaning "applies regardless of language".
pub const WILDCARD_LANGUAGE: &str = "*";

const NEUTRAL_LANGUAGE: &str = "neutral";

/// Normalize a depot language list: `neutral` becomes the wildcard and an
/// empty list means every language.
pub fn normalize_languages(languages: Vec<String>) -> Vec<String> {
    if languages.is_empty() {
        return vec![WILDCARD_LANGUAGE.to_string()];
    }
    languages
        .into_iter()
        .map(|lang| {
            if lang.eq_ignore_ascii_case(NEUTRAL_LANGUAGE) {
                WILDCARD_LANGUAGE.to_string()
            } else {
                lang
            }
        })
        .collect()
}

/// A downloadable bundle of files for one language/bitness combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Depot {
    pub product_id: String,
    pub languages: Vec<String>,
    /// `None` means the depot applies to every bitness.
    pub bitness: Option<Vec<String>>,
    /// Reference used to fetch the depot's file manifest.
    pub manifest: String,
    pub size: u64,
    pub compressed_size: u64,
}

impl Depot {
    pub fn is_language_neutral(&self) -> bool {
        self.languages.iter().any(|l| l == WILDCARD_LANGUAGE)
    }
}

/// A base game or DLC declared by a product manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub product_id: String,
    pub name: String,
}

/// Depots and products of one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductManifest {
    pub base_product_id: String,
    pub install_directory: String,
    pub depots: Vec<Depot>,
    /// Redistributable dependency ids.
    pub dependencies: Vec<String>,
    pub products: Vec<Product>,
    /// Generation 1 only; part of the depot manifest URLs.
    pub timestamp: Option<String>,
    pub generation: u32,
}

/// One release of a product.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Build {
    #[serde(default, deserialize_with = "string_or_number")]
    pub build_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub product_id: String,
    #[serde(rename = "os", default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_generation")]
    pub generation: u32,
    #[serde(default)]
    pub version_name: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub link: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub legacy_build_id: Option<String>,
}

fn default_platform() -> String {
    "windows".to_string()
}

fn default_generation() -> u32 {
    2
}

/// The build listing of a product.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildsResponse {
    #[serde(default)]
    pub total_count: u32,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub items: Vec<Build>,
}

/// Parse a (possibly compressed) build listing.
pub fn parse_builds(data: &[u8]) -> ManifestResult<BuildsResponse> {
    let text = decompress(data)?;
    Ok(serde_json::from_slice(&text)?)
}

// Generation 2 wire form.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductManifestV2 {
    #[serde(default, deserialize_with = "string_or_number")]
    base_product_id: String,
    #[serde(default)]
    install_directory: String,
    #[serde(default)]
    depots: Vec<DepotV2>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    products: Vec<ProductV2>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DepotV2 {
    #[serde(default, deserialize_with = "string_or_number")]
    product_id: String,
    #[serde(default)]
    languages: Vec<String>,
    #[serde(default)]
    os_bitness: Option<Vec<String>>,
    #[serde(default)]
    manifest: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    compressed_size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductV2 {
    #[serde(default, deserialize_with = "string_or_number")]
    product_id: String,
    #[serde(default)]
    name: String,
}

// Generation 1 wire form (`repository.json`).

#[derive(Debug, Deserialize)]
struct RepositoryV1 {
    product: ProductV1,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductV1 {
    #[serde(default)]
    install_directory: String,
    #[serde(rename = "rootGameID", default, deserialize_with = "string_or_number")]
    root_game_id: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    timestamp: Option<String>,
    #[serde(default)]
    depots: Vec<DepotV1>,
    #[serde(rename = "gameIDs", default)]
    game_ids: Vec<GameIdV1>,
}

#[derive(Debug, Deserialize)]
struct DepotV1 {
    #[serde(default)]
    redist: Option<String>,
    #[serde(rename = "gameIDs", default)]
    game_ids: Vec<Value>,
    #[serde(default)]
    languages: Vec<String>,
    #[serde(default)]
    manifest: String,
    #[serde(default)]
    size: Value,
}

#[derive(Debug, Deserialize)]
struct GameIdV1 {
    #[serde(rename = "gameID", default, deserialize_with = "string_or_number")]
    game_id: String,
    #[serde(default)]
    name: Option<Value>,
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_to_u64(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

impl ProductManifestV2 {
    fn normalize(self) -> ProductManifest {
        ProductManifest {
            base_product_id: self.base_product_id,
            install_directory: self.install_directory,
            depots: self
                .depots
                .into_iter()
                .map(|d| Depot {
                    product_id: d.product_id,
                    languages: normalize_languages(d.languages),
                    bitness: d.os_bitness,
                    manifest: d.manifest,
                    size: d.size,
                    compressed_size: d.compressed_size,
                })
                .collect(),
            dependencies: self.dependencies,
            products: self
                .products
                .into_iter()
                .map(|p| Product {
                    product_id: p.product_id,
                    name: p.name,
                })
                .collect(),
            timestamp: None,
            generation: 2,
        }
    }
}

impl RepositoryV1 {
    fn normalize(self) -> ProductManifest {
        let product = self.product;
        let mut depots = Vec::new();
        let mut dependencies = Vec::new();

        for depot in product.depots {
            if let Some(redist) = depot.redist {
                dependencies.push(redist);
                continue;
            }
            let size = value_to_u64(&depot.size);
            depots.push(Depot {
                product_id: depot.game_ids.first().map(value_to_string).unwrap_or_default(),
                languages: normalize_languages(depot.languages),
                bitness: None,
                manifest: depot.manifest,
                size,
                compressed_size: size,
            });
        }

        let products = product
            .game_ids
            .into_iter()
            .map(|g| {
                let name = g
                    .name
                    .as_ref()
                    .and_then(|n| n.get("en").or_else(|| n.get("English")))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| g.game_id.clone());
                Product {
                    product_id: g.game_id,
                    name,
                }
            })
            .collect();

        ProductManifest {
            base_product_id: product.root_game_id,
            install_directory: product.install_directory,
            depots,
            dependencies,
            products,
            timestamp: product.timestamp,
            generation: 1,
        }
    }
}

/// Decode a (possibly compressed) product manifest of either generation.
pub fn decode_product_manifest(data: &[u8]) -> ManifestResult<ProductManifest> {
    let text = decompress(data)?;
    let value: Value = serde_json::from_slice(&text)?;

    let is_gen1 = value
        .get("product")
        .map(|p| p.get("depots").is_some())
        .unwrap_or(false);
    let manifest = if is_gen1 {
        serde_json::from_value::<RepositoryV1>(value)?.normalize()
    } else {
        serde_json::from_value::<ProductManifestV2>(value)?.normalize()
    };

    debug!(
        generation = manifest.generation,
        base_product_id = %manifest.base_product_id,
        depots = manifest.depots.len(),
        products = manifest.products.len(),
        "Decoded product manifest"
    );
    Ok(manifest)
}
