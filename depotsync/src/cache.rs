//! In-memory product install cache.
//!
//! Answers "is this product installed, and where" without touching the
//! store's database, plus the reverse lookup from the numeric app id a
//! launcher assigns to the store's product id. The cache is owned by
//! whoever owns the store session; nothing here is global.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

/// Install state of one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallInfo {
    pub is_installed: bool,
    pub install_path: PathBuf,
}

/// One row of a library sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedProduct {
    pub product_id: String,
    pub app_id: u32,
    pub install: InstallInfo,
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Install info keyed by product id, with an app id index.
#[derive(Debug, Default)]
pub struct ProductCache {
    install_info: RwLock<HashMap<String, InstallInfo>>,
    app_ids: RwLock<HashMap<u32, String>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ProductCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole cache with the result of a library sync.
    pub fn invalidate_on_sync<I>(&self, products: I)
    where
        I: IntoIterator<Item = CachedProduct>,
    {
        let mut install_info = self.install_info.write();
        let mut app_ids = self.app_ids.write();
        install_info.clear();
        app_ids.clear();
        for product in products {
            app_ids.insert(product.app_id, product.product_id.clone());
            install_info.insert(product.product_id, product.install);
        }
        debug!(entries = install_info.len(), "Product cache refreshed");
    }

    /// Forget one product, including its app id mapping.
    pub fn invalidate_product(&self, product_id: &str) {
        self.install_info.write().remove(product_id);
        self.app_ids.write().retain(|_, id| id != product_id);
    }

    /// Record a changed install state, e.g. after a download or uninstall.
    pub fn update_install(&self, product_id: &str, is_installed: bool, install_path: &Path) {
        self.install_info.write().insert(
            product_id.to_string(),
            InstallInfo {
                is_installed,
                install_path: install_path.to_path_buf(),
            },
        );
    }

    pub fn register_app_id(&self, app_id: u32, product_id: &str) {
        self.app_ids.write().insert(app_id, product_id.to_string());
    }

    pub fn install_info(&self, product_id: &str) -> Option<InstallInfo> {
        let info = self.install_info.read().get(product_id).cloned();
        let counter = if info.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        info
    }

    pub fn is_installed(&self, product_id: &str) -> bool {
        self.install_info(product_id)
            .is_some_and(|info| info.is_installed)
    }

    /// Install path of an installed product.
    pub fn install_path(&self, product_id: &str) -> Option<PathBuf> {
        self.install_info(product_id)
            .filter(|info| info.is_installed)
            .map(|info| info.install_path)
    }

    pub fn product_id_for_app(&self, app_id: u32) -> Option<String> {
        self.app_ids.read().get(&app_id).cloned()
    }

    pub fn install_info_for_app(&self, app_id: u32) -> Option<InstallInfo> {
        let product_id = self.product_id_for_app(app_id)?;
        self.install_info(&product_id)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.install_info.read().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
