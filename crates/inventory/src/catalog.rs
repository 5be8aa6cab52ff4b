//! Catalog lookup for bulk uploads.
//!
//! Products and warehouses are owned by an external catalog; uploads refer to
//! them by free text. Matching is case-insensitive, accent-insensitive and
//! whitespace-tolerant.

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use stockledger_core::{ProductId, WarehouseId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub barcode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogWarehouse {
    pub id: WarehouseId,
    pub name: String,
}

/// Snapshot of the catalogs an upload is validated against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalogs {
    #[serde(default)]
    pub products: Vec<CatalogProduct>,
    #[serde(default)]
    pub warehouses: Vec<CatalogWarehouse>,
}

/// Outcome of a free-text lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Found(T),
    NotFound,
    /// More than one candidate matched; carries their display names.
    Ambiguous(Vec<String>),
}

impl Catalogs {
    /// Resolve a product by SKU, barcode or name.
    ///
    /// Exact (normalized) matches on any field win. Otherwise a unique partial
    /// match on the name is accepted.
    pub fn find_product(&self, text: &str) -> Resolution<&CatalogProduct> {
        let wanted = normalize_text(text);
        if wanted.is_empty() {
            return Resolution::NotFound;
        }

        let exact: Vec<&CatalogProduct> = self
            .products
            .iter()
            .filter(|p| {
                normalize_text(&p.name) == wanted
                    || p.sku.as_deref().is_some_and(|s| normalize_text(s) == wanted)
                    || p.barcode.as_deref().is_some_and(|b| normalize_text(b) == wanted)
            })
            .collect();
        if !exact.is_empty() {
            return pick(exact, |p| p.name.clone());
        }

        let partial: Vec<&CatalogProduct> = self
            .products
            .iter()
            .filter(|p| normalize_text(&p.name).contains(&wanted))
            .collect();
        pick(partial, |p| p.name.clone())
    }

    /// Resolve a warehouse by name (exact, then unique partial match).
    pub fn find_warehouse(&self, text: &str) -> Resolution<&CatalogWarehouse> {
        let wanted = normalize_text(text);
        if wanted.is_empty() {
            return Resolution::NotFound;
        }

        let exact: Vec<&CatalogWarehouse> = self
            .warehouses
            .iter()
            .filter(|w| normalize_text(&w.name) == wanted)
            .collect();
        if !exact.is_empty() {
            return pick(exact, |w| w.name.clone());
        }

        let partial: Vec<&CatalogWarehouse> = self
            .warehouses
            .iter()
            .filter(|w| normalize_text(&w.name).contains(&wanted))
            .collect();
        pick(partial, |w| w.name.clone())
    }
}

fn pick<T>(candidates: Vec<T>, name: impl Fn(&T) -> String) -> Resolution<T> {
    match candidates.len() {
        0 => Resolution::NotFound,
        1 => candidates
            .into_iter()
            .next()
            .map(Resolution::Found)
            .unwrap_or(Resolution::NotFound),
        _ => Resolution::Ambiguous(candidates.iter().map(name).collect()),
    }
}

/// Lowercase, strip diacritics and collapse runs of whitespace.
///
/// `"  Café   Molido "` and `"cafe molido"` normalize to the same string,
/// whether the accent arrives precomposed or as a combining mark.
pub fn normalize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    for ch in input.nfd().filter(|c| !is_combining_mark(*c)) {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.extend(ch.to_lowercase().filter(|c| !is_combining_mark(*c)));
    }
    out
}
