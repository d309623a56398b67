use crate::catalog::{BucketKey, CatalogTree, Entry};
use crate::catalog_store::write_atomically;
use crate::error::{CatalogError, Result};
use log::info;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const UNKNOWN: &str = "Unknown";

/// brand → model → part → sorted OEM codes.
pub type CodeIndex = BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeSet<String>>>>;

/// Splits a free-text model field ("Audi A3 8P") into brand and model.
/// A leading brand is stripped from the model, a brand found elsewhere in
/// the text keeps the text whole.
pub fn derive_brand_model(model_field: &str, known_brands: &[String]) -> (String, String) {
    let model_field = model_field.trim();
    let mut brands: Vec<&String> = known_brands.iter().filter(|b| !b.trim().is_empty()).collect();
    // "Land Rover" must win over "Rover"
    brands.sort_by_key(|b| std::cmp::Reverse(b.len()));

    for brand in &brands {
        let prefix = model_field.get(..brand.len());
        if prefix.map_or(false, |p| p.eq_ignore_ascii_case(brand)) {
            let rest = model_field[brand.len()..].trim();
            let model = if rest.is_empty() { model_field } else { rest };
            return (brand.to_string(), model.to_string());
        }
    }

    let lower = model_field.to_lowercase();
    for brand in &brands {
        if lower.contains(&brand.to_lowercase()) {
            return (brand.to_string(), model_field.to_string());
        }
    }

    let model = if model_field.is_empty() { UNKNOWN } else { model_field };
    (UNKNOWN.to_string(), model.to_string())
}

fn payload_model(entry: &Entry) -> String {
    match entry.payload.get("model") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Three-level buckets already name brand, model and part. Other buckets
/// take the missing levels from each entry's `model` field.
fn locate(bucket: &BucketKey, entry: &Entry, known_brands: &[String]) -> (String, String, String) {
    if !bucket.category.is_empty() {
        if !bucket.subdomain.is_empty() {
            return (bucket.domain.clone(), bucket.subdomain.clone(), bucket.category.clone());
        }
        let (_, model) = derive_brand_model(&payload_model(entry), std::slice::from_ref(&bucket.domain));
        return (bucket.domain.clone(), model, bucket.category.clone());
    }
    let (brand, model) = derive_brand_model(&payload_model(entry), known_brands);
    if bucket.subdomain.is_empty() {
        (brand, model, bucket.domain.clone())
    } else {
        (bucket.domain.clone(), model, bucket.subdomain.clone())
    }
}

pub fn build_index(parts: &CatalogTree, known_brands: &[String]) -> CodeIndex {
    let mut index = CodeIndex::new();
    for (bucket, entries) in parts.iter() {
        for entry in entries {
            let (brand, model, part) = locate(&bucket, entry, known_brands);
            index
                .entry(brand)
                .or_default()
                .entry(model)
                .or_default()
                .entry(part)
                .or_default()
                .extend(entry.known_identifiers().cloned());
        }
    }
    index
}

pub fn write_index(index: &CodeIndex, path: &Path) -> Result<()> {
    let mut json = serde_json::to_string_pretty(index)?;
    json.push('\n');
    write_atomically(path, json.as_bytes()).map_err(|source| CatalogError::StoreWriteFailure {
        path: path.to_path_buf(),
        source,
    })?;
    let codes: usize = index
        .values()
        .flat_map(|models| models.values())
        .flat_map(|parts| parts.values())
        .map(BTreeSet::len)
        .sum();
    info!("Wrote code index with {} brands and {} codes to {:?}", index.len(), codes, path);
    Ok(())
}
