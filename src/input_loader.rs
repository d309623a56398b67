use crate::catalog::BucketKey;
use crate::error::{CatalogError, Result};
use crate::site_profile::{render_query, slugify, SiteProfile};
use calamine::{open_workbook_auto, Data, Reader};
use log::{error, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// One row of a targets file. Every column is optional; a row needs at least one.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct TargetRecord {
    #[serde(default, rename = "Brand", alias = "brand", alias = "Make", alias = "make", alias = "Domain", alias = "domain")]
    pub brand: Option<String>,
    #[serde(default, rename = "Model", alias = "model", alias = "Subdomain", alias = "subdomain")]
    pub model: Option<String>,
    #[serde(default, rename = "Part", alias = "part", alias = "Category", alias = "category")]
    pub part: Option<String>,
}

/// A concrete unit of work: one bucket, scraped with every query of the profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    pub brand: String,
    pub model: String,
    pub part: String,
}

impl Target {
    pub fn new(brand: &str, model: &str, part: &str) -> Self {
        Target {
            brand: brand.trim().to_string(),
            model: model.trim().to_string(),
            part: part.trim().to_string(),
        }
    }

    /// Levels keep their position, so ("Audi", "", "turbo") and
    /// ("Audi", "turbo", "") stay apart. A target naming a single level is a
    /// flat bucket under that name.
    pub fn bucket(&self) -> BucketKey {
        let levels = [&self.brand, &self.model, &self.part];
        let mut named = levels.iter().filter(|level| !level.is_empty());
        match (named.next(), named.next()) {
            (Some(only), None) => BucketKey::flat(only.as_str()),
            _ => BucketKey::new(self.brand.as_str(), self.model.as_str(), self.part.as_str()),
        }
    }

    pub fn vars(&self) -> HashMap<&'static str, String> {
        HashMap::from([
            ("brand", self.brand.clone()),
            ("brand_slug", slugify(&self.brand)),
            ("model", self.model.clone()),
            ("part", self.part.clone()),
        ])
    }

    /// Template variables for one query, including the rendered `{query}`.
    pub fn query_vars(&self, query_template: &str) -> HashMap<&'static str, String> {
        let mut vars = self.vars();
        let query = render_query(query_template, &vars);
        vars.insert("query", query);
        vars
    }
}

pub fn load_records<P: AsRef<Path>>(filename: P) -> Result<Vec<TargetRecord>> {
    let path_ref = filename.as_ref();
    if !path_ref.exists() {
        return Err(CatalogError::Input(format!("targets file {:?} does not exist", path_ref)));
    }

    let is_excel = path_ref
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| matches!(ext.to_lowercase().as_str(), "xlsx" | "xls" | "xlsm" | "ods"));

    let records = if is_excel { load_excel(path_ref)? } else { load_csv(path_ref)? };
    if records.is_empty() {
        warn!("Targets file {:?} holds no usable rows", path_ref);
    }
    Ok(records)
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn usable(record: TargetRecord) -> Option<TargetRecord> {
    let record = TargetRecord {
        brand: clean(record.brand),
        model: clean(record.model),
        part: clean(record.part),
    };
    if record == TargetRecord::default() {
        None
    } else {
        Some(record)
    }
}

fn load_csv(path: &Path) -> Result<Vec<TargetRecord>> {
    let file = File::open(path)
        .map_err(|e| CatalogError::Input(format!("could not open CSV file {:?}: {}", path, e)))?;

    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(file);

    let mut records = Vec::new();
    for result in rdr.deserialize::<TargetRecord>() {
        match result {
            Ok(record) => records.extend(usable(record)),
            Err(e) => error!("Error parsing CSV record: {}", e),
        }
    }
    info!("Loaded {} targets from CSV {:?}", records.len(), path);
    Ok(records)
}

fn load_excel(path: &Path) -> Result<Vec<TargetRecord>> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| CatalogError::Input(format!("could not open spreadsheet {:?}: {}", path, e)))?;

    let mut records = Vec::new();
    let Some((_name, range)) = workbook.worksheets().into_iter().next() else {
        return Ok(records);
    };

    let mut brand_idx = None;
    let mut model_idx = None;
    let mut part_idx = None;
    for (row_idx, row) in range.rows().enumerate() {
        if row_idx == 0 {
            for (col_idx, cell) in row.iter().enumerate() {
                let header = cell.to_string().to_lowercase();
                if header.contains("brand") || header.contains("make") || header.contains("domain") {
                    brand_idx = Some(col_idx);
                } else if header.contains("model") {
                    model_idx = Some(col_idx);
                } else if header.contains("part") || header.contains("category") {
                    part_idx = Some(col_idx);
                }
            }
            if brand_idx.is_none() && part_idx.is_none() {
                return Err(CatalogError::Input(format!(
                    "spreadsheet {:?} has neither a 'Brand' nor a 'Part' column",
                    path
                )));
            }
            continue;
        }

        let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i)).map(|c: &Data| c.to_string());
        records.extend(usable(TargetRecord {
            brand: cell(brand_idx),
            model: cell(model_idx),
            part: cell(part_idx),
        }));
    }

    info!("Loaded {} targets from spreadsheet {:?}", records.len(), path);
    Ok(records)
}

/// Turns records into targets. Rows without a part are crossed with the
/// profile's part list; with no records at all the profile's own brand table
/// (or, failing that, its part list) is used.
pub fn expand_targets(records: &[TargetRecord], profile: &SiteProfile) -> Vec<Target> {
    let parts: Vec<&str> = profile.parts.iter().map(String::as_str).collect();
    let mut targets = Vec::new();

    let mut push_row = |brand: &str, model: &str, part: Option<&str>| match part {
        Some(part) => targets.push(Target::new(brand, model, part)),
        None if parts.is_empty() => targets.push(Target::new(brand, model, "")),
        None => targets.extend(parts.iter().map(|p| Target::new(brand, model, p))),
    };

    if !records.is_empty() {
        for record in records {
            push_row(
                record.brand.as_deref().unwrap_or(""),
                record.model.as_deref().unwrap_or(""),
                record.part.as_deref(),
            );
        }
    } else if !profile.brands.is_empty() {
        for (brand, models) in &profile.brands {
            if models.is_empty() {
                push_row(brand, "", None);
            }
            for model in models {
                push_row(brand, model, None);
            }
        }
    } else {
        for part in &profile.parts {
            push_row("", "", Some(part));
        }
    }

    let mut seen = std::collections::HashSet::new();
    targets.retain(|t| seen.insert(t.bucket()));
    targets
}
