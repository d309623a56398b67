use crate::catalog::RESERVED_KEYS;
use crate::error::{CatalogError, Result};
use crate::extractor::CodePattern;
use crate::skip_policy::{BucketPolicy, SkipPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// How one site is queried and how its markup maps onto catalog entries.
/// Switching between "scrape cars" and "scrape parts" is a matter of
/// choosing a different profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteProfile {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// First results page. Placeholders: `{query}` (url-encoded), `{brand}`,
    /// `{model}`, `{part}`, `{brand_slug}`, `{page}`.
    pub search_url: String,
    #[serde(default = "default_queries")]
    pub queries: Vec<String>,
    #[serde(default)]
    pub pagination: Pagination,
    pub item_selector: String,
    /// Stop reading a page once this many of its items were admitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items_per_page: Option<usize>,
    /// Items whose `title` field contains one of these (case-insensitive) are ignored.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_titles: Vec<String>,
    pub fields: Vec<FieldRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_fields: Vec<String>,
    pub identifier: IdentifierRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<DetailPage>,
    /// Added to every entry unless a rule already set the field.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub constants: Map<String, Value>,
    /// Copy the target's brand/model/part into each entry.
    #[serde(default)]
    pub record_target: bool,
    /// Parts crossed with every target row that names none.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<String>,
    /// Default targets (brand → models) used when no targets file is given.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub brands: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub policy: SkipPolicy,
}

fn default_queries() -> Vec<String> {
    vec!["{brand} {model} {part}".to_string()]
}

fn default_max_pages() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    /// URL of pages after the first; falls back to `search_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Links whose text is a page number; the largest caps the page count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count_selector: Option<String>,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            page_url: None,
            max_pages: default_max_pages(),
            page_count_selector: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    #[default]
    Text,
    /// Resolved against the page URL.
    Url,
    /// Amount into the field, currency code into `currency`.
    Price,
    Integer,
    Year,
    Mileage,
}

/// Several rules may target the same field; the first one yielding a value wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    /// Relative to the item (or the detail page). Absent means the item itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Read the first non-empty attribute instead of the text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<String>,
    /// Look the value up in a `<dt>label</dt><dd>value</dd>` details table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub kind: FieldKind,
    /// Used for identification only, never persisted.
    #[serde(default)]
    pub transient: bool,
}

impl FieldRule {
    pub fn text(name: &str, selector: &str) -> Self {
        FieldRule {
            name: name.to_string(),
            selector: Some(selector.to_string()),
            attrs: Vec::new(),
            labels: Vec::new(),
            kind: FieldKind::Text,
            transient: false,
        }
    }

    pub fn attr(name: &str, selector: &str, attrs: &[&str]) -> Self {
        FieldRule {
            attrs: attrs.iter().map(|a| a.to_string()).collect(),
            ..Self::text(name, selector)
        }
    }

    pub fn labelled(name: &str, labels: &[&str]) -> Self {
        FieldRule {
            selector: None,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            ..Self::text(name, "")
        }
    }

    pub fn kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn on_item(mut self) -> Self {
        self.selector = None;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum IdentifierRule {
    /// Part codes mined from the text of the named fields.
    Codes {
        from_fields: Vec<String>,
        #[serde(default)]
        pattern: CodePattern,
    },
    /// Site-native id read from an item attribute, falling back to the
    /// trailing number of the URL in `url_field`.
    ListingId {
        #[serde(default)]
        attrs: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url_field: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailPage {
    /// Field holding the detail page URL.
    pub link_field: String,
    /// Detail values replace those read from the results page.
    pub fields: Vec<FieldRule>,
}

impl SiteProfile {
    /// A built-in profile name or a path to a JSON profile.
    pub fn load(name_or_path: &str) -> Result<Self> {
        if let Some(profile) = builtin(name_or_path) {
            return Ok(profile);
        }
        let path = Path::new(name_or_path);
        if !path.exists() {
            return Err(CatalogError::Profile(format!(
                "'{}' is neither a built-in profile ({}) nor an existing file",
                name_or_path,
                builtin_names().join(", ")
            )));
        }
        let content = fs::read_to_string(path)
            .map_err(|e| CatalogError::Profile(format!("cannot read {:?}: {}", path, e)))?;
        let profile: SiteProfile = serde_json::from_str(&content)
            .map_err(|e| CatalogError::Profile(format!("cannot parse {:?}: {}", path, e)))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Checks cross references between rules. Selector syntax is checked when
    /// the page parser compiles them.
    pub fn validate(&self) -> Result<()> {
        if self.queries.is_empty() {
            return Err(CatalogError::Profile(format!("profile '{}' has no queries", self.name)));
        }
        let mut names: Vec<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        if let Some(detail) = &self.detail {
            if !self.fields.iter().any(|f| f.name == detail.link_field) {
                return Err(CatalogError::Profile(format!(
                    "detail link field '{}' is not produced by any item rule",
                    detail.link_field
                )));
            }
            names.extend(detail.fields.iter().map(|f| f.name.as_str()));
        }

        let stored = self
            .fields
            .iter()
            .chain(self.detail.iter().flat_map(|d| d.fields.iter()))
            .filter(|f| !f.transient)
            .map(|f| f.name.as_str())
            .chain(self.constants.keys().map(String::as_str));
        for name in stored {
            if RESERVED_KEYS.contains(&name) {
                return Err(CatalogError::Profile(format!(
                    "field name '{}' is reserved for the entry itself",
                    name
                )));
            }
        }

        let referenced: Vec<&String> = match &self.identifier {
            IdentifierRule::Codes { from_fields, .. } => from_fields.iter().collect(),
            IdentifierRule::ListingId { url_field, .. } => url_field.iter().collect(),
        };
        for name in referenced.into_iter().chain(self.required_fields.iter()) {
            if !names.contains(&name.as_str()) {
                return Err(CatalogError::Profile(format!(
                    "field '{}' is referenced but no rule produces it",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Renders the URL of a results page. `None` when the profile cannot
    /// address that page.
    pub fn page_url(&self, page: u32, vars: &HashMap<&str, String>) -> Option<String> {
        let template = if page <= 1 {
            &self.search_url
        } else if let Some(page_url) = &self.pagination.page_url {
            page_url
        } else if self.search_url.contains("{page}") {
            &self.search_url
        } else {
            return None;
        };
        let mut vars = vars.clone();
        vars.insert("page", page.to_string());
        Some(render(template, &vars))
    }

    pub fn with_policy(mut self, default: BucketPolicy) -> Self {
        self.policy.default = default;
        self
    }
}

/// Replaces `{name}` placeholders; `{query}` values are url-encoded.
pub fn render(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        let placeholder = format!("{{{}}}", name);
        if !out.contains(&placeholder) {
            continue;
        }
        let value = if *name == "query" {
            urlencoding::encode(value).into_owned()
        } else {
            value.clone()
        };
        out = out.replace(&placeholder, &value);
    }
    out
}

/// Renders a search query and collapses the gaps left by empty placeholders.
pub fn render_query(template: &str, vars: &HashMap<&str, String>) -> String {
    let raw = template
        .split_whitespace()
        .map(|word| render(word, vars))
        .collect::<Vec<_>>()
        .join(" ");
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn slugify(value: &str) -> String {
    value.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join("-")
}

pub fn builtin_names() -> Vec<&'static str> {
    vec!["ebay-parts", "rrr-parts", "autoplius-listings", "otomoto-listings"]
}

pub fn builtin(name: &str) -> Option<SiteProfile> {
    match name {
        "ebay-parts" => Some(ebay_parts()),
        "rrr-parts" => Some(rrr_parts()),
        "autoplius-listings" => Some(autoplius_listings()),
        "otomoto-listings" => Some(otomoto_listings()),
        _ => None,
    }
}

const PARTS: [&str; 15] = [
    "engine",
    "turbo",
    "gearbox",
    "alternator",
    "injector",
    "ecu",
    "abs pump",
    "radiator",
    "starter",
    "steering rack",
    "turbo actuator",
    "throttle body",
    "egr",
    "airflow sensor",
    "fuel pump",
];

const LISTING_BRANDS: [&str; 18] = [
    "Audi",
    "BMW",
    "Mercedes-Benz",
    "Volkswagen",
    "Skoda",
    "Seat",
    "Opel",
    "Peugeot",
    "Citroen",
    "Renault",
    "Dacia",
    "Fiat",
    "Alfa Romeo",
    "Volvo",
    "Porsche",
    "Mini",
    "Land Rover",
    "Jaguar",
];

fn brand_models() -> BTreeMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 21] = [
        ("Audi", &["A1", "A2", "A3", "A4", "A5", "A6", "A7", "A8", "Q3", "Q5", "Q7"]),
        ("BMW", &["1 Series", "2 Series", "3 Series", "4 Series", "5 Series", "7 Series", "X1", "X3", "X5"]),
        ("Mercedes", &["A-Class", "B-Class", "C-Class", "E-Class", "S-Class", "GLA", "GLC", "GLE", "Sprinter"]),
        ("Volkswagen", &["Golf", "Polo", "Passat", "Tiguan", "Touran", "Caddy", "Transporter"]),
        ("Skoda", &["Fabia", "Octavia", "Superb", "Kodiaq", "Karoq"]),
        ("Seat", &["Ibiza", "Leon", "Toledo", "Altea", "Ateca"]),
        ("Opel", &["Corsa", "Astra", "Insignia", "Zafira", "Mokka"]),
        ("Peugeot", &["208", "308", "508", "2008", "3008", "5008", "Partner"]),
        ("Citroen", &["C1", "C3", "C4", "C5", "Berlingo", "Jumpy"]),
        ("Renault", &["Clio", "Megane", "Laguna", "Scenic", "Twingo", "Kangoo", "Master"]),
        ("Dacia", &["Logan", "Sandero", "Duster", "Dokker"]),
        ("Fiat", &["Panda", "500", "Punto", "Tipo", "Doblo", "Ducato"]),
        ("Alfa Romeo", &["Giulietta", "Giulia", "MiTo", "Stelvio"]),
        ("Volvo", &["S40", "S60", "S80", "V40", "V60", "XC60", "XC90"]),
        ("Porsche", &["911", "Cayenne", "Macan", "Panamera", "Boxster"]),
        ("Mini", &["One", "Cooper", "Clubman", "Countryman"]),
        ("Land Rover", &["Defender", "Discovery", "Range Rover", "Range Rover Sport", "Evoque"]),
        ("Jaguar", &["XE", "XF", "XJ", "F-Pace", "E-Pace", "F-Type"]),
        ("Saab", &["9-3", "9-5", "900", "9000"]),
        ("Smart", &["Fortwo", "Forfour"]),
        ("Ford Europe", &["Fiesta", "Focus", "Mondeo", "Kuga", "Transit"]),
    ];
    table
        .iter()
        .map(|(brand, models)| (brand.to_string(), models.iter().map(|m| m.to_string()).collect()))
        .collect()
}

fn brands_only(brands: &[&str]) -> BTreeMap<String, Vec<String>> {
    brands.iter().map(|b| (b.to_string(), Vec::new())).collect()
}

fn ebay_parts() -> SiteProfile {
    SiteProfile {
        name: "ebay-parts".to_string(),
        description: "OEM part numbers per brand, model and part from eBay search results".to_string(),
        search_url: "https://www.ebay.com/sch/i.html?_nkw={query}&_sop=12".to_string(),
        queries: vec![
            "{brand} {model} {part}".to_string(),
            "{brand} {model} {part} OEM".to_string(),
            "{brand} {model} {part} replacement".to_string(),
        ],
        pagination: Pagination::default(),
        item_selector: "li.s-item".to_string(),
        max_items_per_page: Some(10),
        skip_titles: vec!["Shop on eBay".to_string()],
        fields: vec![
            FieldRule::text("title", ".s-item__title"),
            FieldRule::text("subtitle", ".s-item__subtitle").transient(),
            FieldRule::text("price", ".s-item__price").kind(FieldKind::Price),
            FieldRule::attr("image_url", ".s-item__image-img", &["src", "data-src"]).kind(FieldKind::Url),
            FieldRule::attr("ebay_url", "a.s-item__link", &["href"]).kind(FieldKind::Url),
        ],
        required_fields: vec!["price".to_string(), "ebay_url".to_string()],
        identifier: IdentifierRule::Codes {
            from_fields: vec!["title".to_string(), "subtitle".to_string()],
            pattern: CodePattern {
                min_len: 4,
                require_digit: true,
            },
        },
        detail: None,
        constants: Map::new(),
        record_target: false,
        parts: PARTS.iter().map(|p| p.to_string()).collect(),
        brands: brand_models(),
        policy: SkipPolicy::new(BucketPolicy::FetchOnce),
    }
}

fn rrr_parts() -> SiteProfile {
    let mut constants = Map::new();
    constants.insert("currency".to_string(), Value::String("EUR".to_string()));
    SiteProfile {
        name: "rrr-parts".to_string(),
        description: "Used part listings per part name from rrr.lt, OEM codes read from detail pages".to_string(),
        search_url: "https://rrr.lt/paieska/?q={query}".to_string(),
        queries: vec!["{part}".to_string()],
        pagination: Pagination::default(),
        item_selector: ".products .product, .item, .products-item".to_string(),
        max_items_per_page: None,
        skip_titles: Vec::new(),
        fields: vec![
            FieldRule::attr("url", "a[href]", &["href"]).kind(FieldKind::Url),
            FieldRule::text("title", "a[href]"),
            FieldRule::attr("image_url", "img", &["data-src", "src"]).kind(FieldKind::Url),
            FieldRule::text("price", "").on_item().kind(FieldKind::Price),
        ],
        required_fields: vec!["url".to_string()],
        identifier: IdentifierRule::Codes {
            from_fields: vec!["page_text".to_string()],
            pattern: CodePattern {
                min_len: 4,
                require_digit: true,
            },
        },
        detail: Some(DetailPage {
            link_field: "url".to_string(),
            fields: vec![
                FieldRule::text("title", "h1"),
                FieldRule::text("price", ".price, [itemprop='price']").kind(FieldKind::Price),
                FieldRule::labelled("model", &["model", "automobil"]),
                FieldRule::labelled("year", &["year", "metai"]).kind(FieldKind::Year),
                FieldRule::attr("image_url", "img", &["data-src", "src"]).kind(FieldKind::Url),
                FieldRule::text("page_text", "body").transient(),
            ],
        }),
        constants,
        record_target: false,
        parts: PARTS.iter().map(|p| p.to_string()).collect(),
        brands: BTreeMap::new(),
        policy: SkipPolicy::new(BucketPolicy::FetchOnce),
    }
}

fn autoplius_listings() -> SiteProfile {
    SiteProfile {
        name: "autoplius-listings".to_string(),
        description: "Used car listings per brand from autoplius.lt".to_string(),
        search_url: "https://autoplius.lt/skelbimai/naudoti-automobiliai/{brand_slug}".to_string(),
        queries: vec!["{brand}".to_string()],
        pagination: Pagination {
            page_url: Some("https://autoplius.lt/skelbimai/naudoti-automobiliai/{brand_slug}?page_nr={page}".to_string()),
            max_pages: 50,
            page_count_selector: Some("a[href]".to_string()),
        },
        item_selector: "[data-id], .announcement-item, article".to_string(),
        max_items_per_page: None,
        skip_titles: Vec::new(),
        fields: vec![
            FieldRule::attr("url", "a[href]", &["href"]).kind(FieldKind::Url),
            FieldRule::attr("photo", "img", &["data-src", "src"]).kind(FieldKind::Url),
        ],
        required_fields: vec!["url".to_string()],
        identifier: IdentifierRule::ListingId {
            attrs: vec!["data-id".to_string(), "data-ad-id".to_string()],
            url_field: Some("url".to_string()),
        },
        detail: Some(DetailPage {
            link_field: "url".to_string(),
            fields: vec![
                FieldRule::text("title", "h1"),
                FieldRule::labelled("generation", &["karta", "generation", "modelio versija", "modifikacija"]),
                FieldRule::labelled("year", &["metai", "pagaminimo", "year"]).kind(FieldKind::Year),
                FieldRule::labelled("mileage", &["rida", "mileage", "km"]).kind(FieldKind::Integer),
                FieldRule::labelled("vin", &["vin"]),
                FieldRule::attr("price", "[itemprop='price']", &["content"]).kind(FieldKind::Integer),
                FieldRule::text("price", ".price, .pricefield, .announcement-price").kind(FieldKind::Integer),
                FieldRule::attr("photo", "img", &["data-src", "src"]).kind(FieldKind::Url),
            ],
        }),
        constants: Map::new(),
        record_target: true,
        parts: Vec::new(),
        brands: brands_only(&LISTING_BRANDS),
        policy: SkipPolicy::new(BucketPolicy::AlwaysRescrape),
    }
}

fn otomoto_listings() -> SiteProfile {
    SiteProfile {
        name: "otomoto-listings".to_string(),
        description: "Used car listings per brand from otomoto.pl".to_string(),
        search_url: "https://www.otomoto.pl/osobowe/{brand_slug}/?page={page}".to_string(),
        queries: vec!["{brand}".to_string()],
        pagination: Pagination {
            page_url: None,
            max_pages: 500,
            page_count_selector: None,
        },
        item_selector: "article[data-ad-id], article[data-id]".to_string(),
        max_items_per_page: None,
        skip_titles: Vec::new(),
        fields: vec![
            FieldRule::text("model", "[data-testid=\"ad-title\"], h1, h2, h3"),
            FieldRule::attr("url", "a", &["href"]).kind(FieldKind::Url),
            FieldRule::text("price", "[data-testid=\"ad-price\"], span.price").kind(FieldKind::Integer),
            FieldRule::text("year", "li").kind(FieldKind::Year),
            FieldRule::text("mileage", "li").kind(FieldKind::Mileage),
            FieldRule::attr("photo", "img", &["data-src", "src"]).kind(FieldKind::Url),
        ],
        required_fields: Vec::new(),
        identifier: IdentifierRule::ListingId {
            attrs: vec!["data-ad-id".to_string(), "data-id".to_string()],
            url_field: None,
        },
        detail: None,
        constants: Map::new(),
        record_target: true,
        parts: Vec::new(),
        brands: brands_only(&LISTING_BRANDS),
        policy: SkipPolicy::new(BucketPolicy::AlwaysRescrape),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> HashMap<&'static str, String> {
        HashMap::from([
            ("brand", "Land Rover".to_string()),
            ("brand_slug", slugify("Land Rover")),
            ("model", "".to_string()),
            ("part", "abs pump".to_string()),
        ])
    }

    #[test]
    fn test_builtins_validate_and_survive_json() {
        for name in builtin_names() {
            let profile = builtin(name).unwrap();
            profile.validate().unwrap();
            let json = serde_json::to_string_pretty(&profile).unwrap();
            let back: SiteProfile = serde_json::from_str(&json).unwrap();
            assert_eq!(back, profile, "profile {} changed through JSON", name);
        }
    }

    #[test]
    fn test_render_query_collapses_missing_levels() {
        assert_eq!(render_query("{brand} {model} {part} OEM", &vars()), "Land Rover abs pump OEM");
    }

    #[test]
    fn test_page_urls() {
        let mut vars = vars();
        vars.insert("query", "Land Rover abs pump".to_string());

        let ebay = builtin("ebay-parts").unwrap();
        assert_eq!(
            ebay.page_url(1, &vars).unwrap(),
            "https://www.ebay.com/sch/i.html?_nkw=Land%20Rover%20abs%20pump&_sop=12"
        );
        assert_eq!(ebay.page_url(2, &vars), None);

        let autoplius = builtin("autoplius-listings").unwrap();
        assert_eq!(
            autoplius.page_url(1, &vars).unwrap(),
            "https://autoplius.lt/skelbimai/naudoti-automobiliai/land-rover"
        );
        assert_eq!(
            autoplius.page_url(3, &vars).unwrap(),
            "https://autoplius.lt/skelbimai/naudoti-automobiliai/land-rover?page_nr=3"
        );

        let otomoto = builtin("otomoto-listings").unwrap();
        assert_eq!(
            otomoto.page_url(2, &vars).unwrap(),
            "https://www.otomoto.pl/osobowe/land-rover/?page=2"
        );
    }

    #[test]
    fn test_validate_rejects_unknown_identifier_field() {
        let mut profile = builtin("ebay-parts").unwrap();
        profile.identifier = IdentifierRule::Codes {
            from_fields: vec!["description".to_string()],
            pattern: CodePattern::default(),
        };
        assert!(matches!(profile.validate(), Err(CatalogError::Profile(_))));
    }

    #[test]
    fn test_validate_rejects_reserved_field_names() {
        let mut profile = builtin("ebay-parts").unwrap();
        profile.fields.push(FieldRule::text("identifier", ".s-item__id"));
        assert!(matches!(profile.validate(), Err(CatalogError::Profile(_))));

        let mut profile = builtin("rrr-parts").unwrap();
        if let Some(detail) = profile.detail.as_mut() {
            detail.fields.push(FieldRule::text("cross_identifiers", ".codes"));
        }
        assert!(matches!(profile.validate(), Err(CatalogError::Profile(_))));

        let mut profile = builtin("ebay-parts").unwrap();
        profile.constants.insert("identifier".to_string(), Value::from("SHADOW"));
        assert!(matches!(profile.validate(), Err(CatalogError::Profile(_))));

        let mut profile = builtin("ebay-parts").unwrap();
        profile.fields.push(FieldRule::text("identifier", ".s-item__id").transient());
        profile.validate().unwrap();
    }

    #[test]
    fn test_minimal_profile_json_uses_defaults() {
        let json = r#"{
            "name": "demo",
            "search_url": "https://parts.example/search?q={query}",
            "item_selector": ".result",
            "fields": [{"name": "title", "selector": "h2"}],
            "identifier": {"kind": "codes", "from_fields": ["title"]}
        }"#;
        let profile: SiteProfile = serde_json::from_str(json).unwrap();
        profile.validate().unwrap();
        assert_eq!(profile.queries, vec!["{brand} {model} {part}"]);
        assert_eq!(profile.pagination.max_pages, 1);
        assert_eq!(profile.policy.default, BucketPolicy::FetchOnce);
        assert_eq!(profile.fields[0].kind, FieldKind::Text);
    }

    #[test]
    fn test_load_unknown_profile_fails() {
        assert!(matches!(
            SiteProfile::load("definitely-not-a-profile"),
            Err(CatalogError::Profile(_))
        ));
    }
}
