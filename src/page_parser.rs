use crate::error::{CatalogError, Result};
use crate::extractor::{extract_codes, Extractor, IdentitySource};
use crate::merger::RawCandidate;
use crate::site_profile::{FieldKind, FieldRule, IdentifierRule, SiteProfile};
use log::{debug, warn};
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Map, Value};
use url::Url;

/// Fields read from one result item, before identification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedItem {
    pub fields: Map<String, Value>,
    /// Site-native id read from an item attribute, if the profile names one.
    pub listing_id: Option<String>,
}

struct CompiledRule {
    rule: FieldRule,
    selector: Option<Selector>,
}

fn compile(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| CatalogError::InvalidSelector(format!("{}: {}", css, e)))
}

fn compile_rules(rules: &[FieldRule]) -> Result<Vec<CompiledRule>> {
    rules
        .iter()
        .map(|rule| {
            let selector = match rule.selector.as_deref() {
                Some(css) if !css.trim().is_empty() => Some(compile(css)?),
                _ => None,
            };
            Ok(CompiledRule {
                rule: rule.clone(),
                selector,
            })
        })
        .collect()
}

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Applies a [`SiteProfile`] to fetched HTML.
pub struct PageParser {
    profile: SiteProfile,
    item_selector: Selector,
    item_rules: Vec<CompiledRule>,
    detail_rules: Vec<CompiledRule>,
    page_count_selector: Option<Selector>,
    dt_selector: Selector,
    extractor: Extractor,
}

impl PageParser {
    pub fn new(profile: &SiteProfile) -> Result<Self> {
        profile.validate()?;
        let detail_rules = match &profile.detail {
            Some(detail) => compile_rules(&detail.fields)?,
            None => Vec::new(),
        };
        let page_count_selector = match &profile.pagination.page_count_selector {
            Some(css) => Some(compile(css)?),
            None => None,
        };
        Ok(PageParser {
            profile: profile.clone(),
            item_selector: compile(&profile.item_selector)?,
            item_rules: compile_rules(&profile.fields)?,
            detail_rules,
            page_count_selector,
            dt_selector: compile("dt")?,
            extractor: Extractor::new(),
        })
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Result items of a search page, in page order.
    pub fn extract_items(&self, html: &str, base: &Url) -> Vec<ParsedItem> {
        let document = Html::parse_document(html);
        let skip: Vec<String> = self.profile.skip_titles.iter().map(|t| t.to_lowercase()).collect();

        let mut items = Vec::new();
        for element in document.select(&self.item_selector) {
            let mut item = ParsedItem::default();
            self.apply_rules(&self.item_rules, element, base, &mut item.fields);

            if let Some(title) = item.fields.get("title").and_then(Value::as_str) {
                let title = title.to_lowercase();
                if skip.iter().any(|s| title.contains(s.as_str())) {
                    debug!("Skipping placeholder item '{}'", title);
                    continue;
                }
            }

            if let IdentifierRule::ListingId { attrs, .. } = &self.profile.identifier {
                item.listing_id = attrs
                    .iter()
                    .filter_map(|attr| element.value().attr(attr))
                    .map(str::trim)
                    .find(|v| !v.is_empty())
                    .map(str::to_string);
            }
            items.push(item);
        }
        items
    }

    /// Candidates of a page without detail enrichment.
    pub fn extract(&self, html: &str, base: &Url) -> Vec<RawCandidate> {
        self.extract_items(html, base)
            .into_iter()
            .filter_map(|item| self.into_candidate(item))
            .collect()
    }

    /// Largest page number linked from the page, if the profile asks for it.
    pub fn page_count(&self, html: &str) -> Option<u32> {
        let selector = self.page_count_selector.as_ref()?;
        let document = Html::parse_document(html);
        document
            .select(selector)
            .filter_map(|link| element_text(&link).parse::<u32>().ok())
            .max()
    }

    pub fn detail_url(&self, item: &ParsedItem) -> Option<String> {
        let detail = self.profile.detail.as_ref()?;
        item.fields
            .get(&detail.link_field)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Overlays detail-page values on the item.
    pub fn apply_detail(&self, item: &mut ParsedItem, html: &str, base: &Url) {
        let document = Html::parse_document(html);
        let mut detail = Map::new();
        self.apply_rules(&self.detail_rules, document.root_element(), base, &mut detail);
        for (name, value) in detail {
            item.fields.insert(name, value);
        }
    }

    /// Id available before any detail fetch, used to skip known listings early.
    pub fn early_listing_id(&self, item: &ParsedItem) -> Option<String> {
        match &self.profile.identifier {
            IdentifierRule::ListingId { url_field, .. } => item.listing_id.clone().or_else(|| {
                url_field
                    .as_ref()
                    .and_then(|field| item.fields.get(field))
                    .and_then(Value::as_str)
                    .and_then(|url| self.extractor.listing_id_from_url(url))
            }),
            IdentifierRule::Codes { .. } => None,
        }
    }

    /// `None` when a required field is missing.
    pub fn into_candidate(&self, item: ParsedItem) -> Option<RawCandidate> {
        for required in &self.profile.required_fields {
            if !item.fields.contains_key(required) {
                debug!("Dropping item without '{}'", required);
                return None;
            }
        }

        let identity = match &self.profile.identifier {
            IdentifierRule::Codes { from_fields, pattern } => {
                let text = from_fields
                    .iter()
                    .filter_map(|f| item.fields.get(f).and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join(" ");
                IdentitySource::Codes(extract_codes(&text, pattern))
            }
            IdentifierRule::ListingId { .. } => {
                IdentitySource::ListingId(self.early_listing_id(&item).unwrap_or_default())
            }
        };

        let mut payload = item.fields;
        let transient = self
            .item_rules
            .iter()
            .chain(self.detail_rules.iter())
            .filter(|c| c.rule.transient)
            .map(|c| c.rule.name.as_str());
        for name in transient {
            payload.remove(name);
        }
        for (name, value) in &self.profile.constants {
            payload.entry(name.clone()).or_insert_with(|| value.clone());
        }

        Some(RawCandidate { identity, payload })
    }

    fn apply_rules(
        &self,
        rules: &[CompiledRule],
        scope: ElementRef,
        base: &Url,
        fields: &mut Map<String, Value>,
    ) {
        for compiled in rules {
            let rule = &compiled.rule;
            if fields.contains_key(&rule.name) {
                continue;
            }
            if let Some((value, currency)) = self.read_rule(compiled, scope, base) {
                fields.insert(rule.name.clone(), value);
                if let Some(currency) = currency {
                    fields.entry("currency".to_string()).or_insert(Value::String(currency));
                }
            }
        }
    }

    /// Tries every element the rule matches until one yields a value.
    fn read_rule(&self, compiled: &CompiledRule, scope: ElementRef, base: &Url) -> Option<(Value, Option<String>)> {
        let rule = &compiled.rule;
        if !rule.labels.is_empty() {
            let raw = self.labelled_value(scope, &rule.labels)?;
            return self.convert(rule.kind, &raw, base);
        }

        let candidates: Vec<ElementRef> = match &compiled.selector {
            Some(selector) => scope.select(selector).collect(),
            None => vec![scope],
        };
        candidates.into_iter().find_map(|element| {
            let raw = if rule.attrs.is_empty() {
                element_text(&element)
            } else {
                rule.attrs
                    .iter()
                    .filter_map(|attr| element.value().attr(attr))
                    .map(str::trim)
                    .find(|v| !v.is_empty())?
                    .to_string()
            };
            self.convert(rule.kind, &raw, base)
        })
    }

    fn labelled_value(&self, scope: ElementRef, labels: &[String]) -> Option<String> {
        let labels: Vec<String> = labels.iter().map(|l| l.to_lowercase()).collect();
        scope.select(&self.dt_selector).find_map(|dt| {
            let label = element_text(&dt).to_lowercase();
            if !labels.iter().any(|l| label.contains(l.as_str())) {
                return None;
            }
            dt.next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|sibling| sibling.value().name() == "dd")
                .map(|dd| element_text(&dd))
                .filter(|text| !text.is_empty())
        })
    }

    fn convert(&self, kind: FieldKind, raw: &str, base: &Url) -> Option<(Value, Option<String>)> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match kind {
            FieldKind::Text => Some((Value::String(raw.to_string()), None)),
            FieldKind::Url => match base.join(raw) {
                Ok(url) => Some((Value::String(url.to_string()), None)),
                Err(e) => {
                    warn!("Ignoring unusable link '{}': {}", raw, e);
                    None
                }
            },
            FieldKind::Price => self
                .extractor
                .parse_price(raw)
                .map(|price| (json!(price.amount), price.currency)),
            FieldKind::Integer => self.extractor.parse_integer(raw).map(|n| (json!(n), None)),
            FieldKind::Year => self.extractor.parse_year(raw).map(|y| (json!(y), None)),
            FieldKind::Mileage => self.extractor.parse_mileage(raw).map(|km| (json!(km), None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site_profile::builtin;

    const EBAY_PAGE: &str = r#"
        <ul>
          <li class="s-item"><div class="s-item__title">Shop on eBay</div><span class="s-item__price">$20.00</span></li>
          <li class="s-item">
            <a class="s-item__link" href="https://www.ebay.com/itm/1234?hash=x"></a>
            <img class="s-item__image-img" src="https://i.ebayimg.com/a.jpg">
            <div class="s-item__title">Audi A3 Turbo 06A-906-032 genuine</div>
            <div class="s-item__subtitle">OEM 06A906032 / 1J0 145 701</div>
            <span class="s-item__price">£120.50</span>
          </li>
          <li class="s-item">
            <div class="s-item__title">Turbo without link</div>
            <span class="s-item__price">£10.00</span>
          </li>
        </ul>"#;

    fn base(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    #[test]
    fn test_ebay_items_become_code_candidates() {
        let parser = PageParser::new(&builtin("ebay-parts").unwrap()).unwrap();
        let base = base("https://www.ebay.com/sch/i.html");
        let items = parser.extract_items(EBAY_PAGE, &base);
        assert_eq!(items.len(), 2);
        assert_eq!(parser.extract(EBAY_PAGE, &base).len(), 1);

        let candidate = parser.into_candidate(items[0].clone()).unwrap();
        let identity = candidate.identity.identify().unwrap();
        assert_eq!(identity.primary, "06A906032");
        assert_eq!(candidate.payload["price"], json!(120.5));
        assert_eq!(candidate.payload["currency"], json!("GBP"));
        assert_eq!(candidate.payload["ebay_url"], json!("https://www.ebay.com/itm/1234?hash=x"));
        assert!(!candidate.payload.contains_key("subtitle"));

        assert!(parser.into_candidate(items[1].clone()).is_none());
    }

    #[test]
    fn test_listing_items_use_native_ids_and_relative_links() {
        let html = r#"
            <article data-ad-id="6100200300">
              <a href="/osobowe/oferta/audi-a3-ID6Gx.html"><h2>Audi A3 Sportback</h2></a>
              <ul><li>Diesel</li><li>2016</li><li>154 000 km</li></ul>
              <span data-testid="ad-price">52 900 PLN</span>
            </article>"#;
        let parser = PageParser::new(&builtin("otomoto-listings").unwrap()).unwrap();
        let items = parser.extract_items(html, &base("https://www.otomoto.pl/osobowe/audi/?page=1"));
        assert_eq!(items.len(), 1);
        assert_eq!(parser.early_listing_id(&items[0]).as_deref(), Some("6100200300"));

        let candidate = parser.into_candidate(items[0].clone()).unwrap();
        assert_eq!(candidate.identity, IdentitySource::ListingId("6100200300".to_string()));
        assert_eq!(candidate.payload["model"], json!("Audi A3 Sportback"));
        assert_eq!(candidate.payload["url"], json!("https://www.otomoto.pl/osobowe/oferta/audi-a3-ID6Gx.html"));
        assert_eq!(candidate.payload["year"], json!(2016));
        assert_eq!(candidate.payload["mileage"], json!(154000));
        assert_eq!(candidate.payload["price"], json!(52900));
    }

    #[test]
    fn test_detail_page_fills_details_table_and_codes() {
        let parser = PageParser::new(&builtin("rrr-parts").unwrap()).unwrap();
        let list = r#"<div class="products"><div class="product">
                <a href="/en/turbo/123"><span>Turbo</span></a><span>99,00 €</span></div></div>"#;
        let mut items = parser.extract_items(list, &base("https://rrr.lt/paieska/?q=turbo"));
        assert_eq!(items.len(), 1);
        let link = parser.detail_url(&items[0]).unwrap();
        assert_eq!(link, "https://rrr.lt/en/turbo/123");

        let detail = r#"<html><body><h1>Turbocharger Audi A3</h1>
              <dl><dt>Car model</dt><dd>Audi A3 8P</dd><dt>Year</dt><dd>2009</dd></dl>
              <p>OEM code: 03G253014H, cross 03G 253 014 H, also 1234</p></body></html>"#;
        parser.apply_detail(&mut items[0], detail, &base(&link));

        let candidate = parser.into_candidate(items.remove(0)).unwrap();
        assert_eq!(candidate.identity.identify().unwrap().primary, "03G253014H");
        assert_eq!(candidate.payload["title"], json!("Turbocharger Audi A3"));
        assert_eq!(candidate.payload["model"], json!("Audi A3 8P"));
        assert_eq!(candidate.payload["year"], json!(2009));
        assert_eq!(candidate.payload["price"], json!(99.0));
        assert_eq!(candidate.payload["currency"], json!("EUR"));
        assert!(!candidate.payload.contains_key("page_text"));
    }

    #[test]
    fn test_page_count_from_links() {
        let parser = PageParser::new(&builtin("autoplius-listings").unwrap()).unwrap();
        let html = r#"<a href="?page_nr=2">2</a><a href="?page_nr=3">3</a><a href="/x">Next</a><a href="?page_nr=17">17</a>"#;
        assert_eq!(parser.page_count(html), Some(17));
    }

    #[test]
    fn test_bad_selector_is_reported() {
        let mut profile = builtin("ebay-parts").unwrap();
        profile.item_selector = "li[[".to_string();
        assert!(matches!(PageParser::new(&profile), Err(CatalogError::InvalidSelector(_))));
    }
}
