use scraper::{ElementRef, Html};

use crate::models::{Item, RuleSet, SelectorPath};

/// Applies a `RuleSet` to a parsed page.
///
/// Containers are located with `searches` over the whole document, items with
/// `products` inside each container, and the item fields inside each item
/// only. Missing optional fields never fail the extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractionEngine;

impl ExtractionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Parse `markup` and extract from it.
    pub fn extract_html(&self, markup: &str, rules: &RuleSet) -> Vec<Item> {
        let document = Html::parse_document(markup);
        self.extract(&document, rules)
    }

    pub fn extract(&self, document: &Html, rules: &RuleSet) -> Vec<Item> {
        let containers: Vec<ElementRef> = document
            .tree
            .root()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|element| matches_path(element, &rules.searches))
            .collect();

        let mut items = Vec::new();

        for container in &containers {
            for node in find_all(*container, &rules.products) {
                items.push(self.extract_item(node, rules));
            }
        }

        tracing::debug!(
            containers = containers.len(),
            items = items.len(),
            "Extraction finished"
        );

        items
    }

    fn extract_item(&self, node: ElementRef, rules: &RuleSet) -> Item {
        let title = rules
            .title
            .as_ref()
            .and_then(|path| find_first(node, path))
            .map(|element| element.text().collect::<String>())
            .unwrap_or_default();

        let price = rules
            .price
            .as_ref()
            .and_then(|path| find_first(node, path))
            .map(|element| element.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        // No stock rule, or no marker inside this item: available.
        let out_of_stock = rules
            .stock
            .as_ref()
            .is_some_and(|path| find_first(node, path).is_some());

        Item {
            title,
            price,
            out_of_stock,
        }
    }
}

/// True when `element` carries `path.attribute == path.value`. `class` is
/// matched per whitespace-separated token as well as on the whole value.
pub fn matches_path(element: &ElementRef, path: &SelectorPath) -> bool {
    let attribute = path.attribute.to_ascii_lowercase();
    let value = path.value.as_str();
    let element = element.value();

    if attribute == "class" && element.classes().any(|class| class == value) {
        return true;
    }

    element.attr(&attribute) == Some(value)
}

/// All matching descendants of `scope`, excluding `scope` itself, in
/// document order.
pub fn find_all<'a>(scope: ElementRef<'a>, path: &SelectorPath) -> Vec<ElementRef<'a>> {
    scope
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .filter(|element| matches_path(element, path))
        .collect()
}

pub fn find_first<'a>(scope: ElementRef<'a>, path: &SelectorPath) -> Option<ElementRef<'a>> {
    scope
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .find(|element| matches_path(element, path))
}
