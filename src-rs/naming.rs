//! Anchor identifiers and human-readable anchor names.

use crate::config::{MarkerIdStyle, TourConfig};
use crate::dom::{Document, NodeId};
use crate::kind::AnchorKind;
use crate::metadata::{ellipsize, normalize_whitespace, ElementMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Header,
    Nav,
    Sidebar,
    Footer,
    Modal,
    Content,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Nav => "nav",
            Self::Sidebar => "sidebar",
            Self::Footer => "footer",
            Self::Modal => "modal",
            Self::Content => "content",
        }
    }
}

struct RegionRule {
    region: Region,
    tags: &'static [&'static str],
    roles: &'static [&'static str],
    class_tokens: &'static [&'static str],
}

const REGION_RULES: &[RegionRule] = &[
    RegionRule {
        region: Region::Modal,
        tags: &["dialog"],
        roles: &["dialog", "alertdialog"],
        class_tokens: &["modal", "dialog"],
    },
    RegionRule {
        region: Region::Header,
        tags: &["header"],
        roles: &["banner"],
        class_tokens: &["header", "topbar"],
    },
    RegionRule {
        region: Region::Nav,
        tags: &["nav"],
        roles: &["navigation"],
        class_tokens: &["nav", "menu"],
    },
    RegionRule {
        region: Region::Sidebar,
        tags: &["aside"],
        roles: &["complementary"],
        class_tokens: &["sidebar", "side-bar"],
    },
    RegionRule {
        region: Region::Footer,
        tags: &["footer"],
        roles: &["contentinfo"],
        class_tokens: &["footer"],
    },
];

fn region_of(doc: &Document, id: NodeId) -> Option<Region> {
    let node = doc.node(id);
    let role = node.attr("role").unwrap_or_default().to_ascii_lowercase();
    let classes = node.attr("class").unwrap_or_default().to_ascii_lowercase();
    REGION_RULES
        .iter()
        .find(|rule| {
            rule.tags.contains(&node.tag.as_str())
                || rule.roles.contains(&role.as_str())
                || rule.class_tokens.iter().any(|t| classes.contains(t))
        })
        .map(|rule| rule.region)
}

/// Nearest enclosing page region; the element itself counts.
pub fn detect_region(doc: &Document, id: NodeId) -> Region {
    std::iter::once(id)
        .chain(doc.ancestors(id))
        .find_map(|current| region_of(doc, current))
        .unwrap_or(Region::Content)
}

/// Route slug: `/` and empty routes become `home`.
pub fn slugify_route(route: &str) -> String {
    let trimmed = route.trim().trim_start_matches('/');
    let slug = slugify(trimmed);
    if slug.is_empty() {
        "home".to_string()
    } else {
        slug
    }
}

/// Lowercase ASCII slug with diacritics folded and separators collapsed.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars() {
        let folded = fold_diacritic(ch);
        for c in folded.chars() {
            let lower = c.to_ascii_lowercase();
            if lower.is_ascii_alphanumeric() {
                if pending_dash && !out.is_empty() {
                    out.push('-');
                }
                pending_dash = false;
                out.push(lower);
            } else {
                pending_dash = true;
            }
        }
    }
    out
}

fn fold_diacritic(ch: char) -> String {
    let base = match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => "A",
        'ç' | 'ć' | 'č' | 'ĉ' => "c",
        'Ç' | 'Ć' | 'Č' | 'Ĉ' => "C",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => "e",
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ė' | 'Ę' | 'Ě' => "E",
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' => "i",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ī' | 'Į' => "I",
        'ñ' | 'ń' | 'ň' => "n",
        'Ñ' | 'Ń' | 'Ň' => "N",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => "o",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ő' => "O",
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => "u",
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ū' | 'Ů' | 'Ű' => "U",
        'ý' | 'ÿ' => "y",
        'Ý' | 'Ÿ' => "Y",
        'š' | 'ś' => "s",
        'Š' | 'Ś' => "S",
        'ž' | 'ź' | 'ż' => "z",
        'Ž' | 'Ź' | 'Ż' => "Z",
        'ß' => "ss",
        'æ' => "ae",
        'Æ' => "AE",
        'œ' => "oe",
        'Œ' => "OE",
        _ => return ch.to_string(),
    };
    base.to_string()
}

/// Element slug: marker, DOM id, short text, short aria-label, then the kind.
pub fn element_slug(meta: &ElementMetadata, kind: AnchorKind, config: &TourConfig) -> String {
    let short = |value: &str| -> Option<String> {
        let value = normalize_whitespace(value);
        if value.is_empty() || value.chars().count() > config.slug_text_limit {
            return None;
        }
        Some(slugify(&value)).filter(|s| !s.is_empty())
    };

    meta.explicit_tour_id
        .as_deref()
        .map(slugify)
        .filter(|s| !s.is_empty())
        .or_else(|| Some(slugify(&meta.dom_id)).filter(|s| !s.is_empty()))
        .or_else(|| short(&meta.visible_text))
        .or_else(|| meta.aria_label.as_deref().and_then(short))
        .unwrap_or_else(|| kind.as_str().to_string())
}

/// Deterministic anchor id for an element on `route`.
pub fn generate_anchor_id(
    doc: &Document,
    id: NodeId,
    route: &str,
    meta: &ElementMetadata,
    kind: AnchorKind,
    config: &TourConfig,
) -> String {
    let route_slug = slugify_route(route);

    if config.marker_id_style == MarkerIdStyle::Short {
        if let Some(marker) = meta.explicit_tour_id.as_deref().filter(|m| !m.is_empty()) {
            return format!("{route_slug}.{marker}");
        }
    }

    let region = detect_region(doc, id);
    let slug = element_slug(meta, kind, config);
    format!("{route_slug}.{}.{slug}-{}", region.as_str(), kind.as_str())
}

/// `add-transaction` -> `Add Transaction`
pub fn prettify_marker(marker: &str) -> String {
    marker
        .split(['-', '_', '.'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn friendly_name(meta: &ElementMetadata, kind: AnchorKind, config: &TourConfig) -> String {
    let present = |value: Option<&str>| {
        value
            .map(normalize_whitespace)
            .filter(|v| !v.is_empty())
    };

    if let Some(label) = present(meta.aria_label.as_deref()) {
        return label;
    }
    if let Some(marker) = present(meta.explicit_tour_id.as_deref()) {
        let pretty = prettify_marker(&marker);
        if !pretty.is_empty() {
            return pretty;
        }
    }
    if let Some(text) = present(Some(meta.visible_text.as_str())) {
        return ellipsize(&text, config.friendly_name_limit);
    }
    if let Some(placeholder) = present(meta.placeholder.as_deref()) {
        return placeholder;
    }
    if let Some(title) = present(meta.title.as_deref()) {
        return title;
    }
    kind.fallback_name().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::classify;
    use crate::metadata::extract_metadata;
    use serde_json::json;

    fn doc() -> Document {
        Document::from_snapshot(
            serde_json::from_value(json!({
                "tag": "body",
                "children": [
                    {"tag": "nav", "children": [
                        {"tag": "button", "attrs": {"data-tour-id": "add-transaction"}, "text": "Nova Transação"},
                        {"tag": "button", "attrs": {"data-tour-id": "export", "aria-label": "Exportar CSV"}, "text": "CSV"}
                    ]},
                    {"tag": "div", "attrs": {"class": "app-sidebar"}, "children": [
                        {"tag": "div", "children": [{"tag": "button", "text": "Relatórios"}]}
                    ]},
                    {"tag": "main", "children": [
                        {"tag": "button", "attrs": {"id": "save_btn"}, "text": "Salvar"},
                        {"tag": "div", "attrs": {"class": "stats-card"}, "text": "A very long piece of descriptive text that goes on"},
                        {"tag": "input", "attrs": {"placeholder": "Search transactions"}}
                    ]},
                    {"tag": "div", "attrs": {"role": "dialog"}, "children": [{"tag": "select"}]}
                ]
            }))
            .unwrap(),
        )
    }

    fn id_for(doc: &Document, index: usize, route: &str, config: &TourConfig) -> String {
        let id = doc.elements()[index];
        let meta = extract_metadata(doc, id, config);
        let kind = classify(&meta);
        generate_anchor_id(doc, id, route, &meta, kind, config)
    }

    #[test]
    fn marker_in_nav_uses_composed_id() {
        let doc = doc();
        let config = TourConfig::default();
        let button = doc.elements()[3];
        let meta = extract_metadata(&doc, button, &config);
        let kind = classify(&meta);
        assert_eq!(kind, AnchorKind::Button);
        assert_eq!(detect_region(&doc, button), Region::Nav);
        assert_eq!(
            generate_anchor_id(&doc, button, "/transactions", &meta, kind, &config),
            "transactions.nav.add-transaction-button"
        );
        assert_eq!(friendly_name(&meta, kind, &config), "Add Transaction");
    }

    #[test]
    fn aria_label_wins_friendly_name() {
        let doc = doc();
        let config = TourConfig::default();
        let meta = extract_metadata(&doc, doc.elements()[4], &config);
        assert_eq!(friendly_name(&meta, AnchorKind::Button, &config), "Exportar CSV");
    }

    #[test]
    fn short_marker_style() {
        let doc = doc();
        let config = TourConfig {
            marker_id_style: MarkerIdStyle::Short,
            ..TourConfig::default()
        };
        assert_eq!(id_for(&doc, 3, "/transactions", &config), "transactions.add-transaction");
        assert_eq!(id_for(&doc, 9, "/transactions", &config), "transactions.content.save-btn-button");
    }

    #[test]
    fn ids_for_unmarked_elements() {
        let doc = doc();
        let config = TourConfig::default();
        assert_eq!(id_for(&doc, 7, "/", &config), "home.sidebar.relatorios-button");
        assert_eq!(id_for(&doc, 9, "/admin/Usuários", &config), "admin-usuarios.content.save-btn-button");
        assert_eq!(id_for(&doc, 10, "/", &config), "home.content.card-card");
        assert_eq!(id_for(&doc, 11, "/", &config), "home.content.search-transactions-input");
        assert_eq!(id_for(&doc, 13, "/", &config), "home.modal.select-select");
    }

    #[test]
    fn generation_is_deterministic() {
        let doc = doc();
        let config = TourConfig::default();
        for index in 0..doc.elements().len() {
            assert_eq!(id_for(&doc, index, "/x", &config), id_for(&doc, index, "/x", &config));
        }
    }

    #[test]
    fn friendly_name_fallback_chain() {
        let config = TourConfig::default();
        let mut meta = ElementMetadata {
            tag_name: "div".to_string(),
            visible_text: "x".repeat(80),
            ..ElementMetadata::default()
        };
        let name = friendly_name(&meta, AnchorKind::Card, &config);
        assert_eq!(name.chars().count(), 50);
        assert!(name.ends_with("..."));

        meta.visible_text.clear();
        meta.placeholder = Some("Valor".to_string());
        assert_eq!(friendly_name(&meta, AnchorKind::Input, &config), "Valor");

        meta.placeholder = None;
        meta.title = Some("Dica".to_string());
        assert_eq!(friendly_name(&meta, AnchorKind::Input, &config), "Dica");

        meta.title = None;
        assert_eq!(friendly_name(&meta, AnchorKind::Select, &config), "Dropdown");
        assert_eq!(friendly_name(&meta, AnchorKind::Other, &config), "Component");
    }

    #[test]
    fn slug_helpers() {
        assert_eq!(slugify_route("/"), "home");
        assert_eq!(slugify_route(""), "home");
        assert_eq!(slugify_route("/transactions"), "transactions");
        assert_eq!(slugify("  Nova   Transação!! "), "nova-transacao");
        assert_eq!(prettify_marker("add_new-transaction"), "Add New Transaction");
    }
}
