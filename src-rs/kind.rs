//! Semantic kind classification.
//!
//! Rules are evaluated top to bottom; the first rule that returns a kind wins.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::trace;

use crate::metadata::ElementMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorKind {
    Button,
    Input,
    Select,
    Table,
    Card,
    Tabs,
    List,
    Chart,
    Other,
}

impl AnchorKind {
    pub const ALL: [AnchorKind; 9] = [
        AnchorKind::Button,
        AnchorKind::Input,
        AnchorKind::Select,
        AnchorKind::Table,
        AnchorKind::Card,
        AnchorKind::Tabs,
        AnchorKind::List,
        AnchorKind::Chart,
        AnchorKind::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::Input => "input",
            Self::Select => "select",
            Self::Table => "table",
            Self::Card => "card",
            Self::Tabs => "tabs",
            Self::List => "list",
            Self::Chart => "chart",
            Self::Other => "other",
        }
    }

    /// Label used when nothing better describes the element.
    pub fn fallback_name(&self) -> &'static str {
        match self {
            Self::Button => "Button",
            Self::Input => "Input Field",
            Self::Select => "Dropdown",
            Self::Table => "Data Table",
            Self::Card => "Card",
            Self::Tabs => "Tabs",
            Self::List => "List",
            Self::Chart => "Chart",
            Self::Other => "Component",
        }
    }
}

impl fmt::Display for AnchorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnchorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| format!("unknown kind: {s}"))
    }
}

const ROLE_KINDS: &[(&str, AnchorKind)] = &[
    ("button", AnchorKind::Button),
    ("tablist", AnchorKind::Tabs),
    ("tab", AnchorKind::Tabs),
    ("table", AnchorKind::Table),
    ("grid", AnchorKind::Table),
    ("list", AnchorKind::List),
    ("listbox", AnchorKind::Select),
    ("combobox", AnchorKind::Select),
    ("textbox", AnchorKind::Input),
    ("searchbox", AnchorKind::Input),
];

const TAG_KINDS: &[(&str, AnchorKind)] = &[
    ("button", AnchorKind::Button),
    ("input", AnchorKind::Input),
    ("textarea", AnchorKind::Input),
    ("select", AnchorKind::Select),
    ("table", AnchorKind::Table),
    ("ul", AnchorKind::List),
    ("ol", AnchorKind::List),
    ("canvas", AnchorKind::Chart),
    ("svg", AnchorKind::Chart),
];

// `table` precedes `tab` so "data-table" is not read as tabs.
const CLASS_KINDS: &[(&str, AnchorKind)] = &[
    ("chart", AnchorKind::Chart),
    ("card", AnchorKind::Card),
    ("table", AnchorKind::Table),
    ("tab", AnchorKind::Tabs),
    ("list", AnchorKind::List),
];

const BUTTON_INPUT_TYPES: &[&str] = &["button", "submit", "reset", "image"];

pub struct KindRule {
    pub name: &'static str,
    pub apply: fn(&ElementMetadata) -> Option<AnchorKind>,
}

pub const KIND_RULES: &[KindRule] = &[
    KindRule {
        name: "role",
        apply: by_role,
    },
    KindRule {
        name: "input-type",
        apply: by_input_type,
    },
    KindRule {
        name: "tag",
        apply: by_tag,
    },
    KindRule {
        name: "class",
        apply: by_class,
    },
];

fn by_role(meta: &ElementMetadata) -> Option<AnchorKind> {
    let role = meta.role.as_deref()?.trim().to_ascii_lowercase();
    ROLE_KINDS
        .iter()
        .find(|(name, _)| *name == role)
        .map(|(_, kind)| *kind)
}

fn by_input_type(meta: &ElementMetadata) -> Option<AnchorKind> {
    if meta.tag_name != "input" {
        return None;
    }
    let ty = meta.input_type.as_deref()?.to_ascii_lowercase();
    BUTTON_INPUT_TYPES
        .contains(&ty.as_str())
        .then_some(AnchorKind::Button)
}

fn by_tag(meta: &ElementMetadata) -> Option<AnchorKind> {
    TAG_KINDS
        .iter()
        .find(|(tag, _)| *tag == meta.tag_name)
        .map(|(_, kind)| *kind)
}

fn by_class(meta: &ElementMetadata) -> Option<AnchorKind> {
    let classes = meta.class_name.to_ascii_lowercase();
    if classes.trim().is_empty() {
        return None;
    }
    CLASS_KINDS
        .iter()
        .find(|(token, _)| classes.contains(token))
        .map(|(_, kind)| *kind)
}

pub fn classify(meta: &ElementMetadata) -> AnchorKind {
    for rule in KIND_RULES {
        if let Some(kind) = (rule.apply)(meta) {
            trace!(rule = rule.name, tag = %meta.tag_name, kind = kind.as_str(), "classified");
            return kind;
        }
    }
    AnchorKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(tag: &str) -> ElementMetadata {
        ElementMetadata {
            tag_name: tag.to_string(),
            ..ElementMetadata::default()
        }
    }

    #[test]
    fn role_beats_tag() {
        let mut m = meta("div");
        m.role = Some("tab".to_string());
        assert_eq!(classify(&m), AnchorKind::Tabs);

        let mut m = meta("button");
        m.role = Some("combobox".to_string());
        assert_eq!(classify(&m), AnchorKind::Select);
    }

    #[test]
    fn tag_table_and_input_types() {
        assert_eq!(classify(&meta("button")), AnchorKind::Button);
        assert_eq!(classify(&meta("textarea")), AnchorKind::Input);
        assert_eq!(classify(&meta("ol")), AnchorKind::List);

        let mut submit = meta("input");
        submit.input_type = Some("submit".to_string());
        assert_eq!(classify(&submit), AnchorKind::Button);

        let mut text = meta("input");
        text.input_type = Some("text".to_string());
        assert_eq!(classify(&text), AnchorKind::Input);
    }

    #[test]
    fn class_fallback() {
        let mut m = meta("div");
        m.class_name = "revenue-chart wide".to_string();
        assert_eq!(classify(&m), AnchorKind::Chart);

        m.class_name = "data-table".to_string();
        assert_eq!(classify(&m), AnchorKind::Table);

        m.class_name = "tab-strip".to_string();
        assert_eq!(classify(&m), AnchorKind::Tabs);

        m.class_name = "wrapper".to_string();
        assert_eq!(classify(&m), AnchorKind::Other);
    }

    #[test]
    fn unknown_role_falls_through() {
        let mut m = meta("section");
        m.role = Some("region".to_string());
        m.class_name = "summary-card".to_string();
        assert_eq!(classify(&m), AnchorKind::Card);
    }

    #[test]
    fn kind_parses_from_string() {
        assert_eq!("Button".parse::<AnchorKind>().unwrap(), AnchorKind::Button);
        assert!("widget".parse::<AnchorKind>().is_err());
    }
}
