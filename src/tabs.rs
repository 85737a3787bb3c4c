use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::util::{flatten_kv, Row};

/// One classified sheet tab. The shape is decided once, here, and never
/// re-inspected downstream.
#[derive(Debug, Clone)]
pub enum Table {
    /// A two-column key/value tab, flattened into a single mapping.
    Flat(Map<String, Value>),
    /// An ordinary row-oriented tab, passed through unmodified.
    Rows(Vec<Row>),
}

impl Table {
    pub fn as_flat(&self) -> Option<&Map<String, Value>> {
        match self {
            Table::Flat(map) => Some(map),
            Table::Rows(_) => None,
        }
    }

    pub fn as_rows(&self) -> Option<&[Row]> {
        match self {
            Table::Rows(rows) => Some(rows),
            Table::Flat(_) => None,
        }
    }
}

/// Tabs grouped by race, plus the race-independent tabs
/// (`nodes`, `recommendations`, `related_links`, ...).
#[derive(Debug, Default)]
pub struct Classified {
    pub races: HashMap<String, HashMap<String, Table>>,
    pub globals: HashMap<String, Table>,
}

/// Classify raw tabs by naming convention. Tab names starting with `_` are
/// skipped outright. `{kind}-{raceId}` names group under their race; anything
/// that does not split into exactly two parts is a global tab. Unknown kinds
/// are carried through; the assembler ignores what it does not recognize.
pub fn classify(tabs: HashMap<String, Vec<Row>>) -> Classified {
    let mut classified = Classified::default();

    for (name, rows) in tabs {
        if name.starts_with('_') {
            continue;
        }

        let table = if is_kv_shape(&rows) {
            Table::Flat(flatten_kv(&rows))
        } else {
            Table::Rows(rows)
        };

        let parts: Vec<&str> = name.split('-').collect();
        match parts.as_slice() {
            [kind, race] => {
                classified
                    .races
                    .entry(race.to_string())
                    .or_default()
                    .insert(kind.to_string(), table);
            }
            _ => {
                classified.globals.insert(name, table);
            }
        }
    }

    classified
}

fn is_kv_shape(rows: &[Row]) -> bool {
    rows.first()
        .is_some_and(|row| row.contains_key("key") && row.contains_key("value"))
}
