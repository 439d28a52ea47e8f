//! Story message and nameplate tables.

use log::debug;

use crate::catalog::{Catalog, LocIdx, MessageValue, NAMEPLATE_ASSET, STORY_MESSAGE_ASSET};
use crate::placement::Placement;

/// Shows the seed name when a new game starts.
pub const WELCOME_KEY: &str = "RANDO_WELCOME_1";

/// `key,value` text tables, in output order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageTables {
    pub story: Vec<(String, String)>,
    pub nameplates: Vec<(String, String)>,
}

impl MessageTables {
    pub fn story_text(&self) -> String {
        render_table(STORY_MESSAGE_ASSET, &self.story)
    }

    pub fn nameplate_text(&self) -> String {
        render_table(NAMEPLATE_ASSET, &self.nameplates)
    }
}

fn render_table(asset: &str, rows: &[(String, String)]) -> String {
    let mut out = format!("{}\n\n", asset);
    for (key, value) in rows {
        out.push_str(key);
        out.push(',');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// "Found A", "Found A, and B", "Found A, B, and C".
pub fn found_list(names: &[String]) -> String {
    let mut msg = String::from("Found ");
    let n = names.len();
    for (i, name) in names.iter().enumerate() {
        msg.push_str(name);
        if i + 2 == n {
            msg.push_str(", and ");
        } else if i + 2 < n {
            msg.push_str(", ");
        }
    }
    msg
}

fn placed_names(catalog: &Catalog, placement: &Placement, locations: &[LocIdx]) -> Vec<String> {
    locations
        .iter()
        .map(|&loc| match placement.get(loc) {
            Some(item) => item.display_name(catalog),
            None => String::from("nothing"),
        })
        .collect()
}

/// Build both tables: the catalog's authored messages, then one message
/// (with an empty nameplate) per generated multiworld message.
pub fn build_messages(
    catalog: &Catalog,
    placement: &Placement,
    seed_name: &str,
    multiworld_messages: &[(String, String)],
) -> MessageTables {
    let mut tables = MessageTables::default();

    for (key, value) in catalog.story_messages() {
        let text = if key == WELCOME_KEY {
            format!("Welcome to the randomizer! Your seed is: {}", seed_name)
        } else {
            match value {
                MessageValue::Text(text) => text.clone(),
                MessageValue::Found(locations) => {
                    found_list(&placed_names(catalog, placement, locations))
                }
            }
        };
        debug!("message {} = {}", key, text);
        tables.story.push((key.clone(), text));
    }
    tables.nameplates.extend(catalog.nameplates().iter().cloned());

    for (key, text) in multiworld_messages {
        tables.story.push((key.clone(), text.clone()));
        tables.nameplates.push((key.clone(), String::new()));
    }
    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn found_lists_use_a_serial_comma() {
        assert_eq!(found_list(&names(&["Ether"])), "Found Ether");
        assert_eq!(found_list(&names(&["Ether", "Tent"])), "Found Ether, and Tent");
        assert_eq!(
            found_list(&names(&["Ether", "Tent", "Potion (Bartz)"])),
            "Found Ether, Tent, and Potion (Bartz)"
        );
    }

    #[test]
    fn tables_start_with_their_asset() {
        let tables = MessageTables {
            story: vec![("RANDO_X".to_string(), "Hello, world".to_string())],
            nameplates: vec![("RANDO_X".to_string(), String::new())],
        };
        assert_eq!(
            tables.story_text(),
            "Assets/GameAssets/Serial/Data/Message/story_mes_en\n\nRANDO_X,Hello, world\n"
        );
        assert_eq!(
            tables.nameplate_text(),
            "Assets/GameAssets/Serial/Data/Message/story_cha_en\n\nRANDO_X,\n"
        );
    }
}
