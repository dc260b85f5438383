use hashbrown::HashMap;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, VariantNames};

use crate::CheckId;

/// External save state, as seen by the check-type behaviors. Implemented by the
/// application layer against the live game; `SaveFlags` is an in-memory stand-in.
pub trait GameState {
    fn get_flag(&self, save_id: &str) -> bool;
    fn set_flag(&mut self, save_id: &str, value: bool);
    fn get_counter(&self, name: &str) -> i32;
    fn add_counter(&mut self, name: &str, amount: i32);
}

// Note: the numeric tags are part of the topology format and must not be reordered.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    VariantNames,
    TryFromPrimitive,
    IntoPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
#[serde(try_from = "u8", into = "u8")]
pub enum CheckType {
    Item,     // 0: check_id is the item number
    Ability,  // 1: check_id is the ability slot
    Toggle,   // 2: check_id is the toggle index
    Shop,     // 3: check_id is the stock slot
    Key,      // 4: check_id is the key kind
    Currency, // 5: check_id is the amount granted
}

impl CheckType {
    // Every type records its pickup under the location's own save id; consumables
    // leave no other trace once spent.
    pub fn already_obtained(self, save_id: &str, state: &dyn GameState) -> bool {
        state.get_flag(save_id)
    }

    pub fn give(self, check_id: CheckId, save_id: &str, state: &mut dyn GameState) {
        state.set_flag(save_id, true);
        match self {
            CheckType::Item => state.add_counter(&format!("item.{check_id}"), 1),
            CheckType::Ability => state.set_flag(&format!("ability.{check_id}"), true),
            CheckType::Toggle => state.set_flag(&format!("toggle.{check_id}"), true),
            CheckType::Shop => state.add_counter(&format!("shop.{check_id}"), 1),
            CheckType::Key => state.add_counter(&format!("key.{check_id}"), 1),
            CheckType::Currency => state.add_counter("currency", check_id),
        }
    }

    pub fn describe(self, check_id: CheckId) -> String {
        match self {
            CheckType::Item => format!("Item #{check_id}"),
            CheckType::Ability => format!("Ability #{check_id}"),
            CheckType::Toggle => format!("Toggle #{check_id}"),
            CheckType::Shop => format!("Shop slot #{check_id}"),
            CheckType::Key => format!("Key #{check_id}"),
            CheckType::Currency => format!("{check_id} Currency"),
        }
    }
}

#[derive(Default, Clone, Debug)]
pub struct SaveFlags {
    pub flags: HashMap<String, bool>,
    pub counters: HashMap<String, i32>,
}

impl GameState for SaveFlags {
    fn get_flag(&self, save_id: &str) -> bool {
        self.flags.get(save_id).copied().unwrap_or(false)
    }

    fn set_flag(&mut self, save_id: &str, value: bool) {
        self.flags.insert(save_id.to_string(), value);
    }

    fn get_counter(&self, name: &str) -> i32 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    fn add_counter(&mut self, name: &str, amount: i32) {
        *self.counters.entry(name.to_string()).or_insert(0) += amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_conversion() {
        assert_eq!(CheckType::try_from(3u8).unwrap(), CheckType::Shop);
        assert_eq!(u8::from(CheckType::Currency), 5);
        assert!(CheckType::try_from(42u8).is_err());

        let parsed: Result<CheckType, _> = serde_json::from_str("9");
        assert!(parsed.is_err());
        let parsed: CheckType = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, CheckType::Ability);
    }

    #[test]
    fn test_give_and_obtained() {
        let mut state = SaveFlags::default();
        assert!(!CheckType::Currency.already_obtained("coin_3", &state));
        CheckType::Currency.give(25, "coin_3", &mut state);
        CheckType::Currency.give(10, "coin_4", &mut state);
        assert!(CheckType::Currency.already_obtained("coin_3", &state));
        assert_eq!(state.get_counter("currency"), 35);

        CheckType::Ability.give(2, "dash_shrine", &mut state);
        assert!(state.get_flag("ability.2"));
        assert_eq!(CheckType::Ability.describe(2), "Ability #2");
    }
}
