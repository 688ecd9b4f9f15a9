//! Read-only views of the collaborators the order core consults: users,
//! restaurants and the menu. In a full deployment these are separate
//! services; here they are loaded once from a JSON seed.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::orders::{MenuItemId, RestaurantId, Role, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restaurant {
    pub id: RestaurantId,
    pub owner_id: UserId,
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: MenuItemId,
    pub restaurant_id: RestaurantId,
    pub name: String,
    pub price_cents: u64,
    #[serde(default = "available_by_default")]
    pub is_available: bool,
}

fn available_by_default() -> bool {
    true
}

pub trait UserDirectory: Send + Sync {
    fn user(&self, id: UserId) -> Option<User>;
}

pub trait RestaurantDirectory: Send + Sync {
    fn restaurant(&self, id: RestaurantId) -> Option<Restaurant>;
    /// The restaurant a user owns, if any.
    fn restaurant_by_owner(&self, owner: UserId) -> Option<Restaurant>;
}

pub trait MenuCatalog: Send + Sync {
    fn menu_item(&self, id: MenuItemId) -> Option<MenuItem>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub restaurants: Vec<Restaurant>,
    #[serde(default)]
    pub menu_items: Vec<MenuItem>,
}

/// In-memory directory implementing all three collaborator traits.
#[derive(Debug, Default)]
pub struct Directory {
    users: HashMap<UserId, User>,
    restaurants: HashMap<RestaurantId, Restaurant>,
    menu: HashMap<MenuItemId, MenuItem>,
}

const DEMO_SEED: &str = include_str!("../fixtures/seed.json");

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let mut dir = Directory::new();
        seed.users.into_iter().for_each(|u| dir.add_user(u));
        seed.restaurants.into_iter().for_each(|r| dir.add_restaurant(r));
        seed.menu_items.into_iter().for_each(|m| dir.add_menu_item(m));
        dir
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let seed: Seed = serde_json::from_str(&raw)?;
        Ok(Self::from_seed(seed))
    }

    /// The fixture bundled with the binary.
    pub fn demo() -> anyhow::Result<Self> {
        let seed: Seed = serde_json::from_str(DEMO_SEED)?;
        Ok(Self::from_seed(seed))
    }

    pub fn add_user(&mut self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn add_restaurant(&mut self, restaurant: Restaurant) {
        self.restaurants.insert(restaurant.id, restaurant);
    }

    pub fn add_menu_item(&mut self, item: MenuItem) {
        self.menu.insert(item.id, item);
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }
}

impl UserDirectory for Directory {
    fn user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).cloned()
    }
}

impl RestaurantDirectory for Directory {
    fn restaurant(&self, id: RestaurantId) -> Option<Restaurant> {
        self.restaurants.get(&id).cloned()
    }

    fn restaurant_by_owner(&self, owner: UserId) -> Option<Restaurant> {
        self.restaurants.values().find(|r| r.owner_id == owner).cloned()
    }
}

impl MenuCatalog for Directory {
    fn menu_item(&self, id: MenuItemId) -> Option<MenuItem> {
        self.menu.get(&id).cloned()
    }
}
