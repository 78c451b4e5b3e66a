use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub mod color;
pub mod rarity;

pub use color::{rgb_to_hsl, saturation, Hsl};
pub use rarity::{BorderSpec, Rarity};

/// Kind of recognizable entity; each kind has its own data file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    #[default]
    Item,
    Weapon,
    Tome,
    Character,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Item,
        EntityKind::Weapon,
        EntityKind::Tome,
        EntityKind::Character,
    ];

    /// Data file name and the JSON key holding the entity list
    fn file_and_key(self) -> (&'static str, &'static str) {
        match self {
            EntityKind::Item => ("items.json", "items"),
            EntityKind::Weapon => ("weapons.json", "weapons"),
            EntityKind::Tome => ("tomes.json", "tomes"),
            EntityKind::Character => ("characters.json", "characters"),
        }
    }
}

/// One recognizable entity and the locator of its reference icon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub rarity: Rarity,
    #[serde(default)]
    pub kind: EntityKind,
    /// Icon path relative to the data directory
    #[serde(default)]
    pub image: Option<String>,
}

/// Entity catalog
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub entities: HashMap<String, EntityData>,
    pub entities_by_name: HashMap<String, String>,
}

impl Catalog {
    /// Load every entity data file present in the data directory.
    /// Missing files are skipped, malformed files are errors.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let mut catalog = Self::default();

        for kind in EntityKind::ALL {
            let (file, key) = kind.file_and_key();
            let path = data_dir.join(file);
            if !path.exists() {
                tracing::debug!("No {} at {}", file, path.display());
                continue;
            }

            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", file))?;
            let mut root: HashMap<String, serde_json::Value> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", file))?;
            let list = root.remove(key).unwrap_or(serde_json::Value::Array(Vec::new()));
            let entities: Vec<EntityData> = serde_json::from_value(list)
                .with_context(|| format!("Invalid '{}' list in {}", key, file))?;

            let count = entities.len();
            for mut entity in entities {
                entity.kind = kind;
                catalog.insert(entity);
            }
            tracing::info!("Loaded {} {} entries", count, key);
        }

        if catalog.is_empty() {
            tracing::warn!("No entity data found at {}", data_dir.display());
        }

        Ok(catalog)
    }

    pub fn from_entities(entities: impl IntoIterator<Item = EntityData>) -> Self {
        let mut catalog = Self::default();
        for entity in entities {
            catalog.insert(entity);
        }
        catalog
    }

    pub fn insert(&mut self, entity: EntityData) {
        self.entities_by_name
            .insert(entity.name.to_lowercase(), entity.id.clone());
        self.entities.insert(entity.id.clone(), entity);
    }

    pub fn get(&self, id: &str) -> Option<&EntityData> {
        self.entities.get(id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&EntityData> {
        self.entities_by_name
            .get(&name.to_lowercase())
            .and_then(|id| self.entities.get(id))
    }

    pub fn rarity_of(&self, id: &str) -> Option<Rarity> {
        self.get(id).map(|e| e.rarity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities sorted by id, for deterministic iteration
    pub fn sorted(&self) -> Vec<&EntityData> {
        let mut list: Vec<&EntityData> = self.entities.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }
}
