use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub emoji: String,
    pub color: String,
}

impl Category {
    /// Find a category by name (case-insensitive) in a slice.
    pub fn find_by_name<'a>(categories: &'a [Category], name: &str) -> Option<&'a Category> {
        let needle = name.trim().to_lowercase();
        categories.iter().find(|c| c.name.to_lowercase() == needle)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.emoji, self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCategory {
    pub name: String,
    pub emoji: String,
    pub color: String,
}

impl NewCategory {
    pub fn new(name: impl Into<String>, emoji: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            emoji: emoji.into(),
            color: color.into(),
        }
    }
}

/// Categories seeded into a fresh database.
pub const PREDEFINED_CATEGORIES: &[(&str, &str, &str)] = &[
    ("Food", "🍔", "#FF6B6B"),
    ("Transport", "🚗", "#4ECDC4"),
    ("Shopping", "🛍️", "#45B7D1"),
    ("Entertainment", "🎬", "#FFA07A"),
    ("Bills", "💳", "#98D8C8"),
    ("Healthcare", "🏥", "#F7DC6F"),
    ("Education", "📚", "#BB8FCE"),
    ("Other", "📦", "#95A5A6"),
];
