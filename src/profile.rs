//! Host personalities
//!
//! A profile tells the remote side which synthesis voice to use and how the
//! host should behave. The audio core only reads them.

use serde::{Deserialize, Serialize};

/// One AI host personality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Synthesis voice identifier understood by the speech service
    pub voice: String,
    pub system_instruction: String,
    /// Display accent for the presentation layer
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

fn default_color() -> String {
    "bg-blue-500".to_string()
}

impl Profile {
    fn stock(id: &str, name: &str, description: &str, voice: &str, instruction: &str, color: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            voice: voice.to_string(),
            system_instruction: instruction.to_string(),
            color: color.to_string(),
            image_url: None,
        }
    }
}

/// Ordered set of profiles, addressed by id
#[derive(Debug, Clone, Default)]
pub struct ProfileCatalog {
    profiles: Vec<Profile>,
}

impl ProfileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock personalities
    pub fn builtin() -> Self {
        Self {
            profiles: vec![
                Profile::stock(
                    "Helpful",
                    "Aiden",
                    "Your friendly and reliable assistant.",
                    "Zephyr",
                    "You are Aiden, a friendly and helpful AI assistant. You love to help users with their daily tasks and answer questions clearly.",
                    "bg-blue-500",
                ),
                Profile::stock(
                    "Professional",
                    "Marcus",
                    "Serious, concise, and news-anchor like.",
                    "Charon",
                    "You are Marcus, a professional news anchor and analyst. You speak with authority, precision, and avoid slang.",
                    "bg-gray-500",
                ),
                Profile::stock(
                    "Energetic",
                    "Sparky",
                    "High energy, enthusiastic, and fun!",
                    "Puck",
                    "You are Sparky! You are super excited about everything! You use exclamation points! You love technology and the future!",
                    "bg-yellow-500",
                ),
                Profile::stock(
                    "Calm",
                    "Serena",
                    "Soothing, meditative, and patient.",
                    "Kore",
                    "You are Serena. You speak slowly, calmly, and with great patience. You want the user to feel relaxed and understood.",
                    "bg-teal-500",
                ),
                Profile::stock(
                    "Storyteller",
                    "Grimm",
                    "Deep voice, dramatic, and narrative focused.",
                    "Fenrir",
                    "You are Grimm, a master storyteller. You weave narratives into your answers. You speak with a deep, dramatic flair.",
                    "bg-purple-600",
                ),
            ],
        }
    }

    pub fn lookup(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Add a profile, replacing any with the same id. Returns the replaced one.
    pub fn insert(&mut self, profile: Profile) -> Option<Profile> {
        match self.profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => Some(std::mem::replace(existing, profile)),
            None => {
                self.profiles.push(profile);
                None
            }
        }
    }

    pub fn list(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let catalog = ProfileCatalog::builtin();
        assert_eq!(catalog.len(), 5);

        let grimm = catalog.lookup("Storyteller").unwrap();
        assert_eq!(grimm.name, "Grimm");
        assert_eq!(grimm.voice, "Fenrir");
        assert!(catalog.lookup("Nobody").is_none());
    }

    #[test]
    fn test_insert_replaces_by_id() {
        let mut catalog = ProfileCatalog::builtin();
        let mut custom = catalog.lookup("Calm").unwrap().clone();
        custom.name = "Serenity".to_string();

        let old = catalog.insert(custom).unwrap();
        assert_eq!(old.name, "Serena");
        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog.lookup("Calm").unwrap().name, "Serenity");

        let pirate = Profile {
            id: "pirate".to_string(),
            name: "Flint".to_string(),
            description: String::new(),
            voice: "Puck".to_string(),
            system_instruction: "Talk like a pirate.".to_string(),
            color: default_color(),
            image_url: None,
        };
        assert!(catalog.insert(pirate).is_none());
        assert_eq!(catalog.list().last().unwrap().id, "pirate");
    }
}
