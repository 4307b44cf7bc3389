use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Freelancer,
    Client,
    Admin,
}

impl fmt::Display for UserRole {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.pad(match self {
            Self::Freelancer => "freelancer",
            Self::Client => "client",
            Self::Admin => "admin",
        })
    }
}

/// Read-only view of a marketplace user, as the chat needs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub role: UserRole,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProfileError {
    #[snafu(display("failed to read profiles from {path:?}: {source}"))]
    ReadProfiles {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse profiles from {path:?}: {source}"))]
    ParseProfiles {
        stage: &'static str,
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ProfileDirectory {
    profiles: Vec<UserProfile>,
}

impl ProfileDirectory {
    pub fn new(profiles: Vec<UserProfile>) -> Self {
        Self { profiles }
    }

    /// Built-in marketplace users.
    pub fn fixtures() -> Self {
        Self::new(vec![
            UserProfile {
                id: "f1".to_string(),
                name: "Rahul Sharma".to_string(),
                avatar: Some("https://picsum.photos/seed/12/100/100".to_string()),
                role: UserRole::Freelancer,
                verified: true,
                bio: "Experienced full-stack developer based in the heart of Lucknow.".to_string(),
                skills: vec![
                    "Web Development".to_string(),
                    "React".to_string(),
                    "Next.js".to_string(),
                ],
                location: "Hazratganj, Lucknow".to_string(),
            },
            UserProfile {
                id: "f2".to_string(),
                name: "Priya Verma".to_string(),
                avatar: Some("https://picsum.photos/seed/15/100/100".to_string()),
                role: UserRole::Freelancer,
                verified: true,
                bio: "Creative designer specializing in branding and mobile app interfaces."
                    .to_string(),
                skills: vec![
                    "Graphic Design".to_string(),
                    "UI/UX".to_string(),
                    "Illustrator".to_string(),
                ],
                location: "Gomti Nagar, Lucknow".to_string(),
            },
            UserProfile {
                id: "c1".to_string(),
                name: "Aliganj Bakery".to_string(),
                avatar: None,
                role: UserRole::Client,
                verified: false,
                bio: "Family bakery looking to sell online.".to_string(),
                skills: Vec::new(),
                location: "Aliganj, Lucknow".to_string(),
            },
        ])
    }

    /// Loads a JSON array of profiles.
    pub fn from_json_file(path: &Path) -> Result<Self, ProfileError> {
        let content = std::fs::read_to_string(path).context(ReadProfilesSnafu {
            stage: "read-profiles-file",
            path: path.to_path_buf(),
        })?;
        let profiles = serde_json::from_str(&content).context(ParseProfilesSnafu {
            stage: "parse-profiles-json",
            path: path.to_path_buf(),
        })?;
        Ok(Self::new(profiles))
    }

    pub fn all(&self) -> &[UserProfile] {
        &self.profiles
    }

    pub fn find(&self, id: &str) -> Option<&UserProfile> {
        self.profiles.iter().find(|profile| profile.id == id)
    }

    /// Everyone the local user can open a conversation with.
    pub fn contacts_for<'a>(&'a self, local_id: &'a str) -> impl Iterator<Item = &'a UserProfile> {
        self.profiles
            .iter()
            .filter(move |profile| profile.id != local_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_resolve_by_id() {
        let directory = ProfileDirectory::fixtures();

        let rahul = directory.find("f1").unwrap();
        assert_eq!(rahul.name, "Rahul Sharma");
        assert_eq!(rahul.role, UserRole::Freelancer);
        assert!(directory.find("nobody").is_none());
    }

    #[test]
    fn contacts_exclude_the_local_user() {
        let directory = ProfileDirectory::fixtures();

        let contacts: Vec<&str> = directory
            .contacts_for("c1")
            .map(|profile| profile.id.as_str())
            .collect();

        assert_eq!(contacts, vec!["f1", "f2"]);
    }

    #[test]
    fn json_profiles_use_camel_case_and_defaults() {
        let path = std::env::temp_dir().join(format!(
            "lucknow-profiles-{}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"[{"id": "a1", "name": "Admin", "role": "admin", "verified": true}]"#,
        )
        .unwrap();

        let directory = ProfileDirectory::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let admin = directory.find("a1").unwrap();
        assert_eq!(admin.role, UserRole::Admin);
        assert!(admin.skills.is_empty());
        assert_eq!(admin.avatar, None);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let path = std::env::temp_dir().join(format!(
            "lucknow-profiles-bad-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, "{not json").unwrap();

        let error = ProfileDirectory::from_json_file(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(error, ProfileError::ParseProfiles { .. }));
    }
}
