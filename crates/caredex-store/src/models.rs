//! Domain models for directory entities and search

use caredex_config::{ConfigError, StoreConfig};
use caredex_embeddings::{EmbedResult, EmbeddingMetadata, EmbeddingRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of directory entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Hospital,
    Doctor,
}

impl EntityKind {
    pub const ALL: [Self; 2] = [Self::Hospital, Self::Doctor];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hospital => "hospital",
            Self::Doctor => "doctor",
        }
    }

    /// Table holding entities of this kind
    pub fn table(self, config: &StoreConfig) -> &str {
        match self {
            Self::Hospital => &config.hospitals_table,
            Self::Doctor => &config.doctors_table,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hospital" | "hospitals" => Ok(Self::Hospital),
            "doctor" | "doctors" => Ok(Self::Doctor),
            other => Err(ConfigError::Generic {
                message: format!("unknown entity kind '{other}' (expected hospital or doctor)"),
            }),
        }
    }
}

/// A hospital or doctor as stored in the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub kind: EntityKind,
    pub name: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Hospital a doctor practices at
    #[serde(default)]
    pub affiliation: Option<String>,
}

impl Entity {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            name: name.into(),
            city: None,
            state: None,
            specialties: Vec::new(),
            services: Vec::new(),
            description: None,
            affiliation: None,
        }
    }

    #[must_use]
    pub fn with_location(mut self, city: impl Into<String>, state: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self.state = Some(state.into());
        self
    }

    #[must_use]
    pub fn with_specialties<I, S>(mut self, specialties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.specialties = specialties.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_affiliation(mut self, affiliation: impl Into<String>) -> Self {
        self.affiliation = Some(affiliation.into());
        self
    }

    /// "City, State" with whichever parts are present
    pub fn location(&self) -> Option<String> {
        let parts: Vec<&str> = [self.city.as_deref(), self.state.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }

    /// Deterministic descriptive text that gets embedded
    pub fn embedding_text(&self) -> String {
        let mut sections = vec![format!("{} ({})", self.name.trim(), self.kind)];

        if let Some(location) = self.location() {
            sections.push(format!("Located in {location}"));
        }
        if let Some(affiliation) = self.affiliation.as_deref().filter(|a| !a.trim().is_empty()) {
            sections.push(format!("Affiliated with {}", affiliation.trim()));
        }
        if !self.specialties.is_empty() {
            sections.push(format!("Specialties: {}", self.specialties.join(", ")));
        }
        if !self.services.is_empty() {
            sections.push(format!("Services: {}", self.services.join(", ")));
        }
        if let Some(description) = self.description.as_deref().filter(|d| !d.trim().is_empty()) {
            sections.push(description.trim().to_string());
        }

        sections.join(". ")
    }

    /// Document request for this entity, titled with its name
    ///
    /// # Errors
    /// Returns `EmbeddingError::InvalidInput` if the prepared text is blank
    pub fn to_request(&self, dimensions: usize) -> EmbedResult<EmbeddingRequest> {
        Ok(EmbeddingRequest::new(self.embedding_text())?
            .with_title(self.name.clone())
            .with_dimensions(dimensions))
    }
}

/// Row shape returned by the entity tables (kind comes from the table)
#[derive(Debug, Deserialize)]
pub(crate) struct EntityRow {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub specialties: Option<Vec<String>>,
    #[serde(default)]
    pub services: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub affiliation: Option<String>,
}

impl EntityRow {
    pub fn into_entity(self, kind: EntityKind) -> Entity {
        Entity {
            id: self.id,
            kind,
            name: self.name,
            city: self.city,
            state: self.state,
            specialties: self.specialties.unwrap_or_default(),
            services: self.services.unwrap_or_default(),
            description: self.description,
            affiliation: self.affiliation,
        }
    }
}

/// Columns selected from the entity tables
pub(crate) const ENTITY_COLUMNS: &str =
    "id,name,city,state,specialties,services,description,affiliation";

/// Vector plus provenance to persist for one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingUpdate {
    pub entity_id: Uuid,
    pub kind: EntityKind,
    pub embedding: Vec<f32>,
    pub metadata: EmbeddingMetadata,
}

/// Input to the external "search entities" procedure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub query_text: String,
    /// `None` runs the procedure in text-only mode
    pub query_embedding: Option<Vec<f32>>,
    pub location_filter: Option<String>,
    pub filters: BTreeMap<String, String>,
    pub kinds: Vec<EntityKind>,
    pub limit: usize,
}

impl SearchRequest {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            query_embedding: None,
            location_filter: None,
            filters: BTreeMap::new(),
            kinds: EntityKind::ALL.to_vec(),
            limit: 20,
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location_filter = Some(location.into());
        self
    }

    #[must_use]
    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_kinds(mut self, kinds: Vec<EntityKind>) -> Self {
        self.kinds = kinds;
        self
    }

    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.query_embedding = Some(embedding);
        self
    }
}

/// One ranked result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub id: Uuid,
    pub kind: EntityKind,
    pub name: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Combined rank from the procedure (higher is better)
    pub score: f64,
    /// Vector similarity, absent in text-only mode
    #[serde(default)]
    pub similarity: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_text_is_deterministic() {
        let hospital = Entity::new(EntityKind::Hospital, "General Hospital")
            .with_location("Boston", "MA")
            .with_specialties(["cardiology", "oncology"])
            .with_services(["emergency", "ICU"])
            .with_description("400 beds");

        let text = hospital.embedding_text();
        assert_eq!(
            text,
            "General Hospital (hospital). Located in Boston, MA. Specialties: cardiology, oncology. Services: emergency, ICU. 400 beds"
        );
        assert_eq!(text, hospital.clone().embedding_text());
    }

    #[test]
    fn test_doctor_text_includes_affiliation() {
        let doctor = Entity::new(EntityKind::Doctor, "Dr. Jane Doe")
            .with_affiliation("Seattle Children's")
            .with_specialties(["pediatric cardiology"]);
        let text = doctor.embedding_text();
        assert!(text.starts_with("Dr. Jane Doe (doctor)"));
        assert!(text.contains("Affiliated with Seattle Children's"));
        assert!(!text.contains("Located in"));
    }

    #[test]
    fn test_to_request_carries_title_and_width() {
        let request = Entity::new(EntityKind::Hospital, "Mercy")
            .to_request(768)
            .unwrap();
        assert_eq!(request.title(), Some("Mercy"));
        assert_eq!(request.dimensions(), Some(768));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Hospitals".parse::<EntityKind>().unwrap(), EntityKind::Hospital);
        assert_eq!("doctor".parse::<EntityKind>().unwrap(), EntityKind::Doctor);
        assert!("clinic".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_row_defaults() {
        let row: EntityRow = serde_json::from_value(serde_json::json!({
            "id": Uuid::nil(),
            "name": "Clinic",
            "specialties": null
        }))
        .unwrap();
        let entity = row.into_entity(EntityKind::Hospital);
        assert!(entity.specialties.is_empty());
        assert_eq!(entity.location(), None);
    }
}
