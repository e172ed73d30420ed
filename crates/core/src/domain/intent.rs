use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentType {
    Informational,
    Transactional,
    Conversational,
    Analytical,
}

impl IntentType {
    pub const ALL: [IntentType; 4] =
        [Self::Informational, Self::Transactional, Self::Conversational, Self::Analytical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Informational => "informational",
            Self::Transactional => "transactional",
            Self::Conversational => "conversational",
            Self::Analytical => "analytical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "informational" => Some(Self::Informational),
            "transactional" => Some(Self::Transactional),
            "conversational" => Some(Self::Conversational),
            "analytical" => Some(Self::Analytical),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub entity_type: String,
    pub value: String,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub id: String,
    pub intent_type: IntentType,
    pub domain: String,
    pub confidence: f64,
    pub entities: Vec<Entity>,
    /// Label of the classifier that produced this intent.
    pub classifier: String,
    /// Set when a fallback classifier stood in for an unavailable model.
    #[serde(default)]
    pub degraded: bool,
}

impl Intent {
    pub fn entities_of_type<'a>(&'a self, entity_type: &'a str) -> impl Iterator<Item = &'a Entity> {
        self.entities.iter().filter(move |entity| entity.entity_type == entity_type)
    }
}

/// Clamp a score into `[0, 1]`, mapping NaN to zero.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{clamp_confidence, Entity, Intent, IntentType};

    #[test]
    fn intent_type_round_trips_from_storage_encoding() {
        for intent_type in IntentType::ALL {
            assert_eq!(IntentType::parse(intent_type.as_str()), Some(intent_type));
        }
        assert_eq!(IntentType::parse("  ANALYTICAL "), Some(IntentType::Analytical));
    }

    #[test]
    fn clamp_confidence_bounds_values() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }

    #[test]
    fn entities_of_type_filters() {
        let intent = Intent {
            id: "i-1".to_string(),
            intent_type: IntentType::Transactional,
            domain: "support".to_string(),
            confidence: 0.5,
            entities: vec![
                Entity {
                    id: "e-1".to_string(),
                    entity_type: "number".to_string(),
                    value: "3".to_string(),
                    confidence: 0.9,
                },
                Entity {
                    id: "e-2".to_string(),
                    entity_type: "capability".to_string(),
                    value: "ticket-tool".to_string(),
                    confidence: 0.8,
                },
            ],
            classifier: "rules-v1".to_string(),
            degraded: false,
        };

        let capabilities = intent.entities_of_type("capability").collect::<Vec<_>>();
        assert_eq!(capabilities.len(), 1);
        assert_eq!(capabilities[0].value, "ticket-tool");
    }
}
