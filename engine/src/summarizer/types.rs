//! Structured meeting data extracted from chunk summaries

use serde::{Deserialize, Serialize};

/// A person mentioned on the call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub is_decision_maker: Option<bool>,
    #[serde(default)]
    pub tenure_duration: Option<String>,
}

/// A firm mentioned on the call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Company {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub aum: Option<String>,
    /// ICP tier, 1 or 2; anything else is discarded during validation
    #[serde(default)]
    pub icp_classification: Option<u8>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub is_client: Option<bool>,
    #[serde(default)]
    pub competitor_products: Vec<String>,
    #[serde(default)]
    pub strategies_of_interest: Vec<String>,
}

/// Deal terms discussed on the call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    #[serde(default)]
    pub ticket_size: Option<String>,
    #[serde(default)]
    pub products_of_interest: Vec<String>,
}

/// Structured extraction output for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeetingData {
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub companies: Vec<Company>,
    #[serde(default)]
    pub deals: Vec<Deal>,
}

impl MeetingData {
    /// Empty extraction, used for the fallback path and low-content sessions.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty() && self.companies.is_empty() && self.deals.is_empty()
    }

    /// Drop values the schema would not have allowed. The runtime enforces
    /// the schema when it supports constrained generation; the raw-JSON
    /// retry path does not, so validation is explicit here.
    pub fn normalize(mut self) -> Self {
        for company in &mut self.companies {
            if !matches!(company.icp_classification, Some(1) | Some(2) | None) {
                company.icp_classification = None;
            }
        }
        self
    }
}

/// JSON schema for [`MeetingData`], handed to the LLM runtime for
/// schema-constrained generation.
pub fn meeting_data_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "contacts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": ["string", "null"] },
                        "role": { "type": ["string", "null"] },
                        "location": { "type": ["string", "null"] },
                        "is_decision_maker": { "type": ["boolean", "null"] },
                        "tenure_duration": { "type": ["string", "null"] }
                    }
                }
            },
            "companies": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": ["string", "null"] },
                        "aum": { "type": ["string", "null"] },
                        "icp_classification": { "type": ["integer", "null"], "enum": [1, 2, null] },
                        "location": { "type": ["string", "null"] },
                        "is_client": { "type": ["boolean", "null"] },
                        "competitor_products": { "type": "array", "items": { "type": "string" } },
                        "strategies_of_interest": { "type": "array", "items": { "type": "string" } }
                    }
                }
            },
            "deals": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "ticket_size": { "type": ["string", "null"] },
                        "products_of_interest": { "type": "array", "items": { "type": "string" } }
                    }
                }
            }
        },
        "required": ["contacts", "companies", "deals"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_meeting_data() {
        let data = MeetingData::empty();
        assert!(data.is_empty());
        assert_eq!(data.contacts.len(), 0);
    }

    #[test]
    fn test_deserializes_partial_objects() {
        let data: MeetingData = serde_json::from_str(
            r#"{
                "contacts": [{ "name": "Dana Reyes" }],
                "companies": [{ "name": "Northgate Capital", "icp_classification": 1 }],
                "deals": []
            }"#,
        )
        .unwrap();

        assert_eq!(data.contacts[0].name.as_deref(), Some("Dana Reyes"));
        assert!(data.contacts[0].role.is_none());
        assert_eq!(data.companies[0].icp_classification, Some(1));
        assert!(!data.is_empty());
    }

    #[test]
    fn test_normalize_discards_invalid_icp() {
        let data: MeetingData = serde_json::from_str(
            r#"{ "contacts": [], "companies": [{ "icp_classification": 7 }], "deals": [] }"#,
        )
        .unwrap();

        let normalized = data.normalize();
        assert_eq!(normalized.companies[0].icp_classification, None);
    }

    #[test]
    fn test_schema_names_all_sections() {
        let schema = meeting_data_schema();
        let properties = schema.get("properties").unwrap();
        for section in ["contacts", "companies", "deals"] {
            assert!(properties.get(section).is_some(), "missing {section}");
        }
    }
}
