use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// ServiceNow sends `null` for unset string fields.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A support ticket as returned by the ticketing table API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub number: String,
    pub sys_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub short_description: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(rename = "u_vendor_id", default, deserialize_with = "null_as_empty")]
    pub vendor_code: String,
    #[serde(rename = "u_type_of_entity", default, deserialize_with = "null_as_empty")]
    pub entity_type: String,
    #[serde(rename = "u_entity", default, deserialize_with = "null_as_empty")]
    pub entity: String,
    #[serde(rename = "u_subentity", default, deserialize_with = "null_as_empty")]
    pub sub_entity: String,
    #[serde(rename = "u_region", default, deserialize_with = "null_as_empty")]
    pub region: String,
    #[serde(rename = "u_subcategory", default, deserialize_with = "null_as_empty")]
    pub subcategory: String,
}

impl Ticket {
    /// System-of-record entity designation, e.g. "Company ACME Nordics".
    pub fn canonical_entity(&self) -> String {
        format!("{} {} {}", self.entity_type, self.entity, self.sub_entity)
    }

    /// Title and body as sent to the LLM.
    pub fn llm_description(&self) -> String {
        format!("{}\n{}\n\n", self.short_description, self.description)
    }
}

/// One entry of a ticket's attachment manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    #[serde(rename = "sys_id")]
    pub id: String,
    pub file_name: String,
}

/// An attachment written to the ticket directory under its sanitized name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Region {
    #[value(name = "APAC")]
    Apac,
    #[value(name = "EMEA")]
    Emea,
    #[value(name = "AMERICAS")]
    Americas,
}

impl Region {
    /// Value stored in the ticket's `u_region` field.
    pub fn field_value(self) -> &'static str {
        match self {
            Region::Apac => "APAC (Asia Pacific And China)",
            Region::Emea => "EMEA (Europe Middle East and Africa)",
            Region::Americas => "Americas (North and South America)",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Region::Apac => "APAC",
            Region::Emea => "EMEA",
            Region::Americas => "AMERICAS",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_deserializes_nulls_as_empty() {
        let ticket: Ticket = serde_json::from_value(serde_json::json!({
            "number": "CS0001",
            "sys_id": "abc",
            "short_description": "Payment status",
            "description": null,
            "u_vendor_id": "V-42",
            "u_type_of_entity": "Company",
            "u_entity": "ACME",
            "u_subentity": "Nordics",
            "u_region": "EMEA (Europe Middle East and Africa)"
        }))
        .unwrap();
        assert_eq!(ticket.description, "");
        assert_eq!(ticket.subcategory, "");
        assert_eq!(ticket.canonical_entity(), "Company ACME Nordics");
        assert_eq!(ticket.llm_description(), "Payment status\n\n\n");
    }

    #[test]
    fn attachment_manifest_entry_uses_sys_id() {
        let entry: AttachmentRef =
            serde_json::from_str(r#"{"sys_id":"a1","file_name":"scan.pdf","size_bytes":"10"}"#)
                .unwrap();
        assert_eq!(entry.id, "a1");
        assert_eq!(entry.file_name, "scan.pdf");
    }
}
