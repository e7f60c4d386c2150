//! Typed views over the Exact records the portal reads

use serde::Deserialize;
use serde_json::Value;

/// CRM contact as returned by the login lookup.
///
/// `secret` holds the value of the configured secret field, which is only
/// populated when it is a string.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub secret: Option<String>,
}

impl Contact {
    /// Parse one contact record. Records without a string `ID` are skipped.
    pub fn from_record(record: &Value, secret_field: &str) -> Option<Self> {
        let text = |key: &str| record.get(key).and_then(Value::as_str).map(str::to_owned);
        Some(Self {
            id: text("ID")?,
            email: text("Email"),
            full_name: text("FullName"),
            secret: text(secret_field),
        })
    }
}

/// One custom field attached to an item.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtraField {
    #[serde(rename = "ItemID", default)]
    pub item_id: Option<String>,
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
    #[serde(rename = "Value", default, deserialize_with = "text_or_number")]
    pub value: Option<String>,
}

fn text_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

/// Quote a value as an OData string literal (single quotes doubled).
pub fn odata_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contact_reads_configured_secret_field() {
        let record = json!({
            "ID": "b0a1",
            "Email": "jan@example.nl",
            "FullName": "Jan Jansen",
            "SocialSecurityNumber": "s3cret"
        });
        let contact = Contact::from_record(&record, "SocialSecurityNumber").unwrap();
        assert_eq!(contact.id, "b0a1");
        assert_eq!(contact.full_name.as_deref(), Some("Jan Jansen"));
        assert_eq!(contact.secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn contact_without_id_is_skipped() {
        let record = json!({ "Email": "jan@example.nl" });
        assert!(Contact::from_record(&record, "SocialSecurityNumber").is_none());
    }

    #[test]
    fn non_string_secret_is_treated_as_absent() {
        let record = json!({ "ID": "x", "SocialSecurityNumber": 12345 });
        let contact = Contact::from_record(&record, "SocialSecurityNumber").unwrap();
        assert!(contact.secret.is_none());
    }

    #[test]
    fn extra_field_value_accepts_numbers() {
        let field: ExtraField = serde_json::from_value(json!({
            "ItemID": "i1", "Description": "Dikte", "Value": 12.5
        }))
        .unwrap();
        assert_eq!(field.value.as_deref(), Some("12.5"));

        let empty: ExtraField =
            serde_json::from_value(json!({ "Description": "Hoogte", "Value": null })).unwrap();
        assert!(empty.value.is_none());
    }

    #[test]
    fn odata_string_doubles_quotes() {
        assert_eq!(odata_string("a@b.nl"), "'a@b.nl'");
        assert_eq!(odata_string("o'brien@x.ie"), "'o''brien@x.ie'");
        assert_eq!(
            odata_string("x' or Email ne null or '"),
            "'x'' or Email ne null or '''"
        );
    }
}
