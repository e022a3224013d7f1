//! Symmetric marshal/unmarshal of a `LogEntry`'s recipient list to the
//! self-describing text form stored in a single `log_entries.recipients`
//! column. JSON array text was chosen over a delimited string because it
//! round-trips addresses containing commas without an escaping scheme.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecipientListError {
    #[error("invalid recipient list encoding: {0}")]
    Decode(#[from] serde_json::Error),
}

pub fn marshal_recipients(recipients: &[String]) -> String {
    serde_json::to_string(recipients).expect("Vec<String> serialization cannot fail")
}

pub fn unmarshal_recipients(text: &str) -> Result<Vec<String>, RecipientListError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_empty_list() {
        let encoded = marshal_recipients(&[]);
        assert_eq!(unmarshal_recipients(&encoded).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn round_trips_multi_element_list_preserving_order() {
        let recipients = vec![
            "b@example.com".to_owned(),
            "a@example.com".to_owned(),
            "b@example.com".to_owned(),
        ];
        let encoded = marshal_recipients(&recipients);
        assert_eq!(unmarshal_recipients(&encoded).unwrap(), recipients);
    }

    #[test]
    fn round_trips_addresses_with_commas_and_quotes() {
        let recipients = vec![r#""quoted,addr"@example.com"#.to_owned()];
        let encoded = marshal_recipients(&recipients);
        assert_eq!(unmarshal_recipients(&encoded).unwrap(), recipients);
    }

    #[test]
    fn empty_column_text_unmarshals_to_empty_list() {
        assert_eq!(unmarshal_recipients("").unwrap(), Vec::<String>::new());
    }
}
