//! Tests for the mapping table, table-driven mapper and attribution forwarding.

use super::*;
use crate::payload::parse_delivery;
use serde_json::json;

fn tryout_table() -> MappingTable {
    MappingTable::new(vec![
        FieldRule::new("email", "Email")
            .required()
            .with_role(ContactRole::Email),
        FieldRule::new("first_name", "FirstName")
            .required()
            .with_role(ContactRole::FirstName),
        FieldRule::new("last_name", "LastName").with_role(ContactRole::LastName),
        FieldRule::new("positions", "PositionPreference")
            .with_role(ContactRole::PositionPreference),
        FieldRule::new("age", "Age"),
        FieldRule::new("has_club", "CurrentlyInClub"),
    ])
}

fn response(answers: serde_json::Value) -> FormResponse {
    let body = json!({
        "form_response": {
            "form_id": "F1",
            "token": "T1",
            "submitted_at": "2024-01-01T00:00:00Z",
            "answers": answers
        }
    });
    parse_delivery(&serde_json::to_vec(&body).unwrap())
        .unwrap()
        .form_response
}

fn text(reference: &str, value: &str) -> serde_json::Value {
    json!({ "type": "text", "text": value, "field": { "id": format!("id-{}", reference), "ref": reference, "type": "short_text" } })
}

fn email(value: &str) -> serde_json::Value {
    json!({ "type": "email", "email": value, "field": { "id": "id-email", "ref": "email", "type": "email" } })
}

mod table_tests {
    use super::*;

    #[test]
    fn test_valid_table_passes() {
        assert!(tryout_table().validate().is_ok());
    }

    #[test]
    fn test_empty_table_rejected() {
        assert!(matches!(
            MappingTable::default().validate(),
            Err(MappingConfigError::Empty)
        ));
    }

    #[test]
    fn test_duplicate_question_ref_rejected() {
        let table = MappingTable::new(vec![
            FieldRule::new("email", "Email"),
            FieldRule::new("email", "Email2"),
        ]);
        assert!(matches!(
            table.validate(),
            Err(MappingConfigError::DuplicateQuestionRef(r)) if r == "email"
        ));
    }

    #[test]
    fn test_duplicate_list_field_rejected() {
        let table = MappingTable::new(vec![
            FieldRule::new("a", "Name"),
            FieldRule::new("b", "Name"),
        ]);
        assert!(matches!(
            table.validate(),
            Err(MappingConfigError::DuplicateListField(f)) if f == "Name"
        ));
    }

    #[test]
    fn test_duplicate_role_rejected() {
        let table = MappingTable::new(vec![
            FieldRule::new("a", "A").with_role(ContactRole::Email),
            FieldRule::new("b", "B").with_role(ContactRole::Email),
        ]);
        assert!(matches!(
            table.validate(),
            Err(MappingConfigError::DuplicateRole(ContactRole::Email))
        ));
    }

    #[test]
    fn test_blank_names_rejected() {
        let table = MappingTable::new(vec![FieldRule::new("a", "  ")]);
        assert!(matches!(
            table.validate(),
            Err(MappingConfigError::BlankName { .. })
        ));
    }

    #[test]
    fn test_table_parses_from_yaml() {
        let yaml = r#"
rules:
  - question_ref: email
    list_field: Email
    required: true
    role: email
  - question_ref: positions
    list_field: PositionPreference
    role: position_preference
  - question_ref: notes
    list_field: Notes
"#;
        let table = MappingTable::from_yaml_str(yaml).unwrap();

        assert_eq!(table.rules.len(), 3);
        assert!(table.rules[0].required);
        assert_eq!(table.rules[1].role, Some(ContactRole::PositionPreference));
        assert!(!table.rules[2].required);
        assert!(table.rules[2].role.is_none());
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        assert!(matches!(
            MappingTable::from_yaml_str("rules: [ {question_ref: 1"),
            Err(MappingConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = MappingTable::from_yaml_file("/nonexistent/mapping.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/mapping.yaml"));
    }
}

mod mapper_tests {
    use super::*;

    fn mapper() -> TableFieldMapper {
        TableFieldMapper::new(tryout_table()).unwrap()
    }

    #[test]
    fn test_maps_complete_response() {
        let response = response(json!([
            email("player@example.com"),
            text("first_name", "Alex"),
            text("last_name", "Morgan"),
            {
                "type": "choices",
                "choices": { "labels": ["Striker", "Winger"] },
                "field": { "id": "id-positions", "ref": "positions", "type": "multiple_choice" }
            },
            { "type": "number", "number": 19, "field": { "id": "id-age", "ref": "age" } },
            { "type": "boolean", "boolean": false, "field": { "id": "id-club", "ref": "has_club" } }
        ]));

        let result = mapper().map(&response);

        assert!(result.is_valid());
        assert_eq!(result.email.as_deref(), Some("player@example.com"));
        assert_eq!(result.full_name.as_deref(), Some("Alex Morgan"));
        assert_eq!(
            result.position_preference,
            Some(vec!["Striker".to_string(), "Winger".to_string()])
        );
        assert_eq!(result.fields["Email"], json!("player@example.com"));
        assert_eq!(result.fields["PositionPreference"], json!(["Striker", "Winger"]));
        assert_eq!(result.fields["Age"], json!(19));
        assert_eq!(result.fields["CurrentlyInClub"], json!(false));
        assert!(result.unmapped_refs.is_empty());
    }

    #[test]
    fn test_missing_required_field_reported_by_list_field_name() {
        let response = response(json!([text("first_name", "Alex")]));

        let result = mapper().map(&response);

        assert!(!result.is_valid());
        assert_eq!(result.missing_required, vec!["Email".to_string()]);
        assert!(result.email.is_none());
    }

    #[test]
    fn test_blank_required_answer_counts_as_missing() {
        let response = response(json!([email("   "), text("first_name", "Alex")]));

        let result = mapper().map(&response);

        assert_eq!(result.missing_required, vec!["Email".to_string()]);
        assert!(!result.fields.contains_key("Email"));
    }

    #[test]
    fn test_unmapped_refs_are_diagnostic() {
        let response = response(json!([
            email("a@b.co"),
            text("first_name", "Sam"),
            text("favourite_team", "Rovers")
        ]));

        let result = mapper().map(&response);

        assert!(result.is_valid());
        assert_eq!(result.unmapped_refs, vec!["favourite_team".to_string()]);
        assert!(!result.fields.contains_key("favourite_team"));
    }

    #[test]
    fn test_full_name_role_wins_over_composition() {
        let table = MappingTable::new(vec![
            FieldRule::new("name", "FullName").with_role(ContactRole::FullName),
            FieldRule::new("first_name", "FirstName").with_role(ContactRole::FirstName),
        ]);
        let mapper = TableFieldMapper::new(table).unwrap();
        let response = response(json!([
            text("name", "Jordan Lee"),
            text("first_name", "Jordy")
        ]));

        assert_eq!(mapper.map(&response).full_name.as_deref(), Some("Jordan Lee"));
    }

    #[test]
    fn test_first_name_alone_becomes_full_name() {
        let response = response(json!([email("a@b.co"), text("first_name", "Alex")]));
        assert_eq!(mapper().map(&response).full_name.as_deref(), Some("Alex"));
    }

    #[test]
    fn test_text_position_preferences_split_on_commas() {
        let response = response(json!([
            email("a@b.co"),
            text("first_name", "Alex"),
            text("positions", "Goalkeeper, Defender ,,")
        ]));

        let result = mapper().map(&response);

        assert_eq!(
            result.position_preference,
            Some(vec!["Goalkeeper".to_string(), "Defender".to_string()])
        );
    }

    #[test]
    fn test_single_choice_uses_other_when_label_missing() {
        let response = response(json!([
            email("a@b.co"),
            text("first_name", "Alex"),
            {
                "type": "choice",
                "choice": { "other": "Libero" },
                "field": { "id": "id-positions", "ref": "positions" }
            }
        ]));

        let result = mapper().map(&response);

        assert_eq!(result.fields["PositionPreference"], json!("Libero"));
        assert_eq!(result.position_preference, Some(vec!["Libero".to_string()]));
    }
}

mod attribution_tests {
    use super::*;
    use crate::payload::Attribution;

    #[test]
    fn test_default_keys_validate_against_table() {
        assert!(AttributionKeys::default()
            .validate_against(&tryout_table())
            .is_ok());
    }

    #[test]
    fn test_key_colliding_with_mapped_field_rejected() {
        let keys = AttributionKeys {
            utm_source: "Email".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            keys.validate_against(&tryout_table()),
            Err(MappingConfigError::AttributionKeyCollision(k)) if k == "Email"
        ));
    }

    #[test]
    fn test_duplicate_and_blank_keys_rejected() {
        let duplicate = AttributionKeys {
            utm_medium: "Attribution_UtmSource".to_string(),
            ..Default::default()
        };
        let blank = AttributionKeys {
            user_agent: String::new(),
            ..Default::default()
        };

        assert!(matches!(
            duplicate.validate_against(&tryout_table()),
            Err(MappingConfigError::DuplicateAttributionKey(_))
        ));
        assert!(matches!(
            blank.validate_against(&tryout_table()),
            Err(MappingConfigError::BlankAttributionKey { member: "user_agent" })
        ));
    }

    #[test]
    fn test_apply_adds_present_members_only() {
        let mut fields = ListFields::new();
        fields.insert("Email".to_string(), json!("a@b.co"));
        let attribution = Attribution {
            utm_source: Some("ads".to_string()),
            session_id: Some("s-1".to_string()),
            ..Default::default()
        };

        let skipped = apply_attribution(&mut fields, &attribution, &AttributionKeys::default());

        assert!(skipped.is_empty());
        assert_eq!(fields["Email"], json!("a@b.co"));
        assert_eq!(fields["Attribution_UtmSource"], json!("ads"));
        assert_eq!(fields["Attribution_SessionId"], json!("s-1"));
        assert!(!fields.contains_key("Attribution_UtmMedium"));
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn test_apply_never_overwrites_mapper_keys() {
        let mut fields = ListFields::new();
        fields.insert("Attribution_UtmSource".to_string(), json!("from-mapper"));
        let attribution = Attribution {
            utm_source: Some("ads".to_string()),
            ..Default::default()
        };

        let skipped = apply_attribution(&mut fields, &attribution, &AttributionKeys::default());

        assert_eq!(skipped, vec!["Attribution_UtmSource".to_string()]);
        assert_eq!(fields["Attribution_UtmSource"], json!("from-mapper"));
    }

    #[test]
    fn test_keys_deserialize_with_partial_override() {
        let keys: AttributionKeys =
            serde_json::from_value(json!({ "utm_source": "Source" })).unwrap();

        assert_eq!(keys.utm_source, "Source");
        assert_eq!(keys.utm_medium, "Attribution_UtmMedium");
    }
}
