//! Tests for core identifier types

use super::*;

mod queue_name {
    use super::*;

    #[test]
    fn test_valid_queue_names() {
        for name in ["orders", "abc", "order-events-2024", "a1b2c3"] {
            assert!(QueueName::new(name).is_ok(), "'{}' should be valid", name);
        }
    }

    #[test]
    fn test_empty_queue_name_is_required_error() {
        let result = QueueName::new("");
        assert!(matches!(result, Err(ValidationError::Required { .. })));
    }

    #[test]
    fn test_queue_name_length_bounds() {
        assert!(matches!(
            QueueName::new("ab"),
            Err(ValidationError::InvalidLength { min: 3, max: 63, .. })
        ));
        assert!(QueueName::new("a".repeat(63)).is_ok());
        assert!(QueueName::new("a".repeat(64)).is_err());
    }

    #[test]
    fn test_queue_name_rejects_invalid_characters() {
        for name in ["Orders", "order_events", "-orders", "orders-", "or--ders", "or ders"] {
            assert!(
                matches!(
                    QueueName::new(name),
                    Err(ValidationError::InvalidFormat { .. })
                ),
                "'{}' should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_queue_name_parse_and_display() {
        let name: QueueName = "orders".parse().unwrap();
        assert_eq!(name.to_string(), "orders");
        assert_eq!(name.as_str(), "orders");
    }
}

mod container_name {
    use super::*;

    #[test]
    fn test_default_container_name_is_valid() {
        assert!(ContainerName::new(DEFAULT_CONTAINER_NAME).is_ok());
    }

    #[test]
    fn test_container_name_uses_container_field() {
        match ContainerName::new("") {
            Err(ValidationError::Required { field }) => assert_eq!(field, "container_name"),
            other => panic!("Expected Required error, got {:?}", other),
        }
    }
}

mod blob_name {
    use super::*;

    #[test]
    fn test_generated_blob_names_are_unique() {
        let a = BlobName::generate();
        let b = BlobName::generate();
        assert_ne!(a, b);
        assert!(BlobName::new(a.as_str()).is_ok());
    }

    #[test]
    fn test_blob_name_rejects_path_segments() {
        for name in ["", ".", "..", "a/b", "a\\b"] {
            assert!(BlobName::new(name).is_err(), "'{}' should be rejected", name);
        }
    }

    #[test]
    fn test_blob_name_max_length() {
        assert!(BlobName::new("x".repeat(1024)).is_ok());
        assert!(BlobName::new("x".repeat(1025)).is_err());
    }
}

mod receipts {
    use super::*;

    #[test]
    fn test_pop_receipts_are_unique() {
        assert_ne!(PopReceipt::generate(), PopReceipt::generate());
    }

    #[test]
    fn test_empty_identifiers_rejected() {
        assert!("".parse::<PopReceipt>().is_err());
        assert!("".parse::<MessageId>().is_err());
        assert!("abc".parse::<MessageId>().is_ok());
    }
}

mod timestamp {
    use super::*;

    #[test]
    fn test_rfc3339_round_trip() {
        let now = Timestamp::now();
        let parsed = Timestamp::from_rfc3339(&now.to_rfc3339()).unwrap();
        assert_eq!(parsed, now);
    }

    #[test]
    fn test_invalid_timestamp_rejected() {
        assert!("yesterday".parse::<Timestamp>().is_err());
    }

    #[test]
    fn test_offset_moves_forward_and_back() {
        let now = Timestamp::now();
        assert!(now.offset(chrono::Duration::seconds(5)) > now);
        assert!(now.offset(chrono::Duration::seconds(-5)) < now);
    }
}
