//! Tests for shared queue semantics

use super::*;

fn limits() -> QueueLimits {
    QueueLimits::default()
}

fn add(state: &mut QueueState, body: &str, now: Timestamp) -> QueuedMessage {
    state
        .add(body.as_bytes(), None, None, &limits(), now)
        .unwrap()
}

mod enqueue {
    use super::*;

    #[test]
    fn test_add_sets_defaults() {
        let mut state = QueueState::default();
        let now = Timestamp::now();

        let message = add(&mut state, "hello", now);

        assert_eq!(message.body, Bytes::from("hello"));
        assert_eq!(message.dequeue_count, 0);
        assert_eq!(message.insertion_time, now);
        assert_eq!(
            message.expiration_time,
            Some(now.offset(Duration::seconds(DEFAULT_MESSAGE_TTL_SECONDS)))
        );
        assert_eq!(message.next_visible_time, Some(now));
    }

    #[test]
    fn test_size_limit_applies_to_encoded_body() {
        let mut state = QueueState::default();
        let limits = QueueLimits {
            max_message_size: 8,
            max_batch_size: 32,
        };

        // 6 bytes encode to exactly 8
        assert!(state
            .add(b"abcdef", None, None, &limits, Timestamp::now())
            .is_ok());

        let result = state.add(b"abcdefg", None, None, &limits, Timestamp::now());
        match result {
            Err(QueueError::MessageTooLarge { size, max_size }) => {
                assert_eq!(size, 12);
                assert_eq!(max_size, 8);
            }
            other => panic!("Expected MessageTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_delay_must_be_shorter_than_ttl() {
        let mut state = QueueState::default();
        let result = state.add(
            b"x",
            Some(Duration::seconds(10)),
            Some(Duration::seconds(10)),
            &limits(),
            Timestamp::now(),
        );
        assert!(matches!(result, Err(QueueError::InvalidRequest { .. })));
    }

    #[test]
    fn test_non_positive_ttl_rejected() {
        let mut state = QueueState::default();
        let result = state.add(
            b"x",
            Some(Duration::zero()),
            None,
            &limits(),
            Timestamp::now(),
        );
        assert!(matches!(result, Err(QueueError::InvalidRequest { .. })));
    }
}

mod visibility {
    use super::*;

    #[test]
    fn test_dequeue_hides_message_until_timeout() {
        let mut state = QueueState::default();
        let now = Timestamp::now();
        add(&mut state, "a", now);

        let first = state.dequeue(1, Some(Duration::seconds(30)), now).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].dequeue_count, 1);

        assert!(state.dequeue(1, None, now).unwrap().is_empty());

        let later = now.offset(Duration::seconds(31));
        let second = state.dequeue(1, None, later).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].dequeue_count, 2);
        assert_ne!(first[0].pop_receipt, second[0].pop_receipt);
    }

    #[test]
    fn test_delayed_message_is_invisible() {
        let mut state = QueueState::default();
        let now = Timestamp::now();
        state
            .add(b"later", None, Some(Duration::seconds(60)), &limits(), now)
            .unwrap();

        assert!(state.peek(1, now).unwrap().is_empty());
        assert_eq!(
            state
                .peek(1, now.offset(Duration::seconds(60)))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_expired_messages_are_dropped() {
        let mut state = QueueState::default();
        let now = Timestamp::now();
        state
            .add(b"short", Some(Duration::seconds(5)), None, &limits(), now)
            .unwrap();

        let later = now.offset(Duration::seconds(5));
        assert!(state.dequeue(1, None, later).unwrap().is_empty());
        assert_eq!(state.attributes(later).approximate_message_count, 0);
    }

    #[test]
    fn test_peek_does_not_change_state() {
        let mut state = QueueState::default();
        let now = Timestamp::now();
        add(&mut state, "a", now);

        let peeked = state.peek(5, now).unwrap();
        assert_eq!(peeked.len(), 1);
        assert!(peeked[0].pop_receipt.is_none());
        assert_eq!(peeked[0].dequeue_count, 0);

        assert_eq!(state.dequeue(1, None, now).unwrap().len(), 1);
    }

    #[test]
    fn test_negative_visibility_rejected() {
        let mut state = QueueState::default();
        let result = state.dequeue(1, Some(Duration::seconds(-1)), Timestamp::now());
        assert!(matches!(result, Err(QueueError::InvalidRequest { .. })));
    }
}

mod receipts {
    use super::*;

    #[test]
    fn test_delete_requires_current_pop_receipt() {
        let mut state = QueueState::default();
        let now = Timestamp::now();
        add(&mut state, "a", now);

        let first = state.dequeue(1, Some(Duration::zero()), now).unwrap().remove(0);
        let second = state.dequeue(1, None, now).unwrap().remove(0);
        let stale = first.pop_receipt.unwrap();

        assert!(matches!(
            state.delete(&first.id, &stale, now),
            Err(QueueError::MessageNotFound { .. })
        ));

        state
            .delete(&second.id, second.pop_receipt.as_ref().unwrap(), now)
            .unwrap();
        assert_eq!(state.attributes(now).approximate_message_count, 0);
    }

    #[test]
    fn test_delete_twice_is_not_found() {
        let mut state = QueueState::default();
        let now = Timestamp::now();
        add(&mut state, "a", now);
        let message = state.dequeue(1, None, now).unwrap().remove(0);
        let receipt = message.pop_receipt.unwrap();

        state.delete(&message.id, &receipt, now).unwrap();
        assert!(matches!(
            state.delete(&message.id, &receipt, now),
            Err(QueueError::MessageNotFound { .. })
        ));
    }

    #[test]
    fn test_update_replaces_body_and_receipt() {
        let mut state = QueueState::default();
        let now = Timestamp::now();
        add(&mut state, "old", now);
        let message = state.dequeue(1, None, now).unwrap().remove(0);
        let receipt = message.pop_receipt.clone().unwrap();

        let update = MessageUpdate::visibility(message.id.clone(), receipt.clone(), Duration::zero())
            .with_body(Bytes::from("new"));
        let updated = state.update(&update, &limits(), now).unwrap();

        assert_ne!(updated.pop_receipt, receipt);
        assert_eq!(updated.next_visible_time, now);

        let peeked = state.peek(1, now).unwrap();
        assert_eq!(peeked[0].body, Bytes::from("new"));
    }
}
