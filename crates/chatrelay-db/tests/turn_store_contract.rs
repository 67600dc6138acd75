use std::collections::HashSet;
use std::time::Duration;

use chatrelay_common::{ConversationId, Turn, TurnPart, TurnRole};
use chatrelay_db::{InMemoryTurnStore, SqliteTurnStore, TurnStore};
use serde_json::{Value, json};

fn backends() -> Vec<Box<dyn TurnStore>> {
    vec![
        Box::new(InMemoryTurnStore::new()),
        Box::new(SqliteTurnStore::in_memory().expect("failed to open sqlite store")),
    ]
}

fn conversation(id: &str) -> ConversationId {
    ConversationId::from_str(id)
}

#[tokio::test]
async fn unknown_conversation_loads_empty() {
    for store in backends() {
        let turns = store
            .load(&conversation("never-seen"))
            .await
            .expect("load should succeed");
        assert!(turns.is_empty(), "backend {}", store.backend());
    }
}

#[tokio::test]
async fn turns_without_id_get_unique_ids() {
    for store in backends() {
        let id = conversation("c1");
        let returned = store
            .persist(
                &id,
                &[
                    Turn::text(TurnRole::User, "first"),
                    Turn::text(TurnRole::Assistant, "second").with_id(""),
                    Turn::text(TurnRole::User, "third").with_id("  "),
                ],
            )
            .await
            .expect("persist should succeed");

        let turns = store.load(&id).await.expect("load should succeed");
        assert_eq!(turns.len(), 3, "backend {}", store.backend());

        let ids: HashSet<&str> = turns.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|id| !id.trim().is_empty()));

        let loaded: Vec<&str> = turns.iter().map(|t| t.id.as_str()).collect();
        let returned: Vec<&str> = returned.iter().map(String::as_str).collect();
        assert_eq!(loaded, returned);
    }
}

#[tokio::test]
async fn persisting_same_turn_twice_keeps_one_row() {
    for store in backends() {
        let id = conversation("c1");
        let turn = Turn::text(TurnRole::User, "hello").with_id("m1");

        store.persist(&id, &[turn.clone()]).await.expect("first persist");
        let first = store.records(&id).await.expect("records");

        tokio::time::sleep(Duration::from_millis(2)).await;
        store.persist(&id, &[turn]).await.expect("second persist");
        let second = store.records(&id).await.expect("records");

        assert_eq!(second.len(), 1, "backend {}", store.backend());
        assert_eq!(second[0].content, "hello");
        assert_eq!(second[0].created_at, first[0].created_at);
        assert!(second[0].updated_at >= first[0].updated_at);
    }
}

#[tokio::test]
async fn upsert_updates_content_in_place() {
    for store in backends() {
        let id = conversation("c1");
        store
            .persist(
                &id,
                &[
                    Turn::text(TurnRole::User, "q").with_id("u1"),
                    Turn::text(TurnRole::Assistant, "partial an").with_id("a1"),
                ],
            )
            .await
            .unwrap();
        store
            .persist(&id, &[Turn::text(TurnRole::Assistant, "partial answer").with_id("a1")])
            .await
            .unwrap();

        let turns = store.load(&id).await.unwrap();
        assert_eq!(turns.len(), 2, "backend {}", store.backend());
        assert_eq!(turns[0].id, "u1");
        assert_eq!(turns[1].id, "a1");
        assert_eq!(turns[1].text_content(), "partial answer");
    }
}

#[tokio::test]
async fn text_round_trip_yields_single_text_part() {
    for store in backends() {
        let id = conversation("c1");
        store
            .persist(&id, &[Turn::text(TurnRole::User, "hello").with_id("m1")])
            .await
            .unwrap();

        let turns = store.load(&id).await.unwrap();
        assert_eq!(turns[0].parts, vec![TurnPart::text("hello")]);
        assert_eq!(turns[0].role, TurnRole::User);
    }
}

#[tokio::test]
async fn order_is_preserved_across_calls() {
    for store in backends() {
        let id = conversation("c1");
        for (turn_id, text) in [("a", "A"), ("b", "B"), ("c", "C")] {
            store
                .persist(&id, &[Turn::text(TurnRole::User, text).with_id(turn_id)])
                .await
                .unwrap();
        }

        let texts: Vec<String> = store
            .load(&id)
            .await
            .unwrap()
            .iter()
            .map(Turn::text_content)
            .collect();
        assert_eq!(texts, vec!["A", "B", "C"], "backend {}", store.backend());
    }
}

#[tokio::test]
async fn order_is_preserved_within_one_batch() {
    for store in backends() {
        let id = conversation("c1");
        let batch: Vec<Turn> = (0..20)
            .map(|i| Turn::text(TurnRole::User, format!("turn {i}")))
            .collect();
        store.persist(&id, &batch).await.unwrap();

        let texts: Vec<String> = store
            .load(&id)
            .await
            .unwrap()
            .iter()
            .map(Turn::text_content)
            .collect();
        let expected: Vec<String> = (0..20).map(|i| format!("turn {i}")).collect();
        assert_eq!(texts, expected, "backend {}", store.backend());
    }
}

#[tokio::test]
async fn empty_metadata_adds_no_fields_on_reload() {
    for store in backends() {
        let id = conversation("c1");
        store
            .persist(
                &id,
                &[Turn::text(TurnRole::User, "hi")
                    .with_id("m1")
                    .with_field("metadata", Value::Null)],
            )
            .await
            .unwrap();

        let records = store.records(&id).await.unwrap();
        assert!(records[0].metadata.is_none(), "backend {}", store.backend());

        let turns = store.load(&id).await.unwrap();
        assert!(turns[0].extra.is_empty());
        let wire = serde_json::to_value(&turns[0]).unwrap();
        let keys: Vec<&String> = wire.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["id", "role", "parts"]);
    }
}

#[tokio::test]
async fn metadata_fields_merge_back_on_reload() {
    for store in backends() {
        let id = conversation("c1");
        store
            .persist(
                &id,
                &[Turn::text(TurnRole::Assistant, "answer")
                    .with_id("m1")
                    .with_field("metadata", json!({"model": "gpt-4.1-mini", "tokens": 12}))],
            )
            .await
            .unwrap();

        let turns = store.load(&id).await.unwrap();
        assert_eq!(
            turns[0].extra["metadata"],
            json!({"model": "gpt-4.1-mini", "tokens": 12}),
            "backend {}",
            store.backend()
        );
    }
}

#[tokio::test]
async fn non_text_parts_are_not_stored() {
    for store in backends() {
        let id = conversation("c1");
        let turn: Turn = serde_json::from_value(json!({
            "id": "m1",
            "role": "user",
            "parts": [
                {"type": "file", "url": "https://example.com/cat.png", "mediaType": "image/png"},
                {"type": "text", "text": "what is this?"}
            ]
        }))
        .unwrap();
        store.persist(&id, &[turn]).await.unwrap();

        let turns = store.load(&id).await.unwrap();
        assert_eq!(turns[0].parts, vec![TurnPart::text("what is this?")]);
    }
}

#[tokio::test]
async fn blank_conversation_id_is_rejected_without_writes() {
    for store in backends() {
        let err = store
            .persist(&conversation(""), &[Turn::text(TurnRole::User, "hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, chatrelay_common::Error::Validation(_)));
        assert!(store.load(&conversation("")).await.unwrap().is_empty());
    }
}
