//! Batch write and batch get against the stand-in server, including the
//! resubmission of unprocessed entries.

#[cfg(test)]
mod tests {
    use dynastack_core::{DynamoClient, Error, WriteEntry};
    use dynastack_model::{Item, ItemKey, Operation, Value};

    use crate::{FakeDynamo, Fault, client, client_config, hash_schema, test_table_name};

    fn user(id: usize) -> Item {
        let mut item = Item::new();
        item.insert("id".to_owned(), format!("u{id}").into());
        item.insert("rank".to_owned(), Value::from(i64::try_from(id).unwrap()));
        item.insert("bio".to_owned(), format!("user number {id}").into());
        item
    }

    fn puts(table: &str, count: usize) -> Vec<WriteEntry> {
        (0..count)
            .map(|i| WriteEntry::put(table, user(i)).with_correlation_id(format!("c-{i}")))
            .collect()
    }

    fn write_count(body: &serde_json::Value) -> usize {
        body["RequestItems"]
            .as_object()
            .map_or(0, |tables| {
                tables
                    .values()
                    .filter_map(serde_json::Value::as_array)
                    .map(Vec::len)
                    .sum()
            })
    }

    #[tokio::test]
    async fn test_should_write_sixty_entries_in_three_batches() {
        let server = FakeDynamo::start().await.unwrap();
        let table = test_table_name("bulk");
        server.create_table(&table, hash_schema());

        let outcomes = client(&server).batch_write(puts(&table, 60)).await;

        let sizes: Vec<usize> = outcomes.iter().map(|o| o.entries).collect();
        assert_eq!(sizes, vec![25, 25, 10]);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert_eq!(outcomes[2].correlation_ids.first().map(String::as_str), Some("c-50"));
        assert_eq!(server.item_count(&table), 60);
        assert_eq!(server.received(Operation::BatchWriteItem).len(), 3);
    }

    #[tokio::test]
    async fn test_should_resubmit_unprocessed_items_until_applied() {
        let server = FakeDynamo::start().await.unwrap();
        let table = test_table_name("unprocessed");
        server.create_table(&table, hash_schema());
        server.limit_batch_writes(10);

        let outcomes = client(&server).batch_write(puts(&table, 25)).await;

        assert_eq!(outcomes.len(), 1);
        let response = outcomes[0].result.as_ref().unwrap();
        assert_eq!(response.chain.len(), 2);
        assert_eq!(outcomes[0].responses().len(), 3);
        assert_eq!(server.item_count(&table), 25);

        let sent: Vec<usize> = server
            .received(Operation::BatchWriteItem)
            .iter()
            .map(write_count)
            .collect();
        assert_eq!(sent, vec![25, 15, 5]);
    }

    #[tokio::test]
    async fn test_should_resubmit_unprocessed_entries_verbatim() {
        let server = FakeDynamo::start().await.unwrap();
        let table = test_table_name("verbatim");
        server.create_table(&table, hash_schema());
        server.limit_batch_writes(2);

        let mut entries = puts(&table, 3);
        entries.push(WriteEntry::delete(table.as_str(), ItemKey::hash("u0")));
        let outcomes = client(&server).batch_write(entries).await;
        assert!(outcomes[0].result.is_ok());

        let received = server.received(Operation::BatchWriteItem);
        assert_eq!(received.len(), 2);
        let first = received[0]["RequestItems"][table.as_str()].as_array().unwrap();
        let second = received[1]["RequestItems"][table.as_str()].as_array().unwrap();
        assert_eq!(second.as_slice(), &first[2..]);
        assert!(second[1].get("DeleteRequest").is_some());

        // u0 was put by the first call and deleted by the follow-up.
        assert_eq!(server.item_count(&table), 2);
    }

    #[tokio::test]
    async fn test_should_give_up_at_resubmission_cap() {
        let server = FakeDynamo::start().await.unwrap();
        let table = test_table_name("capped");
        server.create_table(&table, hash_schema());
        server.limit_batch_writes(5);

        let mut config = client_config(&server);
        config.batch.max_resubmissions = Some(1);
        let outcomes = DynamoClient::new(config)
            .unwrap()
            .batch_write(puts(&table, 20))
            .await;

        match &outcomes[0].result {
            Err(Error::UnprocessedRemaining {
                remaining,
                resubmissions,
                response,
            }) => {
                assert_eq!(*remaining, 10);
                assert_eq!(*resubmissions, 1);
                assert_eq!(response.chain.len(), 1);
            }
            other => panic!("expected unprocessed remainder, got {other:?}"),
        }
        assert_eq!(outcomes[0].responses().len(), 2);
        assert_eq!(server.item_count(&table), 10);
    }

    #[tokio::test]
    async fn test_should_retry_throttled_batch_inside_the_pipeline() {
        let server = FakeDynamo::start().await.unwrap();
        let table = test_table_name("throttled");
        server.create_table(&table, hash_schema());
        server.inject(Fault::Throttle);
        server.inject(Fault::Throttle);

        let outcomes = client(&server).batch_write(puts(&table, 5)).await;

        let response = outcomes[0].result.as_ref().unwrap();
        assert_eq!(response.retries, 2);
        assert!(response.chain.is_empty());
        assert_eq!(server.item_count(&table), 5);
        assert_eq!(server.received(Operation::BatchWriteItem).len(), 3);
    }

    #[tokio::test]
    async fn test_should_report_failed_batch_without_affecting_siblings() {
        let server = FakeDynamo::start().await.unwrap();
        let good = test_table_name("good");
        server.create_table(&good, hash_schema());

        let mut entries = puts(&good, 3);
        entries.extend(puts("missing-table", 2));
        let outcomes = client(&server).batch_write(entries).await;

        assert_eq!(outcomes.len(), 2);
        let (ok, failed): (Vec<_>, Vec<_>) = outcomes.iter().partition(|o| o.result.is_ok());
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].table, good);
        assert_eq!(failed[0].table, "missing-table");
        assert_eq!(failed[0].correlation_ids, vec!["c-0", "c-1"]);
        assert!(matches!(failed[0].result, Err(Error::Service(_))));
        assert_eq!(server.item_count(&good), 3);
    }

    #[tokio::test]
    async fn test_should_read_back_pages_across_resubmissions() {
        let server = FakeDynamo::start().await.unwrap();
        let table = test_table_name("reads");
        server.create_table(&table, hash_schema());
        let client = client(&server);
        let outcomes = client.batch_write(puts(&table, 120)).await;
        assert!(outcomes.iter().all(|o| o.result.is_ok()));

        server.limit_batch_gets(40);
        let mut keys: Vec<ItemKey> = (0..120).map(|i| ItemKey::hash(format!("u{i}"))).collect();
        keys.push(ItemKey::hash("nobody"));
        let result = client.batch_get(&table, keys).await;

        assert_eq!(result.pages.len(), 2);
        assert_eq!(result.failures().count(), 0);
        // 100 keys take three exchanges, the remaining 21 take one.
        assert_eq!(result.responses.len(), 4);
        let items = result.items(&table).unwrap();
        assert_eq!(items.len(), 120);
        assert!(items.iter().any(|item| item["id"] == Value::from("u119")));
    }

    #[tokio::test]
    async fn test_should_project_attributes_in_batch_get() {
        let server = FakeDynamo::start().await.unwrap();
        let table = test_table_name("projection");
        server.create_table(&table, hash_schema());
        let client = client(&server);
        client.batch_write(puts(&table, 3)).await;

        let result = client
            .batch_get_attributes(
                &table,
                vec![ItemKey::hash("u1"), ItemKey::hash("u2")],
                &["id".to_owned()],
            )
            .await;
        let items = result.items(&table).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.len() == 1 && item.contains_key("id")));
        assert_eq!(
            server.received(Operation::BatchGetItem)[0]["RequestItems"][table.as_str()]
                ["AttributesToGet"],
            serde_json::json!(["id"])
        );
    }
}
