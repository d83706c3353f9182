//! Single-item and table operations against the stand-in server.

#[cfg(test)]
mod tests {
    use dynastack_auth::Credentials;
    use dynastack_core::{DynamoClient, Error};
    use dynastack_model::types::{Key, ProvisionedThroughput};
    use dynastack_model::{AttributeValue, Item, ItemKey, ServiceErrorCode, Value};

    use crate::{FakeDynamo, client, client_config, composite_schema, hash_schema, test_table_name};

    fn user(id: &str, name: &str) -> Item {
        let mut item = Item::new();
        item.insert("id".to_owned(), id.into());
        item.insert("name".to_owned(), name.into());
        item
    }

    fn service_code(err: &Error) -> Option<ServiceErrorCode> {
        match err {
            Error::Service(status) => status.error.as_ref().and_then(|e| e.code),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_should_create_and_delete_table() {
        let server = FakeDynamo::start().await.unwrap();
        let client = client(&server);
        let table = test_table_name("create");
        let throughput = ProvisionedThroughput {
            read_capacity_units: 5,
            write_capacity_units: 5,
        };

        let created = client
            .create_table(&table, &composite_schema(), throughput)
            .await
            .unwrap();
        assert_eq!(created.table_name, table);
        assert_eq!(created.table_status, "CREATING");
        assert_eq!(created.key_schema, Some(composite_schema()));
        assert_eq!(created.provisioned_throughput, Some(throughput));

        let err = client
            .create_table(&table, &composite_schema(), throughput)
            .await
            .unwrap_err();
        assert_eq!(
            service_code(&err),
            Some(ServiceErrorCode::ResourceInUseException)
        );

        let deleted = client.delete_table(&table).await.unwrap();
        assert_eq!(deleted.table_status, "DELETING");
        let err = client.delete_table(&table).await.unwrap_err();
        assert_eq!(
            service_code(&err),
            Some(ServiceErrorCode::ResourceNotFoundException)
        );
    }

    #[tokio::test]
    async fn test_should_put_get_and_delete_item() {
        let server = FakeDynamo::start().await.unwrap();
        let client = client(&server);
        let table = test_table_name("items");
        server.create_table(&table, hash_schema());

        let mut item = user("u1", "Ada");
        item.insert(
            "scores".to_owned(),
            Value::number_set(["3".parse().unwrap(), "1.5".parse().unwrap()]),
        );
        item.insert("tags".to_owned(), Value::string_set(["admin", "ops"]));
        client.put_item(&table, item.clone()).await.unwrap();

        let stored = server
            .stored_item(
                &table,
                Key {
                    hash_key_element: AttributeValue::S("u1".to_owned()),
                    range_key_element: None,
                },
            )
            .unwrap();
        assert_eq!(
            stored["tags"],
            AttributeValue::Ss(vec!["admin".to_owned(), "ops".to_owned()])
        );

        let fetched = client.get_item(&table, &ItemKey::hash("u1")).await.unwrap();
        assert_eq!(fetched, Some(item));

        client.delete_item(&table, &ItemKey::hash("u1")).await.unwrap();
        let fetched = client.get_item(&table, &ItemKey::hash("u1")).await.unwrap();
        assert!(fetched.is_none());
        assert_eq!(server.item_count(&table), 0);
    }

    #[tokio::test]
    async fn test_should_address_items_by_composite_key() {
        let server = FakeDynamo::start().await.unwrap();
        let client = client(&server);
        let table = test_table_name("events");
        server.create_table(&table, composite_schema());

        for seq in 1..=3 {
            let mut item = Item::new();
            item.insert("stream".to_owned(), "s1".into());
            item.insert("seq".to_owned(), seq.into());
            item.insert("payload".to_owned(), format!("event-{seq}").into());
            client.put_item(&table, item).await.unwrap();
        }

        let item = client
            .get_item(&table, &ItemKey::composite("s1", 2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item["payload"], Value::from("event-2"));
        assert_eq!(server.item_count(&table), 3);
    }

    #[tokio::test]
    async fn test_should_raise_not_found_for_missing_table() {
        let server = FakeDynamo::start().await.unwrap();
        let client = client(&server);

        let err = client
            .get_item("no-such-table", &ItemKey::hash("u1"))
            .await
            .unwrap_err();
        assert_eq!(
            service_code(&err),
            Some(ServiceErrorCode::ResourceNotFoundException)
        );
        assert_eq!(err.response().unwrap().retries, 0);
    }

    #[tokio::test]
    async fn test_should_sign_requests_the_server_accepts() {
        let credentials = Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY");
        let server = FakeDynamo::start_signed(credentials.clone()).await.unwrap();
        let table = test_table_name("signed");
        server.create_table(&table, hash_schema());

        let mut config = client_config(&server);
        config.credentials = Some(credentials);
        let client = DynamoClient::new(config).unwrap();
        client.put_item(&table, user("u1", "Ada")).await.unwrap();
        assert_eq!(server.item_count(&table), 1);
    }

    #[tokio::test]
    async fn test_should_be_denied_with_wrong_secret() {
        let server = FakeDynamo::start_signed(Credentials::new("AKIDEXAMPLE", "right"))
            .await
            .unwrap();
        let table = test_table_name("denied");
        server.create_table(&table, hash_schema());

        let mut config = client_config(&server);
        config.credentials = Some(Credentials::new("AKIDEXAMPLE", "wrong"));
        let err = DynamoClient::new(config)
            .unwrap()
            .put_item(&table, user("u1", "Ada"))
            .await
            .unwrap_err();
        assert_eq!(
            service_code(&err),
            Some(ServiceErrorCode::AccessDeniedException)
        );
        assert_eq!(server.item_count(&table), 0);

        let err = client(&server)
            .put_item(&table, user("u1", "Ada"))
            .await
            .unwrap_err();
        assert_eq!(
            service_code(&err),
            Some(ServiceErrorCode::AccessDeniedException)
        );
    }
}
