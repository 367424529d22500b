mod common;

use anyhow::Result;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use common::TestServer;

fn people_schema() -> Value {
    json!({
        "name": { "type": "String", "unique": true, "required": true },
        "age": { "type": "Number" },
        "tags": { "type": "Array" }
    })
}

#[tokio::test]
async fn list_collections_joins_schemas() -> Result<()> {
    let server = TestServer::start().await?;
    server.create_collection("shop", "people", people_schema()).await?;

    let res = server.app(Method::GET, "collection", "db=shop").send().await?;
    assert_eq!(res.status(), StatusCode::OK);

    let body = res.json::<Value>().await?;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["database"], json!("shop"));
    assert_eq!(body["data"]["meta"]["apiVersion"], json!("v1"));

    let collections = body["data"]["data"].as_array().cloned().unwrap_or_default();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0]["name"], json!("people"));
    assert_eq!(collections[0]["schema"]["createdAt"]["type"], json!("Date"));
    Ok(())
}

#[tokio::test]
async fn duplicate_collection_conflicts() -> Result<()> {
    let server = TestServer::start().await?;
    server.create_collection("shop", "people", people_schema()).await?;

    let res = server
        .app(Method::POST, "people", "db=shop")
        .json(&json!({ "collectionSchema": people_schema() }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn unknown_type_tag_is_rejected() -> Result<()> {
    let server = TestServer::start().await?;
    let res = server
        .app(Method::POST, "people", "db=shop")
        .json(&json!({ "collectionSchema": { "name": { "type": "Text" } } }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn unique_round_trip() -> Result<()> {
    let server = TestServer::start().await?;
    server.create_collection("shop", "people", people_schema()).await?;

    let res = server.insert("shop", "people", json!({ "name": "a", "age": 1 })).await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let body = res.json::<Value>().await?;
    assert!(body["data"]["data"]["_id"].is_string());
    assert!(body["data"]["data"]["createdAt"].is_string());

    let res = server.insert("shop", "people", json!({ "name": "a", "age": 2 })).await?;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body = res.json::<Value>().await?;
    assert!(body["message"].as_str().unwrap_or_default().contains("name"));
    Ok(())
}

#[tokio::test]
async fn validation_errors_name_the_field() -> Result<()> {
    let server = TestServer::start().await?;
    server.create_collection("shop", "people", people_schema()).await?;

    let res = server.insert("shop", "people", json!({ "name": "a", "age": "one" })).await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = res.json::<Value>().await?;
    assert_eq!(body["code"], json!("VALIDATION_ERROR"));
    assert!(body["field_errors"]["age"].is_string());

    let res = server.insert("shop", "people", json!({ "name": "b", "nickname": "bee" })).await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = res.json::<Value>().await?;
    assert!(body["field_errors"]["nickname"].is_string());
    Ok(())
}

#[tokio::test]
async fn pagination_boundaries() -> Result<()> {
    let server = TestServer::start().await?;
    server.create_collection("shop", "people", people_schema()).await?;
    for i in 0..25 {
        let res = server
            .insert("shop", "people", json!({ "name": format!("p{}", i), "age": i }))
            .await?;
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    let page = |n: u32| {
        server
            .app(Method::GET, "people", &format!("db=shop&page={}&limit=10", n))
            .send()
    };

    let second = page(2).await?.json::<Value>().await?;
    assert_eq!(second["data"]["data"]["documents"].as_array().map(Vec::len), Some(10));
    assert_eq!(second["data"]["data"]["pagination"]["hasMore"], json!(true));

    let third = page(3).await?.json::<Value>().await?;
    assert_eq!(third["data"]["data"]["documents"].as_array().map(Vec::len), Some(5));
    assert_eq!(third["data"]["data"]["pagination"]["hasMore"], json!(false));
    assert_eq!(third["data"]["data"]["pagination"]["total"], json!(25));

    // No intervening writes: identical documents and pagination
    let again = page(3).await?.json::<Value>().await?;
    assert_eq!(again["data"]["data"], third["data"]["data"]);
    Ok(())
}

#[tokio::test]
async fn update_then_delete_document() -> Result<()> {
    let server = TestServer::start().await?;
    server.create_collection("shop", "people", people_schema()).await?;

    let inserted = server
        .insert("shop", "people", json!({ "name": "a", "age": 1, "tags": ["x"] }))
        .await?
        .json::<Value>()
        .await?;
    let id = inserted["data"]["data"]["_id"].as_str().unwrap_or_default().to_string();

    let res = server
        .app(Method::PUT, "people", &format!("db=shop&id={}", id))
        .json(&json!({ "data": { "age": 2 } }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.json::<Value>().await?;
    assert_eq!(body["data"]["data"]["matchedCount"], json!(1));

    let listed = server
        .app(Method::GET, "people", "db=shop")
        .send()
        .await?
        .json::<Value>()
        .await?;
    let doc = &listed["data"]["data"]["documents"][0];
    assert_eq!(doc["age"], json!(2));
    assert_eq!(doc["tags"], json!(["x"]));

    let res = server
        .app(Method::PUT, "people", "db=shop&id=not-a-uuid")
        .json(&json!({ "data": { "age": 3 } }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = server
        .app(Method::DELETE, "people", &format!("db=shop&id={}", id))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.json::<Value>().await?;
    assert_eq!(body["data"]["data"]["deletedCount"], json!(1));

    let res = server
        .app(Method::DELETE, "people", &format!("db=shop&id={}", id))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn drop_collection_with_action_token() -> Result<()> {
    let server = TestServer::start().await?;
    server.create_collection("shop", "people", people_schema()).await?;

    let res = server
        .app(Method::DELETE, "people", "db=shop")
        .json(&json!({ "request": common::action_token_aged(0) }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server
        .app(Method::DELETE, "people", "db=shop")
        .json(&json!({ "request": common::action_token_aged(1) }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let listed = server
        .app(Method::GET, "collection", "db=shop")
        .send()
        .await?
        .json::<Value>()
        .await?;
    assert_eq!(listed["data"]["data"], json!([]));
    Ok(())
}

#[tokio::test]
async fn missing_db_and_bad_names() -> Result<()> {
    let server = TestServer::start().await?;

    let res = server.app(Method::GET, "people", "").send().await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = server.app(Method::GET, "collection", "db=bad-tenant!").send().await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = server.app(Method::GET, "people", "db=shop").send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}
