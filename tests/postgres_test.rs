//! Integration tests against a live PostgreSQL server
//!
//! Run with `DATABASE_URL` set and `--ignored`.

use std::sync::Arc;
use typehaus::prelude::*;

async fn setup_engine() -> Arc<PgEngine> {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for integration tests");

    let pool = sqlx::PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to database");
    for table in ["pg_test_comment", "pg_test_post", "typehaus_cache_dependency", "typehaus_cache"] {
        let _ = sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", table))
            .execute(&pool)
            .await;
    }
    Arc::new(PgEngine::new(pool))
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .define(
            EntityBuilder::new("pg_test_post")
                .field(FieldDescriptor::string("title").required())
                .field(FieldDescriptor::json("meta"))
                .field(FieldDescriptor::list_of_string("tags"))
                .relationship("comments", Relationship::many_by("pg_test_comment", "post"))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .define(
            EntityBuilder::new("pg_test_comment")
                .field(FieldDescriptor::text("body").required())
                .field(FieldDescriptor::reference("post", "pg_test_post").required())
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

async fn open() -> TypeHaus {
    let engine = setup_engine().await;
    let mut config = AppConfig::from_toml_str(
        r#"
        [database]
        host = "localhost"
        port = 5432
        database = "typehaus"
        username = "postgres"
        password = "password"
        min_connections = 1
        max_connections = 5
        connection_timeout_seconds = 30
        idle_timeout_seconds = 600
        max_lifetime_seconds = 3600
        "#,
    )
    .expect("valid config");
    config.orm.caching = true;
    TypeHaus::open(engine, registry(), config)
        .await
        .expect("Failed to open session")
}

#[tokio::test]
#[ignore]
async fn test_join_and_materialize_on_postgres() {
    let typehaus = open().await;
    let post = typehaus
        .table("pg_test_post")
        .unwrap()
        .create(record([
            ("title", Value::from("Postgres")),
            ("meta", Value::Json(serde_json::json!({"draft": false}))),
            ("tags", Value::from(vec!["db".to_string(), "sql".to_string()])),
        ]))
        .await
        .unwrap();
    let post_id = post.id().unwrap();

    let comments = typehaus.table("pg_test_comment").unwrap();
    for body in ["one", "two"] {
        comments
            .insert(record([("body", Value::from(body)), ("post", Value::from(post_id))]))
            .await
            .unwrap();
    }

    let rows = typehaus
        .query("pg_test_post")
        .unwrap()
        .join(["comments"])
        .collect()
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.first().unwrap().many("comments").len(), 2);
    assert_eq!(
        rows.first().unwrap().get::<Vec<String>>("tags").unwrap(),
        vec!["db".to_string(), "sql".to_string()]
    );
}

#[tokio::test]
#[ignore]
async fn test_cache_invalidation_on_postgres() {
    let typehaus = open().await;
    let posts = typehaus.table("pg_test_post").unwrap();
    let id = posts.insert(record([("title", "Cached")])).await.unwrap();

    let query = typehaus
        .query("pg_test_post")
        .unwrap()
        .where_eq("id", id)
        .cache(["id"]);
    assert_eq!(query.collect().await.unwrap().cache_status(), CacheStatus::Fresh);
    assert_eq!(query.collect().await.unwrap().cache_status(), CacheStatus::Cached);

    query.update(record([("title", "Changed")])).await.unwrap();
    assert_eq!(query.collect().await.unwrap().cache_status(), CacheStatus::Fresh);
}
