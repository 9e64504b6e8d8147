//! End-to-end behaviour of a TypeHaus session on the in-process engine

use std::sync::Arc;
use typehaus::prelude::*;

fn app_config(caching: bool) -> AppConfig {
    AppConfig {
        database: DatabaseConfig::new(
            "localhost".to_string(),
            5432,
            "typehaus".to_string(),
            "postgres".to_string(),
            "password".to_string(),
            1,
            5,
            30,
            600,
            3600,
        ),
        cache: CacheConfig::default(),
        orm: OrmConfig::new(caching, LazyPolicy::Tolerate, true),
    }
}

fn blog() -> Registry {
    let mut registry = Registry::new();
    registry
        .define(
            EntityBuilder::new("person")
                .field(FieldDescriptor::string("name").required())
                .field(FieldDescriptor::boolean("active").default(true))
                .relationship("posts", Relationship::many_by("post", "author"))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .define(
            EntityBuilder::new("post")
                .field(FieldDescriptor::string("title").required())
                .field(FieldDescriptor::reference("author", "person").required())
                .fragment(timestamps())
                .fragment(slug("title"))
                .relationship("comments", Relationship::many_by("comment", "post"))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .define(
            EntityBuilder::new("comment")
                .field(FieldDescriptor::text("body").required())
                .field(FieldDescriptor::reference("post", "post").required())
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

async fn open(caching: bool) -> TypeHaus {
    let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::new());
    let typehaus = TypeHaus::open(engine, blog(), app_config(caching))
        .await
        .unwrap();

    let people = typehaus.table("person").unwrap();
    for name in ["Ada", "Grace", "Linus", "Ken", "Barbara", "Edsger"] {
        people.insert(record([("name", name)])).await.unwrap();
    }
    people
        .insert(record([("name", Value::from("Dennis")), ("active", Value::from(false))]))
        .await
        .unwrap();
    for n in 8..=12 {
        people
            .insert(record([("name", format!("Person {}", n))]))
            .await
            .unwrap();
    }

    let posts = typehaus.table("post").unwrap();
    posts
        .insert(record([("title", Value::from("Analytical Engines")), ("author", Value::from(1))]))
        .await
        .unwrap();
    posts
        .insert(record([("title", Value::from("Compilers")), ("author", Value::from(2))]))
        .await
        .unwrap();

    let comments = typehaus.table("comment").unwrap();
    for body in ["first", "second", "third"] {
        comments
            .insert(record([("body", Value::from(body)), ("post", Value::from(1))]))
            .await
            .unwrap();
    }
    typehaus
}

#[tokio::test]
async fn test_chained_where_is_a_conjunction() {
    let typehaus = open(false).await;
    let query = typehaus
        .query("person")
        .unwrap()
        .where_eq("id", 5)
        .where_eq("active", true);

    let sql = query.to_sql().unwrap();
    assert!(sql.contains(" AND "));
    assert!(!sql.contains(" OR "));
    assert_eq!(query.collect().await.unwrap().ids(), vec![5]);

    let inactive = typehaus
        .query("person")
        .unwrap()
        .where_eq("id", 7)
        .where_eq("active", true);
    assert!(inactive.collect().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_where_any_matches_either() {
    let typehaus = open(false).await;
    let rows = typehaus
        .query("person")
        .unwrap()
        .where_any([FieldRef::new("id").eq(5), FieldRef::new("id").eq(6)])
        .orderby(["id"])
        .collect()
        .await
        .unwrap();
    assert_eq!(rows.ids(), vec![5, 6]);
}

#[tokio::test]
async fn test_repeated_collects_are_equal() {
    let typehaus = open(false).await;
    let query = typehaus.query("person").unwrap().join(["posts"]);
    assert_eq!(
        query.collect().await.unwrap().as_json(),
        query.collect().await.unwrap().as_json()
    );
}

#[tokio::test]
async fn test_memoize_tracks_rows_read() {
    let typehaus = open(true).await;
    let dal = typehaus.dal().clone();

    let titles = |author: i64| {
        let dal = dal.clone();
        async move {
            let rows = dal
                .query("post")?
                .where_eq("author", author)
                .column("title")
                .await?;
            Ok::<Vec<String>, DalError>(
                rows.iter()
                    .filter_map(|title| title.as_str().map(str::to_string))
                    .collect(),
            )
        }
    };

    let (fresh, status) = memoize_named(typehaus.dal(), "titles", titles, 1, None).await.unwrap();
    assert_eq!(status, CacheStatus::Fresh);
    let (cached, status) = memoize_named(typehaus.dal(), "titles", titles, 1, None).await.unwrap();
    assert_eq!(status, CacheStatus::Cached);
    assert_eq!(fresh, cached);

    typehaus
        .query("post")
        .unwrap()
        .where_eq("id", 1)
        .update(record([("title", "Notes on the Engine")]))
        .await
        .unwrap();
    let (renamed, status) = memoize_named(typehaus.dal(), "titles", titles, 1, None).await.unwrap();
    assert_eq!(status, CacheStatus::Fresh);
    assert_eq!(renamed, vec!["Notes on the Engine".to_string()]);
}

#[tokio::test]
async fn test_paginate_over_twelve_rows() {
    let typehaus = open(false).await;
    let people = typehaus.query("person").unwrap().orderby(["id"]);

    let page = people.paginate(5, 2).await.unwrap();
    assert_eq!(page.rows.ids(), vec![6, 7, 8, 9, 10]);
    assert_eq!(page.pagination.next_page, Some(3));
    assert_eq!(page.pagination.prev_page, Some(1));

    let everything = people.paginate(0, 1).await.unwrap();
    assert_eq!(everything.rows.len(), 12);
}

#[tokio::test]
async fn test_restricted_cache_ignores_joined_rows() {
    let typehaus = open(true).await;
    let query = typehaus
        .query("person")
        .unwrap()
        .where_any([FieldRef::new("id").eq(1), FieldRef::new("id").eq(2)])
        .join(["posts"])
        .cache(["person.id"]);

    assert_eq!(query.collect().await.unwrap().cache_status(), CacheStatus::Fresh);

    typehaus
        .query("post")
        .unwrap()
        .where_eq("id", 1)
        .update(record([("title", "Revised")]))
        .await
        .unwrap();
    let stale = query.collect().await.unwrap();
    assert_eq!(stale.cache_status(), CacheStatus::Cached);
    assert_eq!(
        stale.get(1).unwrap().many("posts")[0].get::<String>("title").unwrap(),
        "Analytical Engines"
    );

    typehaus
        .query("person")
        .unwrap()
        .where_eq("id", 2)
        .update(record([("active", false)]))
        .await
        .unwrap();
    assert_eq!(query.collect().await.unwrap().cache_status(), CacheStatus::Fresh);
}

#[tokio::test]
async fn test_one_to_many_join_materializes_one_root() {
    let typehaus = open(false).await;
    let rows = typehaus
        .query("post")
        .unwrap()
        .where_eq("id", 1)
        .join(["comments"])
        .collect()
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    let bodies: Vec<String> = rows
        .first()
        .unwrap()
        .many("comments")
        .iter()
        .map(|comment| comment.get::<String>("body").unwrap())
        .collect();
    assert_eq!(bodies, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_missing_required_field_is_an_integrity_error() {
    let typehaus = open(false).await;
    let result = typehaus
        .table("post")
        .unwrap()
        .insert(record([("title", "Orphan")]))
        .await;
    assert!(matches!(result, Err(DalError::Integrity { .. })));
}

#[tokio::test]
async fn test_fragments_fill_their_fields() {
    let typehaus = open(false).await;
    let post = typehaus.table("post").unwrap().get_by_id(1).await.unwrap().unwrap();

    let slug = post.get::<String>("slug").unwrap();
    assert!(slug.starts_with("analytical-engines-"));
    assert!(post.value("created_at").is_some_and(|value| !value.is_null()));
}

#[tokio::test]
async fn test_migration_sql_lists_referenced_tables_first() {
    let typehaus = open(false).await;
    let statements = typehaus.migration_sql();
    assert_eq!(statements.len(), 3);
    assert!(statements[0].contains("\"person\""));
    assert!(statements[2].contains("\"comment\""));

    assert!(typehaus.migrate().await.unwrap().is_empty());
    assert!(matches!(
        typehaus.health_check().await,
        Err(TypeHausError::NoHealthCheck("memory"))
    ));
}
