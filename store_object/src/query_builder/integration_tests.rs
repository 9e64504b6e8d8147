//! Builder terminals executed against the in-memory engine

use super::tests::registry;
use crate::cache::open_store;
use crate::dal::{Dal, DalOptions};
use crate::engine::{Engine, MemoryEngine};
use crate::entity::Related;
use crate::errors::DalError;
use crate::query_builder::aggregation::SelectField;
use crate::cache::testing::read_only_cache;
use crate::query_builder::builder::{CacheOptions, JoinOptions, SelectOptions};
use crate::query_builder::field::{FieldRef, TableRef};
use crate::query_builder::join::JoinType;
use crate::record;
use crate::schema::relationship::Relationship;
use cache_system::{CacheConfig, CacheStatus};
use config::LazyPolicy;
use futures::TryStreamExt;
use signal_system::{EventPhase, EventType, SignalManager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use type_mapping::Value;

async fn open(options: DalOptions) -> Arc<Dal> {
    let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::new());
    open_on(engine, options).await
}

async fn open_on(engine: Arc<dyn Engine>, options: DalOptions) -> Arc<Dal> {
    let options = DalOptions {
        migrate: true,
        ..options
    };
    let dal = Dal::open(engine, registry(), Arc::new(SignalManager::new()), options)
        .await
        .unwrap();
    seed(&dal).await;
    dal
}

async fn cached_session() -> Arc<Dal> {
    let engine: Arc<dyn Engine> = Arc::new(MemoryEngine::new());
    let cache = open_store(&CacheConfig::default(), engine.clone(), true)
        .await
        .unwrap();
    open_on(engine, DalOptions::default().with_cache(cache)).await
}

/// Ada (1) wrote posts 1 and 2, Linus (3) wrote post 3; post 1 has three comments
async fn seed(dal: &Arc<Dal>) {
    let person = dal.table("person").unwrap();
    person.insert(record([("name", "Ada")])).await.unwrap();
    person.insert(record([("name", "Grace")])).await.unwrap();
    person
        .insert(record([("name", Value::from("Linus")), ("active", Value::from(false))]))
        .await
        .unwrap();

    let post = dal.table("post").unwrap();
    for (title, author, editor) in [("Engines", 1, None), ("Compilers", 1, Some(2)), ("Kernels", 3, None)] {
        post.insert(record([
            ("title", Value::from(title)),
            ("author", Value::from(author)),
            ("editor", editor.map_or(Value::Null, Value::from)),
        ]))
        .await
        .unwrap();
    }

    let comment = dal.table("comment").unwrap();
    for body in ["first", "second", "third"] {
        comment
            .insert(record([("body", Value::from(body)), ("post", Value::from(1))]))
            .await
            .unwrap();
    }

    let role = dal.table("role").unwrap();
    for n in 1..=12 {
        role.insert(record([("name", format!("role {:02}", n))]))
            .await
            .unwrap();
    }
}

// ========================================
// Materialization
// ========================================

#[tokio::test]
async fn test_fan_out_materializes_one_root() {
    let dal = open(DalOptions::default()).await;
    let rows = dal
        .query("post")
        .unwrap()
        .where_eq("id", 1)
        .join(["comments"])
        .collect()
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    let post = rows.first().unwrap();
    let bodies: Vec<String> = post
        .many("comments")
        .iter()
        .map(|comment| comment.get::<String>("body").unwrap())
        .collect();
    assert_eq!(bodies, vec!["first", "second", "third"]);
    assert_eq!(rows.metadata().joined, vec!["comments".to_string()]);
}

#[tokio::test]
async fn test_left_join_without_match_is_empty() {
    let dal = open(DalOptions::default()).await;
    let rows = dal
        .query("person")
        .unwrap()
        .join(["posts"])
        .orderby(["name"])
        .collect()
        .await
        .unwrap();

    assert_eq!(rows.ids(), vec![1, 2, 3]);
    assert_eq!(rows.get(1).unwrap().many("posts").len(), 2);
    assert!(rows.get(2).unwrap().many("posts").is_empty());
    assert!(rows.get(2).unwrap().joined("posts").is_some());

    let posts = dal.query("post").unwrap().join(["editor"]).collect().await.unwrap();
    assert!(posts.get(1).unwrap().one("editor").is_none());
    assert_eq!(
        posts.get(2).unwrap().one("editor").unwrap().get::<String>("name").unwrap(),
        "Grace"
    );
}

#[tokio::test]
async fn test_limits_count_roots_not_rows() {
    let dal = open(DalOptions::default()).await;
    let rows = dal
        .query("person")
        .unwrap()
        .join(["posts"])
        .orderby(["name"])
        .limitby(1, 0)
        .collect()
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.first().unwrap().many("posts").len(), 2);

    let second = dal
        .query("person")
        .unwrap()
        .join(["posts"])
        .orderby(["name"])
        .limitby(1, 1)
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.get::<String>("name").unwrap(), "Grace");
}

#[tokio::test]
async fn test_adhoc_join_uses_the_given_relationship() {
    let dal = open(DalOptions::default()).await;
    let edited_by = |person: &TableRef, post: &TableRef| post.field("editor").eq_field(&person.id());

    let rows = dal
        .query("person")
        .unwrap()
        .orderby(["id"])
        .join_relationship(Relationship::many("post", edited_by))
        .collect()
        .await
        .unwrap();
    assert_eq!(rows.ids(), vec![1, 2, 3]);
    assert!(rows.get(1).unwrap().many("post").is_empty());
    let titles: Vec<String> = rows
        .get(2)
        .unwrap()
        .many("post")
        .iter()
        .map(|post| post.get::<String>("title").unwrap())
        .collect();
    assert_eq!(titles, vec!["Compilers"]);

    let editors = dal
        .query("person")
        .unwrap()
        .join_relationship_with(
            "edited",
            Relationship::many("post", edited_by),
            JoinOptions::method(JoinType::Inner),
        )
        .collect()
        .await
        .unwrap();
    assert_eq!(editors.ids(), vec![2]);
    assert_eq!(editors.first().unwrap().many("edited").len(), 1);
}

#[tokio::test]
async fn test_junction_relationship_loads_targets() {
    let dal = open(DalOptions::default()).await;
    let person_role = dal.table("person_role").unwrap();
    for role in [3, 5] {
        person_role
            .insert(record([("person", 1), ("role", role)]))
            .await
            .unwrap();
    }

    let ada = dal
        .query("person")
        .unwrap()
        .where_eq("id", 1)
        .join(["roles"])
        .first_or_fail()
        .await
        .unwrap();
    let roles: Vec<i64> = ada.many("roles").iter().filter_map(|role| role.id()).collect();
    assert_eq!(roles, vec![3, 5]);
    assert!(ada.many("roles").iter().all(|role| role.table() == "role"));
}

#[tokio::test]
async fn test_repeated_collects_are_equal() {
    let dal = open(DalOptions::default()).await;
    let query = dal.query("post").unwrap().join(["author", "comments"]);
    let first = query.collect().await.unwrap();
    let second = query.collect().await.unwrap();
    assert_eq!(first.as_json(), second.as_json());
    assert_eq!(first.metadata().sql, second.metadata().sql);
}

// ========================================
// Counting and single results
// ========================================

#[tokio::test]
async fn test_count_and_exists() {
    let dal = open(DalOptions::default()).await;
    assert_eq!(dal.query("post").unwrap().count().await.unwrap(), 3);
    assert_eq!(
        dal.query("person").unwrap().join(["posts"]).count().await.unwrap(),
        3
    );
    assert_eq!(
        dal.query("post").unwrap().limitby(1, 0).count().await.unwrap(),
        3
    );

    let grouped = dal
        .query("post")
        .unwrap()
        .select([SelectField::field("author"), FieldRef::new("id").count().into()])
        .groupby(["author"]);
    assert_eq!(grouped.count().await.unwrap(), 2);

    assert!(dal.query("post").unwrap().where_eq("author", 3).exists().await.unwrap());
    assert!(!dal.query("post").unwrap().where_eq("author", 2).exists().await.unwrap());
}

#[tokio::test]
async fn test_empty_results_and_not_found() {
    let dal = open(DalOptions::default()).await;
    let nobody = dal.query("person").unwrap().where_eq("name", "Nobody");

    assert!(nobody.collect().await.unwrap().is_empty());
    assert!(nobody.first().await.unwrap().is_none());
    assert!(nobody.first_or_fail().await.unwrap_err().is_not_found());
    assert!(nobody.collect_or_fail().await.unwrap_err().is_not_found());
    assert!(dal.table("person").unwrap().get_by_id(99).await.unwrap().is_none());
}

#[tokio::test]
async fn test_aggregate_rows_keep_their_keys() {
    let dal = open(DalOptions::default()).await;
    let rows = dal
        .query("post")
        .unwrap()
        .select_with(
            [
                SelectField::field("author"),
                SelectField::aggregate(FieldRef::new("id").count()).with_alias("posts"),
            ],
            SelectOptions {
                groupby: vec![FieldRef::new("author")],
                orderby: vec![FieldRef::new("author").asc()],
                ..SelectOptions::default()
            },
        )
        .collect()
        .await
        .unwrap();

    let counts: Vec<(i64, i64)> = rows
        .iter()
        .map(|row| (row.get::<i64>("author").unwrap(), row.get::<i64>("posts").unwrap()))
        .collect();
    assert_eq!(counts, vec![(1, 2), (3, 1)]);
}

// ========================================
// Pagination and streaming
// ========================================

#[tokio::test]
async fn test_paginate() {
    let dal = open(DalOptions::default()).await;
    let roles = dal.query("role").unwrap().orderby(["id"]);

    let page = roles.paginate(5, 2).await.unwrap();
    assert_eq!(page.rows.ids(), vec![6, 7, 8, 9, 10]);
    assert!(page.pagination.has_next_page);
    assert!(page.pagination.has_prev_page);
    assert_eq!(page.total().await.unwrap(), 12);

    let last = page.next().await.unwrap().unwrap();
    assert_eq!(last.rows.ids(), vec![11, 12]);
    assert!(!last.pagination.has_next_page);
    assert!(last.next().await.unwrap().is_none());

    let first = page.previous().await.unwrap().unwrap();
    assert_eq!(first.rows.ids(), vec![1, 2, 3, 4, 5]);
    assert!(first.previous().await.unwrap().is_none());

    let everything = roles.paginate(0, 1).await.unwrap();
    assert_eq!(everything.rows.len(), 12);
    assert!(!everything.pagination.has_next_page);
    assert_eq!(everything.as_json()["pagination"]["current_page"], 1);
}

#[tokio::test]
async fn test_paginate_far_past_the_end() {
    let dal = open(DalOptions::default()).await;
    let roles = dal.query("role").unwrap().orderby(["id"]);

    let page = roles.paginate(u64::MAX, u64::MAX).await.unwrap();
    assert!(page.rows.is_empty());
    assert!(!page.pagination.has_next_page);

    let page = roles.paginate(5, u64::MAX).await.unwrap();
    assert!(page.rows.is_empty());
    assert_eq!(page.pagination.prev_page, Some(u64::MAX - 1));

    let sql = roles.clone().limitby(u64::MAX, u64::MAX).to_sql().unwrap();
    assert!(sql.ends_with("LIMIT 9223372036854775807 OFFSET 9223372036854775807"));
}

#[tokio::test]
async fn test_rows_as_csv() {
    let dal = open(DalOptions::default()).await;
    let posts = dal
        .query("post")
        .unwrap()
        .where_eq("author", 1)
        .orderby(["id"])
        .collect()
        .await
        .unwrap();
    assert_eq!(
        posts.as_csv().unwrap(),
        "post.id,post.title,post.author,post.editor,post.views\n\
         1,Engines,1,<NULL>,0\n\
         2,Compilers,1,2,0\n"
    );

    dal.table("role")
        .unwrap()
        .insert(record([("name", "reader, \"guest\"")]))
        .await
        .unwrap();
    let roles = dal.query("role").unwrap().where_eq("id", 13).collect().await.unwrap();
    assert_eq!(roles.as_csv().unwrap(), "role.id,role.name\n13,\"reader, \"\"guest\"\"\"\n");

    let none = dal.query("role").unwrap().where_eq("id", 99).collect().await.unwrap();
    assert_eq!(none.as_csv().unwrap(), "");
}

#[tokio::test]
async fn test_chunk_streams_every_row() {
    let dal = open(DalOptions::default()).await;
    let chunks: Vec<_> = dal
        .query("role")
        .unwrap()
        .orderby(["id"])
        .chunk(5)
        .try_collect()
        .await
        .unwrap();
    let sizes: Vec<usize> = chunks.iter().map(|chunk| chunk.len()).collect();
    assert_eq!(sizes, vec![5, 5, 2]);
    assert_eq!(chunks[2].ids(), vec![11, 12]);
}

#[tokio::test]
async fn test_column_values() {
    let dal = open(DalOptions::default()).await;
    let names = dal
        .query("person")
        .unwrap()
        .orderby([FieldRef::new("name").desc()])
        .column("name")
        .await
        .unwrap();
    assert_eq!(
        names,
        vec![Value::from("Linus"), Value::from("Grace"), Value::from("Ada")]
    );
}

// ========================================
// Writes
// ========================================

#[tokio::test]
async fn test_builder_update_and_delete() {
    let dal = open(DalOptions::default()).await;
    let ada_posts = dal.query("post").unwrap().where_eq("author", 1);

    let updated = ada_posts.update(record([("views", 10)])).await.unwrap();
    assert_eq!(updated, vec![1, 2]);
    let views = dal.query("post").unwrap().orderby(["id"]).column("views").await.unwrap();
    assert_eq!(views, vec![Value::from(10), Value::from(10), Value::from(0)]);

    assert!(matches!(
        ada_posts.update(record([("id", 7)])).await,
        Err(DalError::Query(_))
    ));
    assert!(matches!(
        ada_posts.update(record([("title", Value::Null)])).await,
        Err(DalError::Integrity { .. })
    ));

    let deleted = dal
        .query("comment")
        .unwrap()
        .where_eq("post", 1)
        .delete()
        .await
        .unwrap();
    assert_eq!(deleted, vec![1, 2, 3]);
    assert_eq!(dal.query("comment").unwrap().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_grouped_queries_cannot_write() {
    let dal = open(DalOptions::default()).await;
    let grouped = dal
        .query("post")
        .unwrap()
        .select([SelectField::field("author")])
        .groupby(["author"]);
    assert!(matches!(grouped.delete().await, Err(DalError::Query(_))));
}

#[tokio::test]
async fn test_insert_validation() {
    let dal = open(DalOptions::default()).await;
    let person = dal.table("person").unwrap();

    assert!(matches!(
        person.insert(record([("active", true)])).await,
        Err(DalError::Integrity { .. })
    ));
    assert!(matches!(
        person.insert(record([("name", "Ken"), ("nickname", "k")])).await,
        Err(DalError::UnknownField { .. })
    ));

    let ken = person.create(record([("name", "Ken")])).await.unwrap();
    assert_eq!(ken.id(), Some(4));
    assert!(ken.get::<bool>("active").unwrap());
}

#[tokio::test]
async fn test_record_level_writes() {
    let dal = open(DalOptions::default()).await;
    let mut grace = dal.table("person").unwrap().get_by_id(2).await.unwrap().unwrap();
    grace.update_record(record([("name", "Grace Hopper")])).await.unwrap();
    assert_eq!(grace.get::<String>("name").unwrap(), "Grace Hopper");

    assert!(grace.delete_record().await.unwrap());
    assert!(dal.table("person").unwrap().get_by_id(2).await.unwrap().is_none());
}

#[tokio::test]
async fn test_bulk_insert_loads_the_new_rows() {
    let dal = open(DalOptions::default()).await;
    let roles = dal.table("role").unwrap();
    let added = roles
        .bulk_insert(vec![record([("name", "auditor")]), record([("name", "owner")])])
        .await
        .unwrap();
    assert_eq!(added.ids(), vec![13, 14]);
    assert_eq!(added.column("name"), vec![Value::from("auditor"), Value::from("owner")]);
    assert!(roles.bulk_insert(Vec::new()).await.unwrap().is_empty());

    // The second row fails validation, so neither is written
    let invalid = dal
        .table("post")
        .unwrap()
        .bulk_insert(vec![
            record([("title", Value::from("Drafts")), ("author", Value::from(1))]),
            record([("title", "Anonymous")]),
        ])
        .await;
    assert!(matches!(invalid, Err(DalError::Integrity { .. })));
    assert_eq!(dal.query("post").unwrap().count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_update_or_insert() {
    let dal = open(DalOptions::default()).await;
    let people = dal.table("person").unwrap();

    let ada = people
        .update_or_insert(vec![("name", "Ada")], record([("active", false)]))
        .await
        .unwrap();
    assert_eq!(ada.id(), Some(1));
    assert!(!ada.get::<bool>("active").unwrap());

    let barbara = people
        .update_or_insert(record([("name", "Barbara")]), record([("name", "Barbara")]))
        .await
        .unwrap();
    assert_eq!(barbara.id(), Some(4));
    assert!(barbara.get::<bool>("active").unwrap());

    let again = people
        .update_or_insert(record([("name", "Barbara")]), record([("name", "Barbara")]))
        .await
        .unwrap();
    assert_eq!(again.id(), Some(4));
    assert_eq!(people.query().count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_write_events_carry_ids() {
    let dal = open(DalOptions::default()).await;
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    dal.signals().on("post", EventType::Update, EventPhase::After, move |event| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(event.record_ids.len(), Ordering::SeqCst);
            Ok::<(), anyhow::Error>(())
        }
    });

    dal.query("post")
        .unwrap()
        .where_eq("author", 1)
        .update(record([("views", 1)]))
        .await
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failing_before_hook_aborts_the_write() {
    let dal = open(DalOptions::default()).await;
    dal.signals().on("post", EventType::Delete, EventPhase::Before, |_| async {
        Err::<(), _>(anyhow::anyhow!("posts are permanent"))
    });

    let result = dal.query("post").unwrap().where_eq("id", 1).delete().await;
    assert!(matches!(result, Err(DalError::Hook(_))));
    assert_eq!(dal.query("post").unwrap().count().await.unwrap(), 3);
}

// ========================================
// Lazy relationships
// ========================================

#[tokio::test]
async fn test_lazy_policies() {
    let tolerant = open(DalOptions::default()).await;
    let ada = tolerant.table("person").unwrap().get_by_id(1).await.unwrap().unwrap();
    assert!(ada.joined("posts").is_none());
    match ada.related("posts").await.unwrap() {
        Related::Many(posts) => assert_eq!(posts.len(), 2),
        other => panic!("expected a list, got {:?}", other),
    }

    let forbidding = open(DalOptions {
        lazy_policy: LazyPolicy::Forbid,
        ..DalOptions::default()
    })
    .await;
    let ada = forbidding.table("person").unwrap().get_by_id(1).await.unwrap().unwrap();
    assert!(matches!(
        ada.related("posts").await,
        Err(DalError::LazyAccess { .. })
    ));

    let warning = open(DalOptions {
        lazy_policy: LazyPolicy::Warn,
        ..DalOptions::default()
    })
    .await;
    let post = warning.table("post").unwrap().get_by_id(1).await.unwrap().unwrap();
    assert!(post.related("author").await.unwrap().is_empty());

    let joined = warning
        .query("post")
        .unwrap()
        .where_eq("id", 1)
        .join(["author"])
        .first_or_fail()
        .await
        .unwrap();
    assert!(!joined.related("author").await.unwrap().is_empty());
}

// ========================================
// Result containers
// ========================================

#[tokio::test]
async fn test_typed_rows_helpers() {
    let dal = open(DalOptions::default()).await;
    let mut posts = dal
        .query("post")
        .unwrap()
        .join(["author"])
        .collect()
        .await
        .unwrap();

    assert_eq!(posts.get_index(2).and_then(|post| post.id()), Some(3));
    assert_eq!(posts.find(|post| post.get::<i64>("author").unwrap() == 1).len(), 2);

    let groups = posts.group_by_value("author");
    let sizes: Vec<(Value, usize)> = groups
        .iter()
        .map(|(author, members)| (author.clone(), members.len()))
        .collect();
    assert_eq!(sizes, vec![(Value::from(1), 2), (Value::from(3), 1)]);

    let dependencies: Vec<(String, i64)> = posts
        .dependencies()
        .into_iter()
        .map(|dependency| (dependency.table, dependency.id))
        .collect();
    assert_eq!(
        dependencies,
        vec![
            ("person".to_string(), 1),
            ("person".to_string(), 3),
            ("post".to_string(), 1),
            ("post".to_string(), 2),
            ("post".to_string(), 3),
        ]
    );

    let removed = posts.exclude(|post| post.get::<i64>("author").unwrap() == 3);
    assert_eq!(removed.len(), 1);
    assert!(posts.get(3).is_none());

    let posts = posts.sort_by(|a, b| b.id().cmp(&a.id()));
    assert_eq!(posts.ids(), vec![2, 1]);
    assert_eq!(posts.as_json()[0]["author"], serde_json::json!({"id": 1, "name": "Ada", "active": true}));

    posts.update(record([("views", 5)])).await.unwrap();
    let views = dal.query("post").unwrap().where_eq("views", 5).count().await.unwrap();
    assert_eq!(views, 2);
}

// ========================================
// Caching
// ========================================

#[tokio::test]
async fn test_cached_query_is_invalidated_by_writes() {
    let dal = cached_session().await;
    let query = dal
        .query("post")
        .unwrap()
        .where_eq("author", 1)
        .join(["author"])
        .cache(Vec::<&str>::new());

    let fresh = query.collect().await.unwrap();
    assert_eq!(fresh.cache_status(), CacheStatus::Fresh);
    let cached = query.collect().await.unwrap();
    assert_eq!(cached.cache_status(), CacheStatus::Cached);
    assert_eq!(fresh.as_json(), cached.as_json());
    assert_eq!(fresh.metadata().cache_key, cached.metadata().cache_key);

    // The joined author is a dependency too
    dal.query("person")
        .unwrap()
        .where_eq("id", 1)
        .update(record([("name", "Ada Lovelace")]))
        .await
        .unwrap();
    let refreshed = query.collect().await.unwrap();
    assert_eq!(refreshed.cache_status(), CacheStatus::Fresh);
    assert_eq!(
        refreshed.first().unwrap().one("author").unwrap().get::<String>("name").unwrap(),
        "Ada Lovelace"
    );
}

#[tokio::test]
async fn test_restricted_dependencies_ignore_joined_rows() {
    let dal = cached_session().await;
    let query = dal
        .query("post")
        .unwrap()
        .join(["author"])
        .cache(["id"]);

    assert_eq!(query.collect().await.unwrap().cache_status(), CacheStatus::Fresh);

    dal.table("person")
        .unwrap()
        .query()
        .where_eq("id", 1)
        .update(record([("name", "Countess")]))
        .await
        .unwrap();
    assert_eq!(query.collect().await.unwrap().cache_status(), CacheStatus::Cached);

    dal.query("post")
        .unwrap()
        .where_eq("id", 3)
        .update(record([("views", 9)]))
        .await
        .unwrap();
    assert_eq!(query.collect().await.unwrap().cache_status(), CacheStatus::Fresh);
}

#[tokio::test]
async fn test_cached_aggregate_depends_on_grouped_rows() {
    let dal = cached_session().await;
    let query = dal
        .query("post")
        .unwrap()
        .select([SelectField::field("author"), FieldRef::new("id").count().into()])
        .groupby(["author"])
        .cache(Vec::<&str>::new());

    assert_eq!(query.collect().await.unwrap().cache_status(), CacheStatus::Fresh);
    assert_eq!(query.collect().await.unwrap().cache_status(), CacheStatus::Cached);

    dal.query("post").unwrap().where_eq("id", 2).delete().await.unwrap();
    let rows = query.collect().await.unwrap();
    assert_eq!(rows.cache_status(), CacheStatus::Fresh);
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_cached_query_expires_after_its_ttl() {
    let dal = cached_session().await;
    let query = dal
        .query("post")
        .unwrap()
        .where_eq("author", 1)
        .orderby(["id"])
        .cache_with(CacheOptions::new().seconds(1));

    assert_eq!(query.collect().await.unwrap().cache_status(), CacheStatus::Fresh);
    assert_eq!(query.collect().await.unwrap().cache_status(), CacheStatus::Cached);

    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    let rows = query.collect().await.unwrap();
    assert_eq!(rows.cache_status(), CacheStatus::Fresh);
    assert_eq!(rows.ids(), vec![1, 2]);

    let kept = dal
        .query("post")
        .unwrap()
        .cache_with(CacheOptions::new().seconds(3600));
    kept.collect().await.unwrap();
    assert_eq!(kept.collect().await.unwrap().cache_status(), CacheStatus::Cached);
}

#[tokio::test]
async fn test_failed_cache_write_still_returns_rows() {
    let (store, cache) = read_only_cache();
    let dal = open_on(Arc::new(MemoryEngine::new()), DalOptions::default().with_cache(cache)).await;
    let query = dal
        .query("post")
        .unwrap()
        .where_eq("author", 1)
        .orderby(["id"])
        .cache(["id"]);

    for _ in 0..2 {
        let rows = query.collect().await.unwrap();
        assert_eq!(rows.cache_status(), CacheStatus::Fresh);
        assert_eq!(rows.ids(), vec![1, 2]);
    }
    assert_eq!(store.failed_saves(), 2);
}

#[tokio::test]
async fn test_cache_maintenance() {
    let dal = cached_session().await;
    dal.query("post").unwrap().cache(["id"]).collect().await.unwrap();
    dal.query("person").unwrap().cache(["id"]).collect().await.unwrap();

    let stats = dal.cache_stats().await.unwrap();
    assert_eq!(stats.entries.total, 2);
    assert_eq!(stats.tables["post"].valid, 1);

    assert_eq!(dal.clear_table_cache("post").await.unwrap(), 1);
    assert_eq!(dal.clear_cache().await.unwrap(), 1);

    let uncached = open(DalOptions::default()).await;
    assert!(matches!(
        uncached.cache_stats().await,
        Err(DalError::Cache(cache_system::CacheError::Disabled))
    ));
    let rows = uncached.query("post").unwrap().cache(["id"]).collect().await.unwrap();
    assert_eq!(rows.cache_status(), CacheStatus::Fresh);
    assert_eq!(rows.metadata().cache_key, None);
}
