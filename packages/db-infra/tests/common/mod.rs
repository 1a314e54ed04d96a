#![allow(dead_code)]

use db_infra::db::{ConnectionTarget, Dialect};
use db_test_support::{Cell, FakeCluster};

#[ctor::ctor]
fn init_logging() {
    db_test_support::logging::init();
}

pub const APP: &str = "app";
pub const IMPORT: &str = "metadatadb";

pub fn target(database: &str) -> ConnectionTarget {
    ConnectionTarget::new(Dialect::Postgres, "db.internal", 5432, "library", "s3cr@t/pw", database)
}

pub fn int(v: i64) -> Cell {
    Cell::Int(v)
}

pub fn text(v: &str) -> Cell {
    Cell::text(v)
}

/// Application database as it looks before consolidation: forum tables keyed
/// to `forum_users`, and a `users` table without the forum columns.
pub fn legacy_forum() -> FakeCluster {
    let cluster = FakeCluster::new();
    cluster.create_database(APP);
    cluster.create_table(APP, "users", &["id", "email", "name"]);
    cluster.create_table(APP, "forum_users", &["id", "email", "avatar", "email_verified_at"]);
    cluster.create_table(APP, "forum_threads", &["id", "user_id", "title"]);
    cluster.create_table(APP, "forum_comments", &["id", "user_id", "thread_id", "body"]);
    cluster.add_foreign_key(APP, "forum_threads", "forum_threads_user_id_fkey", "user_id", "forum_users", "id");
    cluster.add_foreign_key(APP, "forum_comments", "forum_comments_user_id_fkey", "user_id", "forum_users", "id");
    cluster.add_foreign_key(APP, "forum_comments", "forum_comments_thread_id_fkey", "thread_id", "forum_threads", "id");

    let users = [
        (1, "ada@example.org", "Ada"),
        (2, "grace@example.org", "Grace"),
        (3, "linus@example.org", "Linus"),
    ];
    for (id, email, name) in users {
        cluster
            .insert(APP, "users", &[("id", int(id)), ("email", text(email)), ("name", text(name))])
            .unwrap();
    }

    cluster
        .insert(
            APP,
            "forum_users",
            &[
                ("id", int(1)),
                ("email", text("ada@example.org")),
                ("avatar", text("ada.png")),
                ("email_verified_at", text("2024-01-02 10:00:00")),
            ],
        )
        .unwrap();
    cluster
        .insert(APP, "forum_users", &[("id", int(2)), ("email", text("grace@example.org"))])
        .unwrap();

    cluster
        .insert(APP, "forum_threads", &[("id", int(10)), ("user_id", int(1)), ("title", text("hello"))])
        .unwrap();
    cluster
        .insert(
            APP,
            "forum_comments",
            &[("id", int(100)), ("user_id", int(2)), ("thread_id", int(10)), ("body", text("hi"))],
        )
        .unwrap();
    cluster
}

/// Users row for `email`, panicking if absent.
pub fn user(cluster: &FakeCluster, email: &str) -> db_test_support::Row {
    cluster
        .rows(APP, "users")
        .into_iter()
        .find(|r| r.get("email") == Some(&text(email)))
        .unwrap_or_else(|| panic!("no user {email}"))
}
