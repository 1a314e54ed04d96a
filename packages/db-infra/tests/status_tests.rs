mod common;

use common::{int, legacy_forum, target, APP, IMPORT};
use db_infra::infra::db::inspect_status;
use db_infra::{Step, Verdict};
use migration::forum_consolidation;

#[tokio::test]
async fn status_reports_pending_work_without_touching_anything() {
    let cluster = legacy_forum();
    let plan = forum_consolidation().unwrap();

    let status = inspect_status(&cluster, &target(IMPORT), Some(&target(APP)), &plan)
        .await
        .unwrap();

    assert_eq!(status.import_verdict, Verdict::Empty { tables: 0 });
    let evolution = status.evolution.as_ref().unwrap();
    assert_eq!(evolution.pending(Step::AddColumn), 2);
    assert_eq!(evolution.pending(Step::RepointForeignKey), 2);
    assert!(status.has_pending_work());
    assert!(cluster.applied().is_empty());
    assert!(!cluster.has_database(IMPORT));
    assert_eq!(cluster.sessions_opened(), cluster.sessions_closed());
}

#[tokio::test]
async fn status_without_an_application_database_only_checks_the_import() {
    let cluster = legacy_forum();
    cluster.create_database(IMPORT);
    cluster.create_table(IMPORT, "books", &["id"]);
    cluster.insert(IMPORT, "books", &[("id", int(1))]).unwrap();
    let plan = forum_consolidation().unwrap();

    let status = inspect_status(&cluster, &target(IMPORT), None, &plan)
        .await
        .unwrap();

    assert!(status.evolution.is_none());
    assert!(matches!(status.import_verdict, Verdict::NonEmpty { .. }));
    assert!(!status.has_pending_work());
}
