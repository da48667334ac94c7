mod common;

use pretty_assertions::assert_eq;
use rstest::{fixture, rstest};
use std::io::Write;
use tokio_util::sync::CancellationToken;

use schema_compare::schema::types::{Dialect, ObjectCategory, ObjectKey};
use schema_compare::{
    config, crawl_with, Config, DiffState, Error, SchemaCompareClient, SchemaModel, ScriptDirection,
    TaskInfo, TaskStatus,
};

use common::{shop, MemoryCrawler};

const PROJECT: &str = r#"
[source]
dialect = "postgresql"
hostname = "localhost"
database = "shop"
username = "postgres"
password = "secret"

[target]
dialect = "postgres"
hostname = "staging"
database = "shop"

[options]
use_schema_name = true

[output]
directory = "out"
direction = "target-to-source"
"#;

#[fixture]
fn project() -> Config {
    config::load_from_str(PROJECT).unwrap()
}

#[rstest]
fn project_file_loads_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(PROJECT.as_bytes()).unwrap();

    let config = config::load_from_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.source.dialect, Dialect::PostgreSql);
    assert_eq!(config.target.port, Some(5432));
    assert!(config.options.use_schema_name);
    let output = config.output.unwrap();
    assert_eq!(output.direction, ScriptDirection::TargetToSource);
    assert!(!output.summary_json);
}

#[test]
fn missing_project_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(matches!(
        config::load_from_file(path.to_str().unwrap()),
        Err(Error::ConfigError(_))
    ));
}

#[rstest]
#[tokio::test]
async fn session_crawls_compares_and_scripts(project: Config) {
    let mut target = shop();
    target.tables.remove(&ObjectKey::new("public", "orders"));

    let client = SchemaCompareClient::new(project);
    let result = client
        .run_with(&MemoryCrawler::new(shop()), &MemoryCrawler::new(target))
        .await
        .unwrap();

    let orders = result.tables.iter().find(|i| i.key.name == "orders").unwrap();
    assert_eq!(orders.state, DiffState::Added);
    assert!(result
        .full_script(ScriptDirection::SourceToTarget)
        .unwrap()
        .contains("CREATE TABLE \"public\".\"orders\""));
    assert!(result
        .full_script(ScriptDirection::TargetToSource)
        .unwrap()
        .contains("DROP TABLE \"public\".\"orders\";"));

    let snapshot = client.snapshot();
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.percentage, 100.0);
    let children: Vec<_> = snapshot.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(children, vec!["source", "target", "compare", "script"]);
}

#[rstest]
#[tokio::test]
async fn cancelled_session_reports_cancelled(project: Config) {
    let client = SchemaCompareClient::new(project);
    client.cancel();

    let outcome = client
        .run_with(&MemoryCrawler::new(shop()), &MemoryCrawler::new(shop()))
        .await;
    assert!(matches!(outcome, Err(Error::Cancelled)));

    let snapshot = client.snapshot();
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    assert!(snapshot.children.iter().all(|c| c.status == TaskStatus::Cancelled));
}

#[tokio::test]
async fn cancelling_a_crawl_yields_no_model() {
    let task = TaskInfo::new("crawl");
    let cancel = task.cancellation_token();
    let crawler = MemoryCrawler::new(shop()).cancelling_on(ObjectCategory::Table);

    let outcome = crawl_with(&crawler, &task, &cancel).await;
    assert!(matches!(outcome, Err(Error::Cancelled)));
    assert_eq!(task.status(), TaskStatus::Cancelled);

    let statuses: Vec<_> = task
        .children()
        .iter()
        .map(|c| (c.name().to_string(), c.status()))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("sequences".to_string(), TaskStatus::Completed),
            ("tables".to_string(), TaskStatus::Cancelled),
            ("views".to_string(), TaskStatus::Cancelled),
            ("functions".to_string(), TaskStatus::Cancelled),
            ("procedures".to_string(), TaskStatus::Cancelled),
        ]
    );
}

#[tokio::test]
async fn failing_category_faults_but_siblings_finish() {
    let task = TaskInfo::new("crawl");
    let crawler = MemoryCrawler::new(shop()).failing_on(ObjectCategory::View);

    let outcome = crawl_with(&crawler, &task, &CancellationToken::new()).await;
    match outcome {
        Err(Error::CrawlError(message)) => assert!(message.contains("views")),
        other => panic!("expected a crawl error, got {:?}", other.map(|m| m.object_count())),
    }
    assert_eq!(task.status(), TaskStatus::Faulted);

    let statuses: Vec<_> = task.children().iter().map(|c| c.status()).collect();
    assert_eq!(
        statuses,
        vec![
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Faulted,
            TaskStatus::Completed,
            TaskStatus::Completed,
        ]
    );
}

#[tokio::test]
async fn crawl_round_trips_the_snapshot() {
    let task = TaskInfo::new("crawl");
    let model = crawl_with(&MemoryCrawler::new(shop()), &task, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(model.object_count(), shop().object_count());
    assert_eq!(model.dialect, Dialect::PostgreSql);
    assert_eq!(task.percentage(), 100.0);
}

#[rstest]
#[tokio::test]
async fn failing_side_faults_the_session(project: Config) {
    let mut events = {
        let client = SchemaCompareClient::new(project.clone());
        let events = client.subscribe();
        let outcome = client
            .run_with(
                &MemoryCrawler::new(shop()),
                &MemoryCrawler::new(SchemaModel::new(Dialect::PostgreSql, "shop"))
                    .failing_on(ObjectCategory::Table),
            )
            .await;
        assert!(matches!(outcome, Err(Error::CrawlError(_))));

        let snapshot = client.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Faulted);
        assert!(snapshot.children.iter().all(|c| c.status != TaskStatus::Running));
        events
    };

    let mut saw_fault = false;
    while let Ok(event) = events.try_recv() {
        if let schema_compare::task::TaskEventKind::Status(TaskStatus::Faulted) = event.kind {
            saw_fault = true;
        }
    }
    assert!(saw_fault);
}

#[test]
fn parent_percentage_is_the_mean_of_children() {
    let root = TaskInfo::new("root");
    root.start().unwrap();
    let a = root.add_child("a").unwrap();
    let b = root.add_child("b").unwrap();
    a.start().unwrap();
    b.start().unwrap();

    a.set_percentage(100.0).unwrap();
    b.set_percentage(50.0).unwrap();
    assert_eq!(root.percentage(), 75.0);

    a.complete().unwrap();
    assert!(matches!(a.set_percentage(10.0), Err(Error::TaskError(_))));
    assert!(matches!(a.set_message("late"), Err(Error::TaskError(_))));
    assert!(matches!(root.set_percentage(10.0), Err(Error::TaskError(_))));
}
