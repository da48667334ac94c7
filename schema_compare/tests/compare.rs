mod common;

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use rstest::{fixture, rstest};
use tokio_util::sync::CancellationToken;

use schema_compare::schema::diff::CompareResultItem;
use schema_compare::schema::types::{
    Column, Dialect, ForeignKey, Index, IndexKind, ObjectCategory, ObjectKey, SchemaObject, Table,
    View,
};
use schema_compare::{
    CompareResult, DiffState, Error, SchemaComparator, SchemaModel, ScriptDirection,
    ScriptGenerator, ScriptingOptions, TaskInfo,
};

use common::shop;

fn compare(
    source: &SchemaModel,
    target: &SchemaModel,
    options: ScriptingOptions,
) -> CompareResult {
    SchemaComparator::new(options)
        .compare(source, target, &TaskInfo::new("compare"), &CancellationToken::new())
        .unwrap()
}

fn scripted(
    source: &SchemaModel,
    target: &SchemaModel,
    options: ScriptingOptions,
) -> CompareResult {
    let mut result = compare(source, target, options);
    ScriptGenerator::new(source.dialect, options)
        .script_result(&mut result, &TaskInfo::new("script"), &CancellationToken::new())
        .unwrap();
    result
}

#[fixture]
fn model() -> SchemaModel {
    shop()
}

#[rstest]
fn identical_snapshots_are_unchanged(model: SchemaModel) {
    let result = scripted(&model, &model.clone(), ScriptingOptions::default());

    assert!(result.is_empty());
    assert_eq!(result.states().len(), model.object_count());
    assert!(result.states().iter().all(|(_, _, state)| *state == DiffState::Unchanged));
    assert_eq!(result.full_script(ScriptDirection::SourceToTarget), Some(""));
    assert_eq!(result.full_script(ScriptDirection::TargetToSource), Some(""));
}

#[rstest]
fn swapping_sides_swaps_added_and_deleted(model: SchemaModel) {
    let mut other = model.clone();
    other.tables.remove(&ObjectKey::new("public", "orders"));
    other.add_table(Table::new("public", "audit_log"));
    other
        .tables
        .get_mut(&ObjectKey::new("public", "customers"))
        .unwrap()
        .columns[1]
        .nullable = true;

    let forward = compare(&model, &other, ScriptingOptions::default());
    let backward = compare(&other, &model, ScriptingOptions::default());

    let swapped: Vec<_> = backward
        .states()
        .into_iter()
        .map(|(category, key, state)| (category, key, state.reversed()))
        .collect();
    assert_eq!(forward.states(), swapped);

    let table_states: Vec<_> =
        forward.tables.iter().map(|i| (i.key.name.as_str(), i.state)).collect();
    assert_eq!(
        table_states,
        vec![
            ("audit_log", DiffState::Deleted),
            ("customers", DiffState::Modified),
            ("orders", DiffState::Added),
        ]
    );
}

#[test]
fn added_column_is_the_only_alteration() {
    let mut source = SchemaModel::new(Dialect::PostgreSql, "app");
    let mut t = Table::new("public", "T");
    t.add_column(Column::new("a", "integer"));
    t.add_column(Column::new("b", "text").nullable(true));
    source.add_table(t);

    let mut target = SchemaModel::new(Dialect::PostgreSql, "app");
    let mut t = Table::new("public", "T");
    t.add_column(Column::new("a", "integer"));
    target.add_table(t);

    let result = scripted(&source, &target, ScriptingOptions::default());

    assert_eq!(result.tables.len(), 1);
    let item = &result.tables[0];
    assert_eq!(item.state, DiffState::Modified);
    let columns: Vec<_> =
        item.detail.columns.iter().map(|c| (c.name.as_str(), c.state)).collect();
    assert_eq!(columns, vec![("a", DiffState::Unchanged), ("b", DiffState::Added)]);
    assert_eq!(item.alter_script, "ALTER TABLE \"T\" ADD COLUMN \"b\" text;");
    assert_eq!(
        result.full_script(ScriptDirection::TargetToSource),
        Some("ALTER TABLE \"T\" DROP COLUMN \"b\";")
    );
}

#[rstest]
#[case(true, DiffState::Unchanged)]
#[case(false, DiffState::Modified)]
fn collation_differences_follow_ignore_collate(
    model: SchemaModel,
    #[case] ignore_collate: bool,
    #[case] expected: DiffState,
) {
    let mut other = model.clone();
    other
        .tables
        .get_mut(&ObjectKey::new("public", "customers"))
        .unwrap()
        .columns[1]
        .collation = Some("C".to_string());

    let options = ScriptingOptions {
        ignore_collate,
        ..Default::default()
    };
    let result = compare(&model, &other, options);
    let customers = result
        .tables
        .iter()
        .find(|i| i.key.name == "customers")
        .unwrap();
    assert_eq!(customers.state, expected);
}

#[rstest]
fn cross_dialect_comparison_is_rejected(model: SchemaModel) {
    let other = SchemaModel::new(Dialect::MySql, "shop");
    let task = TaskInfo::new("compare");
    let result =
        SchemaComparator::default().compare(&model, &other, &task, &CancellationToken::new());
    assert!(matches!(result, Err(Error::UnsupportedDialect(_))));
}

#[rstest]
fn items_are_ordered_by_schema_then_name(model: SchemaModel) {
    let mut other = SchemaModel::new(Dialect::PostgreSql, "shop");
    other.add_table(Table::new("archive", "orders"));
    let result = compare(&model, &other, ScriptingOptions::default());

    let keys: Vec<_> = result
        .states()
        .into_iter()
        .filter(|(category, _, _)| *category == ObjectCategory::Table)
        .map(|(_, key, _)| key.to_string())
        .collect();
    assert_eq!(keys, vec!["archive.orders", "public.customers", "public.orders"]);
}

/// Make `objects` look like the source side of `items`
fn apply<T: SchemaObject>(items: &[CompareResultItem<T>], objects: &mut BTreeMap<ObjectKey, T>) {
    for item in items {
        match (item.state, &item.source) {
            (DiffState::Added | DiffState::Modified, Some(source)) => {
                objects.insert(item.key.clone(), source.clone());
            }
            (DiffState::Deleted, _) => {
                objects.remove(&item.key);
            }
            _ => {}
        }
    }
}

#[rstest]
fn applying_every_change_converges(model: SchemaModel) {
    let mut target = model.clone();
    target.tables.remove(&ObjectKey::new("public", "orders"));
    target.add_table(Table::new("public", "audit_log"));
    target.views.clear();
    let customers = target
        .tables
        .get_mut(&ObjectKey::new("public", "customers"))
        .unwrap();
    customers.columns[1].nullable = true;
    customers.add_column(Column::new("legacy_code", "text"));

    let result = compare(&model, &target, ScriptingOptions::default());
    assert!(!result.is_empty());

    apply(&result.sequences, &mut target.sequences);
    apply(&result.tables, &mut target.tables);
    apply(&result.views, &mut target.views);
    apply(&result.functions, &mut target.functions);
    apply(&result.procedures, &mut target.procedures);

    let again = scripted(&model, &target, ScriptingOptions::default());
    assert!(again.is_empty());
    assert!(again.states().iter().all(|(_, _, state)| *state == DiffState::Unchanged));
    assert_eq!(again.full_script(ScriptDirection::SourceToTarget), Some(""));
}

/// A MySQL snapshot as the crawler reads it from `database`
fn mysql_shop(database: &str) -> SchemaModel {
    let mut model = SchemaModel::new(Dialect::MySql, database);

    let mut customers = Table::new("", "customers");
    customers.add_column(Column::new("id", "int"));
    customers.add_column(Column::new("email", "varchar(255)").collation("utf8mb4_bin"));
    customers.add_index(Index::new("PRIMARY", IndexKind::PrimaryKey).column("id"));
    model.add_table(customers);

    let mut orders = Table::new("", "orders");
    orders.add_column(Column::new("id", "int"));
    orders.add_column(Column::new("customer_id", "int"));
    orders.add_index(Index::new("PRIMARY", IndexKind::PrimaryKey).column("id"));
    orders.add_foreign_key(
        ForeignKey::new("fk_orders_customers", "", "customers").column("customer_id", "id"),
    );
    model.add_table(orders);

    model.add_view(View::new("", "order_ids", "select `orders`.`id` AS `id` from `orders`"));
    model
}

#[rstest]
#[case(false)]
#[case(true)]
fn mysql_databases_with_different_names_compare_unchanged(#[case] use_schema_name: bool) {
    let options = ScriptingOptions {
        use_schema_name,
        ..Default::default()
    };
    let dev = mysql_shop("shop_dev");
    let prod = mysql_shop("shop_prod");

    let result = scripted(&dev, &prod, options);
    assert_eq!(result.states().len(), 3);
    assert!(result.states().iter().all(|(_, _, state)| *state == DiffState::Unchanged));
    assert_eq!(result.full_script(ScriptDirection::SourceToTarget), Some(""));
    assert_eq!(result.full_script(ScriptDirection::TargetToSource), Some(""));

    // A real difference is scripted without either database name
    let mut prod = prod;
    prod.tables
        .get_mut(&ObjectKey::new("", "customers"))
        .unwrap()
        .columns
        .retain(|c| c.name != "email");
    let result = scripted(&dev, &prod, options);
    let script = result.full_script(ScriptDirection::SourceToTarget).unwrap();
    assert_eq!(
        script,
        "ALTER TABLE `customers` ADD COLUMN `email` varchar(255) COLLATE utf8mb4_bin NOT NULL;"
    );
}

#[rstest]
#[case(Dialect::PostgreSql, "public")]
#[case(Dialect::MySql, "")]
#[case(Dialect::MicrosoftSql, "dbo")]
fn ignored_collation_stays_out_of_alter_script(#[case] dialect: Dialect, #[case] schema: &str) {
    let mut source = SchemaModel::new(dialect, "app");
    let mut t = Table::new(schema, "people");
    t.add_column(Column::new("name", "varchar(50)").nullable(true).collation("latin1_bin"));
    source.add_table(t);

    let mut target = SchemaModel::new(dialect, "app");
    let mut t = Table::new(schema, "people");
    t.add_column(Column::new("name", "varchar(50)").collation("utf8_general_ci"));
    target.add_table(t);

    let options = ScriptingOptions {
        ignore_collate: true,
        ..Default::default()
    };
    let result = scripted(&source, &target, options);

    let item = &result.tables[0];
    assert_eq!(item.state, DiffState::Modified);
    assert_eq!(item.detail.columns[0].state, DiffState::Modified);
    assert!(!item.alter_script.is_empty());
    assert!(!item.alter_script.contains("COLLATE"), "{}", item.alter_script);
    assert!(!item.source_create_script.contains("COLLATE"));
}
