mod common;

use pretty_assertions::assert_eq;
use rstest::rstest;
use tokio_util::sync::CancellationToken;

use schema_compare::schema::types::{
    Column, Dialect, ForeignKey, Index, IndexKind, ObjectKey, ReferentialAction, Sequence,
    Table,
};
use schema_compare::{
    CompareResult, DiffState, SchemaComparator, SchemaModel, ScriptDirection, ScriptGenerator,
    ScriptingOptions, TaskInfo,
};

use common::shop;

fn scripted(source: &SchemaModel, target: &SchemaModel) -> CompareResult {
    let options = ScriptingOptions::default();
    let cancel = CancellationToken::new();
    let mut result = SchemaComparator::new(options)
        .compare(source, target, &TaskInfo::new("compare"), &cancel)
        .unwrap();
    ScriptGenerator::new(source.dialect, options)
        .script_result(&mut result, &TaskInfo::new("script"), &cancel)
        .unwrap();
    result
}

fn position(script: &str, statement: &str) -> usize {
    script
        .find(statement)
        .unwrap_or_else(|| panic!("{:?} not found in:\n{}", statement, script))
}

#[test]
fn full_script_is_deterministic() {
    let empty = SchemaModel::new(Dialect::PostgreSql, "shop");
    let result = scripted(&shop(), &empty);
    let generator = ScriptGenerator::new(Dialect::PostgreSql, ScriptingOptions::default());

    let first = generator.script_full(&result, ScriptDirection::SourceToTarget);
    let second = generator.script_full(&result, ScriptDirection::SourceToTarget);
    assert_eq!(first, second);
    assert_eq!(Some(first.as_str()), result.full_script(ScriptDirection::SourceToTarget));
}

#[test]
fn creation_follows_dependency_order() {
    let empty = SchemaModel::new(Dialect::PostgreSql, "shop");
    let result = scripted(&shop(), &empty);
    let script = result.full_script(ScriptDirection::SourceToTarget).unwrap();

    let order = [
        "CREATE SEQUENCE \"invoice_numbers\"",
        "CREATE TABLE \"customers\"",
        "CREATE TABLE \"orders\"",
        "CREATE INDEX \"orders_customer_idx\"",
        "ADD CONSTRAINT \"orders_customer_fk\" FOREIGN KEY",
        "CREATE VIEW \"recent_orders\"",
        "CREATE OR REPLACE FUNCTION public.order_total",
        "CREATE OR REPLACE PROCEDURE public.archive_orders",
    ];
    let positions: Vec<usize> = order.iter().map(|s| position(script, s)).collect();
    let mut sorted = positions.clone();
    sorted.sort();
    assert_eq!(positions, sorted);

    // Reversed, everything is dropped, routines and views first
    let script = result.full_script(ScriptDirection::TargetToSource).unwrap();
    assert!(position(script, "DROP PROCEDURE") < position(script, "DROP VIEW \"recent_orders\""));
    let drop_view = position(script, "DROP VIEW \"recent_orders\"");
    assert!(drop_view < position(script, "DROP TABLE \"customers\""));
    let drop_orders = position(script, "DROP TABLE \"orders\"");
    assert!(drop_orders < position(script, "DROP SEQUENCE \"invoice_numbers\""));
}

#[test]
fn dropped_table_goes_after_the_keys_referencing_it() {
    let mut source = SchemaModel::new(Dialect::PostgreSql, "app");
    let mut t = Table::new("public", "T");
    t.add_column(Column::new("id", "integer"));
    source.add_table(t);

    let mut target = SchemaModel::new(Dialect::PostgreSql, "app");
    let mut t = Table::new("public", "T");
    t.add_column(Column::new("id", "integer"));
    t.add_column(Column::new("u_id", "integer"));
    t.add_foreign_key(ForeignKey::new("t_u_fk", "public", "U").column("u_id", "id"));
    target.add_table(t);
    let mut u = Table::new("public", "U");
    u.add_column(Column::new("id", "integer"));
    u.add_index(Index::new("u_pkey", IndexKind::PrimaryKey).column("id"));
    target.add_table(u);

    let result = scripted(&source, &target);
    let u_item = result.tables.iter().find(|i| i.key.name == "U").unwrap();
    assert_eq!(u_item.state, DiffState::Deleted);

    let script = result.full_script(ScriptDirection::SourceToTarget).unwrap();
    let drop_fk = "ALTER TABLE \"T\" DROP CONSTRAINT \"t_u_fk\";";
    assert_eq!(script.matches(drop_fk).count(), 1);
    assert!(position(script, drop_fk) < position(script, "DROP TABLE \"U\";"));
    assert!(script.contains("ALTER TABLE \"T\" DROP COLUMN \"u_id\";"));
}

/// `orders` as it is in one database, with `regions` only where `with_regions`
fn orders_side(
    index_kind: IndexKind,
    on_delete: ReferentialAction,
    with_regions: bool,
) -> SchemaModel {
    let mut model = SchemaModel::new(Dialect::PostgreSql, "app");

    let mut customers = Table::new("public", "customers");
    customers.add_column(Column::new("id", "integer"));
    customers.add_index(Index::new("customers_pkey", IndexKind::PrimaryKey).column("id"));
    model.add_table(customers);

    let mut orders = Table::new("public", "orders");
    orders.add_column(Column::new("id", "integer"));
    orders.add_column(Column::new("customer_id", "integer"));
    orders.add_column(Column::new("region_id", "integer"));
    orders.add_column(Column::new("note", "text").nullable(!with_regions));
    orders.add_index(Index::new("orders_customer_idx", index_kind).column("customer_id"));
    let mut fk = ForeignKey::new("orders_customer_fk", "public", "customers")
        .column("customer_id", "id");
    fk.on_delete = on_delete;
    orders.add_foreign_key(fk);

    if with_regions {
        orders.add_foreign_key(
            ForeignKey::new("orders_region_fk", "public", "regions").column("region_id", "id"),
        );
        let mut regions = Table::new("public", "regions");
        regions.add_column(Column::new("id", "integer"));
        model.add_table(regions);
    }
    model.add_table(orders);
    model
}

#[test]
fn modified_keys_and_indexes_are_dropped_before_recreation() {
    let source = orders_side(IndexKind::Unique, ReferentialAction::Cascade, false);
    let target = orders_side(IndexKind::Index, ReferentialAction::NoAction, true);
    let result = scripted(&source, &target);

    let orders = result.tables.iter().find(|i| i.key.name == "orders").unwrap();
    assert_eq!(orders.state, DiffState::Modified);
    let regions = result.tables.iter().find(|i| i.key.name == "regions").unwrap();
    assert_eq!(regions.state, DiffState::Deleted);

    let drop_fk = "ALTER TABLE \"orders\" DROP CONSTRAINT \"orders_customer_fk\";";
    let drop_region_fk = "ALTER TABLE \"orders\" DROP CONSTRAINT \"orders_region_fk\";";
    let drop_index = "DROP INDEX \"orders_customer_idx\";";
    let alter_note = "ALTER TABLE \"orders\" ALTER COLUMN \"note\" DROP NOT NULL;";
    let create_index =
        "CREATE UNIQUE INDEX \"orders_customer_idx\" ON \"orders\" (\"customer_id\");";
    let create_fk = "ALTER TABLE \"orders\" ADD CONSTRAINT \"orders_customer_fk\" FOREIGN KEY \
                     (\"customer_id\") REFERENCES \"customers\" (\"id\") ON DELETE CASCADE;";

    let order = [drop_fk, drop_index, alter_note, create_index, create_fk];
    for script in [
        orders.alter_script.as_str(),
        result.full_script(ScriptDirection::SourceToTarget).unwrap(),
    ] {
        let positions: Vec<usize> = order.iter().map(|s| position(script, s)).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted, "{}", script);
        assert_eq!(script.matches(drop_region_fk).count(), 1);
        assert!(position(script, drop_region_fk) < position(script, create_index));
    }

    let full = result.full_script(ScriptDirection::SourceToTarget).unwrap();
    let drop_regions = position(full, "DROP TABLE \"regions\";");
    assert!(position(full, drop_region_fk) < drop_regions);
    assert!(position(full, drop_index) < drop_regions);
    assert!(drop_regions < position(full, alter_note));
}

#[test]
fn item_scripts_are_found_by_identifier() {
    let mut target = shop();
    target.tables.remove(&ObjectKey::new("public", "orders"));
    let result = scripted(&shop(), &target);

    let orders = result.tables.iter().find(|i| i.key.name == "orders").unwrap();
    let scripts = result.item_scripts(orders.id).unwrap();
    assert!(scripts.source_create_script.starts_with("CREATE TABLE \"orders\" (\n"));
    assert_eq!(scripts.target_create_script, "");
    assert_eq!(scripts.alter_script, scripts.source_create_script);

    let customers = result.tables.iter().find(|i| i.key.name == "customers").unwrap();
    let scripts = result.item_scripts(customers.id).unwrap();
    assert_eq!(scripts.source_create_script, scripts.target_create_script);
    assert_eq!(scripts.alter_script, "");

    assert!(result.item_scripts(uuid::Uuid::new_v4()).is_none());
}

#[rstest]
// SQL Server has no RESTRICT action
#[case(Dialect::MicrosoftSql, "dbo", "children")]
// MySQL has no sequences
#[case(Dialect::MySql, "shop", "ids")]
fn unscriptable_item_is_left_out_and_recorded(
    #[case] dialect: Dialect,
    #[case] schema: &str,
    #[case] failing: &str,
) {
    let mut parent = Table::new(schema, "parents");
    parent.add_column(Column::new("id", "int"));
    parent.add_index(Index::new("pk_parents", IndexKind::PrimaryKey).column("id"));

    let mut child = Table::new(schema, "children");
    child.add_column(Column::new("id", "int"));
    child.add_column(Column::new("parent_id", "int"));
    let mut fk =
        ForeignKey::new("fk_children_parents", schema, "parents").column("parent_id", "id");
    fk.on_delete = ReferentialAction::Restrict;
    child.add_foreign_key(fk);

    let mut source = SchemaModel::new(dialect, "shop");
    source.add_table(parent);
    source.add_table(child);
    source.add_sequence(Sequence::new(schema, "ids", "bigint"));
    let target = SchemaModel::new(dialect, "shop");

    let result = scripted(&source, &target);

    let mut failed: Vec<&str> = result
        .sequences
        .iter()
        .filter(|i| i.scripting_error.is_some())
        .map(|i| i.key.name.as_str())
        .collect();
    failed.extend(
        result
            .tables
            .iter()
            .filter(|i| i.scripting_error.is_some())
            .map(|i| i.key.name.as_str()),
    );
    assert_eq!(failed, vec![failing]);

    let script = result.full_script(ScriptDirection::SourceToTarget).unwrap();
    assert!(script.contains("parents"));
    assert_eq!(script.contains("children"), failing != "children");
}
