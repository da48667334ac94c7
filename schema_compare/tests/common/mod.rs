//! In-memory crawler and snapshot builders shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use schema_compare::schema::types::{
    Column, Dialect, ForeignKey, Index, IndexKind, ObjectCategory, Routine, RoutineKind,
    SchemaModel, Sequence, Table, View,
};
use schema_compare::{Crawler, Error, Result, TaskInfo};

/// Serves a prepared snapshot as if it were read from a catalog
pub struct MemoryCrawler {
    model: SchemaModel,
    failing: Option<ObjectCategory>,
    cancelling: Option<ObjectCategory>,
}

impl MemoryCrawler {
    pub fn new(model: SchemaModel) -> Self {
        Self {
            model,
            failing: None,
            cancelling: None,
        }
    }

    /// Fail with a crawl error when `category` is read
    pub fn failing_on(mut self, category: ObjectCategory) -> Self {
        self.failing = Some(category);
        self
    }

    /// Request cancellation while `category` is read
    pub fn cancelling_on(mut self, category: ObjectCategory) -> Self {
        self.cancelling = Some(category);
        self
    }

    fn serve<T: Clone>(
        &self,
        category: ObjectCategory,
        objects: Vec<&T>,
        task: &TaskInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        if self.failing == Some(category) {
            return Err(Error::CrawlError(format!("permission denied reading {}", category)));
        }
        if self.cancelling == Some(category) {
            cancel.cancel();
        }

        let total = objects.len();
        let mut out = Vec::with_capacity(total);
        for (processed, object) in objects.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            out.push(object.clone());
            task.set_progress(processed + 1, total)?;
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        task.set_progress(total, total)?;
        Ok(out)
    }
}

#[async_trait]
impl Crawler for MemoryCrawler {
    fn dialect(&self) -> Dialect {
        self.model.dialect
    }

    fn database(&self) -> &str {
        &self.model.database
    }

    async fn crawl_tables(
        &self,
        task: &TaskInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<Table>> {
        self.serve(ObjectCategory::Table, self.model.tables.values().collect(), task, cancel)
    }

    async fn crawl_views(&self, task: &TaskInfo, cancel: &CancellationToken) -> Result<Vec<View>> {
        self.serve(ObjectCategory::View, self.model.views.values().collect(), task, cancel)
    }

    async fn crawl_routines(
        &self,
        kind: RoutineKind,
        task: &TaskInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<Routine>> {
        let (category, routines) = match kind {
            RoutineKind::Function => (ObjectCategory::Function, &self.model.functions),
            RoutineKind::Procedure => (ObjectCategory::Procedure, &self.model.procedures),
        };
        self.serve(category, routines.values().collect(), task, cancel)
    }

    async fn crawl_sequences(
        &self,
        task: &TaskInfo,
        cancel: &CancellationToken,
    ) -> Result<Vec<Sequence>> {
        let sequences: Vec<&Sequence> = self.model.sequences.values().collect();
        self.serve(ObjectCategory::Sequence, sequences, task, cancel)
    }
}

/// `public.customers(id, name)` with a primary key
pub fn customers() -> Table {
    let mut table = Table::new("public", "customers");
    table.add_column(Column::new("id", "integer").identity(1, 1));
    table.add_column(Column::new("name", "text").collation("en_US"));
    table.add_index(Index::new("customers_pkey", IndexKind::PrimaryKey).column("id"));
    table
}

/// `public.orders` referencing `customers`
pub fn orders() -> Table {
    let mut table = Table::new("public", "orders");
    table.add_column(Column::new("id", "integer"));
    table.add_column(Column::new("customer_id", "integer"));
    table.add_column(Column::new("placed_at", "timestamp").default("now()"));
    table.add_index(Index::new("orders_pkey", IndexKind::PrimaryKey).column("id"));
    table.add_index(Index::new("orders_customer_idx", IndexKind::Index).column("customer_id"));
    table.add_foreign_key(
        ForeignKey::new("orders_customer_fk", "public", "customers").column("customer_id", "id"),
    );
    table
}

/// A PostgreSQL snapshot exercising every category
pub fn shop() -> SchemaModel {
    let mut model = SchemaModel::new(Dialect::PostgreSql, "shop");
    model.add_sequence(Sequence::new("public", "invoice_numbers", "bigint"));
    model.add_table(customers());
    model.add_table(orders());
    model.add_view(View::new(
        "public",
        "recent_orders",
        " SELECT orders.id\n   FROM orders\n  WHERE orders.placed_at > (now() - '7 days'::interval);",
    ));

    let mut total = Routine::new(
        "public",
        "order_total",
        RoutineKind::Function,
        "CREATE OR REPLACE FUNCTION public.order_total(order_id integer)\n RETURNS numeric\n LANGUAGE sql\nAS $function$ SELECT 0::numeric $function$\n",
    );
    total.arguments = Some("order_id integer".to_string());
    total.return_type = Some("numeric".to_string());
    model.add_routine(total);

    let mut archive = Routine::new(
        "public",
        "archive_orders",
        RoutineKind::Procedure,
        "CREATE OR REPLACE PROCEDURE public.archive_orders()\n LANGUAGE sql\nAS $procedure$ DELETE FROM orders $procedure$\n",
    );
    archive.arguments = Some(String::new());
    model.add_routine(archive);
    model
}
