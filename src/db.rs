use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use tracing::info;

use crate::entities;

/// Opens a connection pool against the configured database URL.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;
    info!(url = %redact(database_url), "Database connection established");
    Ok(db)
}

/// Creates every table from the entity definitions. Used for sqlite and
/// development bootstrap; production schemas are owned by external
/// migrations.
pub async fn create_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut statements = vec![
        schema.create_table_from_entity(entities::product::Entity),
        schema.create_table_from_entity(entities::product_variant::Entity),
        schema.create_table_from_entity(entities::inventory_level::Entity),
        schema.create_table_from_entity(entities::stock_movement::Entity),
        schema.create_table_from_entity(entities::order::Entity),
        schema.create_table_from_entity(entities::order_item::Entity),
        schema.create_table_from_entity(entities::payment::Entity),
        schema.create_table_from_entity(entities::return_entity::Entity),
        schema.create_table_from_entity(entities::return_item::Entity),
        schema.create_table_from_entity(entities::idempotency_key::Entity),
    ];

    for statement in statements.iter_mut() {
        statement.if_not_exists();
        db.execute(backend.build(&*statement)).await?;
    }

    Ok(())
}

fn redact(url: &str) -> String {
    match url.split_once('@') {
        Some((_, host)) => format!("***@{host}"),
        None => url.to_string(),
    }
}
