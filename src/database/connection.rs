use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};

use crate::errors::Result;
use crate::models::transaction::Transaction;
use crate::repository::mongo::TRANSACTIONS_COLLECTION;

const DB_NAME: &str = "safishadb";

pub async fn get_db_client(database_url: &str) -> Result<Database> {
    let client = Client::with_uri_str(database_url).await?;
    let db = client.database(DB_NAME);

    match db.list_collection_names().await {
        Ok(collections) => {
            tracing::info!("Connected to database: {}", DB_NAME);
            tracing::debug!("Collections found: {:?}", collections);
        }
        Err(e) => {
            tracing::warn!("Database '{}' may not exist yet: {}", DB_NAME, e);
        }
    }

    Ok(db)
}

/// Creates the unique partial index on payment rows. This index is the
/// settlement idempotency lock; startup must not proceed without it.
pub async fn ensure_indexes(db: &Database) -> Result<()> {
    let options = IndexOptions::builder()
        .unique(true)
        .partial_filter_expression(doc! {
            "transaction_id": { "$type": "string" },
            "type": "payment",
        })
        .build();
    let model = IndexModel::builder()
        .keys(doc! { "transaction_id": 1, "type": 1 })
        .options(options)
        .build();

    db.collection::<Transaction>(TRANSACTIONS_COLLECTION)
        .create_index(model)
        .await?;

    tracing::info!("transactions unique payment index ensured");
    Ok(())
}
