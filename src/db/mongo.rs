//! MongoDB client and store implementation

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures_util::StreamExt;
use mongodb::{Client, Collection, IndexModel};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::db::indexes::indexes_for;
use crate::reputation::{Counter, ReputationSink};
use crate::store::{
    with_id, DocumentStore, DocumentStream, Query, AREAS_COLLECTION, METADATA_COLLECTION,
    REVISIONS_COLLECTION, USERS_COLLECTION,
};
use crate::types::{ChronasError, Result};

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify the connection with a ping
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast on unreachable servers instead of hanging on selection
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| ChronasError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ChronasError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Untyped collection handle
    pub fn collection(&self, name: &str) -> Collection<Document> {
        self.client.database(&self.db_name).collection::<Document>(name)
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

fn to_document(value: &Value) -> Result<Document> {
    Ok(bson::to_document(value)?)
}

fn to_value(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}

fn to_filter(query: &Query) -> Result<Document> {
    Ok(match query {
        Query::All => Document::new(),
        Query::Ids(ids) => doc! { "_id": { "$in": ids.clone() } },
        Query::FieldEq { field, value } => {
            let mut filter = Document::new();
            filter.insert(field.clone(), bson::to_bson(value)?);
            filter
        }
    })
}

/// [`DocumentStore`] backed by MongoDB collections
#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
}

impl MongoStore {
    /// Wrap a connected client and make sure the collection indexes exist
    pub async fn new(client: MongoClient) -> Result<Self> {
        let store = Self { client };
        for name in [
            AREAS_COLLECTION,
            METADATA_COLLECTION,
            REVISIONS_COLLECTION,
        ] {
            store.apply_indexes(name).await?;
        }
        Ok(store)
    }

    async fn apply_indexes(&self, collection: &str) -> Result<()> {
        let indices: Vec<IndexModel> = indexes_for(collection)
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        if indices.is_empty() {
            return Ok(());
        }

        self.client
            .collection(collection)
            .create_indexes(indices)
            .await
            .map_err(|e| ChronasError::Database(format!("Failed to create indexes: {}", e)))?;

        debug!(collection = collection, "Indexes applied");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let found = self
            .client
            .collection(collection)
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| ChronasError::Database(format!("Find failed: {}", e)))?;
        Ok(found.map(to_value))
    }

    async fn put(&self, collection: &str, id: &str, body: Value) -> Result<()> {
        let document = to_document(&with_id(body, id)?)?;
        self.client
            .collection(collection)
            .replace_one(doc! { "_id": id }, document)
            .upsert(true)
            .await
            .map_err(|e| ChronasError::Database(format!("Replace failed: {}", e)))?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let result = self
            .client
            .collection(collection)
            .delete_one(doc! { "_id": id })
            .await
            .map_err(|e| ChronasError::Database(format!("Delete failed: {}", e)))?;
        Ok(result.deleted_count > 0)
    }

    async fn find(&self, collection: &str, query: &Query) -> Result<Vec<Value>> {
        let cursor = self
            .client
            .collection(collection)
            .find(to_filter(query)?)
            .await
            .map_err(|e| ChronasError::Database(format!("Find failed: {}", e)))?;

        let results: Vec<Value> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(to_value(d)),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    async fn stream_ascending_by(&self, collection: &str, field: &str) -> Result<DocumentStream> {
        let mut sort = Document::new();
        sort.insert(field, 1);

        let cursor = self
            .client
            .collection(collection)
            .find(Document::new())
            .sort(sort)
            .await
            .map_err(|e| ChronasError::Database(format!("Cursor open failed: {}", e)))?;

        Ok(Box::pin(cursor.map(|doc| {
            doc.map(to_value)
                .map_err(|e| ChronasError::Database(format!("Cursor read failed: {}", e)))
        })))
    }
}

/// Reputation sink incrementing counters on `users` documents
#[derive(Clone)]
pub struct MongoReputation {
    client: MongoClient,
}

impl MongoReputation {
    pub fn new(client: MongoClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReputationSink for MongoReputation {
    async fn adjust(&self, username: &str, counter: Counter, delta: i64) {
        let mut inc = Document::new();
        inc.insert(counter.field(), delta);

        let result = self
            .client
            .collection(USERS_COLLECTION)
            .update_one(doc! { "_id": username }, doc! { "$inc": inc })
            .await;

        match result {
            Ok(r) if r.matched_count == 0 => {
                warn!(user = username, counter = %counter, "Reputation target not found");
            }
            Ok(_) => debug!(user = username, counter = %counter, delta, "Reputation adjusted"),
            Err(e) => warn!(user = username, counter = %counter, "Reputation update failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Round trips below need no server; collection operations need a running
    // MongoDB instance and are exercised through InMemoryStore instead.

    #[test]
    fn test_value_document_round_trip() {
        let value = json!({
            "_id": "1850",
            "year": 1850,
            "provinces": { "Mentawai": ["SWE", "swedish", "redo", "Stockholm", 1001] }
        });
        let document = to_document(&value).unwrap();
        assert_eq!(to_value(document), value);
    }

    #[test]
    fn test_query_filters() {
        let filter = to_filter(&Query::ids(["a", "b"])).unwrap();
        assert_eq!(filter, doc! { "_id": { "$in": ["a", "b"] } });

        let filter = to_filter(&Query::field_eq("type", "ap")).unwrap();
        assert_eq!(filter, doc! { "type": "ap" });

        assert!(to_filter(&Query::All).unwrap().is_empty());
    }
}
