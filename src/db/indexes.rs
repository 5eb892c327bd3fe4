//! Index definitions per collection

use bson::{doc, Document};
use mongodb::options::IndexOptions;

use crate::store::{AREAS_COLLECTION, METADATA_COLLECTION, REVISIONS_COLLECTION};

/// Index keys and options to apply to a collection
pub fn indexes_for(collection: &str) -> Vec<(Document, Option<IndexOptions>)> {
    match collection {
        // Aggregation streams snapshots ascending by year
        AREAS_COLLECTION => vec![(
            doc! { "year": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("year_unique".to_string())
                    .build(),
            ),
        )],
        // Derived aggregates are looked up by type
        METADATA_COLLECTION => vec![(
            doc! { "type": 1 },
            Some(IndexOptions::builder().name("type_index".to_string()).build()),
        )],
        REVISIONS_COLLECTION => vec![
            (
                doc! { "entityId": 1, "timestamp": -1 },
                Some(
                    IndexOptions::builder()
                        .name("entity_history_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "user": 1 },
                Some(IndexOptions::builder().name("user_index".to_string()).build()),
            ),
        ],
        _ => Vec::new(),
    }
}
