//! CRUD operations for [`Document`] records.

use rusqlite::{params, OptionalExtension};
use serde_json::{Map, Value};

use crate::database::Database;
use crate::error::Result;
use crate::models::{Document, DocumentId};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new document. Fails if the id is already taken in `collection`.
    pub fn insert_document(&self, collection: &str, document: &Document) -> Result<()> {
        let data = serde_json::to_string(&document.fields)?;
        self.conn().execute(
            "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)",
            params![collection, document.id.as_str(), data],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    fn find_document(&self, collection: &str, id: &DocumentId) -> Result<Option<Document>> {
        let data: Option<String> = self
            .conn()
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(json) => Ok(Some(Document::new(id.clone(), decode_fields(&json)?))),
            None => Ok(None),
        }
    }

    /// List every document of a collection in insertion order.
    pub fn list_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, data FROM documents
             WHERE collection = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![collection], |row| {
            let id: String = row.get(0)?;
            let data: String = row.get(1)?;
            Ok((id, data))
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let (id, data) = row?;
            documents.push(Document::new(DocumentId(id), decode_fields(&data)?));
        }
        Ok(documents)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Merge `fields` into the document, creating it if it does not exist.
    /// Fields not named in `fields` keep their stored value. Returns the
    /// merged document.
    pub fn merge_document(
        &self,
        collection: &str,
        id: &DocumentId,
        fields: Map<String, Value>,
    ) -> Result<Document> {
        let tx = self.conn().unchecked_transaction()?;

        let mut merged = self
            .find_document(collection, id)?
            .map(|d| d.fields)
            .unwrap_or_default();
        merged.extend(fields);

        let data = serde_json::to_string(&merged)?;
        tx.execute(
            "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)
             ON CONFLICT (collection, id) DO UPDATE SET data = excluded.data",
            params![collection, id.as_str(), data],
        )?;
        tx.commit()?;

        Ok(Document::new(id.clone(), merged))
    }
}

fn decode_fields(json: &str) -> Result<Map<String, Value>> {
    Ok(serde_json::from_str(json)?)
}
