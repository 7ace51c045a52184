//! Client storage.

use idp_model::Client;
use idp_storage::{ClientStore, StorageError, StorageResult};
use rusqlite::{OptionalExtension, params};

use crate::convert::{to_json, to_nanos};
use crate::entities::ClientRow;
use crate::error::{from_insert_error, from_sqlite_error};
use crate::store::SqliteStore;

impl ClientStore for SqliteStore {
    fn put_client(&self, client: &Client) -> StorageResult<()> {
        let redirect_uris = to_json(&client.redirect_uris)?;
        let grant_types = to_json(&client.grant_types)?;
        let response_types = to_json(&client.response_types)?;
        let created_at = to_nanos(client.created_at)?;
        let updated_at = to_nanos(client.updated_at)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO clients (
                    client_id, client_type, secret_hash, registration_token_hash,
                    redirect_uris, grant_types, response_types, scopes, client_name,
                    introspection_allowed, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    client.client_id,
                    client.client_type.as_str(),
                    client.secret_hash,
                    client.registration_token_hash,
                    redirect_uris,
                    grant_types,
                    response_types,
                    client.scopes.to_string(),
                    client.client_name,
                    client.introspection_allowed,
                    created_at,
                    updated_at,
                ],
            )
            .map_err(|e| from_insert_error(e, "Client", "client_id"))?;
            Ok(())
        })
    }

    fn get_client(&self, client_id: &str) -> StorageResult<Option<Client>> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM clients WHERE client_id = ?1", ClientRow::COLUMNS),
                params![client_id],
                ClientRow::from_row,
            )
            .optional()
            .map_err(from_sqlite_error)
        })?;

        row.map(Client::try_from).transpose()
    }

    fn update_client(&self, client: &Client) -> StorageResult<()> {
        let redirect_uris = to_json(&client.redirect_uris)?;
        let grant_types = to_json(&client.grant_types)?;
        let response_types = to_json(&client.response_types)?;
        let updated_at = to_nanos(client.updated_at)?;

        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE clients SET
                    client_type = ?2, secret_hash = ?3, registration_token_hash = ?4,
                    redirect_uris = ?5, grant_types = ?6, response_types = ?7,
                    scopes = ?8, client_name = ?9, introspection_allowed = ?10,
                    updated_at = ?11
                WHERE client_id = ?1",
                params![
                    client.client_id,
                    client.client_type.as_str(),
                    client.secret_hash,
                    client.registration_token_hash,
                    redirect_uris,
                    grant_types,
                    response_types,
                    client.scopes.to_string(),
                    client.client_name,
                    client.introspection_allowed,
                    updated_at,
                ],
            )
            .map_err(from_sqlite_error)
        })?;

        if changed == 0 {
            return Err(StorageError::not_found("Client", client.client_id.clone()));
        }

        tracing::debug!(client_id = %client.client_id, "client updated");
        Ok(())
    }
}
