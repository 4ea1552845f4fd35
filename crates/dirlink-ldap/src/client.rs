//! Directory client façade
//!
//! High-level search and write operations on top of a [`Connection`]. Every
//! call runs through the connection guard, and server result codes are
//! mapped onto [`DirectoryError`] with the target DN attached.

use tracing::{debug, info, instrument};

use dirlink_connector::config::{ClientConfig, SearchScope};
use dirlink_connector::error::{DirectoryError, DirectoryResult};
use dirlink_connector::operation::{Entry, Modification, SearchRequest};
use dirlink_connector::traits::{Session, Transport};

use crate::connection::{CallOptions, Connection, ConnectionState};
use crate::filter::Filter;
use crate::sasl::MechanismRegistry;
use crate::schema::SchemaCache;

/// Filter sent when the caller's filter compiles to nothing.
pub const MATCH_ALL_FILTER: &str = "(objectClass=*)";

const BINARY_OPTION: &str = ";binary";

/// A search as issued by callers.
#[derive(Debug, Clone)]
pub struct Search {
    pub base: String,
    /// Defaults to the configured scope.
    pub scope: Option<SearchScope>,
    pub filter: Filter,
    pub attributes: Vec<String>,
    pub size_limit: Option<u32>,
}

impl Search {
    /// Search everything under `base`.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope: None,
            filter: Filter::Raw(String::new()),
            attributes: Vec::new(),
            size_limit: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_size_limit(mut self, limit: u32) -> Self {
        self.size_limit = Some(limit);
        self
    }

    fn to_request(&self, config: &ClientConfig) -> SearchRequest {
        let filter = self
            .filter
            .compile()
            .unwrap_or_else(|| MATCH_ALL_FILTER.to_string());
        SearchRequest {
            base: self.base.clone(),
            scope: self.scope.unwrap_or(config.scope),
            filter,
            attributes: self.attributes.clone(),
            size_limit: self.size_limit,
        }
    }
}

/// Append `;binary` to attributes whose syntax requires binary transfer.
fn binary_name(schema: &mut SchemaCache, name: &str) -> String {
    if name.to_ascii_lowercase().ends_with(BINARY_OPTION) || !schema.binary_required(name) {
        name.to_string()
    } else {
        format!("{name}{BINARY_OPTION}")
    }
}

/// Client for one directory server.
#[derive(Debug)]
pub struct DirectoryClient<T: Transport> {
    connection: Connection<T>,
}

impl<T: Transport> DirectoryClient<T> {
    pub fn new(transport: T, config: ClientConfig) -> DirectoryResult<Self> {
        Ok(Self {
            connection: Connection::new(transport, config)?,
        })
    }

    /// Use a custom SASL mechanism registry.
    #[must_use]
    pub fn with_registry(self, registry: MechanismRegistry) -> Self {
        Self {
            connection: self.connection.with_registry(registry),
        }
    }

    pub fn connection(&self) -> &Connection<T> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection<T> {
        &mut self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub async fn connect(&mut self) -> DirectoryResult<()> {
        self.connection.connect(&CallOptions::default()).await
    }

    pub async fn disconnect(&mut self) {
        self.connection.disconnect(&CallOptions::default()).await;
    }

    /// The server schema, loaded once per connection.
    pub async fn schema(&mut self) -> DirectoryResult<&mut SchemaCache> {
        self.connection.schema(&CallOptions::default()).await
    }

    /// Search with default call options.
    pub async fn search(&mut self, search: &Search) -> DirectoryResult<Vec<Entry>> {
        self.search_with(search, &CallOptions::default()).await
    }

    /// Search; a base that does not exist yields no entries.
    #[instrument(skip(self, search, options), fields(base = %search.base))]
    pub async fn search_with(
        &mut self,
        search: &Search,
        options: &CallOptions,
    ) -> DirectoryResult<Vec<Entry>> {
        let request = search.to_request(self.connection.config());
        debug!(filter = %request.filter, scope = ?request.scope, "Searching directory");

        let request = &request;
        let result = self
            .connection
            .guard(options, |mut session| async move { session.search(request).await })
            .await
            .map_err(|e| e.normalize(&request.base));

        match result {
            Ok(entries) => {
                debug!(returned = entries.len(), "Search completed");
                Ok(entries)
            }
            Err(DirectoryError::EntryNotFound { .. }) => {
                debug!("Search base does not exist");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Add an entry.
    #[instrument(skip(self, attributes))]
    pub async fn add(
        &mut self,
        dn: &str,
        attributes: Vec<(String, Vec<Vec<u8>>)>,
    ) -> DirectoryResult<()> {
        let options = CallOptions::default();
        let schema = self.connection.schema(&options).await?;
        let attributes: Vec<(String, Vec<Vec<u8>>)> = attributes
            .into_iter()
            .map(|(name, values)| (binary_name(schema, &name), values))
            .collect();

        let attributes = &attributes;
        self.connection
            .guard(&options, |mut session| async move { session.add(dn, attributes).await })
            .await
            .map_err(|e| e.normalize(dn))?;

        info!(dn = %dn, "Entry added");
        Ok(())
    }

    /// Modify an entry's attributes.
    #[instrument(skip(self, modifications))]
    pub async fn modify(&mut self, dn: &str, modifications: Vec<Modification>) -> DirectoryResult<()> {
        let options = CallOptions::default();
        let schema = self.connection.schema(&options).await?;
        let modifications: Vec<Modification> = modifications
            .into_iter()
            .map(|m| Modification {
                attribute: binary_name(schema, &m.attribute),
                ..m
            })
            .collect();

        let modifications = &modifications;
        self.connection
            .guard(&options, |mut session| async move {
                session.modify(dn, modifications).await
            })
            .await
            .map_err(|e| e.normalize(dn))?;

        info!(dn = %dn, changes = modifications.len(), "Entry modified");
        Ok(())
    }

    /// Delete an entry.
    #[instrument(skip(self))]
    pub async fn delete(&mut self, dn: &str) -> DirectoryResult<()> {
        self.connection
            .guard(&CallOptions::default(), |mut session| async move {
                session.delete(dn).await
            })
            .await
            .map_err(|e| e.normalize(dn))?;

        info!(dn = %dn, "Entry deleted");
        Ok(())
    }

    /// Rename an entry, optionally moving it under `new_superior`.
    #[instrument(skip(self))]
    pub async fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
    ) -> DirectoryResult<()> {
        self.connection
            .guard(&CallOptions::default(), |mut session| async move {
                session
                    .rename(dn, new_rdn, delete_old_rdn, new_superior)
                    .await
            })
            .await
            .map_err(|e| e.normalize(dn))?;

        info!(dn = %dn, new_rdn = %new_rdn, "Entry renamed");
        Ok(())
    }
}
