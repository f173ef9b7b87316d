//! Synchronous facade over `Client`.
//!
//! `BlockingClient` owns a current-thread Tokio runtime and blocks on the
//! async client's futures. It must not be used from inside another runtime.

use crate::client::Client;
use crate::condition::Filter;
use crate::core::db::query::Params;
use crate::core::db::schema::Table;
use crate::core::Result;
use crate::pages::{SelectPages, WritePages};
use crate::response::{Response, Row};
use crate::schema_cache::ColumnMetadataMap;
use crate::statement::SelectOptions;
use crate::value::{CoercedRecord, Record};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

pub struct BlockingClient {
    client: Client,
    runtime: Runtime,
}

impl BlockingClient {
    pub fn new(client: Client) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(BlockingClient { client, runtime })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    pub fn run(
        &self,
        query: &str,
        database: Option<&str>,
        params: Params,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        self.runtime
            .block_on(self.client.run(query, database, params, timeout))
    }

    pub fn get_table(&self, database: &str, table: &str) -> Result<Arc<Table>> {
        self.runtime.block_on(self.client.get_table(database, table))
    }

    pub fn get_header_info(&self, database: &str, table: &str) -> Result<Arc<ColumnMetadataMap>> {
        self.runtime
            .block_on(self.client.get_header_info(database, table))
    }

    pub fn correct_types(
        &self,
        database: &str,
        table_name: &str,
        records: Vec<Record>,
        table: Option<&Table>,
    ) -> Result<Vec<CoercedRecord>> {
        self.runtime
            .block_on(self.client.correct_types(database, table_name, records, table))
    }

    pub fn select(&self, database: &str, table: &str, filter: &Filter, options: &SelectOptions) -> Result<Response> {
        self.runtime
            .block_on(self.client.select(database, table, filter, options))
    }

    pub fn insert(&self, database: &str, table: &str, records: Vec<Record>) -> Result<Response> {
        self.runtime.block_on(self.client.insert(database, table, records))
    }

    pub fn upsert(
        &self,
        database: &str,
        table: &str,
        records: Vec<Record>,
        update_keys: Option<Vec<String>>,
    ) -> Result<Response> {
        self.runtime
            .block_on(self.client.upsert(database, table, records, update_keys))
    }

    pub fn update(&self, database: &str, table: &str, values: Record, filter: &Filter) -> Result<Response> {
        self.runtime
            .block_on(self.client.update(database, table, values, filter))
    }

    pub fn delete(&self, database: &str, table: &str, filter: &Filter) -> Result<Response> {
        self.runtime.block_on(self.client.delete(database, table, filter))
    }

    pub fn clear_table(&self, database: &str, table: &str) -> Result<Response> {
        self.runtime.block_on(self.client.clear_table(database, table))
    }

    pub fn preload_tables(&self, tables: &[(&str, &str)]) -> Result<()> {
        self.runtime.block_on(self.client.preload_tables(tables))
    }

    pub fn select_pages(
        &self,
        database: &str,
        table: &str,
        filter: Filter,
        options: SelectOptions,
        page_size: usize,
    ) -> BlockingSelectPages<'_> {
        BlockingSelectPages {
            runtime: &self.runtime,
            pages: self
                .client
                .select_pages(database, table, filter, options, page_size),
        }
    }

    pub fn insert_pages(
        &self,
        database: &str,
        table: &str,
        records: Vec<Record>,
        page_size: usize,
    ) -> BlockingWritePages<'_> {
        BlockingWritePages {
            runtime: &self.runtime,
            pages: self.client.insert_pages(database, table, records, page_size),
        }
    }

    pub fn upsert_pages(
        &self,
        database: &str,
        table: &str,
        records: Vec<Record>,
        update_keys: Option<Vec<String>>,
        page_size: usize,
    ) -> BlockingWritePages<'_> {
        BlockingWritePages {
            runtime: &self.runtime,
            pages: self
                .client
                .upsert_pages(database, table, records, update_keys, page_size),
        }
    }
}

/// Iterator over select pages.
pub struct BlockingSelectPages<'c> {
    runtime: &'c Runtime,
    pages: SelectPages<'c>,
}

impl Iterator for BlockingSelectPages<'_> {
    type Item = Result<Vec<Row>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.pages.next_page())
    }
}

/// Iterator over write chunks.
pub struct BlockingWritePages<'c> {
    runtime: &'c Runtime,
    pages: WritePages<'c>,
}

impl Iterator for BlockingWritePages<'_> {
    type Item = Result<Response>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.pages.next_page())
    }
}
