//! Paginated reads and writes.
//!
//! Pages are pulled one at a time with `next_page`. A select page asks for
//! one row more than the page size to learn whether another page follows.
//! Write pages split the records into chunks that stay under SQLite's bound
//! variable limit. Every pager stops after the first error.

use crate::client::Client;
use crate::condition::Filter;
use crate::core::Result;
use crate::response::{Response, Row};
use crate::statement::SelectOptions;
use crate::value::Record;

/// Default rows per select page.
pub const SELECT_PAGE_SIZE_DEFAULT: usize = 25_000;
/// Default records per insert or upsert page.
pub const WRITE_PAGE_SIZE_DEFAULT: usize = 1_000;

/// Pages through a select.
pub struct SelectPages<'c> {
    client: &'c Client,
    database: String,
    table: String,
    filter: Filter,
    options: SelectOptions,
    page_size: usize,
    offset: u64,
    finished: bool,
}

impl<'c> SelectPages<'c> {
    pub fn new(
        client: &'c Client,
        database: &str,
        table: &str,
        filter: Filter,
        options: SelectOptions,
        page_size: usize,
    ) -> Self {
        SelectPages {
            client,
            database: database.to_string(),
            table: table.to_string(),
            filter,
            options,
            page_size: page_size.max(1),
            offset: 0,
            finished: false,
        }
    }

    /// Fetches the next page, or `None` once the rows are exhausted or a
    /// page has failed. An empty select yields no pages. The first page
    /// starts at offset 0 regardless of any offset in the select options.
    pub async fn next_page(&mut self) -> Option<Result<Vec<Row>>> {
        if self.finished {
            return None;
        }
        let options = SelectOptions {
            limit: Some(self.page_size as u64 + 1),
            offset: Some(self.offset),
            ..self.options.clone()
        };

        match self
            .client
            .select(&self.database, &self.table, &self.filter, &options)
            .await
        {
            Ok(response) => {
                let mut rows = response.into_rows();
                if rows.is_empty() {
                    self.finished = true;
                    return None;
                }
                let more = rows.len() > self.page_size;
                rows.truncate(self.page_size);
                self.offset += self.page_size as u64;
                self.finished = !more;
                Some(Ok(rows))
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }

    /// Collects every remaining page.
    pub async fn try_collect(mut self) -> Result<Vec<Vec<Row>>> {
        let mut pages = Vec::new();
        while let Some(page) = self.next_page().await {
            pages.push(page?);
        }
        Ok(pages)
    }
}

/// Which write a `WritePages` performs.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteMode {
    Insert,
    Upsert { update_keys: Option<Vec<String>> },
}

/// Writes records in chunks.
pub struct WritePages<'c> {
    client: &'c Client,
    database: String,
    table: String,
    records: std::vec::IntoIter<Record>,
    mode: WriteMode,
    page_size: usize,
    finished: bool,
}

impl<'c> WritePages<'c> {
    pub fn new(
        client: &'c Client,
        database: &str,
        table: &str,
        records: Vec<Record>,
        mode: WriteMode,
        page_size: usize,
    ) -> Self {
        WritePages {
            client,
            database: database.to_string(),
            table: table.to_string(),
            records: records.into_iter(),
            mode,
            page_size: page_size.max(1),
            finished: false,
        }
    }

    /// Writes the next chunk, or returns `None` when all records are
    /// written or a chunk has failed.
    pub async fn next_page(&mut self) -> Option<Result<Response>> {
        if self.finished {
            return None;
        }
        let chunk: Vec<Record> = self.records.by_ref().take(self.page_size).collect();
        if chunk.is_empty() {
            self.finished = true;
            return None;
        }

        let result = match &self.mode {
            WriteMode::Insert => self.client.insert(&self.database, &self.table, chunk).await,
            WriteMode::Upsert { update_keys } => {
                self.client
                    .upsert(&self.database, &self.table, chunk, update_keys.clone())
                    .await
            }
        };
        if result.is_err() {
            self.finished = true;
        }
        Some(result)
    }

    /// Writes every remaining chunk, returning their responses.
    pub async fn try_collect(mut self) -> Result<Vec<Response>> {
        let mut responses = Vec::new();
        while let Some(page) = self.next_page().await {
            responses.push(page?);
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{user_record, ClientFixture};
    use crate::value::Value;

    #[tokio::test]
    async fn test_select_pages_split_rows() {
        let fixture = ClientFixture::with_sample_schema().await;
        let client = &fixture.client;
        let records = (0..7).map(|i| user_record(&format!("user{}", i), Some(20 + i))).collect();
        client.insert("main", "users", records).await.unwrap();

        let mut pages = client.select_pages(
            "main",
            "users",
            Filter::new(),
            SelectOptions::new().order_by("id"),
            3,
        );
        let mut sizes = Vec::new();
        while let Some(page) = pages.next_page().await {
            sizes.push(page.unwrap().len());
        }
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_page() {
        let fixture = ClientFixture::with_sample_schema().await;
        let client = &fixture.client;
        let records = (0..4).map(|i| user_record(&format!("u{}", i), None)).collect();
        client.insert("main", "users", records).await.unwrap();

        let pages = client
            .select_pages("main", "users", Filter::new(), SelectOptions::new(), 2)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(pages.len(), 2);
    }

    #[tokio::test]
    async fn test_pages_stop_after_error() {
        let fixture = ClientFixture::with_sample_schema().await;
        let mut pages = fixture.client.select_pages(
            "main",
            "no_such_table",
            Filter::new(),
            SelectOptions::new(),
            10,
        );
        assert!(matches!(pages.next_page().await, Some(Err(_))));
        assert!(pages.next_page().await.is_none());
    }

    #[tokio::test]
    async fn test_insert_pages_chunking() {
        let fixture = ClientFixture::with_sample_schema().await;
        let client = &fixture.client;
        let records: Vec<Record> = (0..5).map(|i| user_record(&format!("p{}", i), Some(i))).collect();

        let responses = client
            .insert_pages("main", "users", records, 2)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses.iter().map(|r| r.rows_affected).sum::<u64>(), 5);

        let all = client
            .select("main", "users", &Filter::new(), &SelectOptions::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[4]["name"], Value::from("p4"));
    }
}
